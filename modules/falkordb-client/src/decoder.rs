//! Compact reply decoding.
//!
//! A data reply is either `[stats]` (acknowledgement) or
//! `[header, rows, stats]`. Header columns are `[column_type, name]`; scalar
//! cells are `[type_tag, payload]`. Graph entities reference labels,
//! relationship types and property keys by integer id, resolved against a
//! [`GraphSchema`] snapshot.
//!
//! Framing problems (wrong shapes at the reply, header or row-list level) are
//! protocol errors. Problems inside a single cell only fail that row.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{DecodeError, FalkorError, Result};
use crate::resp::RespValue;
use crate::result::{Column, ColumnKind, QueryStats, Record, ResultSet, Row, RowError};
use crate::schema::{GraphSchema, SchemaKind};
use crate::value::{Edge, Node, Path, Point, Properties, Value};

/// Wire type tags for scalar cells.
mod type_tag {
    pub const UNKNOWN: i64 = 0;
    pub const NULL: i64 = 1;
    pub const STRING: i64 = 2;
    pub const INTEGER: i64 = 3;
    pub const BOOLEAN: i64 = 4;
    pub const DOUBLE: i64 = 5;
    pub const ARRAY: i64 = 6;
    pub const EDGE: i64 = 7;
    pub const NODE: i64 = 8;
    pub const PATH: i64 = 9;
    pub const MAP: i64 = 10;
    pub const POINT: i64 = 11;
    pub const VECTOR_F32: i64 = 12;
}

/// Decode a data reply (errors already split off) into a [`ResultSet`].
pub fn decode(raw: &RespValue, schema: &GraphSchema) -> Result<ResultSet> {
    let parts = raw
        .as_array()
        .ok_or_else(|| protocol(format!("expected reply array, got {}", raw.kind())))?;

    match parts {
        [stats] => Ok(ResultSet::new(Vec::new(), Vec::new(), decode_stats(stats)?)),
        [header, rows, stats] => {
            let columns = decode_header(header)?;
            let stats = decode_stats(stats)?;
            let raw_rows = rows
                .as_array()
                .ok_or_else(|| protocol(format!("expected row array, got {}", rows.kind())))?;

            let keys = Arc::new(columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>());
            let decoder = CellDecoder { schema };
            let rows = raw_rows
                .iter()
                .enumerate()
                .map(|(i, row)| decoder.row(i, row, &columns, &keys))
                .collect();
            Ok(ResultSet::new(columns, rows, stats))
        }
        other => Err(protocol(format!(
            "expected 1 or 3 reply sections, got {}",
            other.len()
        ))),
    }
}

/// Pull a plain list of strings out of a single-column reply, e.g. `CALL db.labels()`.
pub(crate) fn decode_string_column(raw: &RespValue) -> Result<Vec<String>> {
    let mut result = decode(raw, &GraphSchema::default())?;
    let mut names = Vec::with_capacity(result.len());
    while result.next() {
        let record = result.record()?;
        names.push(record.get_by_index(0)?.as_str()?.to_string());
    }
    Ok(names)
}

fn protocol(message: String) -> FalkorError {
    FalkorError::Protocol(message)
}

fn decode_header(raw: &RespValue) -> Result<Vec<Column>> {
    let entries = raw
        .as_array()
        .ok_or_else(|| protocol(format!("expected header array, got {}", raw.kind())))?;

    entries
        .iter()
        .map(|entry| match entry.as_array() {
            Some([kind, name]) => {
                let kind = kind
                    .as_integer()
                    .ok_or_else(|| protocol("header column type is not an integer".to_string()))?;
                let name = name
                    .as_text()
                    .ok_or_else(|| protocol("header column name is not a string".to_string()))?;
                Ok(Column {
                    name: name.to_string(),
                    kind: ColumnKind::from_code(kind),
                })
            }
            // non-compact servers send bare names
            _ => match entry.as_text() {
                Some(name) => Ok(Column {
                    name: name.to_string(),
                    kind: ColumnKind::Scalar,
                }),
                None => Err(protocol(format!("malformed header column: {entry:?}"))),
            },
        })
        .collect()
}

fn decode_stats(raw: &RespValue) -> Result<QueryStats> {
    let lines = raw
        .as_array()
        .ok_or_else(|| protocol(format!("expected statistics array, got {}", raw.kind())))?;
    let lines = lines
        .iter()
        .map(|line| {
            line.as_text()
                .ok_or_else(|| protocol(format!("statistics entry is a {}", line.kind())))
        })
        .collect::<Result<Vec<&str>>>()?;
    Ok(QueryStats::parse(lines))
}

type Decoded<T> = std::result::Result<T, DecodeError>;

struct CellDecoder<'a> {
    schema: &'a GraphSchema,
}

impl CellDecoder<'_> {
    fn row(&self, index: usize, raw: &RespValue, columns: &[Column], keys: &Arc<Vec<String>>) -> Row {
        let fail = |column: usize, error: DecodeError| RowError {
            row: index,
            column,
            error,
        };

        let cells = raw.as_array().ok_or_else(|| {
            fail(0, DecodeError::malformed("row", format!("expected array, got {}", raw.kind())))
        })?;
        if cells.len() != columns.len() {
            return Err(fail(
                cells.len().min(columns.len()),
                DecodeError::malformed(
                    "row",
                    format!("{} cells for {} columns", cells.len(), columns.len()),
                ),
            ));
        }

        let values = cells
            .iter()
            .zip(columns)
            .enumerate()
            .map(|(i, (cell, column))| self.column_cell(column.kind, cell).map_err(|e| fail(i, e)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Record::new(Arc::clone(keys), values))
    }

    fn column_cell(&self, kind: ColumnKind, cell: &RespValue) -> Decoded<Value> {
        match kind {
            ColumnKind::Scalar => self.typed(cell),
            ColumnKind::Node => self.node(cell).map(Value::Node),
            ColumnKind::Relation => self.edge(cell).map(Value::Edge),
            ColumnKind::Unknown(code) => Err(DecodeError::UnknownColumnType(code)),
        }
    }

    /// `[type_tag, payload]`
    fn typed(&self, cell: &RespValue) -> Decoded<Value> {
        match cell.as_array() {
            Some([tag, payload]) => {
                let tag = tag
                    .as_integer()
                    .ok_or_else(|| DecodeError::malformed("value", "type tag is not an integer"))?;
                self.scalar(tag, payload)
            }
            _ => Err(DecodeError::malformed(
                "value",
                format!("expected [type, value] pair, got {}", cell.kind()),
            )),
        }
    }

    fn scalar(&self, code: i64, payload: &RespValue) -> Decoded<Value> {
        match code {
            type_tag::NULL => Ok(Value::Null),
            type_tag::STRING => text(payload, "string").map(|s| Value::String(s.to_string())),
            type_tag::INTEGER => integer(payload, "integer").map(Value::Int),
            type_tag::BOOLEAN => match text(payload, "boolean")? {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                other => Err(DecodeError::malformed("boolean", format!("{other:?}"))),
            },
            type_tag::DOUBLE => double(payload, "double").map(Value::Float),
            type_tag::ARRAY => array(payload, "array")?
                .iter()
                .map(|item| self.typed(item))
                .collect::<Decoded<Vec<_>>>()
                .map(Value::List),
            type_tag::EDGE => self.edge(payload).map(Value::Edge),
            type_tag::NODE => self.node(payload).map(Value::Node),
            type_tag::PATH => self.path(payload).map(Value::Path),
            type_tag::MAP => self.map(payload).map(Value::Map),
            type_tag::POINT => point(payload).map(Value::Point),
            type_tag::VECTOR_F32 => vector(payload).map(Value::Vector),
            type_tag::UNKNOWN => Err(DecodeError::UnknownTypeTag(code)),
            other => Err(DecodeError::UnknownTypeTag(other)),
        }
    }

    /// `[id, [label_id...], [[key_id, type, value]...]]`
    fn node(&self, payload: &RespValue) -> Decoded<Node> {
        let [id, labels, properties] = array(payload, "node")? else {
            return Err(DecodeError::malformed("node", "expected 3 fields"));
        };
        let labels = array(labels, "node labels")?
            .iter()
            .map(|label| {
                let id = integer(label, "label id")?;
                self.schema
                    .resolve(SchemaKind::Label, id)
                    .map(str::to_string)
            })
            .collect::<Decoded<Vec<_>>>()?;

        Ok(Node {
            id: integer(id, "node id")?,
            labels,
            properties: self.properties(properties)?,
        })
    }

    /// `[id, reltype_id, src_id, dst_id, [[key_id, type, value]...]]`
    fn edge(&self, payload: &RespValue) -> Decoded<Edge> {
        let [id, reltype, src, dst, properties] = array(payload, "edge")? else {
            return Err(DecodeError::malformed("edge", "expected 5 fields"));
        };
        let reltype = integer(reltype, "relationship type id")?;

        Ok(Edge {
            id: integer(id, "edge id")?,
            relationship_type: self
                .schema
                .resolve(SchemaKind::RelationshipType, reltype)?
                .to_string(),
            src_node: integer(src, "source node id")?,
            dst_node: integer(dst, "destination node id")?,
            properties: self.properties(properties)?,
        })
    }

    fn properties(&self, raw: &RespValue) -> Decoded<Properties> {
        array(raw, "properties")?
            .iter()
            .map(|prop| {
                let [key, tag, value] = array(prop, "property")? else {
                    return Err(DecodeError::malformed("property", "expected [key, type, value]"));
                };
                let key = self
                    .schema
                    .resolve(SchemaKind::PropertyKey, integer(key, "property key id")?)?;
                let tag = integer(tag, "property type")?;
                Ok((key.to_string(), self.scalar(tag, value)?))
            })
            .collect()
    }

    /// `[[ARRAY, [node...]], [ARRAY, [edge...]]]`
    fn path(&self, payload: &RespValue) -> Decoded<Path> {
        let [nodes, edges] = array(payload, "path")? else {
            return Err(DecodeError::malformed("path", "expected [nodes, edges]"));
        };
        let nodes = match self.typed(nodes)? {
            Value::List(items) => items
                .into_iter()
                .map(|v| match v {
                    Value::Node(n) => Ok(n),
                    other => Err(DecodeError::malformed("path", format!("{} in node list", other.kind()))),
                })
                .collect::<Decoded<Vec<_>>>()?,
            other => return Err(DecodeError::malformed("path", format!("nodes are a {}", other.kind()))),
        };
        let edges = match self.typed(edges)? {
            Value::List(items) => items
                .into_iter()
                .map(|v| match v {
                    Value::Edge(e) => Ok(e),
                    other => Err(DecodeError::malformed("path", format!("{} in edge list", other.kind()))),
                })
                .collect::<Decoded<Vec<_>>>()?,
            other => return Err(DecodeError::malformed("path", format!("edges are a {}", other.kind()))),
        };
        Ok(Path { nodes, edges })
    }

    /// Flat `[key, [type, value], key, [type, value], ...]`
    fn map(&self, payload: &RespValue) -> Decoded<BTreeMap<String, Value>> {
        let items = array(payload, "map")?;
        if items.len() % 2 != 0 {
            return Err(DecodeError::malformed("map", "odd number of entries"));
        }
        items
            .chunks_exact(2)
            .map(|pair| Ok((text(&pair[0], "map key")?.to_string(), self.typed(&pair[1])?)))
            .collect()
    }
}

fn array<'r>(raw: &'r RespValue, kind: &'static str) -> Decoded<&'r [RespValue]> {
    raw.as_array()
        .ok_or_else(|| DecodeError::malformed(kind, format!("expected array, got {}", raw.kind())))
}

fn text<'r>(raw: &'r RespValue, kind: &'static str) -> Decoded<&'r str> {
    raw.as_text()
        .ok_or_else(|| DecodeError::malformed(kind, format!("expected UTF-8 string, got {}", raw.kind())))
}

fn integer(raw: &RespValue, kind: &'static str) -> Decoded<i64> {
    raw.as_integer()
        .ok_or_else(|| DecodeError::malformed(kind, format!("expected integer, got {}", raw.kind())))
}

/// Doubles travel as strings; tolerate integer encoding for whole numbers.
fn double(raw: &RespValue, kind: &'static str) -> Decoded<f64> {
    match raw {
        RespValue::Integer(i) => Ok(*i as f64),
        _ => {
            let s = text(raw, kind)?;
            parse_double(s).ok_or_else(|| DecodeError::malformed(kind, format!("{s:?} is not a number")))
        }
    }
}

fn parse_double(s: &str) -> Option<f64> {
    match s {
        "inf" | "+inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        "nan" | "-nan" => Some(f64::NAN),
        _ => s.parse().ok(),
    }
}

/// `[latitude, longitude]`
fn point(payload: &RespValue) -> Decoded<Point> {
    let [latitude, longitude] = array(payload, "point")? else {
        return Err(DecodeError::malformed("point", "expected [latitude, longitude]"));
    };
    Ok(Point {
        latitude: double(latitude, "point latitude")?,
        longitude: double(longitude, "point longitude")?,
    })
}

fn vector(payload: &RespValue) -> Decoded<Vec<f32>> {
    array(payload, "vector")?
        .iter()
        .map(|x| double(x, "vector element").map(|f| f as f32))
        .collect()
}
