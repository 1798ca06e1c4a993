//! Decoded values and graph entities.
//!
//! A column value is one of a closed set of kinds. Callers narrow it with the
//! `as_*` accessors or `TryFrom`, both of which fail with
//! [`FalkorError::TypeMismatch`] instead of guessing.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::{FalkorError, Result};

pub type Properties = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Node(Node),
    Edge(Edge),
    Path(Path),
    Point(Point),
    Vector(Vec<f32>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Node(_) => "node",
            Value::Edge(_) => "edge",
            Value::Path(_) => "path",
            Value::Point(_) => "point",
            Value::Vector(_) => "vector",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(mismatch("boolean", other)),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            other => Err(mismatch("integer", other)),
        }
    }

    pub fn as_float(&self) -> Result<f64> {
        match self {
            Value::Float(f) => Ok(*f),
            other => Err(mismatch("float", other)),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(mismatch("string", other)),
        }
    }

    pub fn as_list(&self) -> Result<&[Value]> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(mismatch("list", other)),
        }
    }

    pub fn as_map(&self) -> Result<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Ok(map),
            other => Err(mismatch("map", other)),
        }
    }

    pub fn as_node(&self) -> Result<&Node> {
        match self {
            Value::Node(node) => Ok(node),
            other => Err(mismatch("node", other)),
        }
    }

    pub fn as_edge(&self) -> Result<&Edge> {
        match self {
            Value::Edge(edge) => Ok(edge),
            other => Err(mismatch("edge", other)),
        }
    }

    pub fn as_path(&self) -> Result<&Path> {
        match self {
            Value::Path(path) => Ok(path),
            other => Err(mismatch("path", other)),
        }
    }

    pub fn as_point(&self) -> Result<Point> {
        match self {
            Value::Point(point) => Ok(*point),
            other => Err(mismatch("point", other)),
        }
    }

    pub fn as_vector(&self) -> Result<&[f32]> {
        match self {
            Value::Vector(v) => Ok(v),
            other => Err(mismatch("vector", other)),
        }
    }

    /// Render for display inside a container: strings are quoted.
    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s:?}"),
            other => write!(f, "{other}"),
        }
    }
}

fn mismatch(expected: &'static str, found: &Value) -> FalkorError {
    FalkorError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}

fn fmt_properties(f: &mut fmt::Formatter<'_>, properties: &Properties) -> fmt::Result {
    if properties.is_empty() {
        return Ok(());
    }
    f.write_str(" {")?;
    for (i, (key, value)) in properties.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{key}: ")?;
        value.fmt_nested(f)?;
    }
    f.write_str("}")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::String(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.fmt_nested(f)?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: ")?;
                    value.fmt_nested(f)?;
                }
                f.write_str("}")
            }
            Value::Node(node) => write!(f, "{node}"),
            Value::Edge(edge) => write!(f, "{edge}"),
            Value::Path(path) => write!(f, "{path}"),
            Value::Point(point) => write!(f, "{point}"),
            Value::Vector(v) => write!(f, "vecf32({v:?})"),
        }
    }
}

/// A node snapshot. Holds no reference back to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: i64,
    pub labels: Vec<String>,
    pub properties: Properties,
}

impl Node {
    pub fn get_property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Typed property lookup.
    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = FalkorError>,
    {
        property(&self.properties, key)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.id)?;
        for label in &self.labels {
            write!(f, ":{label}")?;
        }
        fmt_properties(f, &self.properties)?;
        f.write_str(")")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: i64,
    pub relationship_type: String,
    pub src_node: i64,
    pub dst_node: i64,
    pub properties: Properties,
}

impl Edge {
    pub fn get_property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = FalkorError>,
    {
        property(&self.properties, key)
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({})-[{}:{}",
            self.src_node, self.id, self.relationship_type
        )?;
        fmt_properties(f, &self.properties)?;
        write!(f, "]->({})", self.dst_node)
    }
}

fn property<T>(properties: &Properties, key: &str) -> Result<T>
where
    T: TryFrom<Value, Error = FalkorError>,
{
    properties
        .get(key)
        .cloned()
        .ok_or_else(|| FalkorError::MissingProperty(key.to_string()))
        .and_then(T::try_from)
}

/// Alternating node/edge walk: `nodes.len() == edges.len() + 1` for a non-empty path.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Path {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Path {
    /// Number of edges traversed.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn first_node(&self) -> Option<&Node> {
        self.nodes.first()
    }

    pub fn last_node(&self) -> Option<&Node> {
        self.nodes.last()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<")?;
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                match self.edges.get(i - 1) {
                    Some(edge) => write!(f, "-[{}:{}]-", edge.id, edge.relationship_type)?,
                    None => f.write_str("-")?,
                }
            }
            write!(f, "({})", node.id)?;
        }
        f.write_str(">")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub latitude: f64,
    pub longitude: f64,
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "point({{latitude: {:?}, longitude: {:?}}})",
            self.latitude, self.longitude
        )
    }
}

// --- Conversions into Value (parameters) ---

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Float(f64::from(f))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<Point> for Value {
    fn from(p: Point) -> Self {
        Value::Point(p)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<V: Into<Value>> From<BTreeMap<String, V>> for Value {
    fn from(map: BTreeMap<String, V>) -> Self {
        Value::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<V: Into<Value>> From<HashMap<String, V>> for Value {
    fn from(map: HashMap<String, V>) -> Self {
        Value::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

// --- Narrowing conversions out of Value ---

impl TryFrom<Value> for bool {
    type Error = FalkorError;

    fn try_from(value: Value) -> Result<Self> {
        value.as_bool()
    }
}

impl TryFrom<Value> for i64 {
    type Error = FalkorError;

    fn try_from(value: Value) -> Result<Self> {
        value.as_int()
    }
}

impl TryFrom<Value> for f64 {
    type Error = FalkorError;

    fn try_from(value: Value) -> Result<Self> {
        value.as_float()
    }
}

impl TryFrom<Value> for String {
    type Error = FalkorError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl TryFrom<Value> for Vec<Value> {
    type Error = FalkorError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::List(items) => Ok(items),
            other => Err(mismatch("list", &other)),
        }
    }
}

impl TryFrom<Value> for BTreeMap<String, Value> {
    type Error = FalkorError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Map(map) => Ok(map),
            other => Err(mismatch("map", &other)),
        }
    }
}

impl TryFrom<Value> for Node {
    type Error = FalkorError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Node(node) => Ok(node),
            other => Err(mismatch("node", &other)),
        }
    }
}

impl TryFrom<Value> for Edge {
    type Error = FalkorError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Edge(edge) => Ok(edge),
            other => Err(mismatch("edge", &other)),
        }
    }
}

impl TryFrom<Value> for Path {
    type Error = FalkorError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Path(path) => Ok(path),
            other => Err(mismatch("path", &other)),
        }
    }
}

impl TryFrom<Value> for Point {
    type Error = FalkorError;

    fn try_from(value: Value) -> Result<Self> {
        value.as_point()
    }
}
