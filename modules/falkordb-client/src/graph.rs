use std::collections::BTreeSet;
use std::time::Instant;

use tracing::debug;

use crate::decoder;
use crate::error::{FalkorError, Result};
use crate::query::{classify_reply, identifier, is_identifier, Query, Reply};
use crate::resp::RespValue;
use crate::result::ResultSet;
use crate::schema::SchemaKind;
use crate::session::{expect_reply, text_list, Session};
use crate::value::Value;

/// One `GRAPH.SLOWLOG` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SlowLogEntry {
    /// Unix time in seconds.
    pub timestamp: i64,
    pub command: String,
    pub query: String,
    pub duration_ms: f64,
}

/// A named graph on a [`Session`].
#[derive(Clone)]
pub struct Graph {
    name: String,
    session: Session,
}

impl Graph {
    pub(crate) fn new(name: impl Into<String>, session: Session) -> Self {
        Self {
            name: name.into(),
            session,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run a query and decode its result.
    ///
    /// Every query carries the cached schema version. A mismatch drops the
    /// cached dictionaries, records the server's version and re-issues the
    /// query once. Label, relationship type or property key ids missing
    /// from the cache trigger one refresh per kind before decoding again.
    pub async fn query(&self, query: Query) -> Result<ResultSet> {
        let started = Instant::now();
        let schema = self.session.schema();

        let mut version_retried = false;
        let raw = loop {
            // unknown counts as 0 so the server always gets to report a change
            let version = schema.snapshot(&self.name).version().unwrap_or(0);
            match self.exchange(query.to_command(&self.name, Some(version))?).await? {
                Reply::Data(raw) => break raw,
                Reply::VersionMismatch(current) if !version_retried => {
                    schema.invalidate(&self.name, current);
                    version_retried = true;
                }
                Reply::VersionMismatch(current) => {
                    return Err(FalkorError::Protocol(format!(
                        "graph {} reported a version mismatch twice (server version {current})",
                        self.name
                    )))
                }
            }
        };

        let mut refreshed = BTreeSet::new();
        loop {
            let result = decoder::decode(&raw, &schema.snapshot(&self.name))?;
            let missing: Vec<SchemaKind> = result
                .unresolved_schema()
                .into_iter()
                .filter(|kind| !refreshed.contains(kind))
                .collect();

            if missing.is_empty() {
                debug!(
                    graph = %self.name,
                    rows = result.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Query completed"
                );
                return Ok(result);
            }
            for kind in missing {
                self.fetch_names(kind).await?;
                refreshed.insert(kind);
            }
        }
    }

    pub async fn ro_query(&self, query: Query) -> Result<ResultSet> {
        self.query(query.read_only(true)).await
    }

    /// Execution plan without running the query.
    pub async fn explain(&self, query: &Query) -> Result<Vec<String>> {
        self.plan("GRAPH.EXPLAIN", query).await
    }

    /// Run the query and return the plan annotated with per-operation timings.
    pub async fn profile(&self, query: &Query) -> Result<Vec<String>> {
        self.plan("GRAPH.PROFILE", query).await
    }

    /// Remove the graph from the server along with its cached schema.
    pub async fn delete(&self) -> Result<()> {
        let reply = self
            .session
            .execute(RespValue::command(["GRAPH.DELETE", self.name.as_str()]))
            .await?;
        expect_reply(reply)?;
        self.session.schema().remove(&self.name);
        Ok(())
    }

    /// Copy this graph to `destination` and return a handle to the copy.
    pub async fn copy(&self, destination: &str) -> Result<Graph> {
        expect_reply(
            self.session
                .execute(RespValue::command(["GRAPH.COPY", self.name.as_str(), destination]))
                .await?,
        )?;
        Ok(self.session.select_graph(destination))
    }

    pub async fn slowlog(&self) -> Result<Vec<SlowLogEntry>> {
        let reply = expect_reply(
            self.session
                .execute(RespValue::command(["GRAPH.SLOWLOG", self.name.as_str()]))
                .await?,
        )?;
        reply
            .as_array()
            .ok_or_else(|| FalkorError::Protocol(format!("unexpected GRAPH.SLOWLOG reply: {reply:?}")))?
            .iter()
            .map(slowlog_entry)
            .collect()
    }

    /// `CALL procedure($p0, $p1, ...) [YIELD ...]` with the arguments bound as parameters.
    pub async fn call_procedure<V>(
        &self,
        procedure: &str,
        args: impl IntoIterator<Item = V>,
        yields: &[&str],
    ) -> Result<ResultSet>
    where
        V: Into<Value>,
    {
        self.query(procedure_query(procedure, args, yields)?).await
    }

    pub async fn create_node_range_index(&self, label: &str, properties: &[&str]) -> Result<ResultSet> {
        self.query(Query::new(index_statement("CREATE", &node_pattern(label), properties)?))
            .await
    }

    pub async fn create_edge_range_index(&self, relationship_type: &str, properties: &[&str]) -> Result<ResultSet> {
        self.query(Query::new(index_statement("CREATE", &edge_pattern(relationship_type), properties)?))
            .await
    }

    pub async fn drop_node_range_index(&self, label: &str, properties: &[&str]) -> Result<ResultSet> {
        self.query(Query::new(index_statement("DROP", &node_pattern(label), properties)?))
            .await
    }

    pub async fn drop_edge_range_index(&self, relationship_type: &str, properties: &[&str]) -> Result<ResultSet> {
        self.query(Query::new(index_statement("DROP", &edge_pattern(relationship_type), properties)?))
            .await
    }

    pub async fn labels(&self) -> Result<Vec<String>> {
        self.fetch_names(SchemaKind::Label).await
    }

    pub async fn relationship_types(&self) -> Result<Vec<String>> {
        self.fetch_names(SchemaKind::RelationshipType).await
    }

    pub async fn property_keys(&self) -> Result<Vec<String>> {
        self.fetch_names(SchemaKind::PropertyKey).await
    }

    /// Load one dictionary from the server into the cache.
    ///
    /// Sent without a version so it can never bounce on a mismatch, and
    /// decoded without the cache since the reply holds plain strings.
    async fn fetch_names(&self, kind: SchemaKind) -> Result<Vec<String>> {
        let command = Query::new(kind.procedure()).read_only(true).to_command(&self.name, None)?;
        let names = match self.exchange(command).await? {
            Reply::Data(raw) => decoder::decode_string_column(&raw)?,
            Reply::VersionMismatch(v) => {
                return Err(FalkorError::Protocol(format!(
                    "unexpected version mismatch ({v}) while loading {kind} names"
                )))
            }
        };
        self.session.schema().store_names(&self.name, kind, names.clone());
        Ok(names)
    }

    async fn exchange(&self, command: RespValue) -> Result<Reply> {
        classify_reply(self.session.execute(command).await?)
    }

    async fn plan(&self, command: &str, query: &Query) -> Result<Vec<String>> {
        let text = query.command_text()?;
        let reply = expect_reply(
            self.session
                .execute(RespValue::command([command, self.name.as_str(), text.as_str()]))
                .await?,
        )?;
        text_list(&reply)
    }
}

pub(crate) fn procedure_query<V>(procedure: &str, args: impl IntoIterator<Item = V>, yields: &[&str]) -> Result<Query>
where
    V: Into<Value>,
{
    if procedure.is_empty() || !procedure.split('.').all(is_identifier) {
        return Err(FalkorError::Param {
            name: procedure.to_string(),
            reason: "not a valid procedure name".to_string(),
        });
    }

    let args: Vec<Value> = args.into_iter().map(Into::into).collect();
    let placeholders: Vec<String> = (0..args.len()).map(|i| format!("$p{i}")).collect();

    let mut statement = format!("CALL {procedure}({})", placeholders.join(", "));
    if !yields.is_empty() {
        let yields: Vec<String> = yields.iter().map(|y| identifier(y)).collect();
        statement.push_str(" YIELD ");
        statement.push_str(&yields.join(", "));
    }

    let query = args
        .into_iter()
        .enumerate()
        .fold(Query::new(statement), |query, (i, arg)| query.param(&format!("p{i}"), arg));
    Ok(query)
}

fn node_pattern(label: &str) -> String {
    format!("(e:{})", identifier(label))
}

fn edge_pattern(relationship_type: &str) -> String {
    format!("()-[e:{}]-()", identifier(relationship_type))
}

fn index_statement(verb: &str, pattern: &str, properties: &[&str]) -> Result<String> {
    if properties.is_empty() {
        return Err(FalkorError::Param {
            name: "properties".to_string(),
            reason: "an index needs at least one property".to_string(),
        });
    }
    let properties: Vec<String> = properties.iter().map(|p| format!("e.{}", identifier(p))).collect();
    Ok(format!("{verb} INDEX FOR {pattern} ON ({})", properties.join(", ")))
}

/// `[timestamp, command, query, duration_ms]`, all as strings.
fn slowlog_entry(raw: &RespValue) -> Result<SlowLogEntry> {
    let malformed = || FalkorError::Protocol(format!("malformed slowlog entry: {raw:?}"));
    let [timestamp, command, query, duration] = raw.as_array().ok_or_else(malformed)? else {
        return Err(malformed());
    };
    let number = |v: &RespValue| -> Option<f64> {
        match v {
            RespValue::Integer(i) => Some(*i as f64),
            other => other.as_text()?.parse().ok(),
        }
    };

    Ok(SlowLogEntry {
        timestamp: number(timestamp).ok_or_else(malformed)? as i64,
        command: command.as_text().ok_or_else(malformed)?.to_string(),
        query: query.as_text().ok_or_else(malformed)?.to_string(),
        duration_ms: number(duration).ok_or_else(malformed)?,
    })
}
