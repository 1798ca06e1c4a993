//! Query requests and the command/reply plumbing around them.
//!
//! Parameters are sent through the server's own binding mechanism: a
//! `CYPHER name=value ...` header in front of the statement, which the server
//! parses separately from the query text. Values are never spliced into the
//! statement itself.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{FalkorError, Result};
use crate::resp::RespValue;
use crate::value::Value;

const VERSION_MISMATCH: &str = "version mismatch";

/// Start building a query.
pub fn query(statement: impl Into<String>) -> Query {
    Query::new(statement)
}

/// A statement plus its bound parameters and execution options.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    statement: String,
    params: BTreeMap<String, Value>,
    timeout: Option<Duration>,
    read_only: bool,
}

impl Query {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            params: BTreeMap::new(),
            timeout: None,
            read_only: false,
        }
    }

    /// Bind `$key`. Binding the same key again replaces the earlier value.
    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn params<K, V, I>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in params {
            self.params.insert(key.into(), value.into());
        }
        self
    }

    /// Server-side execution timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run through `GRAPH.RO_QUERY`; the server refuses any write.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn get_param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The statement as sent: parameter header followed by the query text.
    pub fn command_text(&self) -> Result<String> {
        if self.params.is_empty() {
            return Ok(self.statement.clone());
        }

        let mut text = String::from("CYPHER ");
        for (name, value) in &self.params {
            if !is_identifier(name) {
                return Err(FalkorError::Param {
                    name: name.clone(),
                    reason: "parameter names must be identifiers".to_string(),
                });
            }
            text.push_str(name);
            text.push('=');
            encode_param(value, &mut text).map_err(|reason| FalkorError::Param {
                name: name.clone(),
                reason,
            })?;
            text.push(' ');
        }
        text.push_str(&self.statement);
        Ok(text)
    }

    /// Assemble the `GRAPH.QUERY` / `GRAPH.RO_QUERY` command in compact mode.
    pub(crate) fn to_command(&self, graph: &str, version: Option<i64>) -> Result<RespValue> {
        let command = if self.read_only {
            "GRAPH.RO_QUERY"
        } else {
            "GRAPH.QUERY"
        };
        let mut args = vec![
            command.to_string(),
            graph.to_string(),
            self.command_text()?,
            "--compact".to_string(),
        ];
        if let Some(timeout) = self.timeout {
            args.push("timeout".to_string());
            args.push(timeout.as_millis().to_string());
        }
        if let Some(version) = version {
            args.push("version".to_string());
            args.push(version.to_string());
        }
        Ok(RespValue::command(args))
    }
}

/// Append the literal form of `value` to `out`.
pub(crate) fn encode_param(value: &Value, out: &mut String) -> std::result::Result<(), String> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => {
            // -9223372036854775808 parses as negation of an out-of-range literal
            if *i == i64::MIN {
                return Err(format!("{i} has no integer literal form"));
            }
            out.push_str(&i.to_string());
        }
        Value::Float(f) => {
            if !f.is_finite() {
                return Err(format!("{f} has no literal form"));
            }
            // Debug keeps a decimal point or exponent, so the server reads a float back.
            out.push_str(&format!("{f:?}"));
        }
        Value::String(s) => quote_string(s, out),
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                encode_param(item, out)?;
            }
            out.push(']');
        }
        Value::Map(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                push_identifier(key, out);
                out.push_str(": ");
                encode_param(item, out)?;
            }
            out.push('}');
        }
        Value::Point(p) => {
            if !p.latitude.is_finite() || !p.longitude.is_finite() {
                return Err("point coordinates must be finite".to_string());
            }
            out.push_str(&format!(
                "point({{latitude: {:?}, longitude: {:?}}})",
                p.latitude, p.longitude
            ));
        }
        Value::Vector(v) => {
            out.push_str("vecf32([");
            for (i, x) in v.iter().enumerate() {
                if !x.is_finite() {
                    return Err("vector elements must be finite".to_string());
                }
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&format!("{x:?}"));
            }
            out.push_str("])");
        }
        Value::Node(_) | Value::Edge(_) | Value::Path(_) => {
            return Err(format!("a {} cannot be sent as a parameter", value.kind()));
        }
    }
    Ok(())
}

fn quote_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            other => out.push(other),
        }
    }
    out.push('"');
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Write `name` as an identifier, backtick-quoting it when it is not a plain one.
pub(crate) fn push_identifier(name: &str, out: &mut String) {
    if is_identifier(name) {
        out.push_str(name);
    } else {
        out.push('`');
        out.push_str(&name.replace('`', "``"));
        out.push('`');
    }
}

pub(crate) fn identifier(name: &str) -> String {
    let mut out = String::new();
    push_identifier(name, &mut out);
    out
}

/// What a `GRAPH.QUERY` reply turned out to be, once errors are split off.
#[derive(Debug)]
pub(crate) enum Reply {
    /// Tabular result or bare acknowledgement; handed to the decoder.
    Data(RespValue),
    /// The graph's schema changed since the version we sent.
    VersionMismatch(i64),
}

/// Separate server errors from data. Error text is passed through verbatim.
pub(crate) fn classify_reply(raw: RespValue) -> Result<Reply> {
    match raw {
        RespValue::Error(message) => Err(FalkorError::Query { message }),
        RespValue::Array(items) => {
            if let [RespValue::Error(message), RespValue::Integer(version)] = items.as_slice() {
                if message.starts_with(VERSION_MISMATCH) {
                    return Ok(Reply::VersionMismatch(*version));
                }
            }
            // runtime failures arrive as the last element, after any partial output
            if let Some(RespValue::Error(message)) = items.last() {
                return Err(FalkorError::Query {
                    message: message.clone(),
                });
            }
            Ok(Reply::Data(RespValue::Array(items)))
        }
        other => Err(FalkorError::Protocol(format!(
            "expected an array reply, got {}",
            other.kind()
        ))),
    }
}
