//! Async client for FalkorDB.
//!
//! A [`Session`] owns one RESP connection; [`Session::select_graph`] hands out
//! [`Graph`] handles that run Cypher through `GRAPH.QUERY` and decode the
//! compact reply into a [`ResultSet`].

pub mod config;
pub mod decoder;
pub mod error;
pub mod graph;
pub mod query;
pub mod resp;
pub mod result;
pub mod schema;
pub mod session;
pub mod value;

#[cfg(feature = "test-utils")]
pub mod testutil;

pub use config::ConnectionConfig;
pub use decoder::decode;
pub use error::{DecodeError, FalkorError, Result};
pub use graph::{Graph, SlowLogEntry};
pub use query::{query, Query};
pub use resp::{RespCodec, RespValue};
pub use result::{Column, ColumnKind, QueryStats, Record, ResultSet, RowError};
pub use schema::{GraphSchema, SchemaCache, SchemaKind};
pub use session::Session;
pub use value::{Edge, Node, Path, Point, Properties, Value};
