//! Per-session dictionaries that map the compact integer ids in replies to
//! label, relationship-type and property-key names.
//!
//! Each graph gets an immutable [`GraphSchema`] snapshot. Decoders work
//! against a snapshot; refreshes and invalidations publish a new map with a
//! single atomic swap, so a decode never observes a half-applied change.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, warn};

use crate::error::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchemaKind {
    Label,
    RelationshipType,
    PropertyKey,
}

impl SchemaKind {
    /// Procedure that lists every name of this kind, in id order.
    pub(crate) fn procedure(self) -> &'static str {
        match self {
            SchemaKind::Label => "CALL db.labels()",
            SchemaKind::RelationshipType => "CALL db.relationshipTypes()",
            SchemaKind::PropertyKey => "CALL db.propertyKeys()",
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SchemaKind::Label => "label",
            SchemaKind::RelationshipType => "relationship type",
            SchemaKind::PropertyKey => "property key",
        })
    }
}

/// Name dictionaries for one graph, plus the server graph version they belong to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphSchema {
    version: Option<i64>,
    labels: Vec<String>,
    relationship_types: Vec<String>,
    property_keys: Vec<String>,
}

impl GraphSchema {
    pub fn version(&self) -> Option<i64> {
        self.version
    }

    pub fn names(&self, kind: SchemaKind) -> &[String] {
        match kind {
            SchemaKind::Label => &self.labels,
            SchemaKind::RelationshipType => &self.relationship_types,
            SchemaKind::PropertyKey => &self.property_keys,
        }
    }

    pub fn resolve(&self, kind: SchemaKind, id: i64) -> Result<&str, DecodeError> {
        if id < 0 {
            return Err(DecodeError::malformed("schema id", format!("negative {kind} id {id}")));
        }
        self.names(kind)
            .get(id as usize)
            .map(String::as_str)
            .ok_or(DecodeError::UnresolvedSchemaId { kind, id })
    }

    fn names_mut(&mut self, kind: SchemaKind) -> &mut Vec<String> {
        match kind {
            SchemaKind::Label => &mut self.labels,
            SchemaKind::RelationshipType => &mut self.relationship_types,
            SchemaKind::PropertyKey => &mut self.property_keys,
        }
    }
}

type SchemaMap = HashMap<String, Arc<GraphSchema>>;

/// Schema dictionaries for every graph used through one session.
pub struct SchemaCache {
    graphs: ArcSwap<SchemaMap>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self {
            graphs: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Consistent view of one graph's dictionaries. Unknown graphs get an empty schema.
    pub fn snapshot(&self, graph: &str) -> Arc<GraphSchema> {
        self.graphs.load().get(graph).cloned().unwrap_or_default()
    }

    /// Replace the names of one kind after a refresh from the server.
    pub fn store_names(&self, graph: &str, kind: SchemaKind, names: Vec<String>) {
        debug!(graph, %kind, count = names.len(), "Schema dictionary refreshed");
        self.update(graph, |schema| *schema.names_mut(kind) = names.clone());
    }

    /// Drop every cached name for `graph` and record the version the server reported.
    pub fn invalidate(&self, graph: &str, version: i64) {
        match self.snapshot(graph).version() {
            Some(previous) => warn!(graph, previous, version, "Graph schema changed, dropping cached dictionaries"),
            None => debug!(graph, version, "Learned graph schema version"),
        }
        self.update(graph, |schema| {
            *schema = GraphSchema {
                version: Some(version),
                ..GraphSchema::default()
            }
        });
    }

    pub fn remove(&self, graph: &str) {
        self.graphs.rcu(|current| {
            let mut next = SchemaMap::clone(current);
            next.remove(graph);
            next
        });
    }

    fn update<F>(&self, graph: &str, apply: F)
    where
        F: Fn(&mut GraphSchema),
    {
        self.graphs.rcu(|current| {
            let mut next = SchemaMap::clone(current);
            let mut schema = next
                .get(graph)
                .map(|existing| GraphSchema::clone(existing))
                .unwrap_or_default();
            apply(&mut schema);
            next.insert(graph.to_string(), Arc::new(schema));
            next
        });
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}
