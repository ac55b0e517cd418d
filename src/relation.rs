//! The relation cache: a process-local map from relation id to the schema
//! the server most recently announced for it.
//!
//! A session's cache starts empty and is populated as Relation messages
//! arrive; it is never carried across reconnects — the session manager
//! constructs a fresh one for every new stream, because the server always
//! re-announces every relation at the start of a new replication session.

use serde::Serialize;
use std::collections::HashMap;

/// Metadata about one column in a replicated table.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub type_oid: u32,
}

/// Metadata about a replicated table (a "relation" in PostgreSQL's terms),
/// as announced by a Relation ('R') message. Immutable once built; a later
/// Relation message for the same id replaces the cache entry wholesale.
#[derive(Debug, Clone, Serialize)]
pub struct RelationInfo {
    pub relation_id: u32,
    pub namespace: String,
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

/// Maps relation id to the most recently cached `RelationInfo`.
///
/// One cache lives for exactly one replication session: Insert/Update/Delete
/// handlers look up the relation here, and a lookup miss means the server
/// sent a row change before announcing that relation's schema, which is a
/// protocol desync worth reconnecting over.
#[derive(Debug, Default)]
pub struct RelationCache {
    relations: HashMap<u32, RelationInfo>,
}

impl RelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, relation: RelationInfo) {
        self.relations.insert(relation.relation_id, relation);
    }

    pub fn get(&self, relation_id: u32) -> Option<&RelationInfo> {
        self.relations.get(&relation_id)
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }
}
