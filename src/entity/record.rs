// Copyright (c) 2025 - Cowboy AI, Inc.
//! Persisted entity record

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Unit of persistence: one root entity plus its children
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Root entity type
    pub entity_type: String,

    /// Root identity
    pub id: String,

    /// Version stored by the repository (0 = never saved)
    pub version: u64,

    /// Root entity state
    pub state: Value,

    /// Child entity state, by child type then child id
    #[serde(default)]
    pub children: BTreeMap<String, BTreeMap<String, Value>>,
}

impl EntityRecord {
    /// Unsaved record
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>, state: Value) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            version: 0,
            state,
            children: BTreeMap::new(),
        }
    }

    pub fn child(&self, child_type: &str, id: &str) -> Option<&Value> {
        self.children.get(child_type).and_then(|c| c.get(id))
    }

    pub fn put_child(&mut self, child_type: &str, id: &str, state: Value) {
        self.children
            .entry(child_type.to_string())
            .or_default()
            .insert(id.to_string(), state);
    }

    pub fn child_count(&self, child_type: &str) -> usize {
        self.children.get(child_type).map_or(0, BTreeMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_children_live_inside_root_record() {
        let mut record = EntityRecord::new("order", "o-1", json!({"order_id": "o-1"}));
        assert_eq!(record.version, 0);
        assert!(record.child("order_line", "l-1").is_none());

        record.put_child("order_line", "l-1", json!({"line_id": "l-1", "quantity": 2}));
        record.put_child("order_line", "l-2", json!({"line_id": "l-2", "quantity": 1}));

        assert_eq!(record.child_count("order_line"), 2);
        assert_eq!(record.child("order_line", "l-1").unwrap()["quantity"], 2);
    }
}
