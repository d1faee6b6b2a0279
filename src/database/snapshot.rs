use serde_json::Value;

use crate::database::backend::BackendSnapshot;
use crate::database::location::Reference;

/// Id carried by snapshots produced while iterating another snapshot's children.
pub const CHILD_SNAPSHOT_ID: &str = "_child_";

/// Secondary sort key attached to a node.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Priority {
    #[default]
    None,
    Number(f64),
    String(String),
}

impl Priority {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(number) => number.as_f64().map_or(Priority::None, Priority::Number),
            Value::String(text) => Priority::String(text.clone()),
            _ => Priority::None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Priority::None => Value::Null,
            Priority::Number(number) => serde_json::Number::from_f64(*number)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Priority::String(text) => Value::String(text.clone()),
        }
    }
}

impl From<f64> for Priority {
    fn from(value: f64) -> Self {
        Priority::Number(value)
    }
}

impl From<&str> for Priority {
    fn from(value: &str) -> Self {
        Priority::String(value.to_string())
    }
}

impl From<String> for Priority {
    fn from(value: String) -> Self {
        Priority::String(value)
    }
}

/// Immutable view of a node at the moment an event fired or a read completed.
#[derive(Clone, Debug)]
pub struct Snapshot {
    id: String,
    key: String,
    value: Option<Value>,
    priority: Priority,
    reference: Reference,
    prev_key: String,
    origin: BackendSnapshot,
}

/// Normalizes a backend snapshot.
///
/// `id` names the subscription or one-shot read that produced it. `prev_key` is the key of
/// the preceding sibling for child events; `None` becomes the empty string.
pub fn adapt(id: &str, snapshot: BackendSnapshot, prev_key: Option<String>) -> Snapshot {
    Snapshot {
        id: id.to_string(),
        key: snapshot.key().unwrap_or_default(),
        value: snapshot.val(),
        priority: Priority::from_value(&snapshot.priority()),
        reference: Reference::new(snapshot.reference()),
        prev_key: prev_key.unwrap_or_default(),
        origin: snapshot,
    }
}

impl Snapshot {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Key of the node; empty for the root.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// `None` when the node does not exist.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    pub fn priority(&self) -> &Priority {
        &self.priority
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// Key of the previous sibling, empty when there is none.
    pub fn prev_key(&self) -> &str {
        &self.prev_key
    }

    /// Value including `.priority` / `.value` metadata.
    pub fn export_value(&self) -> Value {
        self.origin.export_val()
    }

    /// Children in query order, each carrying the key of the child before it.
    pub fn to_snapshot_list(&self) -> Vec<Snapshot> {
        let mut previous: Option<String> = None;
        self.origin
            .children()
            .into_iter()
            .map(|child| {
                let snapshot = adapt(CHILD_SNAPSHOT_ID, child, previous.take());
                previous = Some(snapshot.key.clone());
                snapshot
            })
            .collect()
    }

    pub fn to_value_list(&self) -> Vec<Value> {
        self.origin
            .children()
            .into_iter()
            .map(|child| child.val().unwrap_or(Value::Null))
            .collect()
    }

    pub fn to_key_list(&self) -> Vec<String> {
        self.origin
            .children()
            .into_iter()
            .map(|child| child.key().unwrap_or_default())
            .collect()
    }

    pub fn to_pair_list(&self) -> Vec<(String, Value)> {
        self.origin
            .children()
            .into_iter()
            .map(|child| {
                (
                    child.key().unwrap_or_default(),
                    child.val().unwrap_or(Value::Null),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::backend::node::{Node, TreeSnapshot};
    use crate::database::backend::params::QueryParams;
    use crate::database::backend::InMemoryBackend;
    use serde_json::json;
    use std::sync::Arc;

    fn backend_snapshot(path: &[&str], export: Value) -> BackendSnapshot {
        TreeSnapshot::new(
            Arc::new(InMemoryBackend::new()),
            path.iter().map(|s| s.to_string()).collect(),
            Node::from_json(&export).unwrap(),
            QueryParams::default(),
        )
        .into_handle()
    }

    #[test]
    fn root_snapshot_uses_empty_key_and_prev_key() {
        let snapshot = adapt("q1", backend_snapshot(&[], json!({ "a": 1 })), None);
        assert_eq!(snapshot.id(), "q1");
        assert_eq!(snapshot.key(), "");
        assert_eq!(snapshot.prev_key(), "");
        assert_eq!(snapshot.value(), Some(&json!({ "a": 1 })));
        assert_eq!(snapshot.reference().to_url(), "memory://default/");
    }

    #[test]
    fn missing_node_has_no_value() {
        let snapshot = adapt("q2", backend_snapshot(&["gone"], Value::Null), Some("x".into()));
        assert!(!snapshot.exists());
        assert_eq!(snapshot.key(), "gone");
        assert_eq!(snapshot.prev_key(), "x");
        assert_eq!(snapshot.priority(), &Priority::None);
    }

    #[test]
    fn priorities_are_normalized() {
        let numeric = adapt(
            "q3",
            backend_snapshot(&["n"], json!({ ".value": 1, ".priority": 2.5 })),
            None,
        );
        assert_eq!(numeric.priority(), &Priority::Number(2.5));
        assert_eq!(
            numeric.export_value(),
            json!({ ".value": 1, ".priority": 2.5 })
        );

        let text = adapt(
            "q3",
            backend_snapshot(&["s"], json!({ "x": true, ".priority": "high" })),
            None,
        );
        assert_eq!(text.priority(), &Priority::from("high"));
        assert_eq!(text.priority().to_value(), json!("high"));
    }

    #[test]
    fn child_projections_follow_query_order() {
        let snapshot = adapt(
            "q4",
            backend_snapshot(
                &["scores"],
                json!({
                    "c": { ".value": 3, ".priority": 1 },
                    "a": 1,
                    "b": { ".value": 2, ".priority": 1 },
                }),
            ),
            None,
        );

        assert_eq!(snapshot.to_key_list(), ["a", "b", "c"]);
        assert_eq!(snapshot.to_value_list(), [json!(1), json!(2), json!(3)]);
        assert_eq!(
            snapshot.to_pair_list(),
            [
                ("a".to_string(), json!(1)),
                ("b".to_string(), json!(2)),
                ("c".to_string(), json!(3)),
            ]
        );

        let children = snapshot.to_snapshot_list();
        let prev: Vec<_> = children.iter().map(|child| child.prev_key()).collect();
        assert_eq!(prev, ["", "a", "b"]);
        assert!(children.iter().all(|child| child.id() == CHILD_SNAPSHOT_ID));
        assert_eq!(
            children[2].reference().to_url(),
            "memory://default/scores/c"
        );
    }
}
