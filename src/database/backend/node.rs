use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::params::QueryParams;
use super::path::validate_key;
use super::{BackendRef, BackendSnapshot, SdkException, SdkResult, SnapshotHandle};

/// A node of the stored tree together with its priority.
///
/// Invariants: an empty node never carries a priority and a `Children` map is never empty;
/// both are restored by [`Node::set`] after every write.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Node {
    priority: Value,
    content: Content,
}

#[derive(Clone, Debug, Default, PartialEq)]
enum Content {
    #[default]
    Empty,
    Leaf(Value),
    Children(BTreeMap<String, Node>),
}

impl Node {
    /// Builds a node from plain JSON or the export format carrying `.value` / `.priority`.
    pub(crate) fn from_json(value: &Value) -> SdkResult<Node> {
        let node = match value {
            Value::Null => Node::default(),
            Value::Bool(_) | Value::Number(_) | Value::String(_) => Node {
                priority: Value::Null,
                content: Content::Leaf(value.clone()),
            },
            Value::Array(items) => {
                let mut children = BTreeMap::new();
                for (index, item) in items.iter().enumerate() {
                    let child = Node::from_json(item)?;
                    if !child.is_empty() {
                        children.insert(index.to_string(), child);
                    }
                }
                Node::from_children(children)
            }
            Value::Object(map) => {
                let priority = map.get(".priority").cloned().unwrap_or(Value::Null);
                validate_priority(&priority)?;
                let mut node = match map.get(".value") {
                    Some(inner) => {
                        if let Some(extra) = map
                            .keys()
                            .find(|key| *key != ".value" && *key != ".priority")
                        {
                            return Err(SdkException::new(format!(
                                "\".value\" cannot be combined with child \"{extra}\""
                            )));
                        }
                        if inner.is_object() || inner.is_array() {
                            return Err(SdkException::new(
                                "\".value\" must hold a primitive value",
                            ));
                        }
                        Node::from_json(inner)?
                    }
                    None => {
                        let mut children = BTreeMap::new();
                        for (key, child) in map.iter().filter(|(key, _)| *key != ".priority") {
                            validate_key(key)?;
                            let child = Node::from_json(child)?;
                            if !child.is_empty() {
                                children.insert(key.clone(), child);
                            }
                        }
                        Node::from_children(children)
                    }
                };
                node.set_own_priority(priority);
                node
            }
        };
        Ok(node)
    }

    fn from_children(children: BTreeMap<String, Node>) -> Node {
        if children.is_empty() {
            Node::default()
        } else {
            Node {
                priority: Value::Null,
                content: Content::Children(children),
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        matches!(self.content, Content::Empty)
    }

    pub(crate) fn priority(&self) -> &Value {
        &self.priority
    }

    pub(crate) fn leaf_value(&self) -> Option<&Value> {
        match &self.content {
            Content::Leaf(value) => Some(value),
            _ => None,
        }
    }

    /// Plain JSON value; `Value::Null` when the node is empty.
    pub(crate) fn val(&self) -> Value {
        match &self.content {
            Content::Empty => Value::Null,
            Content::Leaf(value) => value.clone(),
            Content::Children(children) => Value::Object(
                children
                    .iter()
                    .map(|(key, child)| (key.clone(), child.val()))
                    .collect(),
            ),
        }
    }

    pub(crate) fn export(&self) -> Value {
        match &self.content {
            Content::Empty => Value::Null,
            Content::Leaf(value) if self.priority.is_null() => value.clone(),
            Content::Leaf(value) => {
                let mut map = Map::with_capacity(2);
                map.insert(".value".to_string(), value.clone());
                map.insert(".priority".to_string(), self.priority.clone());
                Value::Object(map)
            }
            Content::Children(children) => {
                let mut map: Map<String, Value> = children
                    .iter()
                    .map(|(key, child)| (key.clone(), child.export()))
                    .collect();
                if !self.priority.is_null() {
                    map.insert(".priority".to_string(), self.priority.clone());
                }
                Value::Object(map)
            }
        }
    }

    pub(crate) fn child(&self, key: &str) -> Option<&Node> {
        match &self.content {
            Content::Children(children) => children.get(key),
            _ => None,
        }
    }

    pub(crate) fn children(&self) -> impl Iterator<Item = (&String, &Node)> {
        let map = match &self.content {
            Content::Children(children) => Some(children),
            _ => None,
        };
        map.into_iter().flat_map(|children| children.iter())
    }

    pub(crate) fn get(&self, path: &[String]) -> Option<&Node> {
        let mut current = self;
        for segment in path {
            current = current.child(segment)?;
        }
        Some(current)
    }

    /// The node at `path`, or an empty node when nothing is stored there.
    pub(crate) fn get_or_empty(&self, path: &[String]) -> Node {
        self.get(path).cloned().unwrap_or_default()
    }

    /// Replaces the node at `path`, creating intermediate nodes and pruning emptied ones.
    pub(crate) fn set(&mut self, path: &[String], node: Node) {
        let Some((first, rest)) = path.split_first() else {
            *self = node;
            return;
        };

        let mut children = match std::mem::take(&mut self.content) {
            Content::Children(children) => children,
            _ => BTreeMap::new(),
        };
        let mut child = children.remove(first).unwrap_or_default();
        child.set(rest, node);
        if !child.is_empty() {
            children.insert(first.clone(), child);
        }
        if children.is_empty() {
            self.content = Content::Empty;
            self.priority = Value::Null;
        } else {
            self.content = Content::Children(children);
        }
    }

    /// Sets the priority of an existing node; returns `false` when nothing is stored there.
    pub(crate) fn set_priority(&mut self, path: &[String], priority: Value) -> bool {
        let Some((first, rest)) = path.split_first() else {
            if self.is_empty() {
                return false;
            }
            self.priority = priority;
            return true;
        };
        match &mut self.content {
            Content::Children(children) => children
                .get_mut(first)
                .is_some_and(|child| child.set_priority(rest, priority)),
            _ => false,
        }
    }

    pub(crate) fn with_priority(mut self, priority: Value) -> Node {
        self.set_own_priority(priority);
        self
    }

    /// Rebuilds a node from already ordered children, keeping `priority`.
    pub(crate) fn from_entries(entries: Vec<(String, Node)>, priority: Value) -> Node {
        Node::from_children(entries.into_iter().collect()).with_priority(priority)
    }

    fn set_own_priority(&mut self, priority: Value) {
        if !self.is_empty() {
            self.priority = priority;
        }
    }
}

pub(crate) fn validate_priority(priority: &Value) -> SdkResult<()> {
    match priority {
        Value::Null | Value::Number(_) | Value::String(_) => Ok(()),
        _ => Err(SdkException::new(
            "Priority must be a string, number, or null",
        )),
    }
}

/// Turns a node path back into a live reference of the backend that owns the tree.
pub(crate) trait Locator: Send + Sync + fmt::Debug {
    fn locate(&self, path: &[String]) -> BackendRef;
}

/// Snapshot of a [`Node`]; child iteration follows the query that produced it.
#[derive(Clone)]
pub(crate) struct TreeSnapshot {
    locator: Arc<dyn Locator>,
    path: Vec<String>,
    node: Node,
    params: QueryParams,
}

impl TreeSnapshot {
    pub(crate) fn new(
        locator: Arc<dyn Locator>,
        path: Vec<String>,
        node: Node,
        params: QueryParams,
    ) -> Self {
        Self {
            locator,
            path,
            node,
            params,
        }
    }

    pub(crate) fn into_handle(self) -> BackendSnapshot {
        Arc::new(self)
    }
}

impl fmt::Debug for TreeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeSnapshot")
            .field("path", &self.path)
            .field("value", &self.node.export())
            .finish()
    }
}

impl SnapshotHandle for TreeSnapshot {
    fn key(&self) -> Option<String> {
        self.path.last().cloned()
    }

    fn val(&self) -> Option<Value> {
        if self.node.is_empty() {
            None
        } else {
            Some(self.node.val())
        }
    }

    fn export_val(&self) -> Value {
        self.node.export()
    }

    fn priority(&self) -> Value {
        self.node.priority().clone()
    }

    fn reference(&self) -> BackendRef {
        self.locator.locate(&self.path)
    }

    fn children(&self) -> Vec<BackendSnapshot> {
        self.params
            .ordered_children(&self.node)
            .into_iter()
            .map(|(key, child)| {
                let mut path = self.path.clone();
                path.push(key);
                TreeSnapshot::new(self.locator.clone(), path, child, QueryParams::default())
                    .into_handle()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn export_round_trips_priorities() {
        let exported = json!({
            "a": { ".value": 1, ".priority": 5 },
            "b": { "c": true, ".priority": "x" },
            ".priority": 1.5
        });
        let node = Node::from_json(&exported).unwrap();
        assert_eq!(node.export(), exported);
        assert_eq!(node.val(), json!({ "a": 1, "b": { "c": true } }));
        assert_eq!(node.priority(), &json!(1.5));
    }

    #[test]
    fn nulls_and_empty_objects_are_pruned() {
        let node = Node::from_json(&json!({ "a": null, "b": {}, "c": [null, 2] })).unwrap();
        assert_eq!(node.val(), json!({ "c": { "1": 2 } }));
    }

    #[test]
    fn set_creates_and_prunes_paths() {
        let mut root = Node::default();
        root.set(&path(&["a", "b"]), Node::from_json(&json!(1)).unwrap());
        assert_eq!(root.val(), json!({ "a": { "b": 1 } }));

        root.set(&path(&["a", "b"]), Node::default());
        assert!(root.is_empty());
    }

    #[test]
    fn set_priority_requires_existing_node() {
        let mut root = Node::from_json(&json!({ "a": 1 })).unwrap();
        assert!(root.set_priority(&path(&["a"]), json!(3)));
        assert!(!root.set_priority(&path(&["missing"]), json!(3)));
        assert_eq!(root.get(&path(&["a"])).unwrap().priority(), &json!(3));
    }

    #[test]
    fn rejects_invalid_payloads() {
        assert!(Node::from_json(&json!({ "a.b": 1 })).is_err());
        assert!(Node::from_json(&json!({ ".value": 1, "x": 2 })).is_err());
        assert!(Node::from_json(&json!({ "a": 1, ".priority": {} })).is_err());
    }
}
