use std::cmp::Ordering;

use serde_json::Value;

use super::node::Node;
use super::path::parse_path;
use super::{SdkException, SdkResult};

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub(crate) enum QueryIndex {
    #[default]
    Priority,
    Key,
    Value,
    Child(Vec<String>),
}

/// Ordering, bounds and limit accumulated by the query builder calls.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct QueryParams {
    pub(crate) index: QueryIndex,
    pub(crate) start: Option<QueryBound>,
    pub(crate) end: Option<QueryBound>,
    pub(crate) limit: Option<QueryLimit>,
    pub(crate) order_by_called: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct QueryBound {
    pub(crate) value: Value,
    pub(crate) name: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum QueryLimit {
    First(u32),
    Last(u32),
}

impl QueryParams {
    pub(crate) fn set_index(&mut self, index: QueryIndex) -> SdkResult<()> {
        if self.order_by_called {
            return Err(SdkException::new("orderBy has already been specified"));
        }
        if self.start.is_some() || self.end.is_some() || self.limit.is_some() {
            return Err(SdkException::new(
                "orderBy must be called before startAt, endAt, equalTo or limit",
            ));
        }
        self.index = index;
        self.order_by_called = true;
        Ok(())
    }

    pub(crate) fn set_start(&mut self, bound: QueryBound) -> SdkResult<()> {
        if self.start.is_some() {
            return Err(SdkException::new(
                "startAt/equalTo has already been specified",
            ));
        }
        self.validate_bound(&bound)?;
        self.start = Some(bound);
        Ok(())
    }

    pub(crate) fn set_end(&mut self, bound: QueryBound) -> SdkResult<()> {
        if self.end.is_some() {
            return Err(SdkException::new("endAt/equalTo has already been specified"));
        }
        self.validate_bound(&bound)?;
        self.end = Some(bound);
        Ok(())
    }

    pub(crate) fn set_equal(&mut self, bound: QueryBound) -> SdkResult<()> {
        if self.start.is_some() || self.end.is_some() {
            return Err(SdkException::new(
                "equalTo cannot be combined with startAt or endAt",
            ));
        }
        self.set_start(bound.clone())?;
        self.set_end(bound)
    }

    /// Copy of these params with one more builder step applied.
    pub(crate) fn refine<F>(&self, step: F) -> SdkResult<QueryParams>
    where
        F: FnOnce(&mut QueryParams) -> SdkResult<()>,
    {
        let mut next = self.clone();
        step(&mut next)?;
        Ok(next)
    }

    pub(crate) fn set_limit(&mut self, limit: QueryLimit) -> SdkResult<()> {
        if self.limit.is_some() {
            return Err(SdkException::new("limit has already been specified"));
        }
        if matches!(limit, QueryLimit::First(0) | QueryLimit::Last(0)) {
            return Err(SdkException::new("limit must be a positive integer"));
        }
        self.limit = Some(limit);
        Ok(())
    }

    fn validate_bound(&self, bound: &QueryBound) -> SdkResult<()> {
        match (&self.index, &bound.value) {
            (_, Value::Array(_) | Value::Object(_)) => Err(SdkException::new(
                "Query bounds must be null, a boolean, a number or a string",
            )),
            (QueryIndex::Key, Value::String(_)) if bound.name.is_none() => Ok(()),
            (QueryIndex::Key, _) => Err(SdkException::new(
                "When ordering by key, bounds must be a single string",
            )),
            (QueryIndex::Priority, Value::Bool(_)) => Err(SdkException::new(
                "When ordering by priority, bounds must be null, a number or a string",
            )),
            _ => Ok(()),
        }
    }

    pub(crate) fn is_default(&self) -> bool {
        !self.order_by_called
            && matches!(self.index, QueryIndex::Priority)
            && self.start.is_none()
            && self.end.is_none()
            && self.limit.is_none()
    }

    pub(crate) fn to_rest_params(&self) -> SdkResult<Vec<(String, String)>> {
        let mut params = Vec::new();

        if self.is_default() {
            return Ok(params);
        }

        let order_by = match &self.index {
            QueryIndex::Priority => "$priority".to_string(),
            QueryIndex::Key => "$key".to_string(),
            QueryIndex::Value => "$value".to_string(),
            QueryIndex::Child(path) => path.join("/"),
        };
        params.push(("orderBy".to_string(), encode_json(&Value::String(order_by))?));

        if let Some(bound) = &self.start {
            params.push(("startAt".to_string(), encode_bound(bound)?));
        }

        if let Some(bound) = &self.end {
            params.push(("endAt".to_string(), encode_bound(bound)?));
        }

        if let Some(limit) = &self.limit {
            match limit {
                QueryLimit::First(count) => {
                    params.push(("limitToFirst".to_string(), count.to_string()));
                }
                QueryLimit::Last(count) => {
                    params.push(("limitToLast".to_string(), count.to_string()));
                }
            }
        }

        Ok(params)
    }

    /// Every child of `node` sorted by this query's index, ties broken by key.
    pub(crate) fn ordered_children(&self, node: &Node) -> Vec<(String, Node)> {
        let mut entries: Vec<(String, Node)> = node
            .children()
            .map(|(key, child)| (key.clone(), child.clone()))
            .collect();
        entries.sort_by(|(left_key, left), (right_key, right)| {
            self.compare_entries(left_key, left, right_key, right)
        });
        entries
    }

    /// The children of `node` this query selects, in query order.
    pub(crate) fn select(&self, node: &Node) -> Vec<(String, Node)> {
        let mut entries: Vec<(String, Node)> = self
            .ordered_children(node)
            .into_iter()
            .filter(|(key, child)| self.within_bounds(key, child))
            .collect();
        match self.limit {
            Some(QueryLimit::First(count)) => entries.truncate(count as usize),
            Some(QueryLimit::Last(count)) => {
                let skip = entries.len().saturating_sub(count as usize);
                entries.drain(..skip);
            }
            None => {}
        }
        entries
    }

    /// The view of `node` a listener on this query observes.
    pub(crate) fn view(&self, node: &Node) -> Node {
        if self.is_default() {
            return node.clone();
        }
        Node::from_entries(self.select(node), node.priority().clone())
    }

    fn index_value(&self, key: &str, node: &Node) -> Value {
        match &self.index {
            QueryIndex::Priority => node.priority().clone(),
            QueryIndex::Key => Value::String(key.to_string()),
            QueryIndex::Value => sort_value(node),
            QueryIndex::Child(path) => node.get(path).map(sort_value).unwrap_or(Value::Null),
        }
    }

    fn compare_entries(&self, left_key: &str, left: &Node, right_key: &str, right: &Node) -> Ordering {
        if self.index == QueryIndex::Key {
            return compare_keys(left_key, right_key);
        }
        compare_values(
            &self.index_value(left_key, left),
            &self.index_value(right_key, right),
        )
        .then_with(|| compare_keys(left_key, right_key))
    }

    fn within_bounds(&self, key: &str, node: &Node) -> bool {
        let value = self.index_value(key, node);
        let key_index = self.index == QueryIndex::Key;
        let after_start = self.start.as_ref().map_or(true, |bound| {
            match compare_bound(&value, bound, key_index) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => bound
                    .name
                    .as_deref()
                    .map_or(true, |name| compare_keys(key, name) != Ordering::Less),
            }
        });
        let before_end = self.end.as_ref().map_or(true, |bound| {
            match compare_bound(&value, bound, key_index) {
                Ordering::Less => true,
                Ordering::Greater => false,
                Ordering::Equal => bound
                    .name
                    .as_deref()
                    .map_or(true, |name| compare_keys(key, name) != Ordering::Greater),
            }
        });
        after_start && before_end
    }
}

pub(crate) fn child_index(path: &str) -> SdkResult<QueryIndex> {
    match path {
        "" => Err(SdkException::new("order_by_child requires a non-empty path")),
        "$key" => Err(SdkException::new(
            "order_by_child(\"$key\") is invalid; call order_by_key() instead",
        )),
        "$priority" => Err(SdkException::new(
            "order_by_child(\"$priority\") is invalid; call order_by_priority() instead",
        )),
        "$value" => Err(SdkException::new(
            "order_by_child(\"$value\") is invalid; call order_by_value() instead",
        )),
        _ => {
            let segments = parse_path(path)?;
            if segments.is_empty() {
                return Err(SdkException::new("order_by_child requires a non-empty path"));
            }
            Ok(QueryIndex::Child(segments))
        }
    }
}

fn compare_bound(value: &Value, bound: &QueryBound, key_index: bool) -> Ordering {
    if key_index {
        if let (Value::String(key), Value::String(bound)) = (value, &bound.value) {
            return compare_keys(key, bound);
        }
    }
    compare_values(value, &bound.value)
}

/// Objects sort after every primitive; their content is not compared.
fn sort_value(node: &Node) -> Value {
    match node.leaf_value() {
        Some(value) => value.clone(),
        None if node.is_empty() => Value::Null,
        None => Value::Object(Default::default()),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) | Value::Object(_) => 5,
    }
}

/// Realtime Database value order: null, false, true, numbers, strings, objects.
pub(crate) fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or(0.0);
            let b = b.as_f64().unwrap_or(0.0);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => type_rank(left).cmp(&type_rank(right)),
    }
}

/// Key order: 32-bit integer keys numerically first, then every other key lexicographically.
pub(crate) fn compare_keys(left: &str, right: &str) -> Ordering {
    match (int_key(left), int_key(right)) {
        (Some(a), Some(b)) => a.cmp(&b).then_with(|| left.len().cmp(&right.len())),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => left.cmp(right),
    }
}

fn int_key(key: &str) -> Option<i32> {
    let digits = key.strip_prefix('-').unwrap_or(key);
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    key.parse::<i32>().ok()
}

fn encode_json(value: &Value) -> SdkResult<String> {
    serde_json::to_string(value)
        .map_err(|err| SdkException::new(format!("Failed to encode query parameter: {err}")))
}

fn encode_bound(bound: &QueryBound) -> SdkResult<String> {
    let mut encoded = encode_json(&bound.value)?;
    if let Some(name) = &bound.name {
        encoded.push(',');
        encoded.push_str(&encode_json(&Value::String(name.clone()))?);
    }
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(entries: &[(String, Node)]) -> Vec<&str> {
        entries.iter().map(|(key, _)| key.as_str()).collect()
    }

    fn bound(value: Value) -> QueryBound {
        QueryBound { value, name: None }
    }

    #[test]
    fn default_order_is_priority_then_key() {
        let node = Node::from_json(&json!({
            "b": 1,
            "a": 2,
            "c": { ".value": 3, ".priority": 1 },
            "d": { ".value": 4, ".priority": "x" }
        }))
        .unwrap();
        let params = QueryParams::default();
        assert_eq!(keys(&params.ordered_children(&node)), ["a", "b", "c", "d"]);
    }

    #[test]
    fn key_order_puts_integers_first() {
        let mut sorted = vec!["b", "10", "2", "-1", "a", "02"];
        sorted.sort_by(|a, b| compare_keys(a, b));
        assert_eq!(sorted, ["-1", "2", "10", "02", "a", "b"]);
    }

    #[test]
    fn value_order_follows_type_ranks() {
        let node = Node::from_json(&json!({
            "obj": { "x": 1 },
            "str": "s",
            "num": 5,
            "yes": true,
            "no": false
        }))
        .unwrap();
        let mut params = QueryParams::default();
        params.set_index(QueryIndex::Value).unwrap();
        assert_eq!(
            keys(&params.ordered_children(&node)),
            ["no", "yes", "num", "str", "obj"]
        );
    }

    #[test]
    fn child_index_with_bounds_and_limit() {
        let node = Node::from_json(&json!({
            "a": { "score": 10 },
            "b": { "score": 30 },
            "c": { "score": 20 },
            "d": { "score": 40 },
            "e": { "name": "no score" }
        }))
        .unwrap();
        let mut params = QueryParams::default();
        params
            .set_index(QueryIndex::Child(vec!["score".to_string()]))
            .unwrap();
        params.set_start(bound(json!(15))).unwrap();
        params.set_limit(QueryLimit::Last(2)).unwrap();
        assert_eq!(keys(&params.select(&node)), ["b", "d"]);

        let view = params.view(&node);
        assert_eq!(view.val(), json!({ "b": { "score": 30 }, "d": { "score": 40 } }));
    }

    #[test]
    fn priority_bounds_use_key_tie_break() {
        let node = Node::from_json(&json!({
            "a": { ".value": 1, ".priority": 5 },
            "b": { ".value": 2, ".priority": 5 },
            "c": { ".value": 3, ".priority": 5 }
        }))
        .unwrap();
        let mut params = QueryParams::default();
        params.set_index(QueryIndex::Priority).unwrap();
        params
            .set_start(QueryBound {
                value: json!(5),
                name: Some("b".to_string()),
            })
            .unwrap();
        assert_eq!(keys(&params.select(&node)), ["b", "c"]);

        let mut plain = QueryParams::default();
        plain.set_index(QueryIndex::Priority).unwrap();
        plain.set_start(bound(json!(5))).unwrap();
        assert_eq!(keys(&plain.select(&node)), ["a", "b", "c"]);
    }

    #[test]
    fn builder_misuse_is_rejected() {
        let mut params = QueryParams::default();
        params.set_index(QueryIndex::Key).unwrap();
        assert!(params.set_index(QueryIndex::Value).is_err());
        assert!(params.set_start(bound(json!(1))).is_err());
        assert!(params.set_limit(QueryLimit::First(0)).is_err());
        params.set_limit(QueryLimit::First(1)).unwrap();
        assert!(params.set_limit(QueryLimit::Last(1)).is_err());
    }

    #[test]
    fn rest_params_encode_json_values() {
        let mut params = QueryParams::default();
        params
            .set_index(QueryIndex::Child(vec!["score".to_string()]))
            .unwrap();
        params.set_start(bound(json!(100))).unwrap();
        params
            .set_end(QueryBound {
                value: json!("z"),
                name: Some("k".to_string()),
            })
            .unwrap();
        params.set_limit(QueryLimit::First(5)).unwrap();
        assert_eq!(
            params.to_rest_params().unwrap(),
            vec![
                ("orderBy".to_string(), "\"score\"".to_string()),
                ("startAt".to_string(), "100".to_string()),
                ("endAt".to_string(), "\"z\",\"k\"".to_string()),
                ("limitToFirst".to_string(), "5".to_string()),
            ]
        );
        assert!(QueryParams::default().to_rest_params().unwrap().is_empty());
    }
}
