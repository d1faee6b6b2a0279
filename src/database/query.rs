//! Ordering, range and limit constraints compiled onto backend query handles.

use std::sync::LazyLock;

use serde_json::Value;

use crate::database::backend::{BackendQuery, BackendRef, SdkResult};
use crate::database::error::{bad_query, DatabaseError, DatabaseResult};
use crate::database::snapshot::Priority;
use crate::logger::Logger;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@firebase/database-query"));

/// Which children a read or subscription sees, and in what order.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum QuerySpec {
    /// Every child, in the store's default (priority, then key) order.
    #[default]
    Unordered,
    Ordered { order: OrderBy, limit: Limit },
}

#[derive(Clone, Debug, PartialEq)]
pub enum OrderBy {
    /// Orders by the value at a relative path inside each child.
    Child(String, Range<Value>),
    Value(Range<Value>),
    Key(Range<String>),
    Priority(Range<PriorityPoint>),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum Range<T> {
    #[default]
    Unbounded,
    StartAt(T),
    EndAt(T),
    /// Inclusive on both ends.
    Between(T, T),
    EqualTo(T),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Limit {
    #[default]
    Unlimited,
    First(u32),
    Last(u32),
}

/// Range point for priority ordering; `key` breaks ties between equal priorities.
#[derive(Clone, Debug, PartialEq)]
pub struct PriorityPoint {
    pub priority: Priority,
    pub key: Option<String>,
}

impl PriorityPoint {
    pub fn new(priority: impl Into<Priority>) -> Self {
        Self {
            priority: priority.into(),
            key: None,
        }
    }

    pub fn none() -> Self {
        Self {
            priority: Priority::None,
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// An ordered query still open to a limit.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderedQuery {
    order: OrderBy,
    limit: Limit,
}

impl OrderedQuery {
    pub fn limit_to_first(self, count: u32) -> QuerySpec {
        QuerySpec::Ordered {
            order: self.order,
            limit: Limit::First(count),
        }
    }

    pub fn limit_to_last(self, count: u32) -> QuerySpec {
        QuerySpec::Ordered {
            order: self.order,
            limit: Limit::Last(count),
        }
    }
}

impl From<OrderedQuery> for QuerySpec {
    fn from(query: OrderedQuery) -> Self {
        QuerySpec::Ordered {
            order: query.order,
            limit: query.limit,
        }
    }
}

impl From<&QuerySpec> for QuerySpec {
    fn from(spec: &QuerySpec) -> Self {
        spec.clone()
    }
}

impl QuerySpec {
    pub fn unordered() -> Self {
        QuerySpec::Unordered
    }

    pub fn order_by_child(path: impl Into<String>, range: Range<Value>) -> OrderedQuery {
        Self::ordered(OrderBy::Child(path.into(), range))
    }

    pub fn order_by_value(range: Range<Value>) -> OrderedQuery {
        Self::ordered(OrderBy::Value(range))
    }

    pub fn order_by_key(range: Range<String>) -> OrderedQuery {
        Self::ordered(OrderBy::Key(range))
    }

    pub fn order_by_priority(range: Range<PriorityPoint>) -> OrderedQuery {
        Self::ordered(OrderBy::Priority(range))
    }

    fn ordered(order: OrderBy) -> OrderedQuery {
        OrderedQuery {
            order,
            limit: Limit::Unlimited,
        }
    }
}

type Point = (Value, Option<String>);

impl<T> Range<T> {
    fn points<F>(&self, point: F) -> DatabaseResult<Range<Point>>
    where
        F: Fn(&T) -> DatabaseResult<Point>,
    {
        Ok(match self {
            Range::Unbounded => Range::Unbounded,
            Range::StartAt(at) => Range::StartAt(point(at)?),
            Range::EndAt(at) => Range::EndAt(point(at)?),
            Range::Between(start, end) => Range::Between(point(start)?, point(end)?),
            Range::EqualTo(at) => Range::EqualTo(point(at)?),
        })
    }
}

fn scalar_point(value: &Value) -> DatabaseResult<Point> {
    if value.is_object() || value.is_array() {
        return Err(invariant(format!(
            "Range points must be scalars, got {value}"
        )));
    }
    Ok((value.clone(), None))
}

fn key_point(key: &String) -> DatabaseResult<Point> {
    Ok((Value::String(key.clone()), None))
}

fn priority_point(point: &PriorityPoint) -> DatabaseResult<Point> {
    Ok((point.priority.to_value(), point.key.clone()))
}

fn invariant(message: String) -> DatabaseError {
    LOGGER.error(format!("query compilation failed: {message}"));
    bad_query(message)
}

/// Applies ordering, then range, then limit to the unfiltered query of `reference`.
///
/// A point without a tie-break key issues the single-argument range call; with a key, the
/// two-argument call.
pub fn compile(spec: &QuerySpec, reference: &BackendRef) -> DatabaseResult<BackendQuery> {
    refine(spec, reference.as_query())
}

fn refine(spec: &QuerySpec, query: BackendQuery) -> DatabaseResult<BackendQuery> {
    let QuerySpec::Ordered { order, limit } = spec else {
        return Ok(query);
    };

    let (ordered, range) = match order {
        OrderBy::Child(path, range) => (query.order_by_child(path), range.points(scalar_point)?),
        OrderBy::Value(range) => (query.order_by_value(), range.points(scalar_point)?),
        OrderBy::Key(range) => (query.order_by_key(), range.points(key_point)?),
        OrderBy::Priority(range) => (query.order_by_priority(), range.points(priority_point)?),
    };

    let compiled = ordered
        .and_then(|query| apply_range(query, range))
        .and_then(|query| apply_limit(query, *limit));
    compiled.map_err(|err| invariant(err.message().to_string()))
}

fn apply_range(query: BackendQuery, range: Range<Point>) -> SdkResult<BackendQuery> {
    match range {
        Range::Unbounded => Ok(query),
        Range::StartAt((value, key)) => query.start_at(value, key.as_deref()),
        Range::EndAt((value, key)) => query.end_at(value, key.as_deref()),
        Range::Between((start, start_key), (end, end_key)) => query
            .start_at(start, start_key.as_deref())?
            .end_at(end, end_key.as_deref()),
        Range::EqualTo((value, key)) => query.equal_to(value, key.as_deref()),
    }
}

fn apply_limit(query: BackendQuery, limit: Limit) -> SdkResult<BackendQuery> {
    match limit {
        Limit::Unlimited => Ok(query),
        Limit::First(count) => query.limit_to_first(count),
        Limit::Last(count) => query.limit_to_last(count),
    }
}
