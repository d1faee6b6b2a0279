//! Boundary of the realtime store SDK.
//!
//! The client layer only talks to the store through these handle traits. Initiating calls
//! either fail synchronously with an [`SdkException`] or accept their arguments and report
//! the outcome later through a completion callback carrying an optional [`BackendError`].
//! Event callbacks may fire any number of times until the listener is removed with
//! [`QueryHandle::off`] or cancelled by the backend.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

pub mod memory;
pub(crate) mod node;
pub(crate) mod params;
pub(crate) mod path;
pub mod rest;

pub use memory::InMemoryBackend;
pub use rest::RestBackend;

pub type BackendRef = Arc<dyn RefHandle>;
pub type BackendQuery = Arc<dyn QueryHandle>;
pub type BackendSnapshot = Arc<dyn SnapshotHandle>;
pub type BackendDisconnect = Arc<dyn DisconnectHandle>;

pub type SdkResult<T> = Result<T, SdkException>;

/// Backend error codes the client layer knows about.
pub mod codes {
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const UNAVAILABLE: &str = "UNAVAILABLE";
    pub const TOO_BIG: &str = "TOO_BIG";
    pub const MAX_RETRY: &str = "maxretry";
}

/// Failure raised while *initiating* a backend call, before any work was queued.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SdkException {
    message: String,
}

impl SdkException {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SdkException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.message)
    }
}

impl std::error::Error for SdkException {}

/// Error reported asynchronously by the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendError {
    code: String,
    message: String,
}

impl BackendError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for BackendError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    Value,
    ChildAdded,
    ChildChanged,
    ChildRemoved,
    ChildMoved,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Value => "value",
            EventType::ChildAdded => "child_added",
            EventType::ChildChanged => "child_changed",
            EventType::ChildRemoved => "child_removed",
            EventType::ChildMoved => "child_moved",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a listener registered with [`QueryHandle::on`].
pub type ListenerToken = u64;

pub type Completion = Box<dyn FnOnce(Option<BackendError>) + Send>;
pub type TransactionCompletion =
    Box<dyn FnOnce(Result<(bool, BackendSnapshot), BackendError>) + Send>;
/// Receives the snapshot and the key of the previous sibling (`None` for the first child
/// and for value events).
pub type EventCallback = Arc<dyn Fn(BackendSnapshot, Option<String>) + Send + Sync>;
pub type CancelCallback = Arc<dyn Fn(BackendError) + Send + Sync>;
/// Invoked with the latest known value of the node, possibly several times.
pub type TransactionUpdate = Arc<dyn Fn(Option<Value>) -> TransactionStep + Send + Sync>;

/// What a transaction update function asks the backend to do.
#[derive(Clone, Debug, PartialEq)]
pub enum TransactionStep {
    /// Leave the node untouched and stop retrying.
    Abort,
    /// Replace the node; `Value::Null` deletes it.
    Write(Value),
}

/// Entry point of a store: produces root handles and toggles connectivity.
pub trait Backend: Send + Sync {
    fn reference_from_url(&self, url: &str) -> SdkResult<BackendRef>;
    fn go_offline(&self);
    fn go_online(&self);
}

/// A node of the store.
pub trait RefHandle: Send + Sync + fmt::Debug {
    fn child(&self, path: &str) -> SdkResult<BackendRef>;
    fn parent(&self) -> Option<BackendRef>;
    fn root(&self) -> BackendRef;
    fn push(&self) -> SdkResult<BackendRef>;
    fn key(&self) -> Option<String>;
    fn to_url(&self) -> String;

    fn set(&self, value: Value, on_complete: Completion) -> SdkResult<()>;
    fn set_with_priority(
        &self,
        value: Value,
        priority: Value,
        on_complete: Completion,
    ) -> SdkResult<()>;
    fn set_priority(&self, priority: Value, on_complete: Completion) -> SdkResult<()>;
    fn update(&self, values: Map<String, Value>, on_complete: Completion) -> SdkResult<()>;
    fn remove(&self, on_complete: Completion) -> SdkResult<()>;
    fn on_disconnect(&self) -> SdkResult<BackendDisconnect>;
    fn transaction(
        &self,
        update: TransactionUpdate,
        on_complete: TransactionCompletion,
        apply_locally: bool,
    ) -> SdkResult<()>;

    /// The unfiltered query over this node's children.
    fn as_query(&self) -> BackendQuery;
}

/// Mutations the backend runs on our behalf once the connection drops.
pub trait DisconnectHandle: Send + Sync {
    fn set(&self, value: Value, on_complete: Completion) -> SdkResult<()>;
    fn set_with_priority(
        &self,
        value: Value,
        priority: Value,
        on_complete: Completion,
    ) -> SdkResult<()>;
    fn set_priority(&self, priority: Value, on_complete: Completion) -> SdkResult<()>;
    fn update(&self, values: Map<String, Value>, on_complete: Completion) -> SdkResult<()>;
    fn remove(&self, on_complete: Completion) -> SdkResult<()>;
    fn cancel(&self, on_complete: Completion) -> SdkResult<()>;
}

/// A (possibly ordered, filtered and limited) view of a node's children.
///
/// Builder methods must be applied in order: one ordering, then range bounds, then one
/// limit. `key` selects the two-argument overload that breaks ties between equal index
/// values.
pub trait QueryHandle: Send + Sync + fmt::Debug {
    fn order_by_child(&self, path: &str) -> SdkResult<BackendQuery>;
    fn order_by_value(&self) -> SdkResult<BackendQuery>;
    fn order_by_key(&self) -> SdkResult<BackendQuery>;
    fn order_by_priority(&self) -> SdkResult<BackendQuery>;
    fn start_at(&self, value: Value, key: Option<&str>) -> SdkResult<BackendQuery>;
    fn end_at(&self, value: Value, key: Option<&str>) -> SdkResult<BackendQuery>;
    fn equal_to(&self, value: Value, key: Option<&str>) -> SdkResult<BackendQuery>;
    fn limit_to_first(&self, limit: u32) -> SdkResult<BackendQuery>;
    fn limit_to_last(&self, limit: u32) -> SdkResult<BackendQuery>;

    fn on(
        &self,
        event: EventType,
        on_event: EventCallback,
        on_cancel: CancelCallback,
    ) -> SdkResult<ListenerToken>;
    fn off(&self, event: EventType, token: ListenerToken) -> SdkResult<()>;
    fn once(
        &self,
        event: EventType,
        on_event: EventCallback,
        on_cancel: CancelCallback,
    ) -> SdkResult<()>;

    fn reference(&self) -> BackendRef;
}

/// A point-in-time view of a node as delivered by the backend.
pub trait SnapshotHandle: Send + Sync + fmt::Debug {
    fn key(&self) -> Option<String>;
    fn val(&self) -> Option<Value>;
    /// The value including `.priority` / `.value` metadata.
    fn export_val(&self) -> Value;
    /// `Value::Null`, a number or a string.
    fn priority(&self) -> Value;
    fn reference(&self) -> BackendRef;
    /// Child snapshots in the order of the query that produced this snapshot.
    fn children(&self) -> Vec<BackendSnapshot>;
}
