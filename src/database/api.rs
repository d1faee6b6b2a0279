use std::fmt;
use std::future::Future;
use std::sync::{Arc, LazyLock, Mutex};

use serde_json::{Map, Value};

use crate::database::backend::{
    Backend, BackendSnapshot, EventType, InMemoryBackend, TransactionStep,
};
use crate::database::error::DatabaseResult;
use crate::database::location::{resolve, Location, Reference};
use crate::database::on_disconnect::OnDisconnect;
use crate::database::query::{compile, QuerySpec};
use crate::database::snapshot::{adapt, Priority, Snapshot};
use crate::database::subscription::{
    CancelHandler, Cancellation, EventHandler, SubscriptionId, SubscriptionRegistry,
};
use crate::database::task::{complete, run, Action, Settle};
use crate::logger::Logger;
use crate::platform::runtime::{default_scheduler, Task, TaskScheduler};
use crate::util::sync::lock;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@firebase/database"));

/// Id of snapshots returned by [`Database::once`].
pub const ONCE_SNAPSHOT_ID: &str = "_once_";
/// Id of snapshots returned by [`Database::transaction`].
pub const TRANSACTION_SNAPSHOT_ID: &str = "_transaction_";

/// Entry point of the client layer: every operation takes a [`Location`] that is resolved
/// against the backend when the operation runs.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    backend: Arc<dyn Backend>,
    registry: Arc<SubscriptionRegistry>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("backend", &"dynamic")
            .field("subscriptions", &self.inner.registry.len())
            .finish()
    }
}

/// Outcome of [`Database::transaction`].
#[derive(Clone, Debug)]
pub struct TransactionResult {
    /// `false` when the update function aborted.
    pub committed: bool,
    pub snapshot: Snapshot,
}

impl Database {
    /// Uses the default Tokio-backed scheduler for event dispatch.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_scheduler(backend, default_scheduler())
    }

    /// `scheduler` runs subscription handlers and cancellation notifications; it should be the
    /// same scheduler the backend delivers its callbacks on.
    pub fn with_scheduler(backend: Arc<dyn Backend>, scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                backend,
                registry: SubscriptionRegistry::new(scheduler),
            }),
        }
    }

    /// A database over a fresh [`InMemoryBackend`] rooted at `memory://default/`.
    pub fn in_memory() -> Self {
        let scheduler = default_scheduler();
        let backend = InMemoryBackend::with_scheduler(scheduler.clone());
        Self::with_scheduler(Arc::new(backend), scheduler)
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    /// Resolves `location` without touching the store.
    pub fn resolve(&self, location: &Location) -> DatabaseResult<Reference> {
        resolve(self.inner.backend.as_ref(), location).map(Reference::new)
    }

    pub async fn open(&self, location: impl Into<Location>) -> DatabaseResult<Reference> {
        self.resolve(&location.into())
    }

    /// Replaces the value at `location`; `Value::Null` deletes it.
    pub async fn set(&self, location: impl Into<Location>, value: Value) -> DatabaseResult<Reference> {
        let reference = self.resolve(&location.into())?;
        let handle = reference.handle().clone();
        complete(|done| handle.set(value, done)).await?;
        Ok(reference)
    }

    pub async fn set_with_priority(
        &self,
        location: impl Into<Location>,
        value: Value,
        priority: impl Into<Priority>,
    ) -> DatabaseResult<Reference> {
        let reference = self.resolve(&location.into())?;
        let handle = reference.handle().clone();
        let priority = priority.into().to_value();
        complete(|done| handle.set_with_priority(value, priority, done)).await?;
        Ok(reference)
    }

    pub async fn set_priority(
        &self,
        location: impl Into<Location>,
        priority: impl Into<Priority>,
    ) -> DatabaseResult<Reference> {
        let reference = self.resolve(&location.into())?;
        let handle = reference.handle().clone();
        let priority = priority.into().to_value();
        complete(|done| handle.set_priority(priority, done)).await?;
        Ok(reference)
    }

    /// Writes several descendants at once; keys are `/` separated paths relative to
    /// `location`.
    pub async fn update(
        &self,
        location: impl Into<Location>,
        values: Map<String, Value>,
    ) -> DatabaseResult<Reference> {
        let reference = self.resolve(&location.into())?;
        let handle = reference.handle().clone();
        complete(|done| handle.update(values, done)).await?;
        Ok(reference)
    }

    pub async fn remove(&self, location: impl Into<Location>) -> DatabaseResult<Reference> {
        let reference = self.resolve(&location.into())?;
        let handle = reference.handle().clone();
        complete(|done| handle.remove(done)).await?;
        Ok(reference)
    }

    /// Disconnect-scoped variants of the mutating operations.
    pub fn on_disconnect(&self) -> OnDisconnect {
        OnDisconnect::new(self.clone())
    }

    /// Runs `update` against the latest value at `location` until it commits or aborts.
    ///
    /// `update` may be called several times and must not have side effects. `apply_locally`
    /// is handed to the backend unchanged.
    pub async fn transaction<F>(
        &self,
        location: impl Into<Location>,
        update: F,
        apply_locally: bool,
    ) -> DatabaseResult<TransactionResult>
    where
        F: Fn(Option<&Value>) -> Action + Send + Sync + 'static,
    {
        let reference = self.resolve(&location.into())?;
        let handle = reference.handle().clone();
        let (committed, snapshot) = run(|settle: Settle<(bool, BackendSnapshot)>| {
            handle.transaction(
                Arc::new(move |current: Option<Value>| {
                    TransactionStep::from(update(current.as_ref()))
                }),
                settle,
                apply_locally,
            )
        })
        .await?;
        Ok(TransactionResult {
            committed,
            snapshot: adapt(TRANSACTION_SNAPSHOT_ID, snapshot, None),
        })
    }

    /// Subscribes `on_event` to `event` firings of `query` at `location`.
    ///
    /// Every firing runs the returned future as its own task. `on_cancelled` runs exactly once,
    /// after [`Database::unsubscribe`] or when the backend cancels the listener; in the latter
    /// case the subscription is already gone when it runs.
    pub async fn subscribe<F, Fut, C, CFut>(
        &self,
        location: impl Into<Location>,
        query: impl Into<QuerySpec>,
        event: EventType,
        on_event: F,
        on_cancelled: C,
    ) -> DatabaseResult<SubscriptionId>
    where
        F: Fn(Snapshot) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        C: Fn(Cancellation) -> CFut + Send + Sync + 'static,
        CFut: Future<Output = ()> + Send + 'static,
    {
        let on_event = move |snapshot: Snapshot| Some(on_event(snapshot));
        self.subscribe_conditional(location, query, event, on_event, on_cancelled)
            .await
    }

    /// Like [`Database::subscribe`], but `on_event` may skip a firing by returning `None`.
    pub async fn subscribe_conditional<F, Fut, C, CFut>(
        &self,
        location: impl Into<Location>,
        query: impl Into<QuerySpec>,
        event: EventType,
        on_event: F,
        on_cancelled: C,
    ) -> DatabaseResult<SubscriptionId>
    where
        F: Fn(Snapshot) -> Option<Fut> + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        C: Fn(Cancellation) -> CFut + Send + Sync + 'static,
        CFut: Future<Output = ()> + Send + 'static,
    {
        let reference = self.resolve(&location.into())?;
        let compiled = compile(&query.into(), reference.handle())?;
        let on_event: EventHandler =
            Arc::new(move |snapshot| on_event(snapshot).map(|work| Box::pin(work) as Task));
        let on_cancelled: CancelHandler =
            Arc::new(move |cancellation| Box::pin(on_cancelled(cancellation)) as Task);
        self.inner
            .registry
            .subscribe(compiled, event, on_event, on_cancelled)
    }

    /// Removes the subscription; a second call with the same id fails with
    /// [`DatabaseErrorCode::UnknownSubscription`](crate::database::error::DatabaseErrorCode).
    pub async fn unsubscribe(&self, id: &SubscriptionId) -> DatabaseResult<()> {
        self.inner.registry.unsubscribe(id)
    }

    pub fn is_subscribed(&self, id: &SubscriptionId) -> bool {
        self.inner.registry.is_active(id)
    }

    /// Reads the first `event` firing of `query` at `location`.
    pub async fn once(
        &self,
        location: impl Into<Location>,
        query: impl Into<QuerySpec>,
        event: EventType,
    ) -> DatabaseResult<Snapshot> {
        let reference = self.resolve(&location.into())?;
        let compiled = compile(&query.into(), reference.handle())?;
        run(|settle: Settle<Snapshot>| {
            let slot = Arc::new(Mutex::new(Some(settle)));
            let on_cancel_slot = slot.clone();
            compiled.once(
                event,
                Arc::new(move |snapshot, prev_key| {
                    if let Some(settle) = lock(&slot).take() {
                        settle(Ok(adapt(ONCE_SNAPSHOT_ID, snapshot, prev_key)));
                    }
                }),
                Arc::new(move |err| {
                    if let Some(settle) = lock(&on_cancel_slot).take() {
                        settle(Err(err));
                    }
                }),
            )
        })
        .await
    }

    /// Drops (`true`) or restores (`false`) the connection to the store.
    pub async fn set_offline(&self, offline: bool) -> DatabaseResult<()> {
        if offline {
            LOGGER.debug("going offline");
            self.inner.backend.go_offline();
        } else {
            LOGGER.debug("going online");
            self.inner.backend.go_online();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::error::DatabaseErrorCode;
    use crate::database::query::Range;
    use crate::database::server_value::{increment, server_timestamp};
    use crate::test_support::{at, memory_database};
    use futures::channel::mpsc;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn writes_return_the_written_reference() {
        let (backend, db) = memory_database();
        let reference = db.set(at("users/ada"), json!({ "name": "Ada" })).await.unwrap();
        assert_eq!(reference.to_url(), "memory://default/users/ada");
        assert_eq!(reference.key().as_deref(), Some("ada"));

        let mut values = Map::new();
        values.insert("age".into(), json!(36));
        db.update(at("users/ada"), values).await.unwrap();
        assert_eq!(
            backend.value_at("users/ada").unwrap(),
            json!({ "name": "Ada", "age": 36 })
        );

        db.remove(reference).await.unwrap();
        assert_eq!(backend.value_at("users/ada").unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn priorities_are_written_and_read_back() {
        let (_backend, db) = memory_database();
        db.set_with_priority(at("ranked/b"), json!("bee"), 2.0).await.unwrap();
        db.set_with_priority(at("ranked/a"), json!("ay"), 1.0).await.unwrap();
        db.set_priority(at("ranked/b"), "z").await.unwrap();

        let snapshot = db
            .once(at("ranked"), QuerySpec::unordered(), EventType::Value)
            .await
            .unwrap();
        assert_eq!(snapshot.id(), ONCE_SNAPSHOT_ID);
        assert_eq!(snapshot.to_key_list(), ["a", "b"]);
        let children = snapshot.to_snapshot_list();
        assert_eq!(children[1].priority(), &Priority::from("z"));
    }

    #[tokio::test]
    async fn push_locations_create_distinct_children() {
        let (backend, db) = memory_database();
        let first = db.set(at("log").push(), json!("one")).await.unwrap();
        let second = db.set(at("log").push(), json!("two")).await.unwrap();
        assert_ne!(first, second);
        let log = backend.value_at("log").unwrap();
        assert_eq!(log.as_object().map(|map| map.len()), Some(2));
    }

    #[tokio::test]
    async fn failed_resolution_makes_no_backend_call() {
        let (backend, db) = memory_database();
        let err = db
            .set(Location::url("memory://default/").parent().child("x"), json!(1))
            .await
            .unwrap_err();
        assert_eq!(err.code, DatabaseErrorCode::Location);
        assert_eq!(backend.value_at("x").unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn server_values_resolve_on_write() {
        let (backend, db) = memory_database();
        db.set(at("stats"), json!({ "visits": 1 })).await.unwrap();
        db.update(at("stats"), {
            let mut values = Map::new();
            values.insert("visits".into(), increment(2.0));
            values.insert("seen".into(), server_timestamp());
            values
        })
        .await
        .unwrap();
        let stats = backend.value_at("stats").unwrap();
        assert_eq!(stats["visits"], json!(3));
        assert!(stats["seen"].is_i64());
    }

    #[tokio::test]
    async fn transactions_commit_or_abort() {
        let (backend, db) = memory_database();
        db.set(at("counter"), json!(1)).await.unwrap();

        let bumped = db
            .transaction(
                at("counter"),
                |current| {
                    let value = current.and_then(Value::as_i64).unwrap_or(0);
                    Action::Set(json!(value + 1))
                },
                true,
            )
            .await
            .unwrap();
        assert!(bumped.committed);
        assert_eq!(bumped.snapshot.value(), Some(&json!(2)));
        assert_eq!(bumped.snapshot.id(), TRANSACTION_SNAPSHOT_ID);

        let aborted = db
            .transaction(at("counter"), |_| Action::Abort, false)
            .await
            .unwrap();
        assert!(!aborted.committed);
        assert_eq!(backend.value_at("counter").unwrap(), json!(2));

        let removed = db
            .transaction(at("counter"), |_| Action::Remove, false)
            .await
            .unwrap();
        assert!(removed.committed);
        assert!(!removed.snapshot.exists());
    }

    #[tokio::test]
    async fn once_reads_ordered_and_limited_children() {
        let (_backend, db) = memory_database();
        db.set(
            at("scores"),
            json!({ "ann": { "score": 30 }, "bob": { "score": 10 }, "cy": { "score": 20 } }),
        )
        .await
        .unwrap();

        let top_two = QuerySpec::order_by_child("score", Range::Unbounded).limit_to_last(2);
        let snapshot = db.once(at("scores"), &top_two, EventType::Value).await.unwrap();
        assert_eq!(snapshot.to_key_list(), ["cy", "ann"]);

        let first_added = db
            .once(at("scores"), &top_two, EventType::ChildAdded)
            .await
            .unwrap();
        assert_eq!(first_added.key(), "cy");
        assert_eq!(first_added.prev_key(), "");
    }

    #[tokio::test]
    async fn once_reports_backend_errors() {
        let (backend, db) = memory_database();
        backend.deny("private", "PERMISSION_DENIED").unwrap();
        let err = db
            .once(at("private"), QuerySpec::unordered(), EventType::Value)
            .await
            .unwrap_err();
        assert_eq!(err.code, DatabaseErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn conditional_subscriptions_skip_declined_firings() {
        let (_backend, db) = memory_database();
        let (tx, mut rx) = mpsc::unbounded();
        db.subscribe_conditional(
            at("numbers"),
            QuerySpec::unordered(),
            EventType::ChildAdded,
            move |snapshot: Snapshot| {
                let even = snapshot.value().and_then(Value::as_i64).is_some_and(|n| n % 2 == 0);
                let tx = tx.clone();
                even.then(|| async move {
                    let _ = tx.unbounded_send(snapshot.key().to_string());
                })
            },
            |_| async {},
        )
        .await
        .unwrap();

        for (key, value) in [("one", 1), ("two", 2), ("three", 3), ("four", 4)] {
            db.set(at(&format!("numbers/{key}")), json!(value)).await.unwrap();
        }
        assert_eq!(rx.next().await.as_deref(), Some("two"));
        assert_eq!(rx.next().await.as_deref(), Some("four"));
    }
}
