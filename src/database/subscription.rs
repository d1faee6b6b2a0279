//! Long-lived listeners and their cancellation.
//!
//! Each subscription goes through three states. It is *pending* while the backend listener
//! is being registered, *active* once the backend accepted it, and *cancelled* after an
//! explicit [`SubscriptionRegistry::unsubscribe`] or a backend-originated cancellation. The
//! registry entry is removed before the cancellation handler is scheduled, so a handler that
//! unsubscribes again gets an unknown-subscription error instead of a double removal.
//!
//! Firings are not queued here: every firing becomes its own task on the host scheduler, and
//! firings that arrive after the entry was removed are dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

use crate::database::backend::{
    BackendError, BackendQuery, BackendSnapshot, CancelCallback, EventCallback, EventType,
    ListenerToken,
};
use crate::database::error::{
    translate, translate_exception, unknown_subscription, DatabaseError, DatabaseResult,
};
use crate::database::snapshot::{adapt, Snapshot};
use crate::logger::Logger;
use crate::platform::runtime::{Task, TaskScheduler};
use crate::util::sync::lock;

static LOGGER: LazyLock<Logger> =
    LazyLock::new(|| Logger::new("@firebase/database-subscriptions"));

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a subscription ended.
#[derive(Clone, Debug, PartialEq)]
pub enum Cancellation {
    Unsubscribed(SubscriptionId),
    /// The backend cancelled the listener, e.g. because access was revoked.
    QueryError(SubscriptionId, DatabaseError),
}

impl Cancellation {
    pub fn id(&self) -> &SubscriptionId {
        match self {
            Cancellation::Unsubscribed(id) | Cancellation::QueryError(id, _) => id,
        }
    }
}

/// Turns a firing into follow-on work; `None` skips the firing.
pub type EventHandler = Arc<dyn Fn(Snapshot) -> Option<Task> + Send + Sync>;
pub type CancelHandler = Arc<dyn Fn(Cancellation) -> Task + Send + Sync>;

struct Entry {
    query: BackendQuery,
    event: EventType,
    token: Option<ListenerToken>,
    on_cancelled: CancelHandler,
}

pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<SubscriptionId, Entry>>,
    scheduler: Arc<dyn TaskScheduler>,
}

impl SubscriptionRegistry {
    pub fn new(scheduler: Arc<dyn TaskScheduler>) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
            scheduler,
        })
    }

    /// Registers a backend listener for `event` on `query`.
    ///
    /// When the backend refuses the listener nothing is stored and the reserved id is handed
    /// back, unless another subscription took a later id in the meantime.
    pub fn subscribe(
        self: &Arc<Self>,
        query: BackendQuery,
        event: EventType,
        on_event: EventHandler,
        on_cancelled: CancelHandler,
    ) -> DatabaseResult<SubscriptionId> {
        let counter = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = SubscriptionId(format!("q{counter}"));
        lock(&self.entries).insert(
            id.clone(),
            Entry {
                query: query.clone(),
                event,
                token: None,
                on_cancelled,
            },
        );

        let registry = Arc::downgrade(self);
        let fired_id = id.clone();
        let on_fire: EventCallback = Arc::new(move |snapshot, prev_key| {
            if let Some(registry) = registry.upgrade() {
                registry.dispatch(&fired_id, &on_event, snapshot, prev_key);
            }
        });
        let registry = Arc::downgrade(self);
        let cancelled_id = id.clone();
        let on_cancel: CancelCallback = Arc::new(move |err| {
            if let Some(registry) = registry.upgrade() {
                registry.cancelled_by_backend(&cancelled_id, err);
            }
        });

        match query.on(event, on_fire, on_cancel) {
            Ok(token) => {
                let mut entries = lock(&self.entries);
                match entries.get_mut(&id) {
                    Some(entry) => entry.token = Some(token),
                    None => {
                        drop(entries);
                        // Cancelled before registration returned; make sure nothing stays attached.
                        release(&query, event, token);
                    }
                }
                LOGGER.debug(format!("subscribed {id} to {event} at {}", query.reference().to_url()));
                Ok(id)
            }
            Err(err) => {
                lock(&self.entries).remove(&id);
                let _ = self.next_id.compare_exchange(
                    counter + 1,
                    counter,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                LOGGER.debug(format!("backend refused {event} listener: {err}"));
                Err(translate_exception(&err))
            }
        }
    }

    /// Removes the backend listener, then schedules the handler with
    /// [`Cancellation::Unsubscribed`].
    ///
    /// The entry is gone even when the backend fails to remove its listener; that failure is
    /// returned instead of the cancellation.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> DatabaseResult<()> {
        let entry = lock(&self.entries)
            .remove(id)
            .ok_or_else(|| unknown_subscription(format!("Unknown subscription {id}")))?;
        if let Some(token) = entry.token {
            if let Err(err) = entry.query.off(entry.event, token) {
                LOGGER.warn(format!("failed to remove listener of {id}: {err}"));
                return Err(translate_exception(&err));
            }
        }
        LOGGER.debug(format!("unsubscribed {id}"));
        self.scheduler
            .spawn((entry.on_cancelled)(Cancellation::Unsubscribed(id.clone())));
        Ok(())
    }

    pub fn is_active(&self, id: &SubscriptionId) -> bool {
        lock(&self.entries).contains_key(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dispatch(
        &self,
        id: &SubscriptionId,
        on_event: &EventHandler,
        snapshot: BackendSnapshot,
        prev_key: Option<String>,
    ) {
        if !self.is_active(id) {
            LOGGER.debug(format!("dropping firing for inactive subscription {id}"));
            return;
        }
        match on_event(adapt(id.as_str(), snapshot, prev_key)) {
            Some(task) => self.scheduler.spawn(task),
            None => LOGGER.debug(format!("handler of {id} skipped a firing")),
        }
    }

    fn cancelled_by_backend(&self, id: &SubscriptionId, err: BackendError) {
        let Some(entry) = lock(&self.entries).remove(id) else {
            LOGGER.debug(format!("ignoring cancellation of inactive subscription {id}"));
            return;
        };
        LOGGER.debug(format!("backend cancelled {id}: {err}"));
        let cancellation = Cancellation::QueryError(id.clone(), translate(&err));
        self.scheduler.spawn((entry.on_cancelled)(cancellation));
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        let entries = std::mem::take(&mut *lock(&self.entries));
        for entry in entries.into_values() {
            if let Some(token) = entry.token {
                release(&entry.query, entry.event, token);
            }
        }
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("active", &self.len())
            .finish()
    }
}

fn release(query: &BackendQuery, event: EventType, token: ListenerToken) {
    if let Err(err) = query.off(event, token) {
        LOGGER.warn(format!("failed to remove {event} listener: {err}"));
    }
}
