//! A complete local store implementing the backend traits.
//!
//! Writes are applied to the tree synchronously inside the initiating call. Everything the
//! caller is told about afterwards (event firings, completions, cancellations) is handed to
//! the [`TaskScheduler`], events first, so callbacks never run re-entrantly inside a backend
//! call. A listener removed with `off` before one of its queued firings runs never sees it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex};

use serde_json::{Map, Value};

use crate::database::push_id::PushIdGenerator;
use crate::database::server_value::resolve_server_values;
use crate::logger::Logger;
use crate::platform::runtime::{default_scheduler, TaskScheduler};
use crate::util::sync::lock;

use super::node::{validate_priority, Locator, Node, TreeSnapshot};
use super::params::{child_index, QueryBound, QueryIndex, QueryLimit, QueryParams};
use super::path::{is_prefix, parse_path, parse_url, paths_related, render_url};
use super::{
    codes, Backend, BackendDisconnect, BackendError, BackendQuery, BackendRef, BackendSnapshot,
    CancelCallback, Completion, DisconnectHandle, EventCallback, EventType, ListenerToken,
    QueryHandle, RefHandle, SdkException, SdkResult, TransactionCompletion, TransactionStep,
    TransactionUpdate,
};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@firebase/database-memory"));

/// Origin used by [`InMemoryBackend::new`]; its root URL is `memory://default/`.
pub const DEFAULT_ORIGIN: &str = "memory://default";

const MAX_TRANSACTION_RETRIES: usize = 25;

/// In-process realtime store used for development, tests and demos.
#[derive(Clone)]
pub struct InMemoryBackend {
    shared: Arc<Shared>,
}

struct Shared {
    origin: String,
    scheduler: Arc<dyn TaskScheduler>,
    push_ids: PushIdGenerator,
    state: Mutex<State>,
}

type Deferred = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct State {
    root: Node,
    listeners: BTreeMap<ListenerToken, Listener>,
    next_token: ListenerToken,
    on_disconnect: Vec<DisconnectOp>,
    offline: bool,
    held: Vec<Deferred>,
    rules: BTreeMap<Vec<String>, String>,
}

struct Listener {
    path: Vec<String>,
    params: QueryParams,
    event: EventType,
    on_event: EventCallback,
    on_cancel: CancelCallback,
    view: Node,
    once: bool,
}

struct Firing {
    token: ListenerToken,
    on_event: EventCallback,
    snapshot: BackendSnapshot,
    prev_key: Option<String>,
}

#[derive(Clone, Debug)]
enum Mutation {
    Set {
        value: Value,
        priority: Option<Value>,
    },
    SetPriority(Value),
    Update(Vec<(Vec<String>, Value)>),
}

struct DisconnectOp {
    path: Vec<String>,
    mutation: Mutation,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::with_scheduler(default_scheduler())
    }

    pub fn with_scheduler(scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self::build(DEFAULT_ORIGIN.to_string(), scheduler)
    }

    /// Serves references under a different origin, e.g. `memory://staging`.
    pub fn with_origin(origin: &str, scheduler: Arc<dyn TaskScheduler>) -> SdkResult<Self> {
        let parsed = parse_url(origin)?;
        if !parsed.path.is_empty() {
            return Err(SdkException::new(format!(
                "Origin '{origin}' must not contain a path"
            )));
        }
        Ok(Self::build(parsed.origin, scheduler))
    }

    fn build(origin: String, scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self {
            shared: Arc::new(Shared {
                origin,
                scheduler,
                push_ids: PushIdGenerator::new(),
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn origin(&self) -> &str {
        &self.shared.origin
    }

    pub fn root_url(&self) -> String {
        render_url(&self.shared.origin, &[])
    }

    /// Makes reads, writes and listens touching `path` fail with `code`.
    ///
    /// Listeners at, above or below `path` are cancelled with that code and dropped.
    pub fn deny(&self, path: &str, code: &str) -> SdkResult<()> {
        let path = parse_path(path)?;
        let mut state = lock(&self.shared.state);
        state.rules.insert(path.clone(), code.to_string());
        let revoked: Vec<ListenerToken> = state
            .listeners
            .iter()
            .filter(|(_, listener)| paths_related(&listener.path, &path))
            .map(|(token, _)| *token)
            .collect();
        let cancelled: Vec<Listener> = revoked
            .iter()
            .filter_map(|token| state.listeners.remove(token))
            .collect();
        drop(state);

        LOGGER.debug(format!(
            "denying /{} with {code}; cancelling {} listener(s)",
            path.join("/"),
            cancelled.len()
        ));
        for listener in cancelled {
            let error = rule_error(code, &listener.path);
            self.shared
                .schedule(move || (listener.on_cancel)(error));
        }
        Ok(())
    }

    pub fn allow(&self, path: &str) -> SdkResult<()> {
        let path = parse_path(path)?;
        lock(&self.shared.state).rules.remove(&path);
        Ok(())
    }

    /// Plain value currently stored at `path`.
    pub fn value_at(&self, path: &str) -> SdkResult<Value> {
        let path = parse_path(path)?;
        Ok(lock(&self.shared.state).root.get_or_empty(&path).val())
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.shared.state).listeners.len()
    }

    pub fn pending_on_disconnect(&self) -> usize {
        lock(&self.shared.state).on_disconnect.len()
    }

    pub fn is_offline(&self) -> bool {
        lock(&self.shared.state).offline
    }

    fn reference(&self, path: Vec<String>) -> BackendRef {
        Arc::new(MemoryRef {
            shared: self.shared.clone(),
            path,
        })
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("origin", &self.shared.origin)
            .finish()
    }
}

impl Locator for InMemoryBackend {
    fn locate(&self, path: &[String]) -> BackendRef {
        self.reference(path.to_vec())
    }
}

impl Backend for InMemoryBackend {
    fn reference_from_url(&self, url: &str) -> SdkResult<BackendRef> {
        let parsed = parse_url(url)?;
        if parsed.origin != self.shared.origin {
            return Err(SdkException::new(format!(
                "URL '{url}' does not belong to database {}",
                self.shared.origin
            )));
        }
        Ok(self.reference(parsed.path))
    }

    fn go_offline(&self) {
        let mut state = lock(&self.shared.state);
        if state.offline {
            return;
        }
        state.offline = true;
        let ops = std::mem::take(&mut state.on_disconnect);
        LOGGER.debug(format!(
            "connection dropped; running {} on-disconnect operation(s)",
            ops.len()
        ));
        for op in ops {
            if let Err(err) = apply(&mut state.root, &op.path, op.mutation) {
                LOGGER.warn(format!(
                    "on-disconnect write at /{} failed: {err}",
                    op.path.join("/")
                ));
            }
        }
        let firings = self.shared.collect_firings(&mut state);
        drop(state);
        self.shared.deliver(firings);
    }

    fn go_online(&self) {
        let mut state = lock(&self.shared.state);
        state.offline = false;
        let held = std::mem::take(&mut state.held);
        drop(state);
        for deferred in held {
            self.shared.schedule(deferred);
        }
    }
}

impl Shared {
    fn schedule<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.spawn(Box::pin(async move { task() }));
    }

    fn locator(self: &Arc<Self>) -> Arc<dyn Locator> {
        Arc::new(InMemoryBackend {
            shared: self.clone(),
        })
    }

    fn snapshot(self: &Arc<Self>, path: Vec<String>, node: Node) -> BackendSnapshot {
        TreeSnapshot::new(self.locator(), path, node, QueryParams::default()).into_handle()
    }

    fn deliver(self: &Arc<Self>, firings: Vec<Firing>) {
        for firing in firings {
            let shared = self.clone();
            self.scheduler.spawn(Box::pin(async move {
                if shared.claim(firing.token) {
                    (firing.on_event)(firing.snapshot, firing.prev_key);
                }
            }));
        }
    }

    /// Whether a queued firing may still be delivered; consumes one-shot listeners.
    fn claim(&self, token: ListenerToken) -> bool {
        let mut state = lock(&self.state);
        match state.listeners.get(&token) {
            None => false,
            Some(listener) if listener.once => {
                state.listeners.remove(&token);
                true
            }
            Some(_) => true,
        }
    }

    fn report(&self, outcome: Option<Deferred>) {
        if let Some(outcome) = outcome {
            self.schedule(outcome);
        }
    }

    fn write(
        self: &Arc<Self>,
        path: &[String],
        mutation: Mutation,
        on_complete: Completion,
    ) -> SdkResult<()> {
        let mut state = lock(&self.state);
        if let Some(code) = denied(&state, path) {
            drop(state);
            let error = rule_error(&code, path);
            self.schedule(move || on_complete(Some(error)));
            return Ok(());
        }
        apply(&mut state.root, path, mutation)?;
        let firings = self.collect_firings(&mut state);
        let outcome = hold_while_offline(&mut state, Box::new(move || on_complete(None)));
        drop(state);
        // Events go out before the completion of the write that caused them.
        self.deliver(firings);
        self.report(outcome);
        Ok(())
    }

    fn queue_on_disconnect(
        &self,
        path: &[String],
        mutation: Mutation,
        on_complete: Completion,
    ) -> SdkResult<()> {
        apply(&mut Node::default(), path, mutation.clone())?;
        let mut state = lock(&self.state);
        if let Some(code) = denied(&state, path) {
            drop(state);
            let error = rule_error(&code, path);
            self.schedule(move || on_complete(Some(error)));
            return Ok(());
        }
        state.on_disconnect.push(DisconnectOp {
            path: path.to_vec(),
            mutation,
        });
        let outcome = hold_while_offline(&mut state, Box::new(move || on_complete(None)));
        drop(state);
        self.report(outcome);
        Ok(())
    }

    fn cancel_on_disconnect(&self, path: &[String], on_complete: Completion) {
        let mut state = lock(&self.state);
        state.on_disconnect.retain(|op| !is_prefix(path, &op.path));
        let outcome = hold_while_offline(&mut state, Box::new(move || on_complete(None)));
        drop(state);
        self.report(outcome);
    }

    fn listen(
        self: &Arc<Self>,
        path: &[String],
        params: &QueryParams,
        event: EventType,
        on_event: EventCallback,
        on_cancel: CancelCallback,
        once: bool,
    ) -> ListenerToken {
        let mut state = lock(&self.state);
        state.next_token += 1;
        let token = state.next_token;

        if let Some(code) = denied(&state, path) {
            drop(state);
            let error = rule_error(&code, path);
            self.schedule(move || on_cancel(error));
            return token;
        }

        let view = params.view(&state.root.get_or_empty(path));
        let listener = Listener {
            path: path.to_vec(),
            params: params.clone(),
            event,
            on_event,
            on_cancel,
            view,
            once,
        };
        let firings = self.firings_for(token, &listener, None);
        state.listeners.insert(token, listener);
        drop(state);
        self.deliver(firings);
        token
    }

    fn collect_firings(self: &Arc<Self>, state: &mut State) -> Vec<Firing> {
        let State {
            root, listeners, ..
        } = state;
        let mut firings = Vec::new();
        for (token, listener) in listeners.iter_mut() {
            let view = listener.params.view(&root.get_or_empty(&listener.path));
            if view == listener.view {
                continue;
            }
            let previous = std::mem::replace(&mut listener.view, view);
            firings.extend(self.firings_for(*token, listener, Some(&previous)));
        }
        firings
    }

    /// Diffs `previous` (nothing for a fresh listener) against the listener's current view.
    fn firings_for(
        self: &Arc<Self>,
        token: ListenerToken,
        listener: &Listener,
        previous: Option<&Node>,
    ) -> Vec<Firing> {
        let locator = self.locator();
        let firing = |snapshot: BackendSnapshot, prev_key: Option<String>| Firing {
            token,
            on_event: listener.on_event.clone(),
            snapshot,
            prev_key,
        };
        let child = |key: &str, node: &Node| {
            let mut path = listener.path.clone();
            path.push(key.to_string());
            TreeSnapshot::new(locator.clone(), path, node.clone(), QueryParams::default())
                .into_handle()
        };

        if listener.event == EventType::Value {
            let snapshot = TreeSnapshot::new(
                locator.clone(),
                listener.path.clone(),
                listener.view.clone(),
                listener.params.clone(),
            )
            .into_handle();
            return vec![firing(snapshot, None)];
        }

        let current = listener.params.ordered_children(&listener.view);
        let before = previous
            .map(|node| listener.params.ordered_children(node))
            .unwrap_or_default();
        let before_index: HashMap<&str, usize> = before
            .iter()
            .enumerate()
            .map(|(index, (key, _))| (key.as_str(), index))
            .collect();
        let current_keys: HashMap<&str, usize> = current
            .iter()
            .enumerate()
            .map(|(index, (key, _))| (key.as_str(), index))
            .collect();
        let prev_in = |entries: &[(String, Node)], index: usize| {
            index.checked_sub(1).map(|prev| entries[prev].0.clone())
        };

        let mut firings = Vec::new();
        match listener.event {
            EventType::ChildAdded => {
                for (index, (key, node)) in current.iter().enumerate() {
                    if !before_index.contains_key(key.as_str()) {
                        firings.push(firing(child(key, node), prev_in(&current, index)));
                    }
                }
            }
            EventType::ChildRemoved => {
                for (key, node) in &before {
                    if !current_keys.contains_key(key.as_str()) {
                        firings.push(firing(child(key, node), None));
                    }
                }
            }
            EventType::ChildChanged | EventType::ChildMoved => {
                for (index, (key, node)) in current.iter().enumerate() {
                    let Some(&old_index) = before_index.get(key.as_str()) else {
                        continue;
                    };
                    if &before[old_index].1 == node {
                        continue;
                    }
                    let prev_key = prev_in(&current, index);
                    let moved = prev_in(&before, old_index) != prev_key;
                    if listener.event == EventType::ChildChanged || moved {
                        firings.push(firing(child(key, node), prev_key));
                    }
                }
            }
            EventType::Value => {}
        }
        firings
    }

    fn run_transaction(
        self: &Arc<Self>,
        path: Vec<String>,
        update: TransactionUpdate,
        on_complete: TransactionCompletion,
    ) {
        for attempt in 0..MAX_TRANSACTION_RETRIES {
            let current = {
                let state = lock(&self.state);
                if let Some(code) = denied(&state, &path) {
                    drop(state);
                    on_complete(Err(rule_error(&code, &path)));
                    return;
                }
                state.root.get_or_empty(&path)
            };

            let seen = if current.is_empty() {
                None
            } else {
                Some(current.val())
            };
            let value = match update(seen) {
                TransactionStep::Abort => {
                    on_complete(Ok((false, self.snapshot(path, current))));
                    return;
                }
                TransactionStep::Write(value) => value,
            };

            let mut state = lock(&self.state);
            if state.root.get_or_empty(&path) != current {
                LOGGER.debug(format!(
                    "transaction at /{} raced a concurrent write (attempt {})",
                    path.join("/"),
                    attempt + 1
                ));
                continue;
            }
            let mutation = Mutation::Set {
                value,
                priority: Some(current.priority().clone()),
            };
            if let Err(err) = apply(&mut state.root, &path, mutation) {
                drop(state);
                on_complete(Err(BackendError::new("invalid_data", err.message())));
                return;
            }
            let committed = self.snapshot(path.clone(), state.root.get_or_empty(&path));
            let firings = self.collect_firings(&mut state);
            let outcome = hold_while_offline(
                &mut state,
                Box::new(move || on_complete(Ok((true, committed)))),
            );
            drop(state);
            self.deliver(firings);
            self.report(outcome);
            return;
        }

        on_complete(Err(BackendError::new(
            codes::MAX_RETRY,
            "Transaction had too many retries",
        )));
    }
}

/// Write outcomes are held back while offline and released by `go_online`.
fn hold_while_offline(state: &mut State, outcome: Deferred) -> Option<Deferred> {
    if state.offline {
        state.held.push(outcome);
        None
    } else {
        Some(outcome)
    }
}

fn denied(state: &State, path: &[String]) -> Option<String> {
    state
        .rules
        .iter()
        .find(|(rule, _)| paths_related(rule, path))
        .map(|(_, code)| code.clone())
}

fn rule_error(code: &str, path: &[String]) -> BackendError {
    let message = if code == codes::PERMISSION_DENIED {
        "Client doesn't have permission to access the desired data.".to_string()
    } else {
        format!("Access to /{} rejected", path.join("/"))
    };
    BackendError::new(code, message)
}

fn apply(root: &mut Node, path: &[String], mutation: Mutation) -> SdkResult<()> {
    match mutation {
        Mutation::Set { value, priority } => {
            let node = build_node(root, path, value)?;
            let node = match priority {
                Some(priority) => {
                    validate_priority(&priority)?;
                    node.with_priority(priority)
                }
                None => node,
            };
            root.set(path, node);
        }
        Mutation::SetPriority(priority) => {
            validate_priority(&priority)?;
            if !root.set_priority(path, priority) {
                LOGGER.debug(format!(
                    "set_priority on empty node /{} ignored",
                    path.join("/")
                ));
            }
        }
        Mutation::Update(entries) => {
            let mut nodes = Vec::with_capacity(entries.len());
            for (relative, value) in entries {
                let mut target = path.to_vec();
                target.extend(relative);
                let node = build_node(root, &target, value)?;
                nodes.push((target, node));
            }
            for (target, node) in nodes {
                root.set(&target, node);
            }
        }
    }
    Ok(())
}

fn build_node(root: &Node, path: &[String], value: Value) -> SdkResult<Node> {
    let current = root.get(path).map(Node::val);
    let resolved = resolve_server_values(value, current.as_ref())?;
    Node::from_json(&resolved)
}

fn update_entries(values: Map<String, Value>) -> SdkResult<Vec<(Vec<String>, Value)>> {
    let mut entries = Vec::with_capacity(values.len());
    for (key, value) in values {
        let relative = parse_path(&key)?;
        if relative.is_empty() {
            return Err(SdkException::new(
                "Update paths cannot be empty relative to the reference",
            ));
        }
        entries.push((relative, value));
    }
    Ok(entries)
}

#[derive(Clone)]
struct MemoryRef {
    shared: Arc<Shared>,
    path: Vec<String>,
}

impl MemoryRef {
    fn at(&self, path: Vec<String>) -> BackendRef {
        Arc::new(MemoryRef {
            shared: self.shared.clone(),
            path,
        })
    }
}

impl fmt::Debug for MemoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MemoryRef").field(&self.to_url()).finish()
    }
}

impl RefHandle for MemoryRef {
    fn child(&self, path: &str) -> SdkResult<BackendRef> {
        let mut full = self.path.clone();
        full.extend(parse_path(path)?);
        Ok(self.at(full))
    }

    fn parent(&self) -> Option<BackendRef> {
        let (_, parent) = self.path.split_last()?;
        Some(self.at(parent.to_vec()))
    }

    fn root(&self) -> BackendRef {
        self.at(Vec::new())
    }

    fn push(&self) -> SdkResult<BackendRef> {
        let mut path = self.path.clone();
        path.push(self.shared.push_ids.next_id());
        Ok(self.at(path))
    }

    fn key(&self) -> Option<String> {
        self.path.last().cloned()
    }

    fn to_url(&self) -> String {
        render_url(&self.shared.origin, &self.path)
    }

    fn set(&self, value: Value, on_complete: Completion) -> SdkResult<()> {
        let mutation = Mutation::Set {
            value,
            priority: None,
        };
        self.shared.write(&self.path, mutation, on_complete)
    }

    fn set_with_priority(
        &self,
        value: Value,
        priority: Value,
        on_complete: Completion,
    ) -> SdkResult<()> {
        let mutation = Mutation::Set {
            value,
            priority: Some(priority),
        };
        self.shared.write(&self.path, mutation, on_complete)
    }

    fn set_priority(&self, priority: Value, on_complete: Completion) -> SdkResult<()> {
        self.shared
            .write(&self.path, Mutation::SetPriority(priority), on_complete)
    }

    fn update(&self, values: Map<String, Value>, on_complete: Completion) -> SdkResult<()> {
        let entries = update_entries(values)?;
        self.shared
            .write(&self.path, Mutation::Update(entries), on_complete)
    }

    fn remove(&self, on_complete: Completion) -> SdkResult<()> {
        self.set(Value::Null, on_complete)
    }

    fn on_disconnect(&self) -> SdkResult<BackendDisconnect> {
        Ok(Arc::new(MemoryDisconnect {
            shared: self.shared.clone(),
            path: self.path.clone(),
        }))
    }

    fn transaction(
        &self,
        update: TransactionUpdate,
        on_complete: TransactionCompletion,
        // The store is local, so there is no optimistic state to skip.
        _apply_locally: bool,
    ) -> SdkResult<()> {
        let shared = self.shared.clone();
        let path = self.path.clone();
        self.shared.scheduler.spawn(Box::pin(async move {
            shared.run_transaction(path, update, on_complete);
        }));
        Ok(())
    }

    fn as_query(&self) -> BackendQuery {
        Arc::new(MemoryQuery {
            shared: self.shared.clone(),
            path: self.path.clone(),
            params: QueryParams::default(),
        })
    }
}

struct MemoryDisconnect {
    shared: Arc<Shared>,
    path: Vec<String>,
}

impl DisconnectHandle for MemoryDisconnect {
    fn set(&self, value: Value, on_complete: Completion) -> SdkResult<()> {
        let mutation = Mutation::Set {
            value,
            priority: None,
        };
        self.shared
            .queue_on_disconnect(&self.path, mutation, on_complete)
    }

    fn set_with_priority(
        &self,
        value: Value,
        priority: Value,
        on_complete: Completion,
    ) -> SdkResult<()> {
        let mutation = Mutation::Set {
            value,
            priority: Some(priority),
        };
        self.shared
            .queue_on_disconnect(&self.path, mutation, on_complete)
    }

    fn set_priority(&self, priority: Value, on_complete: Completion) -> SdkResult<()> {
        self.shared
            .queue_on_disconnect(&self.path, Mutation::SetPriority(priority), on_complete)
    }

    fn update(&self, values: Map<String, Value>, on_complete: Completion) -> SdkResult<()> {
        let entries = update_entries(values)?;
        self.shared
            .queue_on_disconnect(&self.path, Mutation::Update(entries), on_complete)
    }

    fn remove(&self, on_complete: Completion) -> SdkResult<()> {
        self.set(Value::Null, on_complete)
    }

    fn cancel(&self, on_complete: Completion) -> SdkResult<()> {
        self.shared.cancel_on_disconnect(&self.path, on_complete);
        Ok(())
    }
}

struct MemoryQuery {
    shared: Arc<Shared>,
    path: Vec<String>,
    params: QueryParams,
}

impl MemoryQuery {
    fn refine<F>(&self, step: F) -> SdkResult<BackendQuery>
    where
        F: FnOnce(&mut QueryParams) -> SdkResult<()>,
    {
        Ok(Arc::new(MemoryQuery {
            shared: self.shared.clone(),
            path: self.path.clone(),
            params: self.params.refine(step)?,
        }))
    }
}

impl fmt::Debug for MemoryQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryQuery")
            .field("url", &render_url(&self.shared.origin, &self.path))
            .field("params", &self.params)
            .finish()
    }
}

fn bound(value: Value, key: Option<&str>) -> QueryBound {
    QueryBound {
        value,
        name: key.map(str::to_string),
    }
}

impl QueryHandle for MemoryQuery {
    fn order_by_child(&self, path: &str) -> SdkResult<BackendQuery> {
        let index = child_index(path)?;
        self.refine(|params| params.set_index(index))
    }

    fn order_by_value(&self) -> SdkResult<BackendQuery> {
        self.refine(|params| params.set_index(QueryIndex::Value))
    }

    fn order_by_key(&self) -> SdkResult<BackendQuery> {
        self.refine(|params| params.set_index(QueryIndex::Key))
    }

    fn order_by_priority(&self) -> SdkResult<BackendQuery> {
        self.refine(|params| params.set_index(QueryIndex::Priority))
    }

    fn start_at(&self, value: Value, key: Option<&str>) -> SdkResult<BackendQuery> {
        self.refine(|params| params.set_start(bound(value, key)))
    }

    fn end_at(&self, value: Value, key: Option<&str>) -> SdkResult<BackendQuery> {
        self.refine(|params| params.set_end(bound(value, key)))
    }

    fn equal_to(&self, value: Value, key: Option<&str>) -> SdkResult<BackendQuery> {
        self.refine(|params| params.set_equal(bound(value, key)))
    }

    fn limit_to_first(&self, limit: u32) -> SdkResult<BackendQuery> {
        self.refine(|params| params.set_limit(QueryLimit::First(limit)))
    }

    fn limit_to_last(&self, limit: u32) -> SdkResult<BackendQuery> {
        self.refine(|params| params.set_limit(QueryLimit::Last(limit)))
    }

    fn on(
        &self,
        event: EventType,
        on_event: EventCallback,
        on_cancel: CancelCallback,
    ) -> SdkResult<ListenerToken> {
        Ok(self
            .shared
            .listen(&self.path, &self.params, event, on_event, on_cancel, false))
    }

    fn off(&self, event: EventType, token: ListenerToken) -> SdkResult<()> {
        let mut state = lock(&self.shared.state);
        if state
            .listeners
            .get(&token)
            .is_some_and(|listener| listener.event == event)
        {
            state.listeners.remove(&token);
        }
        Ok(())
    }

    fn once(
        &self,
        event: EventType,
        on_event: EventCallback,
        on_cancel: CancelCallback,
    ) -> SdkResult<()> {
        self.shared
            .listen(&self.path, &self.params, event, on_event, on_cancel, true);
        Ok(())
    }

    fn reference(&self) -> BackendRef {
        Arc::new(MemoryRef {
            shared: self.shared.clone(),
            path: self.path.clone(),
        })
    }
}
