//! Backend talking to a hosted database or the emulator over the REST API.
//!
//! Requests run as tasks on the host scheduler, which must be backed by a Tokio runtime.
//! Streaming listeners and on-disconnect writes need the realtime protocol, so those calls
//! fail synchronously with an [`SdkException`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use reqwest::{Client, Method, Response, StatusCode};
use serde_json::{Map, Value};
use url::Url;

use crate::database::push_id::PushIdGenerator;
use crate::database::server_value::resolve_server_values;
use crate::logger::Logger;
use crate::platform::runtime::TaskScheduler;

use super::node::{validate_priority, Locator, Node, TreeSnapshot};
use super::params::{child_index, QueryBound, QueryIndex, QueryLimit, QueryParams};
use super::path::{parse_path, parse_url, render_url};
use super::{
    codes, Backend, BackendDisconnect, BackendError, BackendQuery, BackendRef, CancelCallback,
    Completion, EventCallback, EventType, ListenerToken, QueryHandle, RefHandle, SdkException,
    SdkResult, TransactionCompletion, TransactionStep, TransactionUpdate,
};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@firebase/database-rest"));

const MAX_TRANSACTION_RETRIES: usize = 25;

#[derive(Clone)]
pub struct RestBackend {
    shared: Arc<RestShared>,
}

struct RestShared {
    client: Client,
    origin: String,
    base_query: Vec<(String, String)>,
    auth_token: Option<String>,
    scheduler: Arc<dyn TaskScheduler>,
    offline: AtomicBool,
    push_ids: PushIdGenerator,
}

impl RestBackend {
    /// `database_url` is the root of the database, optionally carrying `?ns=<namespace>`.
    pub fn new(
        database_url: &str,
        auth_token: Option<String>,
        scheduler: Arc<dyn TaskScheduler>,
    ) -> SdkResult<Self> {
        let parsed = parse_url(database_url)?;
        if !parsed.path.is_empty() {
            return Err(SdkException::new(format!(
                "Database URL '{database_url}' must point at the database root"
            )));
        }

        let client = Client::builder()
            .build()
            .map_err(|err| SdkException::new(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self {
            shared: Arc::new(RestShared {
                client,
                origin: parsed.origin,
                base_query: parsed.query,
                auth_token: auth_token.filter(|token| !token.is_empty()),
                scheduler,
                offline: AtomicBool::new(false),
                push_ids: PushIdGenerator::new(),
            }),
        })
    }

    pub fn origin(&self) -> &str {
        &self.shared.origin
    }

    fn reference(&self, path: Vec<String>) -> BackendRef {
        Arc::new(RestRef {
            shared: self.shared.clone(),
            path,
        })
    }
}

impl fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestBackend")
            .field("origin", &self.shared.origin)
            .field("authenticated", &self.shared.auth_token.is_some())
            .finish()
    }
}

impl Locator for RestBackend {
    fn locate(&self, path: &[String]) -> BackendRef {
        self.reference(path.to_vec())
    }
}

impl Backend for RestBackend {
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
        self.shared.offline.store(true, Ordering::SeqCst);
    }

    fn go_online(&self) {
        self.shared.offline.store(false, Ordering::SeqCst);
    }
}

impl RestShared {
    fn locator(self: &Arc<Self>) -> Arc<dyn Locator> {
        Arc::new(RestBackend {
            shared: self.clone(),
        })
    }

    fn endpoint(&self, path: &[String], leaf: Option<&str>) -> Result<Url, BackendError> {
        let mut raw = render_url(&self.origin, path);
        if let Some(leaf) = leaf {
            if !raw.ends_with('/') {
                raw.push('/');
            }
            raw.push_str(leaf);
        }
        raw.push_str(".json");
        Url::parse(&raw).map_err(|err| {
            BackendError::new("invalid_url", format!("Failed to compose database URL: {err}"))
        })
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        query: &[(String, String)],
        headers: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Response, BackendError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::new(
                codes::UNAVAILABLE,
                "The client is offline",
            ));
        }

        let mut params: Vec<(String, String)> = self.base_query.clone();
        params.extend_from_slice(query);
        if let Some(token) = &self.auth_token {
            params.push(("auth".to_string(), token.clone()));
        }

        let mut request = self.client.request(method, url).query(&params);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request.send().await.map_err(|err| {
            LOGGER.warn(format!("database request failed: {err}"));
            BackendError::new(codes::UNAVAILABLE, format!("Database request failed: {err}"))
        })?;
        Ok(response)
    }

    async fn ensure_success(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.ok();
        Err(status_error(status, body.as_deref()))
    }

    async fn write(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> Result<(), BackendError> {
        let silent = [("print".to_string(), "silent".to_string())];
        let deleting = method == Method::DELETE;
        let response = self.send(method, url, &silent, &[], body.as_ref()).await?;
        // Deleting a node that does not exist is not an error.
        if deleting && response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::ensure_success(response).await.map(|_| ())
    }

    fn spawn_write(
        self: &Arc<Self>,
        method: Method,
        path: &[String],
        leaf: Option<&'static str>,
        body: Option<Value>,
        on_complete: Completion,
    ) {
        let shared = self.clone();
        let path = path.to_vec();
        self.scheduler.spawn(Box::pin(async move {
            let result = match shared.endpoint(&path, leaf) {
                Ok(url) => shared.write(method, url, body).await,
                Err(err) => Err(err),
            };
            on_complete(result.err());
        }));
    }

    async fn read(&self, path: &[String], query: &[(String, String)]) -> Result<Node, BackendError> {
        let mut params = vec![("format".to_string(), "export".to_string())];
        params.extend_from_slice(query);
        let url = self.endpoint(path, None)?;
        let response = self.send(Method::GET, url, &params, &[], None).await?;
        let response = Self::ensure_success(response).await?;
        decode_node(response).await
    }

    async fn transaction(
        self: Arc<Self>,
        path: Vec<String>,
        update: TransactionUpdate,
    ) -> Result<(bool, Node), BackendError> {
        let url = self.endpoint(&path, None)?;
        let export = [("format".to_string(), "export".to_string())];
        for attempt in 0..MAX_TRANSACTION_RETRIES {
            let response = self
                .send(
                    Method::GET,
                    url.clone(),
                    &export,
                    &[("x-firebase-etag", "true".to_string())],
                    None,
                )
                .await?;
            let response = Self::ensure_success(response).await?;
            let etag = response
                .headers()
                .get("etag")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| {
                    BackendError::new("invalid_response", "Response carried no ETag header")
                })?;
            let current = decode_node(response).await?;

            let seen = if current.is_empty() {
                None
            } else {
                Some(current.val())
            };
            let value = match update(seen) {
                TransactionStep::Abort => return Ok((false, current)),
                TransactionStep::Write(value) => value,
            };
            let body = with_priority(value, current.priority().clone());

            let response = self
                .send(
                    Method::PUT,
                    url.clone(),
                    &[],
                    &[("if-match", etag)],
                    Some(&body),
                )
                .await?;
            if response.status() == StatusCode::PRECONDITION_FAILED {
                LOGGER.debug(format!(
                    "transaction at /{} lost an ETag race (attempt {})",
                    path.join("/"),
                    attempt + 1
                ));
                continue;
            }
            let response = Self::ensure_success(response).await?;
            let written = decode_node(response).await?;
            return Ok((true, written.with_priority(current.priority().clone())));
        }
        Err(BackendError::new(
            codes::MAX_RETRY,
            "Transaction had too many retries",
        ))
    }
}

async fn decode_node(response: Response) -> Result<Node, BackendError> {
    let value: Value = response.json().await.map_err(|err| {
        BackendError::new(
            "invalid_response",
            format!("Failed to decode database response: {err}"),
        )
    })?;
    Node::from_json(&value)
        .map_err(|err| BackendError::new("invalid_response", err.message().to_string()))
}

fn status_error(status: StatusCode, body: Option<&str>) -> BackendError {
    let message = body
        .and_then(extract_error_message)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    let code = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => codes::PERMISSION_DENIED.to_string(),
        StatusCode::PAYLOAD_TOO_LARGE => codes::TOO_BIG.to_string(),
        StatusCode::SERVICE_UNAVAILABLE => codes::UNAVAILABLE.to_string(),
        other => format!("HTTP_{}", other.as_u16()),
    };
    BackendError::new(code, message)
}

fn extract_error_message(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }

    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(raw) {
        if let Some(Value::String(message)) = obj.get("error") {
            return Some(message.clone());
        }
    }

    Some(raw.to_string())
}

/// Export form of `value` carrying `priority`; plain `value` when there is none.
fn with_priority(value: Value, priority: Value) -> Value {
    if priority.is_null() {
        return value;
    }
    match value {
        Value::Object(mut map) => {
            map.insert(".priority".to_string(), priority);
            Value::Object(map)
        }
        Value::Null => Value::Null,
        other => {
            let mut map = Map::with_capacity(2);
            map.insert(".value".to_string(), other);
            map.insert(".priority".to_string(), priority);
            Value::Object(map)
        }
    }
}

/// Rejects payloads the server would refuse, without resolving server values for real.
fn validate_payload(value: &Value) -> SdkResult<()> {
    Node::from_json(&resolve_server_values(value.clone(), None)?).map(|_| ())
}

fn realtime_only(operation: &str) -> SdkException {
    SdkException::new(format!(
        "{operation} requires a realtime connection; the REST transport only supports \
         writes, transactions and one-shot reads"
    ))
}

struct RestRef {
    shared: Arc<RestShared>,
    path: Vec<String>,
}

impl RestRef {
    fn at(&self, path: Vec<String>) -> BackendRef {
        Arc::new(RestRef {
            shared: self.shared.clone(),
            path,
        })
    }
}

impl fmt::Debug for RestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RestRef").field(&self.to_url()).finish()
    }
}

impl RefHandle for RestRef {
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
        validate_payload(&value)?;
        self.shared
            .spawn_write(Method::PUT, &self.path, None, Some(value), on_complete);
        Ok(())
    }

    fn set_with_priority(
        &self,
        value: Value,
        priority: Value,
        on_complete: Completion,
    ) -> SdkResult<()> {
        validate_priority(&priority)?;
        validate_payload(&value)?;
        let body = with_priority(value, priority);
        self.shared
            .spawn_write(Method::PUT, &self.path, None, Some(body), on_complete);
        Ok(())
    }

    fn set_priority(&self, priority: Value, on_complete: Completion) -> SdkResult<()> {
        validate_priority(&priority)?;
        self.shared.spawn_write(
            Method::PUT,
            &self.path,
            Some(".priority"),
            Some(priority),
            on_complete,
        );
        Ok(())
    }

    fn update(&self, values: Map<String, Value>, on_complete: Completion) -> SdkResult<()> {
        for (key, value) in &values {
            if parse_path(key)?.is_empty() {
                return Err(SdkException::new(
                    "Update paths cannot be empty relative to the reference",
                ));
            }
            validate_payload(value)?;
        }
        if values.is_empty() {
            self.shared
                .scheduler
                .spawn(Box::pin(async move { on_complete(None) }));
            return Ok(());
        }
        self.shared.spawn_write(
            Method::PATCH,
            &self.path,
            None,
            Some(Value::Object(values)),
            on_complete,
        );
        Ok(())
    }

    fn remove(&self, on_complete: Completion) -> SdkResult<()> {
        self.shared
            .spawn_write(Method::DELETE, &self.path, None, None, on_complete);
        Ok(())
    }

    fn on_disconnect(&self) -> SdkResult<BackendDisconnect> {
        Err(realtime_only("on_disconnect"))
    }

    fn transaction(
        &self,
        update: TransactionUpdate,
        on_complete: TransactionCompletion,
        apply_locally: bool,
    ) -> SdkResult<()> {
        if apply_locally {
            LOGGER.debug("REST transactions have no local cache; apply_locally has no effect");
        }
        let shared = self.shared.clone();
        let path = self.path.clone();
        self.shared.scheduler.spawn(Box::pin(async move {
            let locator = shared.locator();
            let outcome = shared.transaction(path.clone(), update).await;
            on_complete(outcome.map(|(committed, node)| {
                let snapshot =
                    TreeSnapshot::new(locator, path, node, QueryParams::default()).into_handle();
                (committed, snapshot)
            }));
        }));
        Ok(())
    }

    fn as_query(&self) -> BackendQuery {
        Arc::new(RestQuery {
            shared: self.shared.clone(),
            path: self.path.clone(),
            params: QueryParams::default(),
        })
    }
}

struct RestQuery {
    shared: Arc<RestShared>,
    path: Vec<String>,
    params: QueryParams,
}

impl RestQuery {
    fn refine<F>(&self, step: F) -> SdkResult<BackendQuery>
    where
        F: FnOnce(&mut QueryParams) -> SdkResult<()>,
    {
        Ok(Arc::new(RestQuery {
            shared: self.shared.clone(),
            path: self.path.clone(),
            params: self.params.refine(step)?,
        }))
    }
}

impl fmt::Debug for RestQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestQuery")
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

impl QueryHandle for RestQuery {
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
        _on_event: EventCallback,
        _on_cancel: CancelCallback,
    ) -> SdkResult<ListenerToken> {
        Err(realtime_only(&format!("listening for {event} events")))
    }

    fn off(&self, _event: EventType, _token: ListenerToken) -> SdkResult<()> {
        Ok(())
    }

    /// Supports `value` and `child_added`; the latter fires for the first child only.
    fn once(
        &self,
        event: EventType,
        on_event: EventCallback,
        on_cancel: CancelCallback,
    ) -> SdkResult<()> {
        if !matches!(event, EventType::Value | EventType::ChildAdded) {
            return Err(realtime_only(&format!("once({event})")));
        }
        let query = self.params.to_rest_params()?;
        let shared = self.shared.clone();
        let path = self.path.clone();
        let params = self.params.clone();
        self.shared.scheduler.spawn(Box::pin(async move {
            let node = match shared.read(&path, &query).await {
                Ok(node) => node,
                Err(err) => {
                    on_cancel(err);
                    return;
                }
            };
            let locator = shared.locator();
            match event {
                EventType::ChildAdded => {
                    if let Some((key, child)) = params.ordered_children(&node).into_iter().next() {
                        let mut child_path = path;
                        child_path.push(key);
                        let snapshot = TreeSnapshot::new(
                            locator,
                            child_path,
                            child,
                            QueryParams::default(),
                        );
                        on_event(snapshot.into_handle(), None);
                    }
                }
                _ => {
                    let snapshot = TreeSnapshot::new(locator, path, node, params);
                    on_event(snapshot.into_handle(), None);
                }
            }
        }));
        Ok(())
    }

    fn reference(&self) -> BackendRef {
        Arc::new(RestRef {
            shared: self.shared.clone(),
            path: self.path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::runtime::TokioScheduler;
    use crate::test_support::start_mock_server;
    use futures::channel::oneshot;
    use httpmock::prelude::*;
    use serde_json::json;

    fn backend(url: &str, token: Option<&str>) -> RestBackend {
        RestBackend::new(
            url,
            token.map(str::to_string),
            Arc::new(TokioScheduler::new()),
        )
        .unwrap()
    }

    async fn complete(
        initiate: impl FnOnce(Completion) -> SdkResult<()>,
    ) -> Option<BackendError> {
        let (tx, rx) = oneshot::channel();
        initiate(Box::new(move |err| drop(tx.send(err)))).unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn set_puts_silently_with_auth_and_namespace() {
        let server = start_mock_server().await;
        let put = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/messages/greeting.json")
                    .query_param("print", "silent")
                    .query_param("ns", "demo-ns")
                    .query_param("auth", "id-token")
                    .json_body(json!({ "text": "hello" }));
                then.status(204);
            })
            .await;

        let backend = backend(&format!("{}?ns=demo-ns", server.url("/")), Some("id-token"));
        let reference = backend
            .reference_from_url(&server.url("/messages/greeting"))
            .unwrap();
        let err = complete(|done| reference.set(json!({ "text": "hello" }), done)).await;

        assert!(err.is_none());
        put.assert_async().await;
    }

    #[tokio::test]
    async fn priority_writes_use_export_format() {
        let server = start_mock_server().await;
        let with_priority = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/item.json")
                    .json_body(json!({ ".value": 7, ".priority": 2 }));
                then.status(200).body("null");
            })
            .await;
        let priority_only = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/item/.priority.json")
                    .json_body(json!("high"));
                then.status(200).body("null");
            })
            .await;

        let backend = backend(&server.url("/"), None);
        let item = backend.reference_from_url(&server.url("/item")).unwrap();
        assert!(complete(|done| item.set_with_priority(json!(7), json!(2), done))
            .await
            .is_none());
        assert!(complete(|done| item.set_priority(json!("high"), done))
            .await
            .is_none());

        with_priority.assert_async().await;
        priority_only.assert_async().await;
    }

    #[tokio::test]
    async fn update_patches_and_remove_deletes() {
        let server = start_mock_server().await;
        let patch = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::PATCH)
                    .path("/users/ada.json")
                    .json_body(json!({ "name": "Ada", "stats/logins": 3 }));
                then.status(200).body("null");
            })
            .await;
        let delete = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/users/ada.json");
                then.status(200).body("null");
            })
            .await;

        let backend = backend(&server.url("/"), None);
        let ada = backend.reference_from_url(&server.url("/users/ada")).unwrap();
        let mut values = Map::new();
        values.insert("name".to_string(), json!("Ada"));
        values.insert("stats/logins".to_string(), json!(3));
        assert!(complete(|done| ada.update(values, done)).await.is_none());
        assert!(complete(|done| ada.remove(done)).await.is_none());

        patch.assert_async().await;
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn http_statuses_map_to_backend_codes() {
        let server = start_mock_server().await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/locked.json");
                then.status(401).body(r#"{"error":"Permission denied"}"#);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/huge.json");
                then.status(413).body("");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/teapot.json");
                then.status(418).body("short and stout");
            })
            .await;

        let backend = backend(&server.url("/"), None);
        let write = |path: &str| {
            let reference = backend.reference_from_url(&server.url(path)).unwrap();
            async move { complete(|done| reference.set(json!(1), done)).await.unwrap() }
        };

        let denied = write("/locked").await;
        assert_eq!(denied.code(), codes::PERMISSION_DENIED);
        assert_eq!(denied.message(), "Permission denied");
        assert_eq!(write("/huge").await.code(), codes::TOO_BIG);
        assert_eq!(write("/teapot").await.code(), "HTTP_418");
    }

    #[tokio::test]
    async fn not_found_only_counts_as_success_for_deletes() {
        let server = start_mock_server().await;
        let put = server
            .mock_async(|when, then| {
                when.method(PUT).path("/missing.json");
                then.status(404).body(r#"{"error":"Firebase error. Please ensure that you spelled the name of your Firebase correctly"}"#);
            })
            .await;
        let patch = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::PATCH).path("/missing.json");
                then.status(404).body("");
            })
            .await;
        let delete = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/missing.json");
                then.status(404).body("");
            })
            .await;

        let backend = backend(&server.url("/"), None);
        let missing = backend.reference_from_url(&server.url("/missing")).unwrap();

        let err = complete(|done| missing.set(json!(1), done)).await.unwrap();
        assert_eq!(err.code(), "HTTP_404");
        assert!(err.message().contains("spelled the name"));

        let mut values = Map::new();
        values.insert("a".to_string(), json!(1));
        let err = complete(|done| missing.update(values, done)).await.unwrap();
        assert_eq!(err.code(), "HTTP_404");

        assert!(complete(|done| missing.remove(done)).await.is_none());

        put.assert_async().await;
        patch.assert_async().await;
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn offline_requests_fail_unavailable_without_network() {
        let backend = backend("http://127.0.0.1:9/", None);
        backend.go_offline();
        let node = backend.reference_from_url("http://127.0.0.1:9/a").unwrap();
        let err = complete(|done| node.set(json!(1), done)).await.unwrap();
        assert_eq!(err.code(), codes::UNAVAILABLE);
    }

    #[tokio::test]
    async fn once_reads_with_query_parameters_in_query_order() {
        let server = start_mock_server().await;
        let get = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/items.json")
                    .query_param("format", "export")
                    .query_param("orderBy", "\"score\"")
                    .query_param("startAt", "100")
                    .query_param("limitToFirst", "2");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"b":{"score":150},"a":{"score":120}}"#);
            })
            .await;

        let backend = backend(&server.url("/"), None);
        let items = backend.reference_from_url(&server.url("/items")).unwrap();
        let query = items
            .as_query()
            .order_by_child("score")
            .unwrap()
            .start_at(json!(100), None)
            .unwrap()
            .limit_to_first(2)
            .unwrap();

        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));
        query
            .once(
                EventType::Value,
                Arc::new(move |snapshot, _| {
                    if let Some(tx) = tx.lock().unwrap().take() {
                        let _ = tx.send(snapshot);
                    }
                }),
                Arc::new(|err| panic!("unexpected cancellation: {err}")),
            )
            .unwrap();
        let snapshot = rx.await.unwrap();

        let keys: Vec<_> = snapshot
            .children()
            .iter()
            .filter_map(|child| child.key())
            .collect();
        assert_eq!(keys, ["a", "b"]);
        get.assert_async().await;
    }

    #[tokio::test]
    async fn transaction_uses_etag_precondition() {
        let server = start_mock_server().await;
        let get = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/counter.json")
                    .header("x-firebase-etag", "true");
                then.status(200).header("ETag", "etag-1").body("41");
            })
            .await;
        let put = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/counter.json")
                    .header("if-match", "etag-1")
                    .json_body(json!(42));
                then.status(200).body("42");
            })
            .await;

        let backend = backend(&server.url("/"), None);
        let counter = backend.reference_from_url(&server.url("/counter")).unwrap();
        let (tx, rx) = oneshot::channel();
        counter
            .transaction(
                Arc::new(|current| {
                    let value = current.and_then(|v| v.as_i64()).unwrap_or(0);
                    TransactionStep::Write(json!(value + 1))
                }),
                Box::new(move |outcome| drop(tx.send(outcome))),
                false,
            )
            .unwrap();
        let (committed, snapshot) = rx.await.unwrap().unwrap();

        assert!(committed);
        assert_eq!(snapshot.val(), Some(json!(42)));
        get.assert_async().await;
        put.assert_async().await;
    }

    #[tokio::test]
    async fn transaction_gives_up_after_repeated_conflicts() {
        let server = start_mock_server().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/hot.json");
                then.status(200).header("ETag", "stale").body("1");
            })
            .await;
        let put = server
            .mock_async(|when, then| {
                when.method(PUT).path("/hot.json");
                then.status(412).body("");
            })
            .await;

        let backend = backend(&server.url("/"), None);
        let hot = backend.reference_from_url(&server.url("/hot")).unwrap();
        let (tx, rx) = oneshot::channel();
        hot.transaction(
            Arc::new(|_| TransactionStep::Write(json!(2))),
            Box::new(move |outcome| drop(tx.send(outcome))),
            false,
        )
        .unwrap();
        let err = rx.await.unwrap().unwrap_err();

        assert_eq!(err.code(), codes::MAX_RETRY);
        put.assert_hits_async(MAX_TRANSACTION_RETRIES).await;
    }

    #[test]
    fn streaming_and_on_disconnect_are_rejected_synchronously() {
        let backend = backend("http://127.0.0.1:9/", None);
        let node = backend.reference_from_url("http://127.0.0.1:9/a").unwrap();
        assert!(node.on_disconnect().is_err());
        let err = node
            .as_query()
            .on(EventType::ChildAdded, Arc::new(|_, _| {}), Arc::new(|_| {}))
            .unwrap_err();
        assert!(err.message().contains("child_added"));
        assert!(backend
            .reference_from_url("http://elsewhere.example/a")
            .is_err());
    }
}
