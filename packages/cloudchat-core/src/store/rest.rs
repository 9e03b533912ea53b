//! REST + Server-Sent-Events backend.
//!
//! Talks to a Firebase-compatible realtime database:
//!
//! ```text
//! get          GET    {base}/{path}.json
//! set          PUT    {base}/{path}.json          body = value
//! remove       DELETE {base}/{path}.json
//! update       PATCH  {base}/.json                body = {"a/b": v, "c/d": null}
//! query_equal  GET    {base}/{path}.json?orderBy="child"&equalTo="value"
//! subscribe    GET    {base}/{path}.json          Accept: text/event-stream
//! ```
//!
//! A subscription keeps a local copy of the watched subtree, applies each
//! `put` / `patch` event to it and emits the whole copy, so callers always
//! see full snapshots.

use std::sync::Arc;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::path::{validate_key, StorePath};
use super::push_id::PushIdGenerator;
use super::{tree, MultiPathUpdate, RealtimeStore, Snapshot};
use crate::config::RestStoreConfig;
use crate::error::{Error, Result};
use crate::subscription::{Subscription, SubscriptionSink};
use crate::time::{Clock, SystemClock};

/// Realtime store reached over HTTPS.
#[derive(Clone)]
pub struct RestStore {
    client: Client,
    config: RestStoreConfig,
    keys: Arc<PushIdGenerator>,
    clock: Arc<dyn Clock>,
}

impl RestStore {
    /// Build a store client from `config`.
    pub fn new(config: RestStoreConfig) -> Result<Self> {
        config.validate()?;
        // No overall request timeout: subscriptions are long-lived. The chat
        // session bounds one-shot calls itself.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        tracing::info!(database = %config.base_url(), "REST store configured");
        Ok(Self {
            client,
            config,
            keys: Arc::new(PushIdGenerator::new()),
            clock: Arc::new(SystemClock),
        })
    }

    /// Build a store client from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(RestStoreConfig::from_env()?)
    }

    /// Use a custom clock for push ids.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// `{base}/{path}.json`
    pub fn url_for(&self, path: &StorePath) -> String {
        format!("{}/{}.json", self.config.base_url(), path.as_string())
    }

    fn request(&self, method: Method, path: &StorePath) -> RequestBuilder {
        let builder = self.client.request(method, self.url_for(path));
        match &self.config.auth_token {
            Some(token) => builder.query(&[("auth", token.as_str())]),
            None => builder,
        }
    }
}

/// Turn a non-success response into a typed error.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, body))
}

fn status_error(status: StatusCode, body: String) -> Error {
    let message = error_message(&body).unwrap_or(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::PermissionDenied(message),
        StatusCode::TOO_MANY_REQUESTS => Error::StoreUnavailable(message),
        s if s.is_server_error() => Error::StoreUnavailable(format!("{}: {}", s, message)),
        s => Error::RequestFailed {
            status: s.as_u16(),
            message,
        },
    }
}

/// Error bodies look like `{"error": "Permission denied"}`.
fn error_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }
    serde_json::from_str::<ErrorBody>(body).ok().map(|b| b.error)
}

#[async_trait]
impl RealtimeStore for RestStore {
    async fn get(&self, path: &StorePath) -> Result<Snapshot> {
        let response = check(self.request(Method::GET, path).send().await?).await?;
        let value: Value = response.json().await?;
        Ok(Snapshot::new(path.clone(), Some(value)))
    }

    async fn set(&self, path: &StorePath, value: Value) -> Result<()> {
        let builder = if value.is_null() {
            self.request(Method::DELETE, path)
        } else {
            self.request(Method::PUT, path).json(&value)
        };
        check(builder.send().await?).await?;
        tracing::debug!(path = %path, "REST store write");
        Ok(())
    }

    async fn update(&self, update: MultiPathUpdate) -> Result<()> {
        update.validate()?;
        if update.is_empty() {
            return Ok(());
        }
        let body = patch_body(&update);
        let response = self
            .request(Method::PATCH, &StorePath::root())
            .json(&body)
            .send()
            .await?;
        check(response).await?;
        tracing::debug!(paths = body.len(), "REST store multi-path update");
        Ok(())
    }

    async fn query_equal(&self, path: &StorePath, child: &str, value: &str) -> Result<Snapshot> {
        validate_key(child)?;
        let response = self
            .request(Method::GET, path)
            .query(&query_params(child, value)?)
            .send()
            .await?;
        let value: Value = check(response).await?.json().await?;
        Ok(Snapshot::new(path.clone(), Some(value)))
    }

    async fn subscribe(&self, path: &StorePath) -> Result<Subscription> {
        let response = self
            .request(Method::GET, path)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = check(response).await?;

        let (subscription, sink) = Subscription::channel(path.clone());
        tracing::info!(path = %path, subscription = %subscription.id(), "Event stream opened");
        tokio::spawn(run_event_stream(response, sink));
        Ok(subscription)
    }

    fn generate_key(&self) -> String {
        self.keys.next_id(self.clock.now_millis())
    }
}

/// Body of a multi-path PATCH at the root.
fn patch_body(update: &MultiPathUpdate) -> Map<String, Value> {
    update
        .entries()
        .iter()
        .map(|(path, value)| (path.as_string(), value.clone()))
        .collect()
}

/// Query parameters are JSON literals: `orderBy="email"&equalTo="a@x.com"`.
fn query_params(child: &str, value: &str) -> Result<[(&'static str, String); 2]> {
    Ok([
        ("orderBy", serde_json::to_string(child)?),
        ("equalTo", serde_json::to_string(value)?),
    ])
}

// ============================================================================
// EVENT STREAM
// ============================================================================

/// What to do after one server-sent event.
#[derive(Debug, PartialEq)]
enum StreamAction {
    /// The cache changed; emit it.
    Emit,
    /// Nothing to deliver.
    Ignore,
    /// The server ended the stream.
    Close(String),
}

#[derive(Deserialize)]
struct EventPayload {
    path: String,
    data: Value,
}

/// Apply one event to the cached subtree.
fn apply_event(cache: &mut Value, event: &str, data: &str) -> Result<StreamAction> {
    match event {
        "put" => {
            let payload: EventPayload = serde_json::from_str(data)?;
            let at = StorePath::parse(&payload.path)?;
            tree::set(cache, at.segments(), payload.data);
            Ok(StreamAction::Emit)
        }
        "patch" => {
            let payload: EventPayload = serde_json::from_str(data)?;
            let at = StorePath::parse(&payload.path)?;
            let Value::Object(children) = payload.data else {
                return Err(Error::DeserializationError(format!(
                    "patch data at {} is not an object",
                    at
                )));
            };
            for (relative, value) in children {
                let mut target = at.clone();
                for segment in relative.split('/').filter(|s| !s.is_empty()) {
                    target = target.child(segment)?;
                }
                tree::set(cache, target.segments(), value);
            }
            Ok(StreamAction::Emit)
        }
        "keep-alive" => Ok(StreamAction::Ignore),
        "cancel" => Ok(StreamAction::Close(format!(
            "stream cancelled by server rules: {}",
            data
        ))),
        "auth_revoked" => Ok(StreamAction::Close("auth token revoked".into())),
        other => {
            tracing::debug!(event = other, "Ignoring unknown stream event");
            Ok(StreamAction::Ignore)
        }
    }
}

async fn run_event_stream(response: Response, sink: SubscriptionSink) {
    let mut events = Box::pin(response.bytes_stream().eventsource());
    let mut cache = Value::Null;

    loop {
        let next = tokio::select! {
            _ = sink.closed() => break,
            next = events.next() => next,
        };

        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                tracing::warn!(path = %sink.path(), error = %e, "Event stream failed");
                sink.send(Err(Error::StoreUnavailable(e.to_string())));
                break;
            }
            None => {
                tracing::debug!(path = %sink.path(), "Event stream ended");
                break;
            }
        };

        match apply_event(&mut cache, &event.event, &event.data) {
            Ok(StreamAction::Emit) => {
                let snapshot = Snapshot::new(sink.path().clone(), Some(cache.clone()));
                if !sink.send(Ok(snapshot)) {
                    break;
                }
            }
            Ok(StreamAction::Ignore) => {}
            Ok(StreamAction::Close(reason)) => {
                tracing::warn!(path = %sink.path(), reason = %reason, "Event stream closed by server");
                sink.send(Err(Error::PermissionDenied(reason)));
                break;
            }
            Err(e) => {
                tracing::warn!(path = %sink.path(), error = %e, "Malformed stream event");
            }
        }
    }

    tracing::debug!(subscription = %sink.id(), "Event stream task finished");
}
