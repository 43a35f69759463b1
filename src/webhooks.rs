//! Webhook events and outgoing delivery.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::id::is_within;
use crate::store::Store;
use crate::types::{Webhook, WebhookType};

/// Something that happened in a scope, delivered to matching webhooks.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Event name such as `elements-created`.
    pub trigger: String,
    /// Id of the record the event concerns; empty for server-level events.
    pub scope: String,
    #[serde(rename = "data")]
    pub payload: Value,
}

impl Event {
    pub fn new(trigger: impl Into<String>, scope: impl Into<String>, payload: Value) -> Self {
        Self {
            trigger: trigger.into(),
            scope: scope.into(),
            payload,
        }
    }
}

/// Returns whether `hook` should receive `event`.
#[must_use]
pub fn hook_matches(hook: &Webhook, event: &Event) -> bool {
    hook.webhook_type == WebhookType::Outgoing
        && !hook.meta.archived
        && hook.triggers.iter().any(|t| *t == event.trigger)
        && is_within(&event.scope, &hook.reference)
}

pub struct WebhookDispatcher {
    store: Arc<dyn Store>,
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build webhook client: {e}")))?;
        Ok(Self { store, client })
    }

    pub fn matching_hooks(&self, event: &Event) -> Result<Vec<Webhook>> {
        Ok(self
            .store
            .list_webhooks(false)?
            .into_iter()
            .filter(|hook| hook_matches(hook, event))
            .collect())
    }

    /// Sends `event` to every matching outgoing webhook on background tasks.
    /// Delivery failures are logged and never retried.
    pub fn emit(&self, event: Event) {
        let hooks = match self.matching_hooks(&event) {
            Ok(hooks) => hooks,
            Err(e) => {
                tracing::error!(trigger = %event.trigger, "Failed to look up webhooks: {e}");
                return;
            }
        };
        if hooks.is_empty() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(trigger = %event.trigger, "No async runtime, dropping webhook event");
            return;
        };

        let event = Arc::new(event);
        for hook in hooks {
            let Some(url) = hook.url else {
                continue;
            };
            let client = self.client.clone();
            let event = Arc::clone(&event);
            runtime.spawn(async move {
                match client.post(&url).json(event.as_ref()).send().await {
                    Ok(response) if response.status().is_success() => {
                        tracing::debug!(webhook = %hook.id, trigger = %event.trigger, "Delivered webhook");
                    }
                    Ok(response) => {
                        tracing::warn!(
                            webhook = %hook.id,
                            status = response.status().as_u16(),
                            "Webhook endpoint rejected delivery"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(webhook = %hook.id, "Webhook delivery failed: {e}");
                    }
                }
            });
        }
    }
}

/// SHA-256 hex digest stored for incoming webhook tokens.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Follows a dot-separated path such as `auth.token` into a JSON body.
#[must_use]
pub fn value_at<'a>(body: &'a Value, location: &str) -> Option<&'a Value> {
    location
        .split('.')
        .try_fold(body, |value, key| value.as_object()?.get(key))
}

/// Encodes a webhook id for use in the trigger url.
#[must_use]
pub fn encode_trigger_id(id: &str) -> String {
    URL_SAFE_NO_PAD.encode(id)
}

/// Decodes a trigger url id. Both url-safe and standard alphabets are accepted.
pub fn decode_trigger_id(encoded: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .or_else(|_| STANDARD.decode(encoded))
        .map_err(|_| Error::BadRequest("Invalid webhook id encoding".to_string()))?;
    String::from_utf8(bytes).map_err(|_| Error::BadRequest("Invalid webhook id encoding".to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::SqliteStore;
    use crate::types::Metadata;

    fn hook(id: &str, reference: &str, triggers: &[&str]) -> Webhook {
        Webhook {
            id: id.to_string(),
            name: id.to_string(),
            webhook_type: WebhookType::Outgoing,
            reference: reference.to_string(),
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
            url: Some("http://127.0.0.1:9/hook".to_string()),
            token_hash: None,
            token_location: None,
            custom: json!({}),
            meta: Metadata::new(None),
        }
    }

    #[test]
    fn test_hook_matches_scope_and_trigger() {
        let event = Event::new("elements-created", "acme:rocket:master", json!([]));

        assert!(hook_matches(&hook("a", "", &["elements-created"]), &event));
        assert!(hook_matches(&hook("b", "acme", &["elements-created"]), &event));
        assert!(hook_matches(&hook("c", "acme:rocket:master", &["elements-created"]), &event));
        assert!(!hook_matches(&hook("d", "acme:rocket:dev", &["elements-created"]), &event));
        assert!(!hook_matches(&hook("e", "acme", &["elements-deleted"]), &event));
        assert!(!hook_matches(&hook("f", "acme:rock", &["elements-created"]), &event));

        let mut incoming = hook("g", "", &["elements-created"]);
        incoming.webhook_type = WebhookType::Incoming;
        assert!(!hook_matches(&incoming, &event));

        let mut archived = hook("h", "", &["elements-created"]);
        archived.meta.set_archived(true, "root");
        assert!(!hook_matches(&archived, &event));
    }

    #[test]
    fn test_matching_hooks_reads_store() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.initialize().unwrap();
        store.create_webhook(&hook("a", "acme", &["orgs-updated"])).unwrap();
        store.create_webhook(&hook("b", "other", &["orgs-updated"])).unwrap();

        let dispatcher = WebhookDispatcher::new(store, Duration::from_secs(1)).unwrap();
        let hooks = dispatcher
            .matching_hooks(&Event::new("orgs-updated", "acme", json!({})))
            .unwrap();
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].id, "a");

        // No runtime: emit must not panic.
        dispatcher.emit(Event::new("orgs-updated", "acme", json!({})));
    }

    #[tokio::test]
    async fn test_emit_posts_event_to_outgoing_hooks() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        use axum::{Json, Router, http::StatusCode, routing::post};
        use tokio::sync::mpsc;

        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        let rejected = Arc::new(AtomicUsize::new(0));
        let rejected_hits = Arc::clone(&rejected);
        let app = Router::new()
            .route(
                "/hook",
                post(move |Json(body): Json<Value>| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(body);
                        StatusCode::OK
                    }
                }),
            )
            .route(
                "/failing",
                post(move || {
                    let hits = Arc::clone(&rejected_hits);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.initialize().unwrap();
        let mut live = hook("live", "acme", &["elements-created"]);
        live.url = Some(format!("http://{addr}/hook"));
        store.create_webhook(&live).unwrap();
        let mut failing = hook("failing", "acme", &["elements-created"]);
        failing.url = Some(format!("http://{addr}/failing"));
        store.create_webhook(&failing).unwrap();
        // Nothing listens on port 9.
        store.create_webhook(&hook("unreachable", "", &["elements-created"])).unwrap();

        let dispatcher = WebhookDispatcher::new(store, Duration::from_secs(2)).unwrap();
        dispatcher.emit(Event::new(
            "elements-created",
            "acme:rocket:master",
            json!([{ "id": "acme:rocket:master:engine" }]),
        ));

        let body = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body["trigger"], "elements-created");
        assert_eq!(body["scope"], "acme:rocket:master");
        assert_eq!(body["data"][0]["id"], "acme:rocket:master:engine");

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_value_at() {
        let body = json!({"auth": {"token": "abc"}, "token": 5});
        assert_eq!(value_at(&body, "auth.token"), Some(&json!("abc")));
        assert_eq!(value_at(&body, "token"), Some(&json!(5)));
        assert_eq!(value_at(&body, "auth.missing"), None);
        assert_eq!(value_at(&body, "token.deeper"), None);
    }

    #[test]
    fn test_trigger_id_encoding() {
        let id = "3f0c7a52-0e7e-4a1b-9d59-8f8c1f3b2a10";
        assert_eq!(decode_trigger_id(&encode_trigger_id(id)).unwrap(), id);
        assert_eq!(decode_trigger_id(&STANDARD.encode(id)).unwrap(), id);
        assert!(decode_trigger_id("!!!").is_err());
    }

    #[test]
    fn test_hash_token() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
