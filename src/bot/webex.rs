//! Webex chat client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// A chat message as delivered by Webex.
///
/// Webhook deliveries only carry the reference fields; `text` is filled in by
/// [`ChatClient::get_message`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub room_id: String,
    #[serde(default)]
    pub person_email: String,
    #[serde(default)]
    pub text: String,
}

/// Envelope POSTed to the webhook endpoint.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub data: Message,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub id: String,
    pub name: String,
    pub target_url: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub created: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequest {
    pub name: String,
    pub target_url: String,
    pub resource: String,
    pub event: String,
}

impl WebhookRequest {
    /// Subscription for every message created in rooms the bot belongs to.
    pub fn messages_created(name: &str, target_url: &str) -> Self {
        Self {
            name: name.to_string(),
            target_url: target_url.to_string(),
            resource: "messages".to_string(),
            event: "created".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {body}")]
    Api { status: reqwest::StatusCode, body: String },
}

/// The chat operations the bot needs.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_message(&self, room_id: &str, markdown: &str) -> Result<(), ChatError>;
    async fn list_webhooks(&self, max: u32) -> Result<Vec<Webhook>, ChatError>;
    async fn create_webhook(&self, request: &WebhookRequest) -> Result<Webhook, ChatError>;
    async fn get_message(&self, message_id: &str) -> Result<Message, ChatError>;
}

/// Send a reply, logging instead of failing.
pub async fn send_reply(chat: &dyn ChatClient, room_id: &str, markdown: &str) {
    if let Err(e) = chat.send_message(room_id, markdown).await {
        warn!("Failed to send message to room {room_id}: {e}");
    }
}

/// Create the message webhook unless one is already registered.
///
/// Returns `true` when a webhook was created.
pub async fn ensure_webhook(
    chat: &dyn ChatClient,
    name: &str,
    target_url: &str,
) -> Result<bool, ChatError> {
    let webhooks = chat.list_webhooks(10).await?;
    for webhook in &webhooks {
        debug!(
            "Existing webhook {} {} -> {} (created {:?})",
            webhook.id, webhook.name, webhook.target_url, webhook.created
        );
    }
    if !webhooks.is_empty() {
        return Ok(false);
    }

    let created = chat
        .create_webhook(&WebhookRequest::messages_created(name, target_url))
        .await?;
    info!("🪝 Created webhook {} -> {}", created.id, created.target_url);
    Ok(true)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateMessage<'a> {
    room_id: &'a str,
    markdown: &'a str,
}

#[derive(Deserialize)]
struct ListResponse<T> {
    items: Vec<T>,
}

/// Webex REST API client.
pub struct WebexClient {
    token: String,
    base_url: String,
    http: reqwest::Client,
}

impl WebexClient {
    pub fn new(token: impl Into<String>, base_url: impl Into<String>) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            token: token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ChatError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ChatError::Api { status, body })
    }
}

#[async_trait]
impl ChatClient for WebexClient {
    async fn send_message(&self, room_id: &str, markdown: &str) -> Result<(), ChatError> {
        info!("💬 Sending message to room {room_id} ({} chars)", markdown.chars().count());
        let response = self
            .http
            .post(self.url("messages"))
            .bearer_auth(&self.token)
            .json(&CreateMessage { room_id, markdown })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn list_webhooks(&self, max: u32) -> Result<Vec<Webhook>, ChatError> {
        let response = self
            .http
            .get(self.url("webhooks"))
            .bearer_auth(&self.token)
            .query(&[("max", max)])
            .send()
            .await?;
        let list: ListResponse<Webhook> = Self::check(response).await?.json().await?;
        Ok(list.items)
    }

    async fn create_webhook(&self, request: &WebhookRequest) -> Result<Webhook, ChatError> {
        let response = self
            .http
            .post(self.url("webhooks"))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn get_message(&self, message_id: &str) -> Result<Message, ChatError> {
        let path = format!("messages/{}", urlencoding::encode(message_id));
        let response = self
            .http
            .get(self.url(&path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorded {
        requests: Arc<Mutex<Vec<(String, Value)>>>,
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Bearer token")
    }

    async fn create_message(
        State(rec): State<Recorded>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> StatusCode {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED;
        }
        rec.requests.lock().unwrap().push(("messages".to_string(), body));
        StatusCode::OK
    }

    async fn get_message(Path(id): Path<String>) -> Json<Value> {
        Json(json!({
            "id": id,
            "roomId": "room-1",
            "personEmail": "alice@example.com",
            "text": "AdventLeaderBot poll"
        }))
    }

    async fn list_webhooks(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
        assert_eq!(q.get("max").map(String::as_str), Some("10"));
        Json(json!({"items": [
            {"id": "wh-1", "name": "AdventLeaderBot", "targetUrl": "https://x/webhook",
             "resource": "messages", "event": "created", "created": "2020-12-01T00:00:00.000Z"}
        ]}))
    }

    async fn create_webhook(State(rec): State<Recorded>, Json(body): Json<Value>) -> Json<Value> {
        rec.requests.lock().unwrap().push(("webhooks".to_string(), body.clone()));
        Json(json!({
            "id": "wh-2",
            "name": body["name"],
            "targetUrl": body["targetUrl"],
            "resource": body["resource"],
            "event": body["event"]
        }))
    }

    async fn serve(rec: Recorded) -> String {
        let router = Router::new()
            .route("/messages", post(create_message))
            .route("/messages/:id", get(get_message))
            .route("/webhooks", get(list_webhooks).post(create_webhook))
            .with_state(rec);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn test_send_message_uses_markdown_and_room() {
        let rec = Recorded::default();
        let client = WebexClient::new("token", serve(rec.clone()).await).unwrap();

        client.send_message("room-1", "**hi**").await.unwrap();

        let requests = rec.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1, json!({"roomId": "room-1", "markdown": "**hi**"}));
    }

    #[tokio::test]
    async fn test_bad_token_is_api_error() {
        let client = WebexClient::new("wrong", serve(Recorded::default()).await).unwrap();
        let err = client.send_message("room-1", "hi").await.unwrap_err();
        assert!(matches!(err, ChatError::Api { status, .. } if status == StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn test_get_message_and_list_webhooks() {
        let client = WebexClient::new("token", serve(Recorded::default()).await).unwrap();

        let message = client.get_message("abc").await.unwrap();
        assert_eq!(message.id, "abc");
        assert_eq!(message.room_id, "room-1");
        assert_eq!(message.text, "AdventLeaderBot poll");

        let webhooks = client.list_webhooks(10).await.unwrap();
        assert_eq!(webhooks.len(), 1);
        assert_eq!(webhooks[0].target_url, "https://x/webhook");
    }

    #[tokio::test]
    async fn test_create_webhook_body() {
        let rec = Recorded::default();
        let client = WebexClient::new("token", serve(rec.clone()).await).unwrap();

        let created = client
            .create_webhook(&WebhookRequest::messages_created("Bot", "https://y/webhook"))
            .await
            .unwrap();
        assert_eq!(created.id, "wh-2");

        let requests = rec.requests.lock().unwrap();
        assert_eq!(
            requests[0].1,
            json!({"name": "Bot", "targetUrl": "https://y/webhook", "resource": "messages", "event": "created"})
        );
    }

    #[test]
    fn test_decode_webhook_event() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{"id": "hook", "resource": "messages", "data": {"id": "m1", "roomId": "r1", "personEmail": "a@b.c"}}"#,
        )
        .unwrap();
        assert_eq!(event.data.id, "m1");
        assert_eq!(event.data.room_id, "r1");
        assert!(event.data.text.is_empty());
    }
}
