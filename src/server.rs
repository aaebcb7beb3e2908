//! HTTP entry points: poll triggers and the Webex webhook.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tracing::{error, info, warn};

use crate::bot::webex::{ensure_webhook, ChatClient, Message, WebhookEvent};
use crate::bot::{Dispatcher, Poller};
use crate::config::Config;

/// Shared, read-only handles for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub chat: Arc<dyn ChatClient>,
    pub poller: Arc<Poller>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        chat: Arc<dyn ChatClient>,
        poller: Arc<Poller>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self { config, chat, poller, dispatcher }
    }
}

/// Creates the router. Methods are checked inside the handlers so that wrong
/// methods get a plain-text 400 rather than a 405.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/poll/:target", any(poll_handler))
        .route("/webhook", any(webhook_handler))
        .with_state(state)
}

/// Starts the HTTP server.
pub async fn serve(addr: &str, state: AppState) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);
    axum::serve(listener, create_router(state)).await
}

async fn poll_handler(
    State(state): State<AppState>,
    method: Method,
    Path(target): Path<String>,
) -> Response {
    // Every trigger doubles as a webhook health check
    if let Err(e) = ensure_webhook(
        state.chat.as_ref(),
        &state.config.bot_name,
        &state.config.webhook_url,
    )
    .await
    {
        warn!("Failed to create webhook: {e}");
    }

    if method != Method::GET {
        return (StatusCode::BAD_REQUEST, "Only GETs allowed here.").into_response();
    }

    if target == "all" {
        match state.poller.poll_all().await {
            Ok(summary) => info!(
                "Polled {} room(s), {} failed",
                summary.polled, summary.failed
            ),
            Err(e) => {
                error!("Failed to get rooms: {e}");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Error").into_response();
            }
        }
        return StatusCode::OK.into_response();
    }

    match state.poller.is_known_room(&target) {
        Ok(true) => {
            if let Err(e) = state.poller.poll_leaderboard(&target, true).await {
                warn!("Poll of room {target} failed: {e}");
            }
        }
        Ok(false) => info!("Ignoring poll for unknown room {target}"),
        Err(e) => error!("Failed to look up room {target}: {e}"),
    }
    StatusCode::OK.into_response()
}

async fn webhook_handler(State(state): State<AppState>, method: Method, body: Bytes) -> Response {
    if method != Method::POST {
        return (StatusCode::BAD_REQUEST, "Only POSTs allowed here.").into_response();
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            error!("Failed to decode webhook payload: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Error").into_response();
        }
    };
    let reference = event.data;

    if reference.person_email.eq_ignore_ascii_case(&state.config.bot_email) {
        return (StatusCode::OK, "Success").into_response();
    }

    // Deliveries carry only a reference; the text has to be fetched
    let full = match state.chat.get_message(&reference.id).await {
        Ok(full) => full,
        Err(e) => {
            error!("Could not get message {}: {e}", reference.id);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Error").into_response();
        }
    };

    let message = Message { text: full.text, ..reference };
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        dispatcher.dispatch(&message).await;
    });

    (StatusCode::OK, "Success").into_response()
}
