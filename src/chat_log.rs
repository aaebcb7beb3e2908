//! Tracing layer that forwards warnings and errors to a chat room.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::bot::ChatClient;

/// Webex rejects messages above roughly 7 KB.
const MAX_LOG_CHARS: usize = 4000;

/// Events from these targets are never forwarded.
const SKIPPED_TARGETS: [&str; 2] = ["leaderbot::bot::webex", "leaderbot::chat_log"];

pub struct ChatLogLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl ChatLogLayer {
    /// Must be called from within a tokio runtime.
    pub fn new(chat: Arc<dyn ChatClient>, room_id: String) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(e) = chat.send_message(&room_id, &text).await {
                    eprintln!("Failed to send log to chat: {e}");
                }
            }
        });

        Self { tx }
    }
}

/// Prefix and truncate a log line for the log room.
pub fn format_log_line(level: Level, message: &str) -> Option<String> {
    let prefix = match level {
        Level::ERROR => "❌",
        Level::WARN => "⚠️",
        _ => return None,
    };
    let text = if message.chars().count() > MAX_LOG_CHARS {
        let truncated: String = message.chars().take(MAX_LOG_CHARS).collect();
        format!("{truncated}...")
    } else {
        message.to_string()
    };
    Some(format!("{prefix} {text}"))
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message
                .push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for ChatLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if SKIPPED_TARGETS.iter().any(|t| metadata.target().starts_with(t)) {
            return;
        }

        let mut visitor = MessageVisitor { message: String::new() };
        event.record(&mut visitor);

        let Some(line) = format_log_line(*metadata.level(), &visitor.message) else {
            return;
        };
        if self.tx.send(line).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
