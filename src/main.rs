use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::prelude::*;

use leaderbot::bot::{AocClient, ChatClient, Database, Dispatcher, Poller, WebexClient};
use leaderbot::chat_log::ChatLogLayer;
use leaderbot::config::Config;
use leaderbot::scheduler;
use leaderbot::server::{self, AppState};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let webex: Arc<dyn ChatClient> =
        match WebexClient::new(config.webex_token.clone(), config.webex_api_url.clone()) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                eprintln!("Failed to build Webex client: {e}");
                std::process::exit(1);
            }
        };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("leaderbot.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file: {e}");
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(ref log_room_id) = config.log_room_id {
        let chat_layer = ChatLogLayer::new(webex.clone(), log_room_id.clone());
        registry.with(chat_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting leaderbot...");
    info!("Project: {}, webhook target: {}", config.project_id, config.webhook_url);

    let database = match Database::open(&config.database_path()) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to open room store: {e}");
            std::process::exit(1);
        }
    };

    let aoc = match AocClient::new(config.aoc_base_url.clone()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to build leaderboard client: {e}");
            std::process::exit(1);
        }
    };

    let poller = Arc::new(Poller::new(
        database.clone(),
        aoc,
        webex.clone(),
        config.sort_order,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        database,
        webex.clone(),
        poller.clone(),
        config.bot_name.clone(),
        config.default_year,
    ));

    if let Some(ref schedule) = config.poll_schedule {
        info!("Polling all rooms on schedule '{schedule}' ({})", config.poll_timezone);
        scheduler::spawn(poller.clone(), schedule.clone(), config.poll_timezone);
    }

    let state = AppState::new(config.clone(), webex, poller, dispatcher);
    if let Err(e) = server::serve(&config.bind_address(), state).await {
        error!("Server error: {e}");
        std::process::exit(1);
    }
}
