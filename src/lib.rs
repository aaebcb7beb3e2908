//! leaderbot - posts Advent of Code private leaderboard updates to Webex rooms.

pub mod bot;
pub mod chat_log;
pub mod config;
pub mod scheduler;
pub mod server;
