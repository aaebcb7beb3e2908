//! Bot core - room records, leaderboard polling and chat commands.

pub mod commands;
pub mod database;
pub mod leaderboard;
pub mod poller;
pub mod webex;


pub use commands::{Command, Dispatcher};
pub use database::{Database, Room};
pub use leaderboard::{AocClient, Leaderboard, Member, SortOrder};
pub use poller::Poller;
pub use webex::{ChatClient, WebexClient};
