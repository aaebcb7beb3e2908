//! Leaderboard polling and room updates.

use std::fmt::Write;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::bot::database::{Database, StoreError};
use crate::bot::leaderboard::{total_stars, Leaderboard, LeaderboardError, Member, SortOrder};
use crate::bot::webex::{send_reply, ChatClient};

const FETCH_FAILED_NOTICE: &str =
    "Retrieving the leaderboard failed. Please check the validity of the session cookie.";

#[derive(Debug, Error)]
pub enum PollError {
    #[error("room {0} is not registered")]
    UnknownRoom(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Leaderboard(#[from] LeaderboardError),
}

/// What a successful poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    pub previous_stars: u32,
    pub stars: u32,
    pub posted: bool,
}

/// Counts from [`Poller::poll_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub polled: usize,
    pub failed: usize,
}

pub struct Poller {
    database: Arc<Database>,
    leaderboard: Arc<dyn Leaderboard>,
    chat: Arc<dyn ChatClient>,
    sort_order: SortOrder,
}

impl Poller {
    pub fn new(
        database: Arc<Database>,
        leaderboard: Arc<dyn Leaderboard>,
        chat: Arc<dyn ChatClient>,
        sort_order: SortOrder,
    ) -> Self {
        Self { database, leaderboard, chat, sort_order }
    }

    /// Fetch the room's leaderboard, store the new star total and post the
    /// standings if the total changed or `force_post` is set.
    pub async fn poll_leaderboard(
        &self,
        room_id: &str,
        force_post: bool,
    ) -> Result<PollOutcome, PollError> {
        let room = self
            .database
            .get_room(room_id)?
            .ok_or_else(|| PollError::UnknownRoom(room_id.to_string()))?;

        let members = match self
            .leaderboard
            .members(room.leaderboard_id, &room.credential, room.year, self.sort_order)
            .await
        {
            Ok(members) => members,
            Err(e) => {
                warn!("Get leaderboard {} for room {room_id} failed: {e}", room.leaderboard_id);
                send_reply(self.chat.as_ref(), room_id, FETCH_FAILED_NOTICE).await;
                return Err(e.into());
            }
        };

        let stars = total_stars(&members);
        let previous_stars = self
            .database
            .record_poll(room_id, stars, Utc::now())?
            .ok_or_else(|| PollError::UnknownRoom(room_id.to_string()))?;

        let posted = stars != previous_stars || force_post;
        if posted {
            send_reply(self.chat.as_ref(), room_id, &format_leaderboard(room.year, &members)).await;
        }

        info!(
            "⭐ Polled room {room_id}: {previous_stars} -> {stars} stars{}",
            if posted { ", posted" } else { "" }
        );
        Ok(PollOutcome { previous_stars, stars, posted })
    }

    /// Poll every registered room without forcing a post.
    ///
    /// Per-room failures are logged and counted; only failing to list rooms is an error.
    pub async fn poll_all(&self) -> Result<PollSummary, PollError> {
        let room_ids = self.database.room_ids()?;
        let mut summary = PollSummary::default();

        for room_id in &room_ids {
            summary.polled += 1;
            if let Err(e) = self.poll_leaderboard(room_id, false).await {
                error!("Poll of room {room_id} failed: {e}");
                summary.failed += 1;
            }
        }

        Ok(summary)
    }

    pub fn is_known_room(&self, room_id: &str) -> Result<bool, PollError> {
        Ok(self.database.get_room(room_id)?.is_some())
    }
}

/// Render standings as a markdown list, in the order given.
pub fn format_leaderboard(year: i32, members: &[Member]) -> String {
    let mut message = format!("### Leaderboard 🎄 {year}\n\n");
    for m in members {
        let _ = write!(
            message,
            " 1. {} – **{}** ⭐ {}",
            m.display_name(),
            m.local_score,
            m.stars
        );
        if m.global_score > 0 {
            let _ = write!(message, " (🌍 _{}_!)", m.global_score);
        }
        message.push('\n');
    }
    message
}
