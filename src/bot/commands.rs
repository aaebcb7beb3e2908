//! Chat command parsing and dispatch.

use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{error, info};

use crate::bot::database::{Database, PollClaim, Room};
use crate::bot::poller::Poller;
use crate::bot::webex::{send_reply, ChatClient, Message};

/// Minimum time between user-requested polls of one room.
pub const POLL_COOLDOWN_SECS: i64 = 60;

const NOT_REGISTERED: &str =
    "There is no leaderboard registered for this room yet. See `help` for how to `register` one.";
const STORE_FAILED: &str = "Something went wrong while saving the settings. Please try again later.";

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register { leaderboard_id: i64, credential: String },
    Poll,
    Year(i32),
    Help,
    /// Anything else, including an empty message.
    Unknown(String),
}

/// Malformed command arguments. The message is sent back to the room as is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("Please specify the Advent of Code *leaderboard ID* and *API key*. See `help` for detailed usage")]
    RegisterArgs,
    #[error("Leaderboard ID {0} seems to be an invalid integer")]
    LeaderboardId(String),
    #[error("Please specify a year, e.g. `year 2020`.")]
    MissingYear,
    #[error("{0} is not a valid year (or at least integer).")]
    Year(String),
}

impl Command {
    /// Parse message text that has already had any bot mention removed.
    pub fn parse(text: &str) -> Result<Self, UsageError> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        match fields.as_slice() {
            ["register", args @ ..] => match args {
                [id, credential] => {
                    let leaderboard_id = id
                        .parse::<i64>()
                        .map_err(|_| UsageError::LeaderboardId(id.to_string()))?;
                    Ok(Command::Register {
                        leaderboard_id,
                        credential: credential.to_string(),
                    })
                }
                _ => Err(UsageError::RegisterArgs),
            },
            ["poll", ..] => Ok(Command::Poll),
            ["year"] => Err(UsageError::MissingYear),
            ["year", year, ..] => year
                .parse::<i32>()
                .map(Command::Year)
                .map_err(|_| UsageError::Year(year.to_string())),
            ["help", ..] => Ok(Command::Help),
            _ => Ok(Command::Unknown(text.to_string())),
        }
    }
}

/// Drop a leading mention of the bot, as Webex prefixes it in group rooms.
pub fn strip_mention(text: &str, bot_name: &str) -> String {
    let mut fields = text.split_whitespace().peekable();
    if fields
        .peek()
        .is_some_and(|first| first.trim_start_matches('@').eq_ignore_ascii_case(bot_name))
    {
        fields.next();
    }
    fields.collect::<Vec<_>>().join(" ")
}

/// Routes chat messages to command handlers.
pub struct Dispatcher {
    database: Arc<Database>,
    chat: Arc<dyn ChatClient>,
    poller: Arc<Poller>,
    bot_name: String,
    default_year: i32,
}

impl Dispatcher {
    pub fn new(
        database: Arc<Database>,
        chat: Arc<dyn ChatClient>,
        poller: Arc<Poller>,
        bot_name: impl Into<String>,
        default_year: i32,
    ) -> Self {
        Self {
            database,
            chat,
            poller,
            bot_name: bot_name.into(),
            default_year,
        }
    }

    /// Handle one inbound message. `message.text` must be the full message text.
    pub async fn dispatch(&self, message: &Message) {
        let text = strip_mention(&message.text, &self.bot_name);
        let room_id = message.room_id.as_str();

        let command = match Command::parse(&text) {
            Ok(command) => command,
            Err(usage) => {
                info!("Usage error in room {room_id}: {usage}");
                self.reply(room_id, &usage.to_string()).await;
                return;
            }
        };

        match command {
            Command::Register { leaderboard_id, credential } => {
                self.register(message, leaderboard_id, credential).await
            }
            Command::Poll => self.poll(room_id).await,
            Command::Year(year) => self.year(room_id, year).await,
            Command::Help => self.help(room_id).await,
            Command::Unknown(text) => info!("Invalid command in room {room_id}: {text:?}"),
        }
    }

    async fn reply(&self, room_id: &str, text: &str) {
        send_reply(self.chat.as_ref(), room_id, text).await;
    }

    async fn register(&self, message: &Message, leaderboard_id: i64, credential: String) {
        info!("📝 Register leaderboard {leaderboard_id} for room {}", message.room_id);
        let room = Room {
            room_id: message.room_id.clone(),
            leaderboard_id,
            credential,
            credential_set_by: message.person_email.clone(),
            last_poll_time: Utc::now(),
            last_star_count: 0,
            year: self.default_year,
        };

        match self.database.put_room(&room) {
            Ok(()) => self.reply(&room.room_id, "The leaderboard ID and API key were stored").await,
            Err(e) => {
                error!("Failed to save room {}: {e}", room.room_id);
                self.reply(&room.room_id, STORE_FAILED).await;
            }
        }
    }

    async fn poll(&self, room_id: &str) {
        info!("🔄 Poll requested for room {room_id}");
        let cooldown = Duration::seconds(POLL_COOLDOWN_SECS);

        match self.database.claim_poll(room_id, Utc::now(), cooldown) {
            Ok(PollClaim::Claimed) => {
                if let Err(e) = self.poller.poll_leaderboard(room_id, true).await {
                    error!("Requested poll of room {room_id} failed: {e}");
                }
            }
            Ok(PollClaim::TooSoon { elapsed }) => {
                info!("Poll for room {room_id} refused, last one {}s ago", elapsed.num_seconds());
                self.reply(room_id, "Your last poll was less than 1 minute ago...").await;
            }
            Ok(PollClaim::Unknown) => self.reply(room_id, NOT_REGISTERED).await,
            Err(e) => error!("Failed to check poll time for room {room_id}: {e}"),
        }
    }

    async fn year(&self, room_id: &str, year: i32) {
        info!("📅 Set year {year} for room {room_id}");
        match self.database.update_year(room_id, year) {
            Ok(true) => {
                self.reply(room_id, &format!("The year was changed to {year} for this room."))
                    .await
            }
            Ok(false) => self.reply(room_id, NOT_REGISTERED).await,
            Err(e) => {
                error!("Failed to change year for room {room_id}: {e}");
                self.reply(room_id, STORE_FAILED).await;
            }
        }
    }

    async fn help(&self, room_id: &str) {
        let mut message = help_text(&self.bot_name);
        match self.database.get_room(room_id) {
            Ok(Some(room)) => message.push_str(&format!(
                "\n\nThe current leaderboard is \
                 [{id}](https://adventofcode.com/{year}/leaderboard/private/view/{id}), set by {by}.",
                id = room.leaderboard_id,
                year = room.year,
                by = room.credential_set_by
            )),
            Ok(None) => message.push_str(" *(There are no settings found for this room, BTW.)*\n"),
            Err(e) => error!("Failed to load room {room_id} for help: {e}"),
        }
        self.reply(room_id, &message).await;
    }
}

fn help_text(bot_name: &str) -> String {
    format!(
        "Hi, this is the [Advent of Code](https://adventofcode.com/) chatbot! 🎄 \
         Say `register` to me, followed by the Advent of Code leaderboard ID and session cookie, to \
         register this room to a certain leaderboard. Eg. `@{bot_name} register 12345 46c281...` \
         *You can delete the message afterwards if you're afraid someone will steal your cookie. 🍪*\n\n\
         Say `year` followed by a year to follow an earlier event, eg. `year 2019`.\n\n\
         The leaderboard will be checked regularly for changes, but you can poll the current \
         status earlier by saying `poll` to me. **Have fun!**"
    )
}
