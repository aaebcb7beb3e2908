use chrono_tz::Tz;
use cron::Schedule;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::bot::leaderboard::SortOrder;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_BOT_NAME: &str = "AdventLeaderBot";
const DEFAULT_YEAR: i32 = 2018;
const DEFAULT_WEBEX_API_URL: &str = "https://webexapis.com/v1";
const DEFAULT_AOC_BASE_URL: &str = "https://adventofcode.com";

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    #[error("{0} environment variable must be set.")]
    Missing(&'static str),
    /// A variable is set but cannot be parsed.
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Webex bot access token.
    pub webex_token: String,
    /// Project identifier; names the room database and the default webhook host.
    pub project_id: String,
    pub port: u16,
    /// Where Webex should deliver message events.
    pub webhook_url: String,
    /// Directory for the room database and logs.
    pub data_dir: PathBuf,
    /// Display name used when the bot is mentioned in a group room.
    pub bot_name: String,
    /// The bot's own sender address; its messages are ignored.
    pub bot_email: String,
    /// Year assigned to newly registered rooms.
    pub default_year: i32,
    pub sort_order: SortOrder,
    /// Optional in-process schedule for polling every room.
    pub poll_schedule: Option<Schedule>,
    pub poll_timezone: Tz,
    /// Room that receives forwarded warnings and errors.
    pub log_room_id: Option<String>,
    pub webex_api_url: String,
    pub aoc_base_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let webex_token = get("WEBEX_TEAMS_TOKEN").ok_or(ConfigError::Missing("WEBEX_TEAMS_TOKEN"))?;
        let project_id = get("PROJECT_ID").ok_or(ConfigError::Missing("PROJECT_ID"))?;

        let port = match get("PORT") {
            Some(p) => p.parse::<u16>().map_err(|e| ConfigError::Invalid {
                name: "PORT",
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let webhook_url = get("DEBUG_BOT_WEBHOOK")
            .unwrap_or_else(|| format!("https://{project_id}.appspot.com/webhook"));

        let bot_name = get("BOT_NAME").unwrap_or_else(|| DEFAULT_BOT_NAME.to_string());
        let bot_email = get("BOT_EMAIL").unwrap_or_else(|| format!("{bot_name}@webex.bot"));

        let default_year = match get("DEFAULT_YEAR") {
            Some(y) => y.parse::<i32>().map_err(|e| ConfigError::Invalid {
                name: "DEFAULT_YEAR",
                reason: e.to_string(),
            })?,
            None => DEFAULT_YEAR,
        };

        let sort_order = match get("LEADERBOARD_SORT") {
            Some(s) => s
                .parse::<SortOrder>()
                .map_err(|reason| ConfigError::Invalid { name: "LEADERBOARD_SORT", reason })?,
            None => SortOrder::default(),
        };

        // cron crate uses 7-field format: sec min hour day month dow year
        let poll_schedule = get("POLL_SCHEDULE")
            .map(|expr| {
                Schedule::from_str(&expr).map_err(|e| ConfigError::Invalid {
                    name: "POLL_SCHEDULE",
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        let poll_timezone = match get("POLL_TIMEZONE") {
            Some(tz) => tz.parse::<Tz>().map_err(|e| ConfigError::Invalid {
                name: "POLL_TIMEZONE",
                reason: e.to_string(),
            })?,
            None => Tz::UTC,
        };

        Ok(Self {
            webex_token,
            project_id,
            port,
            webhook_url,
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".")),
            bot_name,
            bot_email,
            default_year,
            sort_order,
            poll_schedule,
            poll_timezone,
            log_room_id: get("LOG_ROOM_ID"),
            webex_api_url: get("WEBEX_API_URL")
                .unwrap_or_else(|| DEFAULT_WEBEX_API_URL.to_string()),
            aoc_base_url: get("AOC_BASE_URL").unwrap_or_else(|| DEFAULT_AOC_BASE_URL.to_string()),
        })
    }

    /// Path of the SQLite file holding room records.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.db", self.project_id))
    }

    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    const REQUIRED: [(&str, &str); 2] = [("WEBEX_TEAMS_TOKEN", "secret"), ("PROJECT_ID", "advent-bot")];

    #[test]
    fn test_defaults() {
        let config = load(&REQUIRED).expect("should load minimal config");
        assert_eq!(config.port, 8080);
        assert_eq!(config.webhook_url, "https://advent-bot.appspot.com/webhook");
        assert_eq!(config.bot_name, "AdventLeaderBot");
        assert_eq!(config.bot_email, "AdventLeaderBot@webex.bot");
        assert_eq!(config.default_year, 2018);
        assert_eq!(config.sort_order, SortOrder::LocalScore);
        assert!(config.poll_schedule.is_none());
        assert_eq!(config.poll_timezone, Tz::UTC);
        assert_eq!(config.database_path(), PathBuf::from("./advent-bot.db"));
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_missing_token() {
        let err = assert_err(load(&[("PROJECT_ID", "advent-bot")]));
        assert!(matches!(err, ConfigError::Missing("WEBEX_TEAMS_TOKEN")));
        assert!(err.to_string().contains("WEBEX_TEAMS_TOKEN"));
    }

    #[test]
    fn test_empty_project_counts_as_missing() {
        let err = assert_err(load(&[("WEBEX_TEAMS_TOKEN", "secret"), ("PROJECT_ID", "  ")]));
        assert!(matches!(err, ConfigError::Missing("PROJECT_ID")));
    }

    #[test]
    fn test_overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("PORT", "9000"),
            ("DEBUG_BOT_WEBHOOK", "https://example.ngrok.io/webhook"),
            ("BOT_NAME", "StarBot"),
            ("DEFAULT_YEAR", "2023"),
            ("LEADERBOARD_SORT", "stars"),
            ("POLL_SCHEDULE", "0 */15 * * * * *"),
            ("POLL_TIMEZONE", "America/New_York"),
            ("LOG_ROOM_ID", "log-room"),
            ("DATA_DIR", "/var/lib/leaderbot"),
        ]);
        let config = load(&vars).expect("should load");
        assert_eq!(config.port, 9000);
        assert_eq!(config.webhook_url, "https://example.ngrok.io/webhook");
        assert_eq!(config.bot_email, "StarBot@webex.bot");
        assert_eq!(config.default_year, 2023);
        assert_eq!(config.sort_order, SortOrder::Stars);
        assert!(config.poll_schedule.is_some());
        assert_eq!(config.poll_timezone, chrono_tz::America::New_York);
        assert_eq!(config.log_room_id.as_deref(), Some("log-room"));
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/leaderbot/advent-bot.db")
        );
    }

    #[test]
    fn test_invalid_port() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("PORT", "eighty"));
        let err = assert_err(load(&vars));
        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));
    }

    #[test]
    fn test_invalid_schedule() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("POLL_SCHEDULE", "every five minutes"));
        let err = assert_err(load(&vars));
        assert!(matches!(err, ConfigError::Invalid { name: "POLL_SCHEDULE", .. }));
    }

    #[test]
    fn test_invalid_timezone() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("POLL_TIMEZONE", "Mars/Olympus_Mons"));
        let err = assert_err(load(&vars));
        assert!(matches!(err, ConfigError::Invalid { name: "POLL_TIMEZONE", .. }));
    }

    #[test]
    fn test_invalid_sort_order() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("LEADERBOARD_SORT", "alphabetical"));
        let err = assert_err(load(&vars));
        assert!(matches!(err, ConfigError::Invalid { name: "LEADERBOARD_SORT", .. }));
    }
}
