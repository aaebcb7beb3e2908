//! Advent of Code private leaderboard client.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// One competitor on a private leaderboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    /// Empty for anonymous users.
    pub name: String,
    pub local_score: u32,
    pub global_score: u32,
    pub stars: u32,
}

impl Member {
    /// Name shown in room updates; anonymous users fall back to their id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

/// Order in which members are returned by a [`Leaderboard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    LocalScore,
    Stars,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" | "local_score" => Ok(SortOrder::LocalScore),
            "stars" => Ok(SortOrder::Stars),
            other => Err(format!("unknown sort order '{other}'. Use local or stars")),
        }
    }
}

/// Sort members in place. Ties fall through to the other score, then the id.
pub fn sort_members(members: &mut [Member], order: SortOrder) {
    match order {
        SortOrder::LocalScore => members.sort_by(|a, b| {
            (Reverse(a.local_score), Reverse(a.stars), &a.id)
                .cmp(&(Reverse(b.local_score), Reverse(b.stars), &b.id))
        }),
        SortOrder::Stars => members.sort_by(|a, b| {
            (Reverse(a.stars), Reverse(a.local_score), &a.id)
                .cmp(&(Reverse(b.stars), Reverse(b.local_score), &b.id))
        }),
    }
}

pub fn total_stars(members: &[Member]) -> u32 {
    members.iter().map(|m| m.stars).sum()
}

#[derive(Debug, Error)]
pub enum LeaderboardError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("leaderboard API returned {0}")]
    Status(reqwest::StatusCode),
    /// Usually an expired session cookie: the site answers with a login page.
    #[error("failed to parse leaderboard: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Source of leaderboard standings.
#[async_trait]
pub trait Leaderboard: Send + Sync {
    async fn members(
        &self,
        leaderboard_id: i64,
        credential: &str,
        year: i32,
        order: SortOrder,
    ) -> Result<Vec<Member>, LeaderboardError>;
}

#[derive(Deserialize)]
struct ApiLeaderboard {
    members: HashMap<String, ApiMember>,
}

#[derive(Deserialize)]
struct ApiMember {
    id: ApiMemberId,
    name: Option<String>,
    #[serde(default)]
    local_score: u32,
    #[serde(default)]
    global_score: u32,
    #[serde(default)]
    stars: u32,
}

// Older years serve ids as strings, newer ones as numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum ApiMemberId {
    Number(u64),
    Text(String),
}

impl From<ApiMemberId> for String {
    fn from(id: ApiMemberId) -> Self {
        match id {
            ApiMemberId::Number(n) => n.to_string(),
            ApiMemberId::Text(s) => s,
        }
    }
}

/// Parse the private leaderboard JSON document into members, unsorted.
pub fn parse_members(body: &str) -> Result<Vec<Member>, LeaderboardError> {
    let parsed: ApiLeaderboard = serde_json::from_str(body)?;
    Ok(parsed
        .members
        .into_values()
        .map(|m| Member {
            id: m.id.into(),
            name: m.name.unwrap_or_default(),
            local_score: m.local_score,
            global_score: m.global_score,
            stars: m.stars,
        })
        .collect())
}

/// HTTP client for `adventofcode.com`.
pub struct AocClient {
    base_url: String,
    http: reqwest::Client,
}

impl AocClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, LeaderboardError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("leaderbot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl Leaderboard for AocClient {
    async fn members(
        &self,
        leaderboard_id: i64,
        credential: &str,
        year: i32,
        order: SortOrder,
    ) -> Result<Vec<Member>, LeaderboardError> {
        let url = format!(
            "{}/{}/leaderboard/private/view/{}.json",
            self.base_url, year, leaderboard_id
        );

        let response = self
            .http
            .get(&url)
            .header(reqwest::header::COOKIE, format!("session={credential}"))
            .send()
            .await?;

        let status = response.status();
        debug!("Leaderboard response status: {status}");
        if !status.is_success() {
            return Err(LeaderboardError::Status(status));
        }

        let body = response.text().await?;
        let mut members = parse_members(&body)?;
        sort_members(&mut members, order);
        Ok(members)
    }
}
