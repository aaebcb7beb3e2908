//! Persistent SQLite store for room records.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::info;

/// A chat room and the leaderboard it follows.
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub room_id: String,
    pub leaderboard_id: i64,
    /// Session cookie used to read the private leaderboard.
    pub credential: String,
    /// Email of whoever registered the credential.
    pub credential_set_by: String,
    pub last_poll_time: DateTime<Utc>,
    pub last_star_count: u32,
    pub year: i32,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    Poisoned,
}

/// Result of [`Database::claim_poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollClaim {
    /// The poll time was advanced; the caller may fetch.
    Claimed,
    /// The previous poll is younger than the cooldown.
    TooSoon { elapsed: Duration },
    /// No record for this room.
    Unknown,
}

const ROOM_COLUMNS: &str =
    "room_id, leaderboard_id, credential, credential_set_by, last_poll_time, last_star_count, year";

/// Room record store. One row per room, keyed by room id.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create a new in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let db = Self { conn: Mutex::new(Connection::open_in_memory()?) };
        db.init_schema()?;
        Ok(db)
    }

    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Self { conn: Mutex::new(Connection::open(path)?) };
        db.init_schema()?;
        info!("Loaded room store from {:?} ({} rooms)", path, db.room_ids()?.len());
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rooms (
                room_id TEXT PRIMARY KEY,
                leaderboard_id INTEGER NOT NULL,
                credential TEXT NOT NULL,
                credential_set_by TEXT NOT NULL,
                last_poll_time TEXT NOT NULL,
                last_star_count INTEGER NOT NULL DEFAULT 0,
                year INTEGER NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn row_to_room(row: &Row<'_>) -> rusqlite::Result<Room> {
        Ok(Room {
            room_id: row.get(0)?,
            leaderboard_id: row.get(1)?,
            credential: row.get(2)?,
            credential_set_by: row.get(3)?,
            last_poll_time: row.get(4)?,
            last_star_count: row.get(5)?,
            year: row.get(6)?,
        })
    }

    pub fn get_room(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        let conn = self.conn()?;
        Self::get_in(&conn, room_id)
    }

    /// Insert or overwrite the record for `room.room_id`.
    pub fn put_room(&self, room: &Room) -> Result<(), StoreError> {
        self.conn()?.execute(
            &format!(
                "INSERT OR REPLACE INTO rooms ({ROOM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ),
            params![
                room.room_id,
                room.leaderboard_id,
                room.credential,
                room.credential_set_by,
                room.last_poll_time,
                room.last_star_count,
                room.year
            ],
        )?;
        Ok(())
    }

    /// Ids of every registered room, sorted.
    pub fn room_ids(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT room_id FROM rooms ORDER BY room_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Change the year of an existing room. Returns `false` if the room is unknown.
    pub fn update_year(&self, room_id: &str, year: i32) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(mut room) = Self::get_in(&tx, room_id)? else {
            return Ok(false);
        };
        room.year = year;
        tx.execute(
            "UPDATE rooms SET year = ?2 WHERE room_id = ?1",
            params![room.room_id, room.year],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Check the poll cooldown and, if it has passed, record `now` as the poll time.
    ///
    /// Check and write happen in one transaction, so concurrent callers cannot both claim.
    pub fn claim_poll(
        &self,
        room_id: &str,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<PollClaim, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(room) = Self::get_in(&tx, room_id)? else {
            return Ok(PollClaim::Unknown);
        };

        let elapsed = now - room.last_poll_time;
        if elapsed < cooldown {
            return Ok(PollClaim::TooSoon { elapsed });
        }

        tx.execute(
            "UPDATE rooms SET last_poll_time = ?2 WHERE room_id = ?1",
            params![room_id, now],
        )?;
        tx.commit()?;
        Ok(PollClaim::Claimed)
    }

    /// Store a fresh star count and poll time, returning the previous count.
    ///
    /// `None` means the room has no record.
    pub fn record_poll(
        &self,
        room_id: &str,
        stars: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(room) = Self::get_in(&tx, room_id)? else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE rooms SET last_star_count = ?2, last_poll_time = ?3 WHERE room_id = ?1",
            params![room_id, stars, now],
        )?;
        tx.commit()?;
        Ok(Some(room.last_star_count))
    }

    fn get_in(conn: &Connection, room_id: &str) -> Result<Option<Room>, StoreError> {
        Ok(conn
            .query_row(
                &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE room_id = ?1"),
                params![room_id],
                Self::row_to_room,
            )
            .optional()?)
    }
}
