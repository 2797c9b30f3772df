//! SQLite persistence.
//!
//! One database file holds credentials, links, the reference local entry
//! store and run checkpoints. Every access goes through a single
//! mutex-guarded connection, which serializes writers.

mod checkpoints;
mod credentials;
mod entries;
mod links;

pub use checkpoints::{Checkpoint, CheckpointStore};
pub use credentials::CredentialStore;
pub use entries::{LocalStore, SqliteEntryStore};
pub use links::LinkRegistry;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};
use tracing::debug;

use crate::error::StoreError;

/// Current schema version.
const SCHEMA_VERSION: i64 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle to the calsync database.
#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at `path` and applies migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        debug!(path = %path.display(), "opened database");
        Self::from_connection(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with the connection locked.
    pub(crate) fn with_conn<T, E>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&guard)
    }

    /// Runs `f` inside a transaction, committing when it returns `Ok`.
    pub(crate) fn with_tx<T, E>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = guard.transaction().map_err(StoreError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )?;
    let current: i64 = conn
        .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
        .optional()?
        .unwrap_or(0);

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < SCHEMA_VERSION {
        conn.execute("DELETE FROM schema_version", [])?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [SCHEMA_VERSION],
        )?;
    }
    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS credentials (
            user_id               TEXT NOT NULL,
            provider              TEXT NOT NULL,
            access_token_cipher   TEXT NOT NULL,
            refresh_token_cipher  TEXT,
            expires_at            TEXT,
            scope                 TEXT,
            account_email         TEXT,
            PRIMARY KEY (user_id, provider)
        );

        CREATE TABLE IF NOT EXISTS sync_links (
            user_id               TEXT NOT NULL,
            provider              TEXT NOT NULL,
            local_entry_id        TEXT NOT NULL,
            external_event_id     TEXT NOT NULL,
            external_calendar_id  TEXT,
            version_tag           TEXT,
            last_synced_at        TEXT NOT NULL,
            UNIQUE (user_id, provider, external_event_id),
            UNIQUE (user_id, provider, local_entry_id)
        );

        CREATE TABLE IF NOT EXISTS entries (
            user_id      TEXT NOT NULL,
            id           TEXT NOT NULL,
            title        TEXT NOT NULL,
            start_at     TEXT NOT NULL,
            end_at       TEXT NOT NULL,
            all_day      INTEGER NOT NULL DEFAULT 0,
            location     TEXT,
            body_text    TEXT NOT NULL DEFAULT '',
            updated_at   TEXT NOT NULL,
            source       TEXT NOT NULL DEFAULT 'user',
            deleted_at   TEXT,
            PRIMARY KEY (user_id, id)
        );

        CREATE INDEX IF NOT EXISTS idx_entries_start ON entries(user_id, start_at);

        CREATE TABLE IF NOT EXISTS sync_checkpoints (
            user_id       TEXT NOT NULL,
            provider      TEXT NOT NULL,
            calendar_id   TEXT NOT NULL,
            last_sync_at  TEXT NOT NULL,
            pulled        INTEGER NOT NULL,
            pushed        INTEGER NOT NULL,
            conflicts     INTEGER NOT NULL,
            failures      INTEGER NOT NULL,
            partial       INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (user_id, provider)
        );",
    )?;
    Ok(())
}

/// Timestamps are stored as fixed-width RFC 3339 text, so they sort as strings.
pub(crate) fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn decode_time(column: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::corrupt(column, raw))
}

pub(crate) fn decode_opt_time(
    column: &'static str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(|raw| decode_time(column, &raw)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("calsync.db");

        let db = Database::open(&path).unwrap();
        drop(db);
        let db = Database::open(&path).unwrap();

        let version: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))
                    .map_err(StoreError::from)
            })
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn time_encoding_round_trips() {
        let at = DateTime::parse_from_rfc3339("2024-03-15T09:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(encode_time(at), "2024-03-15T09:30:00.000000000Z");
        assert_eq!(decode_time("t", &encode_time(at)).unwrap(), at);
        assert!(matches!(
            decode_time("t", "yesterday"),
            Err(StoreError::Corrupt { column: "t", .. })
        ));
    }
}
