//! Local entry storage.
//!
//! The engine talks to the user's entries through [`LocalStore`]. The
//! SQLite-backed [`SqliteEntryStore`] is the reference implementation used
//! by the CLI; embedders with their own entry table implement the trait.

use calsync_core::{EntrySource, LocalEntry, TimeWindow};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{Database, decode_opt_time, decode_time, encode_time};
use crate::error::StoreError;

/// Read and conditional-write access to one user's entries.
pub trait LocalStore: Send + Sync {
    /// Non-tombstoned entries whose start lies in `window`.
    fn list_in_window(&self, window: TimeWindow) -> Result<Vec<LocalEntry>, StoreError>;

    /// Looks an entry up by id, tombstoned entries included.
    fn get(&self, id: &str) -> Result<Option<LocalEntry>, StoreError>;

    fn insert(&self, entry: &LocalEntry) -> Result<(), StoreError>;

    /// Overwrites every field of a live entry whose stored `updated_at` is
    /// still `expected_updated_at`.
    ///
    /// Returns false if the entry is absent, tombstoned, or was changed
    /// since it was read; nothing is written then.
    fn update(
        &self,
        entry: &LocalEntry,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Soft-deletes an entry. Returns false if absent or already tombstoned.
    fn tombstone(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError>;
}

const ENTRY_COLUMNS: &str =
    "id, title, start_at, end_at, all_day, location, body_text, updated_at, source, deleted_at";

#[derive(Debug, Clone)]
pub struct SqliteEntryStore {
    db: Database,
    user_id: String,
}

impl SqliteEntryStore {
    pub fn new(db: Database, user_id: impl Into<String>) -> Self {
        Self {
            db,
            user_id: user_id.into(),
        }
    }
}

impl LocalStore for SqliteEntryStore {
    fn list_in_window(&self, window: TimeWindow) -> Result<Vec<LocalEntry>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {ENTRY_COLUMNS} FROM entries
                 WHERE user_id = ?1 AND deleted_at IS NULL
                   AND start_at >= ?2 AND start_at < ?3
                 ORDER BY start_at, id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![
                        self.user_id,
                        encode_time(window.start),
                        encode_time(window.end)
                    ],
                    RawEntry::from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(RawEntry::decode).collect()
        })
    }

    fn get(&self, id: &str) -> Result<Option<LocalEntry>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE user_id = ?1 AND id = ?2");
            let raw = conn
                .query_row(&sql, params![self.user_id, id], RawEntry::from_row)
                .optional()?;
            raw.map(RawEntry::decode).transpose()
        })
    }

    fn insert(&self, entry: &LocalEntry) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO entries
                    (user_id, id, title, start_at, end_at, all_day, location,
                     body_text, updated_at, source, deleted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    self.user_id,
                    entry.id,
                    entry.title,
                    encode_time(entry.start_at),
                    encode_time(entry.end_at),
                    entry.all_day,
                    entry.location,
                    entry.body_text,
                    encode_time(entry.updated_at),
                    entry.source.as_str(),
                    entry.deleted_at.map(encode_time),
                ],
            )?;
            Ok(())
        })
    }

    fn update(
        &self,
        entry: &LocalEntry,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE entries SET
                    title = ?3, start_at = ?4, end_at = ?5, all_day = ?6,
                    location = ?7, body_text = ?8, updated_at = ?9, source = ?10,
                    deleted_at = ?11
                 WHERE user_id = ?1 AND id = ?2
                   AND updated_at = ?12 AND deleted_at IS NULL",
                params![
                    self.user_id,
                    entry.id,
                    entry.title,
                    encode_time(entry.start_at),
                    encode_time(entry.end_at),
                    entry.all_day,
                    entry.location,
                    entry.body_text,
                    encode_time(entry.updated_at),
                    entry.source.as_str(),
                    entry.deleted_at.map(encode_time),
                    encode_time(expected_updated_at),
                ],
            )?;
            Ok(n > 0)
        })
    }

    fn tombstone(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE entries SET deleted_at = ?3
                 WHERE user_id = ?1 AND id = ?2 AND deleted_at IS NULL",
                params![self.user_id, id, encode_time(at)],
            )?;
            Ok(n > 0)
        })
    }
}

struct RawEntry {
    id: String,
    title: String,
    start_at: String,
    end_at: String,
    all_day: bool,
    location: Option<String>,
    body_text: String,
    updated_at: String,
    source: String,
    deleted_at: Option<String>,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            start_at: row.get(2)?,
            end_at: row.get(3)?,
            all_day: row.get(4)?,
            location: row.get(5)?,
            body_text: row.get(6)?,
            updated_at: row.get(7)?,
            source: row.get(8)?,
            deleted_at: row.get(9)?,
        })
    }

    fn decode(self) -> Result<LocalEntry, StoreError> {
        let source = self
            .source
            .parse::<EntrySource>()
            .map_err(|_| StoreError::corrupt("entries.source", &self.source))?;
        Ok(LocalEntry {
            id: self.id,
            title: self.title,
            start_at: decode_time("entries.start_at", &self.start_at)?,
            end_at: decode_time("entries.end_at", &self.end_at)?,
            all_day: self.all_day,
            location: self.location,
            body_text: self.body_text,
            updated_at: decode_time("entries.updated_at", &self.updated_at)?,
            source,
            deleted_at: decode_opt_time("entries.deleted_at", self.deleted_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn store() -> SqliteEntryStore {
        SqliteEntryStore::new(Database::open_in_memory().unwrap(), "u1")
    }

    #[test]
    fn list_in_window_filters_by_start_and_tombstone() {
        let store = store();
        let early = LocalEntry::new("a", "Before", at(14, 9), at(14, 10), at(1, 0));
        let inside = LocalEntry::new("b", "Inside", at(15, 9), at(15, 10), at(1, 0))
            .with_location("Room 4")
            .with_body("notes");
        let deleted = LocalEntry::new("c", "Deleted", at(15, 11), at(15, 12), at(1, 0));
        let late = LocalEntry::new("d", "After", at(16, 0), at(16, 1), at(1, 0));
        for entry in [&early, &inside, &deleted, &late] {
            store.insert(entry).unwrap();
        }
        assert!(store.tombstone("c", at(2, 0)).unwrap());

        let window = TimeWindow::new(at(15, 0), at(16, 0));
        let listed = store.list_in_window(window).unwrap();
        assert_eq!(listed, vec![inside]);
    }

    #[test]
    fn get_returns_tombstoned_entries() {
        let store = store();
        store
            .insert(&LocalEntry::new("a", "Standup", at(15, 9), at(15, 10), at(1, 0)))
            .unwrap();
        assert!(store.tombstone("a", at(2, 0)).unwrap());
        assert!(!store.tombstone("a", at(3, 0)).unwrap());

        let entry = store.get("a").unwrap().unwrap();
        assert_eq!(entry.deleted_at, Some(at(2, 0)));
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn update_overwrites_fields() {
        let store = store();
        let mut entry = LocalEntry::new("a", "Standup", at(15, 9), at(15, 10), at(1, 0));
        store.insert(&entry).unwrap();

        entry.title = "Retro".to_string();
        entry.all_day = true;
        entry.source = EntrySource::Calendar;
        entry.updated_at = at(1, 0) + Duration::minutes(3);
        assert!(store.update(&entry, at(1, 0)).unwrap());
        assert_eq!(store.get("a").unwrap(), Some(entry));

        let ghost = LocalEntry::new("zz", "Ghost", at(15, 9), at(15, 10), at(1, 0));
        assert!(!store.update(&ghost, at(1, 0)).unwrap());
    }

    #[test]
    fn update_leaves_entries_changed_since_read() {
        let store = store();
        let read = LocalEntry::new("a", "Standup", at(15, 9), at(15, 10), at(1, 0));
        store.insert(&read).unwrap();

        let mut edited = read.clone();
        edited.title = "Standup (moved)".to_string();
        edited.updated_at = at(2, 0);
        assert!(store.update(&edited, read.updated_at).unwrap());

        let mut stale = read.clone();
        stale.title = "From the provider".to_string();
        stale.updated_at = at(1, 12);
        assert!(!store.update(&stale, read.updated_at).unwrap());
        assert_eq!(store.get("a").unwrap(), Some(edited.clone()));

        assert!(store.tombstone("a", at(3, 0)).unwrap());
        assert!(!store.update(&stale, edited.updated_at).unwrap());
        assert!(store.get("a").unwrap().unwrap().is_tombstoned());
    }
}
