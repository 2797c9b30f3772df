//! Per (user, provider) record of the last completed run.

use calsync_core::ProviderKind;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use serde::Serialize;

use super::{Database, decode_time, encode_time};
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub provider: ProviderKind,
    pub calendar_id: String,
    pub last_sync_at: DateTime<Utc>,
    pub pulled: u32,
    pub pushed: u32,
    pub conflicts: u32,
    pub failures: u32,
    pub partial: bool,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    db: Database,
}

impl CheckpointStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn record(&self, user_id: &str, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sync_checkpoints
                    (user_id, provider, calendar_id, last_sync_at,
                     pulled, pushed, conflicts, failures, partial)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(user_id, provider) DO UPDATE SET
                    calendar_id = excluded.calendar_id,
                    last_sync_at = excluded.last_sync_at,
                    pulled = excluded.pulled,
                    pushed = excluded.pushed,
                    conflicts = excluded.conflicts,
                    failures = excluded.failures,
                    partial = excluded.partial",
                params![
                    user_id,
                    checkpoint.provider.as_str(),
                    checkpoint.calendar_id,
                    encode_time(checkpoint.last_sync_at),
                    checkpoint.pulled,
                    checkpoint.pushed,
                    checkpoint.conflicts,
                    checkpoint.failures,
                    checkpoint.partial,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get(
        &self,
        user_id: &str,
        provider: ProviderKind,
    ) -> Result<Option<Checkpoint>, StoreError> {
        self.db.with_conn(|conn| {
            let raw = conn
                .query_row(
                    "SELECT calendar_id, last_sync_at, pulled, pushed, conflicts, failures, partial
                     FROM sync_checkpoints WHERE user_id = ?1 AND provider = ?2",
                    params![user_id, provider.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, u32>(2)?,
                            row.get::<_, u32>(3)?,
                            row.get::<_, u32>(4)?,
                            row.get::<_, u32>(5)?,
                            row.get::<_, bool>(6)?,
                        ))
                    },
                )
                .optional()?;
            raw.map(
                |(calendar_id, last_sync_at, pulled, pushed, conflicts, failures, partial)| {
                    Ok(Checkpoint {
                        provider,
                        calendar_id,
                        last_sync_at: decode_time("sync_checkpoints.last_sync_at", &last_sync_at)?,
                        pulled,
                        pushed,
                        conflicts,
                        failures,
                        partial,
                    })
                },
            )
            .transpose()
        })
    }

    pub fn delete(&self, user_id: &str, provider: ProviderKind) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM sync_checkpoints WHERE user_id = ?1 AND provider = ?2",
                params![user_id, provider.as_str()],
            )?;
            Ok(())
        })
    }
}
