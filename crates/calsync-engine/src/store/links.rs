//! The link registry: durable local entry to provider event mapping.
//!
//! Within one (user, provider) the mapping is a bijection. The UNIQUE
//! constraints enforce it at the storage level; [`LinkRegistry::upsert`]
//! checks it first so a violation surfaces as [`SyncError::LinkConflict`]
//! rather than a raw constraint error.

use calsync_core::{ProviderKind, SyncLink};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, warn};

use super::{Database, decode_time, encode_time};
use crate::error::{StoreError, SyncError, SyncResult};

const LINK_COLUMNS: &str = "local_entry_id, provider, external_event_id, external_calendar_id, \
                            version_tag, last_synced_at";

/// Link registry scoped to one user.
#[derive(Debug, Clone)]
pub struct LinkRegistry {
    db: Database,
    user_id: String,
}

impl LinkRegistry {
    pub fn new(db: Database, user_id: impl Into<String>) -> Self {
        Self {
            db,
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn find_by_external_id(
        &self,
        provider: ProviderKind,
        external_id: &str,
    ) -> Result<Option<SyncLink>, StoreError> {
        self.db.with_conn(|conn| {
            find_one(
                conn,
                &self.user_id,
                provider,
                "external_event_id",
                external_id,
            )
        })
    }

    pub fn find_by_local_id(
        &self,
        provider: ProviderKind,
        local_entry_id: &str,
    ) -> Result<Option<SyncLink>, StoreError> {
        self.db.with_conn(|conn| {
            find_one(
                conn,
                &self.user_id,
                provider,
                "local_entry_id",
                local_entry_id,
            )
        })
    }

    /// Creates the link, or refreshes the metadata of an already-bound pair.
    ///
    /// Fails with [`SyncError::LinkConflict`] if either side is already
    /// linked to something else.
    pub fn upsert(&self, link: &SyncLink) -> SyncResult<()> {
        self.db.with_tx(|tx| {
            let by_local = find_one(
                tx,
                &self.user_id,
                link.provider,
                "local_entry_id",
                &link.local_entry_id,
            )?;
            if let Some(existing) =
                by_local.filter(|l| l.external_event_id != link.external_event_id)
            {
                return Err(conflict(
                    link,
                    format!(
                        "entry already linked to event {}",
                        existing.external_event_id
                    ),
                ));
            }

            let by_external = find_one(
                tx,
                &self.user_id,
                link.provider,
                "external_event_id",
                &link.external_event_id,
            )?;
            if let Some(existing) =
                by_external.filter(|l| l.local_entry_id != link.local_entry_id)
            {
                return Err(conflict(
                    link,
                    format!("event already linked to entry {}", existing.local_entry_id),
                ));
            }

            tx.execute(
                "INSERT INTO sync_links
                    (user_id, provider, local_entry_id, external_event_id,
                     external_calendar_id, version_tag, last_synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(user_id, provider, local_entry_id) DO UPDATE SET
                    external_calendar_id = excluded.external_calendar_id,
                    version_tag = excluded.version_tag,
                    last_synced_at = excluded.last_synced_at",
                params![
                    self.user_id,
                    link.provider.as_str(),
                    link.local_entry_id,
                    link.external_event_id,
                    link.external_calendar_id,
                    link.version_tag,
                    encode_time(link.last_synced_at),
                ],
            )
            .map_err(StoreError::from)?;
            debug!(
                provider = %link.provider,
                local = %link.local_entry_id,
                external = %link.external_event_id,
                "link stored"
            );
            Ok(())
        })
    }

    /// Removes the link for the pair. Returns true if it existed.
    pub fn remove(&self, link: &SyncLink) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM sync_links
                 WHERE user_id = ?1 AND provider = ?2
                   AND local_entry_id = ?3 AND external_event_id = ?4",
                params![
                    self.user_id,
                    link.provider.as_str(),
                    link.local_entry_id,
                    link.external_event_id
                ],
            )?;
            Ok(n > 0)
        })
    }

    /// All links of the user for one provider.
    pub fn list(&self, provider: ProviderKind) -> Result<Vec<SyncLink>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {LINK_COLUMNS} FROM sync_links
                 WHERE user_id = ?1 AND provider = ?2 ORDER BY local_entry_id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![self.user_id, provider.as_str()], RawLink::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(RawLink::decode).collect()
        })
    }

    /// Drops every link of the user for one provider. Returns how many.
    pub fn remove_all(&self, provider: ProviderKind) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM sync_links WHERE user_id = ?1 AND provider = ?2",
                params![self.user_id, provider.as_str()],
            )?;
            Ok(n)
        })
    }
}

fn conflict(link: &SyncLink, reason: String) -> SyncError {
    warn!(
        provider = %link.provider,
        local = %link.local_entry_id,
        external = %link.external_event_id,
        %reason,
        "link conflict"
    );
    SyncError::LinkConflict {
        provider: link.provider,
        local_entry_id: link.local_entry_id.clone(),
        external_event_id: link.external_event_id.clone(),
        reason,
    }
}

/// `column` is one of the two fixed key column names, never caller input.
fn find_one(
    conn: &Connection,
    user_id: &str,
    provider: ProviderKind,
    column: &'static str,
    value: &str,
) -> Result<Option<SyncLink>, StoreError> {
    let sql = format!(
        "SELECT {LINK_COLUMNS} FROM sync_links
         WHERE user_id = ?1 AND provider = ?2 AND {column} = ?3"
    );
    let raw = conn
        .query_row(&sql, params![user_id, provider.as_str(), value], RawLink::from_row)
        .optional()?;
    raw.map(RawLink::decode).transpose()
}

struct RawLink {
    local_entry_id: String,
    provider: String,
    external_event_id: String,
    external_calendar_id: Option<String>,
    version_tag: Option<String>,
    last_synced_at: String,
}

impl RawLink {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            local_entry_id: row.get(0)?,
            provider: row.get(1)?,
            external_event_id: row.get(2)?,
            external_calendar_id: row.get(3)?,
            version_tag: row.get(4)?,
            last_synced_at: row.get(5)?,
        })
    }

    fn decode(self) -> Result<SyncLink, StoreError> {
        let provider = self
            .provider
            .parse::<ProviderKind>()
            .map_err(|_| StoreError::corrupt("sync_links.provider", &self.provider))?;
        Ok(SyncLink {
            local_entry_id: self.local_entry_id,
            provider,
            external_event_id: self.external_event_id,
            external_calendar_id: self.external_calendar_id,
            version_tag: self.version_tag,
            last_synced_at: decode_time("sync_links.last_synced_at", &self.last_synced_at)?,
        })
    }
}
