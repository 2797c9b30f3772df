//! Subcommand implementations.

pub mod accounts;
pub mod config;
pub mod daemon;
pub mod sync;

use std::sync::Arc;

use calsync_engine::{Database, PullOnly, SqliteEntryStore, SyncService};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::ClientResult;

/// Opens the database and builds the sync service for the configured user.
pub fn open_service(config: &ClientConfig) -> ClientResult<SyncService> {
    let engine = config.engine_config()?;
    let path = config.database_path();
    debug!(path = %path.display(), "opening database");
    let db = Database::open(&path)?;
    let entries = Arc::new(SqliteEntryStore::new(db.clone(), config.user_id()));
    let service = SyncService::new(db, config.user_id(), engine, entries)?;
    Ok(if config.sync.pull_only {
        service.with_push_policy(Arc::new(PullOnly))
    } else {
        service
    })
}
