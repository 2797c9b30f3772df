//! Sync engine: persistence, token vault, reconciliation, scheduling.
//!
//! This crate keeps a local calendar in step with Google Calendar and
//! Microsoft Outlook:
//! - SQLite persistence for credentials, links, entries and checkpoints
//! - AES-GCM sealed OAuth tokens with transparent refresh
//! - Two-way reconciliation with last-write-wins conflict handling
//! - A background scheduler for periodic rounds
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use calsync_core::ProviderKind;
//! use calsync_engine::{Database, EngineConfig, SqliteEntryStore, SyncService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::open("calsync.db")?;
//!     let entries = Arc::new(SqliteEntryStore::new(db.clone(), "me"));
//!     let service = SyncService::new(db, "me", EngineConfig::new("secret"), entries)?;
//!     let reply = service.sync(ProviderKind::Google, None, None, None).await;
//!     println!("{}", serde_json::to_string(&reply)?);
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod orchestrator;
mod resolver;
mod scheduler;
mod service;
mod store;
mod summary;
#[cfg(test)]
mod testing;
mod vault;

pub use config::{
    DEFAULT_CONFLICT_WINDOW_MS, DEFAULT_REFRESH_LOOKAHEAD_SECS, EngineConfig, ProviderSettings,
};
pub use error::{CryptoError, StoreError, SyncError, SyncResult};
pub use orchestrator::{Orchestrator, PullOnly, PushPolicy, SyncRequest, UserAuthoredOnly};
pub use resolver::{ConflictResolver, Resolution, Side};
pub use scheduler::{
    Backoff, Scheduler, SchedulerCommand, SchedulerConfig, SchedulerHandle, SchedulerState,
    SchedulerStopped, SharedSchedulerState, sync_round,
};
pub use service::{
    AccountStatus, DisconnectReport, ProviderBinding, ProviderOutcome, SyncAllReport, SyncService,
};
pub use store::{
    Checkpoint, CheckpointStore, CredentialStore, Database, LinkRegistry, LocalStore,
    SqliteEntryStore,
};
pub use summary::{ConflictNote, ItemFailure, RunSummary, SyncAction, SyncReply};
pub use vault::{TokenCipher, TokenVault};
