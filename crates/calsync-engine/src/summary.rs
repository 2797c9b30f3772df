//! Run summaries and the trigger reply shape.

use calsync_core::{ProviderKind, TimeWindow};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::SyncError;
use crate::resolver::Side;

/// The reconciliation step an item was going through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Pull,
    PullCreate,
    Push,
    PushCreate,
    Tombstone,
    RemoteDelete,
    /// Provider item skipped before classification.
    Normalize,
}

/// A per-item failure recorded in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    pub action: SyncAction,
    pub local_entry_id: Option<String>,
    pub external_event_id: Option<String>,
    /// [`SyncError::kind`] of the underlying error.
    pub kind: String,
    pub message: String,
}

impl ItemFailure {
    pub fn new(
        action: SyncAction,
        local_entry_id: Option<&str>,
        external_event_id: Option<&str>,
        error: &SyncError,
    ) -> Self {
        Self {
            action,
            local_entry_id: local_entry_id.map(str::to_string),
            external_event_id: external_event_id.map(str::to_string),
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// A linked pair edited on both sides within the conflict window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictNote {
    pub local_entry_id: String,
    pub external_event_id: String,
    pub local_updated_at: DateTime<Utc>,
    pub external_updated_at: DateTime<Utc>,
    pub winner: Option<Side>,
}

/// Outcome of one (user, provider, calendar, window) run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub provider: ProviderKind,
    pub calendar_id: String,
    pub window: TimeWindow,
    /// Local entries created or overwritten from the provider.
    pub pulled: u32,
    /// Provider events created or overwritten from local entries.
    pub pushed: u32,
    /// Local entries tombstoned because their event was cancelled or gone.
    pub tombstoned: u32,
    /// Provider events deleted because their local entry was.
    pub remote_deleted: u32,
    pub failures: Vec<ItemFailure>,
    pub conflicts: Vec<ConflictNote>,
    /// The deadline passed before every case was processed.
    pub partial: bool,
    pub last_sync_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn new(
        provider: ProviderKind,
        calendar_id: impl Into<String>,
        window: TimeWindow,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            provider,
            calendar_id: calendar_id.into(),
            window,
            pulled: 0,
            pushed: 0,
            tombstoned: 0,
            remote_deleted: 0,
            failures: Vec::new(),
            conflicts: Vec::new(),
            partial: false,
            last_sync_at: started_at,
        }
    }

    pub fn conflict_count(&self) -> u32 {
        u32::try_from(self.conflicts.len()).unwrap_or(u32::MAX)
    }

    pub fn failure_count(&self) -> u32 {
        u32::try_from(self.failures.len()).unwrap_or(u32::MAX)
    }

    pub fn record_failure(&mut self, failure: ItemFailure) {
        self.failures.push(failure);
    }

    /// Returns true if nothing changed on either side.
    pub fn is_noop(&self) -> bool {
        self.pulled == 0 && self.pushed == 0 && self.tombstoned == 0 && self.remote_deleted == 0
    }
}

/// Reply to a sync trigger: the counts, or an error for the account owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SyncReply {
    #[serde(rename_all = "camelCase")]
    Completed {
        pulled: u32,
        pushed: u32,
        conflicts: u32,
        /// Epoch milliseconds.
        last_sync_at: i64,
    },
    Failed { error: String },
}

impl From<&RunSummary> for SyncReply {
    fn from(summary: &RunSummary) -> Self {
        Self::Completed {
            pulled: summary.pulled,
            pushed: summary.pushed,
            conflicts: summary.conflict_count(),
            last_sync_at: summary.last_sync_at.timestamp_millis(),
        }
    }
}

impl From<&SyncError> for SyncReply {
    fn from(error: &SyncError) -> Self {
        Self::Failed {
            error: error.user_message(),
        }
    }
}

impl From<&Result<RunSummary, SyncError>> for SyncReply {
    fn from(result: &Result<RunSummary, SyncError>) -> Self {
        match result {
            Ok(summary) => summary.into(),
            Err(error) => error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn summary() -> RunSummary {
        let t = Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap();
        let mut summary = RunSummary::new(
            ProviderKind::Google,
            "primary",
            TimeWindow::new(t, t + chrono::Duration::days(1)),
            t,
        );
        summary.pulled = 2;
        summary.pushed = 1;
        summary.conflicts.push(ConflictNote {
            local_entry_id: "e1".to_string(),
            external_event_id: "x1".to_string(),
            local_updated_at: t,
            external_updated_at: t + chrono::Duration::seconds(30),
            winner: Some(Side::External),
        });
        summary
    }

    #[test]
    fn completed_reply_shape() {
        let reply = SyncReply::from(&summary());
        insta::assert_json_snapshot!(reply, @r#"
        {
          "pulled": 2,
          "pushed": 1,
          "conflicts": 1,
          "lastSyncAt": 1710493200000
        }
        "#);
    }

    #[test]
    fn failed_reply_shape() {
        let err = SyncError::AuthExpired {
            provider: ProviderKind::Google,
        };
        let reply = SyncReply::from(&Err::<RunSummary, _>(err));
        insta::assert_json_snapshot!(reply, @r#"
        {
          "error": "reconnect your calendar"
        }
        "#);
    }

    #[test]
    fn item_failure_carries_error_kind() {
        let err = SyncError::MalformedEvent {
            external_id: Some("x9".to_string()),
            reason: "missing start".to_string(),
        };
        let failure = ItemFailure::new(SyncAction::Normalize, None, Some("x9"), &err);
        assert_eq!(failure.kind, "malformed_event");
        assert!(failure.message.contains("missing start"));
        assert!(summary().failures.is_empty());
    }
}
