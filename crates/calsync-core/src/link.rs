//! Sync links: the join between one local entry and one provider event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;

/// Durable correlation of a local entry with an external event.
///
/// Within one provider the mapping is a bijection: a local entry is linked to
/// at most one external event and vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLink {
    pub local_entry_id: String,
    pub provider: ProviderKind,
    pub external_event_id: String,
    pub external_calendar_id: Option<String>,
    /// Opaque change token recorded at the last successful reconciliation.
    pub version_tag: Option<String>,
    /// `updated_at` of the local entry as it was last reconciled. A local
    /// edit made after that point compares greater.
    pub last_synced_at: DateTime<Utc>,
}

impl SyncLink {
    /// Creates a link synced at the given instant.
    pub fn new(
        local_entry_id: impl Into<String>,
        provider: ProviderKind,
        external_event_id: impl Into<String>,
        last_synced_at: DateTime<Utc>,
    ) -> Self {
        Self {
            local_entry_id: local_entry_id.into(),
            provider,
            external_event_id: external_event_id.into(),
            external_calendar_id: None,
            version_tag: None,
            last_synced_at,
        }
    }

    /// Builder method to set the owning calendar.
    pub fn with_calendar(mut self, calendar_id: Option<String>) -> Self {
        self.external_calendar_id = calendar_id;
        self
    }

    /// Builder method to set the version tag.
    pub fn with_version_tag(mut self, tag: Option<String>) -> Self {
        self.version_tag = tag;
        self
    }

    /// Returns true if this link joins exactly the given pair.
    pub fn joins(&self, local_entry_id: &str, external_event_id: &str) -> bool {
        self.local_entry_id == local_entry_id && self.external_event_id == external_event_id
    }
}
