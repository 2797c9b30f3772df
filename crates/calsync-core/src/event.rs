//! Provider-side events in canonical form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title used when a provider event has no subject/summary.
pub const UNTITLED_EVENT: &str = "Event";

/// An event as reported by a provider adapter, normalized to UTC instants.
///
/// All-day events carry midnight-UTC boundaries with an exclusive end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalEvent {
    pub external_id: String,
    /// Calendar that owns the event, when the provider reports it.
    pub calendar_id: Option<String>,
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub all_day: bool,
    pub location: Option<String>,
    pub body_text: String,
    /// The provider's last-modified instant.
    pub provider_updated_at: DateTime<Utc>,
    pub cancelled: bool,
    /// Opaque change token (etag / changeKey).
    pub version_tag: Option<String>,
}

impl ExternalEvent {
    /// Creates a confirmed, timed event with empty optional fields.
    pub fn new(
        external_id: impl Into<String>,
        title: impl Into<String>,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        provider_updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            calendar_id: None,
            title: title.into(),
            start_at,
            end_at,
            all_day: false,
            location: None,
            body_text: String::new(),
            provider_updated_at,
            cancelled: false,
            version_tag: None,
        }
    }

    /// Builder method to set the cancellation flag.
    pub fn with_cancelled(mut self, cancelled: bool) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Builder method to set the version tag.
    pub fn with_version_tag(mut self, tag: impl Into<String>) -> Self {
        self.version_tag = Some(tag.into());
        self
    }
}
