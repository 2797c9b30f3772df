//! Local entries with an event facet.
//!
//! A [`LocalEntry`] is a scheduling-capable record owned by the user's own
//! store. The sync engine reads entries inside a window and writes them back
//! only when the provider side wins a reconciliation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::ExternalEvent;

/// Where a local entry originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    /// Authored by the user in the local application.
    #[default]
    User,
    /// Created or last overwritten by a calendar pull.
    Calendar,
}

impl EntrySource {
    /// Returns the storage name of this source.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Calendar => "calendar",
        }
    }
}

impl fmt::Display for EntrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown entry source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown entry source: {0}")]
pub struct UnknownSource(pub String);

impl FromStr for EntrySource {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "calendar" => Ok(Self::Calendar),
            other => Err(UnknownSource(other.to_string())),
        }
    }
}

/// A record in the user's local store that carries an event facet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEntry {
    /// Opaque local identifier.
    pub id: String,
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub all_day: bool,
    pub location: Option<String>,
    pub body_text: String,
    /// Last local mutation instant.
    pub updated_at: DateTime<Utc>,
    pub source: EntrySource,
    /// Soft-deletion marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl LocalEntry {
    /// Creates a user-authored, timed entry.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            start_at,
            end_at,
            all_day: false,
            location: None,
            body_text: String::new(),
            updated_at,
            source: EntrySource::User,
            deleted_at: None,
        }
    }

    /// Builder method to mark the entry as all-day.
    pub fn with_all_day(mut self, all_day: bool) -> Self {
        self.all_day = all_day;
        self
    }

    /// Builder method to set the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Builder method to set the body text.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body_text = body.into();
        self
    }

    /// Builder method to set the origin tag.
    pub fn with_source(mut self, source: EntrySource) -> Self {
        self.source = source;
        self
    }

    /// Returns true if the entry has been soft-deleted.
    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Overwrites every event field from a provider event.
    ///
    /// The entry takes the provider's modification instant as its own
    /// `updated_at`, so an unchanged pair does not look locally modified on
    /// the next run.
    pub fn apply_external(&mut self, event: &ExternalEvent) {
        self.title = event.title.clone();
        self.start_at = event.start_at;
        self.end_at = event.end_at;
        self.all_day = event.all_day;
        self.location = event.location.clone();
        self.body_text = event.body_text.clone();
        self.updated_at = event.provider_updated_at;
        self.source = EntrySource::Calendar;
    }
}
