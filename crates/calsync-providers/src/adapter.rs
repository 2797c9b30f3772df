//! The provider capability set.
//!
//! [`CalendarAdapter`] translates between the canonical event shape and one
//! provider's wire format. [`TokenRefresher`] trades a refresh token for a
//! fresh access token at that provider's OAuth endpoint. Both traits are
//! object-safe so the engine can hold `Arc<dyn CalendarAdapter>` values and
//! tests can substitute in-memory fakes.

use std::future::Future;
use std::pin::Pin;

use calsync_core::{ExternalEvent, LocalEntry, ProviderKind, TimeWindow};
use chrono::{Days, NaiveDate};
use serde::Serialize;

use crate::error::ProviderResult;

/// A boxed future for async trait methods.
///
/// Boxing keeps the traits usable behind `dyn`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A calendar the user can select as a sync target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarInfo {
    pub id: String,
    pub name: String,
    pub is_primary: bool,
    /// False for read-only calendars (holidays, shared views).
    pub can_edit: bool,
}

impl CalendarInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_primary: false,
            can_edit: true,
        }
    }

    pub fn with_primary(mut self, is_primary: bool) -> Self {
        self.is_primary = is_primary;
        self
    }

    pub fn with_can_edit(mut self, can_edit: bool) -> Self {
        self.can_edit = can_edit;
        self
    }
}

/// A provider item that could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedItem {
    /// Provider id, when the item carried one.
    pub external_id: Option<String>,
    pub reason: String,
}

impl MalformedItem {
    pub fn new(external_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            external_id,
            reason: reason.into(),
        }
    }
}

/// Result of a windowed listing, all pages included.
#[derive(Debug, Clone, Default)]
pub struct EventListing {
    pub events: Vec<ExternalEvent>,
    pub malformed: Vec<MalformedItem>,
}

impl EventListing {
    pub fn new(events: Vec<ExternalEvent>) -> Self {
        Self {
            events,
            malformed: Vec::new(),
        }
    }
}

/// Identity of a freshly created provider event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedEvent {
    pub external_id: String,
    pub version_tag: Option<String>,
    pub calendar_id: Option<String>,
}

/// Tokens returned by an OAuth token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    /// Present when the endpoint issued or rotated a refresh token.
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds.
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

/// Translates canonical events to and from one provider's calendar API.
///
/// Implementations are stateless apart from their HTTP client; every call
/// takes the bearer token to use.
pub trait CalendarAdapter: Send + Sync {
    fn provider(&self) -> ProviderKind;

    /// Calendar used when a sync request names none.
    fn primary_calendar_id(&self) -> &str;

    /// Lists every event overlapping `window`, following pagination.
    ///
    /// Cancelled events are included with `cancelled = true`. Items that
    /// cannot be normalized land in [`EventListing::malformed`].
    fn list_events<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<EventListing>>;

    fn create_event<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        entry: &'a LocalEntry,
    ) -> BoxFuture<'a, ProviderResult<CreatedEvent>>;

    /// Overwrites every mapped field of an existing event.
    ///
    /// Returns the new version tag, if the provider reports one.
    fn update_event<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        external_id: &'a str,
        entry: &'a LocalEntry,
    ) -> BoxFuture<'a, ProviderResult<Option<String>>>;

    /// Deletes an event. An event that is already gone counts as deleted.
    fn delete_event<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        external_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>>;

    fn list_calendars<'a>(
        &'a self,
        access_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Vec<CalendarInfo>>>;

    /// Mailbox address of the connected account.
    fn account_email<'a>(
        &'a self,
        access_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Option<String>>>;
}

/// Exchanges a refresh token for a new access token.
pub trait TokenRefresher: Send + Sync {
    fn provider(&self) -> ProviderKind;

    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, ProviderResult<TokenSet>>;
}

/// Date-only span for an all-day entry.
///
/// The end date is exclusive and always at least one day after the start.
pub fn all_day_span(entry: &LocalEntry) -> (NaiveDate, NaiveDate) {
    let start = entry.start_at.date_naive();
    let end = entry.end_at.date_naive();
    let min_end = start.checked_add_days(Days::new(1)).unwrap_or(start);
    (start, end.max(min_end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn all_day_span_is_at_least_one_day() {
        let day = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        let entry = LocalEntry::new("e1", "Holiday", day, day, day).with_all_day(true);

        let (start, end) = all_day_span(&entry);
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 3, 16).unwrap());
    }

    #[test]
    fn all_day_span_keeps_multi_day_end() {
        let start = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 18, 0, 0, 0).unwrap();
        let entry = LocalEntry::new("e1", "Trip", start, end, start).with_all_day(true);

        let (_, end) = all_day_span(&entry);
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 3, 18).unwrap());
    }
}
