//! Google Calendar JSON shapes and their mapping to canonical events.

use calsync_core::{ExternalEvent, LocalEntry, TimeWindow, UNTITLED_EVENT};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapter::{MalformedItem, all_day_span};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct EventListResponse {
    /// Kept as raw values so one bad item does not fail the page.
    #[serde(default)]
    pub items: Vec<Value>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ApiEvent {
    pub id: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<ApiEventTime>,
    pub end: Option<ApiEventTime>,
    pub status: Option<String>,
    pub updated: Option<String>,
    pub etag: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ApiEventTime {
    pub date: Option<String>,
    pub date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CalendarListResponse {
    #[serde(default)]
    pub items: Vec<CalendarListEntry>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CalendarListEntry {
    pub id: String,
    pub summary: Option<String>,
    pub summary_override: Option<String>,
    #[serde(default)]
    pub primary: bool,
    pub access_role: Option<String>,
}

/// Response of `calendars/primary`; its id is the account address.
#[derive(Debug, Deserialize)]
pub(super) struct CalendarResource {
    pub id: String,
}

/// Start or end of an event as written to Google.
///
/// Both variants are always serialized so a PATCH switching between timed
/// and all-day clears the other field.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct EventTimePayload {
    pub date: Option<String>,
    pub date_time: Option<String>,
    pub time_zone: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub(super) struct EventPayload {
    pub summary: String,
    pub description: String,
    pub location: Option<String>,
    pub start: EventTimePayload,
    pub end: EventTimePayload,
}

impl EventPayload {
    pub fn from_entry(entry: &LocalEntry) -> Self {
        let (start, end) = if entry.all_day {
            let (start, end) = all_day_span(entry);
            (date_payload(start), date_payload(end))
        } else {
            (
                date_time_payload(entry.start_at),
                date_time_payload(entry.end_at),
            )
        };
        Self {
            summary: entry.title.clone(),
            description: entry.body_text.clone(),
            location: entry.location.clone(),
            start,
            end,
        }
    }
}

fn date_payload(date: NaiveDate) -> EventTimePayload {
    EventTimePayload {
        date: Some(date.format("%Y-%m-%d").to_string()),
        date_time: None,
        time_zone: None,
    }
}

fn date_time_payload(at: DateTime<Utc>) -> EventTimePayload {
    EventTimePayload {
        date: None,
        date_time: Some(at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        time_zone: Some("UTC"),
    }
}

/// Parsed boundary: instant plus whether it came from a date-only value.
fn parse_time(time: &ApiEventTime) -> Result<(DateTime<Utc>, bool), String> {
    if let Some(dt) = &time.date_time {
        let parsed = DateTime::parse_from_rfc3339(dt)
            .map_err(|e| format!("invalid dateTime {dt:?}: {e}"))?;
        return Ok((parsed.with_timezone(&Utc), false));
    }
    if let Some(date) = &time.date {
        let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| format!("invalid date {date:?}: {e}"))?;
        return Ok((parsed.and_time(chrono::NaiveTime::MIN).and_utc(), true));
    }
    Err("event time has neither date nor dateTime".to_string())
}

/// Converts one listing item.
///
/// Cancelled items returned by `showDeleted=true` may carry only an id and a
/// status; they get the window start as placeholder times.
pub(super) fn convert_item(
    item: Value,
    calendar_id: &str,
    window: TimeWindow,
) -> Result<ExternalEvent, MalformedItem> {
    let raw_id = item.get("id").and_then(Value::as_str).map(String::from);
    let event: ApiEvent = serde_json::from_value(item)
        .map_err(|e| MalformedItem::new(raw_id.clone(), format!("unexpected shape: {e}")))?;
    let id = event
        .id
        .clone()
        .ok_or_else(|| MalformedItem::new(None, "event has no id"))?;
    let malformed = |reason: String| MalformedItem::new(Some(id.clone()), reason);

    let cancelled = event.status.as_deref() == Some("cancelled");

    let updated = match &event.updated {
        Some(ts) => DateTime::parse_from_rfc3339(ts)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| malformed(format!("invalid updated timestamp: {e}")))?,
        None if cancelled => window.start,
        None => return Err(malformed("missing updated timestamp".to_string())),
    };

    let (start_at, end_at, all_day) = match (&event.start, &event.end) {
        (Some(start), end) => {
            let (start_at, all_day) = parse_time(start).map_err(&malformed)?;
            let end_at = match end {
                Some(end) => parse_time(end).map_err(&malformed)?.0,
                None if all_day => start_at + chrono::Duration::days(1),
                None => start_at,
            };
            (start_at, end_at, all_day)
        }
        (None, _) if cancelled => (window.start, window.start, false),
        (None, _) => return Err(malformed("missing start".to_string())),
    };

    Ok(ExternalEvent {
        external_id: id,
        calendar_id: Some(calendar_id.to_string()),
        title: event
            .summary
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| UNTITLED_EVENT.to_string()),
        start_at,
        end_at,
        all_day,
        location: event.location.filter(|l| !l.is_empty()),
        body_text: event.description.unwrap_or_default(),
        provider_updated_at: updated,
        cancelled,
        version_tag: event.etag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn window() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn converts_timed_event() {
        let item = json!({
            "id": "evt1",
            "etag": "\"3181161784712000\"",
            "status": "confirmed",
            "summary": "Standup",
            "description": "daily",
            "location": "Room 4",
            "updated": "2024-03-10T08:00:00.000Z",
            "start": {"dateTime": "2024-03-15T10:00:00+01:00", "timeZone": "Europe/Paris"},
            "end": {"dateTime": "2024-03-15T10:15:00+01:00"}
        });

        let event = convert_item(item, "primary", window()).unwrap();
        assert_eq!(event.external_id, "evt1");
        assert_eq!(event.start_at, Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap());
        assert_eq!(event.end_at, Utc.with_ymd_and_hms(2024, 3, 15, 9, 15, 0).unwrap());
        assert!(!event.all_day);
        assert_eq!(event.location.as_deref(), Some("Room 4"));
        assert_eq!(event.version_tag.as_deref(), Some("\"3181161784712000\""));
        assert_eq!(event.calendar_id.as_deref(), Some("primary"));
        assert!(!event.cancelled);
    }

    #[test]
    fn converts_all_day_event_with_exclusive_end() {
        let item = json!({
            "id": "evt2",
            "updated": "2024-03-10T08:00:00Z",
            "start": {"date": "2024-03-15"},
            "end": {"date": "2024-03-16"}
        });

        let event = convert_item(item, "primary", window()).unwrap();
        assert!(event.all_day);
        assert_eq!(event.start_at, Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap());
        assert_eq!(event.end_at, Utc.with_ymd_and_hms(2024, 3, 16, 0, 0, 0).unwrap());
        assert_eq!(event.title, UNTITLED_EVENT);
    }

    #[test]
    fn bare_cancelled_item_uses_placeholders() {
        let item = json!({"id": "gone", "status": "cancelled"});
        let event = convert_item(item, "primary", window()).unwrap();
        assert!(event.cancelled);
        assert_eq!(event.start_at, window().start);
    }

    #[test]
    fn confirmed_item_without_start_is_malformed() {
        let item = json!({"id": "bad", "updated": "2024-03-10T08:00:00Z"});
        let err = convert_item(item, "primary", window()).unwrap_err();
        assert_eq!(err.external_id.as_deref(), Some("bad"));
        assert!(err.reason.contains("start"));
    }

    #[test]
    fn wrongly_typed_item_is_malformed() {
        let item = json!({"id": "bad", "summary": 42});
        let err = convert_item(item, "primary", window()).unwrap_err();
        assert_eq!(err.external_id.as_deref(), Some("bad"));
    }

    #[test]
    fn timed_payload_clears_date() {
        let start = Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap();
        let entry = LocalEntry::new("l1", "Review", start, end, start).with_body("notes");

        let payload = serde_json::to_value(EventPayload::from_entry(&entry)).unwrap();
        insta::assert_json_snapshot!(payload, @r#"
        {
          "description": "notes",
          "end": {
            "date": null,
            "dateTime": "2024-03-15T10:00:00Z",
            "timeZone": "UTC"
          },
          "location": null,
          "start": {
            "date": null,
            "dateTime": "2024-03-15T09:00:00Z",
            "timeZone": "UTC"
          },
          "summary": "Review"
        }
        "#);
    }

    #[test]
    fn all_day_payload_uses_dates() {
        let day = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        let entry = LocalEntry::new("l1", "Offsite", day, day, day)
            .with_all_day(true)
            .with_location("Lisbon");

        let payload = serde_json::to_value(EventPayload::from_entry(&entry)).unwrap();
        insta::assert_json_snapshot!(payload, @r#"
        {
          "description": "",
          "end": {
            "date": "2024-03-16",
            "dateTime": null,
            "timeZone": null
          },
          "location": "Lisbon",
          "start": {
            "date": "2024-03-15",
            "dateTime": null,
            "timeZone": null
          },
          "summary": "Offsite"
        }
        "#);
    }
}
