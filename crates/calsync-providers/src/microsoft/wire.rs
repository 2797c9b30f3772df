//! Graph event JSON and its mapping to canonical events.

use calsync_core::{ExternalEvent, LocalEntry, UNTITLED_EVENT};
use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapter::{MalformedItem, all_day_span};

/// `$select` list for calendarView requests.
pub(super) const EVENT_FIELDS: &str = "id,subject,body,isAllDay,start,end,location,lastModifiedDateTime,isCancelled,changeKey";

#[derive(Debug, Deserialize)]
pub(super) struct EventPage {
    #[serde(default)]
    pub value: Vec<Value>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GraphEvent {
    pub id: Option<String>,
    pub subject: Option<String>,
    pub body: Option<GraphBody>,
    #[serde(default)]
    pub is_all_day: bool,
    pub start: Option<GraphDateTime>,
    pub end: Option<GraphDateTime>,
    pub location: Option<GraphLocation>,
    pub last_modified_date_time: Option<String>,
    #[serde(default)]
    pub is_cancelled: bool,
    pub change_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GraphBody {
    pub content_type: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GraphDateTime {
    pub date_time: String,
    pub time_zone: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GraphLocation {
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CalendarPage {
    #[serde(default)]
    pub value: Vec<GraphCalendar>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GraphCalendar {
    pub id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub is_default_calendar: bool,
    #[serde(default = "default_true")]
    pub can_edit: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GraphUser {
    pub mail: Option<String>,
    pub user_principal_name: Option<String>,
}

/// Event body written on create and PATCH.
///
/// Location is always present; an empty display name clears it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct EventPayload {
    pub subject: String,
    pub body: GraphBody,
    pub is_all_day: bool,
    pub start: GraphDateTime,
    pub end: GraphDateTime,
    pub location: GraphLocation,
}

impl EventPayload {
    pub fn from_entry(entry: &LocalEntry) -> Self {
        let (start, end) = if entry.all_day {
            let (start, end) = all_day_span(entry);
            (
                start.and_time(NaiveTime::MIN),
                end.and_time(NaiveTime::MIN),
            )
        } else {
            (entry.start_at.naive_utc(), entry.end_at.naive_utc())
        };
        Self {
            subject: entry.title.clone(),
            body: GraphBody {
                content_type: Some("text".to_string()),
                content: Some(entry.body_text.clone()),
            },
            is_all_day: entry.all_day,
            start: utc_date_time(start),
            end: utc_date_time(end),
            location: GraphLocation {
                display_name: Some(entry.location.clone().unwrap_or_default()),
            },
        }
    }
}

fn utc_date_time(at: NaiveDateTime) -> GraphDateTime {
    GraphDateTime {
        date_time: at.format("%Y-%m-%dT%H:%M:%S").to_string(),
        time_zone: Some("UTC".to_string()),
    }
}

/// Parses a Graph `dateTimeTimeZone` value requested in UTC.
///
/// Graph returns `2024-03-15T10:00:00.0000000` without an offset when the
/// `outlook.timezone` preference is set; an explicit offset is honoured too.
fn parse_graph_time(value: &GraphDateTime) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(&value.date_time) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Some(tz) = value.time_zone.as_deref() {
        if !tz.eq_ignore_ascii_case("UTC") {
            return Err(format!("unexpected time zone {tz:?}"));
        }
    }
    NaiveDateTime::parse_from_str(&value.date_time, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid dateTime {:?}: {e}", value.date_time))
}

pub(super) fn convert_item(
    item: Value,
    calendar_id: Option<&str>,
) -> Result<ExternalEvent, MalformedItem> {
    let raw_id = item.get("id").and_then(Value::as_str).map(String::from);
    let event: GraphEvent = serde_json::from_value(item)
        .map_err(|e| MalformedItem::new(raw_id, format!("unexpected shape: {e}")))?;
    let id = event
        .id
        .clone()
        .ok_or_else(|| MalformedItem::new(None, "event has no id"))?;
    let malformed = |reason: String| MalformedItem::new(Some(id.clone()), reason);

    let start = event
        .start
        .as_ref()
        .ok_or_else(|| malformed("missing start".to_string()))?;
    let end = event
        .end
        .as_ref()
        .ok_or_else(|| malformed("missing end".to_string()))?;
    let start_at = parse_graph_time(start).map_err(&malformed)?;
    let end_at = parse_graph_time(end).map_err(&malformed)?;

    let modified = event
        .last_modified_date_time
        .as_deref()
        .ok_or_else(|| malformed("missing lastModifiedDateTime".to_string()))?;
    let provider_updated_at = DateTime::parse_from_rfc3339(modified)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| malformed(format!("invalid lastModifiedDateTime: {e}")))?;

    Ok(ExternalEvent {
        external_id: id,
        calendar_id: calendar_id.map(String::from),
        title: event
            .subject
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| UNTITLED_EVENT.to_string()),
        start_at,
        end_at,
        all_day: event.is_all_day,
        location: event
            .location
            .and_then(|l| l.display_name)
            .filter(|name| !name.is_empty()),
        body_text: event.body.and_then(|b| b.content).unwrap_or_default(),
        provider_updated_at,
        cancelled: event.is_cancelled,
        version_tag: event.change_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn converts_graph_event() {
        let item = json!({
            "id": "AAMk1",
            "subject": "Planning",
            "body": {"contentType": "text", "content": "Bring numbers"},
            "isAllDay": false,
            "start": {"dateTime": "2024-03-15T10:00:00.0000000", "timeZone": "UTC"},
            "end": {"dateTime": "2024-03-15T11:30:00.0000000", "timeZone": "UTC"},
            "location": {"displayName": "Board room"},
            "lastModifiedDateTime": "2024-03-14T08:12:45.1234567Z",
            "isCancelled": false,
            "changeKey": "ck1"
        });

        let event = convert_item(item, None).unwrap();
        assert_eq!(event.start_at, Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap());
        assert_eq!(event.end_at, Utc.with_ymd_and_hms(2024, 3, 15, 11, 30, 0).unwrap());
        assert_eq!(event.location.as_deref(), Some("Board room"));
        assert_eq!(event.body_text, "Bring numbers");
        assert_eq!(event.version_tag.as_deref(), Some("ck1"));
        assert_eq!(event.calendar_id, None);
    }

    #[test]
    fn cancelled_and_untitled() {
        let item = json!({
            "id": "AAMk2",
            "isAllDay": true,
            "start": {"dateTime": "2024-03-15T00:00:00.0000000", "timeZone": "UTC"},
            "end": {"dateTime": "2024-03-16T00:00:00.0000000", "timeZone": "UTC"},
            "lastModifiedDateTime": "2024-03-14T08:00:00Z",
            "isCancelled": true,
            "location": {"displayName": ""}
        });

        let event = convert_item(item, Some("cal-1")).unwrap();
        assert!(event.cancelled);
        assert!(event.all_day);
        assert_eq!(event.title, UNTITLED_EVENT);
        assert_eq!(event.location, None);
        assert_eq!(event.calendar_id.as_deref(), Some("cal-1"));
    }

    #[test]
    fn foreign_time_zone_is_malformed() {
        let item = json!({
            "id": "AAMk3",
            "start": {"dateTime": "2024-03-15T10:00:00.0000000", "timeZone": "Pacific Standard Time"},
            "end": {"dateTime": "2024-03-15T11:00:00.0000000", "timeZone": "Pacific Standard Time"},
            "lastModifiedDateTime": "2024-03-14T08:00:00Z"
        });

        let err = convert_item(item, None).unwrap_err();
        assert_eq!(err.external_id.as_deref(), Some("AAMk3"));
        assert!(err.reason.contains("time zone"));
    }

    #[test]
    fn missing_modified_is_malformed() {
        let item = json!({
            "id": "AAMk4",
            "start": {"dateTime": "2024-03-15T10:00:00", "timeZone": "UTC"},
            "end": {"dateTime": "2024-03-15T11:00:00", "timeZone": "UTC"}
        });
        assert!(convert_item(item, None).is_err());
    }

    #[test]
    fn all_day_payload() {
        let day = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        let entry = LocalEntry::new("l1", "Offsite", day, day, day).with_all_day(true);

        let payload = serde_json::to_value(EventPayload::from_entry(&entry)).unwrap();
        insta::assert_json_snapshot!(payload, @r#"
        {
          "body": {
            "content": "",
            "contentType": "text"
          },
          "end": {
            "dateTime": "2024-03-16T00:00:00",
            "timeZone": "UTC"
          },
          "isAllDay": true,
          "location": {
            "displayName": ""
          },
          "start": {
            "dateTime": "2024-03-15T00:00:00",
            "timeZone": "UTC"
          },
          "subject": "Offsite"
        }
        "#);
    }

    #[test]
    fn timed_payload() {
        let start = Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap();
        let end = start + chrono::Duration::minutes(30);
        let entry = LocalEntry::new("l1", "1:1", start, end, start)
            .with_location("Cafe")
            .with_body("agenda");

        let payload = serde_json::to_value(EventPayload::from_entry(&entry)).unwrap();
        insta::assert_json_snapshot!(payload, @r#"
        {
          "body": {
            "content": "agenda",
            "contentType": "text"
          },
          "end": {
            "dateTime": "2024-03-15T10:00:00",
            "timeZone": "UTC"
          },
          "isAllDay": false,
          "location": {
            "displayName": "Cafe"
          },
          "start": {
            "dateTime": "2024-03-15T09:30:00",
            "timeZone": "UTC"
          },
          "subject": "1:1"
        }
        "#);
    }
}
