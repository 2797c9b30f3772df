//! Google Calendar API adapter.

use calsync_core::{LocalEntry, ProviderKind, TimeWindow};
use tracing::{debug, warn};

use crate::adapter::{BoxFuture, CalendarAdapter, CalendarInfo, CreatedEvent, EventListing};
use crate::error::{ProviderError, ProviderResult};
use crate::http;

use super::config::{GoogleConfig, PRIMARY_CALENDAR};
use super::wire::{
    ApiEvent, CalendarListResponse, CalendarResource, EventListResponse, EventPayload,
    convert_item,
};

const PROVIDER: ProviderKind = ProviderKind::Google;

/// [`CalendarAdapter`] for Google Calendar API v3.
#[derive(Debug)]
pub struct GoogleCalendarAdapter {
    http_client: reqwest::Client,
    config: GoogleConfig,
}

impl GoogleCalendarAdapter {
    pub fn new(config: GoogleConfig) -> ProviderResult<Self> {
        Ok(Self {
            http_client: http::build_client(PROVIDER, config.timeout)?,
            config,
        })
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.config.api_base,
            urlencoding::encode(calendar_id)
        )
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> String {
        format!(
            "{}/{}",
            self.events_url(calendar_id),
            urlencoding::encode(event_id)
        )
    }

    async fn list_events_impl(
        &self,
        access_token: &str,
        calendar_id: &str,
        window: TimeWindow,
    ) -> ProviderResult<EventListing> {
        let mut listing = EventListing::default();
        let mut page_token: Option<String> = None;
        let url = self.events_url(calendar_id);

        loop {
            let mut request = self
                .http_client
                .get(&url)
                .bearer_auth(access_token)
                .query(&[
                    ("timeMin", window.start.to_rfc3339()),
                    ("timeMax", window.end.to_rfc3339()),
                    ("singleEvents", "true".to_string()),
                    ("showDeleted", "true".to_string()),
                    ("maxResults", self.config.page_size.to_string()),
                ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request.send().await.map_err(|e| http::send_error(PROVIDER, e))?;
            let page: EventListResponse = http::read_json(PROVIDER, response).await?;

            for item in page.items {
                match convert_item(item, calendar_id, window) {
                    Ok(event) => listing.events.push(event),
                    Err(bad) => {
                        warn!(
                            provider = %PROVIDER,
                            event_id = ?bad.external_id,
                            reason = %bad.reason,
                            "skipping malformed event"
                        );
                        listing.malformed.push(bad);
                    }
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(
            calendar_id,
            events = listing.events.len(),
            malformed = listing.malformed.len(),
            "listed google events"
        );
        Ok(listing)
    }

    async fn create_event_impl(
        &self,
        access_token: &str,
        calendar_id: &str,
        entry: &LocalEntry,
    ) -> ProviderResult<CreatedEvent> {
        let response = self
            .http_client
            .post(self.events_url(calendar_id))
            .bearer_auth(access_token)
            .json(&EventPayload::from_entry(entry))
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        let created: ApiEvent = http::read_json(PROVIDER, response).await?;
        let external_id = created.id.ok_or_else(|| {
            ProviderError::invalid_response("created event has no id").with_provider(PROVIDER)
        })?;

        debug!(entry_id = %entry.id, %external_id, "created google event");
        Ok(CreatedEvent {
            external_id,
            version_tag: created.etag,
            calendar_id: Some(calendar_id.to_string()),
        })
    }

    async fn update_event_impl(
        &self,
        access_token: &str,
        calendar_id: &str,
        external_id: &str,
        entry: &LocalEntry,
    ) -> ProviderResult<Option<String>> {
        let response = self
            .http_client
            .patch(self.event_url(calendar_id, external_id))
            .bearer_auth(access_token)
            .json(&EventPayload::from_entry(entry))
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        let updated: ApiEvent = http::read_json(PROVIDER, response).await?;
        Ok(updated.etag)
    }

    async fn delete_event_impl(
        &self,
        access_token: &str,
        calendar_id: &str,
        external_id: &str,
    ) -> ProviderResult<()> {
        let response = self
            .http_client
            .delete(self.event_url(calendar_id, external_id))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;

        match http::check_status(PROVIDER, response).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(%external_id, "google event already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn list_calendars_impl(&self, access_token: &str) -> ProviderResult<Vec<CalendarInfo>> {
        let url = format!("{}/users/me/calendarList", self.config.api_base);
        let mut calendars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http_client.get(&url).bearer_auth(access_token);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let response = request.send().await.map_err(|e| http::send_error(PROVIDER, e))?;
            let page: CalendarListResponse = http::read_json(PROVIDER, response).await?;

            calendars.extend(page.items.into_iter().map(|entry| {
                let name = entry
                    .summary_override
                    .or(entry.summary)
                    .unwrap_or_else(|| entry.id.clone());
                let can_edit = matches!(entry.access_role.as_deref(), Some("owner" | "writer"));
                CalendarInfo::new(entry.id, name)
                    .with_primary(entry.primary)
                    .with_can_edit(can_edit)
            }));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(calendars)
    }

    async fn account_email_impl(&self, access_token: &str) -> ProviderResult<Option<String>> {
        let url = format!("{}/calendars/{}", self.config.api_base, PRIMARY_CALENDAR);
        let response = self
            .http_client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        let calendar: CalendarResource = http::read_json(PROVIDER, response).await?;
        Ok(Some(calendar.id).filter(|id| id.contains('@')))
    }
}

impl CalendarAdapter for GoogleCalendarAdapter {
    fn provider(&self) -> ProviderKind {
        PROVIDER
    }

    fn primary_calendar_id(&self) -> &str {
        PRIMARY_CALENDAR
    }

    fn list_events<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<EventListing>> {
        Box::pin(self.list_events_impl(access_token, calendar_id, window))
    }

    fn create_event<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        entry: &'a LocalEntry,
    ) -> BoxFuture<'a, ProviderResult<CreatedEvent>> {
        Box::pin(self.create_event_impl(access_token, calendar_id, entry))
    }

    fn update_event<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        external_id: &'a str,
        entry: &'a LocalEntry,
    ) -> BoxFuture<'a, ProviderResult<Option<String>>> {
        Box::pin(self.update_event_impl(access_token, calendar_id, external_id, entry))
    }

    fn delete_event<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        external_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(self.delete_event_impl(access_token, calendar_id, external_id))
    }

    fn list_calendars<'a>(
        &'a self,
        access_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Vec<CalendarInfo>>> {
        Box::pin(self.list_calendars_impl(access_token))
    }

    fn account_email<'a>(
        &'a self,
        access_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Option<String>>> {
        Box::pin(self.account_email_impl(access_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;
    use chrono::{TimeZone, Utc};
    use mockito::Matcher;

    fn adapter(server: &mockito::ServerGuard) -> GoogleCalendarAdapter {
        GoogleCalendarAdapter::new(GoogleConfig::new().with_api_base(server.url())).unwrap()
    }

    fn window() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
        )
    }

    fn entry() -> LocalEntry {
        let start = Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap();
        LocalEntry::new("l1", "Review", start, start + chrono::Duration::hours(1), start)
    }

    #[tokio::test]
    async fn list_follows_pages_and_collects_malformed() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/calendars/primary/events")
            .match_header("authorization", "Bearer tok")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("showDeleted".into(), "true".into()),
                Matcher::UrlEncoded("singleEvents".into(), "true".into()),
            ]))
            .expect(1)
            .with_status(200)
            .with_body(
                r#"{"items":[
                    {"id":"a","summary":"A","updated":"2024-03-02T00:00:00Z",
                     "start":{"dateTime":"2024-03-05T10:00:00Z"},"end":{"dateTime":"2024-03-05T11:00:00Z"}},
                    {"id":"broken","updated":"2024-03-02T00:00:00Z"}
                 ],"nextPageToken":"p2"}"#,
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/calendars/primary/events")
            .match_query(Matcher::UrlEncoded("pageToken".into(), "p2".into()))
            .expect(1)
            .with_status(200)
            .with_body(r#"{"items":[{"id":"b","status":"cancelled"}]}"#)
            .create_async()
            .await;

        let listing = adapter(&server)
            .list_events("tok", "primary", window())
            .await
            .unwrap();

        first.assert_async().await;
        second.assert_async().await;
        assert_eq!(listing.events.len(), 2);
        assert!(listing.events[1].cancelled);
        assert_eq!(listing.malformed.len(), 1);
        assert_eq!(listing.malformed[0].external_id.as_deref(), Some("broken"));
    }

    #[tokio::test]
    async fn create_returns_id_and_etag() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/calendars/primary/events")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "summary": "Review",
                "start": {"dateTime": "2024-03-15T09:00:00Z", "timeZone": "UTC"}
            })))
            .with_status(200)
            .with_body(r#"{"id":"new1","etag":"\"e1\""}"#)
            .create_async()
            .await;

        let created = adapter(&server)
            .create_event("tok", "primary", &entry())
            .await
            .unwrap();
        assert_eq!(created.external_id, "new1");
        assert_eq!(created.version_tag.as_deref(), Some("\"e1\""));
        assert_eq!(created.calendar_id.as_deref(), Some("primary"));
    }

    #[tokio::test]
    async fn create_rejected_is_bad_request() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/calendars/primary/events")
            .with_status(400)
            .with_body(r#"{"error":{"message":"Invalid start time."}}"#)
            .create_async()
            .await;

        let err = adapter(&server)
            .create_event("tok", "primary", &entry())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::Rejected);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn update_patches_and_returns_new_etag() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PATCH", "/calendars/work%40example.com/events/evt1")
            .match_body(Matcher::PartialJson(serde_json::json!({"location": null})))
            .with_status(200)
            .with_body(r#"{"id":"evt1","etag":"\"e2\""}"#)
            .create_async()
            .await;

        let tag = adapter(&server)
            .update_event("tok", "work@example.com", "evt1", &entry())
            .await
            .unwrap();
        assert_eq!(tag.as_deref(), Some("\"e2\""));
    }

    #[tokio::test]
    async fn delete_tolerates_gone() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/calendars/primary/events/evt1")
            .with_status(410)
            .create_async()
            .await;
        server
            .mock("DELETE", "/calendars/primary/events/evt2")
            .with_status(204)
            .create_async()
            .await;

        let adapter = adapter(&server);
        adapter.delete_event("tok", "primary", "evt1").await.unwrap();
        adapter.delete_event("tok", "primary", "evt2").await.unwrap();
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/calendars/primary/events/evt1")
            .with_status(503)
            .create_async()
            .await;

        let err = adapter(&server)
            .delete_event("tok", "primary", "evt1")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn calendars_report_edit_rights() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/users/me/calendarList")
            .with_status(200)
            .with_body(
                r#"{"items":[
                    {"id":"me@example.com","summary":"Me","primary":true,"accessRole":"owner"},
                    {"id":"holidays","summary":"Holidays","accessRole":"reader"}
                ]}"#,
            )
            .create_async()
            .await;

        let calendars = adapter(&server).list_calendars("tok").await.unwrap();
        assert_eq!(calendars.len(), 2);
        assert!(calendars[0].is_primary && calendars[0].can_edit);
        assert!(!calendars[1].can_edit);
    }
}
