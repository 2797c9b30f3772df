//! Microsoft Graph calendar adapter.

use calsync_core::{LocalEntry, ProviderKind, TimeWindow};
use chrono::SecondsFormat;
use tracing::{debug, warn};

use crate::adapter::{BoxFuture, CalendarAdapter, CalendarInfo, CreatedEvent, EventListing};
use crate::error::{ProviderError, ProviderResult};
use crate::http;

use super::config::{DEFAULT_CALENDAR, MicrosoftConfig};
use super::wire::{
    CalendarPage, EVENT_FIELDS, EventPage, EventPayload, GraphEvent, GraphUser, convert_item,
};

const PROVIDER: ProviderKind = ProviderKind::Microsoft;

/// Ask for UTC wall times and plain-text bodies.
const PREFER: &str = "outlook.timezone=\"UTC\", outlook.body-content-type=\"text\"";

/// [`CalendarAdapter`] for Microsoft Graph v1.0.
#[derive(Debug)]
pub struct MicrosoftCalendarAdapter {
    http_client: reqwest::Client,
    config: MicrosoftConfig,
}

impl MicrosoftCalendarAdapter {
    pub fn new(config: MicrosoftConfig) -> ProviderResult<Self> {
        Ok(Self {
            http_client: http::build_client(PROVIDER, config.timeout)?,
            config,
        })
    }

    /// Collection root for a calendar: `/me` or `/me/calendars/{id}`.
    fn calendar_root(&self, calendar_id: &str) -> String {
        if calendar_id == DEFAULT_CALENDAR {
            format!("{}/me", self.config.api_base)
        } else {
            format!(
                "{}/me/calendars/{}",
                self.config.api_base,
                urlencoding::encode(calendar_id)
            )
        }
    }

    /// Events are addressable under `/me/events` whatever calendar owns them.
    fn event_url(&self, external_id: &str) -> String {
        format!(
            "{}/me/events/{}",
            self.config.api_base,
            urlencoding::encode(external_id)
        )
    }

    fn owning_calendar(calendar_id: &str) -> Option<&str> {
        (calendar_id != DEFAULT_CALENDAR).then_some(calendar_id)
    }

    async fn list_events_impl(
        &self,
        access_token: &str,
        calendar_id: &str,
        window: TimeWindow,
    ) -> ProviderResult<EventListing> {
        let mut listing = EventListing::default();
        let first = format!("{}/calendarView", self.calendar_root(calendar_id));
        let mut next: Option<String> = None;

        loop {
            // nextLink already carries every query parameter
            let request = match &next {
                Some(link) => self.http_client.get(link),
                None => self.http_client.get(&first).query(&[
                    (
                        "startDateTime",
                        window.start.to_rfc3339_opts(SecondsFormat::Secs, true),
                    ),
                    (
                        "endDateTime",
                        window.end.to_rfc3339_opts(SecondsFormat::Secs, true),
                    ),
                    ("$top", self.config.page_size.to_string()),
                    ("$select", EVENT_FIELDS.to_string()),
                ]),
            };
            let response = request
                .bearer_auth(access_token)
                .header("Prefer", PREFER)
                .send()
                .await
                .map_err(|e| http::send_error(PROVIDER, e))?;
            let page: EventPage = http::read_json(PROVIDER, response).await?;

            for item in page.value {
                match convert_item(item, Self::owning_calendar(calendar_id)) {
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

            match page.next_link {
                Some(link) => next = Some(link),
                None => break,
            }
        }

        debug!(
            calendar_id,
            events = listing.events.len(),
            malformed = listing.malformed.len(),
            "listed graph events"
        );
        Ok(listing)
    }

    async fn create_event_impl(
        &self,
        access_token: &str,
        calendar_id: &str,
        entry: &LocalEntry,
    ) -> ProviderResult<CreatedEvent> {
        let url = format!("{}/events", self.calendar_root(calendar_id));
        let response = self
            .http_client
            .post(url)
            .bearer_auth(access_token)
            .json(&EventPayload::from_entry(entry))
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        let created: GraphEvent = http::read_json(PROVIDER, response).await?;
        let external_id = created.id.ok_or_else(|| {
            ProviderError::invalid_response("created event has no id").with_provider(PROVIDER)
        })?;

        debug!(entry_id = %entry.id, %external_id, "created graph event");
        Ok(CreatedEvent {
            external_id,
            version_tag: created.change_key,
            calendar_id: Self::owning_calendar(calendar_id).map(String::from),
        })
    }

    async fn update_event_impl(
        &self,
        access_token: &str,
        external_id: &str,
        entry: &LocalEntry,
    ) -> ProviderResult<Option<String>> {
        let response = self
            .http_client
            .patch(self.event_url(external_id))
            .bearer_auth(access_token)
            .json(&EventPayload::from_entry(entry))
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        let updated: GraphEvent = http::read_json(PROVIDER, response).await?;
        Ok(updated.change_key)
    }

    async fn delete_event_impl(&self, access_token: &str, external_id: &str) -> ProviderResult<()> {
        let response = self
            .http_client
            .delete(self.event_url(external_id))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;

        match http::check_status(PROVIDER, response).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(%external_id, "graph event already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn list_calendars_impl(&self, access_token: &str) -> ProviderResult<Vec<CalendarInfo>> {
        let mut url = format!("{}/me/calendars", self.config.api_base);
        let mut calendars = Vec::new();

        loop {
            let response = self
                .http_client
                .get(&url)
                .bearer_auth(access_token)
                .send()
                .await
                .map_err(|e| http::send_error(PROVIDER, e))?;
            let page: CalendarPage = http::read_json(PROVIDER, response).await?;

            calendars.extend(page.value.into_iter().map(|cal| {
                let name = cal.name.unwrap_or_else(|| cal.id.clone());
                CalendarInfo::new(cal.id, name)
                    .with_primary(cal.is_default_calendar)
                    .with_can_edit(cal.can_edit)
            }));

            match page.next_link {
                Some(link) => url = link,
                None => break,
            }
        }

        Ok(calendars)
    }

    async fn account_email_impl(&self, access_token: &str) -> ProviderResult<Option<String>> {
        let response = self
            .http_client
            .get(format!("{}/me", self.config.api_base))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        let user: GraphUser = http::read_json(PROVIDER, response).await?;
        Ok(user.mail.or(user.user_principal_name))
    }
}

impl CalendarAdapter for MicrosoftCalendarAdapter {
    fn provider(&self) -> ProviderKind {
        PROVIDER
    }

    fn primary_calendar_id(&self) -> &str {
        DEFAULT_CALENDAR
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
        _calendar_id: &'a str,
        external_id: &'a str,
        entry: &'a LocalEntry,
    ) -> BoxFuture<'a, ProviderResult<Option<String>>> {
        Box::pin(self.update_event_impl(access_token, external_id, entry))
    }

    fn delete_event<'a>(
        &'a self,
        access_token: &'a str,
        _calendar_id: &'a str,
        external_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(self.delete_event_impl(access_token, external_id))
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

    fn adapter(server: &mockito::ServerGuard) -> MicrosoftCalendarAdapter {
        MicrosoftCalendarAdapter::new(MicrosoftConfig::new().with_api_base(server.url())).unwrap()
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
    async fn default_calendar_uses_me_calendar_view() {
        let mut server = mockito::Server::new_async().await;
        let next_link = format!("{}/me/calendarView?$skip=1", server.url());
        let first = server
            .mock("GET", "/me/calendarView")
            .match_header("prefer", Matcher::Regex("outlook.timezone".into()))
            .match_query(Matcher::UrlEncoded(
                "startDateTime".into(),
                "2024-03-01T00:00:00Z".into(),
            ))
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "value": [{
                        "id": "m1",
                        "subject": "Sync",
                        "start": {"dateTime": "2024-03-05T10:00:00.0000000", "timeZone": "UTC"},
                        "end": {"dateTime": "2024-03-05T10:30:00.0000000", "timeZone": "UTC"},
                        "lastModifiedDateTime": "2024-03-02T00:00:00Z",
                        "changeKey": "ck"
                    }],
                    "@odata.nextLink": next_link
                })
                .to_string(),
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/me/calendarView")
            .match_query(Matcher::UrlEncoded("$skip".into(), "1".into()))
            .with_status(200)
            .with_body(r#"{"value":[{"id":"m2","subject":"no times"}]}"#)
            .create_async()
            .await;

        let listing = adapter(&server)
            .list_events("tok", DEFAULT_CALENDAR, window())
            .await
            .unwrap();

        first.assert_async().await;
        second.assert_async().await;
        assert_eq!(listing.events.len(), 1);
        assert_eq!(listing.events[0].calendar_id, None);
        assert_eq!(listing.malformed.len(), 1);
    }

    #[tokio::test]
    async fn create_in_named_calendar() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/me/calendars/cal-7/events")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "subject": "Review",
                "body": {"contentType": "text"}
            })))
            .with_status(201)
            .with_body(r#"{"id":"m9","changeKey":"ck9"}"#)
            .create_async()
            .await;

        let created = adapter(&server)
            .create_event("tok", "cal-7", &entry())
            .await
            .unwrap();
        assert_eq!(created.external_id, "m9");
        assert_eq!(created.version_tag.as_deref(), Some("ck9"));
        assert_eq!(created.calendar_id.as_deref(), Some("cal-7"));
    }

    #[tokio::test]
    async fn update_missing_event_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PATCH", "/me/events/m1")
            .with_status(404)
            .with_body(r#"{"error":{"code":"ErrorItemNotFound"}}"#)
            .create_async()
            .await;

        let err = adapter(&server)
            .update_event("tok", DEFAULT_CALENDAR, "m1", &entry())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::NotFound);
    }

    #[tokio::test]
    async fn throttling_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PATCH", "/me/events/m1")
            .with_status(429)
            .with_header("Retry-After", "3")
            .create_async()
            .await;

        let err = adapter(&server)
            .update_event("tok", DEFAULT_CALENDAR, "m1", &entry())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::RateLimited);
        assert!(err.message().contains("retry after 3 seconds"));
    }

    #[tokio::test]
    async fn delete_tolerates_missing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/me/events/m1")
            .with_status(404)
            .create_async()
            .await;

        adapter(&server)
            .delete_event("tok", DEFAULT_CALENDAR, "m1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn account_email_falls_back_to_upn() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/me")
            .with_status(200)
            .with_body(r#"{"mail":null,"userPrincipalName":"me@contoso.com"}"#)
            .create_async()
            .await;

        let email = adapter(&server).account_email("tok").await.unwrap();
        assert_eq!(email.as_deref(), Some("me@contoso.com"));
    }

    #[tokio::test]
    async fn expired_token_is_auth_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/me/calendars")
            .with_status(401)
            .create_async()
            .await;

        let err = adapter(&server).list_calendars("tok").await.unwrap_err();
        assert!(err.is_auth_failure());
    }
}
