//! In-memory provider fakes for engine tests.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use calsync_core::{ExternalEvent, LocalEntry, ProviderKind, TimeWindow};
use calsync_providers::{
    BoxFuture, CalendarAdapter, CalendarInfo, CreatedEvent, EventListing, MalformedItem,
    ProviderError, ProviderResult, TokenRefresher, TokenSet,
};
use chrono::Utc;

#[derive(Default)]
struct RemoteCalendar {
    events: BTreeMap<String, ExternalEvent>,
    malformed: Vec<MalformedItem>,
    next_id: u32,
    next_tag: u32,
    rejected_titles: HashSet<String>,
    list_failures: VecDeque<ProviderError>,
    update_failures: VecDeque<ProviderError>,
    calls: Vec<String>,
    tokens: Vec<String>,
}

impl RemoteCalendar {
    fn tag(&mut self) -> String {
        self.next_tag += 1;
        format!("v{}", self.next_tag)
    }

    fn log(&mut self, token: &str, call: String) {
        self.tokens.push(token.to_string());
        self.calls.push(call);
    }
}

/// A provider calendar held in memory.
///
/// Ids are handed out as `x1`, `x2`, ... and every write bumps the event's
/// version tag.
pub(crate) struct FakeAdapter {
    provider: ProviderKind,
    remote: Mutex<RemoteCalendar>,
}

impl FakeAdapter {
    pub(crate) fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            remote: Mutex::new(RemoteCalendar::default()),
        }
    }

    /// Seeds the calendar with an event as-is.
    pub(crate) fn put(&self, event: ExternalEvent) {
        let mut remote = self.remote.lock().unwrap();
        remote.events.insert(event.external_id.clone(), event);
    }

    pub(crate) fn get(&self, id: &str) -> Option<ExternalEvent> {
        self.remote.lock().unwrap().events.get(id).cloned()
    }

    /// Drops an event without leaving a cancelled marker behind.
    pub(crate) fn purge(&self, id: &str) {
        self.remote.lock().unwrap().events.remove(id);
    }

    pub(crate) fn add_malformed(&self, item: MalformedItem) {
        self.remote.lock().unwrap().malformed.push(item);
    }

    /// Creating an entry with this title fails with a 400.
    pub(crate) fn reject_title(&self, title: &str) {
        self.remote
            .lock()
            .unwrap()
            .rejected_titles
            .insert(title.to_string());
    }

    pub(crate) fn fail_next_list(&self, err: ProviderError) {
        self.remote.lock().unwrap().list_failures.push_back(err);
    }

    pub(crate) fn fail_next_update(&self, err: ProviderError) {
        self.remote.lock().unwrap().update_failures.push_back(err);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.remote.lock().unwrap().calls.clone()
    }

    /// Bearer tokens in call order.
    pub(crate) fn tokens(&self) -> Vec<String> {
        self.remote.lock().unwrap().tokens.clone()
    }

    pub(crate) fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

fn event_from_entry(id: &str, entry: &LocalEntry) -> ExternalEvent {
    let mut event = ExternalEvent::new(
        id,
        entry.title.clone(),
        entry.start_at,
        entry.end_at,
        Utc::now(),
    );
    event.all_day = entry.all_day;
    event.location = entry.location.clone();
    event.body_text = entry.body_text.clone();
    event
}

impl CalendarAdapter for FakeAdapter {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    fn primary_calendar_id(&self) -> &str {
        "primary"
    }

    fn list_events<'a>(
        &'a self,
        access_token: &'a str,
        _calendar_id: &'a str,
        window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<EventListing>> {
        Box::pin(async move {
            let mut remote = self.remote.lock().unwrap();
            remote.log(access_token, "list".to_string());
            if let Some(err) = remote.list_failures.pop_front() {
                return Err(err);
            }
            let events = remote
                .events
                .values()
                .filter(|e| e.cancelled || (e.start_at < window.end && e.end_at >= window.start))
                .cloned()
                .collect();
            Ok(EventListing {
                events,
                malformed: remote.malformed.clone(),
            })
        })
    }

    fn create_event<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        entry: &'a LocalEntry,
    ) -> BoxFuture<'a, ProviderResult<CreatedEvent>> {
        Box::pin(async move {
            let mut remote = self.remote.lock().unwrap();
            remote.log(access_token, format!("create:{}", entry.id));
            if remote.rejected_titles.contains(&entry.title) {
                return Err(ProviderError::bad_request("invalid event").with_status(400));
            }
            remote.next_id += 1;
            let id = format!("x{}", remote.next_id);
            let tag = remote.tag();
            let mut event = event_from_entry(&id, entry);
            event.calendar_id = Some(calendar_id.to_string());
            event.version_tag = Some(tag.clone());
            remote.events.insert(id.clone(), event);
            Ok(CreatedEvent {
                external_id: id,
                version_tag: Some(tag),
                calendar_id: Some(calendar_id.to_string()),
            })
        })
    }

    fn update_event<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        external_id: &'a str,
        entry: &'a LocalEntry,
    ) -> BoxFuture<'a, ProviderResult<Option<String>>> {
        Box::pin(async move {
            let mut remote = self.remote.lock().unwrap();
            remote.log(access_token, format!("update:{external_id}"));
            if let Some(err) = remote.update_failures.pop_front() {
                return Err(err);
            }
            if !remote.events.contains_key(external_id) {
                return Err(ProviderError::not_found("event not found").with_status(404));
            }
            let tag = remote.tag();
            let mut event = event_from_entry(external_id, entry);
            event.calendar_id = Some(calendar_id.to_string());
            event.version_tag = Some(tag.clone());
            remote.events.insert(external_id.to_string(), event);
            Ok(Some(tag))
        })
    }

    fn delete_event<'a>(
        &'a self,
        access_token: &'a str,
        _calendar_id: &'a str,
        external_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let mut remote = self.remote.lock().unwrap();
            remote.log(access_token, format!("delete:{external_id}"));
            remote.events.remove(external_id);
            Ok(())
        })
    }

    fn list_calendars<'a>(
        &'a self,
        access_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Vec<CalendarInfo>>> {
        Box::pin(async move {
            let mut remote = self.remote.lock().unwrap();
            remote.log(access_token, "calendars".to_string());
            Ok(vec![
                CalendarInfo::new("primary", "Ada Lovelace").with_primary(true),
                CalendarInfo::new("holidays", "Holidays").with_can_edit(false),
            ])
        })
    }

    fn account_email<'a>(
        &'a self,
        access_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Option<String>>> {
        Box::pin(async move {
            let mut remote = self.remote.lock().unwrap();
            remote.log(access_token, "me".to_string());
            Ok(Some("ada@example.com".to_string()))
        })
    }
}

/// Token endpoint that hands out `refreshed-1`, `refreshed-2`, ...
pub(crate) struct FakeRefresher {
    provider: ProviderKind,
    calls: AtomicUsize,
}

impl FakeRefresher {
    pub(crate) fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TokenRefresher for FakeRefresher {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    fn refresh<'a>(&'a self, _refresh_token: &'a str) -> BoxFuture<'a, ProviderResult<TokenSet>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TokenSet {
                access_token: format!("refreshed-{n}"),
                refresh_token: None,
                expires_in: Some(3600),
                scope: None,
            })
        })
    }
}
