//! The reconciliation run.
//!
//! A run covers one (user, provider, calendar, window) tuple:
//!
//! 1. acquire a fresh access token,
//! 2. list both sides,
//! 3. apply provider-side changes (pulls, pull-creates, cancellations),
//! 4. apply local-side changes (pushes, push-creates, remote deletes),
//! 5. record a checkpoint and return the [`RunSummary`].
//!
//! Steps 1 and 2 are all-or-nothing. From step 3 on each case stands alone:
//! a failed case is recorded in the summary and the run moves on.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use calsync_core::{EntrySource, ExternalEvent, LocalEntry, ProviderKind, SyncLink, TimeWindow};
use calsync_providers::{BoxFuture, CalendarAdapter, ProviderResult, TokenRefresher};
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::resolver::{ConflictResolver, Side};
use crate::store::{Checkpoint, CheckpointStore, LinkRegistry, LocalStore};
use crate::summary::{ConflictNote, ItemFailure, RunSummary, SyncAction};
use crate::vault::TokenVault;

/// Decides whether an unlinked local entry is pushed to a provider.
pub trait PushPolicy: Send + Sync {
    fn should_push(&self, provider: ProviderKind, entry: &LocalEntry) -> bool;
}

/// Pushes entries the user authored; entries pulled from a calendar stay put.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserAuthoredOnly;

impl PushPolicy for UserAuthoredOnly {
    fn should_push(&self, _provider: ProviderKind, entry: &LocalEntry) -> bool {
        entry.source == EntrySource::User
    }
}

/// Never creates provider events from local entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct PullOnly;

impl PushPolicy for PullOnly {
    fn should_push(&self, _provider: ProviderKind, _entry: &LocalEntry) -> bool {
        false
    }
}

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub provider: ProviderKind,
    /// Defaults to the adapter's primary calendar.
    pub calendar_id: Option<String>,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    /// Checked between cases; once passed the run stops early.
    pub deadline: Option<Instant>,
}

impl SyncRequest {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            calendar_id: None,
            window_start: None,
            window_end: None,
            deadline: None,
        }
    }

    pub fn with_calendar(mut self, calendar_id: impl Into<String>) -> Self {
        self.calendar_id = Some(calendar_id.into());
        self
    }

    pub fn with_window(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.window_start = start;
        self.window_end = end;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Runs reconciliation for one user.
#[derive(Clone)]
pub struct Orchestrator {
    user_id: String,
    vault: TokenVault,
    links: LinkRegistry,
    entries: Arc<dyn LocalStore>,
    checkpoints: CheckpointStore,
    resolver: ConflictResolver,
    push_policy: Arc<dyn PushPolicy>,
    window_days: i64,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("user_id", &self.user_id)
            .field("resolver", &self.resolver)
            .field("window_days", &self.window_days)
            .finish_non_exhaustive()
    }
}

/// What one run talks to.
struct Target<'a> {
    adapter: &'a dyn CalendarAdapter,
    provider: ProviderKind,
    token: String,
    calendar_id: String,
    deadline: Option<Instant>,
}

impl Target<'_> {
    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

impl Orchestrator {
    pub fn new(
        user_id: impl Into<String>,
        vault: TokenVault,
        links: LinkRegistry,
        entries: Arc<dyn LocalStore>,
        checkpoints: CheckpointStore,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            vault,
            links,
            entries,
            checkpoints,
            resolver: ConflictResolver::default(),
            push_policy: Arc::new(UserAuthoredOnly),
            window_days: calsync_core::DEFAULT_WINDOW_DAYS,
        }
    }

    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_push_policy(mut self, policy: Arc<dyn PushPolicy>) -> Self {
        self.push_policy = policy;
        self
    }

    pub fn with_window_days(mut self, days: i64) -> Self {
        self.window_days = days;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Runs one reconciliation pass.
    ///
    /// Errors returned here are run-level: nothing was written. Per-item
    /// failures are reported inside the summary instead.
    pub async fn run(
        &self,
        adapter: &dyn CalendarAdapter,
        refresher: &dyn TokenRefresher,
        request: &SyncRequest,
    ) -> SyncResult<RunSummary> {
        let provider = adapter.provider();
        if request.provider != provider {
            return Err(SyncError::config(format!(
                "request for {} handed to the {provider} adapter",
                request.provider
            )));
        }
        let started_at = Utc::now();
        let window = TimeWindow::resolve(
            started_at,
            request.window_start,
            request.window_end,
            self.window_days,
        )
        .map_err(|e| SyncError::config(e.to_string()))?;
        let calendar_id = request
            .calendar_id
            .clone()
            .unwrap_or_else(|| adapter.primary_calendar_id().to_string());

        let credential = self.vault.load(&self.user_id, provider)?;
        let token = self
            .vault
            .ensure_fresh_access_token(&credential, refresher, started_at)
            .await?;

        let target = Target {
            adapter,
            provider,
            token,
            calendar_id,
            deadline: request.deadline,
        };

        let listing = with_retry(provider, "list_events", || {
            adapter.list_events(&target.token, &target.calendar_id, window)
        })
        .await?;
        let locals = self.entries.list_in_window(window)?;
        let links = self.links.list(provider)?;

        debug!(
            %provider,
            user = %self.user_id,
            calendar = %target.calendar_id,
            external = listing.events.len(),
            local = locals.len(),
            links = links.len(),
            "fetched both sides"
        );

        let mut summary = RunSummary::new(provider, target.calendar_id.clone(), window, started_at);

        for item in &listing.malformed {
            warn!(
                %provider,
                external_id = item.external_id.as_deref().unwrap_or("<none>"),
                reason = %item.reason,
                "skipping malformed provider event"
            );
            let err = SyncError::MalformedEvent {
                external_id: item.external_id.clone(),
                reason: item.reason.clone(),
            };
            summary.record_failure(ItemFailure::new(
                SyncAction::Normalize,
                None,
                item.external_id.as_deref(),
                &err,
            ));
        }

        let mut plan = Plan::new(locals, links);
        self.apply_external_side(&target, &listing.events, &mut plan, &mut summary)
            .await;
        if !summary.partial {
            self.apply_local_side(&target, &mut plan, &mut summary).await;
        }

        summary.last_sync_at = Utc::now();
        self.record_checkpoint(&summary);

        info!(
            %provider,
            user = %self.user_id,
            calendar = %summary.calendar_id,
            pulled = summary.pulled,
            pushed = summary.pushed,
            tombstoned = summary.tombstoned,
            remote_deleted = summary.remote_deleted,
            conflicts = summary.conflict_count(),
            failures = summary.failure_count(),
            partial = summary.partial,
            "sync run finished"
        );
        Ok(summary)
    }

    /// Phase one: everything the provider listing tells us.
    async fn apply_external_side(
        &self,
        target: &Target<'_>,
        events: &[ExternalEvent],
        plan: &mut Plan,
        summary: &mut RunSummary,
    ) {
        for event in events {
            if target.deadline_passed() {
                summary.partial = true;
                warn!(provider = %target.provider, "deadline passed during pull phase");
                return;
            }
            plan.listed.insert(event.external_id.clone());

            let Some(link) = plan.links_by_external.get(&event.external_id).cloned() else {
                if event.cancelled {
                    debug!(external_id = %event.external_id, "ignoring unlinked cancelled event");
                    continue;
                }
                match self.pull_create(target, event) {
                    Ok(()) => summary.pulled += 1,
                    Err(err) => record(
                        summary,
                        SyncAction::PullCreate,
                        None,
                        Some(event.external_id.as_str()),
                        &err,
                    ),
                }
                continue;
            };

            let local = match self.local_for(plan, &link.local_entry_id) {
                Ok(local) => local,
                Err(err) => {
                    record_link(summary, SyncAction::Pull, &link, &err);
                    plan.visited.insert(link.local_entry_id.clone());
                    continue;
                }
            };

            if event.cancelled {
                plan.visited.insert(link.local_entry_id.clone());
                match self.apply_cancellation(&link, local.as_ref()) {
                    Ok(true) => summary.tombstoned += 1,
                    Ok(false) => {}
                    Err(err) => record_link(summary, SyncAction::Tombstone, &link, &err),
                }
                continue;
            }

            // Local side deleted: the push phase removes the provider event.
            let Some(local) = local.filter(|l| !l.is_tombstoned()) else {
                continue;
            };
            plan.visited.insert(link.local_entry_id.clone());

            let local_changed = local.updated_at > link.last_synced_at;
            let external_changed = external_changed(&link, event);
            let winner = match (local_changed, external_changed) {
                (false, false) => continue,
                (true, false) => Some(Side::Local),
                (false, true) => Some(Side::External),
                (true, true) => {
                    let resolution = self
                        .resolver
                        .resolve(local.updated_at, event.provider_updated_at);
                    if resolution.is_conflict {
                        warn!(
                            provider = %target.provider,
                            local = %local.id,
                            external = %event.external_id,
                            winner = ?resolution.winner,
                            "concurrent edits on both sides"
                        );
                        summary.conflicts.push(ConflictNote {
                            local_entry_id: local.id.clone(),
                            external_event_id: event.external_id.clone(),
                            local_updated_at: local.updated_at,
                            external_updated_at: event.provider_updated_at,
                            winner: resolution.winner,
                        });
                    }
                    resolution.winner
                }
            };

            match winner {
                Some(Side::External) => match self.pull(&link, local, event) {
                    Ok(()) => summary.pulled += 1,
                    Err(err) => record_link(summary, SyncAction::Pull, &link, &err),
                },
                Some(Side::Local) => plan.pushes.push((link, local)),
                None => {
                    // Identical timestamps: settle the link so the pair is
                    // not reported again.
                    let settled = link
                        .clone()
                        .with_version_tag(event.version_tag.clone().or(link.version_tag.clone()));
                    if let Err(err) = self.links.upsert(&SyncLink {
                        last_synced_at: local.updated_at,
                        ..settled
                    }) {
                        record_link(summary, SyncAction::Pull, &link, &err);
                    }
                }
            }
        }
    }

    /// Phase two: local edits, local deletions and new local entries.
    async fn apply_local_side(
        &self,
        target: &Target<'_>,
        plan: &mut Plan,
        summary: &mut RunSummary,
    ) {
        let pushes = std::mem::take(&mut plan.pushes);
        for (link, local) in pushes {
            if target.deadline_passed() {
                summary.partial = true;
                break;
            }
            self.push_update(target, &link, &local, summary).await;
        }

        // Links the listing did not mention, or whose local entry is gone.
        let mut remaining: Vec<SyncLink> = plan
            .links_by_local
            .values()
            .filter(|l| !plan.visited.contains(&l.local_entry_id))
            .cloned()
            .collect();
        remaining.sort_by(|a, b| a.local_entry_id.cmp(&b.local_entry_id));
        for link in remaining {
            if summary.partial || target.deadline_passed() {
                summary.partial = true;
                break;
            }
            plan.visited.insert(link.local_entry_id.clone());
            let local = match self.local_for(plan, &link.local_entry_id) {
                Ok(local) => local,
                Err(err) => {
                    record_link(summary, SyncAction::Push, &link, &err);
                    continue;
                }
            };
            match local {
                Some(local) if !local.is_tombstoned() => {
                    // Unlisted event: only a local edit gives a reason to act.
                    if !plan.listed.contains(&link.external_event_id)
                        && local.updated_at > link.last_synced_at
                        && plan.by_id.contains_key(&local.id)
                    {
                        self.push_update(target, &link, &local, summary).await;
                    }
                }
                _ => self.remote_delete(target, &link, summary).await,
            }
        }

        let candidates: Vec<LocalEntry> = plan
            .locals
            .iter()
            .filter(|e| !plan.links_by_local.contains_key(&e.id))
            .filter(|e| self.push_policy.should_push(target.provider, e))
            .cloned()
            .collect();
        for entry in candidates {
            if summary.partial || target.deadline_passed() {
                summary.partial = true;
                warn!(provider = %target.provider, "deadline passed during push phase");
                break;
            }
            self.push_create(target, &entry, summary).await;
        }
    }

    /// Creates a local entry and its link for a new provider event.
    ///
    /// The link is written first so a failed insert can be rolled back
    /// without leaving an orphaned entry behind.
    fn pull_create(&self, target: &Target<'_>, event: &ExternalEvent) -> SyncResult<()> {
        let placeholder = event.start_at;
        let mut entry = LocalEntry::new(
            Uuid::new_v4().to_string(),
            event.title.clone(),
            placeholder,
            placeholder,
            placeholder,
        );
        entry.apply_external(event);

        let link = SyncLink::new(
            entry.id.clone(),
            target.provider,
            event.external_id.clone(),
            entry.updated_at,
        )
        .with_calendar(Some(
            event
                .calendar_id
                .clone()
                .unwrap_or_else(|| target.calendar_id.clone()),
        ))
        .with_version_tag(event.version_tag.clone());
        self.links.upsert(&link)?;

        if let Err(err) = self.entries.insert(&entry) {
            if let Err(cleanup) = self.links.remove(&link) {
                warn!(
                    error = %cleanup,
                    local = %entry.id,
                    "failed to drop link of unwritten entry"
                );
            }
            return Err(err.into());
        }
        debug!(local = %entry.id, external = %event.external_id, "pulled new event");
        Ok(())
    }

    /// Overwrites a linked local entry with the provider's version.
    ///
    /// The write only lands if the entry is unchanged since it was listed;
    /// otherwise the pair is left for the next run to resolve.
    fn pull(
        &self,
        link: &SyncLink,
        mut local: LocalEntry,
        event: &ExternalEvent,
    ) -> SyncResult<()> {
        let read_at = local.updated_at;
        local.apply_external(event);
        if !self.entries.update(&local, read_at)? {
            return Err(SyncError::StaleEntry {
                local_entry_id: local.id,
            });
        }
        let updated = SyncLink {
            version_tag: event.version_tag.clone(),
            last_synced_at: local.updated_at,
            ..link.clone()
        };
        self.links.upsert(&updated)?;
        debug!(local = %local.id, external = %event.external_id, "pulled update");
        Ok(())
    }

    /// Tombstones the local side of a cancelled event and drops the link.
    ///
    /// Returns true if an entry was tombstoned.
    fn apply_cancellation(&self, link: &SyncLink, local: Option<&LocalEntry>) -> SyncResult<bool> {
        let tombstoned = match local {
            Some(entry) if !entry.is_tombstoned() => self.entries.tombstone(&entry.id, Utc::now())?,
            _ => false,
        };
        self.links.remove(link)?;
        debug!(
            local = %link.local_entry_id,
            external = %link.external_event_id,
            tombstoned,
            "event cancelled"
        );
        Ok(tombstoned)
    }

    async fn push_update(
        &self,
        target: &Target<'_>,
        link: &SyncLink,
        local: &LocalEntry,
        summary: &mut RunSummary,
    ) {
        let calendar_id = link
            .external_calendar_id
            .as_deref()
            .unwrap_or(&target.calendar_id);
        let result = with_retry(target.provider, "update_event", || {
            target
                .adapter
                .update_event(&target.token, calendar_id, &link.external_event_id, local)
        })
        .await;

        match result {
            Ok(version_tag) => {
                // Edits made after the listing stay newer than this mark.
                let updated = SyncLink {
                    version_tag,
                    last_synced_at: local.updated_at,
                    ..link.clone()
                };
                match self.links.upsert(&updated) {
                    Ok(()) => {
                        summary.pushed += 1;
                        debug!(
                            local = %local.id,
                            external = %link.external_event_id,
                            "pushed update"
                        );
                    }
                    Err(err) => record_link(summary, SyncAction::Push, link, &err),
                }
            }
            Err(err) if err.is_not_found() => {
                // The provider event is gone for good.
                info!(
                    provider = %target.provider,
                    local = %local.id,
                    external = %link.external_event_id,
                    "provider event vanished; tombstoning local entry"
                );
                match self.apply_cancellation(link, Some(local)) {
                    Ok(true) => summary.tombstoned += 1,
                    Ok(false) => {}
                    Err(err) => record_link(summary, SyncAction::Tombstone, link, &err),
                }
            }
            Err(err) => record_link(summary, SyncAction::Push, link, &err),
        }
    }

    async fn remote_delete(&self, target: &Target<'_>, link: &SyncLink, summary: &mut RunSummary) {
        let calendar_id = link
            .external_calendar_id
            .as_deref()
            .unwrap_or(&target.calendar_id);
        let result = with_retry(target.provider, "delete_event", || {
            target
                .adapter
                .delete_event(&target.token, calendar_id, &link.external_event_id)
        })
        .await;

        let outcome = result.and_then(|()| self.links.remove(link).map_err(SyncError::from));
        match outcome {
            Ok(_) => {
                summary.remote_deleted += 1;
                debug!(
                    local = %link.local_entry_id,
                    external = %link.external_event_id,
                    "deleted provider event"
                );
            }
            Err(err) => record(
                summary,
                SyncAction::RemoteDelete,
                Some(link.local_entry_id.as_str()),
                Some(link.external_event_id.as_str()),
                &err,
            ),
        }
    }

    async fn push_create(&self, target: &Target<'_>, entry: &LocalEntry, summary: &mut RunSummary) {
        let result = with_retry(target.provider, "create_event", || {
            target
                .adapter
                .create_event(&target.token, &target.calendar_id, entry)
        })
        .await;
        let created = match result {
            Ok(created) => created,
            Err(err) => {
                record(summary, SyncAction::PushCreate, Some(entry.id.as_str()), None, &err);
                return;
            }
        };

        let link = SyncLink::new(
            entry.id.clone(),
            target.provider,
            created.external_id.clone(),
            entry.updated_at,
        )
        .with_calendar(Some(
            created
                .calendar_id
                .clone()
                .unwrap_or_else(|| target.calendar_id.clone()),
        ))
        .with_version_tag(created.version_tag.clone());

        match self.links.upsert(&link) {
            Ok(()) => {
                summary.pushed += 1;
                debug!(local = %entry.id, external = %created.external_id, "pushed new entry");
            }
            Err(err) => {
                // Without the link the next run would import the event back.
                warn!(
                    provider = %target.provider,
                    local = %entry.id,
                    external = %created.external_id,
                    error = %err,
                    "link write failed after create; deleting provider event"
                );
                let calendar_id = link
                    .external_calendar_id
                    .as_deref()
                    .unwrap_or(&target.calendar_id);
                if let Err(cleanup) = target
                    .adapter
                    .delete_event(&target.token, calendar_id, &created.external_id)
                    .await
                {
                    warn!(
                        error = %cleanup,
                        external = %created.external_id,
                        "compensating delete failed"
                    );
                }
                record_link(summary, SyncAction::PushCreate, &link, &err);
            }
        }
    }

    /// Looks a linked entry up, falling back to the store for entries
    /// outside the window or tombstoned.
    fn local_for(&self, plan: &Plan, id: &str) -> SyncResult<Option<LocalEntry>> {
        if let Some(entry) = plan.by_id.get(id) {
            return Ok(Some(entry.clone()));
        }
        Ok(self.entries.get(id)?)
    }

    fn record_checkpoint(&self, summary: &RunSummary) {
        let checkpoint = Checkpoint {
            provider: summary.provider,
            calendar_id: summary.calendar_id.clone(),
            last_sync_at: summary.last_sync_at,
            pulled: summary.pulled,
            pushed: summary.pushed,
            conflicts: summary.conflict_count(),
            failures: summary.failure_count(),
            partial: summary.partial,
        };
        if let Err(err) = self.checkpoints.record(&self.user_id, &checkpoint) {
            warn!(provider = %summary.provider, error = %err, "failed to record checkpoint");
        }
    }
}

/// Working state of a run.
struct Plan {
    locals: Vec<LocalEntry>,
    by_id: HashMap<String, LocalEntry>,
    links_by_external: HashMap<String, SyncLink>,
    links_by_local: HashMap<String, SyncLink>,
    /// External ids present in the listing.
    listed: HashSet<String>,
    /// Local ids whose link was fully handled already.
    visited: HashSet<String>,
    pushes: Vec<(SyncLink, LocalEntry)>,
}

impl Plan {
    fn new(locals: Vec<LocalEntry>, links: Vec<SyncLink>) -> Self {
        let by_id = locals.iter().map(|e| (e.id.clone(), e.clone())).collect();
        let links_by_external = links
            .iter()
            .map(|l| (l.external_event_id.clone(), l.clone()))
            .collect();
        let links_by_local = links
            .into_iter()
            .map(|l| (l.local_entry_id.clone(), l))
            .collect();
        Self {
            locals,
            by_id,
            links_by_external,
            links_by_local,
            listed: HashSet::new(),
            visited: HashSet::new(),
            pushes: Vec::new(),
        }
    }
}

/// The provider side changed since the link was last synced.
fn external_changed(link: &SyncLink, event: &ExternalEvent) -> bool {
    match (&link.version_tag, &event.version_tag) {
        (Some(known), Some(current)) => known != current,
        _ => event.provider_updated_at > link.last_synced_at,
    }
}

fn record_link(summary: &mut RunSummary, action: SyncAction, link: &SyncLink, err: &SyncError) {
    record(
        summary,
        action,
        Some(link.local_entry_id.as_str()),
        Some(link.external_event_id.as_str()),
        err,
    );
}

fn record(
    summary: &mut RunSummary,
    action: SyncAction,
    local: Option<&str>,
    external: Option<&str>,
    err: &SyncError,
) {
    warn!(
        provider = %summary.provider,
        ?action,
        local = local.unwrap_or("-"),
        external = external.unwrap_or("-"),
        error = %err,
        "sync item failed"
    );
    summary.record_failure(ItemFailure::new(action, local, external, err));
}

/// Calls a provider operation, retrying once on a retryable failure.
async fn with_retry<'a, T, F>(provider: ProviderKind, operation: &str, mut call: F) -> SyncResult<T>
where
    F: FnMut() -> BoxFuture<'a, ProviderResult<T>>,
{
    match call().await {
        Ok(value) => Ok(value),
        Err(err) if err.is_retryable() => {
            warn!(%provider, operation, error = %err, "retrying provider call");
            call().await.map_err(SyncError::from_provider)
        }
        Err(err) => Err(SyncError::from_provider(err)),
    }
}
