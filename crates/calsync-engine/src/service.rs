//! Account-level entry points: connect, sync, status, disconnect.
//!
//! [`SyncService`] wires one user's stores to the provider bindings built
//! from [`EngineConfig`] and exposes the operations the CLI and the
//! scheduler call.

use std::collections::BTreeMap;
use std::sync::Arc;

use calsync_core::{CredentialRecord, ProviderKind};
use calsync_providers::{
    CalendarAdapter, CalendarInfo, GoogleCalendarAdapter, GoogleConfig, MicrosoftCalendarAdapter,
    MicrosoftConfig, OAuthClient, ProviderError, TokenRefresher, TokenSet,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{EngineConfig, ProviderSettings};
use crate::error::{SyncError, SyncResult};
use crate::orchestrator::{Orchestrator, PushPolicy, SyncRequest};
use crate::resolver::ConflictResolver;
use crate::store::{
    Checkpoint, CheckpointStore, CredentialStore, Database, LinkRegistry, LocalStore,
};
use crate::summary::{RunSummary, SyncReply};
use crate::vault::{TokenCipher, TokenVault};

/// Everything needed to talk to one provider.
#[derive(Clone)]
pub struct ProviderBinding {
    pub adapter: Arc<dyn CalendarAdapter>,
    pub refresher: Arc<dyn TokenRefresher>,
    /// Needed for code exchange and consent URLs only.
    pub oauth: Option<Arc<OAuthClient>>,
    /// Calendar synced when a request names none.
    pub calendar_id: Option<String>,
}

impl std::fmt::Debug for ProviderBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderBinding")
            .field("provider", &self.adapter.provider())
            .field("calendar_id", &self.calendar_id)
            .finish_non_exhaustive()
    }
}

impl ProviderBinding {
    pub fn new(adapter: Arc<dyn CalendarAdapter>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            adapter,
            refresher,
            oauth: None,
            calendar_id: None,
        }
    }

    pub fn with_oauth(mut self, oauth: Arc<OAuthClient>) -> Self {
        self.oauth = Some(oauth);
        self
    }

    pub fn with_calendar_id(mut self, calendar_id: Option<String>) -> Self {
        self.calendar_id = calendar_id;
        self
    }

    /// Builds the HTTP adapter and OAuth client for a configured provider.
    pub fn from_settings(
        provider: ProviderKind,
        settings: &ProviderSettings,
        timeout: std::time::Duration,
    ) -> SyncResult<Self> {
        let to_config = |e: ProviderError| SyncError::config(e.to_string());
        let (adapter, oauth): (Arc<dyn CalendarAdapter>, OAuthClient) = match provider {
            ProviderKind::Google => {
                let mut config = GoogleConfig::new().with_timeout(timeout);
                if let Some(base) = &settings.api_base {
                    config = config.with_api_base(base.clone());
                }
                if let Some(url) = &settings.token_url {
                    config = config.with_token_url(url.clone());
                }
                let oauth = config
                    .oauth_client(settings.credentials.clone())
                    .map_err(to_config)?;
                let adapter = GoogleCalendarAdapter::new(config).map_err(to_config)?;
                (Arc::new(adapter), oauth)
            }
            ProviderKind::Microsoft => {
                let mut config = MicrosoftConfig::new().with_timeout(timeout);
                if let Some(base) = &settings.api_base {
                    config = config.with_api_base(base.clone());
                }
                if let Some(url) = &settings.token_url {
                    config = config.with_token_url(url.clone());
                }
                let oauth = config
                    .oauth_client(settings.credentials.clone())
                    .map_err(to_config)?;
                let adapter = MicrosoftCalendarAdapter::new(config).map_err(to_config)?;
                (Arc::new(adapter), oauth)
            }
        };
        let oauth = Arc::new(oauth);
        Ok(Self::new(adapter, oauth.clone())
            .with_oauth(oauth)
            .with_calendar_id(settings.calendar_id.clone()))
    }
}

/// Connection state of one provider, as shown by `status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    pub provider: ProviderKind,
    pub account_email: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
    pub can_refresh: bool,
    pub scope: Option<String>,
    pub link_count: usize,
    pub last_run: Option<Checkpoint>,
}

/// What `disconnect` removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectReport {
    pub credential_removed: bool,
    pub links_removed: usize,
}

/// Result of one provider inside `sync_all`.
#[derive(Debug)]
pub struct ProviderOutcome {
    pub provider: ProviderKind,
    pub result: SyncResult<RunSummary>,
}

/// Aggregate of a `sync_all` round.
#[derive(Debug, Default)]
pub struct SyncAllReport {
    pub outcomes: Vec<ProviderOutcome>,
}

impl SyncAllReport {
    pub fn pulled(&self) -> u32 {
        self.summaries().map(|s| s.pulled).sum()
    }

    pub fn pushed(&self) -> u32 {
        self.summaries().map(|s| s.pushed).sum()
    }

    pub fn conflicts(&self) -> u32 {
        self.summaries().map(|s| s.conflict_count()).sum()
    }

    /// Returns true if any provider run was aborted.
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.result.is_err())
    }

    pub fn replies(&self) -> Vec<(ProviderKind, SyncReply)> {
        self.outcomes
            .iter()
            .map(|o| (o.provider, SyncReply::from(&o.result)))
            .collect()
    }

    fn summaries(&self) -> impl Iterator<Item = &RunSummary> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }
}

/// One user's sync engine.
#[derive(Debug)]
pub struct SyncService {
    user_id: String,
    config: EngineConfig,
    vault: TokenVault,
    links: LinkRegistry,
    checkpoints: CheckpointStore,
    orchestrator: Orchestrator,
    bindings: BTreeMap<ProviderKind, ProviderBinding>,
}

impl SyncService {
    /// Builds the service and the HTTP bindings of every configured provider.
    pub fn new(
        db: Database,
        user_id: impl Into<String>,
        config: EngineConfig,
        entries: Arc<dyn LocalStore>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let mut bindings = BTreeMap::new();
        for provider in config.configured_providers() {
            if let Some(settings) = config.provider(provider) {
                let binding =
                    ProviderBinding::from_settings(provider, settings, config.http_timeout)?;
                bindings.insert(provider, binding);
            }
        }
        Self::with_bindings(db, user_id, config, entries, bindings)
    }

    /// Builds the service around explicit bindings.
    pub fn with_bindings(
        db: Database,
        user_id: impl Into<String>,
        config: EngineConfig,
        entries: Arc<dyn LocalStore>,
        bindings: BTreeMap<ProviderKind, ProviderBinding>,
    ) -> SyncResult<Self> {
        let user_id = user_id.into();
        let cipher = TokenCipher::new(&config.token_secret)?;
        let vault = TokenVault::new(
            cipher,
            CredentialStore::new(db.clone()),
            config.refresh_lookahead,
        );
        let links = LinkRegistry::new(db.clone(), user_id.clone());
        let checkpoints = CheckpointStore::new(db);
        let orchestrator = Orchestrator::new(
            user_id.clone(),
            vault.clone(),
            links.clone(),
            entries,
            checkpoints.clone(),
        )
        .with_resolver(ConflictResolver::new(config.conflict_window))
        .with_window_days(config.window_days);

        Ok(Self {
            user_id,
            config,
            vault,
            links,
            checkpoints,
            orchestrator,
            bindings,
        })
    }

    pub fn with_push_policy(mut self, policy: Arc<dyn PushPolicy>) -> Self {
        self.orchestrator = self.orchestrator.with_push_policy(policy);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn binding(&self, provider: ProviderKind) -> SyncResult<&ProviderBinding> {
        self.bindings.get(&provider).ok_or_else(|| {
            SyncError::config(format!("{provider} client credentials are not configured"))
        })
    }

    /// Runs one reconciliation for a provider.
    pub async fn run_sync(&self, mut request: SyncRequest) -> SyncResult<RunSummary> {
        let binding = self.binding(request.provider)?;
        if request.calendar_id.is_none() {
            request.calendar_id = binding.calendar_id.clone();
        }
        self.orchestrator
            .run(binding.adapter.as_ref(), binding.refresher.as_ref(), &request)
            .await
    }

    /// The inbound trigger: runs and folds the outcome into a [`SyncReply`].
    pub async fn sync(
        &self,
        provider: ProviderKind,
        calendar_id: Option<String>,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    ) -> SyncReply {
        let mut request = SyncRequest::new(provider).with_window(window_start, window_end);
        request.calendar_id = calendar_id;
        SyncReply::from(&self.run_sync(request).await)
    }

    /// Syncs every connected provider in turn.
    ///
    /// A failing provider is reported and does not stop the others.
    pub async fn sync_all(&self, deadline: Option<Instant>) -> SyncResult<SyncAllReport> {
        let mut report = SyncAllReport::default();
        for credential in self.vault.list(&self.user_id)? {
            let provider = credential.provider;
            let mut request = SyncRequest::new(provider);
            request.deadline = deadline;
            let result = self.run_sync(request).await;
            if let Err(err) = &result {
                warn!(%provider, user = %self.user_id, error = %err, "provider sync failed");
            }
            report.outcomes.push(ProviderOutcome { provider, result });
        }
        info!(
            user = %self.user_id,
            providers = report.outcomes.len(),
            pulled = report.pulled(),
            pushed = report.pushed(),
            conflicts = report.conflicts(),
            "sync round finished"
        );
        Ok(report)
    }

    /// Consent page URL for connecting a provider.
    pub fn authorization_url(
        &self,
        provider: ProviderKind,
        redirect_uri: &str,
        state: Option<&str>,
    ) -> SyncResult<String> {
        let oauth = self.oauth(provider)?;
        Ok(oauth.authorization_url(redirect_uri, state))
    }

    /// Exchanges an authorization code and stores the resulting credential.
    pub async fn connect_with_code(
        &self,
        provider: ProviderKind,
        code: &str,
        redirect_uri: &str,
    ) -> SyncResult<CredentialRecord> {
        let oauth = self.oauth(provider)?;
        let tokens = oauth
            .exchange_code(code, redirect_uri)
            .await
            .map_err(SyncError::from_provider)?;
        self.connect(provider, tokens).await
    }

    /// Stores a token set for a provider, recording the account address.
    pub async fn connect(
        &self,
        provider: ProviderKind,
        tokens: TokenSet,
    ) -> SyncResult<CredentialRecord> {
        let binding = self.binding(provider)?;
        let account_email = match binding.adapter.account_email(&tokens.access_token).await {
            Ok(email) => email,
            Err(err) => {
                warn!(%provider, error = %err, "could not look up account address");
                None
            }
        };
        let record = self.vault.store_new_credential(
            &self.user_id,
            provider,
            &tokens,
            account_email,
            Utc::now(),
        )?;
        info!(
            %provider,
            user = %self.user_id,
            account = record.account_email.as_deref().unwrap_or("-"),
            "calendar connected"
        );
        Ok(record)
    }

    /// Forgets the credential, links and checkpoint of a provider.
    pub fn disconnect(&self, provider: ProviderKind) -> SyncResult<DisconnectReport> {
        let links_removed = self.links.remove_all(provider)?;
        let credential_removed = self.vault.forget(&self.user_id, provider)?;
        self.checkpoints.delete(&self.user_id, provider)?;
        info!(%provider, user = %self.user_id, links_removed, "calendar disconnected");
        Ok(DisconnectReport {
            credential_removed,
            links_removed,
        })
    }

    /// Connection state of every connected provider.
    pub fn status(&self) -> SyncResult<Vec<AccountStatus>> {
        let now = Utc::now();
        self.vault
            .list(&self.user_id)?
            .into_iter()
            .map(|credential| {
                let provider = credential.provider;
                Ok(AccountStatus {
                    provider,
                    account_email: credential.account_email.clone(),
                    expires_at: credential.expires_at,
                    expired: credential.is_expired_at(now),
                    can_refresh: credential.has_refresh_token(),
                    scope: credential.scope.clone(),
                    link_count: self.links.list(provider)?.len(),
                    last_run: self.checkpoints.get(&self.user_id, provider)?,
                })
            })
            .collect()
    }

    /// Calendars the connected account can pick from.
    pub async fn calendars(&self, provider: ProviderKind) -> SyncResult<Vec<CalendarInfo>> {
        let binding = self.binding(provider)?;
        let credential = self.vault.load(&self.user_id, provider)?;
        let token = self
            .vault
            .ensure_fresh_access_token(&credential, binding.refresher.as_ref(), Utc::now())
            .await?;
        binding
            .adapter
            .list_calendars(&token)
            .await
            .map_err(SyncError::from_provider)
    }

    fn oauth(&self, provider: ProviderKind) -> SyncResult<&OAuthClient> {
        self.binding(provider)?
            .oauth
            .as_deref()
            .ok_or_else(|| SyncError::config(format!("{provider} has no OAuth client configured")))
    }
}
