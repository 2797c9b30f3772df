//! Engine configuration.

use std::time::Duration as StdDuration;

use calsync_core::{DEFAULT_WINDOW_DAYS, ProviderKind};
use calsync_providers::OAuthCredentials;
use chrono::Duration;

use crate::error::{SyncError, SyncResult};

/// Timestamps closer than this are flagged as a conflict.
pub const DEFAULT_CONFLICT_WINDOW_MS: i64 = 60_000;

/// Access tokens expiring within this many seconds are refreshed first.
pub const DEFAULT_REFRESH_LOOKAHEAD_SECS: i64 = 300;

const DEFAULT_HTTP_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// OAuth client registration and endpoint overrides for one provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub credentials: OAuthCredentials,

    /// Calendar API base URL override.
    pub api_base: Option<String>,

    /// Token endpoint override.
    pub token_url: Option<String>,

    /// Calendar synced when a request names none.
    pub calendar_id: Option<String>,
}

impl ProviderSettings {
    pub fn new(credentials: OAuthCredentials) -> Self {
        Self {
            credentials,
            api_base: None,
            token_url: None,
            calendar_id: None,
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = Some(base.into());
        self
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = Some(url.into());
        self
    }

    pub fn with_calendar_id(mut self, calendar_id: impl Into<String>) -> Self {
        self.calendar_id = Some(calendar_id.into());
        self
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Server secret the token encryption key is derived from.
    pub token_secret: String,

    pub conflict_window: Duration,

    pub refresh_lookahead: Duration,

    /// Length of the default sync window, starting at today 00:00 UTC.
    pub window_days: i64,

    /// Per-request timeout for provider HTTP calls.
    pub http_timeout: StdDuration,

    pub google: Option<ProviderSettings>,

    pub microsoft: Option<ProviderSettings>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
            conflict_window: Duration::milliseconds(DEFAULT_CONFLICT_WINDOW_MS),
            refresh_lookahead: Duration::seconds(DEFAULT_REFRESH_LOOKAHEAD_SECS),
            window_days: DEFAULT_WINDOW_DAYS,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            google: None,
            microsoft: None,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with the given token secret.
    pub fn new(token_secret: impl Into<String>) -> Self {
        Self {
            token_secret: token_secret.into(),
            ..Default::default()
        }
    }

    pub fn with_conflict_window(mut self, window: Duration) -> Self {
        self.conflict_window = window;
        self
    }

    pub fn with_refresh_lookahead(mut self, lookahead: Duration) -> Self {
        self.refresh_lookahead = lookahead;
        self
    }

    pub fn with_window_days(mut self, days: i64) -> Self {
        self.window_days = days;
        self
    }

    pub fn with_http_timeout(mut self, timeout: StdDuration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_google(mut self, settings: ProviderSettings) -> Self {
        self.google = Some(settings);
        self
    }

    pub fn with_microsoft(mut self, settings: ProviderSettings) -> Self {
        self.microsoft = Some(settings);
        self
    }

    pub fn provider(&self, provider: ProviderKind) -> Option<&ProviderSettings> {
        match provider {
            ProviderKind::Google => self.google.as_ref(),
            ProviderKind::Microsoft => self.microsoft.as_ref(),
        }
    }

    /// Providers that have client credentials configured.
    pub fn configured_providers(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|p| self.provider(*p).is_some())
            .collect()
    }

    /// Checks the configuration for values the engine cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.token_secret.trim().is_empty() {
            return Err(SyncError::config("token_secret is required"));
        }
        if self.window_days <= 0 {
            return Err(SyncError::config("window_days must be positive"));
        }
        if self.conflict_window < Duration::zero() {
            return Err(SyncError::config("conflict window must not be negative"));
        }
        for provider in ProviderKind::ALL {
            if let Some(settings) = self.provider(provider) {
                settings
                    .credentials
                    .validate()
                    .map_err(|e| SyncError::config(format!("{provider}: {e}")))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.conflict_window, Duration::milliseconds(60_000));
        assert_eq!(config.refresh_lookahead, Duration::minutes(5));
        assert_eq!(config.window_days, 365);
        assert!(config.configured_providers().is_empty());
    }

    #[test]
    fn custom_config() {
        let config = EngineConfig::new("s3cret")
            .with_conflict_window(Duration::seconds(10))
            .with_window_days(30)
            .with_microsoft(
                ProviderSettings::new(OAuthCredentials::new("id", "secret"))
                    .with_calendar_id("work"),
            );

        assert_eq!(config.conflict_window, Duration::seconds(10));
        assert_eq!(config.window_days, 30);
        assert_eq!(config.configured_providers(), vec![ProviderKind::Microsoft]);
        assert_eq!(
            config
                .provider(ProviderKind::Microsoft)
                .and_then(|s| s.calendar_id.as_deref()),
            Some("work")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_secret() {
        let err = EngineConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("token_secret"));
    }

    #[test]
    fn validate_rejects_incomplete_credentials() {
        let settings = ProviderSettings::new(OAuthCredentials::new("id", ""));
        let config = EngineConfig::new("s").with_google(settings);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("google"));
        assert!(err.to_string().contains("client_secret"));
    }
}
