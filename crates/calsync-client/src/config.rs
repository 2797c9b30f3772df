//! Client configuration.
//!
//! Settings live in `~/.config/calsync/config.toml`:
//!
//! ```toml
//! user_id = "me"
//! token_secret = "env::CALSYNC_TOKEN_SECRET"
//!
//! [sync]
//! window_days = 365
//! interval_secs = 900
//!
//! [google]
//! client_id = "pass::calsync/google-id"
//! client_secret = "pass::calsync/google-secret"
//! ```
//!
//! `token_secret`, `client_id` and `client_secret` accept secret references
//! (see [`crate::secret`]).

use std::path::{Path, PathBuf};
use std::time::Duration;

use calsync_core::{DEFAULT_WINDOW_DAYS, ProviderKind};
use calsync_engine::{EngineConfig, ProviderSettings, SchedulerConfig};
use calsync_providers::OAuthCredentials;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::secret;

const DEFAULT_USER_ID: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Owner of the local calendar; every stored row is keyed by it.
    pub user_id: Option<String>,
    /// Defaults to `calsync.db` in the data directory.
    pub database_path: Option<PathBuf>,
    /// Key material for the token vault.
    pub token_secret: Option<String>,
    pub sync: SyncSettings,
    pub google: Option<ProviderSection>,
    pub microsoft: Option<ProviderSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub window_days: i64,
    /// Seconds between daemon rounds.
    pub interval_secs: u64,
    pub conflict_window_secs: i64,
    pub http_timeout_secs: u64,
    /// Pull only; never create or update provider events.
    pub pull_only: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            interval_secs: 900,
            conflict_window_secs: 60,
            http_timeout_secs: 30,
            pull_only: false,
        }
    }
}

/// `[google]` / `[microsoft]` tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSection {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Calendar synced instead of the primary one.
    pub calendar_id: Option<String>,
    pub api_base: Option<String>,
    pub token_url: Option<String>,
    /// Where the provider sends the user back after consent.
    pub redirect_uri: Option<String>,
}

impl ProviderSection {
    fn to_settings(&self, provider: ProviderKind) -> ClientResult<ProviderSettings> {
        let client_id = secret::resolve_required(
            self.client_id.as_deref(),
            &format!("client_id is missing from the [{provider}] section"),
        )
        .map_err(ClientError::Config)?;
        let client_secret = secret::resolve_required(
            self.client_secret.as_deref(),
            &format!("client_secret is missing from the [{provider}] section"),
        )
        .map_err(ClientError::Config)?;

        let mut settings = ProviderSettings::new(OAuthCredentials::new(client_id, client_secret));
        if let Some(base) = &self.api_base {
            settings = settings.with_api_base(base);
        }
        if let Some(url) = &self.token_url {
            settings = settings.with_token_url(url);
        }
        if let Some(calendar_id) = &self.calendar_id {
            settings = settings.with_calendar_id(calendar_id);
        }
        Ok(settings)
    }
}

impl ClientConfig {
    /// Loads the default file, or defaults when it does not exist.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| ClientError::config(format!("failed to parse {}: {e}", path.display())))
    }

    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calsync")
    }

    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calsync")
    }

    pub fn user_id(&self) -> &str {
        self.user_id.as_deref().unwrap_or(DEFAULT_USER_ID)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("calsync.db"))
    }

    pub fn section(&self, provider: ProviderKind) -> Option<&ProviderSection> {
        match provider {
            ProviderKind::Google => self.google.as_ref(),
            ProviderKind::Microsoft => self.microsoft.as_ref(),
        }
    }

    /// Resolves secrets and builds the engine configuration.
    pub fn engine_config(&self) -> ClientResult<EngineConfig> {
        let token_secret = secret::resolve_required(
            self.token_secret.as_deref(),
            &format!(
                "token_secret is not set; add it to {}",
                Self::default_path().display()
            ),
        )
        .map_err(ClientError::Config)?;

        let mut config = EngineConfig::new(token_secret)
            .with_window_days(self.sync.window_days)
            .with_conflict_window(chrono::Duration::seconds(self.sync.conflict_window_secs))
            .with_http_timeout(Duration::from_secs(self.sync.http_timeout_secs));
        if let Some(section) = &self.google {
            config = config.with_google(section.to_settings(ProviderKind::Google)?);
        }
        if let Some(section) = &self.microsoft {
            config = config.with_microsoft(section.to_settings(ProviderKind::Microsoft)?);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::new(Duration::from_secs(self.sync.interval_secs.max(60)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: ClientConfig = toml::from_str("").unwrap();
        assert_eq!(config.user_id(), "default");
        assert_eq!(config.sync.window_days, 365);
        assert!(config.database_path().ends_with("calsync/calsync.db"));
        assert!(config.google.is_none());
    }

    #[test]
    fn full_file_builds_engine_config() {
        let content = r#"
user_id = "ada"
token_secret = "hunter2"

[sync]
window_days = 30
interval_secs = 120

[google]
client_id = "id.apps.googleusercontent.com"
client_secret = "shh"
calendar_id = "team"

[microsoft]
client_id = "ms-id"
client_secret = "ms-secret"
api_base = "http://127.0.0.1:8080/v1.0"
"#;
        let config: ClientConfig = toml::from_str(content).unwrap();
        let engine = config.engine_config().unwrap();
        assert_eq!(engine.window_days, 30);
        assert_eq!(
            engine.configured_providers(),
            vec![ProviderKind::Google, ProviderKind::Microsoft]
        );
        let google = engine.provider(ProviderKind::Google).unwrap();
        assert_eq!(google.calendar_id.as_deref(), Some("team"));
        assert_eq!(
            engine.provider(ProviderKind::Microsoft).unwrap().api_base.as_deref(),
            Some("http://127.0.0.1:8080/v1.0")
        );
        assert_eq!(config.scheduler_config().interval, Duration::from_secs(120));
    }

    #[test]
    fn missing_token_secret_is_reported() {
        let config: ClientConfig = toml::from_str("user_id = \"ada\"").unwrap();
        let err = config.engine_config().unwrap_err();
        assert!(err.to_string().contains("token_secret"));
    }

    #[test]
    fn provider_secrets_come_from_env() {
        unsafe {
            std::env::set_var("_CALSYNC_CFG_ID", "env-id");
            std::env::set_var("_CALSYNC_CFG_SECRET", "env-secret");
        }
        let content = r#"
token_secret = "x"
[google]
client_id = "env::_CALSYNC_CFG_ID"
client_secret = "env::_CALSYNC_CFG_SECRET"
"#;
        let config: ClientConfig = toml::from_str(content).unwrap();
        let engine = config.engine_config().unwrap();
        let google = engine.provider(ProviderKind::Google).unwrap();
        assert_eq!(google.credentials.client_id, "env-id");
        assert_eq!(google.credentials.client_secret, "env-secret");
        unsafe {
            std::env::remove_var("_CALSYNC_CFG_ID");
            std::env::remove_var("_CALSYNC_CFG_SECRET");
        }
    }

    #[test]
    fn bare_provider_section_is_rejected() {
        let config: ClientConfig = toml::from_str("token_secret = \"x\"\n[microsoft]\n").unwrap();
        let err = config.engine_config().unwrap_err();
        assert!(err.to_string().contains("[microsoft]"));
    }

    #[test]
    fn load_from_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "user_id = \"grace\"\n").unwrap();
        assert_eq!(ClientConfig::load_from(&path).unwrap().user_id(), "grace");

        std::fs::write(&path, "user_id = [").unwrap();
        assert!(ClientConfig::load_from(&path).is_err());
    }
}
