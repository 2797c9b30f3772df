//! Microsoft Graph adapter configuration.

use std::time::Duration;

use calsync_core::ProviderKind;

use crate::error::ProviderResult;
use crate::oauth::{OAuthClient, OAuthCredentials, OAuthEndpoints};

pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
pub const MICROSOFT_AUTH_URL: &str =
    "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
pub const MICROSOFT_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
pub const MICROSOFT_SCOPE: &str = "offline_access Calendars.ReadWrite";

/// Pseudo calendar id meaning the mailbox's default calendar.
pub const DEFAULT_CALENDAR: &str = "default";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct MicrosoftConfig {
    pub api_base: String,
    pub auth_url: String,
    pub token_url: String,
    pub timeout: Duration,
    /// `$top` for calendarView pages.
    pub page_size: u32,
}

impl Default for MicrosoftConfig {
    fn default() -> Self {
        Self {
            api_base: GRAPH_API_BASE.to_string(),
            auth_url: MICROSOFT_AUTH_URL.to_string(),
            token_url: MICROSOFT_TOKEN_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            page_size: 100,
        }
    }
}

impl MicrosoftConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, 1000);
        self
    }

    /// Builds the token endpoint client for these settings.
    ///
    /// Microsoft expects the scope to be repeated on refresh.
    pub fn oauth_client(&self, credentials: OAuthCredentials) -> ProviderResult<OAuthClient> {
        let endpoints = OAuthEndpoints {
            auth_url: self.auth_url.clone(),
            token_url: self.token_url.clone(),
            scope: MICROSOFT_SCOPE.to_string(),
            scope_on_refresh: true,
            extra_auth_params: vec![("response_mode".to_string(), "query".to_string())],
        };
        OAuthClient::new(ProviderKind::Microsoft, credentials, endpoints, self.timeout)
    }
}
