//! Google Calendar adapter configuration.

use std::time::Duration;

use calsync_core::ProviderKind;

use crate::error::ProviderResult;
use crate::oauth::{OAuthClient, OAuthCredentials, OAuthEndpoints};

/// Base URL for Google Calendar API v3.
pub const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Read/write access to events; listing calendars needs the read-only list scope.
pub const GOOGLE_SCOPE: &str = "https://www.googleapis.com/auth/calendar.events https://www.googleapis.com/auth/calendar.readonly";

/// Calendar id Google resolves to the account's main calendar.
pub const PRIMARY_CALENDAR: &str = "primary";

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Endpoints and HTTP settings for Google.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub api_base: String,
    pub auth_url: String,
    pub token_url: String,
    pub timeout: Duration,
    /// Events requested per listing page.
    pub page_size: u32,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            api_base: CALENDAR_API_BASE.to_string(),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            page_size: 250,
        }
    }
}

impl GoogleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points API calls at another base URL.
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
        self.page_size = page_size.clamp(1, 2500);
        self
    }

    /// Builds the token endpoint client for these settings.
    pub fn oauth_client(&self, credentials: OAuthCredentials) -> ProviderResult<OAuthClient> {
        let endpoints = OAuthEndpoints {
            auth_url: self.auth_url.clone(),
            token_url: self.token_url.clone(),
            scope: GOOGLE_SCOPE.to_string(),
            scope_on_refresh: false,
            extra_auth_params: vec![
                ("access_type".to_string(), "offline".to_string()),
                ("prompt".to_string(), "consent".to_string()),
            ],
        };
        OAuthClient::new(ProviderKind::Google, credentials, endpoints, self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_base_drops_trailing_slash() {
        let config = GoogleConfig::new().with_api_base("http://127.0.0.1:1234/");
        assert_eq!(config.api_base, "http://127.0.0.1:1234");
    }

    #[test]
    fn page_size_is_clamped() {
        assert_eq!(GoogleConfig::new().with_page_size(0).page_size, 1);
        assert_eq!(GoogleConfig::new().with_page_size(10_000).page_size, 2500);
    }
}
