//! OAuth 2.0 token endpoint client.
//!
//! Both providers speak the same authorization-code and refresh-token
//! grants; they differ only in endpoint URLs, scopes and a few extra
//! authorization parameters, which [`OAuthEndpoints`] carries.

use std::time::Duration;

use calsync_core::ProviderKind;
use serde::Deserialize;
use tracing::{debug, info};

use crate::adapter::{BoxFuture, TokenRefresher, TokenSet};
use crate::error::{ProviderError, ProviderResult};
use crate::http;

/// OAuth client registration.
#[derive(Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl OAuthCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Checks that both halves are present.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.client_id.trim().is_empty() {
            return Err("client_id is required");
        }
        if self.client_secret.trim().is_empty() {
            return Err("client_secret is required");
        }
        Ok(())
    }
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Provider-specific endpoint description.
#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub auth_url: String,
    pub token_url: String,
    /// Space separated scope string.
    pub scope: String,
    /// Whether refresh requests repeat the scope.
    pub scope_on_refresh: bool,
    /// Extra query parameters for the consent URL.
    pub extra_auth_params: Vec<(String, String)>,
}

/// Talks to one provider's token endpoint.
#[derive(Debug)]
pub struct OAuthClient {
    provider: ProviderKind,
    credentials: OAuthCredentials,
    endpoints: OAuthEndpoints,
    http_client: reqwest::Client,
}

impl OAuthClient {
    pub fn new(
        provider: ProviderKind,
        credentials: OAuthCredentials,
        endpoints: OAuthEndpoints,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        credentials
            .validate()
            .map_err(|e| ProviderError::configuration(e).with_provider(provider))?;
        Ok(Self {
            provider,
            credentials,
            endpoints,
            http_client: http::build_client(provider, timeout)?,
        })
    }

    pub fn endpoints(&self) -> &OAuthEndpoints {
        &self.endpoints
    }

    /// Builds the consent page URL the user opens to grant access.
    pub fn authorization_url(&self, redirect_uri: &str, state: Option<&str>) -> String {
        let mut params: Vec<(&str, &str)> = vec![
            ("client_id", self.credentials.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", self.endpoints.scope.as_str()),
        ];
        for (key, value) in &self.endpoints.extra_auth_params {
            params.push((key.as_str(), value.as_str()));
        }
        if let Some(state) = state {
            params.push(("state", state));
        }

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.endpoints.auth_url, query)
    }

    /// Exchanges an authorization code for a token set.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> ProviderResult<TokenSet> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
            ("scope", self.endpoints.scope.as_str()),
        ];
        let tokens = self.post_token_form(&params).await?;
        info!(provider = %self.provider, "exchanged authorization code");
        Ok(tokens)
    }

    async fn refresh_token(&self, refresh_token: &str) -> ProviderResult<TokenSet> {
        let mut params = vec![
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        if self.endpoints.scope_on_refresh {
            params.push(("scope", self.endpoints.scope.as_str()));
        }
        let tokens = self.post_token_form(&params).await?;
        debug!(
            provider = %self.provider,
            expires_in = ?tokens.expires_in,
            "refreshed access token"
        );
        Ok(tokens)
    }

    async fn post_token_form(&self, params: &[(&str, &str)]) -> ProviderResult<TokenSet> {
        let response = self
            .http_client
            .post(&self.endpoints.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| http::send_error(self.provider, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| http::send_error(self.provider, e))?;

        if !status.is_success() {
            return Err(token_error(status.as_u16(), &body).with_provider(self.provider));
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(format!("invalid token response: {e}"))
                .with_provider(self.provider)
        })?;

        Ok(TokenSet {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token.filter(|t| !t.is_empty()),
            expires_in: parsed.expires_in,
            scope: parsed.scope,
        })
    }
}

impl TokenRefresher for OAuthClient {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, ProviderResult<TokenSet>> {
        Box::pin(self.refresh_token(refresh_token))
    }
}

/// Classifies a token endpoint failure.
///
/// A refused grant (any 400/401) means the stored refresh token is no longer
/// usable; everything else falls back to the regular status classification.
fn token_error(status: u16, body: &str) -> ProviderError {
    let detail = serde_json::from_str::<TokenErrorResponse>(body).ok();
    match status {
        400 | 401 => {
            let message = detail
                .map(|d| match d.error_description {
                    Some(desc) => format!("{}: {desc}", d.error),
                    None => d.error,
                })
                .unwrap_or_else(|| "token request refused".to_string());
            ProviderError::authentication(message).with_status(status)
        }
        _ => http::classify_status(status, body),
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}
