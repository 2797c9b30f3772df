//! Classified provider failures.
//!
//! Adapters and token endpoints report every failure as a [`ProviderError`].
//! Its [`ProviderErrorCode`] is what the sync engine branches on: transient
//! codes are retried once, `NotFound` means the remote side is gone, and an
//! authentication failure on refresh ends the connection.

use std::fmt;

use calsync_core::ProviderKind;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorCode {
    /// 401, or the token endpoint refused the grant.
    Unauthenticated,
    /// 403.
    Forbidden,
    /// Connect failure, reset, timeout.
    Network,
    /// 429.
    RateLimited,
    /// 5xx.
    Upstream,
    /// A success status with a body we could not read.
    InvalidResponse,
    /// 404 or 410.
    NotFound,
    /// Any other 4xx.
    Rejected,
    /// Bad client id, base URL or HTTP client setup.
    Misconfigured,
}

impl ProviderErrorCode {
    /// Maps a non-success HTTP status onto a code.
    pub fn for_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthenticated,
            403 => Self::Forbidden,
            404 | 410 => Self::NotFound,
            429 => Self::RateLimited,
            400..=499 => Self::Rejected,
            _ => Self::Upstream,
        }
    }

    /// Transient codes: the same request may succeed if sent again.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::RateLimited | Self::Upstream)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::Network => "network",
            Self::RateLimited => "rate_limited",
            Self::Upstream => "upstream",
            Self::InvalidResponse => "invalid_response",
            Self::NotFound => "not_found",
            Self::Rejected => "rejected",
            Self::Misconfigured => "misconfigured",
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// A failed call to a calendar or token endpoint.
#[derive(Debug, Error)]
pub struct ProviderError {
    code: ProviderErrorCode,
    message: String,
    provider: Option<ProviderKind>,
    status: Option<u16>,
    #[source]
    source: Option<BoxedSource>,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider: None,
            status: None,
            source: None,
        }
    }

    /// An error for a non-success response, carrying its status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let mut err = Self::new(ProviderErrorCode::for_status(status), message);
        err.status = Some(status);
        err
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Unauthenticated, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Network, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Upstream, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InvalidResponse, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Rejected, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Misconfigured, message)
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Appends detail to the message, keeping code, status and source.
    pub fn with_detail(mut self, detail: impl fmt::Display) -> Self {
        self.message = format!("{}, {detail}", self.message);
        self
    }

    pub fn code(&self) -> ProviderErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn provider(&self) -> Option<ProviderKind> {
        self.provider
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_transient()
    }

    /// The remote resource no longer exists.
    pub fn is_not_found(&self) -> bool {
        self.code == ProviderErrorCode::NotFound
    }

    /// The credentials were refused.
    pub fn is_auth_failure(&self) -> bool {
        self.code == ProviderErrorCode::Unauthenticated
    }

    /// Clone without the source chain, which is not `Clone`.
    pub fn detached(&self) -> Self {
        Self {
            source: None,
            message: self.message.clone(),
            ..*self
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provider {
            Some(provider) => write!(f, "{provider} {}: {}", self.code, self.message)?,
            None => write!(f, "{}: {}", self.code, self.message)?,
        }
        match self.status {
            Some(status) => write!(f, " (HTTP {status})"),
            None => Ok(()),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
