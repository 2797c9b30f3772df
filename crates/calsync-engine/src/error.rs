//! Engine error types.
//!
//! [`SyncError`] is the taxonomy the orchestrator reasons with. Run-level
//! variants abort a run before any data is touched; the rest are recorded
//! against a single item and the run carries on.

use calsync_core::ProviderKind;
use calsync_providers::ProviderError;
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Failures of the SQLite layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Another thread panicked while holding the connection.
    #[error("database connection lock poisoned")]
    Poisoned,

    /// A stored value could not be decoded.
    #[error("corrupt value in column {column}: {value}")]
    Corrupt { column: &'static str, value: String },

    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn corrupt(column: &'static str, value: impl Into<String>) -> Self {
        Self::Corrupt {
            column,
            value: value.into(),
        }
    }
}

/// Token encryption failures. Always terminal for the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("token secret is not configured")]
    MissingSecret,

    #[error("malformed token cipher text: {0}")]
    Malformed(String),

    /// Authentication tag mismatch: tampered data or a different key.
    #[error("token cipher text failed authentication")]
    Authentication,

    #[error("decrypted token is not valid UTF-8")]
    Encoding,
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// The stored credential can no longer be refreshed.
    #[error("{provider} authorization expired; reconnect the calendar")]
    AuthExpired { provider: ProviderKind },

    #[error("token vault: {0}")]
    Crypto(#[from] CryptoError),

    #[error("{provider} calendar is not connected")]
    NotConnected { provider: ProviderKind },

    /// 4xx from the provider.
    #[error("provider rejected the request: {0}")]
    ProviderRejected(#[source] ProviderError),

    /// 5xx, timeout or rate limit.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(#[source] ProviderError),

    /// A link write would break the one-to-one mapping.
    #[error(
        "link conflict for {provider}: entry {local_entry_id} / event {external_event_id}: {reason}"
    )]
    LinkConflict {
        provider: ProviderKind,
        local_entry_id: String,
        external_event_id: String,
        reason: String,
    },

    #[error("malformed provider event {}: {reason}", external_id.as_deref().unwrap_or("<no id>"))]
    MalformedEvent {
        external_id: Option<String>,
        reason: String,
    },

    /// The local entry changed after it was read; the pull was not applied.
    #[error("entry {local_entry_id} changed during the run")]
    StaleEntry { local_entry_id: String },

    #[error("storage: {0}")]
    Storage(#[from] StoreError),

    #[error("configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Classifies a provider failure by retryability.
    pub fn from_provider(err: ProviderError) -> Self {
        if err.is_retryable() {
            Self::ProviderUnavailable(err)
        } else {
            Self::ProviderRejected(err)
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns true for errors that abort a whole run.
    pub fn is_run_level(&self) -> bool {
        matches!(
            self,
            Self::AuthExpired { .. }
                | Self::Crypto(_)
                | Self::NotConnected { .. }
                | Self::Storage(_)
                | Self::Config(_)
        )
    }

    /// Returns true if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_))
    }

    /// Returns true if the provider reported the target as gone.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::ProviderRejected(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Stable machine-readable name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthExpired { .. } => "auth_expired",
            Self::Crypto(_) => "crypto",
            Self::NotConnected { .. } => "not_connected",
            Self::ProviderRejected(_) => "provider_rejected",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::LinkConflict { .. } => "link_conflict",
            Self::MalformedEvent { .. } => "malformed_event",
            Self::StaleEntry { .. } => "stale_entry",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
        }
    }

    /// Message suitable for showing to the account owner.
    pub fn user_message(&self) -> String {
        match self {
            Self::AuthExpired { .. } => "reconnect your calendar".to_string(),
            Self::NotConnected { provider } => format!("connect your {provider} calendar first"),
            Self::Crypto(_) => "stored calendar credentials are unreadable; reconnect your calendar"
                .to_string(),
            Self::ProviderUnavailable(_) => {
                "the calendar service is temporarily unavailable; try again later".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_split_by_retryability() {
        let unavailable = SyncError::from_provider(ProviderError::server("boom"));
        assert!(unavailable.is_retryable());
        assert_eq!(unavailable.kind(), "provider_unavailable");

        let rejected = SyncError::from_provider(ProviderError::bad_request("bad"));
        assert!(!rejected.is_retryable());
        assert_eq!(rejected.kind(), "provider_rejected");

        let gone = SyncError::from_provider(ProviderError::not_found("gone"));
        assert!(gone.is_not_found());
    }

    #[test]
    fn run_level_classification() {
        assert!(
            SyncError::AuthExpired {
                provider: ProviderKind::Google
            }
            .is_run_level()
        );
        assert!(SyncError::Crypto(CryptoError::Authentication).is_run_level());
        assert!(!SyncError::from_provider(ProviderError::server("x")).is_run_level());
        assert!(
            !SyncError::MalformedEvent {
                external_id: None,
                reason: "x".into()
            }
            .is_run_level()
        );
        let stale = SyncError::StaleEntry {
            local_entry_id: "e1".into(),
        };
        assert!(!stale.is_run_level());
        assert_eq!(stale.kind(), "stale_entry");
    }

    #[test]
    fn auth_expired_asks_to_reconnect() {
        let err = SyncError::AuthExpired {
            provider: ProviderKind::Microsoft,
        };
        assert_eq!(err.user_message(), "reconnect your calendar");
    }
}
