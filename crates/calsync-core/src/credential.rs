//! Encrypted OAuth credentials.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;

/// The stored OAuth credential for one (user, provider) pair.
///
/// Token fields hold cipher text produced by the token vault; they are never
/// persisted in plain text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub user_id: String,
    pub provider: ProviderKind,
    pub access_token_cipher: String,
    pub refresh_token_cipher: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    /// Mailbox the credential belongs to, recorded at connect time.
    pub account_email: Option<String>,
}

impl CredentialRecord {
    /// Returns true if the access token has an expiry at or before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Returns true if the access token expires within `lookahead` of `now`.
    ///
    /// A credential without a recorded expiry never needs a refresh.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>, lookahead: Duration) -> bool {
        self.expires_at.is_some_and(|at| at <= now + lookahead)
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token_cipher
            .as_deref()
            .is_some_and(|cipher| !cipher.is_empty())
    }
}
