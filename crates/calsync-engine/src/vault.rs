//! Token vault: encryption at rest and just-in-time access token refresh.
//!
//! Tokens are sealed with AES-256-GCM under a key derived as SHA-256 of the
//! server secret. Each encryption draws a fresh 96-bit nonce; the stored
//! form is `base64(nonce):base64(ciphertext)`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use calsync_core::{CredentialRecord, ProviderKind};
use calsync_providers::{TokenRefresher, TokenSet};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{CryptoError, SyncError, SyncResult};
use crate::store::CredentialStore;

const NONCE_LEN: usize = 12;

/// Symmetric cipher for tokens at rest.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher(<redacted>)")
    }
}

impl TokenCipher {
    /// Derives the key from the server secret.
    pub fn new(secret: &str) -> Result<Self, CryptoError> {
        if secret.is_empty() {
            return Err(CryptoError::MissingSecret);
        }
        let key = Sha256::digest(secret.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| CryptoError::Malformed("derived key has the wrong length".to_string()))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut iv = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut iv);
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| CryptoError::Malformed("plaintext too large".to_string()))?;
        Ok(format!("{}:{}", STANDARD.encode(iv), STANDARD.encode(sealed)))
    }

    pub fn decrypt(&self, cipher_text: &str) -> Result<String, CryptoError> {
        let (iv, sealed) = cipher_text
            .split_once(':')
            .ok_or_else(|| CryptoError::Malformed("missing ':' separator".to_string()))?;
        let iv = STANDARD
            .decode(iv)
            .map_err(|e| CryptoError::Malformed(format!("nonce: {e}")))?;
        if iv.len() != NONCE_LEN {
            return Err(CryptoError::Malformed(format!(
                "nonce is {} bytes, expected {NONCE_LEN}",
                iv.len()
            )));
        }
        let sealed = STANDARD
            .decode(sealed)
            .map_err(|e| CryptoError::Malformed(format!("ciphertext: {e}")))?;
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
            .map_err(|_| CryptoError::Authentication)?;
        String::from_utf8(plain).map_err(|_| CryptoError::Encoding)
    }
}

/// Owns credential storage and hands out usable access tokens.
#[derive(Debug, Clone)]
pub struct TokenVault {
    cipher: TokenCipher,
    credentials: CredentialStore,
    lookahead: Duration,
}

impl TokenVault {
    pub fn new(cipher: TokenCipher, credentials: CredentialStore, lookahead: Duration) -> Self {
        Self {
            cipher,
            credentials,
            lookahead,
        }
    }

    pub fn cipher(&self) -> &TokenCipher {
        &self.cipher
    }

    /// Loads the credential, failing with `NotConnected` when there is none.
    pub fn load(&self, user_id: &str, provider: ProviderKind) -> SyncResult<CredentialRecord> {
        self.credentials
            .get(user_id, provider)?
            .ok_or(SyncError::NotConnected { provider })
    }

    /// Returns an access token valid for at least the look-ahead period,
    /// refreshing and persisting it first when needed.
    pub async fn ensure_fresh_access_token(
        &self,
        credential: &CredentialRecord,
        refresher: &dyn TokenRefresher,
        now: DateTime<Utc>,
    ) -> SyncResult<String> {
        let provider = credential.provider;
        if !credential.needs_refresh_at(now, self.lookahead) {
            debug!(%provider, user = %credential.user_id, "access token still fresh");
            return Ok(self.cipher.decrypt(&credential.access_token_cipher)?);
        }

        let Some(refresh_cipher) = credential
            .refresh_token_cipher
            .as_deref()
            .filter(|c| !c.is_empty())
        else {
            if credential.is_expired_at(now) {
                warn!(
                    %provider,
                    user = %credential.user_id,
                    "access token expired and no refresh token"
                );
                return Err(SyncError::AuthExpired { provider });
            }
            warn!(
                %provider,
                user = %credential.user_id,
                "access token expires soon and cannot be refreshed"
            );
            return Ok(self.cipher.decrypt(&credential.access_token_cipher)?);
        };

        let refresh_token = self.cipher.decrypt(refresh_cipher)?;
        let tokens = refresher.refresh(&refresh_token).await.map_err(|e| {
            if e.is_auth_failure() {
                warn!(%provider, user = %credential.user_id, error = %e, "refresh token rejected");
                SyncError::AuthExpired { provider }
            } else {
                SyncError::from_provider(e)
            }
        })?;

        let mut updated = credential.clone();
        updated.access_token_cipher = self.cipher.encrypt(&tokens.access_token)?;
        updated.expires_at = tokens.expires_in.map(|secs| now + Duration::seconds(secs));
        if let Some(rotated) = tokens.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            updated.refresh_token_cipher = Some(self.cipher.encrypt(rotated)?);
        }
        if tokens.scope.is_some() {
            updated.scope = tokens.scope.clone();
        }
        self.credentials.upsert(&updated)?;

        info!(
            %provider,
            user = %credential.user_id,
            expires_at = ?updated.expires_at,
            "refreshed access token"
        );
        Ok(tokens.access_token)
    }

    /// Seals a freshly exchanged token set and stores it.
    ///
    /// A refresh token, scope or account address missing from the new set
    /// is carried over from the existing credential.
    pub fn store_new_credential(
        &self,
        user_id: &str,
        provider: ProviderKind,
        tokens: &TokenSet,
        account_email: Option<String>,
        now: DateTime<Utc>,
    ) -> SyncResult<CredentialRecord> {
        let existing = self.credentials.get(user_id, provider)?;

        let refresh_token_cipher = match tokens.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => Some(self.cipher.encrypt(token)?),
            None => existing.as_ref().and_then(|c| c.refresh_token_cipher.clone()),
        };
        let record = CredentialRecord {
            user_id: user_id.to_string(),
            provider,
            access_token_cipher: self.cipher.encrypt(&tokens.access_token)?,
            refresh_token_cipher,
            expires_at: tokens.expires_in.map(|secs| now + Duration::seconds(secs)),
            scope: tokens
                .scope
                .clone()
                .or_else(|| existing.as_ref().and_then(|c| c.scope.clone())),
            account_email: account_email
                .or_else(|| existing.as_ref().and_then(|c| c.account_email.clone())),
        };
        self.credentials.upsert(&record)?;
        info!(%provider, user = %user_id, "stored credential");
        Ok(record)
    }

    /// Deletes the credential. Returns true if one existed.
    pub fn forget(&self, user_id: &str, provider: ProviderKind) -> SyncResult<bool> {
        Ok(self.credentials.delete(user_id, provider)?)
    }

    pub fn list(&self, user_id: &str) -> SyncResult<Vec<CredentialRecord>> {
        Ok(self.credentials.list(user_id)?)
    }
}
