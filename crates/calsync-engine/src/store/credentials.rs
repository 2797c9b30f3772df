//! Encrypted OAuth credentials, one row per (user, provider).

use calsync_core::{CredentialRecord, ProviderKind};
use rusqlite::{OptionalExtension, Row, params};

use super::{Database, decode_opt_time, encode_time};
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct CredentialStore {
    db: Database,
}

impl CredentialStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(
        &self,
        user_id: &str,
        provider: ProviderKind,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT user_id, provider, access_token_cipher, refresh_token_cipher,
                            expires_at, scope, account_email
                     FROM credentials WHERE user_id = ?1 AND provider = ?2",
                    params![user_id, provider.as_str()],
                    RawCredential::from_row,
                )
                .optional()?;
            row.map(RawCredential::decode).transpose()
        })
    }

    /// Inserts or replaces the credential for the record's (user, provider).
    pub fn upsert(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO credentials
                    (user_id, provider, access_token_cipher, refresh_token_cipher,
                     expires_at, scope, account_email)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(user_id, provider) DO UPDATE SET
                    access_token_cipher = excluded.access_token_cipher,
                    refresh_token_cipher = excluded.refresh_token_cipher,
                    expires_at = excluded.expires_at,
                    scope = excluded.scope,
                    account_email = excluded.account_email",
                params![
                    record.user_id,
                    record.provider.as_str(),
                    record.access_token_cipher,
                    record.refresh_token_cipher,
                    record.expires_at.map(encode_time),
                    record.scope,
                    record.account_email,
                ],
            )?;
            Ok(())
        })
    }

    /// Removes the credential. Returns true if one existed.
    pub fn delete(&self, user_id: &str, provider: ProviderKind) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM credentials WHERE user_id = ?1 AND provider = ?2",
                params![user_id, provider.as_str()],
            )?;
            Ok(n > 0)
        })
    }

    /// All credentials of a user, ordered by provider.
    pub fn list(&self, user_id: &str) -> Result<Vec<CredentialRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, provider, access_token_cipher, refresh_token_cipher,
                        expires_at, scope, account_email
                 FROM credentials WHERE user_id = ?1 ORDER BY provider",
            )?;
            let rows = stmt
                .query_map(params![user_id], RawCredential::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(RawCredential::decode).collect()
        })
    }
}

struct RawCredential {
    user_id: String,
    provider: String,
    access_token_cipher: String,
    refresh_token_cipher: Option<String>,
    expires_at: Option<String>,
    scope: Option<String>,
    account_email: Option<String>,
}

impl RawCredential {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            provider: row.get(1)?,
            access_token_cipher: row.get(2)?,
            refresh_token_cipher: row.get(3)?,
            expires_at: row.get(4)?,
            scope: row.get(5)?,
            account_email: row.get(6)?,
        })
    }

    fn decode(self) -> Result<CredentialRecord, StoreError> {
        let provider = self
            .provider
            .parse::<ProviderKind>()
            .map_err(|_| StoreError::corrupt("credentials.provider", &self.provider))?;
        Ok(CredentialRecord {
            user_id: self.user_id,
            provider,
            access_token_cipher: self.access_token_cipher,
            refresh_token_cipher: self.refresh_token_cipher,
            expires_at: decode_opt_time("credentials.expires_at", self.expires_at)?,
            scope: self.scope,
            account_email: self.account_email,
        })
    }
}
