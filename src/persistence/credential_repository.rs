//! Credential Repository
//!
//! Durable token pair per external-account scope. One row per scope, upserted
//! on every refresh so the rotated refresh token survives restarts.

use super::DbPool;
use crate::domain::entities::credential::TokenPair;
use crate::domain::errors::CredentialError;
use crate::domain::repositories::credential_store::CredentialStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{debug, error};
use zeroize::Zeroizing;

pub struct SqliteCredentialStore {
    pool: DbPool,
}

impl SqliteCredentialStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn load(&self, scope: &str) -> Result<Option<TokenPair>, CredentialError> {
        let row = sqlx::query(
            "SELECT access_token, refresh_token, expires_at FROM external_credentials WHERE scope = ?1",
        )
        .bind(scope)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load credentials for scope {}: {}", scope, e);
            CredentialError::Persistence(e.to_string())
        })?;

        Ok(row.map(|row| TokenPair {
            access_token: Zeroizing::new(row.get::<String, _>("access_token")),
            refresh_token: Zeroizing::new(row.get::<String, _>("refresh_token")),
            expires_at: row.get::<Option<DateTime<Utc>>, _>("expires_at"),
        }))
    }

    async fn save(&self, scope: &str, tokens: &TokenPair) -> Result<(), CredentialError> {
        sqlx::query(
            r#"
            INSERT INTO external_credentials (scope, access_token, refresh_token, expires_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(scope) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(scope)
        .bind(tokens.access_token.as_str())
        .bind(tokens.refresh_token.as_str())
        .bind(tokens.expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save credentials for scope {}: {}", scope, e);
            CredentialError::Persistence(e.to_string())
        })?;

        debug!("Credentials for scope {} saved", scope);
        Ok(())
    }
}
