//! Postgres store backend
//!
//! Straight sqlx over the three tables created by `migrations/`. Unique
//! violations (error code 23505) are translated to
//! [`StoreError::UniqueViolation`] so callers see the same vocabulary the
//! in-memory backend produces.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    Account, AuthStore, LinkedIdentity, NewAccount, NewLinkedIdentity, NewRefreshCredential,
    RefreshCredential, StoreError,
};
use crate::provider::ProviderKind;

const ACCOUNT_COLUMNS: &str = "id, email, email_verified, primary_provider, primary_subject_id, \
                               created_at, updated_at, last_login_at";
const LINK_COLUMNS: &str = "id, account_id, provider, subject_id, provider_email, linked_at";
const CREDENTIAL_COLUMNS: &str = "id, account_id, token_hash, expires_at, revoked, created_at";

/// Postgres-backed implementation of [`AuthStore`]
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing connection pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Translate Postgres unique-violation errors into the store vocabulary
fn map_insert_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("23505") {
            let constraint = db.constraint().unwrap_or("unknown").to_string();
            return StoreError::UniqueViolation(constraint);
        }
    }
    StoreError::Database(e)
}

#[async_trait]
impl AuthStore for PgStore {
    async fn account_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn account_by_primary_identity(
        &self,
        provider: ProviderKind,
        subject_id: &str,
    ) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE primary_provider = $1 AND primary_subject_id = $2"
        ))
        .bind(provider.as_str())
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn insert_account(&self, new: NewAccount) -> Result<Account, StoreError> {
        sqlx::query_as::<_, Account>(&format!(
            "INSERT INTO accounts \
                 (email, email_verified, primary_provider, primary_subject_id, last_login_at) \
             VALUES ($1, $2, $3, $4, now()) \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(&new.email)
        .bind(new.email_verified)
        .bind(new.primary_provider.as_str())
        .bind(&new.primary_subject_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_insert_error)
    }

    async fn touch_last_login(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE accounts SET last_login_at = now(), updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn linked_identity_by_pair(
        &self,
        provider: ProviderKind,
        subject_id: &str,
    ) -> Result<Option<LinkedIdentity>, StoreError> {
        let link = sqlx::query_as::<_, LinkedIdentity>(&format!(
            "SELECT {LINK_COLUMNS} FROM linked_identities \
             WHERE provider = $1 AND subject_id = $2"
        ))
        .bind(provider.as_str())
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(link)
    }

    async fn linked_identities_for(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<LinkedIdentity>, StoreError> {
        let links = sqlx::query_as::<_, LinkedIdentity>(&format!(
            "SELECT {LINK_COLUMNS} FROM linked_identities \
             WHERE account_id = $1 ORDER BY linked_at DESC"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(links)
    }

    async fn insert_linked_identity(
        &self,
        new: NewLinkedIdentity,
    ) -> Result<LinkedIdentity, StoreError> {
        sqlx::query_as::<_, LinkedIdentity>(&format!(
            "INSERT INTO linked_identities (account_id, provider, subject_id, provider_email) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {LINK_COLUMNS}"
        ))
        .bind(new.account_id)
        .bind(new.provider.as_str())
        .bind(&new.subject_id)
        .bind(&new.provider_email)
        .fetch_one(&self.pool)
        .await
        .map_err(map_insert_error)
    }

    async fn delete_linked_identity(
        &self,
        account_id: Uuid,
        provider: ProviderKind,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM linked_identities WHERE account_id = $1 AND provider = $2")
                .bind(account_id)
                .bind(provider.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_refresh_credential(
        &self,
        new: NewRefreshCredential,
    ) -> Result<RefreshCredential, StoreError> {
        sqlx::query_as::<_, RefreshCredential>(&format!(
            "INSERT INTO refresh_credentials (account_id, token_hash, expires_at) \
             VALUES ($1, $2, $3) \
             RETURNING {CREDENTIAL_COLUMNS}"
        ))
        .bind(new.account_id)
        .bind(&new.token_hash)
        .bind(new.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_insert_error)
    }

    async fn refresh_credential_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshCredential>, StoreError> {
        let credential = sqlx::query_as::<_, RefreshCredential>(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM refresh_credentials WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(credential)
    }

    async fn revoke_refresh_credential(&self, token_hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_credentials SET revoked = TRUE \
             WHERE token_hash = $1 AND revoked = FALSE",
        )
        .bind(token_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_refresh_credentials(&self, account_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_credentials SET revoked = TRUE \
             WHERE account_id = $1 AND revoked = FALSE",
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn rotate_refresh_credential(
        &self,
        old_token_hash: &str,
        new: NewRefreshCredential,
    ) -> Result<Option<RefreshCredential>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let revoked = sqlx::query(
            "UPDATE refresh_credentials SET revoked = TRUE \
             WHERE token_hash = $1 AND revoked = FALSE",
        )
        .bind(old_token_hash)
        .execute(&mut *tx)
        .await?;

        if revoked.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let credential = sqlx::query_as::<_, RefreshCredential>(&format!(
            "INSERT INTO refresh_credentials (account_id, token_hash, expires_at) \
             VALUES ($1, $2, $3) \
             RETURNING {CREDENTIAL_COLUMNS}"
        ))
        .bind(new.account_id)
        .bind(&new.token_hash)
        .bind(new.expires_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_insert_error)?;

        tx.commit().await?;
        Ok(Some(credential))
    }
}
