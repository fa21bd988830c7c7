//! Persistence contract and records
//!
//! The broker core reaches its relational store exclusively through the
//! [`AuthStore`] trait. The store's unique constraints (account email, the
//! (provider, subject id) pairs, refresh-token hashes) are the final arbiter
//! of correctness under concurrent requests; the services' check-then-act
//! sequences are fast paths only, and every caller treats an insert-time
//! [`StoreError::UniqueViolation`] as equivalent to a failed pre-check.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

use crate::provider::ProviderKind;

/// Internal identity anchor
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    /// Opaque unique id
    pub id: Uuid,
    /// Case-normalized, globally unique email
    pub email: String,
    /// Whether the primary provider attested the email as verified
    pub email_verified: bool,
    /// Provider the account was first created from
    #[sqlx(try_from = "String")]
    pub primary_provider: ProviderKind,
    /// Subject id at the primary provider
    pub primary_subject_id: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp
    pub updated_at: Option<DateTime<Utc>>,
    /// Last successful login
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Fields needed to create an [`Account`]
#[derive(Debug, Clone)]
pub struct NewAccount {
    /// Already-lowercased email
    pub email: String,
    /// Provider attestation of the email
    pub email_verified: bool,
    /// Primary identity provider
    pub primary_provider: ProviderKind,
    /// Primary subject id
    pub primary_subject_id: String,
}

/// A secondary external identity attached to an account
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LinkedIdentity {
    /// Opaque id
    pub id: Uuid,
    /// Owning account
    pub account_id: Uuid,
    /// Identity provider
    #[sqlx(try_from = "String")]
    pub provider: ProviderKind,
    /// Subject id at the provider
    pub subject_id: String,
    /// Email the provider reported at link time (lowercased)
    pub provider_email: String,
    /// When the identity was attached
    pub linked_at: DateTime<Utc>,
}

/// Fields needed to create a [`LinkedIdentity`]
#[derive(Debug, Clone)]
pub struct NewLinkedIdentity {
    /// Owning account
    pub account_id: Uuid,
    /// Identity provider
    pub provider: ProviderKind,
    /// Subject id at the provider
    pub subject_id: String,
    /// Already-lowercased provider-reported email
    pub provider_email: String,
}

/// Server-side record backing an opaque refresh token
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RefreshCredential {
    /// Opaque id
    pub id: Uuid,
    /// Owning account
    pub account_id: Uuid,
    /// SHA-256 hash of the token secret; the secret itself is never stored
    pub token_hash: String,
    /// Hard expiry
    pub expires_at: DateTime<Utc>,
    /// Soft-revocation flag; rows are never deleted by normal flows
    pub revoked: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a [`RefreshCredential`]
#[derive(Debug, Clone)]
pub struct NewRefreshCredential {
    /// Owning account
    pub account_id: Uuid,
    /// SHA-256 hash of the secret
    pub token_hash: String,
    /// Hard expiry
    pub expires_at: DateTime<Utc>,
}

/// Storage failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint would be violated
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Underlying database failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository contract for the broker's three tables
///
/// Implementations must enforce the uniqueness invariants described on the
/// record types and return [`StoreError::UniqueViolation`] when an insert
/// would break one.
#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Fetch an account by id
    async fn account_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Fetch an account by (already-lowercased) email
    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    /// Fetch an account by its primary (provider, subject id) pair
    async fn account_by_primary_identity(
        &self,
        provider: ProviderKind,
        subject_id: &str,
    ) -> Result<Option<Account>, StoreError>;

    /// Insert a new account with last login set to now
    async fn insert_account(&self, new: NewAccount) -> Result<Account, StoreError>;

    /// Set an account's last-login timestamp to now; no-op when missing
    async fn touch_last_login(&self, id: Uuid) -> Result<(), StoreError>;

    /// Fetch a linked identity by its (provider, subject id) pair
    async fn linked_identity_by_pair(
        &self,
        provider: ProviderKind,
        subject_id: &str,
    ) -> Result<Option<LinkedIdentity>, StoreError>;

    /// All linked identities for an account, newest first
    async fn linked_identities_for(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<LinkedIdentity>, StoreError>;

    /// Attach a linked identity
    async fn insert_linked_identity(
        &self,
        new: NewLinkedIdentity,
    ) -> Result<LinkedIdentity, StoreError>;

    /// Remove the linked identity for (account, provider); reports whether a
    /// row was actually deleted
    async fn delete_linked_identity(
        &self,
        account_id: Uuid,
        provider: ProviderKind,
    ) -> Result<bool, StoreError>;

    /// Persist a new refresh credential
    async fn insert_refresh_credential(
        &self,
        new: NewRefreshCredential,
    ) -> Result<RefreshCredential, StoreError>;

    /// Fetch a refresh credential by token hash, revoked or not
    async fn refresh_credential_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshCredential>, StoreError>;

    /// Mark the credential with this hash revoked
    ///
    /// Returns `true` only when an active credential transitioned to
    /// revoked; unknown or already-revoked hashes return `false`.
    async fn revoke_refresh_credential(&self, token_hash: &str) -> Result<bool, StoreError>;

    /// Mark every credential for the account revoked; returns how many
    /// transitioned
    async fn revoke_all_refresh_credentials(&self, account_id: Uuid) -> Result<u64, StoreError>;

    /// Atomically revoke the old credential and insert a replacement
    ///
    /// Returns `None` without inserting when the old credential is unknown
    /// or already revoked. Implementations must make the two steps a single
    /// transaction so a crash cannot revoke without issuing.
    async fn rotate_refresh_credential(
        &self,
        old_token_hash: &str,
        new: NewRefreshCredential,
    ) -> Result<Option<RefreshCredential>, StoreError>;
}
