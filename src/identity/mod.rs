//! Identity resolution and account lifecycle
//!
//! Maps a (provider, subject id) pair to an internal account, creating the
//! account on first login. The two-tier resolve (primary identity first,
//! linked identities second) is the only way a provider identity maps to an
//! account; callers never special-case primary vs linked.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Error;
use crate::provider::ProviderKind;
use crate::store::{Account, AuthStore, NewAccount, StoreError};

/// Read-only projection of an account with its linked identities
///
/// Subject ids are deliberately absent; the view is safe to hand to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
    /// Account id
    pub id: Uuid,
    /// Account email
    pub email: String,
    /// Whether the primary provider attested the email
    pub email_verified: bool,
    /// Provider the account was created from
    pub primary_provider: ProviderKind,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last successful login
    pub last_login_at: Option<DateTime<Utc>>,
    /// Secondary identities attached to the account
    pub linked_identities: Vec<LinkedIdentitySummary>,
}

/// One linked identity as exposed in a [`ProfileView`]
#[derive(Debug, Clone, Serialize)]
pub struct LinkedIdentitySummary {
    /// Identity provider
    pub provider: ProviderKind,
    /// Email the provider reported at link time
    pub email: String,
    /// When the identity was attached
    pub linked_at: DateTime<Utc>,
}

/// Maps external identities to internal accounts
pub struct IdentityResolver {
    store: Arc<dyn AuthStore>,
}

impl IdentityResolver {
    /// Create a resolver over a store
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store }
    }

    /// Fetch an account by id
    ///
    /// # Errors
    ///
    /// Returns a store error if the lookup fails.
    pub async fn account_by_id(&self, id: Uuid) -> Result<Option<Account>, Error> {
        Ok(self.store.account_by_id(id).await?)
    }

    /// Fetch an account by email (lowercased before lookup)
    ///
    /// # Errors
    ///
    /// Returns a store error if the lookup fails.
    pub async fn account_by_email(&self, email: &str) -> Result<Option<Account>, Error> {
        Ok(self.store.account_by_email(&email.to_lowercase()).await?)
    }

    /// Resolve a (provider, subject id) pair to its owning account
    ///
    /// Checks primary identities first, then falls back to linked
    /// identities; returns the owning account in either case.
    ///
    /// # Errors
    ///
    /// Returns a store error if a lookup fails.
    pub async fn resolve_by_external_identity(
        &self,
        provider: ProviderKind,
        subject_id: &str,
    ) -> Result<Option<Account>, Error> {
        if let Some(account) = self
            .store
            .account_by_primary_identity(provider, subject_id)
            .await?
        {
            return Ok(Some(account));
        }

        match self.store.linked_identity_by_pair(provider, subject_id).await? {
            Some(link) => Ok(self.store.account_by_id(link.account_id).await?),
            None => Ok(None),
        }
    }

    /// Create an account for a first login
    ///
    /// The email is normalized to lowercase, last login is set to creation
    /// time, and the provider pair becomes the primary identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] when the email or the (provider, subject
    /// id) pair is already taken; the store's unique constraints are the
    /// actual enforcement under concurrent creates.
    pub async fn create_account(
        &self,
        email: &str,
        provider: ProviderKind,
        subject_id: &str,
        email_verified: bool,
    ) -> Result<Account, Error> {
        let new = NewAccount {
            email: email.to_lowercase(),
            email_verified,
            primary_provider: provider,
            primary_subject_id: subject_id.to_string(),
        };

        match self.store.insert_account(new).await {
            Ok(account) => {
                tracing::info!(account_id = %account.id, %provider, "account created");
                Ok(account)
            }
            Err(StoreError::UniqueViolation(constraint)) => {
                Err(Error::Conflict(format!("account already exists ({constraint})")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Advance an account's last-login timestamp; no-op when missing
    ///
    /// # Errors
    ///
    /// Returns a store error if the update fails.
    pub async fn touch_last_login(&self, account_id: Uuid) -> Result<(), Error> {
        Ok(self.store.touch_last_login(account_id).await?)
    }

    /// Assemble the profile projection for an account
    ///
    /// # Errors
    ///
    /// Returns a store error if a lookup fails.
    pub async fn profile_view(&self, account_id: Uuid) -> Result<Option<ProfileView>, Error> {
        let Some(account) = self.store.account_by_id(account_id).await? else {
            return Ok(None);
        };
        let links = self.store.linked_identities_for(account_id).await?;

        Ok(Some(ProfileView {
            id: account.id,
            email: account.email,
            email_verified: account.email_verified,
            primary_provider: account.primary_provider,
            created_at: account.created_at,
            last_login_at: account.last_login_at,
            linked_identities: links
                .into_iter()
                .map(|l| LinkedIdentitySummary {
                    provider: l.provider,
                    email: l.provider_email,
                    linked_at: l.linked_at,
                })
                .collect(),
        }))
    }
}
