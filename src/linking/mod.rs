//! Account-linking policy
//!
//! Decides whether a secondary external identity may be attached to an
//! account, and performs the attach/detach. The checks run in a fixed
//! order and the first failing rule wins; each refusal carries its own
//! human-readable reason so callers can distinguish all outcomes.

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::error::Error;
use crate::provider::ProviderKind;
use crate::store::{AuthStore, LinkedIdentity, NewLinkedIdentity, StoreError};

/// Why a link or unlink request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkRefusal {
    /// The initiating account does not exist
    #[error("user account not found")]
    AccountNotFound,

    /// The provider-attested email does not match the account's email.
    /// This is the core anti-takeover rule: only an identity the provider
    /// itself ties to the email already on file may be attached.
    #[error("email addresses do not match")]
    EmailMismatch,

    /// The identity is already linked to the initiating account
    #[error("this identity is already linked to your account")]
    AlreadyLinkedToAccount,

    /// The identity is linked to a different account
    #[error("this identity is linked to another account")]
    LinkedToAnotherAccount,

    /// The identity is the account's own primary identity
    #[error("cannot link the primary identity")]
    PrimaryIdentity,

    /// The primary identity provider can never be unlinked
    #[error("cannot unlink the primary identity provider")]
    UnlinkPrimary,
}

/// Enforces the linking policy against the store
pub struct LinkingAuthority {
    store: Arc<dyn AuthStore>,
}

impl LinkingAuthority {
    /// Create a linking authority over a store
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store }
    }

    /// Decide whether the identity may be linked to the account
    ///
    /// Rules, evaluated in order with short-circuit:
    /// 1. the account must exist,
    /// 2. the reported email must equal the account's email
    ///    (case-insensitive),
    /// 3. the (provider, subject id) pair must not already be linked
    ///    anywhere,
    /// 4. the pair must not be the account's own primary identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PolicyViolation`] with the first failing rule, or a
    /// store error if a lookup fails.
    pub async fn can_link(
        &self,
        account_id: Uuid,
        provider: ProviderKind,
        subject_id: &str,
        reported_email: &str,
    ) -> Result<(), Error> {
        let account = self
            .store
            .account_by_id(account_id)
            .await?
            .ok_or(Error::PolicyViolation(LinkRefusal::AccountNotFound))?;

        if account.email.to_lowercase() != reported_email.to_lowercase() {
            return Err(Error::PolicyViolation(LinkRefusal::EmailMismatch));
        }

        if let Some(existing) = self.store.linked_identity_by_pair(provider, subject_id).await? {
            let refusal = if existing.account_id == account_id {
                LinkRefusal::AlreadyLinkedToAccount
            } else {
                LinkRefusal::LinkedToAnotherAccount
            };
            return Err(Error::PolicyViolation(refusal));
        }

        if account.primary_provider == provider && account.primary_subject_id == subject_id {
            return Err(Error::PolicyViolation(LinkRefusal::PrimaryIdentity));
        }

        Ok(())
    }

    /// Attach the identity to the account after re-running the policy
    ///
    /// The stored email is lowercased. An insert-time unique violation
    /// (a concurrent link won the race) is reported with the same refusal
    /// vocabulary the pre-check uses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PolicyViolation`] when any rule fails, or a store
    /// error otherwise.
    pub async fn link(
        &self,
        account_id: Uuid,
        provider: ProviderKind,
        subject_id: &str,
        reported_email: &str,
    ) -> Result<LinkedIdentity, Error> {
        self.can_link(account_id, provider, subject_id, reported_email)
            .await?;

        let new = NewLinkedIdentity {
            account_id,
            provider,
            subject_id: subject_id.to_string(),
            provider_email: reported_email.to_lowercase(),
        };

        match self.store.insert_linked_identity(new).await {
            Ok(link) => {
                tracing::info!(%account_id, %provider, "identity linked");
                Ok(link)
            }
            Err(StoreError::UniqueViolation(_)) => {
                // Lost a race against a concurrent link; report it the way
                // the pre-check would have.
                let refusal = match self.store.linked_identity_by_pair(provider, subject_id).await? {
                    Some(existing) if existing.account_id == account_id => {
                        LinkRefusal::AlreadyLinkedToAccount
                    }
                    _ => LinkRefusal::LinkedToAnotherAccount,
                };
                Err(Error::PolicyViolation(refusal))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Detach the linked identity for (account, provider)
    ///
    /// The primary provider can never be unlinked, regardless of whether a
    /// matching row exists; the account must always retain one guaranteed
    /// way to authenticate. Returns whether a row was actually removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PolicyViolation`] for the primary provider, or a
    /// store error otherwise.
    pub async fn unlink(&self, account_id: Uuid, provider: ProviderKind) -> Result<bool, Error> {
        let Some(account) = self.store.account_by_id(account_id).await? else {
            return Ok(false);
        };

        if account.primary_provider == provider {
            return Err(Error::PolicyViolation(LinkRefusal::UnlinkPrimary));
        }

        let removed = self.store.delete_linked_identity(account_id, provider).await?;
        if removed {
            tracing::info!(%account_id, %provider, "identity unlinked");
        }
        Ok(removed)
    }
}
