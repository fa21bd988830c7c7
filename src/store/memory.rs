//! In-memory store backend
//!
//! Backs unit and flow tests without a database. Enforces the same unique
//! constraints as the Postgres schema so check-then-act races surface the
//! same [`StoreError::UniqueViolation`] the real store would produce.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    Account, AuthStore, LinkedIdentity, NewAccount, NewLinkedIdentity, NewRefreshCredential,
    RefreshCredential, StoreError,
};
use crate::provider::ProviderKind;

#[derive(Default)]
struct Tables {
    accounts: Vec<Account>,
    linked_identities: Vec<LinkedIdentity>,
    refresh_credentials: Vec<RefreshCredential>,
}

/// Mutex-guarded in-memory implementation of [`AuthStore`]
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn account_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let tables = self.tables.lock();
        Ok(tables.accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let tables = self.tables.lock();
        Ok(tables.accounts.iter().find(|a| a.email == email).cloned())
    }

    async fn account_by_primary_identity(
        &self,
        provider: ProviderKind,
        subject_id: &str,
    ) -> Result<Option<Account>, StoreError> {
        let tables = self.tables.lock();
        Ok(tables
            .accounts
            .iter()
            .find(|a| a.primary_provider == provider && a.primary_subject_id == subject_id)
            .cloned())
    }

    async fn insert_account(&self, new: NewAccount) -> Result<Account, StoreError> {
        let mut tables = self.tables.lock();
        if tables.accounts.iter().any(|a| a.email == new.email) {
            return Err(StoreError::UniqueViolation("accounts_email_key".to_string()));
        }
        if tables.accounts.iter().any(|a| {
            a.primary_provider == new.primary_provider
                && a.primary_subject_id == new.primary_subject_id
        }) {
            return Err(StoreError::UniqueViolation(
                "accounts_primary_identity_key".to_string(),
            ));
        }

        let now = Utc::now();
        let account = Account {
            id: Uuid::new_v4(),
            email: new.email,
            email_verified: new.email_verified,
            primary_provider: new.primary_provider,
            primary_subject_id: new.primary_subject_id,
            created_at: now,
            updated_at: None,
            last_login_at: Some(now),
        };
        tables.accounts.push(account.clone());
        Ok(account)
    }

    async fn touch_last_login(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        if let Some(account) = tables.accounts.iter_mut().find(|a| a.id == id) {
            account.last_login_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn linked_identity_by_pair(
        &self,
        provider: ProviderKind,
        subject_id: &str,
    ) -> Result<Option<LinkedIdentity>, StoreError> {
        let tables = self.tables.lock();
        Ok(tables
            .linked_identities
            .iter()
            .find(|l| l.provider == provider && l.subject_id == subject_id)
            .cloned())
    }

    async fn linked_identities_for(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<LinkedIdentity>, StoreError> {
        let tables = self.tables.lock();
        let mut links: Vec<LinkedIdentity> = tables
            .linked_identities
            .iter()
            .filter(|l| l.account_id == account_id)
            .cloned()
            .collect();
        links.sort_by(|a, b| b.linked_at.cmp(&a.linked_at));
        Ok(links)
    }

    async fn insert_linked_identity(
        &self,
        new: NewLinkedIdentity,
    ) -> Result<LinkedIdentity, StoreError> {
        let mut tables = self.tables.lock();
        if tables
            .linked_identities
            .iter()
            .any(|l| l.provider == new.provider && l.subject_id == new.subject_id)
        {
            return Err(StoreError::UniqueViolation(
                "uq_provider_identity".to_string(),
            ));
        }

        let link = LinkedIdentity {
            id: Uuid::new_v4(),
            account_id: new.account_id,
            provider: new.provider,
            subject_id: new.subject_id,
            provider_email: new.provider_email,
            linked_at: Utc::now(),
        };
        tables.linked_identities.push(link.clone());
        Ok(link)
    }

    async fn delete_linked_identity(
        &self,
        account_id: Uuid,
        provider: ProviderKind,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        let before = tables.linked_identities.len();
        tables
            .linked_identities
            .retain(|l| !(l.account_id == account_id && l.provider == provider));
        Ok(tables.linked_identities.len() < before)
    }

    async fn insert_refresh_credential(
        &self,
        new: NewRefreshCredential,
    ) -> Result<RefreshCredential, StoreError> {
        let mut tables = self.tables.lock();
        if tables
            .refresh_credentials
            .iter()
            .any(|c| c.token_hash == new.token_hash)
        {
            return Err(StoreError::UniqueViolation(
                "refresh_credentials_token_hash_key".to_string(),
            ));
        }

        let credential = RefreshCredential {
            id: Uuid::new_v4(),
            account_id: new.account_id,
            token_hash: new.token_hash,
            expires_at: new.expires_at,
            revoked: false,
            created_at: Utc::now(),
        };
        tables.refresh_credentials.push(credential.clone());
        Ok(credential)
    }

    async fn refresh_credential_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshCredential>, StoreError> {
        let tables = self.tables.lock();
        Ok(tables
            .refresh_credentials
            .iter()
            .find(|c| c.token_hash == token_hash)
            .cloned())
    }

    async fn revoke_refresh_credential(&self, token_hash: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        match tables
            .refresh_credentials
            .iter_mut()
            .find(|c| c.token_hash == token_hash && !c.revoked)
        {
            Some(credential) => {
                credential.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_all_refresh_credentials(&self, account_id: Uuid) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock();
        let mut transitioned = 0;
        for credential in tables
            .refresh_credentials
            .iter_mut()
            .filter(|c| c.account_id == account_id && !c.revoked)
        {
            credential.revoked = true;
            transitioned += 1;
        }
        Ok(transitioned)
    }

    async fn rotate_refresh_credential(
        &self,
        old_token_hash: &str,
        new: NewRefreshCredential,
    ) -> Result<Option<RefreshCredential>, StoreError> {
        // Single lock acquisition makes revoke-plus-insert atomic.
        let mut tables = self.tables.lock();
        let Some(old) = tables
            .refresh_credentials
            .iter_mut()
            .find(|c| c.token_hash == old_token_hash && !c.revoked)
        else {
            return Ok(None);
        };
        old.revoked = true;

        let credential = RefreshCredential {
            id: Uuid::new_v4(),
            account_id: new.account_id,
            token_hash: new.token_hash,
            expires_at: new.expires_at,
            revoked: false,
            created_at: Utc::now(),
        };
        tables.refresh_credentials.push(credential.clone());
        Ok(Some(credential))
    }
}
