//! Flow orchestration
//!
//! [`IdentityBroker`] wires the provider gateways, session issuer, identity
//! resolver, linking authority, and the two state stores (login and linking
//! flows track their outstanding requests separately) into the operations
//! the transport layer calls. No component here is a process-wide singleton;
//! tests construct isolated brokers per case.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::config::JwtSettings;
use crate::error::Error;
use crate::identity::{IdentityResolver, ProfileView};
use crate::linking::LinkingAuthority;
use crate::provider::{Gateway, ProviderKind};
use crate::session::SessionIssuer;
use crate::state::{PendingAuthorization, StateStore};
use crate::store::{Account, AuthStore, LinkedIdentity};

/// Result of a completed login flow
#[derive(Debug, Clone)]
pub struct LoginSession {
    /// The resolved or newly created account
    pub account: Account,
    /// Signed short-lived access token
    pub access_token: String,
    /// Opaque refresh token secret
    pub refresh_token: String,
}

/// Result of a refresh operation
#[derive(Debug, Clone)]
pub struct RefreshedSession {
    /// Fresh access token
    pub access_token: String,
    /// Replacement refresh secret; `None` when rotation lost a race and the
    /// old credential was already gone
    pub refresh_token: Option<String>,
}

/// The authenticated caller, as proven by a bearer access token
#[derive(Debug, Clone)]
pub struct CurrentUser {
    /// Account id from the token subject
    pub account_id: Uuid,
    /// Account email
    pub email: String,
}

/// The identity/session core behind the transport layer
pub struct IdentityBroker {
    gateways: HashMap<ProviderKind, Arc<dyn Gateway>>,
    issuer: SessionIssuer,
    resolver: IdentityResolver,
    linker: LinkingAuthority,
    login_states: StateStore,
    link_states: StateStore,
}

impl IdentityBroker {
    /// Assemble a broker from its dependencies
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the JWT settings are unusable.
    pub fn new(
        store: Arc<dyn AuthStore>,
        jwt: &JwtSettings,
        gateways: Vec<Arc<dyn Gateway>>,
    ) -> Result<Self, Error> {
        Ok(Self {
            gateways: gateways.into_iter().map(|g| (g.kind(), g)).collect(),
            issuer: SessionIssuer::new(Arc::clone(&store), jwt)?,
            resolver: IdentityResolver::new(Arc::clone(&store)),
            linker: LinkingAuthority::new(store),
            login_states: StateStore::new(),
            link_states: StateStore::new(),
        })
    }

    /// The session issuer, exposed for token verification at the edges
    #[must_use]
    pub const fn issuer(&self) -> &SessionIssuer {
        &self.issuer
    }

    fn gateway(&self, provider: ProviderKind) -> Result<&Arc<dyn Gateway>, Error> {
        self.gateways
            .get(&provider)
            .ok_or_else(|| Error::UnknownProvider(provider.to_string()))
    }

    /// Start a login flow, returning the provider redirect URL
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownProvider`] for a provider without a gateway.
    pub fn begin_login(&self, provider: ProviderKind) -> Result<String, Error> {
        let gateway = self.gateway(provider)?;
        let state = self.login_states.begin(PendingAuthorization::login(provider));
        tracing::info!(%provider, "login flow started");
        Ok(gateway.authorization_url(&state))
    }

    /// Complete a login callback: state, code exchange, identity, session
    ///
    /// Resolves the external identity to an account (creating one on first
    /// login), then mints an access token and issues a refresh token.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] for an unknown, replayed, or mismatched
    ///   state parameter
    /// - [`Error::Provider`] when the exchange or ID-token verification
    ///   fails
    /// - store errors from resolution or token persistence
    pub async fn complete_login(
        &self,
        provider: ProviderKind,
        code: &str,
        state: &str,
    ) -> Result<LoginSession, Error> {
        let pending = self.login_states.consume(state).ok_or(Error::InvalidState)?;
        if pending.provider != provider || pending.account_id.is_some() {
            return Err(Error::InvalidState);
        }

        let gateway = self.gateway(provider)?;
        let tokens = gateway.exchange_code(code).await?;
        let claims = gateway.verify_identity_token(&tokens.id_token).await?;

        let account = match self
            .resolver
            .resolve_by_external_identity(provider, &claims.sub)
            .await?
        {
            Some(account) => {
                self.resolver.touch_last_login(account.id).await?;
                self.resolver
                    .account_by_id(account.id)
                    .await?
                    .unwrap_or(account)
            }
            None => {
                self.resolver
                    .create_account(&claims.email, provider, &claims.sub, claims.email_verified)
                    .await?
            }
        };

        let access_token = self.issuer.mint_access_token(account.id, &account.email)?;
        let refresh_token = self.issuer.issue_refresh_token(account.id).await?;

        tracing::info!(account_id = %account.id, %provider, "login completed");
        Ok(LoginSession {
            account,
            access_token,
            refresh_token,
        })
    }

    /// Mint a fresh access token and rotate the refresh credential
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] when the refresh token is unknown,
    /// revoked, expired, or its account no longer exists.
    pub async fn refresh_session(&self, raw_refresh: &str) -> Result<RefreshedSession, Error> {
        let grant = self.issuer.verify_refresh_token(raw_refresh).await?;
        let account = self
            .resolver
            .account_by_id(grant.account_id)
            .await?
            .ok_or_else(|| Error::Unauthorized("account no longer exists".to_string()))?;

        let access_token = self.issuer.mint_access_token(account.id, &account.email)?;
        let refresh_token = self
            .issuer
            .rotate_refresh_token(raw_refresh, account.id)
            .await?;

        Ok(RefreshedSession {
            access_token,
            refresh_token,
        })
    }

    /// Revoke the refresh credential backing this secret
    ///
    /// Local teardown only; nothing here waits on a provider.
    ///
    /// # Errors
    ///
    /// Returns a store error if the revocation update fails.
    pub async fn logout(&self, raw_refresh: &str) -> Result<bool, Error> {
        let revoked = self.issuer.revoke_refresh_token(raw_refresh).await?;
        if revoked {
            tracing::info!("session logged out");
        }
        Ok(revoked)
    }

    /// Prove a bearer access token and load its account
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] for any token or account failure.
    pub async fn authenticate(&self, bearer: &str) -> Result<CurrentUser, Error> {
        let claims = self.issuer.verify_access_token(bearer)?;
        let account_id = claims
            .sub
            .parse::<Uuid>()
            .map_err(|_| Error::Unauthorized("malformed token subject".to_string()))?;
        let account = self
            .resolver
            .account_by_id(account_id)
            .await?
            .ok_or_else(|| Error::Unauthorized("account no longer exists".to_string()))?;

        Ok(CurrentUser {
            account_id: account.id,
            email: account.email,
        })
    }

    /// Start a linking flow for an authenticated account
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownProvider`] for a provider without a gateway.
    pub fn begin_link(&self, account_id: Uuid, provider: ProviderKind) -> Result<String, Error> {
        let gateway = self.gateway(provider)?;
        let state = self
            .link_states
            .begin(PendingAuthorization::link(provider, account_id));
        tracing::info!(%account_id, %provider, "link flow started");
        Ok(gateway.authorization_url(&state))
    }

    /// Complete a linking callback against the initiating account
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] for an unknown, replayed, or mismatched
    ///   state parameter
    /// - [`Error::Provider`] when the exchange or ID-token verification
    ///   fails
    /// - [`Error::PolicyViolation`] when the linking rules refuse
    pub async fn complete_link(
        &self,
        provider: ProviderKind,
        code: &str,
        state: &str,
    ) -> Result<LinkedIdentity, Error> {
        let pending = self.link_states.consume(state).ok_or(Error::InvalidState)?;
        let account_id = pending.account_id.ok_or(Error::InvalidState)?;
        if pending.provider != provider {
            return Err(Error::InvalidState);
        }

        let gateway = self.gateway(provider)?;
        let tokens = gateway.exchange_code(code).await?;
        let claims = gateway.verify_identity_token(&tokens.id_token).await?;

        self.linker
            .link(account_id, provider, &claims.sub, &claims.email)
            .await
    }

    /// Detach a linked identity; see [`LinkingAuthority::unlink`]
    ///
    /// # Errors
    ///
    /// Returns [`Error::PolicyViolation`] for the primary provider.
    pub async fn unlink(&self, account_id: Uuid, provider: ProviderKind) -> Result<bool, Error> {
        self.linker.unlink(account_id, provider).await
    }

    /// Profile projection for an account
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the account does not exist.
    pub async fn profile(&self, account_id: Uuid) -> Result<ProfileView, Error> {
        self.resolver
            .profile_view(account_id)
            .await?
            .ok_or_else(|| Error::NotFound("account not found".to_string()))
    }
}
