//! External identity provider gateways
//!
//! Each configured provider speaks its own OAuth2/OIDC dialect (endpoint
//! shapes, token-request encoding, extra authorize parameters). The dialect
//! differences are data on [`ProviderSettings`], not separate gateway types;
//! one [`ProviderGateway`] serves both the Cognito-style and the Auth0-style
//! provider. The broker depends only on the [`Gateway`] trait so flows can be
//! exercised without a network.

mod gateway;
mod jwks;

pub use gateway::{ProviderGateway, ProviderSettings, TokenEncoding};
pub use jwks::JwksCache;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported identity providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// AWS Cognito-style user pool
    Cognito,
    /// Auth0-style tenant
    Auth0,
}

impl ProviderKind {
    /// Canonical lowercase name, as stored in the database and used in URLs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cognito => "cognito",
            Self::Auth0 => "auth0",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = UnknownProviderKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cognito" => Ok(Self::Cognito),
            "auth0" => Ok(Self::Auth0),
            other => Err(UnknownProviderKind(other.to_string())),
        }
    }
}

/// Error for an unrecognized provider name
#[derive(Debug, Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProviderKind(pub String);

// SQLx column conversion (provider names are stored as text)
impl TryFrom<String> for ProviderKind {
    type Error = UnknownProviderKind;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Token set returned by a provider's token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTokens {
    /// Provider access token (used against the userinfo/revoke endpoints)
    pub access_token: String,
    /// OIDC identity token carrying the subject claims
    pub id_token: String,
    /// Provider refresh token, when the provider issues one
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Identity claims extracted from a verified ID token
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityClaims {
    /// Provider's stable subject identifier
    pub sub: String,
    /// Email address attested by the provider
    pub email: String,
    /// Whether the provider has verified the email address
    #[serde(default)]
    pub email_verified: bool,
}

/// Gateway failures
///
/// Every variant is recoverable by restarting the flow from scratch; nothing
/// here is retried internally.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Provider settings could not be turned into a working gateway
    #[error("invalid provider configuration: {0}")]
    Configuration(String),

    /// The code-for-tokens exchange failed (transport or non-2xx outcome)
    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// The identity token failed decoding or claim validation
    #[error("invalid identity token: {0}")]
    IdToken(String),

    /// The provider's published key set could not be fetched or used
    #[error("key set error: {0}")]
    Jwks(String),
}

/// Uniform contract every provider gateway fulfills
///
/// The broker resolves a gateway by [`ProviderKind`] and never looks behind
/// this trait; tests substitute stub implementations.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Which provider this gateway speaks for
    fn kind(&self) -> ProviderKind;

    /// Build the provider's authorize-endpoint URL for a login redirect
    fn authorization_url(&self, state: &str) -> String;

    /// Exchange an authorization code for the provider's token set
    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, GatewayError>;

    /// Verify an ID token's signature and claims, returning the identity
    async fn verify_identity_token(&self, id_token: &str) -> Result<IdentityClaims, GatewayError>;

    /// Best-effort remote revocation; failure never blocks local teardown
    async fn revoke_token(&self, token: &str) -> bool;
}
