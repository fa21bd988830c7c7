//! First-party session credentials
//!
//! Two token classes with independent rules:
//!
//! - **Access tokens** are signed, self-contained JWTs, short-lived, typed
//!   `"access"` so a refresh-shaped token can never pass as one.
//! - **Refresh tokens** are opaque random secrets backed by a server-side
//!   [`RefreshCredential`](crate::store::RefreshCredential) row holding only
//!   the secret's hash. Revocation is soft; rotation revokes the old row and
//!   inserts the new one in a single store transaction.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JwtSettings;
use crate::error::Error;
use crate::security::{generate_secure_token, hash_token, REFRESH_TOKEN_BYTES};
use crate::store::{AuthStore, NewRefreshCredential};

/// Fixed `iss` claim on every first-party token
pub const TOKEN_ISSUER: &str = "identity-broker";

/// Fixed `aud` claim on every first-party token
pub const TOKEN_AUDIENCE: &str = "identity-broker-api";

/// Claims carried by an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Account id
    pub sub: String,
    /// Account email at mint time
    pub email: String,
    /// Issued-at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
    /// Issuer, always [`TOKEN_ISSUER`]
    pub iss: String,
    /// Audience, always [`TOKEN_AUDIENCE`]
    pub aud: String,
    /// Token class discriminator, `"access"` for valid access tokens
    #[serde(rename = "type")]
    pub token_type: String,
}

/// Outcome of a successful refresh-token verification
#[derive(Debug, Clone, Copy)]
pub struct RefreshGrant {
    /// Owning account
    pub account_id: Uuid,
    /// Backing credential row
    pub credential_id: Uuid,
}

/// Mints and verifies session credentials
pub struct SessionIssuer {
    store: Arc<dyn AuthStore>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    access_token_minutes: i64,
    refresh_token_days: i64,
}

impl SessionIssuer {
    /// Build an issuer from JWT settings
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the algorithm name does not parse or
    /// is not an HMAC family member (the only class a shared secret can key).
    pub fn new(store: Arc<dyn AuthStore>, settings: &JwtSettings) -> Result<Self, Error> {
        let algorithm = Algorithm::from_str(&settings.algorithm)
            .map_err(|_| Error::Config(format!("unknown JWT algorithm: {}", settings.algorithm)))?;
        if !matches!(
            algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(Error::Config(format!(
                "unsupported JWT algorithm for a shared secret: {}",
                settings.algorithm
            )));
        }

        Ok(Self {
            store,
            encoding_key: EncodingKey::from_secret(settings.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(settings.secret.as_bytes()),
            algorithm,
            access_token_minutes: settings.access_token_minutes,
            refresh_token_days: settings.refresh_token_days,
        })
    }

    /// Mint a short-lived signed access token for an account
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if signing fails.
    pub fn mint_access_token(&self, account_id: Uuid, email: &str) -> Result<String, Error> {
        self.mint_access_token_with_lifetime(
            account_id,
            email,
            Duration::minutes(self.access_token_minutes),
        )
    }

    pub(crate) fn mint_access_token_with_lifetime(
        &self,
        account_id: Uuid,
        email: &str,
        lifetime: Duration,
    ) -> Result<String, Error> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: account_id.to_string(),
            email: email.to_string(),
            iat: now.timestamp(),
            exp: (now + lifetime).timestamp(),
            iss: TOKEN_ISSUER.to_string(),
            aud: TOKEN_AUDIENCE.to_string(),
            token_type: "access".to_string(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| Error::Config(format!("failed to sign access token: {e}")))
    }

    /// Verify an access token's signature, expiry, audience, issuer, and type
    ///
    /// # Errors
    ///
    /// Every failure mode collapses into [`Error::Unauthorized`]; the
    /// distinction is logged, never surfaced to the caller.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, Error> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.set_audience(&[TOKEN_AUDIENCE]);
        validation.set_issuer(&[TOKEN_ISSUER]);

        let data = decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "access token rejected");
                Error::Unauthorized("invalid or expired access token".to_string())
            })?;

        if data.claims.token_type != "access" {
            return Err(Error::Unauthorized(
                "invalid or expired access token".to_string(),
            ));
        }
        Ok(data.claims)
    }

    /// Issue a new opaque refresh token for an account
    ///
    /// Persists a credential row with the secret's hash; the returned raw
    /// secret exists only in this return value.
    ///
    /// # Errors
    ///
    /// Returns a store error if persistence fails.
    pub async fn issue_refresh_token(&self, account_id: Uuid) -> Result<String, Error> {
        let secret = generate_secure_token(REFRESH_TOKEN_BYTES);
        self.store
            .insert_refresh_credential(self.credential_for(account_id, &secret))
            .await?;
        Ok(secret)
    }

    /// Verify a raw refresh token against the store
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] when the token is unknown, revoked,
    /// or past expiry.
    pub async fn verify_refresh_token(&self, raw: &str) -> Result<RefreshGrant, Error> {
        self.verify_refresh_token_at(raw, Utc::now()).await
    }

    /// Clock-injected variant of [`Self::verify_refresh_token`]
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::verify_refresh_token`].
    pub async fn verify_refresh_token_at(
        &self,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshGrant, Error> {
        let credential = self
            .store
            .refresh_credential_by_hash(&hash_token(raw))
            .await?
            .ok_or_else(|| Error::Unauthorized("invalid refresh token".to_string()))?;

        if credential.revoked {
            return Err(Error::Unauthorized("refresh token revoked".to_string()));
        }
        // Strict wall-clock comparison, no grace period
        if now > credential.expires_at {
            return Err(Error::Unauthorized("refresh token expired".to_string()));
        }

        Ok(RefreshGrant {
            account_id: credential.account_id,
            credential_id: credential.id,
        })
    }

    /// Revoke the credential backing a raw refresh token
    ///
    /// Idempotent in effect: returns `true` only for the call that actually
    /// transitions the credential, `false` for unknown or already-revoked
    /// tokens.
    ///
    /// # Errors
    ///
    /// Returns a store error if the update fails.
    pub async fn revoke_refresh_token(&self, raw: &str) -> Result<bool, Error> {
        Ok(self
            .store
            .revoke_refresh_credential(&hash_token(raw))
            .await?)
    }

    /// Revoke every refresh credential for an account
    ///
    /// # Errors
    ///
    /// Returns a store error if the update fails.
    pub async fn revoke_all(&self, account_id: Uuid) -> Result<u64, Error> {
        let revoked = self.store.revoke_all_refresh_credentials(account_id).await?;
        tracing::info!(%account_id, revoked, "revoked all refresh credentials");
        Ok(revoked)
    }

    /// Atomically replace a refresh token
    ///
    /// Returns `None` without issuing anything when the old token's
    /// credential is unknown or already revoked; rotation never produces a
    /// new token unless the old one was revoked in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns a store error if the transaction fails.
    pub async fn rotate_refresh_token(
        &self,
        old_raw: &str,
        account_id: Uuid,
    ) -> Result<Option<String>, Error> {
        let secret = generate_secure_token(REFRESH_TOKEN_BYTES);
        let rotated = self
            .store
            .rotate_refresh_credential(
                &hash_token(old_raw),
                self.credential_for(account_id, &secret),
            )
            .await?;
        Ok(rotated.map(|_| secret))
    }

    fn credential_for(&self, account_id: Uuid, secret: &str) -> NewRefreshCredential {
        NewRefreshCredential {
            account_id,
            token_hash: hash_token(secret),
            expires_at: Utc::now() + Duration::days(self.refresh_token_days),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn settings() -> JwtSettings {
        JwtSettings {
            secret: "unit-test-signing-secret".to_string(),
            algorithm: "HS256".to_string(),
            access_token_minutes: 15,
            refresh_token_days: 7,
        }
    }

    fn issuer() -> SessionIssuer {
        SessionIssuer::new(Arc::new(MemoryStore::new()), &settings()).unwrap()
    }

    fn sign(claims: &AccessClaims) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(settings().secret.as_bytes()),
        )
        .unwrap()
    }

    fn base_claims() -> AccessClaims {
        let now = Utc::now();
        AccessClaims {
            sub: Uuid::new_v4().to_string(),
            email: "a@x.com".to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(15)).timestamp(),
            iss: TOKEN_ISSUER.to_string(),
            aud: TOKEN_AUDIENCE.to_string(),
            token_type: "access".to_string(),
        }
    }

    #[test]
    fn rejects_non_hmac_algorithms() {
        let mut bad = settings();
        bad.algorithm = "RS256".to_string();
        assert!(SessionIssuer::new(Arc::new(MemoryStore::new()), &bad).is_err());
        bad.algorithm = "not-an-algorithm".to_string();
        assert!(SessionIssuer::new(Arc::new(MemoryStore::new()), &bad).is_err());
    }

    #[test]
    fn mint_and_verify_round_trip() {
        let issuer = issuer();
        let account_id = Uuid::new_v4();
        let token = issuer.mint_access_token(account_id, "a@x.com").unwrap();

        let claims = issuer.verify_access_token(&token).unwrap();
        assert_eq!(claims.sub, account_id.to_string());
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.iss, TOKEN_ISSUER);
        assert_eq!(claims.aud, TOKEN_AUDIENCE);
        assert_eq!(claims.token_type, "access");
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn expired_access_token_is_rejected() {
        let issuer = issuer();
        let token = issuer
            .mint_access_token_with_lifetime(Uuid::new_v4(), "a@x.com", Duration::minutes(-1))
            .unwrap();
        assert!(issuer.verify_access_token(&token).is_err());
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let issuer = issuer();
        let mut claims = base_claims();
        claims.aud = "someone-else".to_string();
        assert!(issuer.verify_access_token(&sign(&claims)).is_err());
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let issuer = issuer();
        let mut claims = base_claims();
        claims.iss = "someone-else".to_string();
        assert!(issuer.verify_access_token(&sign(&claims)).is_err());
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let issuer = issuer();
        let mut token = issuer.mint_access_token(Uuid::new_v4(), "a@x.com").unwrap();
        token.push('x');
        assert!(issuer.verify_access_token(&token).is_err());
    }

    #[test]
    fn refresh_typed_token_cannot_pass_as_access() {
        let issuer = issuer();
        let mut claims = base_claims();
        claims.token_type = "refresh".to_string();
        // Well-signed, unexpired, right aud/iss; only the type differs
        assert!(issuer.verify_access_token(&sign(&claims)).is_err());
    }

    #[tokio::test]
    async fn refresh_token_round_trip() {
        let issuer = issuer();
        let account_id = Uuid::new_v4();
        let raw = issuer.issue_refresh_token(account_id).await.unwrap();

        let grant = issuer.verify_refresh_token(&raw).await.unwrap();
        assert_eq!(grant.account_id, account_id);

        assert!(issuer.verify_refresh_token("not-a-token").await.is_err());
    }

    #[tokio::test]
    async fn refresh_token_expiry_is_strict() {
        let issuer = issuer();
        let raw = issuer.issue_refresh_token(Uuid::new_v4()).await.unwrap();
        let issued_at = Utc::now();

        // Within lifetime
        assert!(issuer
            .verify_refresh_token_at(&raw, issued_at + Duration::days(6))
            .await
            .is_ok());
        // One second past the seven-day lifetime
        assert!(issuer
            .verify_refresh_token_at(&raw, issued_at + Duration::days(7) + Duration::seconds(1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn revoked_refresh_token_is_rejected() {
        let issuer = issuer();
        let raw = issuer.issue_refresh_token(Uuid::new_v4()).await.unwrap();

        assert!(issuer.revoke_refresh_token(&raw).await.unwrap());
        assert!(issuer.verify_refresh_token(&raw).await.is_err());
        // Second revoke reports no transition
        assert!(!issuer.revoke_refresh_token(&raw).await.unwrap());
    }

    #[tokio::test]
    async fn rotation_is_all_or_nothing() {
        let issuer = issuer();
        let account_id = Uuid::new_v4();
        let old = issuer.issue_refresh_token(account_id).await.unwrap();

        let new = issuer
            .rotate_refresh_token(&old, account_id)
            .await
            .unwrap()
            .expect("active token rotates");
        assert!(issuer.verify_refresh_token(&old).await.is_err());
        assert!(issuer.verify_refresh_token(&new).await.is_ok());

        // Rotating the stale secret again fails and leaves the new one valid
        assert!(issuer
            .rotate_refresh_token(&old, account_id)
            .await
            .unwrap()
            .is_none());
        assert!(issuer.verify_refresh_token(&new).await.is_ok());
    }

    #[tokio::test]
    async fn rotate_unknown_token_changes_nothing() {
        let issuer = issuer();
        let account_id = Uuid::new_v4();
        let valid = issuer.issue_refresh_token(account_id).await.unwrap();

        assert!(issuer
            .rotate_refresh_token("never-issued", account_id)
            .await
            .unwrap()
            .is_none());
        assert!(issuer.verify_refresh_token(&valid).await.is_ok());
    }

    #[tokio::test]
    async fn revoke_all_kills_every_credential() {
        let issuer = issuer();
        let account_id = Uuid::new_v4();
        let first = issuer.issue_refresh_token(account_id).await.unwrap();
        let second = issuer.issue_refresh_token(account_id).await.unwrap();

        assert_eq!(issuer.revoke_all(account_id).await.unwrap(), 2);
        assert!(issuer.verify_refresh_token(&first).await.is_err());
        assert!(issuer.verify_refresh_token(&second).await.is_err());
    }
}
