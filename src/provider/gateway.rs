//! Dialect-driven OAuth2 provider gateway
//!
//! The two supported providers differ only in endpoint layout, token-request
//! encoding (form-urlencoded vs JSON), and extra authorize parameters.
//! Those differences live in [`ProviderSettings`]; the request/verification
//! machinery is shared.

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use url::Url;

use super::jwks::JwksCache;
use super::{Gateway, GatewayError, IdentityClaims, ProviderKind, ProviderTokens};
use crate::config::{Auth0Settings, CognitoSettings};

/// Timeout for all outbound calls to a provider
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Scopes requested on every authorization redirect
const OAUTH_SCOPES: &str = "openid email profile";

/// How a provider expects its token and revocation request bodies encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenEncoding {
    /// `application/x-www-form-urlencoded` (Cognito dialect)
    Form,
    /// `application/json` (Auth0 dialect)
    Json,
}

/// Everything that distinguishes one provider dialect from another
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Which provider these settings describe
    pub kind: ProviderKind,
    /// OAuth2 client id registered with the provider
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
    /// Redirect URI registered for the authorization-code flow
    pub callback_url: String,
    /// Authorize endpoint
    pub authorize_url: String,
    /// Token endpoint
    pub token_url: String,
    /// Revocation endpoint
    pub revoke_url: String,
    /// Published key set for ID-token signature verification
    pub jwks_url: String,
    /// Expected `iss` claim in ID tokens
    pub issuer: String,
    /// Body encoding for the token and revocation endpoints
    pub token_encoding: TokenEncoding,
    /// Extra query parameters appended to the authorize URL
    pub extra_authorize_params: Vec<(String, String)>,
}

impl ProviderSettings {
    /// Settings for an AWS Cognito-style user pool
    ///
    /// Cognito hosts authorize/token/revoke under `{domain}/oauth2/*` and
    /// signs ID tokens under the regional `cognito-idp` issuer. All request
    /// bodies are form-urlencoded.
    #[must_use]
    pub fn cognito(config: &CognitoSettings) -> Self {
        let issuer = format!(
            "https://cognito-idp.{}.amazonaws.com/{}",
            config.region, config.user_pool_id
        );
        Self {
            kind: ProviderKind::Cognito,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            callback_url: config.callback_url.clone(),
            authorize_url: format!("{}/oauth2/authorize", config.domain),
            token_url: format!("{}/oauth2/token", config.domain),
            revoke_url: format!("{}/oauth2/revoke", config.domain),
            jwks_url: format!("{issuer}/.well-known/jwks.json"),
            issuer,
            token_encoding: TokenEncoding::Form,
            extra_authorize_params: Vec::new(),
        }
    }

    /// Settings for an Auth0-style tenant
    ///
    /// Auth0 expects JSON bodies on its token and revocation endpoints and
    /// an `audience` parameter on the authorize redirect. The issuer carries
    /// a trailing slash.
    #[must_use]
    pub fn auth0(config: &Auth0Settings) -> Self {
        let domain = &config.domain;
        Self {
            kind: ProviderKind::Auth0,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            callback_url: config.callback_url.clone(),
            authorize_url: format!("https://{domain}/authorize"),
            token_url: format!("https://{domain}/oauth/token"),
            revoke_url: format!("https://{domain}/oauth/revoke"),
            jwks_url: format!("https://{domain}/.well-known/jwks.json"),
            issuer: format!("https://{domain}/"),
            token_encoding: TokenEncoding::Json,
            extra_authorize_params: vec![(
                "audience".to_string(),
                format!("https://{domain}/api/v2/"),
            )],
        }
    }
}

/// OAuth2 gateway for one configured provider
pub struct ProviderGateway {
    settings: ProviderSettings,
    authorize_url: Url,
    http: reqwest::Client,
    jwks: JwksCache,
}

impl ProviderGateway {
    /// Build a gateway from provider settings
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Configuration`] if the authorize URL does not
    /// parse or the HTTP client cannot be constructed.
    pub fn new(settings: ProviderSettings) -> Result<Self, GatewayError> {
        let authorize_url = Url::parse(&settings.authorize_url)
            .map_err(|e| GatewayError::Configuration(format!("invalid authorize URL: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("http client: {e}")))?;
        let jwks = JwksCache::new(settings.jwks_url.clone(), http.clone());

        Ok(Self {
            settings,
            authorize_url,
            http,
            jwks,
        })
    }

    /// Parameters for the authorization-code token exchange
    fn token_request_params(&self, code: &str) -> Vec<(&'static str, String)> {
        vec![
            ("grant_type", "authorization_code".to_string()),
            ("client_id", self.settings.client_id.clone()),
            ("client_secret", self.settings.client_secret.clone()),
            ("code", code.to_string()),
            ("redirect_uri", self.settings.callback_url.clone()),
        ]
    }

    /// Parameters for the revocation endpoint
    fn revoke_request_params(&self, token: &str) -> Vec<(&'static str, String)> {
        vec![
            ("token", token.to_string()),
            ("client_id", self.settings.client_id.clone()),
            ("client_secret", self.settings.client_secret.clone()),
        ]
    }

    /// POST a parameter set using the dialect's body encoding
    async fn post_encoded(
        &self,
        url: &str,
        params: &[(&'static str, String)],
    ) -> Result<reqwest::Response, reqwest::Error> {
        let request = self.http.post(url);
        let request = match self.settings.token_encoding {
            TokenEncoding::Form => request.form(params),
            TokenEncoding::Json => {
                let body: serde_json::Map<String, serde_json::Value> = params
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), serde_json::Value::String(v.clone())))
                    .collect();
                request.json(&body)
            }
        };
        request.send().await
    }
}

#[async_trait]
impl Gateway for ProviderGateway {
    fn kind(&self) -> ProviderKind {
        self.settings.kind
    }

    fn authorization_url(&self, state: &str) -> String {
        let mut url = self.authorize_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("client_id", &self.settings.client_id)
                .append_pair("response_type", "code")
                .append_pair("scope", OAUTH_SCOPES)
                .append_pair("redirect_uri", &self.settings.callback_url)
                .append_pair("state", state);
            for (key, value) in &self.settings.extra_authorize_params {
                pairs.append_pair(key, value);
            }
        }
        url.into()
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, GatewayError> {
        let params = self.token_request_params(code);
        let response = self
            .post_encoded(&self.settings.token_url, &params)
            .await
            .map_err(|e| GatewayError::TokenExchange(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::TokenExchange(format!(
                "HTTP {}",
                response.status()
            )));
        }

        response
            .json::<ProviderTokens>()
            .await
            .map_err(|e| GatewayError::TokenExchange(format!("malformed token response: {e}")))
    }

    async fn verify_identity_token(&self, id_token: &str) -> Result<IdentityClaims, GatewayError> {
        let header = decode_header(id_token)
            .map_err(|e| GatewayError::IdToken(format!("undecodable header: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| GatewayError::IdToken("missing key id".to_string()))?;

        let jwk = self.jwks.key_for(&kid).await?;
        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| GatewayError::Jwks(format!("unusable key: {e}")))?;

        // Providers sign ID tokens with RS256; anything else is rejected
        // before signature verification to rule out algorithm confusion.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        validation.validate_aud = false; // audience checked below against the client id

        let data = decode::<RawIdClaims>(id_token, &key, &validation)
            .map_err(|e| GatewayError::IdToken(e.to_string()))?;

        validate_claims(&data.claims, &self.settings.client_id, &self.settings.issuer)?;
        data.claims.into_identity()
    }

    async fn revoke_token(&self, token: &str) -> bool {
        let params = self.revoke_request_params(token);
        match self.post_encoded(&self.settings.revoke_url, &params).await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(
                    provider = %self.settings.kind,
                    status = %response.status(),
                    "provider token revocation refused"
                );
                false
            }
            Err(e) => {
                tracing::warn!(provider = %self.settings.kind, error = %e, "provider token revocation failed");
                false
            }
        }
    }
}

/// The `aud` claim may be a single audience or a list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, value: &str) -> bool {
        match self {
            Self::One(aud) => aud == value,
            Self::Many(auds) => auds.iter().any(|a| a == value),
        }
    }
}

/// Claims decoded from an ID token before dialect validation
#[derive(Debug, Deserialize)]
struct RawIdClaims {
    sub: String,
    aud: Audience,
    iss: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

impl RawIdClaims {
    fn into_identity(self) -> Result<IdentityClaims, GatewayError> {
        let email = self
            .email
            .ok_or_else(|| GatewayError::IdToken("missing email claim".to_string()))?;
        Ok(IdentityClaims {
            sub: self.sub,
            email,
            email_verified: self.email_verified,
        })
    }
}

/// Audience and issuer checks shared by both dialects
fn validate_claims(
    claims: &RawIdClaims,
    client_id: &str,
    issuer: &str,
) -> Result<(), GatewayError> {
    if !claims.aud.contains(client_id) {
        return Err(GatewayError::IdToken("audience mismatch".to_string()));
    }
    if claims.iss != issuer {
        return Err(GatewayError::IdToken("issuer mismatch".to_string()));
    }
    Ok(())
}
