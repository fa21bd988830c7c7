//! Configuration management
//!
//! All configuration is environment-sourced through figment with the
//! `BROKER_` prefix; nested sections use a double-underscore separator.
//! Defaults cover everything that is safe to default; secrets and provider
//! credentials must be supplied.
//!
//! # Example
//!
//! ```sh
//! BROKER_DATABASE_URL=postgres://localhost/broker
//! BROKER_JWT__SECRET=change-me
//! BROKER_COGNITO__USER_POOL_ID=us-east-1_Example
//! BROKER_COGNITO__CLIENT_ID=...
//! BROKER_COGNITO__CLIENT_SECRET=...
//! BROKER_COGNITO__DOMAIN=https://auth.example.com
//! BROKER_COGNITO__CALLBACK_URL=https://api.example.com/api/v1/auth/callback/cognito
//! BROKER_AUTH0__DOMAIN=tenant.auth0.com
//! BROKER_AUTH0__CLIENT_ID=...
//! BROKER_AUTH0__CLIENT_SECRET=...
//! BROKER_AUTH0__CALLBACK_URL=https://api.example.com/api/v1/auth/callback/auth0
//! ```

use figment::providers::Env;
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Environment variable prefix for all settings
pub const ENV_PREFIX: &str = "BROKER_";

/// First-party JWT settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtSettings {
    /// Signing secret
    pub secret: String,

    /// Signing algorithm name (HMAC family)
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,

    /// Access token lifetime in minutes
    #[serde(default = "default_access_token_minutes")]
    pub access_token_minutes: i64,

    /// Refresh token lifetime in days
    #[serde(default = "default_refresh_token_days")]
    pub refresh_token_days: i64,
}

/// AWS Cognito-style provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitoSettings {
    /// AWS region hosting the user pool
    #[serde(default = "default_aws_region")]
    pub region: String,
    /// User pool id
    pub user_pool_id: String,
    /// OAuth2 client id
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
    /// Hosted UI domain, scheme included
    pub domain: String,
    /// Registered callback URL
    pub callback_url: String,
}

/// Auth0-style provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auth0Settings {
    /// Tenant domain, no scheme
    pub domain: String,
    /// OAuth2 client id
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
    /// Registered callback URL
    pub callback_url: String,
}

/// Complete broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment environment name
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Frontend base URL the callback redirects to
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,

    /// Address the HTTP server binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Postgres connection string
    pub database_url: String,

    /// First-party JWT settings
    pub jwt: JwtSettings,

    /// Cognito-style provider
    pub cognito: CognitoSettings,

    /// Auth0-style provider
    pub auth0: Auth0Settings,

    /// Comma-separated allowed CORS origins
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
}

impl AppConfig {
    /// Load configuration from `BROKER_`-prefixed environment variables
    ///
    /// # Errors
    ///
    /// Returns an error when a required variable is missing or a value does
    /// not parse.
    pub fn load() -> anyhow::Result<Self> {
        let config = Figment::new()
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Allowed CORS origins as a list
    #[must_use]
    pub fn cors_origins_list(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect()
    }

    /// Whether this is a production deployment
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_frontend_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

const fn default_access_token_minutes() -> i64 {
    15
}

const fn default_refresh_token_days() -> i64 {
    7
}

fn default_aws_region() -> String {
    "us-east-1".to_string()
}

fn default_cors_origins() -> String {
    "http://localhost:3000".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_required(jail: &mut figment::Jail) {
        jail.set_env("BROKER_DATABASE_URL", "postgres://localhost/broker");
        jail.set_env("BROKER_JWT__SECRET", "test-secret");
        jail.set_env("BROKER_COGNITO__USER_POOL_ID", "us-east-1_Example");
        jail.set_env("BROKER_COGNITO__CLIENT_ID", "cid");
        jail.set_env("BROKER_COGNITO__CLIENT_SECRET", "csecret");
        jail.set_env("BROKER_COGNITO__DOMAIN", "https://auth.example.com");
        jail.set_env("BROKER_COGNITO__CALLBACK_URL", "http://localhost/cb/cognito");
        jail.set_env("BROKER_AUTH0__DOMAIN", "tenant.auth0.com");
        jail.set_env("BROKER_AUTH0__CLIENT_ID", "aid");
        jail.set_env("BROKER_AUTH0__CLIENT_SECRET", "asecret");
        jail.set_env("BROKER_AUTH0__CALLBACK_URL", "http://localhost/cb/auth0");
    }

    #[test]
    fn loads_with_defaults_applied() {
        figment::Jail::expect_with(|jail| {
            set_required(jail);
            let config = AppConfig::load().expect("config loads");

            assert_eq!(config.environment, "development");
            assert_eq!(config.jwt.algorithm, "HS256");
            assert_eq!(config.jwt.access_token_minutes, 15);
            assert_eq!(config.jwt.refresh_token_days, 7);
            assert_eq!(config.cognito.region, "us-east-1");
            assert!(!config.is_production());
            Ok(())
        });
    }

    #[test]
    fn overrides_take_precedence() {
        figment::Jail::expect_with(|jail| {
            set_required(jail);
            jail.set_env("BROKER_ENVIRONMENT", "production");
            jail.set_env("BROKER_JWT__ACCESS_TOKEN_MINUTES", "5");

            let config = AppConfig::load().expect("config loads");
            assert!(config.is_production());
            assert_eq!(config.jwt.access_token_minutes, 5);
            Ok(())
        });
    }

    #[test]
    fn missing_required_value_fails() {
        figment::Jail::expect_with(|jail| {
            // Everything but the database URL
            jail.set_env("BROKER_JWT__SECRET", "s");
            assert!(AppConfig::load().is_err());
            Ok(())
        });
    }

    #[test]
    fn cors_origins_split_and_trimmed() {
        figment::Jail::expect_with(|jail| {
            set_required(jail);
            jail.set_env(
                "BROKER_CORS_ORIGINS",
                "http://localhost:3000, https://app.example.com",
            );
            let config = AppConfig::load().expect("config loads");
            assert_eq!(
                config.cors_origins_list(),
                vec!["http://localhost:3000", "https://app.example.com"]
            );
            Ok(())
        });
    }
}
