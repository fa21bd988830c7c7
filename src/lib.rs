//! identity-broker: OAuth2/OIDC identity broker
//!
//! Authenticates end users through external OAuth2/OIDC identity providers
//! (an AWS Cognito-style pool and an Auth0-style tenant), issues first-party
//! session credentials, and lets a user merge multiple external identities
//! into a single account.
//!
//! # Architecture
//!
//! - [`provider`] - per-provider OAuth2 dialects behind one [`provider::Gateway`] contract
//! - [`session`] - signed access tokens and rotating refresh credentials
//! - [`identity`] - maps (provider, subject id) pairs to internal accounts
//! - [`linking`] - policy for attaching/detaching secondary identities
//! - [`state`] - single-use CSRF state tracking for in-flight authorizations
//! - [`store`] - repository contract with Postgres and in-memory backends
//! - [`broker`] - orchestrates the login, refresh, and linking flows
//! - [`web`] - thin axum transport over the broker operations
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use identity_broker::broker::IdentityBroker;
//! use identity_broker::config::AppConfig;
//! use identity_broker::provider::{Gateway, ProviderGateway, ProviderSettings};
//! use identity_broker::store::MemoryStore;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = AppConfig::load()?;
//! let store = Arc::new(MemoryStore::new());
//! let broker = IdentityBroker::new(
//!     store,
//!     &config.jwt,
//!     vec![
//!         Arc::new(ProviderGateway::new(ProviderSettings::cognito(&config.cognito))?)
//!             as Arc<dyn Gateway>,
//!         Arc::new(ProviderGateway::new(ProviderSettings::auth0(&config.auth0))?),
//!     ],
//! )?;
//! let app = identity_broker::web::router(broker.into(), Arc::new(config));
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod identity;
pub mod linking;
pub mod provider;
pub mod security;
pub mod session;
pub mod state;
pub mod store;
pub mod web;

pub use error::Error;
