//! Shared fixtures for the flow tests: an offline gateway and a broker
//! wired to the in-memory store.

use std::sync::Arc;

use async_trait::async_trait;

use identity_broker::broker::IdentityBroker;
use identity_broker::config::JwtSettings;
use identity_broker::provider::{
    Gateway, GatewayError, IdentityClaims, ProviderKind, ProviderTokens,
};
use identity_broker::store::MemoryStore;

/// Gateway that answers every exchange with a fixed identity
pub struct FakeGateway {
    kind: ProviderKind,
    claims: IdentityClaims,
}

impl FakeGateway {
    pub fn new(kind: ProviderKind, subject: &str, email: &str) -> Self {
        Self {
            kind,
            claims: IdentityClaims {
                sub: subject.to_string(),
                email: email.to_string(),
                email_verified: true,
            },
        }
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn authorization_url(&self, state: &str) -> String {
        format!("https://{}.example.test/authorize?state={state}", self.kind)
    }

    async fn exchange_code(&self, _code: &str) -> Result<ProviderTokens, GatewayError> {
        Ok(ProviderTokens {
            access_token: "upstream-access".to_string(),
            id_token: "upstream-id".to_string(),
            refresh_token: None,
            expires_in: Some(3600),
        })
    }

    async fn verify_identity_token(&self, _id_token: &str) -> Result<IdentityClaims, GatewayError> {
        Ok(self.claims.clone())
    }

    async fn revoke_token(&self, _token: &str) -> bool {
        true
    }
}

pub fn jwt_settings() -> JwtSettings {
    JwtSettings {
        secret: "flow-test-secret".to_string(),
        algorithm: "HS256".to_string(),
        access_token_minutes: 15,
        refresh_token_days: 7,
    }
}

pub fn broker_with(gateways: Vec<Arc<dyn Gateway>>) -> IdentityBroker {
    let store = Arc::new(MemoryStore::new());
    IdentityBroker::new(store, &jwt_settings(), gateways).unwrap()
}

/// Pull the state parameter back out of an authorization URL
pub fn state_from(url: &str) -> String {
    url.rsplit("state=").next().unwrap().to_string()
}
