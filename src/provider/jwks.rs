//! Cached provider key sets for ID-token signature verification
//!
//! Each gateway fetches its provider's published JWKS once and reuses it
//! until the cache entry ages out or a lookup misses (key rotation).

use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet};
use parking_lot::RwLock;

use super::GatewayError;

/// How long a fetched key set is trusted before refetching
const JWKS_TTL: Duration = Duration::from_secs(3600);

struct CachedSet {
    set: JwkSet,
    fetched_at: Instant,
}

/// Fetch-and-cache wrapper around one provider's JWKS endpoint
pub struct JwksCache {
    url: String,
    http: reqwest::Client,
    cached: RwLock<Option<CachedSet>>,
}

impl JwksCache {
    /// Create a cache for the given JWKS URL
    #[must_use]
    pub fn new(url: String, http: reqwest::Client) -> Self {
        Self {
            url,
            http,
            cached: RwLock::new(None),
        }
    }

    /// Look up the signing key with the given `kid`
    ///
    /// Serves from cache when fresh; refetches on a stale cache or an
    /// unknown key id, so provider key rotation is picked up without a
    /// restart.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Jwks`] when the key set cannot be fetched or
    /// the key id is absent from the freshly fetched set.
    pub async fn key_for(&self, kid: &str) -> Result<Jwk, GatewayError> {
        if let Some(jwk) = self.cached_key(kid) {
            return Ok(jwk);
        }

        let set = self.fetch().await?;
        let jwk = set
            .find(kid)
            .cloned()
            .ok_or_else(|| GatewayError::Jwks(format!("no key with id {kid}")))?;

        *self.cached.write() = Some(CachedSet {
            set,
            fetched_at: Instant::now(),
        });
        Ok(jwk)
    }

    fn cached_key(&self, kid: &str) -> Option<Jwk> {
        let guard = self.cached.read();
        let cached = guard.as_ref()?;
        if cached.fetched_at.elapsed() > JWKS_TTL {
            return None;
        }
        cached.set.find(kid).cloned()
    }

    async fn fetch(&self) -> Result<JwkSet, GatewayError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| GatewayError::Jwks(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::Jwks(format!("HTTP {}", response.status())));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| GatewayError::Jwks(format!("malformed key set: {e}")))
    }
}
