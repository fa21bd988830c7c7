//! Single-use CSRF state tracking for in-flight authorizations
//!
//! Outstanding authorization requests are kept in a process-local map keyed
//! by the hash of the state parameter. Consumption is destructive under one
//! lock acquisition, so two callbacks racing on the same state cannot both
//! succeed. Entries age out on consume; a multi-instance deployment would
//! swap this for a shared TTL store behind the same begin/consume contract.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::provider::ProviderKind;
use crate::security::{generate_state_parameter, hash_token};

/// Default lifetime of an outstanding authorization request
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(600);

/// The intent behind an outstanding authorization request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAuthorization {
    /// Provider the user was redirected to
    pub provider: ProviderKind,
    /// Initiating account, present only for linking flows
    pub account_id: Option<Uuid>,
}

impl PendingAuthorization {
    /// Intent for a login flow
    #[must_use]
    pub const fn login(provider: ProviderKind) -> Self {
        Self {
            provider,
            account_id: None,
        }
    }

    /// Intent for a linking flow initiated by an account
    #[must_use]
    pub const fn link(provider: ProviderKind, account_id: Uuid) -> Self {
        Self {
            provider,
            account_id: Some(account_id),
        }
    }
}

struct Entry {
    pending: PendingAuthorization,
    created_at: Instant,
}

/// Tracks outstanding authorization requests with single-use semantics
pub struct StateStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_STATE_TTL)
    }
}

impl StateStore {
    /// Create a store with the default TTL
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with a custom TTL
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Start tracking an authorization request
    ///
    /// Returns the raw state secret to embed in the redirect URL; only its
    /// hash is retained.
    pub fn begin(&self, pending: PendingAuthorization) -> String {
        let state = generate_state_parameter();
        self.entries.lock().insert(
            hash_token(&state),
            Entry {
                pending,
                created_at: Instant::now(),
            },
        );
        state
    }

    /// Consume a state parameter, returning its intent at most once
    ///
    /// Removal and lookup happen under a single lock acquisition
    /// (compare-and-delete); a replayed or expired state returns `None`.
    pub fn consume(&self, state: &str) -> Option<PendingAuthorization> {
        let entry = self.entries.lock().remove(&hash_token(state))?;
        if entry.created_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_returns_the_stored_intent() {
        let store = StateStore::new();
        let account_id = Uuid::new_v4();
        let state = store.begin(PendingAuthorization::link(ProviderKind::Auth0, account_id));

        let pending = store.consume(&state).unwrap();
        assert_eq!(pending.provider, ProviderKind::Auth0);
        assert_eq!(pending.account_id, Some(account_id));
    }

    #[test]
    fn consume_succeeds_at_most_once() {
        let store = StateStore::new();
        let state = store.begin(PendingAuthorization::login(ProviderKind::Cognito));

        assert!(store.consume(&state).is_some());
        assert!(store.consume(&state).is_none());
    }

    #[test]
    fn unknown_state_is_a_miss() {
        let store = StateStore::new();
        assert!(store.consume("never-issued").is_none());
    }

    #[test]
    fn expired_state_is_unusable() {
        let store = StateStore::with_ttl(Duration::ZERO);
        let state = store.begin(PendingAuthorization::login(ProviderKind::Cognito));
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.consume(&state).is_none());
    }

    #[test]
    fn racing_consumers_cannot_both_win() {
        use std::sync::Arc;

        let store = Arc::new(StateStore::new());
        let state = store.begin(PendingAuthorization::login(ProviderKind::Cognito));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let state = state.clone();
            handles.push(std::thread::spawn(move || store.consume(&state).is_some()));
        }

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }
}
