//! End-to-end login and session lifecycle, exercised against the in-memory
//! store with an offline gateway.

mod support;

use std::sync::Arc;

use chrono::{Duration, Utc};

use identity_broker::provider::{Gateway, ProviderKind};
use identity_broker::Error;

use support::{broker_with, state_from, FakeGateway};

fn cognito_alice() -> Arc<dyn Gateway> {
    Arc::new(FakeGateway::new(
        ProviderKind::Cognito,
        "cognito-sub-1",
        "Alice@Example.com",
    ))
}

#[tokio::test]
async fn first_login_creates_account_and_session() {
    let broker = broker_with(vec![cognito_alice()]);

    let url = broker.begin_login(ProviderKind::Cognito).unwrap();
    let session = broker
        .complete_login(ProviderKind::Cognito, "code", &state_from(&url))
        .await
        .unwrap();

    assert_eq!(session.account.email, "alice@example.com");
    assert_eq!(session.account.primary_provider, ProviderKind::Cognito);
    assert!(session.account.email_verified);

    let user = broker.authenticate(&session.access_token).await.unwrap();
    assert_eq!(user.account_id, session.account.id);
    assert_eq!(user.email, "alice@example.com");
}

#[tokio::test]
async fn repeat_login_resolves_the_same_account() {
    let broker = broker_with(vec![cognito_alice()]);

    let url = broker.begin_login(ProviderKind::Cognito).unwrap();
    let first = broker
        .complete_login(ProviderKind::Cognito, "code", &state_from(&url))
        .await
        .unwrap();

    let url = broker.begin_login(ProviderKind::Cognito).unwrap();
    let second = broker
        .complete_login(ProviderKind::Cognito, "code", &state_from(&url))
        .await
        .unwrap();

    assert_eq!(first.account.id, second.account.id);
    assert!(second.account.last_login_at.is_some());
    assert!(second.account.last_login_at >= first.account.last_login_at);
}

#[tokio::test]
async fn state_cannot_be_replayed() {
    let broker = broker_with(vec![cognito_alice()]);

    let url = broker.begin_login(ProviderKind::Cognito).unwrap();
    let state = state_from(&url);
    broker
        .complete_login(ProviderKind::Cognito, "code", &state)
        .await
        .unwrap();

    let replay = broker
        .complete_login(ProviderKind::Cognito, "code", &state)
        .await;
    assert!(matches!(replay, Err(Error::InvalidState)));
}

#[tokio::test]
async fn state_is_bound_to_its_provider() {
    let auth0 = Arc::new(FakeGateway::new(
        ProviderKind::Auth0,
        "auth0-sub-1",
        "alice@example.com",
    )) as Arc<dyn Gateway>;
    let broker = broker_with(vec![cognito_alice(), auth0]);

    let url = broker.begin_login(ProviderKind::Cognito).unwrap();
    let crossed = broker
        .complete_login(ProviderKind::Auth0, "code", &state_from(&url))
        .await;
    assert!(matches!(crossed, Err(Error::InvalidState)));
}

#[tokio::test]
async fn refresh_rotates_and_invalidates_the_old_token() {
    let broker = broker_with(vec![cognito_alice()]);

    let url = broker.begin_login(ProviderKind::Cognito).unwrap();
    let session = broker
        .complete_login(ProviderKind::Cognito, "code", &state_from(&url))
        .await
        .unwrap();

    let refreshed = broker.refresh_session(&session.refresh_token).await.unwrap();
    let new_refresh = refreshed.refresh_token.expect("rotation yields a token");
    assert_ne!(new_refresh, session.refresh_token);

    let user = broker.authenticate(&refreshed.access_token).await.unwrap();
    assert_eq!(user.account_id, session.account.id);

    let stale = broker.refresh_session(&session.refresh_token).await;
    assert!(matches!(stale, Err(Error::Unauthorized(_))));

    broker.refresh_session(&new_refresh).await.unwrap();
}

#[tokio::test]
async fn logout_revokes_the_refresh_token() {
    let broker = broker_with(vec![cognito_alice()]);

    let url = broker.begin_login(ProviderKind::Cognito).unwrap();
    let session = broker
        .complete_login(ProviderKind::Cognito, "code", &state_from(&url))
        .await
        .unwrap();

    assert!(broker.logout(&session.refresh_token).await.unwrap());
    assert!(!broker.logout(&session.refresh_token).await.unwrap());

    let refreshed = broker.refresh_session(&session.refresh_token).await;
    assert!(matches!(refreshed, Err(Error::Unauthorized(_))));
}

#[tokio::test]
async fn refresh_token_expiry_is_a_strict_boundary() {
    let broker = broker_with(vec![cognito_alice()]);

    let url = broker.begin_login(ProviderKind::Cognito).unwrap();
    let session = broker
        .complete_login(ProviderKind::Cognito, "code", &state_from(&url))
        .await
        .unwrap();

    let issuer = broker.issuer();
    issuer
        .verify_refresh_token_at(&session.refresh_token, Utc::now() + Duration::days(6))
        .await
        .unwrap();

    let beyond = Utc::now() + Duration::days(7) + Duration::minutes(1);
    let expired = issuer
        .verify_refresh_token_at(&session.refresh_token, beyond)
        .await;
    assert!(matches!(expired, Err(Error::Unauthorized(_))));
}

#[tokio::test]
async fn authenticate_rejects_garbage_tokens() {
    let broker = broker_with(vec![cognito_alice()]);
    let result = broker.authenticate("not-a-jwt").await;
    assert!(matches!(result, Err(Error::Unauthorized(_))));
}

#[tokio::test]
async fn login_for_unconfigured_provider_is_refused() {
    let broker = broker_with(vec![cognito_alice()]);
    let result = broker.begin_login(ProviderKind::Auth0);
    assert!(matches!(result, Err(Error::UnknownProvider(_))));
}
