//! Account linking end to end: attach a second provider identity, log in
//! through it, and exercise every refusal path.

mod support;

use std::sync::Arc;

use identity_broker::broker::{IdentityBroker, LoginSession};
use identity_broker::linking::LinkRefusal;
use identity_broker::provider::{Gateway, ProviderKind};
use identity_broker::Error;

use support::{broker_with, state_from, FakeGateway};

fn gateways(auth0_email: &str) -> Vec<Arc<dyn Gateway>> {
    vec![
        Arc::new(FakeGateway::new(
            ProviderKind::Cognito,
            "cognito-sub-1",
            "alice@example.com",
        )) as Arc<dyn Gateway>,
        Arc::new(FakeGateway::new(
            ProviderKind::Auth0,
            "auth0-sub-1",
            auth0_email,
        )) as Arc<dyn Gateway>,
    ]
}

async fn login(broker: &IdentityBroker, provider: ProviderKind) -> LoginSession {
    let url = broker.begin_login(provider).unwrap();
    broker
        .complete_login(provider, "code", &state_from(&url))
        .await
        .unwrap()
}

fn refusal(err: Error) -> LinkRefusal {
    match err {
        Error::PolicyViolation(refusal) => refusal,
        other => panic!("expected a policy violation, got {other}"),
    }
}

#[tokio::test]
async fn linked_identity_logs_into_the_original_account() {
    let broker = broker_with(gateways("alice@example.com"));
    let session = login(&broker, ProviderKind::Cognito).await;

    let url = broker
        .begin_link(session.account.id, ProviderKind::Auth0)
        .unwrap();
    let linked = broker
        .complete_link(ProviderKind::Auth0, "code", &state_from(&url))
        .await
        .unwrap();
    assert_eq!(linked.provider, ProviderKind::Auth0);
    assert_eq!(linked.account_id, session.account.id);

    // Logging in through the newly linked provider resolves to the same
    // account instead of creating a fresh one.
    let via_auth0 = login(&broker, ProviderKind::Auth0).await;
    assert_eq!(via_auth0.account.id, session.account.id);

    let profile = broker.profile(session.account.id).await.unwrap();
    assert_eq!(profile.linked_identities.len(), 1);
    assert_eq!(profile.linked_identities[0].provider, ProviderKind::Auth0);
}

#[tokio::test]
async fn link_refuses_mismatched_email() {
    let broker = broker_with(gateways("mallory@example.com"));
    let session = login(&broker, ProviderKind::Cognito).await;

    let url = broker
        .begin_link(session.account.id, ProviderKind::Auth0)
        .unwrap();
    let err = broker
        .complete_link(ProviderKind::Auth0, "code", &state_from(&url))
        .await
        .unwrap_err();
    assert_eq!(refusal(err), LinkRefusal::EmailMismatch);
}

#[tokio::test]
async fn link_refuses_the_primary_identity() {
    let broker = broker_with(gateways("alice@example.com"));
    let session = login(&broker, ProviderKind::Cognito).await;

    let url = broker
        .begin_link(session.account.id, ProviderKind::Cognito)
        .unwrap();
    let err = broker
        .complete_link(ProviderKind::Cognito, "code", &state_from(&url))
        .await
        .unwrap_err();
    assert_eq!(refusal(err), LinkRefusal::PrimaryIdentity);
}

#[tokio::test]
async fn link_refuses_an_identity_already_attached() {
    let broker = broker_with(gateways("alice@example.com"));
    let session = login(&broker, ProviderKind::Cognito).await;

    let url = broker
        .begin_link(session.account.id, ProviderKind::Auth0)
        .unwrap();
    broker
        .complete_link(ProviderKind::Auth0, "code", &state_from(&url))
        .await
        .unwrap();

    let url = broker
        .begin_link(session.account.id, ProviderKind::Auth0)
        .unwrap();
    let err = broker
        .complete_link(ProviderKind::Auth0, "code", &state_from(&url))
        .await
        .unwrap_err();
    assert_eq!(refusal(err), LinkRefusal::AlreadyLinkedToAccount);
}

#[tokio::test]
async fn unlink_detaches_and_is_not_repeatable() {
    let broker = broker_with(gateways("alice@example.com"));
    let session = login(&broker, ProviderKind::Cognito).await;

    let url = broker
        .begin_link(session.account.id, ProviderKind::Auth0)
        .unwrap();
    broker
        .complete_link(ProviderKind::Auth0, "code", &state_from(&url))
        .await
        .unwrap();

    assert!(broker
        .unlink(session.account.id, ProviderKind::Auth0)
        .await
        .unwrap());
    assert!(!broker
        .unlink(session.account.id, ProviderKind::Auth0)
        .await
        .unwrap());

    let profile = broker.profile(session.account.id).await.unwrap();
    assert!(profile.linked_identities.is_empty());
}

#[tokio::test]
async fn unlink_never_removes_the_primary_provider() {
    let broker = broker_with(gateways("alice@example.com"));
    let session = login(&broker, ProviderKind::Cognito).await;

    let err = broker
        .unlink(session.account.id, ProviderKind::Cognito)
        .await
        .unwrap_err();
    assert_eq!(refusal(err), LinkRefusal::UnlinkPrimary);
}

#[tokio::test]
async fn link_callback_requires_a_link_state() {
    let broker = broker_with(gateways("alice@example.com"));
    login(&broker, ProviderKind::Cognito).await;

    // A state minted for login never completes a link.
    let url = broker.begin_login(ProviderKind::Auth0).unwrap();
    let err = broker
        .complete_link(ProviderKind::Auth0, "code", &state_from(&url))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState));
}
