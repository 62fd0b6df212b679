//! Previous-session restoration across a process epoch.

mod common;

use common::{calls_where, runtime, runtime_for};
use identity_engine::{
    AuthState, EngineSettings, GatewayCall, GatewayOperation, IdentityRuntime, InMemoryGateway,
    ProviderError, ProviderGateway, ProviderId, ProviderProfile, RestoreAttemptFlag,
    RestoreOutcome,
};
use std::sync::Arc;

fn lookups(gateway: &InMemoryGateway) -> usize {
    calls_where(gateway, |c| matches!(c, GatewayCall::RestorePreviousSession(_))).len()
}

#[tokio::test]
async fn restore_runs_once_per_epoch() {
    let (gateway, runtime) = runtime();

    assert_eq!(runtime.restore_if_needed().await, RestoreOutcome::NoPreviousSession);
    assert_eq!(runtime.restore_if_needed().await, RestoreOutcome::AlreadyAttempted);
    assert_eq!(lookups(&gateway), 1);
}

#[tokio::test]
async fn startup_restores_google_session() {
    let gateway = Arc::new(InMemoryGateway::new());
    let credential = gateway.issue_credential(
        ProviderProfile::google("g-1").with_email("ada@example.com"),
    );
    let original = gateway.sign_in(&credential).await.unwrap();
    // Simulate a new process: backend session gone, provider still remembers.
    gateway.sign_out().await.unwrap();
    let runtime = runtime_for(&gateway);

    let report = runtime.start().await;

    assert_eq!(
        report.restore,
        RestoreOutcome::Restored {
            user: original.clone()
        }
    );
    assert_eq!(runtime.state(), AuthState::SignedIn);
    assert!(calls_where(&gateway, |c| matches!(c, GatewayCall::Link(_))).is_empty());
}

#[tokio::test]
async fn guest_is_never_replaced_by_restore() {
    let gateway = Arc::new(InMemoryGateway::new());
    let credential = gateway.issue_credential(ProviderProfile::google("g-1"));
    gateway.remember_session(credential);
    let guest = gateway.sign_in_anonymously().await.unwrap();
    let runtime = runtime_for(&gateway);

    let report = runtime.start().await;

    assert_eq!(report.restore, RestoreOutcome::UserPresent);
    assert_eq!(runtime.current_user(), Some(guest));
    assert_eq!(lookups(&gateway), 0);
}

#[tokio::test]
async fn anonymous_sign_in_supersedes_restore() {
    let (gateway, runtime) = runtime();
    let credential = gateway.issue_credential(ProviderProfile::google("g-1"));
    gateway.remember_session(credential);

    runtime.sign_in_anonymously().await.unwrap();

    assert_eq!(runtime.restore_if_needed().await, RestoreOutcome::AlreadyAttempted);
    assert_eq!(lookups(&gateway), 0);
}

#[tokio::test]
async fn sign_out_rearms_restore() {
    let (gateway, runtime) = runtime();
    let credential = gateway.issue_credential(ProviderProfile::google("g-1"));
    runtime.authenticate(credential).await.unwrap();
    assert_eq!(runtime.restore_if_needed().await, RestoreOutcome::UserPresent);

    runtime.sign_out().await.unwrap();
    assert!(!runtime.restore_flag().is_set());

    // Google sign-out forgot the session, so there is nothing to resume.
    assert_eq!(runtime.restore_if_needed().await, RestoreOutcome::NoPreviousSession);
    assert_eq!(lookups(&gateway), 1);
}

#[tokio::test]
async fn restore_failure_is_swallowed() {
    let gateway = Arc::new(InMemoryGateway::new());
    let credential = gateway.issue_credential(ProviderProfile::google("g-1"));
    gateway.remember_session(credential);
    gateway.inject_failure(GatewayOperation::SignIn, ProviderError::network("offline"));
    let runtime = runtime_for(&gateway);

    let report = runtime.start().await;

    assert_eq!(
        report.restore,
        RestoreOutcome::Failed {
            message: "offline".to_string()
        }
    );
    assert_eq!(runtime.state(), AuthState::SignedOut);
}

#[tokio::test]
async fn shared_flag_spans_runtimes() {
    let gateway = Arc::new(InMemoryGateway::new());
    let flag = RestoreAttemptFlag::new();
    let settings = EngineSettings {
        restore_provider: ProviderId::apple(),
        ..EngineSettings::default()
    };
    let first = IdentityRuntime::new(gateway.clone(), flag.clone(), settings.clone());
    let second = IdentityRuntime::new(gateway.clone(), flag, settings);

    assert_eq!(first.restore_if_needed().await, RestoreOutcome::NoPreviousSession);
    assert_eq!(second.restore_if_needed().await, RestoreOutcome::AlreadyAttempted);
    assert_eq!(
        calls_where(&gateway, |c| matches!(c, GatewayCall::RestorePreviousSession(_))),
        vec![GatewayCall::RestorePreviousSession(ProviderId::apple())]
    );
}
