//! Link-or-sign-in and conflict fallback through the runtime.

mod common;

use common::{calls_where, runtime, settle, RecordingListener, ADA_EMAIL};
use identity_engine::{
    AuthOutcome, AuthState, CommandPhase, ConflictCode, Credential, ErrorKind, GatewayCall,
    ProviderGateway, ProviderId, ProviderProfile,
};

#[tokio::test]
async fn sign_in_without_identity_never_links() {
    let (gateway, runtime) = runtime();
    let credential = gateway.issue_credential(ProviderProfile::google("g-1").with_email(ADA_EMAIL));

    let outcome = runtime.authenticate(credential.clone()).await.unwrap();

    assert!(matches!(outcome, AuthOutcome::SignedIn { .. }));
    assert_eq!(runtime.state(), AuthState::SignedIn);
    assert_eq!(gateway.calls(), vec![GatewayCall::SignIn(credential)]);
}

#[tokio::test]
async fn guest_link_makes_identity_permanent() {
    let (gateway, runtime) = runtime();
    let guest = runtime.sign_in_anonymously().await.unwrap().user().clone();

    let credential = gateway.issue_credential(ProviderProfile::google("g-1"));
    let outcome = runtime.authenticate(credential).await.unwrap();

    let AuthOutcome::Linked { user } = outcome else {
        panic!("expected link, got {outcome:?}");
    };
    assert_eq!(user.uid, guest.uid);
    assert!(!user.is_anonymous);
    assert_eq!(runtime.state(), AuthState::SignedIn);
    assert_eq!(runtime.current_user(), Some(user));
}

#[tokio::test]
async fn credential_in_use_falls_back_with_same_credential() {
    let (gateway, runtime) = runtime();
    let owner = gateway.register_account(ProviderProfile::google("g-1"));
    runtime.start().await;
    runtime.sign_in_anonymously().await.unwrap();
    settle().await;
    gateway.clear_calls();

    let listener = RecordingListener::attach(&runtime);
    let credential = gateway.issue_credential(ProviderProfile::google("g-1"));
    let outcome = runtime.authenticate(credential.clone()).await.unwrap();
    settle().await;

    assert_eq!(
        outcome,
        AuthOutcome::FellBackToSignIn {
            user: gateway.account(&owner.uid).unwrap(),
            reason: ConflictCode::CredentialAlreadyInUse,
        }
    );
    assert_eq!(
        gateway.calls(),
        vec![
            GatewayCall::Link(credential.clone()),
            GatewayCall::SignIn(credential)
        ]
    );
    assert_eq!(listener.len(), 1);
    assert_eq!(listener.snapshots()[0].user.as_ref().unwrap().uid, owner.uid);
    assert_eq!(runtime.command_phase(), CommandPhase::Idle);
}

#[tokio::test]
async fn fallback_notice_replaces_success_message() {
    let (gateway, runtime) = runtime();
    gateway.register_account(ProviderProfile::google("g-1"));
    runtime.sign_in_anonymously().await.unwrap();

    let credential = gateway.issue_credential(ProviderProfile::google("g-1"));
    let outcome = runtime.authenticate(credential).await.unwrap();

    assert_eq!(
        outcome.notice().as_deref(),
        Some("This account is already linked with your profile. You've been signed in.")
    );
}

#[tokio::test]
async fn apple_conflict_signs_in_with_rotated_credential() {
    let (gateway, runtime) = runtime();
    let owner = gateway.register_account(ProviderProfile::apple("a-1"));
    runtime.sign_in_anonymously().await.unwrap();
    gateway.clear_calls();

    let original = gateway.issue_credential(ProviderProfile::apple("a-1"));
    let outcome = runtime.authenticate(original.clone()).await.unwrap();

    assert_eq!(outcome.user().uid, owner.uid);
    let sign_ins = calls_where(&gateway, |c| matches!(c, GatewayCall::SignIn(_)));
    assert_eq!(sign_ins.len(), 1);
    let GatewayCall::SignIn(used) = &sign_ins[0] else {
        unreachable!()
    };
    assert_ne!(used, &original);
    assert_eq!(gateway.rotated_credentials(), vec![used.clone()]);
}

#[tokio::test]
async fn google_account_claims_apple_email() {
    let (gateway, runtime) = runtime();
    let google_account =
        gateway.register_account(ProviderProfile::google("g-1").with_email(ADA_EMAIL));
    runtime.sign_in_anonymously().await.unwrap();

    let apple = gateway.issue_credential(ProviderProfile::apple("a-1").with_email(ADA_EMAIL));
    let outcome = runtime.authenticate(apple.clone()).await.unwrap();

    let AuthOutcome::FellBackToSignIn { user, reason } = outcome else {
        panic!("expected fallback, got {outcome:?}");
    };
    assert_eq!(reason, ConflictCode::EmailAlreadyInUse);
    assert_eq!(user.uid, google_account.uid);
    assert!(user.has_provider(&ProviderId::google()));
    assert!(user.has_provider(&ProviderId::apple()));
    assert_eq!(runtime.current_user().unwrap().uid, google_account.uid);

    let rotated = gateway.rotated_credentials();
    assert_eq!(rotated.len(), 1);
    assert_ne!(rotated[0], apple);
    assert_eq!(
        calls_where(&gateway, |c| matches!(c, GatewayCall::SignIn(_))),
        vec![GatewayCall::SignIn(rotated[0].clone())]
    );
}

#[tokio::test]
async fn signed_in_google_user_falls_back_to_apple_email_owner() {
    let (gateway, runtime) = runtime();
    let email_owner =
        gateway.register_account(ProviderProfile::google("g-owner").with_email(ADA_EMAIL));
    runtime.start().await;

    let google = gateway.issue_credential(ProviderProfile::google("g-1"));
    let signed_in = runtime.authenticate(google).await.unwrap().into_user();
    assert!(!signed_in.is_anonymous);
    gateway.clear_calls();

    let apple = gateway.issue_credential(ProviderProfile::apple("a-1").with_email(ADA_EMAIL));
    let outcome = runtime.authenticate(apple.clone()).await.unwrap();
    settle().await;

    let AuthOutcome::FellBackToSignIn { user, reason } = outcome else {
        panic!("expected fallback, got {outcome:?}");
    };
    assert_eq!(reason, ConflictCode::EmailAlreadyInUse);
    assert_eq!(user.uid, email_owner.uid);
    assert_ne!(user.uid, signed_in.uid);

    let rotated = gateway.rotated_credentials();
    assert_eq!(rotated.len(), 1);
    assert_eq!(
        gateway.calls(),
        vec![
            GatewayCall::Link(apple),
            GatewayCall::SignIn(rotated[0].clone())
        ]
    );
    assert_eq!(runtime.current_user().unwrap().uid, email_owner.uid);
    assert_eq!(runtime.state(), AuthState::SignedIn);
}

#[tokio::test]
async fn guest_upgrade_takes_provider_display_name() {
    let (gateway, runtime) = runtime();
    runtime.sign_in_anonymously().await.unwrap();

    let credential = gateway.issue_credential(
        ProviderProfile::google("g-1")
            .with_email(ADA_EMAIL)
            .with_display_name("Ada Lovelace"),
    );
    let user = runtime.authenticate(credential).await.unwrap().into_user();

    assert_eq!(user.display_name.as_deref(), Some("Ada Lovelace"));
    assert_eq!(user.email.as_deref(), Some(ADA_EMAIL));
    assert_eq!(
        calls_where(&gateway, |c| matches!(c, GatewayCall::UpdateDisplayName(_))),
        vec![GatewayCall::UpdateDisplayName("Ada Lovelace".to_string())]
    );
    assert_eq!(runtime.current_user().unwrap().display_name, user.display_name);
}

#[tokio::test]
async fn guest_upgrade_falls_back_to_apple_full_name() {
    let (gateway, runtime) = runtime();
    runtime.sign_in_anonymously().await.unwrap();

    let credential = gateway
        .issue_credential(ProviderProfile::apple("a-1"))
        .with_full_name("Grace Hopper");
    let user = runtime.authenticate(credential).await.unwrap().into_user();

    assert_eq!(user.display_name.as_deref(), Some("Grace Hopper"));
}

#[tokio::test]
async fn existing_display_name_is_kept() {
    let (gateway, runtime) = runtime();
    let google = gateway.issue_credential(
        ProviderProfile::google("g-1").with_display_name("Ada"),
    );
    runtime.authenticate(google).await.unwrap();
    gateway.clear_calls();

    let apple = gateway.issue_credential(
        ProviderProfile::apple("a-1").with_display_name("Someone Else"),
    );
    let outcome = runtime.authenticate(apple).await.unwrap();

    assert!(matches!(outcome, AuthOutcome::Linked { .. }));
    assert_eq!(outcome.user().display_name.as_deref(), Some("Ada"));
    assert!(calls_where(&gateway, |c| matches!(c, GatewayCall::UpdateDisplayName(_))).is_empty());
}

#[tokio::test]
async fn second_link_of_same_provider_falls_back() {
    let (gateway, runtime) = runtime();
    runtime.sign_in_anonymously().await.unwrap();
    let first = gateway.issue_credential(ProviderProfile::google("g-1"));
    runtime.authenticate(first).await.unwrap();

    let second = gateway.issue_credential(ProviderProfile::google("g-2"));
    let outcome = runtime.authenticate(second).await.unwrap();

    let AuthOutcome::FellBackToSignIn { reason, user } = outcome else {
        panic!("expected fallback, got {outcome:?}");
    };
    assert_eq!(reason, ConflictCode::ProviderAlreadyLinked);
    assert_eq!(user.provider(&ProviderId::google()).unwrap().subject, "g-2");
}

#[tokio::test]
async fn rejected_credential_leaves_state_alone() {
    let (gateway, runtime) = runtime();
    let listener = RecordingListener::attach(&runtime);

    let err = runtime
        .authenticate(Credential::google("forged", "access"))
        .await
        .unwrap_err();

    assert!(matches!(err.kind(), Some(ErrorKind::Unknown(_))));
    assert_eq!(listener.len(), 0);
    assert_eq!(runtime.state(), AuthState::SignedOut);
    assert_eq!(gateway.current_user(), None);
}

#[tokio::test]
async fn concurrent_commands_run_one_at_a_time() {
    let (gateway, runtime) = runtime();
    runtime.sign_in_anonymously().await.unwrap();

    let google = gateway.issue_credential(ProviderProfile::google("g-1"));
    let apple = gateway.issue_credential(ProviderProfile::apple("a-1"));

    let (a, b) = tokio::join!(runtime.authenticate(google), runtime.authenticate(apple));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(matches!(a, AuthOutcome::Linked { .. }));
    assert!(matches!(b, AuthOutcome::Linked { .. }));
    let user = runtime.current_user().unwrap();
    assert!(user.has_provider(&ProviderId::google()));
    assert!(user.has_provider(&ProviderId::apple()));
    assert_eq!(runtime.command_phase(), CommandPhase::Idle);
}
