//! Deterministic in-process identity backend.
//!
//! Keeps an account registry, issues credentials for provider profiles,
//! detects link conflicts the way hosted identity backends report them and
//! records every call. Failures can be injected one call at a time.

use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};
use crate::gateway::ProviderGateway;
use crate::types::{
    Credential, CredentialState, IdentityChange, LinkedProvider, ProviderId, User,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

/// Identity as known by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider: ProviderId,
    pub subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl ProviderProfile {
    pub fn new(provider: ProviderId, subject: impl Into<String>) -> Self {
        Self {
            provider,
            subject: subject.into(),
            email: None,
            display_name: None,
        }
    }

    pub fn google(subject: impl Into<String>) -> Self {
        Self::new(ProviderId::google(), subject)
    }

    pub fn apple(subject: impl Into<String>) -> Self {
        Self::new(ProviderId::apple(), subject)
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    fn linked(&self) -> LinkedProvider {
        LinkedProvider {
            provider: self.provider.clone(),
            subject: self.subject.clone(),
            display_name: self.display_name.clone(),
            email: self.email.clone(),
        }
    }

    fn key(&self) -> (ProviderId, String) {
        (self.provider.clone(), self.subject.clone())
    }
}

/// Gateway operations that can fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOperation {
    SignIn,
    SignInAnonymously,
    Link,
    UpdateDisplayName,
    SignOut,
    DeleteCurrentUser,
    RestorePreviousSession,
    CredentialValidity,
    ProviderSignOut,
}

/// A call observed by the gateway, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    SignIn(Credential),
    SignInAnonymously,
    Link(Credential),
    UpdateDisplayName(String),
    SignOut,
    DeleteCurrentUser,
    RestorePreviousSession(ProviderId),
    CredentialValidity { provider: ProviderId, subject: String },
    ProviderSignOut(ProviderId),
}

#[derive(Default)]
struct Registry {
    accounts: BTreeMap<String, User>,
    /// (provider, subject) -> uid
    bindings: HashMap<(ProviderId, String), String>,
    /// id token -> profile it was issued for
    tokens: HashMap<String, ProviderProfile>,
    current: Option<String>,
    /// Bumped on every identity change.
    revision: u64,
    previous_sessions: HashMap<ProviderId, Credential>,
    credential_states: HashMap<(ProviderId, String), CredentialState>,
    failures: HashMap<GatewayOperation, ProviderError>,
    calls: Vec<GatewayCall>,
    rotated: Vec<Credential>,
    subscribers: Vec<mpsc::UnboundedSender<IdentityChange>>,
}

impl Registry {
    fn record(&mut self, operation: GatewayOperation, call: GatewayCall) -> ProviderResult<()> {
        trace!(call = ?call, "Gateway call");
        self.calls.push(call);
        match self.failures.remove(&operation) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn current_user(&self) -> Option<User> {
        self.current
            .as_ref()
            .and_then(|uid| self.accounts.get(uid))
            .cloned()
    }

    fn require_current(&self) -> ProviderResult<String> {
        self.current.clone().ok_or_else(|| {
            ProviderError::new(ProviderErrorCode::NoCurrentUser, "No user is signed in")
        })
    }

    fn current_identity(&self) -> IdentityChange {
        IdentityChange::new(self.revision, self.current_user())
    }

    fn broadcast(&mut self) {
        self.revision += 1;
        let change = self.current_identity();
        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    fn issue(&mut self, profile: ProviderProfile) -> Credential {
        let id_token = format!("idt-{}", Uuid::new_v4());
        let credential = if profile.provider.is_apple() {
            let credential = Credential::apple(id_token.clone(), Uuid::new_v4().to_string());
            match &profile.display_name {
                Some(name) => credential.with_full_name(name.clone()),
                None => credential,
            }
        } else if profile.provider == ProviderId::google() {
            Credential::google(id_token.clone(), format!("at-{}", Uuid::new_v4()))
        } else {
            Credential::new(profile.provider.clone(), id_token.clone())
        };
        self.tokens.insert(id_token, profile);
        credential
    }

    fn profile(&self, credential: &Credential) -> ProviderResult<ProviderProfile> {
        self.tokens
            .get(credential.id_token())
            .filter(|profile| &profile.provider == credential.provider())
            .cloned()
            .ok_or_else(|| {
                ProviderError::other(format!(
                    "The supplied {} credential is malformed or has expired",
                    credential.provider()
                ))
            })
    }

    fn email_owner(&self, email: Option<&str>, except: Option<&str>) -> Option<String> {
        let email = email?;
        self.accounts
            .values()
            .filter(|account| Some(account.uid.as_str()) != except)
            .find(|account| {
                account.email.as_deref() == Some(email)
                    || account
                        .providers
                        .iter()
                        .any(|p| p.email.as_deref() == Some(email))
            })
            .map(|account| account.uid.clone())
    }

    fn create_account(&mut self, profile: &ProviderProfile) -> User {
        let user = User {
            uid: Uuid::new_v4().to_string(),
            is_anonymous: false,
            display_name: profile.display_name.clone(),
            email: profile.email.clone(),
            providers: vec![profile.linked()],
        };
        self.accounts.insert(user.uid.clone(), user.clone());
        self.bindings.insert(profile.key(), user.uid.clone());
        user
    }

    fn require_current_user(&self) -> ProviderResult<User> {
        self.current_user().ok_or_else(|| {
            ProviderError::new(ProviderErrorCode::NoCurrentUser, "No user is signed in")
        })
    }

    /// Attach the profile to an account; a guest account becomes permanent.
    fn bind(&mut self, uid: &str, profile: &ProviderProfile) -> ProviderResult<User> {
        let account = self
            .accounts
            .get_mut(uid)
            .ok_or_else(|| ProviderError::other(format!("Account {uid} does not exist")))?;

        if account.is_anonymous {
            account.is_anonymous = false;
            account.providers.retain(|p| !p.provider.is_anonymous());
        }
        account.providers.push(profile.linked());
        if account.email.is_none() {
            account.email = profile.email.clone();
        }
        let user = account.clone();
        self.bindings.insert(profile.key(), uid.to_string());
        Ok(user)
    }
}

/// In-memory [`ProviderGateway`].
pub struct InMemoryGateway {
    inner: Mutex<Registry>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Registry::default()),
        }
    }

    /// Register a provider profile and return a credential that signs in as it.
    pub fn issue_credential(&self, profile: ProviderProfile) -> Credential {
        self.inner.lock().issue(profile)
    }

    /// Create an account for the profile without changing the current session.
    pub fn register_account(&self, profile: ProviderProfile) -> User {
        let mut inner = self.inner.lock();
        let existing = inner
            .bindings
            .get(&profile.key())
            .and_then(|uid| inner.accounts.get(uid))
            .cloned();
        match existing {
            Some(user) => user,
            None => inner.create_account(&profile),
        }
    }

    /// Remember a credential as the provider's resumable session.
    pub fn remember_session(&self, credential: Credential) {
        self.inner
            .lock()
            .previous_sessions
            .insert(credential.provider().clone(), credential);
    }

    pub fn set_credential_state(
        &self,
        provider: &ProviderId,
        subject: &str,
        state: CredentialState,
    ) {
        self.inner
            .lock()
            .credential_states
            .insert((provider.clone(), subject.to_string()), state);
    }

    /// Fail the next call of `operation` with `error`.
    pub fn inject_failure(&self, operation: GatewayOperation, error: ProviderError) {
        self.inner.lock().failures.insert(operation, error);
    }

    /// Replacement credentials handed out with Apple link conflicts, in order.
    pub fn rotated_credentials(&self) -> Vec<Credential> {
        self.inner.lock().rotated.clone()
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.inner.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    pub fn account(&self, uid: &str) -> Option<User> {
        self.inner.lock().accounts.get(uid).cloned()
    }

    pub fn account_count(&self) -> usize {
        self.inner.lock().accounts.len()
    }
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderGateway for InMemoryGateway {
    async fn sign_in(&self, credential: &Credential) -> ProviderResult<User> {
        let mut inner = self.inner.lock();
        inner.record(GatewayOperation::SignIn, GatewayCall::SignIn(credential.clone()))?;
        let profile = inner.profile(credential)?;

        let uid = match inner.bindings.get(&profile.key()).cloned() {
            Some(uid) => uid,
            None => match inner.email_owner(profile.email.as_deref(), None) {
                Some(owner) => {
                    inner.bind(&owner, &profile)?;
                    owner
                }
                None => inner.create_account(&profile).uid,
            },
        };

        inner.current = Some(uid);
        inner
            .previous_sessions
            .insert(profile.provider.clone(), credential.clone());
        inner.broadcast();
        inner.require_current_user()
    }

    async fn sign_in_anonymously(&self) -> ProviderResult<User> {
        let mut inner = self.inner.lock();
        inner.record(GatewayOperation::SignInAnonymously, GatewayCall::SignInAnonymously)?;

        let uid = Uuid::new_v4().to_string();
        let user = User {
            uid: uid.clone(),
            is_anonymous: true,
            display_name: None,
            email: None,
            providers: vec![LinkedProvider {
                provider: ProviderId::anonymous(),
                subject: uid.clone(),
                display_name: None,
                email: None,
            }],
        };
        inner.accounts.insert(uid.clone(), user.clone());
        inner.current = Some(uid);
        inner.broadcast();
        Ok(user)
    }

    async fn link(&self, credential: &Credential) -> ProviderResult<User> {
        let mut inner = self.inner.lock();
        inner.record(GatewayOperation::Link, GatewayCall::Link(credential.clone()))?;
        let uid = inner.require_current()?;
        let profile = inner.profile(credential)?;

        let conflict = if inner
            .accounts
            .get(&uid)
            .is_some_and(|account| account.has_provider(&profile.provider))
        {
            Some(ProviderError::new(
                ProviderErrorCode::ProviderAlreadyLinked,
                format!("{} is already linked to this account", profile.provider),
            ))
        } else if inner
            .bindings
            .get(&profile.key())
            .is_some_and(|owner| owner != &uid)
        {
            Some(ProviderError::new(
                ProviderErrorCode::CredentialAlreadyInUse,
                "This credential is already associated with a different user account",
            ))
        } else if inner
            .email_owner(profile.email.as_deref(), Some(uid.as_str()))
            .is_some()
        {
            Some(ProviderError::new(
                ProviderErrorCode::EmailAlreadyInUse,
                "The email address is already in use by another account",
            ))
        } else {
            None
        };

        if let Some(err) = conflict {
            // Apple credentials are single-use; hand back a fresh one.
            let err = if profile.provider.is_apple() {
                let rotated = inner.issue(profile);
                inner.rotated.push(rotated.clone());
                err.with_updated_credential(rotated)
            } else {
                err
            };
            return Err(err);
        }

        let user = inner.bind(&uid, &profile)?;
        inner
            .previous_sessions
            .insert(profile.provider.clone(), credential.clone());
        inner.broadcast();
        Ok(user)
    }

    async fn update_display_name(&self, display_name: &str) -> ProviderResult<User> {
        let mut inner = self.inner.lock();
        inner.record(
            GatewayOperation::UpdateDisplayName,
            GatewayCall::UpdateDisplayName(display_name.to_string()),
        )?;
        let uid = inner.require_current()?;
        if let Some(account) = inner.accounts.get_mut(&uid) {
            account.display_name = Some(display_name.to_string());
        }
        inner.broadcast();
        inner.require_current_user()
    }

    async fn sign_out(&self) -> ProviderResult<()> {
        let mut inner = self.inner.lock();
        inner.record(GatewayOperation::SignOut, GatewayCall::SignOut)?;
        inner.current = None;
        inner.broadcast();
        Ok(())
    }

    async fn delete_current_user(&self) -> ProviderResult<()> {
        let mut inner = self.inner.lock();
        inner.record(GatewayOperation::DeleteCurrentUser, GatewayCall::DeleteCurrentUser)?;
        let uid = inner.require_current()?;
        inner.accounts.remove(&uid);
        inner.bindings.retain(|_, owner| owner != &uid);
        inner.current = None;
        inner.broadcast();
        Ok(())
    }

    fn current_identity(&self) -> IdentityChange {
        self.inner.lock().current_identity()
    }

    fn change_notifications(&self) -> mpsc::UnboundedReceiver<IdentityChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().subscribers.push(tx);
        rx
    }

    async fn restore_previous_session(
        &self,
        provider: &ProviderId,
    ) -> ProviderResult<Option<Credential>> {
        let mut inner = self.inner.lock();
        inner.record(
            GatewayOperation::RestorePreviousSession,
            GatewayCall::RestorePreviousSession(provider.clone()),
        )?;
        Ok(inner.previous_sessions.get(provider).cloned())
    }

    async fn credential_validity(
        &self,
        provider: &ProviderId,
        subject: &str,
    ) -> ProviderResult<CredentialState> {
        let mut inner = self.inner.lock();
        inner.record(
            GatewayOperation::CredentialValidity,
            GatewayCall::CredentialValidity {
                provider: provider.clone(),
                subject: subject.to_string(),
            },
        )?;
        Ok(inner
            .credential_states
            .get(&(provider.clone(), subject.to_string()))
            .copied()
            .unwrap_or(CredentialState::Authorized))
    }

    async fn provider_sign_out(&self, provider: &ProviderId) -> ProviderResult<()> {
        let mut inner = self.inner.lock();
        inner.record(
            GatewayOperation::ProviderSignOut,
            GatewayCall::ProviderSignOut(provider.clone()),
        )?;
        inner.previous_sessions.remove(provider);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sign_in_creates_then_reuses_account() {
        let gateway = InMemoryGateway::new();
        let credential = gateway.issue_credential(
            ProviderProfile::google("g-1")
                .with_email("ada@example.com")
                .with_display_name("Ada"),
        );

        let first = gateway.sign_in(&credential).await.unwrap();
        assert!(!first.is_anonymous);
        assert_eq!(first.display_name.as_deref(), Some("Ada"));
        assert_eq!(first.email.as_deref(), Some("ada@example.com"));

        gateway.sign_out().await.unwrap();
        let second = gateway.sign_in(&credential).await.unwrap();
        assert_eq!(second.uid, first.uid);
        assert_eq!(gateway.account_count(), 1);
    }

    #[tokio::test]
    async fn test_sign_in_binds_by_email() {
        let gateway = InMemoryGateway::new();
        let owner =
            gateway.register_account(ProviderProfile::google("g-1").with_email("ada@example.com"));
        let apple =
            gateway.issue_credential(ProviderProfile::apple("a-1").with_email("ada@example.com"));

        let user = gateway.sign_in(&apple).await.unwrap();

        assert_eq!(user.uid, owner.uid);
        assert!(user.has_provider(&ProviderId::apple()));
        assert!(user.has_provider(&ProviderId::google()));
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let gateway = InMemoryGateway::new();
        let err = gateway
            .sign_in(&Credential::google("forged", "access"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ProviderErrorCode::Other);
    }

    #[tokio::test]
    async fn test_link_upgrades_guest() {
        let gateway = InMemoryGateway::new();
        let guest = gateway.sign_in_anonymously().await.unwrap();
        assert!(guest.has_provider(&ProviderId::anonymous()));

        let credential = gateway.issue_credential(ProviderProfile::google("g-1"));
        let user = gateway.link(&credential).await.unwrap();

        assert_eq!(user.uid, guest.uid);
        assert!(!user.is_anonymous);
        assert_eq!(user.providers.len(), 1);
        assert_eq!(user.providers[0].provider, ProviderId::google());
    }

    #[tokio::test]
    async fn test_link_without_user() {
        let gateway = InMemoryGateway::new();
        let credential = gateway.issue_credential(ProviderProfile::google("g-1"));
        let err = gateway.link(&credential).await.unwrap_err();
        assert_eq!(err.code, ProviderErrorCode::NoCurrentUser);
    }

    #[tokio::test]
    async fn test_link_conflicts() {
        let gateway = InMemoryGateway::new();
        gateway.register_account(ProviderProfile::google("g-1").with_email("ada@example.com"));
        gateway.sign_in_anonymously().await.unwrap();

        let bound = gateway.issue_credential(ProviderProfile::google("g-1"));
        assert_eq!(
            gateway.link(&bound).await.unwrap_err().code,
            ProviderErrorCode::CredentialAlreadyInUse
        );

        let same_email =
            gateway.issue_credential(ProviderProfile::google("g-2").with_email("ada@example.com"));
        assert_eq!(
            gateway.link(&same_email).await.unwrap_err().code,
            ProviderErrorCode::EmailAlreadyInUse
        );

        let fresh = gateway.issue_credential(ProviderProfile::google("g-3"));
        gateway.link(&fresh).await.unwrap();
        let another = gateway.issue_credential(ProviderProfile::google("g-4"));
        let err = gateway.link(&another).await.unwrap_err();
        assert_eq!(err.code, ProviderErrorCode::ProviderAlreadyLinked);
        assert!(err.updated_credential.is_none());
    }

    #[tokio::test]
    async fn test_apple_conflict_rotates_credential() {
        let gateway = InMemoryGateway::new();
        let owner = gateway.register_account(ProviderProfile::apple("a-1"));
        gateway.sign_in_anonymously().await.unwrap();

        let original = gateway.issue_credential(ProviderProfile::apple("a-1"));
        let err = gateway.link(&original).await.unwrap_err();

        assert_eq!(err.code, ProviderErrorCode::CredentialAlreadyInUse);
        let rotated = err.updated_credential.unwrap();
        assert_ne!(rotated.id_token(), original.id_token());
        assert_eq!(gateway.rotated_credentials(), vec![rotated.clone()]);

        let user = gateway.sign_in(&rotated).await.unwrap();
        assert_eq!(user.uid, owner.uid);
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let gateway = InMemoryGateway::new();
        gateway.inject_failure(
            GatewayOperation::SignInAnonymously,
            ProviderError::network("offline"),
        );

        assert!(gateway.sign_in_anonymously().await.is_err());
        assert!(gateway.sign_in_anonymously().await.is_ok());
        assert_eq!(
            gateway.calls(),
            vec![GatewayCall::SignInAnonymously, GatewayCall::SignInAnonymously]
        );
    }

    #[tokio::test]
    async fn test_change_notifications_follow_current_user() {
        let gateway = InMemoryGateway::new();
        let mut changes = gateway.change_notifications();

        let guest = gateway.sign_in_anonymously().await.unwrap();
        gateway.delete_current_user().await.unwrap();

        assert_eq!(
            changes.recv().await.unwrap(),
            IdentityChange::new(1, Some(guest))
        );
        assert_eq!(changes.recv().await.unwrap(), IdentityChange::new(2, None));
        assert_eq!(gateway.current_identity(), IdentityChange::new(2, None));
    }

    #[tokio::test]
    async fn test_failed_calls_leave_revision_alone() {
        let gateway = InMemoryGateway::new();
        gateway.sign_in_anonymously().await.unwrap();
        let credential = gateway.issue_credential(ProviderProfile::google("g-1"));
        gateway.inject_failure(GatewayOperation::Link, ProviderError::network("offline"));

        assert!(gateway.link(&credential).await.is_err());
        assert!(gateway.restore_previous_session(&ProviderId::google()).await.is_ok());

        assert_eq!(gateway.current_identity().revision, 1);
    }

    #[tokio::test]
    async fn test_previous_session_cleared_by_provider_sign_out() {
        let gateway = InMemoryGateway::new();
        let credential = gateway.issue_credential(ProviderProfile::google("g-1"));
        gateway.sign_in(&credential).await.unwrap();

        let google = ProviderId::google();
        assert_eq!(
            gateway.restore_previous_session(&google).await.unwrap(),
            Some(credential)
        );

        gateway.provider_sign_out(&google).await.unwrap();
        assert_eq!(gateway.restore_previous_session(&google).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_credential_state_defaults_to_authorized() {
        let gateway = InMemoryGateway::new();
        let apple = ProviderId::apple();
        assert_eq!(
            gateway.credential_validity(&apple, "a-1").await.unwrap(),
            CredentialState::Authorized
        );

        gateway.set_credential_state(&apple, "a-1", CredentialState::NotFound);
        assert_eq!(
            gateway.credential_validity(&apple, "a-1").await.unwrap(),
            CredentialState::NotFound
        );
    }
}
