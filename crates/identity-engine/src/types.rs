//! Identity, credential and outcome types.

use crate::error::{AuthError, AuthResult, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;

const REDACTED: &str = "[redacted]";

/// Identifier of an identity provider (e.g. `google.com`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub const GOOGLE: &'static str = "google.com";
    pub const APPLE: &'static str = "apple.com";
    /// Pseudo-provider recorded for guest identities.
    pub const ANONYMOUS: &'static str = "anonymous";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn google() -> Self {
        Self::new(Self::GOOGLE)
    }

    pub fn apple() -> Self {
        Self::new(Self::APPLE)
    }

    pub fn anonymous() -> Self {
        Self::new(Self::ANONYMOUS)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_apple(&self) -> bool {
        self.0 == Self::APPLE
    }

    pub fn is_anonymous(&self) -> bool {
        self.0 == Self::ANONYMOUS
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One entry of a user's provider data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedProvider {
    pub provider: ProviderId,
    /// Provider-side user id.
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// An authenticated identity as reported by the provider backend.
///
/// Always replaced wholesale; never patched field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: String,
    pub is_anonymous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub providers: Vec<LinkedProvider>,
}

impl User {
    pub fn provider(&self, provider: &ProviderId) -> Option<&LinkedProvider> {
        self.providers.iter().find(|p| &p.provider == provider)
    }

    pub fn has_provider(&self, provider: &ProviderId) -> bool {
        self.provider(provider).is_some()
    }

    /// True when a non-blank display name is set.
    pub fn has_display_name(&self) -> bool {
        self.display_name
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty())
    }
}

/// Session state derived from the current identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// An anonymous (guest) identity is present.
    Authenticated,
    /// A non-anonymous identity is present.
    SignedIn,
    /// No identity.
    #[default]
    SignedOut,
}

impl AuthState {
    pub fn from_user(user: Option<&User>) -> Self {
        match user {
            None => AuthState::SignedOut,
            Some(u) if u.is_anonymous => AuthState::Authenticated,
            Some(_) => AuthState::SignedIn,
        }
    }

    pub fn has_identity(&self) -> bool {
        !matches!(self, AuthState::SignedOut)
    }
}

/// Identity and its derived state, published as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub state: AuthState,
}

impl SessionSnapshot {
    pub fn new(user: Option<User>) -> Self {
        let state = AuthState::from_user(user.as_ref());
        Self { user, state }
    }
}

/// The backend's identity at a revision.
///
/// Revisions increase with every identity change the backend makes, so a
/// lower revision always describes an older identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityChange {
    pub revision: u64,
    pub user: Option<User>,
}

impl IdentityChange {
    pub fn new(revision: u64, user: Option<User>) -> Self {
        Self { revision, user }
    }
}

/// Opaque token bundle obtained from a provider's sign-in flow.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    provider: ProviderId,
    id_token: String,
    access_token: Option<String>,
    raw_nonce: Option<String>,
    full_name: Option<String>,
}

impl Credential {
    /// Bare credential carrying only an ID token.
    pub fn new(provider: ProviderId, id_token: impl Into<String>) -> Self {
        Self {
            provider,
            id_token: id_token.into(),
            access_token: None,
            raw_nonce: None,
            full_name: None,
        }
    }

    pub fn google(id_token: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            ..Self::new(ProviderId::google(), id_token)
        }
    }

    pub fn apple(id_token: impl Into<String>, raw_nonce: impl Into<String>) -> Self {
        Self {
            raw_nonce: Some(raw_nonce.into()),
            ..Self::new(ProviderId::apple(), id_token)
        }
    }

    /// Attach the full name the provider reported during the sign-in flow.
    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub fn id_token(&self) -> &str {
        &self.id_token
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn raw_nonce(&self) -> Option<&str> {
        self.raw_nonce.as_deref()
    }

    pub fn full_name(&self) -> Option<&str> {
        self.full_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
    }

    pub fn is_apple(&self) -> bool {
        self.provider.is_apple()
    }

    /// Check the material a provider call needs is present.
    pub fn validate(&self) -> AuthResult<()> {
        if self.id_token.trim().is_empty() {
            return Err(AuthError::InvalidCredential(format!(
                "{} credential has no ID token",
                self.provider
            )));
        }
        let has_nonce = matches!(self.raw_nonce(), Some(n) if !n.trim().is_empty());
        if self.is_apple() && !has_nonce {
            return Err(AuthError::InvalidCredential(
                "apple.com credential has no raw nonce".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| REDACTED);
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("id_token", &REDACTED)
            .field("access_token", &redact(&self.access_token))
            .field("raw_nonce", &redact(&self.raw_nonce))
            .field("full_name", &self.full_name)
            .finish()
    }
}

/// Provider-reported reasons a link cannot proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictCode {
    EmailAlreadyInUse,
    CredentialAlreadyInUse,
    ProviderAlreadyLinked,
}

impl From<ConflictCode> for ErrorKind {
    fn from(code: ConflictCode) -> Self {
        match code {
            ConflictCode::EmailAlreadyInUse => ErrorKind::EmailAlreadyInUse,
            ConflictCode::CredentialAlreadyInUse => ErrorKind::CredentialAlreadyInUse,
            ConflictCode::ProviderAlreadyLinked => ErrorKind::ProviderAlreadyLinked,
        }
    }
}

/// Successful result of `authenticate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuthOutcome {
    /// No identity was present; signed in directly.
    SignedIn { user: User },
    /// The credential was linked to the current identity.
    Linked { user: User },
    /// Linking hit a conflict; signed in to the account owning the credential.
    FellBackToSignIn { user: User, reason: ConflictCode },
}

impl AuthOutcome {
    pub fn user(&self) -> &User {
        match self {
            AuthOutcome::SignedIn { user }
            | AuthOutcome::Linked { user }
            | AuthOutcome::FellBackToSignIn { user, .. } => user,
        }
    }

    pub fn into_user(self) -> User {
        match self {
            AuthOutcome::SignedIn { user }
            | AuthOutcome::Linked { user }
            | AuthOutcome::FellBackToSignIn { user, .. } => user,
        }
    }

    /// Message to show instead of a plain success, if any.
    pub fn notice(&self) -> Option<String> {
        match self {
            AuthOutcome::FellBackToSignIn { reason, .. } => Some(ErrorKind::from(*reason).message()),
            _ => None,
        }
    }
}

/// Result of an anonymous sign-in request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "user", rename_all = "snake_case")]
pub enum AnonymousSignIn {
    Created(User),
    AlreadyAnonymous(User),
}

impl AnonymousSignIn {
    pub fn user(&self) -> &User {
        match self {
            AnonymousSignIn::Created(user) | AnonymousSignIn::AlreadyAnonymous(user) => user,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignOutOutcome {
    SignedOut,
    /// Guest identities are never signed out.
    SkippedAnonymous,
    NoIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RestoreOutcome {
    AlreadyAttempted,
    UserPresent,
    NoPreviousSession,
    Restored { user: User },
    Failed { message: String },
}

/// Provider-side state of a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    Authorized,
    Revoked,
    NotFound,
    Unknown,
}

impl CredentialState {
    /// True when the session must be ended.
    pub fn requires_sign_out(&self) -> bool {
        matches!(self, CredentialState::Revoked | CredentialState::NotFound)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RevocationCheck {
    NotApplicable,
    Valid { state: CredentialState },
    SignedOut { state: CredentialState },
    Failed { message: String },
}
