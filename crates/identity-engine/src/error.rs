//! Provider and authentication error types.

use crate::types::{ConflictCode, Credential};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Failure codes reported by the provider backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorCode {
    EmailAlreadyInUse,
    CredentialAlreadyInUse,
    ProviderAlreadyLinked,
    AccountExistsWithDifferentCredential,
    NoCurrentUser,
    NetworkUnavailable,
    Other,
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ProviderErrorCode::EmailAlreadyInUse => "email_already_in_use",
            ProviderErrorCode::CredentialAlreadyInUse => "credential_already_in_use",
            ProviderErrorCode::ProviderAlreadyLinked => "provider_already_linked",
            ProviderErrorCode::AccountExistsWithDifferentCredential => {
                "account_exists_with_different_credential"
            }
            ProviderErrorCode::NoCurrentUser => "no_current_user",
            ProviderErrorCode::NetworkUnavailable => "network_unavailable",
            ProviderErrorCode::Other => "other",
        };
        f.write_str(code)
    }
}

/// Error returned by a provider gateway call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} ({code})")]
pub struct ProviderError {
    pub code: ProviderErrorCode,
    pub message: String,
    /// Fresh credential some providers attach to a conflict.
    pub updated_credential: Option<Credential>,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            updated_credential: None,
        }
    }

    pub fn with_updated_credential(mut self, credential: Credential) -> Self {
        self.updated_credential = Some(credential);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::NetworkUnavailable, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Other, message)
    }

    /// The conflict this error reports, if it is one of the link conflicts.
    pub fn conflict_code(&self) -> Option<ConflictCode> {
        match self.code {
            ProviderErrorCode::EmailAlreadyInUse => Some(ConflictCode::EmailAlreadyInUse),
            ProviderErrorCode::CredentialAlreadyInUse => Some(ConflictCode::CredentialAlreadyInUse),
            ProviderErrorCode::ProviderAlreadyLinked => Some(ConflictCode::ProviderAlreadyLinked),
            _ => None,
        }
    }

    /// Returns true for failures caused by connectivity. Used for logging only.
    pub fn is_transient(&self) -> bool {
        self.code == ProviderErrorCode::NetworkUnavailable
    }
}

/// Provider result alias.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// User-facing classification of a failed or redirected authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ErrorKind {
    EmailAlreadyInUse,
    CredentialAlreadyInUse,
    ProviderAlreadyLinked,
    AccountExistsWithDifferentCredential,
    Unknown(String),
}

impl ErrorKind {
    pub fn message(&self) -> String {
        match self {
            ErrorKind::EmailAlreadyInUse => "This email is already associated with another account. You've been signed in to that existing account.".to_string(),
            ErrorKind::CredentialAlreadyInUse => {
                "This account is already linked with your profile. You've been signed in.".to_string()
            }
            ErrorKind::ProviderAlreadyLinked => {
                "This sign-in method is already linked to your account.".to_string()
            }
            ErrorKind::AccountExistsWithDifferentCredential => {
                "An account already exists with this email. Please sign in with the correct provider.".to_string()
            }
            ErrorKind::Unknown(message) => format!("Authentication error: {message}"),
        }
    }

    /// Classify a failure that has no fallback.
    pub fn for_failure(error: &ProviderError) -> Self {
        match error.code {
            ProviderErrorCode::AccountExistsWithDifferentCredential => {
                ErrorKind::AccountExistsWithDifferentCredential
            }
            _ => ErrorKind::Unknown(error.message.clone()),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Provider failure translated for the user
    #[error("{0}")]
    Rejected(ErrorKind),

    /// Credential is missing material required for the provider call
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Only guest accounts can be deleted
    #[error("Only guest accounts can be deleted")]
    DeletionNotPermitted,

    /// Provider failure surfaced as-is
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Invalid state transition in the command FSM
    #[error("Invalid command state transition: {0}")]
    InvalidStateTransition(String),
}

impl AuthError {
    /// Returns true for connectivity failures.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Provider(e) => e.is_transient(),
            _ => false,
        }
    }

    /// The user-facing classification, when the failure came from authentication.
    pub fn kind(&self) -> Option<&ErrorKind> {
        match self {
            AuthError::Rejected(kind) => Some(kind),
            _ => None,
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
