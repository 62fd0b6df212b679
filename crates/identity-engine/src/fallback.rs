//! Conflict fallback policy for link attempts.
//!
//! | provider error                          | action  | user-facing kind                       |
//! |-----------------------------------------|---------|----------------------------------------|
//! | email already in use                    | sign in | EmailAlreadyInUse                      |
//! | credential already in use               | sign in | CredentialAlreadyInUse                 |
//! | provider already linked                 | sign in | ProviderAlreadyLinked                  |
//! | account exists with different credential| surface | AccountExistsWithDifferentCredential   |
//! | anything else                           | surface | Unknown(message)                       |

use crate::error::{ErrorKind, ProviderError, ProviderErrorCode};
use crate::types::{ConflictCode, Credential, User};
use serde::Serialize;

/// What to do after a failed link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackAction {
    /// Abandon the link and sign in with the (possibly updated) credential.
    SignIn(ConflictCode),
    /// Report the failure without further provider calls.
    Surface,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackDecision {
    pub action: FallbackAction,
    pub kind: ErrorKind,
}

/// Result of executing a fallback sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FallbackOutcome {
    Applied {
        user: User,
        code: ConflictCode,
    },
    Rejected {
        kind: ErrorKind,
        code: ProviderErrorCode,
    },
}

/// Stateless decision table.
pub struct CredentialFallbackPolicy;

impl CredentialFallbackPolicy {
    pub fn decide(error: &ProviderError) -> FallbackDecision {
        match error.conflict_code() {
            Some(code) => FallbackDecision {
                action: FallbackAction::SignIn(code),
                kind: code.into(),
            },
            None => FallbackDecision {
                action: FallbackAction::Surface,
                kind: ErrorKind::for_failure(error),
            },
        }
    }

    /// Credential to use for the fallback sign-in.
    ///
    /// Apple rotates credentials on conflict; the rotated one replaces the
    /// original when present. Other providers always reuse the original.
    pub fn select_credential(original: Credential, error: &ProviderError) -> Credential {
        match &error.updated_credential {
            Some(updated) if original.is_apple() => updated.clone(),
            _ => original,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicts_fall_back_to_sign_in() {
        let table = [
            (ProviderErrorCode::EmailAlreadyInUse, ConflictCode::EmailAlreadyInUse),
            (ProviderErrorCode::CredentialAlreadyInUse, ConflictCode::CredentialAlreadyInUse),
            (ProviderErrorCode::ProviderAlreadyLinked, ConflictCode::ProviderAlreadyLinked),
        ];
        for (code, conflict) in table {
            let decision = CredentialFallbackPolicy::decide(&ProviderError::new(code, "conflict"));
            assert_eq!(decision.action, FallbackAction::SignIn(conflict));
            assert_eq!(decision.kind, ErrorKind::from(conflict));
        }
    }

    #[test]
    fn test_account_exists_is_surfaced() {
        let error = ProviderError::new(
            ProviderErrorCode::AccountExistsWithDifferentCredential,
            "exists",
        );
        let decision = CredentialFallbackPolicy::decide(&error);
        assert_eq!(decision.action, FallbackAction::Surface);
        assert_eq!(decision.kind, ErrorKind::AccountExistsWithDifferentCredential);
    }

    #[test]
    fn test_other_errors_surface_as_unknown() {
        for error in [
            ProviderError::network("offline"),
            ProviderError::other("boom"),
            ProviderError::new(ProviderErrorCode::NoCurrentUser, "nobody"),
        ] {
            let decision = CredentialFallbackPolicy::decide(&error);
            assert_eq!(decision.action, FallbackAction::Surface);
            assert_eq!(decision.kind, ErrorKind::Unknown(error.message.clone()));
        }
    }

    #[test]
    fn test_apple_uses_updated_credential() {
        let original = Credential::apple("first", "nonce-1");
        let updated = Credential::apple("rotated", "nonce-2");
        let error = ProviderError::new(ProviderErrorCode::CredentialAlreadyInUse, "in use")
            .with_updated_credential(updated.clone());

        let selected = CredentialFallbackPolicy::select_credential(original, &error);
        assert_eq!(selected, updated);
    }

    #[test]
    fn test_apple_without_update_keeps_original() {
        let original = Credential::apple("first", "nonce-1");
        let error = ProviderError::new(ProviderErrorCode::EmailAlreadyInUse, "in use");

        let selected = CredentialFallbackPolicy::select_credential(original.clone(), &error);
        assert_eq!(selected, original);
    }

    #[test]
    fn test_google_ignores_updated_credential() {
        let original = Credential::google("first", "access");
        let error = ProviderError::new(ProviderErrorCode::CredentialAlreadyInUse, "in use")
            .with_updated_credential(Credential::google("other", "access"));

        let selected = CredentialFallbackPolicy::select_credential(original.clone(), &error);
        assert_eq!(selected, original);
    }
}
