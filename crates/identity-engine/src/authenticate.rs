//! Link-or-sign-in authentication with conflict fallback.
//!
//! With an identity present the credential is linked to it, so a guest
//! keeps its progress when upgrading. When the provider reports that the
//! credential or its email already belongs to another account, the link is
//! abandoned and the engine signs in to that account instead.

use crate::command_fsm::{CommandGuard, CommandMachineInput, CommandTracker};
use crate::error::{AuthError, AuthResult, ErrorKind, ProviderError};
use crate::fallback::{CredentialFallbackPolicy, FallbackAction, FallbackOutcome};
use crate::gateway::ProviderGateway;
use crate::state_machine::SessionStateMachine;
use crate::types::{AuthOutcome, ConflictCode, Credential, User};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct AuthenticateUseCase {
    gateway: Arc<dyn ProviderGateway>,
    state: Arc<SessionStateMachine>,
    commands: Arc<CommandTracker>,
}

impl AuthenticateUseCase {
    pub fn new(
        gateway: Arc<dyn ProviderGateway>,
        state: Arc<SessionStateMachine>,
        commands: Arc<CommandTracker>,
    ) -> Self {
        Self {
            gateway,
            state,
            commands,
        }
    }

    /// Authenticate with a freshly obtained credential.
    ///
    /// On success the new identity has been published before this returns.
    pub async fn authenticate(&self, credential: Credential) -> AuthResult<AuthOutcome> {
        credential.validate()?;

        let guard = self.commands.acquire().await;
        match self.state.current_user() {
            Some(current) => self.link(&guard, current, credential).await,
            None => self.sign_in(&guard, credential).await,
        }
    }

    async fn sign_in(
        &self,
        guard: &CommandGuard<'_>,
        credential: Credential,
    ) -> AuthResult<AuthOutcome> {
        guard.advance(CommandMachineInput::SignInAttempt)?;

        match self.gateway.sign_in(&credential).await {
            Ok(user) => {
                guard.advance(CommandMachineInput::SignInSucceeded)?;
                info!(uid = %user.uid, provider = %credential.provider(), "Signed in");
                self.state.publish_current(self.gateway.as_ref());
                Ok(AuthOutcome::SignedIn { user })
            }
            Err(err) => {
                guard.advance(CommandMachineInput::SignInFailed)?;
                warn!(
                    provider = %credential.provider(),
                    code = %err.code,
                    transient = err.is_transient(),
                    "Sign-in failed"
                );
                Err(AuthError::Rejected(ErrorKind::for_failure(&err)))
            }
        }
    }

    async fn link(
        &self,
        guard: &CommandGuard<'_>,
        current: User,
        credential: Credential,
    ) -> AuthResult<AuthOutcome> {
        guard.advance(CommandMachineInput::LinkAttempt)?;

        let err = match self.gateway.link(&credential).await {
            Ok(linked) => {
                guard.advance(CommandMachineInput::LinkSucceeded)?;
                let user = self.normalize_display_name(&current, &credential, linked).await;
                info!(
                    uid = %user.uid,
                    provider = %credential.provider(),
                    was_anonymous = current.is_anonymous,
                    "Linked credential"
                );
                self.state.publish_current(self.gateway.as_ref());
                return Ok(AuthOutcome::Linked { user });
            }
            Err(err) => err,
        };

        let decision = CredentialFallbackPolicy::decide(&err);
        match decision.action {
            FallbackAction::SignIn(code) => {
                guard.advance(CommandMachineInput::LinkConflict)?;
                match self.fall_back(guard, credential, err, code).await? {
                    FallbackOutcome::Applied { user, code } => {
                        Ok(AuthOutcome::FellBackToSignIn { user, reason: code })
                    }
                    FallbackOutcome::Rejected { kind, .. } => Err(AuthError::Rejected(kind)),
                }
            }
            FallbackAction::Surface => {
                guard.advance(CommandMachineInput::LinkFailed)?;
                warn!(
                    uid = %current.uid,
                    provider = %credential.provider(),
                    code = %err.code,
                    transient = err.is_transient(),
                    "Link failed"
                );
                Err(AuthError::Rejected(decision.kind))
            }
        }
    }

    /// Sign in to the account that owns the conflicting credential.
    async fn fall_back(
        &self,
        guard: &CommandGuard<'_>,
        credential: Credential,
        conflict: ProviderError,
        code: ConflictCode,
    ) -> AuthResult<FallbackOutcome> {
        let credential = CredentialFallbackPolicy::select_credential(credential, &conflict);
        debug!(
            provider = %credential.provider(),
            code = ?code,
            rotated = conflict.updated_credential.is_some() && credential.is_apple(),
            "Link conflict, falling back to sign-in"
        );

        match self.gateway.sign_in(&credential).await {
            Ok(user) => {
                guard.advance(CommandMachineInput::SignInSucceeded)?;
                info!(uid = %user.uid, code = ?code, "Signed in to existing account after conflict");
                self.state.publish_current(self.gateway.as_ref());
                Ok(FallbackOutcome::Applied { user, code })
            }
            Err(err) => {
                guard.advance(CommandMachineInput::SignInFailed)?;
                warn!(
                    code = %err.code,
                    transient = err.is_transient(),
                    "Fallback sign-in failed"
                );
                Ok(FallbackOutcome::Rejected {
                    kind: ErrorKind::for_failure(&err),
                    code: err.code,
                })
            }
        }
    }

    /// Fill in a display name after linking when the identity had none.
    ///
    /// Failures keep the linked user as-is.
    async fn normalize_display_name(
        &self,
        before: &User,
        credential: &Credential,
        linked: User,
    ) -> User {
        if before.has_display_name() {
            return linked;
        }

        let name = linked
            .providers
            .first()
            .and_then(|p| p.display_name.as_deref())
            .filter(|name| !name.trim().is_empty())
            .or_else(|| credential.full_name())
            .map(str::to_string);
        let Some(name) = name else {
            return linked;
        };

        match self.gateway.update_display_name(&name).await {
            Ok(updated) => updated,
            Err(err) => {
                warn!(uid = %linked.uid, code = %err.code, "Could not set display name");
                linked
            }
        }
    }
}
