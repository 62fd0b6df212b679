//! One-shot restoration of a previous federated session.

use crate::command_fsm::{CommandGuard, CommandMachineInput, CommandTracker};
use crate::error::{AuthError, ProviderError};
use crate::gateway::ProviderGateway;
use crate::state_machine::SessionStateMachine;
use crate::types::{ProviderId, RestoreOutcome};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared "restoration already attempted" marker for one process epoch.
///
/// Set by the restorer's claim or after an anonymous sign-in; cleared by an
/// explicit non-anonymous sign-out.
#[derive(Debug, Clone, Default)]
pub struct RestoreAttemptFlag(Arc<Mutex<bool>>);

impl RestoreAttemptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns true only for the caller that flipped it.
    pub fn try_claim(&self) -> bool {
        let mut attempted = self.0.lock();
        if *attempted {
            return false;
        }
        *attempted = true;
        true
    }

    pub fn mark_attempted(&self) {
        *self.0.lock() = true;
    }

    pub fn reset(&self) {
        *self.0.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.0.lock()
    }
}

pub struct SessionRestorer {
    gateway: Arc<dyn ProviderGateway>,
    state: Arc<SessionStateMachine>,
    commands: Arc<CommandTracker>,
    flag: RestoreAttemptFlag,
    provider: ProviderId,
}

impl SessionRestorer {
    pub fn new(
        gateway: Arc<dyn ProviderGateway>,
        state: Arc<SessionStateMachine>,
        commands: Arc<CommandTracker>,
        flag: RestoreAttemptFlag,
        provider: ProviderId,
    ) -> Self {
        Self {
            gateway,
            state,
            commands,
            flag,
            provider,
        }
    }

    /// Resume the last session with the configured provider, at most once
    /// per epoch. Never replaces an existing identity and never fails.
    pub async fn restore_if_needed(&self) -> RestoreOutcome {
        if !self.flag.try_claim() {
            debug!("Session restore already attempted");
            return RestoreOutcome::AlreadyAttempted;
        }

        let guard = self.commands.acquire().await;
        if let Some(user) = self.gateway.current_user() {
            debug!(uid = %user.uid, anonymous = user.is_anonymous, "Identity present, skipping restore");
            return RestoreOutcome::UserPresent;
        }

        match self.restore(&guard).await {
            Ok(outcome) => outcome,
            Err(RestoreFailure::Provider(err)) => {
                warn!(
                    provider = %self.provider,
                    code = %err.code,
                    transient = err.is_transient(),
                    "Session restore failed"
                );
                RestoreOutcome::Failed {
                    message: err.message,
                }
            }
            Err(RestoreFailure::Command(message)) => {
                warn!(error = %message, "Session restore aborted");
                RestoreOutcome::Failed { message }
            }
        }
    }

    async fn restore(&self, guard: &CommandGuard<'_>) -> Result<RestoreOutcome, RestoreFailure> {
        guard.advance(CommandMachineInput::RestoreAttempt)?;

        let credential = match self.gateway.restore_previous_session(&self.provider).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                guard.advance(CommandMachineInput::RestoreSkipped)?;
                debug!(provider = %self.provider, "No previous session to restore");
                return Ok(RestoreOutcome::NoPreviousSession);
            }
            Err(err) => {
                guard.advance(CommandMachineInput::RestoreSkipped)?;
                return Err(RestoreFailure::Provider(err));
            }
        };

        guard.advance(CommandMachineInput::RestoreSignIn)?;
        match self.gateway.sign_in(&credential).await {
            Ok(user) => {
                guard.advance(CommandMachineInput::SignInSucceeded)?;
                info!(uid = %user.uid, provider = %self.provider, "Restored previous session");
                self.state.publish_current(self.gateway.as_ref());
                Ok(RestoreOutcome::Restored { user })
            }
            Err(err) => {
                guard.advance(CommandMachineInput::SignInFailed)?;
                Err(RestoreFailure::Provider(err))
            }
        }
    }
}

enum RestoreFailure {
    Provider(ProviderError),
    Command(String),
}

impl From<AuthError> for RestoreFailure {
    fn from(err: AuthError) -> Self {
        RestoreFailure::Command(err.to_string())
    }
}
