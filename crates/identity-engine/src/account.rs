//! Anonymous sign-in, sign-out and guest account deletion.

use crate::command_fsm::{CommandMachineInput, CommandTracker};
use crate::error::{AuthError, AuthResult};
use crate::gateway::ProviderGateway;
use crate::restore::RestoreAttemptFlag;
use crate::state_machine::SessionStateMachine;
use crate::types::{AnonymousSignIn, ProviderId, SignOutOutcome};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct AccountCommands {
    gateway: Arc<dyn ProviderGateway>,
    state: Arc<SessionStateMachine>,
    commands: Arc<CommandTracker>,
    flag: RestoreAttemptFlag,
    external_sign_out_providers: Vec<ProviderId>,
}

impl AccountCommands {
    pub fn new(
        gateway: Arc<dyn ProviderGateway>,
        state: Arc<SessionStateMachine>,
        commands: Arc<CommandTracker>,
        flag: RestoreAttemptFlag,
        external_sign_out_providers: Vec<ProviderId>,
    ) -> Self {
        Self {
            gateway,
            state,
            commands,
            flag,
            external_sign_out_providers,
        }
    }

    /// Start a guest session unless one is already active.
    pub async fn sign_in_anonymously(&self) -> AuthResult<AnonymousSignIn> {
        let guard = self.commands.acquire().await;
        if let Some(user) = self.state.current_user().filter(|u| u.is_anonymous) {
            debug!(uid = %user.uid, "Already signed in anonymously");
            return Ok(AnonymousSignIn::AlreadyAnonymous(user));
        }

        guard.advance(CommandMachineInput::SignInAttempt)?;
        let result = self.gateway.sign_in_anonymously().await;
        // A guest session supersedes any pending restore, even when it failed.
        self.flag.mark_attempted();

        match result {
            Ok(user) => {
                guard.advance(CommandMachineInput::SignInSucceeded)?;
                info!(uid = %user.uid, "Signed in anonymously");
                self.state.publish_current(self.gateway.as_ref());
                Ok(AnonymousSignIn::Created(user))
            }
            Err(err) => {
                guard.advance(CommandMachineInput::SignInFailed)?;
                warn!(code = %err.code, transient = err.is_transient(), "Anonymous sign-in failed");
                Err(err.into())
            }
        }
    }

    /// Sign out a federated identity. Guest identities are left in place so
    /// their progress is not orphaned.
    pub async fn sign_out(&self) -> AuthResult<SignOutOutcome> {
        let guard = self.commands.acquire().await;
        let Some(user) = self.state.current_user() else {
            return Ok(SignOutOutcome::NoIdentity);
        };
        if user.is_anonymous {
            debug!(uid = %user.uid, "Skipping sign-out of anonymous identity");
            return Ok(SignOutOutcome::SkippedAnonymous);
        }

        guard.advance(CommandMachineInput::SignOutAttempt)?;

        let external = user
            .providers
            .iter()
            .map(|p| &p.provider)
            .filter(|p| self.external_sign_out_providers.contains(p));
        for provider in external {
            if let Err(err) = self.gateway.provider_sign_out(provider).await {
                warn!(provider = %provider, code = %err.code, "Provider sign-out failed");
            }
        }

        if let Err(err) = self.gateway.sign_out().await {
            guard.advance(CommandMachineInput::SignOutFailed)?;
            warn!(uid = %user.uid, code = %err.code, "Sign-out failed");
            return Err(err.into());
        }

        guard.advance(CommandMachineInput::SignOutSucceeded)?;
        self.state.publish_current(self.gateway.as_ref());
        self.flag.reset();
        info!(uid = %user.uid, "Signed out");
        Ok(SignOutOutcome::SignedOut)
    }

    /// Delete the current guest account.
    ///
    /// The identity change arrives through the provider's change feed.
    pub async fn delete_account(&self) -> AuthResult<()> {
        let guard = self.commands.acquire().await;
        let uid = match self.state.current_user() {
            Some(user) if user.is_anonymous => user.uid,
            _ => return Err(AuthError::DeletionNotPermitted),
        };

        guard.advance(CommandMachineInput::DeleteAttempt)?;
        match self.gateway.delete_current_user().await {
            Ok(()) => {
                guard.advance(CommandMachineInput::DeleteSucceeded)?;
                info!(uid = %uid, "Deleted anonymous account");
                Ok(())
            }
            Err(err) => {
                guard.advance(CommandMachineInput::DeleteFailed)?;
                warn!(uid = %uid, code = %err.code, "Account deletion failed");
                Err(err.into())
            }
        }
    }
}
