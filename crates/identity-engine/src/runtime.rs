//! Identity runtime facade.
//!
//! Wires the state machine, command tracker and use cases around one
//! provider gateway so the UI layer talks to a single authority for
//! startup, commands and observation.

use crate::account::AccountCommands;
use crate::authenticate::AuthenticateUseCase;
use crate::change_feed::ChangeFeed;
use crate::command_fsm::{CommandPhase, CommandTracker};
use crate::error::AuthResult;
use crate::gateway::ProviderGateway;
use crate::restore::{RestoreAttemptFlag, SessionRestorer};
use crate::revocation::RevocationWatcher;
use crate::state_machine::{ListenerHandle, SessionStateMachine};
use crate::types::{
    AnonymousSignIn, AuthOutcome, AuthState, Credential, ProviderId, RestoreOutcome,
    RevocationCheck, SessionSnapshot, SignOutOutcome, User,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Provider policy the engine runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Provider whose previous session is restored at startup.
    pub restore_provider: ProviderId,
    /// Providers whose credentials can be revoked outside the app.
    pub revocable_providers: Vec<ProviderId>,
    /// Providers with their own sign-out before the backend sign-out.
    pub external_sign_out_providers: Vec<ProviderId>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            restore_provider: ProviderId::google(),
            revocable_providers: vec![ProviderId::apple()],
            external_sign_out_providers: vec![ProviderId::google()],
        }
    }
}

/// What the startup sequence did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartupReport {
    pub revocation: RevocationCheck,
    pub restore: RestoreOutcome,
    pub state: AuthState,
}

/// Shared identity runtime.
#[derive(Clone)]
pub struct IdentityRuntime {
    gateway: Arc<dyn ProviderGateway>,
    state: Arc<SessionStateMachine>,
    commands: Arc<CommandTracker>,
    feed: Arc<ChangeFeed>,
    authenticator: Arc<AuthenticateUseCase>,
    accounts: Arc<AccountCommands>,
    restorer: Arc<SessionRestorer>,
    revocation: Arc<RevocationWatcher>,
    restore_flag: RestoreAttemptFlag,
}

impl IdentityRuntime {
    pub fn new(
        gateway: Arc<dyn ProviderGateway>,
        restore_flag: RestoreAttemptFlag,
        settings: EngineSettings,
    ) -> Self {
        let state = Arc::new(SessionStateMachine::new());
        let commands = Arc::new(CommandTracker::new());

        let authenticator = Arc::new(AuthenticateUseCase::new(
            gateway.clone(),
            state.clone(),
            commands.clone(),
        ));
        let accounts = Arc::new(AccountCommands::new(
            gateway.clone(),
            state.clone(),
            commands.clone(),
            restore_flag.clone(),
            settings.external_sign_out_providers,
        ));
        let restorer = Arc::new(SessionRestorer::new(
            gateway.clone(),
            state.clone(),
            commands.clone(),
            restore_flag.clone(),
            settings.restore_provider,
        ));
        let revocation = Arc::new(RevocationWatcher::new(
            gateway.clone(),
            state.clone(),
            accounts.clone(),
            settings.revocable_providers,
        ));

        Self {
            gateway,
            state,
            commands,
            feed: Arc::new(ChangeFeed::new()),
            authenticator,
            accounts,
            restorer,
            revocation,
            restore_flag,
        }
    }

    /// Seed the state from the gateway and follow its change notifications.
    ///
    /// Returns false if already attached.
    pub fn attach_change_feed(&self) -> bool {
        self.feed.attach(&self.gateway, &self.state)
    }

    /// Attach the change feed, then check revocation and restore a previous
    /// session. Runs before user commands are served.
    pub async fn start(&self) -> StartupReport {
        self.attach_change_feed();
        let revocation = self.revocation.check().await;
        let restore = self.restorer.restore_if_needed().await;
        let state = self.state.current_state();
        info!(state = ?state, "Identity runtime started");
        StartupReport {
            revocation,
            restore,
            state,
        }
    }

    /// Run [`start`](Self::start) in the background.
    pub fn spawn_startup(&self) -> JoinHandle<StartupReport> {
        let runtime = self.clone();
        tokio::spawn(async move { runtime.start().await })
    }

    pub async fn sign_in_anonymously(&self) -> AuthResult<AnonymousSignIn> {
        self.accounts.sign_in_anonymously().await
    }

    pub async fn authenticate(&self, credential: Credential) -> AuthResult<AuthOutcome> {
        self.authenticator.authenticate(credential).await
    }

    pub async fn sign_out(&self) -> AuthResult<SignOutOutcome> {
        self.accounts.sign_out().await
    }

    pub async fn delete_account(&self) -> AuthResult<()> {
        self.accounts.delete_account().await
    }

    pub async fn restore_if_needed(&self) -> RestoreOutcome {
        self.restorer.restore_if_needed().await
    }

    pub async fn check_revocation(&self) -> RevocationCheck {
        self.revocation.check().await
    }

    pub fn state(&self) -> AuthState {
        self.state.current_state()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.current_user()
    }

    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.state.snapshot()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&SessionSnapshot) + Send + Sync + 'static,
    {
        self.state.subscribe(listener)
    }

    pub fn unsubscribe(&self, handle: ListenerHandle) -> bool {
        self.state.unsubscribe(handle)
    }

    pub fn command_phase(&self) -> CommandPhase {
        self.commands.phase()
    }

    pub fn restore_flag(&self) -> &RestoreAttemptFlag {
        &self.restore_flag
    }

    /// Detach the change feed. Returns true only for the call that detached it.
    pub fn shutdown(&self) -> bool {
        let detached = self.feed.detach();
        if detached {
            info!("Identity runtime shut down");
        }
        detached
    }
}
