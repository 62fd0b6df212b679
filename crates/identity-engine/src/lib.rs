//! Identity session reconciliation engine.
//!
//! This crate provides:
//! - Link-or-sign-in authentication with provider conflict fallback
//! - A single owner of the current identity that publishes every change
//! - One-shot restoration of a previous federated session at startup
//! - Startup revocation checks, sign-out and guest account deletion
//! - An explicit FSM tracking the identity command in flight
//! - A deterministic in-memory provider backend

mod account;
mod authenticate;
mod change_feed;
mod command_fsm;
mod error;
mod fallback;
mod gateway;
mod memory;
mod restore;
mod revocation;
mod runtime;
mod state_machine;
mod types;

pub use account::AccountCommands;
pub use authenticate::AuthenticateUseCase;
pub use change_feed::ChangeFeed;
pub use command_fsm::command_machine;
pub use command_fsm::{
    CommandGuard, CommandMachine, CommandMachineInput, CommandMachineState, CommandPhase,
    CommandTracker,
};
pub use error::{AuthError, AuthResult, ErrorKind, ProviderError, ProviderErrorCode, ProviderResult};
pub use fallback::{CredentialFallbackPolicy, FallbackAction, FallbackDecision, FallbackOutcome};
pub use gateway::ProviderGateway;
pub use memory::{GatewayCall, GatewayOperation, InMemoryGateway, ProviderProfile};
pub use restore::{RestoreAttemptFlag, SessionRestorer};
pub use revocation::RevocationWatcher;
pub use runtime::{EngineSettings, IdentityRuntime, StartupReport};
pub use state_machine::{ListenerHandle, SessionStateMachine, StateListener};
pub use types::{
    AnonymousSignIn, AuthOutcome, AuthState, ConflictCode, Credential, CredentialState,
    IdentityChange, LinkedProvider, ProviderId, RestoreOutcome, RevocationCheck, SessionSnapshot,
    SignOutOutcome, User,
};
