//! Identity command state machine using rust-fsm.
//!
//! Tracks the phase of the identity command in flight and serializes
//! commands so only one provider round-trip sequence runs at a time.
//!
//! ## State Diagram
//!
//! ```text
//! Idle ──SignInAttempt──► SigningIn ──SignInSucceeded / SignInFailed──► Idle
//!
//! Idle ──LinkAttempt──► Linking ──LinkSucceeded / LinkFailed──► Idle
//!                          │
//!                          └──LinkConflict──► FallingBack ──SignInSucceeded / SignInFailed──► Idle
//!
//! Idle ──RestoreAttempt──► Restoring ──RestoreSignIn──► SigningIn
//!                              │
//!                              └──RestoreSkipped──► Idle
//!
//! Idle ──SignOutAttempt──► SigningOut ──SignOutSucceeded / SignOutFailed──► Idle
//! Idle ──DeleteAttempt───► Deleting   ──DeleteSucceeded / DeleteFailed────► Idle
//! ```

use crate::error::{AuthError, AuthResult};
use parking_lot::Mutex;
use rust_fsm::*;
use serde::Serialize;
use tracing::debug;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub command_machine(Idle)

    Idle => {
        SignInAttempt => SigningIn,
        LinkAttempt => Linking,
        RestoreAttempt => Restoring,
        SignOutAttempt => SigningOut,
        DeleteAttempt => Deleting
    },
    SigningIn => {
        SignInSucceeded => Idle,
        SignInFailed => Idle
    },
    Linking => {
        LinkSucceeded => Idle,
        // Conflict: fall back to signing in with the conflicting credential
        LinkConflict => FallingBack,
        LinkFailed => Idle
    },
    FallingBack => {
        SignInSucceeded => Idle,
        SignInFailed => Idle
    },
    Restoring => {
        // A previous session was found
        RestoreSignIn => SigningIn,
        RestoreSkipped => Idle
    },
    SigningOut => {
        SignOutSucceeded => Idle,
        SignOutFailed => Idle
    },
    Deleting => {
        DeleteSucceeded => Idle,
        DeleteFailed => Idle
    }
}

pub use command_machine::Input as CommandMachineInput;
pub use command_machine::State as CommandMachineState;
pub use command_machine::StateMachine as CommandMachine;

/// Externally visible phase of the command in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandPhase {
    Idle,
    SigningIn,
    Linking,
    FallingBack,
    Restoring,
    SigningOut,
    Deleting,
}

impl CommandPhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, CommandPhase::Idle)
    }
}

impl From<&CommandMachineState> for CommandPhase {
    fn from(state: &CommandMachineState) -> Self {
        match state {
            CommandMachineState::Idle => CommandPhase::Idle,
            CommandMachineState::SigningIn => CommandPhase::SigningIn,
            CommandMachineState::Linking => CommandPhase::Linking,
            CommandMachineState::FallingBack => CommandPhase::FallingBack,
            CommandMachineState::Restoring => CommandPhase::Restoring,
            CommandMachineState::SigningOut => CommandPhase::SigningOut,
            CommandMachineState::Deleting => CommandPhase::Deleting,
        }
    }
}

/// Serializes identity commands and records their phase.
pub struct CommandTracker {
    gate: tokio::sync::Mutex<()>,
    machine: Mutex<CommandMachine>,
}

impl CommandTracker {
    pub fn new() -> Self {
        Self {
            gate: tokio::sync::Mutex::new(()),
            machine: Mutex::new(CommandMachine::new()),
        }
    }

    pub fn phase(&self) -> CommandPhase {
        CommandPhase::from(self.machine.lock().state())
    }

    /// Wait for exclusive use of the provider, without entering a phase.
    pub async fn acquire(&self) -> CommandGuard<'_> {
        let permit = self.gate.lock().await;
        CommandGuard {
            machine: &self.machine,
            _permit: permit,
        }
    }

    /// Wait for exclusive use of the provider and enter a phase.
    pub async fn begin(&self, input: CommandMachineInput) -> AuthResult<CommandGuard<'_>> {
        let guard = self.acquire().await;
        guard.advance(input)?;
        Ok(guard)
    }
}

impl Default for CommandTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive hold on the command gate. Dropping it returns the FSM to `Idle`.
pub struct CommandGuard<'a> {
    machine: &'a Mutex<CommandMachine>,
    _permit: tokio::sync::MutexGuard<'a, ()>,
}

impl CommandGuard<'_> {
    pub fn phase(&self) -> CommandPhase {
        CommandPhase::from(self.machine.lock().state())
    }

    /// Apply an input to the command FSM.
    pub fn advance(&self, input: CommandMachineInput) -> AuthResult<CommandPhase> {
        let mut fsm = self.machine.lock();
        let old_phase = CommandPhase::from(fsm.state());

        fsm.consume(&input).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in phase {:?}",
                input, old_phase
            ))
        })?;

        let new_phase = CommandPhase::from(fsm.state());
        debug!(
            old_phase = ?old_phase,
            new_phase = ?new_phase,
            "Command phase transition"
        );
        Ok(new_phase)
    }
}

impl Drop for CommandGuard<'_> {
    fn drop(&mut self) {
        let mut fsm = self.machine.lock();
        if *fsm.state() != CommandMachineState::Idle {
            debug!(phase = ?CommandPhase::from(fsm.state()), "Command abandoned, resetting to idle");
            *fsm = CommandMachine::new();
        }
    }
}
