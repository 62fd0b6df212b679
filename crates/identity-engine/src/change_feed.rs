//! Forwarding of provider change notifications into the state machine.

use crate::gateway::ProviderGateway;
use crate::state_machine::SessionStateMachine;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Owns the task that feeds provider changes into [`SessionStateMachine::apply_change`].
///
/// Changes at or below the last applied revision are dropped, so a queued
/// notification never overwrites a newer command result.
pub struct ChangeFeed {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self {
            task: Mutex::new(None),
        }
    }

    /// Seed the state machine from the gateway and start forwarding changes.
    ///
    /// Returns false if a feed is already attached. Must be called from
    /// within a tokio runtime.
    pub fn attach(
        &self,
        gateway: &Arc<dyn ProviderGateway>,
        state: &Arc<SessionStateMachine>,
    ) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }

        // Subscribe before seeding so no change falls between the two.
        let mut changes = gateway.change_notifications();
        state.publish_current(gateway.as_ref());

        let state = state.clone();
        *task = Some(tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                let revision = change.revision;
                let uid = change.user.as_ref().map(|u| u.uid.clone());
                let applied = state.apply_change(change).is_some();
                debug!(revision, uid = uid.as_deref(), applied, "Provider identity change");
            }
            debug!("Provider change feed closed");
        }));
        true
    }

    /// Stop forwarding. Returns false if nothing was attached.
    pub fn detach(&self) -> bool {
        match self.task.lock().take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
