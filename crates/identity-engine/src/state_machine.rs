//! Canonical owner of the current identity.
//!
//! Every identity change, whether it comes from the provider's change feed
//! or from a command result, goes through [`SessionStateMachine::apply`] or
//! its revision-checked form [`SessionStateMachine::apply_change`].
//! Readers always see a complete [`SessionSnapshot`]; listeners are notified
//! once per applied change, in apply order.

use crate::gateway::ProviderGateway;
use crate::types::{AuthState, IdentityChange, SessionSnapshot, User};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Callback invoked with every published snapshot.
///
/// Listeners run while the write gate is held and must not apply changes.
pub type StateListener = Arc<dyn Fn(&SessionSnapshot) + Send + Sync>;

/// Identifies a subscription for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

pub struct SessionStateMachine {
    snapshot: RwLock<Arc<SessionSnapshot>>,
    /// Last applied backend revision. Held by writers across snapshot
    /// replacement and notification.
    applied_revision: Mutex<u64>,
    listeners: Mutex<Vec<(ListenerHandle, StateListener)>>,
    next_handle: AtomicU64,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(SessionSnapshot::default())),
            applied_revision: Mutex::new(0),
            listeners: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Replace the identity, derive the state and notify every listener.
    pub fn apply(&self, user: Option<User>) -> AuthState {
        let _gate = self.applied_revision.lock();
        self.publish(user)
    }

    /// Apply a backend identity unless a change at the same or a later
    /// revision was already applied. Returns `None` for a dropped change.
    pub fn apply_change(&self, change: IdentityChange) -> Option<AuthState> {
        let mut applied = self.applied_revision.lock();
        if change.revision <= *applied {
            trace!(
                revision = change.revision,
                applied = *applied,
                "Dropping stale identity change"
            );
            return None;
        }
        *applied = change.revision;
        Some(self.publish(change.user))
    }

    /// Apply the backend's current identity.
    ///
    /// Commands call this after their provider call succeeds, so the result
    /// is readable as soon as the command returns.
    pub fn publish_current(&self, gateway: &dyn ProviderGateway) -> Option<AuthState> {
        self.apply_change(gateway.current_identity())
    }

    /// Last backend revision applied through [`apply_change`](Self::apply_change).
    pub fn revision(&self) -> u64 {
        *self.applied_revision.lock()
    }

    /// Callers hold `applied_revision`.
    fn publish(&self, user: Option<User>) -> AuthState {
        let next = Arc::new(SessionSnapshot::new(user));
        let previous = std::mem::replace(&mut *self.snapshot.write(), next.clone());

        if previous.state != next.state {
            debug!(
                old_state = ?previous.state,
                new_state = ?next.state,
                uid = next.user.as_ref().map(|u| u.uid.as_str()),
                "Session state transition"
            );
        }

        let listeners: Vec<StateListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&next);
        }

        next.state
    }

    pub fn current_user(&self) -> Option<User> {
        self.snapshot.read().user.clone()
    }

    pub fn current_state(&self) -> AuthState {
        self.snapshot.read().state
    }

    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&SessionSnapshot) + Send + Sync + 'static,
    {
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((handle, Arc::new(listener)));
        handle
    }

    /// Returns false if the handle was not subscribed.
    pub fn unsubscribe(&self, handle: ListenerHandle) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(h, _)| *h != handle);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
