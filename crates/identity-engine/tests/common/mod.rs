//! Shared helpers for identity engine integration tests.

#![allow(dead_code)]

use identity_engine::{
    AuthState, EngineSettings, GatewayCall, IdentityRuntime, InMemoryGateway, RestoreAttemptFlag,
    SessionSnapshot,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub const ADA_EMAIL: &str = "ada@example.com";

/// Runtime over a fresh in-memory gateway with default settings.
pub fn runtime() -> (Arc<InMemoryGateway>, IdentityRuntime) {
    let gateway = Arc::new(InMemoryGateway::new());
    let runtime = runtime_for(&gateway);
    (gateway, runtime)
}

pub fn runtime_for(gateway: &Arc<InMemoryGateway>) -> IdentityRuntime {
    IdentityRuntime::new(
        gateway.clone(),
        RestoreAttemptFlag::new(),
        EngineSettings::default(),
    )
}

/// Records every snapshot published by a runtime.
#[derive(Default)]
pub struct RecordingListener {
    snapshots: Mutex<Vec<SessionSnapshot>>,
}

impl RecordingListener {
    pub fn attach(runtime: &IdentityRuntime) -> Arc<Self> {
        let listener = Arc::new(Self::default());
        let sink = listener.clone();
        runtime.subscribe(move |snapshot| sink.snapshots.lock().push(snapshot.clone()));
        listener
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.snapshots.lock().clone()
    }

    pub fn states(&self) -> Vec<AuthState> {
        self.snapshots.lock().iter().map(|s| s.state).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }
}

/// Calls matching `filter`.
pub fn calls_where<F>(gateway: &InMemoryGateway, filter: F) -> Vec<GatewayCall>
where
    F: Fn(&GatewayCall) -> bool,
{
    gateway.calls().into_iter().filter(|c| filter(c)).collect()
}

/// Wait until change notifications have moved the runtime to `expected`.
pub async fn wait_for_state(runtime: &IdentityRuntime, expected: AuthState) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while runtime.state() != expected {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("runtime never reached {expected:?}, stuck at {:?}", runtime.state()));
}

/// Let the change feed drain pending notifications.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
