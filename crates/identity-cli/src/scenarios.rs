//! Scripted identity scenarios over the in-memory backend.

use clap::ValueEnum;
use identity_engine::{
    AuthResult, CredentialState, EngineSettings, IdentityRuntime, InMemoryGateway,
    ProviderGateway, ProviderId, ProviderProfile, RestoreAttemptFlag,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

const DEMO_EMAIL: &str = "ada@example.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Guest links Google, then signs out
    GuestUpgrade,
    /// Guest links an Apple ID that already belongs to another account
    AppleConflict,
    /// A new process resumes the previous Google session
    Restore,
    /// Startup finds the Apple credential revoked
    RevokedApple,
}

#[derive(Debug, Serialize)]
pub struct Step {
    pub action: &'static str,
    pub result: Value,
}

/// Ordered record of what a scenario did.
#[derive(Debug, Default, Serialize)]
pub struct Transcript {
    pub steps: Vec<Step>,
    pub final_state: Value,
}

impl Transcript {
    fn record<T: Serialize>(
        &mut self,
        action: &'static str,
        result: &AuthResult<T>,
    ) -> serde_json::Result<()> {
        let result = match result {
            Ok(value) => serde_json::to_value(value)?,
            Err(err) => json!({
                "error": err.to_string(),
                "transient": err.is_transient(),
            }),
        };
        self.steps.push(Step { action, result });
        Ok(())
    }

    fn note(&mut self, action: &'static str, result: Value) {
        self.steps.push(Step { action, result });
    }

    fn finish(mut self, runtime: &IdentityRuntime) -> serde_json::Result<Self> {
        runtime.shutdown();
        self.final_state = serde_json::to_value(&*runtime.snapshot())?;
        Ok(self)
    }
}

pub async fn run(
    scenario: Scenario,
    settings: EngineSettings,
) -> Result<Transcript, Box<dyn std::error::Error>> {
    let gateway = Arc::new(InMemoryGateway::new());
    let transcript = match scenario {
        Scenario::GuestUpgrade => guest_upgrade(gateway, settings).await?,
        Scenario::AppleConflict => apple_conflict(gateway, settings).await?,
        Scenario::Restore => restore(gateway, settings).await?,
        Scenario::RevokedApple => revoked_apple(gateway, settings).await?,
    };
    Ok(transcript)
}

fn runtime(gateway: &Arc<InMemoryGateway>, settings: EngineSettings) -> IdentityRuntime {
    IdentityRuntime::new(gateway.clone(), RestoreAttemptFlag::new(), settings)
}

async fn guest_upgrade(
    gateway: Arc<InMemoryGateway>,
    settings: EngineSettings,
) -> Result<Transcript, Box<dyn std::error::Error>> {
    let runtime = runtime(&gateway, settings);
    let mut transcript = Transcript::default();

    transcript.note("start", serde_json::to_value(runtime.start().await)?);
    transcript.record("sign_in_anonymously", &runtime.sign_in_anonymously().await)?;

    let google = gateway.issue_credential(
        ProviderProfile::google("google-ada")
            .with_email(DEMO_EMAIL)
            .with_display_name("Ada Lovelace"),
    );
    transcript.record("authenticate_google", &runtime.authenticate(google).await)?;
    transcript.record("sign_out", &runtime.sign_out().await)?;

    Ok(transcript.finish(&runtime)?)
}

async fn apple_conflict(
    gateway: Arc<InMemoryGateway>,
    settings: EngineSettings,
) -> Result<Transcript, Box<dyn std::error::Error>> {
    let owner =
        gateway.register_account(ProviderProfile::apple("apple-ada").with_email(DEMO_EMAIL));
    let runtime = runtime(&gateway, settings);
    let mut transcript = Transcript::default();
    transcript.note("existing_account", json!({ "uid": owner.uid }));

    transcript.note("start", serde_json::to_value(runtime.start().await)?);
    transcript.record("sign_in_anonymously", &runtime.sign_in_anonymously().await)?;

    let apple = gateway.issue_credential(ProviderProfile::apple("apple-ada"));
    let outcome = runtime.authenticate(apple).await;
    if let Ok(notice) = outcome.as_ref().map(|o| o.notice()) {
        transcript.note("notice", json!(notice));
    }
    transcript.record("authenticate_apple", &outcome)?;

    Ok(transcript.finish(&runtime)?)
}

async fn restore(
    gateway: Arc<InMemoryGateway>,
    settings: EngineSettings,
) -> Result<Transcript, Box<dyn std::error::Error>> {
    let mut transcript = Transcript::default();

    // Previous process: sign in, then lose the backend session.
    let google =
        gateway.issue_credential(ProviderProfile::google("google-ada").with_email(DEMO_EMAIL));
    let previous = gateway.sign_in(&google).await?;
    gateway.sign_out().await?;
    transcript.note("previous_session", json!({ "uid": previous.uid }));

    let runtime = runtime(&gateway, settings);
    transcript.note("start", serde_json::to_value(runtime.start().await)?);
    transcript.note(
        "restore_again",
        serde_json::to_value(runtime.restore_if_needed().await)?,
    );

    Ok(transcript.finish(&runtime)?)
}

async fn revoked_apple(
    gateway: Arc<InMemoryGateway>,
    settings: EngineSettings,
) -> Result<Transcript, Box<dyn std::error::Error>> {
    let mut transcript = Transcript::default();

    let apple = gateway.issue_credential(ProviderProfile::apple("apple-ada"));
    let user = gateway.sign_in(&apple).await?;
    gateway.set_credential_state(&ProviderId::apple(), "apple-ada", CredentialState::Revoked);
    transcript.note("signed_in_before_start", json!({ "uid": user.uid }));

    let runtime = runtime(&gateway, settings);
    transcript.note("start", serde_json::to_value(runtime.start().await)?);

    Ok(transcript.finish(&runtime)?)
}
