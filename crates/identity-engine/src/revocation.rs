//! Startup check for credentials revoked outside the app.

use crate::account::AccountCommands;
use crate::gateway::ProviderGateway;
use crate::state_machine::SessionStateMachine;
use crate::types::{ProviderId, RevocationCheck};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct RevocationWatcher {
    gateway: Arc<dyn ProviderGateway>,
    state: Arc<SessionStateMachine>,
    accounts: Arc<AccountCommands>,
    revocable_providers: Vec<ProviderId>,
}

impl RevocationWatcher {
    pub fn new(
        gateway: Arc<dyn ProviderGateway>,
        state: Arc<SessionStateMachine>,
        accounts: Arc<AccountCommands>,
        revocable_providers: Vec<ProviderId>,
    ) -> Self {
        Self {
            gateway,
            state,
            accounts,
            revocable_providers,
        }
    }

    /// Sign out if the current identity's revocable credential is no longer valid.
    pub async fn check(&self) -> RevocationCheck {
        let Some(user) = self.state.current_user() else {
            return RevocationCheck::NotApplicable;
        };
        let Some(linked) = user
            .providers
            .iter()
            .find(|p| self.revocable_providers.contains(&p.provider))
        else {
            return RevocationCheck::NotApplicable;
        };

        let state = match self
            .gateway
            .credential_validity(&linked.provider, &linked.subject)
            .await
        {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    provider = %linked.provider,
                    code = %err.code,
                    transient = err.is_transient(),
                    "Credential state check failed"
                );
                return RevocationCheck::Failed {
                    message: err.message,
                };
            }
        };

        if !state.requires_sign_out() {
            debug!(provider = %linked.provider, state = ?state, "Credential still valid");
            return RevocationCheck::Valid { state };
        }

        info!(
            uid = %user.uid,
            provider = %linked.provider,
            state = ?state,
            "Credential revoked, signing out"
        );
        if let Err(err) = self.accounts.sign_out().await {
            warn!(uid = %user.uid, error = %err, "Sign-out after revocation failed");
        }
        RevocationCheck::SignedOut { state }
    }
}
