//! Boundary to the external identity backend.

use crate::error::ProviderResult;
use crate::types::{Credential, CredentialState, IdentityChange, ProviderId, User};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Async operations of an identity provider backend.
///
/// The engine never retries a call; implementations report failures through
/// [`crate::ProviderError`] codes.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Sign in with a credential, replacing the current identity.
    async fn sign_in(&self, credential: &Credential) -> ProviderResult<User>;

    /// Create a fresh anonymous identity and make it current.
    async fn sign_in_anonymously(&self) -> ProviderResult<User>;

    /// Bind the credential to the current identity.
    async fn link(&self, credential: &Credential) -> ProviderResult<User>;

    /// Set the display name of the current identity.
    async fn update_display_name(&self, display_name: &str) -> ProviderResult<User>;

    async fn sign_out(&self) -> ProviderResult<()>;

    async fn delete_current_user(&self) -> ProviderResult<()>;

    /// The identity the backend currently considers signed in, with its
    /// revision, read atomically.
    fn current_identity(&self) -> IdentityChange;

    fn current_user(&self) -> Option<User> {
        self.current_identity().user
    }

    /// Stream of identity changes in revision order. Each receiver gets
    /// every change made after it was created.
    fn change_notifications(&self) -> mpsc::UnboundedReceiver<IdentityChange>;

    /// Credential of the last session with `provider`, if it can be resumed silently.
    async fn restore_previous_session(
        &self,
        provider: &ProviderId,
    ) -> ProviderResult<Option<Credential>>;

    /// Provider-side state of the credential for `subject`.
    async fn credential_validity(
        &self,
        provider: &ProviderId,
        subject: &str,
    ) -> ProviderResult<CredentialState>;

    /// Provider-specific sign-out that runs before the backend sign-out.
    async fn provider_sign_out(&self, provider: &ProviderId) -> ProviderResult<()>;
}
