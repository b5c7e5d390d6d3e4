use async_trait::async_trait;

use herald_common::error::ProviderError;
use herald_common::types::{NotificationMessage, ProviderResponse};

/// A push delivery backend (FCM/APNs gateway, webhook, simulator).
///
/// `send` distinguishes two failure shapes:
/// - `Err(ProviderError)`: the call itself failed (transport); callers may retry.
/// - `Ok(ProviderResponse { success: false, .. })`: the backend answered and
///   declined the notification; callers must not retry.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable backend name, reported in processing results.
    fn name(&self) -> &str;

    async fn send(&self, notification: &NotificationMessage)
    -> Result<ProviderResponse, ProviderError>;

    async fn health_check(&self) -> Result<(), ProviderError>;
}
