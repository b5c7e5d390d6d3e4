//! Delivery backends and provider selection.
//!
//! Every backend implements [`Provider`]. The [`ProviderRegistry`] owns the
//! registered backends and picks one per notification according to its
//! [`SelectionStrategy`](herald_common::types::SelectionStrategy).

pub mod mock;
pub mod provider;
pub mod registry;
pub mod webhook;

pub use mock::MockProvider;
pub use provider::Provider;
pub use registry::ProviderRegistry;
pub use webhook::WebhookProvider;
