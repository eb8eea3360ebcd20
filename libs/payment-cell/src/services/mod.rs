pub mod coordinator;
pub mod provider;
pub mod webhook;

pub use coordinator::PaymentCoordinatorService;
pub use provider::{
    provider_from_config, GatewayProvider, MockProvider, PaymentProvider, ProviderConfirmation,
    ProviderError, ProviderSession,
};
