pub mod dedup;
pub mod normalizer;
pub mod registration;
pub mod webhook;

pub use dedup::SignatureCache;
pub use normalizer::EventNormalizer;
pub use registration::HeliusWebhookRegistrar;
pub use webhook::{create_router, start_server, IngressState};
