mod async_signer;
mod config;
mod error;
mod orchestrator;
mod origin;
mod pin;
mod platform;

pub use async_signer::AsyncSigner;
pub use config::{SignerConfig, TOKENSIGN_CONF_ENV};
pub use error::{SResult, SignerError};
pub use orchestrator::{Collaborators, SigningOrchestrator};
pub use origin::WebOrigin;
pub use platform::PlatformStoreModule;
