mod error;
mod host;
mod module;

pub use error::{ErrorKind, SignError, SignResult};
pub use host::{
    CardReader, CertificateInfo, CertificateSelector, PinEntry, PinError, PinPrompt,
    PinpadCancel, PlatformCertificateStore, TokenComposer,
};
pub use module::{CryptoModule, PinRequirement, SigningSession, TokenPinInfo};

use serde::{Deserialize, Serialize};

/// What a certificate is going to be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Authentication,
    Signing,
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Signing => write!(f, "signing"),
        }
    }
}
