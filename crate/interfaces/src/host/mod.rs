//! Collaborators provided by the host application.
//! The signing engine never draws dialogs, polls readers or talks to the browser itself:
//! the host plugs those capabilities in through these traits.

use std::{fmt, sync::Arc};

use zeroize::Zeroizing;

use crate::{Purpose, SignResult, TokenPinInfo};

/// Smart card reader layer
pub trait CardReader: Send + Sync {
    /// The ATRs of the cards currently inserted in any reader
    fn connected_atrs(&self) -> SignResult<Vec<Vec<u8>>>;
}

/// What the certificate selection dialog displays for a candidate certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub common_name: Option<String>,
    pub organization: Option<String>,
    pub organizational_unit: Option<String>,
    pub issuer_common_name: Option<String>,
    /// Expiry, in seconds since the UNIX epoch
    pub not_after: i64,
    pub der: Vec<u8>,
}

/// Certificate selection dialog
pub trait CertificateSelector: Send + Sync {
    /// Let the user pick one of the candidates.
    /// Returns the DER bytes of the chosen certificate, or `None` on cancel.
    fn select(&self, candidates: &[CertificateInfo], purpose: Purpose) -> Option<Vec<u8>>;
}

/// Why the PIN is asked again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinError {
    Incorrect,
    InvalidLength,
}

/// Content of a PIN dialog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinPrompt {
    pub purpose: Purpose,
    pub origin: String,
    /// Subject of the certificate the PIN unlocks
    pub subject: String,
    pub token: TokenPinInfo,
    pub pinpad: bool,
    pub last_error: Option<PinError>,
}

/// Handle given to a pinpad dialog to abort the wait for the device
#[derive(Clone)]
pub struct PinpadCancel(Arc<dyn Fn() + Send + Sync>);

impl PinpadCancel {
    pub fn new<F: Fn() + Send + Sync + 'static>(f: F) -> Self {
        Self(Arc::new(f))
    }

    pub fn cancel(&self) {
        (self.0)();
    }
}

impl fmt::Debug for PinpadCancel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PinpadCancel")
    }
}

/// PIN dialog
pub trait PinEntry: Send + Sync {
    /// Ask the user for a PIN. Returns `None` on cancel.
    fn request_pin(&self, prompt: &PinPrompt) -> Option<Zeroizing<String>>;

    /// Show the "enter the PIN on the reader" progress.
    /// Must not block; the dialog calls `cancel` if the user gives up.
    fn pinpad_started(&self, prompt: &PinPrompt, cancel: PinpadCancel);

    /// The device answered (or the wait was cancelled): close the progress dialog
    fn pinpad_finished(&self) {}
}

/// The operating system certificate store, used when no PKCS#11 module handles the inserted cards
pub trait PlatformCertificateStore: Send + Sync {
    fn certificates(&self, purpose: Purpose) -> SignResult<Vec<Vec<u8>>>;

    fn sign(&self, hash: &[u8], certificate: &[u8]) -> SignResult<Vec<u8>>;
}

/// Builds the `header.payload` part of an authentication token
pub trait TokenComposer: Send + Sync {
    fn data_to_be_signed(&self, certificate: &[u8], origin: &str, nonce: &str)
    -> SignResult<String>;
}
