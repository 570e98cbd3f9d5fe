//! Crypto module interface.
//! This module defines what a source of certificates and signatures must implement
//! to be driven by the signing orchestrator: a PKCS#11 module or a platform certificate store.

use zeroize::Zeroizing;

use crate::{Purpose, SignResult};

/// PIN properties of the token holding a certificate, read live from the token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPinInfo {
    /// Token label, as displayed to the user
    pub label: String,
    pub pin_min: usize,
    pub pin_max: usize,
    /// Remaining PIN attempts, 0..=3, derived from the token flags
    pub retries_left: u8,
}

/// How the PIN for a signing session has to be collected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinRequirement {
    /// The backend authenticates the user itself (e.g. the OS certificate store)
    None,
    /// The PIN is typed on the host and passed to `login`
    Keyboard(TokenPinInfo),
    /// The PIN is typed on the reader keypad; `login` blocks until the device answers
    Pinpad(TokenPinInfo),
}

/// An exclusively owned session to the token holding one certificate.
///
/// A session must be logged in before every signature:
/// a successful `sign` ends the authenticated state.
pub trait SigningSession: Send {
    /// Read the current PIN requirement, including the live retry counter
    fn pin_requirement(&mut self) -> SignResult<PinRequirement>;

    /// Authenticate the user. `pin` is `None` for pinpad tokens.
    fn login(&mut self, pin: Option<&Zeroizing<String>>) -> SignResult<()>;

    /// Sign a raw hash; the hash algorithm is implied by the hash length
    fn sign(&mut self, hash: &[u8]) -> SignResult<Vec<u8>>;
}

/// A source of certificates and of signing sessions over their private keys
pub trait CryptoModule: Send + Sync {
    /// A human readable name for logs
    fn name(&self) -> String;

    /// DER encoded certificates usable for the given purpose
    fn certificates(&self, purpose: Purpose) -> SignResult<Vec<Vec<u8>>>;

    /// Whether this module knows the given DER encoded certificate
    fn contains(&self, certificate: &[u8]) -> bool;

    /// Open a session over the private key of the given certificate
    fn open_session(&self, certificate: &[u8]) -> SignResult<Box<dyn SigningSession>>;
}
