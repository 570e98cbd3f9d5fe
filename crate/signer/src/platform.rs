use std::sync::Arc;

use tokensign_interfaces::{
    CryptoModule, PinRequirement, PlatformCertificateStore, Purpose, SignError, SignResult,
    SigningSession,
};
use zeroize::Zeroizing;

/// The operating system certificate store, used when no PKCS#11 module handles the cards.
/// The store asks for the PIN itself.
pub struct PlatformStoreModule {
    store: Arc<dyn PlatformCertificateStore>,
}

impl PlatformStoreModule {
    #[must_use]
    pub fn new(store: Arc<dyn PlatformCertificateStore>) -> Self {
        Self { store }
    }
}

impl CryptoModule for PlatformStoreModule {
    fn name(&self) -> String {
        "platform certificate store".to_owned()
    }

    fn certificates(&self, purpose: Purpose) -> SignResult<Vec<Vec<u8>>> {
        self.store.certificates(purpose)
    }

    fn contains(&self, certificate: &[u8]) -> bool {
        [Purpose::Authentication, Purpose::Signing]
            .into_iter()
            .filter_map(|purpose| self.store.certificates(purpose).ok())
            .any(|certificates| certificates.iter().any(|c| c == certificate))
    }

    fn open_session(&self, certificate: &[u8]) -> SignResult<Box<dyn SigningSession>> {
        if !self.contains(certificate) {
            return Err(SignError::InvalidArgument(
                "certificate not found in the platform store".to_owned(),
            ));
        }
        Ok(Box::new(PlatformSession {
            store: self.store.clone(),
            certificate: certificate.to_vec(),
        }))
    }
}

struct PlatformSession {
    store: Arc<dyn PlatformCertificateStore>,
    certificate: Vec<u8>,
}

impl SigningSession for PlatformSession {
    fn pin_requirement(&mut self) -> SignResult<PinRequirement> {
        Ok(PinRequirement::None)
    }

    fn login(&mut self, _pin: Option<&Zeroizing<String>>) -> SignResult<()> {
        Ok(())
    }

    fn sign(&mut self, hash: &[u8]) -> SignResult<Vec<u8>> {
        self.store.sign(hash, &self.certificate)
    }
}
