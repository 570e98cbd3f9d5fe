use std::sync::Arc;

use tokensign_interfaces::{CryptoModule, Purpose, SignError, SignResult, SigningSession};
use tokensign_logger::debug;

use crate::{module::LoadedModule, registry::CertificateRegistry, usage::is_usable};

/// A loaded PKCS#11 module seen through the registry of its certificates
pub struct Pkcs11Module {
    module: Arc<LoadedModule>,
    registry: Arc<CertificateRegistry>,
}

impl Pkcs11Module {
    #[must_use]
    pub const fn new(module: Arc<LoadedModule>, registry: Arc<CertificateRegistry>) -> Self {
        Self { module, registry }
    }
}

impl CryptoModule for Pkcs11Module {
    fn name(&self) -> String {
        self.module.path().to_owned()
    }

    fn certificates(&self, purpose: Purpose) -> SignResult<Vec<Vec<u8>>> {
        let certificates: Vec<Vec<u8>> = self
            .registry
            .certificates_of(self.module.path())?
            .into_iter()
            .filter(|entry| is_usable(&entry.der, purpose))
            .map(|entry| entry.der)
            .collect();
        debug!(
            "{}: {} certificates usable for {purpose}",
            self.module.path(),
            certificates.len()
        );
        Ok(certificates)
    }

    fn contains(&self, certificate: &[u8]) -> bool {
        matches!(
            self.registry.get(certificate),
            Ok(Some(entry)) if entry.module == self.module.path()
        )
    }

    fn open_session(&self, certificate: &[u8]) -> SignResult<Box<dyn SigningSession>> {
        let entry = self
            .registry
            .get(certificate)?
            .filter(|entry| entry.module == self.module.path())
            .ok_or_else(|| {
                SignError::InvalidArgument("certificate not found on any token".to_owned())
            })?;
        Ok(Box::new(self.module.open_session(&entry)?))
    }
}
