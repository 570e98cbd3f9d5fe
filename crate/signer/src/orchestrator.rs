use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use tokensign_interfaces::{
    CardReader, CertificateInfo, CertificateSelector, CryptoModule, ErrorKind, PinEntry,
    PlatformCertificateStore, Purpose, SignError, SignResult, TokenComposer,
};
use tokensign_logger::{debug, error, info, warn};
use tokensign_token::{ModuleManager, certificate_info, digest_info};

use crate::{
    SignerConfig,
    origin::WebOrigin,
    pin::{PromptContext, login_and_sign},
    platform::PlatformStoreModule,
};

/// The host application services the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    pub reader: Arc<dyn CardReader>,
    pub selector: Arc<dyn CertificateSelector>,
    pub pin_entry: Arc<dyn PinEntry>,
    pub composer: Arc<dyn TokenComposer>,
    /// Consulted when no PKCS#11 module handles the connected cards
    pub platform_store: Option<Arc<dyn PlatformCertificateStore>>,
}

/// Runs authentication and signing requests against the connected tokens.
///
/// Every call blocks on the card, the module or the user: run it off the I/O threads
/// (see [`crate::AsyncSigner`]).
pub struct SigningOrchestrator {
    manager: Arc<ModuleManager>,
    collaborators: Collaborators,
}

impl SigningOrchestrator {
    #[must_use]
    pub const fn new(manager: Arc<ModuleManager>, collaborators: Collaborators) -> Self {
        Self {
            manager,
            collaborators,
        }
    }

    /// An orchestrator loading native modules from the configured catalog.
    /// The platform store is dropped when the configuration disables the fallback.
    #[must_use]
    pub fn from_config(config: &SignerConfig, collaborators: Collaborators) -> Self {
        let manager = ModuleManager::native(config.catalog(), config.max_certificates_per_slot);
        let collaborators = Collaborators {
            platform_store: collaborators
                .platform_store
                .filter(|_| config.platform_store_fallback),
            ..collaborators
        };
        Self::new(Arc::new(manager), collaborators)
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<ModuleManager> {
        &self.manager
    }

    /// Build an authentication token for `nonce`:
    /// `header.payload.signature`, the signature being over SHA-256 of `header.payload`
    pub fn authenticate(&self, origin: &WebOrigin, nonce: &str) -> Result<String, ErrorKind> {
        report("authenticate", self.try_authenticate(origin, nonce))
    }

    /// Let the user pick a certificate for `purpose`
    pub fn select_certificate(
        &self,
        origin: &WebOrigin,
        purpose: Purpose,
    ) -> Result<Vec<u8>, ErrorKind> {
        report(
            "select certificate",
            self.module()
                .and_then(|module| self.select(module.as_ref(), origin, purpose)),
        )
    }

    /// Sign a raw hash with the private key of `certificate`
    pub fn sign(
        &self,
        origin: &WebOrigin,
        certificate: &[u8],
        hash: &[u8],
    ) -> Result<Vec<u8>, ErrorKind> {
        report("sign", self.try_sign(origin, certificate, hash))
    }

    fn try_authenticate(&self, origin: &WebOrigin, nonce: &str) -> SignResult<String> {
        if nonce.is_empty() {
            return Err(SignError::InvalidArgument("empty nonce".to_owned()));
        }
        let module = self.module()?;
        let certificate = self.select(module.as_ref(), origin, Purpose::Authentication)?;
        let data = self.collaborators.composer.data_to_be_signed(
            &certificate,
            origin.friendly(),
            nonce,
        )?;
        let hash = Sha256::digest(data.as_bytes());
        let signature = self.login_and_sign(
            module.as_ref(),
            origin,
            Purpose::Authentication,
            &certificate,
            &hash,
        )?;
        Ok(format!("{data}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }

    fn try_sign(&self, origin: &WebOrigin, certificate: &[u8], hash: &[u8]) -> SignResult<Vec<u8>> {
        // rejected before the cards or the modules are touched
        digest_info::prefix(hash.len())?;
        let module = self.module()?;
        if !module.contains(certificate) {
            return Err(SignError::InvalidArgument(
                "certificate not found on any token".to_owned(),
            ));
        }
        self.login_and_sign(module.as_ref(), origin, Purpose::Signing, certificate, hash)
    }

    /// The module for the connected cards, or the platform store
    fn module(&self) -> SignResult<Box<dyn CryptoModule>> {
        let atrs = self.collaborators.reader.connected_atrs()?;
        debug!("{} cards connected", atrs.len());
        if let Some(module) = self.manager.module_for(&atrs)? {
            return Ok(Box::new(module));
        }
        match &self.collaborators.platform_store {
            Some(store) => {
                info!("no PKCS#11 module for the connected cards, using the platform store");
                Ok(Box::new(PlatformStoreModule::new(store.clone())))
            }
            None => Err(SignError::NoCertificates),
        }
    }

    fn select(
        &self,
        module: &dyn CryptoModule,
        origin: &WebOrigin,
        purpose: Purpose,
    ) -> SignResult<Vec<u8>> {
        let certificates = module.certificates(purpose)?;
        debug!(
            "{}: {} certificates for {purpose} requested by {}",
            module.name(),
            certificates.len(),
            origin.as_str()
        );
        match certificates.as_slice() {
            [] => return Err(SignError::NoCertificates),
            // signing always asks, even for a single certificate
            [certificate] if purpose == Purpose::Authentication => return Ok(certificate.clone()),
            _ => {}
        }
        let candidates: Vec<CertificateInfo> = certificates
            .iter()
            .filter_map(|der| match certificate_info(der) {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!("skipping certificate: {e}");
                    None
                }
            })
            .collect();
        if candidates.is_empty() {
            return Err(SignError::NoCertificates);
        }
        let chosen = self
            .collaborators
            .selector
            .select(&candidates, purpose)
            .ok_or(SignError::Cancelled)?;
        if !certificates.contains(&chosen) {
            return Err(SignError::InvalidArgument(
                "the selected certificate was not offered".to_owned(),
            ));
        }
        Ok(chosen)
    }

    fn login_and_sign(
        &self,
        module: &dyn CryptoModule,
        origin: &WebOrigin,
        purpose: Purpose,
        certificate: &[u8],
        hash: &[u8],
    ) -> SignResult<Vec<u8>> {
        let subject = certificate_info(certificate)
            .ok()
            .and_then(|info| info.common_name)
            .unwrap_or_default();
        let context = PromptContext {
            purpose,
            origin: origin.friendly().to_owned(),
            subject,
        };
        let session = module.open_session(certificate)?;
        login_and_sign(
            session,
            &context,
            self.collaborators.pin_entry.as_ref(),
            hash,
        )
    }
}

/// Log the detailed error and reduce it to the caller vocabulary
fn report<T>(operation: &str, result: SignResult<T>) -> Result<T, ErrorKind> {
    result.map_err(|e| {
        let kind = e.kind();
        match kind {
            ErrorKind::TechnicalError => error!("{operation} failed: {e}"),
            _ => info!("{operation}: {e}"),
        }
        kind
    })
}
