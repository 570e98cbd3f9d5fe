use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use pkcs11_sys::{CK_SLOT_ID, CK_ULONG, CKA_ID, CKA_VALUE, CKO_CERTIFICATE};
use tokensign_logger::{debug, info, warn};

use crate::{
    PResult,
    cryptoki::{Attribute, Cryptoki, ModuleLoader},
    registry::{CertificateEntry, CertificateRegistry, Token},
    rv::check_rv,
    session::{SessionHandle, SlotLease, TokenSession, read_token},
};

/// Certificates read per slot when no limit is configured
pub const DEFAULT_MAX_CERTIFICATES_PER_SLOT: usize = 2;

/// A loaded and initialized PKCS#11 module
pub struct LoadedModule {
    path: String,
    cryptoki: Arc<dyn Cryptoki>,
    leases: Arc<Mutex<HashSet<CK_SLOT_ID>>>,
    max_certificates_per_slot: usize,
}

impl LoadedModule {
    pub fn load(
        path: &str,
        loader: &dyn ModuleLoader,
        max_certificates_per_slot: usize,
    ) -> PResult<Self> {
        info!("loading PKCS#11 module {path}");
        let cryptoki = loader.load(path)?;
        Ok(Self::from_cryptoki(path, cryptoki, max_certificates_per_slot))
    }

    #[must_use]
    pub fn from_cryptoki(
        path: &str,
        cryptoki: Arc<dyn Cryptoki>,
        max_certificates_per_slot: usize,
    ) -> Self {
        Self {
            path: path.to_owned(),
            cryptoki,
            leases: Arc::default(),
            max_certificates_per_slot: max_certificates_per_slot.max(1),
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The slots holding a token
    pub fn slots(&self) -> PResult<Vec<CK_SLOT_ID>> {
        let mut count: CK_ULONG = 0;
        check_rv(
            "C_GetSlotList",
            self.cryptoki.get_slot_list(true, None, &mut count),
        )?;
        let mut slots = vec![CK_SLOT_ID::default(); usize::try_from(count)?];
        if slots.is_empty() {
            return Ok(slots);
        }
        check_rv(
            "C_GetSlotList",
            self.cryptoki
                .get_slot_list(true, Some(&mut slots), &mut count),
        )?;
        slots.truncate(usize::try_from(count)?);
        Ok(slots)
    }

    pub fn token(&self, slot: CK_SLOT_ID) -> PResult<Token> {
        read_token(self.cryptoki.as_ref(), slot)
    }

    /// Enumerate the tokens and publish their certificates in `registry`.
    ///
    /// Slots that fail to enumerate are skipped and keep their previous entries.
    /// Returns the number of slots holding a token.
    pub fn refresh(&self, registry: &CertificateRegistry) -> PResult<usize> {
        let slots = self.slots()?;
        let mut enumerated = Vec::with_capacity(slots.len());
        let mut found = Vec::new();
        for &slot in &slots {
            match self.slot_certificates(slot) {
                Ok(certificates) => {
                    enumerated.push(slot);
                    found.extend(certificates);
                }
                Err(e) => warn!("{}: skipping slot {slot}: {e}", self.path),
            }
        }
        debug!(
            "{}: {} certificates on {} slots",
            self.path,
            found.len(),
            slots.len()
        );
        registry.reconcile(&self.path, &slots, &enumerated, found)?;
        Ok(slots.len())
    }

    fn slot_certificates(&self, slot: CK_SLOT_ID) -> PResult<Vec<CertificateEntry>> {
        let token = self.token(slot)?;
        let session = SessionHandle::open(&self.cryptoki, slot)?;
        let objects = session.find_objects(
            &[Attribute::Class(CKO_CERTIFICATE)],
            self.max_certificates_per_slot,
        )?;
        objects
            .into_iter()
            .map(|object| {
                Ok(CertificateEntry {
                    der: session.attribute(object, CKA_VALUE)?,
                    module: self.path.clone(),
                    token: token.clone(),
                    object_id: session.attribute(object, CKA_ID)?,
                })
            })
            .collect()
    }

    /// Open a session for the private key of `certificate`.
    ///
    /// Only one session per slot may be open at a time: a second one fails with
    /// [`crate::Pkcs11Error::SessionBusy`] until the first one is dropped.
    pub fn open_session(&self, certificate: &CertificateEntry) -> PResult<TokenSession> {
        let lease = SlotLease::acquire(&self.leases, certificate.token.slot_id)?;
        Ok(TokenSession::new(
            self.cryptoki.clone(),
            certificate.clone(),
            lease,
        ))
    }
}
