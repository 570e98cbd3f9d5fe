use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, RwLock},
};

use pkcs11_sys::{CK_FLAGS, CK_SLOT_ID, CKF_PROTECTED_AUTHENTICATION_PATH};
use tokensign_logger::{debug, info};

use crate::{PResult, Pkcs11Error};

/// A token, as read from its slot at enumeration time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub slot_id: CK_SLOT_ID,
    pub label: String,
    pub pin_min: usize,
    pub pin_max: usize,
    pub flags: CK_FLAGS,
}

impl Token {
    /// Whether the PIN is entered on the reader keypad
    #[must_use]
    pub const fn has_pinpad(&self) -> bool {
        self.flags & CKF_PROTECTED_AUTHENTICATION_PATH != 0
    }
}

/// A certificate found on a token, keyed by its DER bytes in the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateEntry {
    pub der: Vec<u8>,
    /// Path of the module the certificate was read through
    pub module: String,
    pub token: Token,
    /// `CKA_ID` of the certificate, shared with its private key
    pub object_id: Vec<u8>,
}

pub type Snapshot = Arc<BTreeMap<Vec<u8>, CertificateEntry>>;

/// The certificates of all loaded modules, de-duplicated by DER bytes.
///
/// Readers get immutable snapshots; updates build a complete new map
/// and swap it in under the write lock.
#[derive(Debug, Default)]
pub struct CertificateRegistry {
    snapshot: RwLock<Snapshot>,
}

impl CertificateRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PResult<Snapshot> {
        self.snapshot
            .read()
            .map(|snapshot| snapshot.clone())
            .map_err(|_| Pkcs11Error::Default("certificate registry lock poisoned".to_owned()))
    }

    pub fn get(&self, der: &[u8]) -> PResult<Option<CertificateEntry>> {
        Ok(self.snapshot()?.get(der).cloned())
    }

    /// The certificates read through `module`, in DER order
    pub fn certificates_of(&self, module: &str) -> PResult<Vec<CertificateEntry>> {
        Ok(self
            .snapshot()?
            .values()
            .filter(|entry| entry.module == module)
            .cloned()
            .collect())
    }

    /// Apply the result of a module enumeration.
    ///
    /// - entries of `module` whose slot is not in `present_slots` are evicted
    /// - entries of `module` from the slots in `enumerated_slots` are replaced by `found`
    /// - other entries are kept
    pub fn reconcile(
        &self,
        module: &str,
        present_slots: &[CK_SLOT_ID],
        enumerated_slots: &[CK_SLOT_ID],
        found: Vec<CertificateEntry>,
    ) -> PResult<()> {
        let present: HashSet<CK_SLOT_ID> = present_slots.iter().copied().collect();
        let enumerated: HashSet<CK_SLOT_ID> = enumerated_slots.iter().copied().collect();
        self.update(|current| {
            let mut next = BTreeMap::new();
            for (der, entry) in current {
                if entry.module == module {
                    if !present.contains(&entry.token.slot_id) {
                        info!(
                            "evicting certificate {} of removed slot {}",
                            hex::encode(&entry.object_id),
                            entry.token.slot_id
                        );
                        continue;
                    }
                    if enumerated.contains(&entry.token.slot_id) {
                        continue;
                    }
                }
                next.insert(der.clone(), entry.clone());
            }
            for entry in found {
                debug!(
                    "certificate {} on slot {} ({})",
                    hex::encode(&entry.object_id),
                    entry.token.slot_id,
                    entry.token.label
                );
                next.insert(entry.der.clone(), entry);
            }
            next
        })
    }

    /// Forget every certificate read through `module`
    pub fn remove_module(&self, module: &str) -> PResult<()> {
        self.update(|current| {
            current
                .iter()
                .filter(|(_, entry)| entry.module != module)
                .map(|(der, entry)| (der.clone(), entry.clone()))
                .collect()
        })
    }

    fn update<F>(&self, f: F) -> PResult<()>
    where
        F: FnOnce(&BTreeMap<Vec<u8>, CertificateEntry>) -> BTreeMap<Vec<u8>, CertificateEntry>,
    {
        let mut snapshot = self
            .snapshot
            .write()
            .map_err(|_| Pkcs11Error::Default("certificate registry lock poisoned".to_owned()))?;
        let next = f(&snapshot);
        *snapshot = Arc::new(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pkcs11_sys::CK_SLOT_ID;

    use super::{CertificateEntry, CertificateRegistry, Token};

    fn entry(der: &[u8], module: &str, slot_id: CK_SLOT_ID) -> CertificateEntry {
        CertificateEntry {
            der: der.to_vec(),
            module: module.to_owned(),
            token: Token {
                slot_id,
                label: format!("token {slot_id}"),
                pin_min: 4,
                pin_max: 12,
                flags: 0,
            },
            object_id: vec![0x01],
        }
    }

    #[test]
    fn test_same_bytes_yield_one_entry() {
        let registry = CertificateRegistry::new();
        registry
            .reconcile("a.so", &[1], &[1], vec![entry(b"cert", "a.so", 1)])
            .unwrap();
        registry
            .reconcile("a.so", &[1], &[1], vec![entry(b"cert", "a.so", 1)])
            .unwrap();
        assert_eq!(registry.snapshot().unwrap().len(), 1);
    }

    #[test]
    fn test_removed_slot_is_evicted() {
        let registry = CertificateRegistry::new();
        registry
            .reconcile(
                "a.so",
                &[1, 2],
                &[1, 2],
                vec![
                    entry(b"auth-1", "a.so", 1),
                    entry(b"sign-1", "a.so", 1),
                    entry(b"auth-2", "a.so", 2),
                ],
            )
            .unwrap();
        registry
            .reconcile("b.so", &[7], &[7], vec![entry(b"auth-7", "b.so", 7)])
            .unwrap();

        // the card in slot 1 is removed
        registry.reconcile("a.so", &[2], &[], vec![]).unwrap();
        let snapshot = registry.snapshot().unwrap();
        assert!(!snapshot.contains_key(b"auth-1".as_slice()));
        assert!(!snapshot.contains_key(b"sign-1".as_slice()));
        assert!(snapshot.contains_key(b"auth-2".as_slice()));
        assert!(snapshot.contains_key(b"auth-7".as_slice()));
    }

    #[test]
    fn test_snapshots_are_immutable() {
        let registry = CertificateRegistry::new();
        registry
            .reconcile("a.so", &[1], &[1], vec![entry(b"cert", "a.so", 1)])
            .unwrap();
        let before = registry.snapshot().unwrap();
        registry.remove_module("a.so").unwrap();
        assert_eq!(before.len(), 1);
        assert!(registry.snapshot().unwrap().is_empty());
        assert!(registry.get(b"cert").unwrap().is_none());
    }

    #[test]
    fn test_enumerated_slot_is_replaced() {
        let registry = CertificateRegistry::new();
        registry
            .reconcile("a.so", &[1], &[1], vec![entry(b"old card", "a.so", 1)])
            .unwrap();
        // another card in the same reader
        registry
            .reconcile("a.so", &[1], &[1], vec![entry(b"new card", "a.so", 1)])
            .unwrap();
        let certificates = registry.certificates_of("a.so").unwrap();
        assert_eq!(certificates.len(), 1);
        assert_eq!(certificates[0].der, b"new card".to_vec());
    }
}
