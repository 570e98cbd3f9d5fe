//! These tests require a smart card in a reader and the PKCS#11 module driving it.
//! To run them, point `TOKENSIGN_PKCS11_MODULE` at the module:
//!
//! ```bash
//! TOKENSIGN_PKCS11_MODULE=/usr/lib/x86_64-linux-gnu/opensc-pkcs11.so cargo test -p tokensign_token -- --ignored
//! ```

use std::sync::Arc;

use tokensign_interfaces::Purpose;

use crate::{
    CertificateRegistry, LoadedModule, NativeLoader, PResult, Pkcs11Error,
    DEFAULT_MAX_CERTIFICATES_PER_SLOT, is_usable, retry_count,
};

fn module_path() -> PResult<String> {
    std::env::var("TOKENSIGN_PKCS11_MODULE")
        .map_err(|_| Pkcs11Error::Default("TOKENSIGN_PKCS11_MODULE is not set".to_owned()))
}

fn load() -> PResult<LoadedModule> {
    LoadedModule::load(
        &module_path()?,
        &NativeLoader,
        DEFAULT_MAX_CERTIFICATES_PER_SLOT,
    )
}

#[test]
#[ignore = "Requires a smart card and its PKCS#11 module"]
fn test_card_enumeration() -> PResult<()> {
    tokensign_logger::log_init("info,tokensign_token=debug");
    let module = load()?;
    let slots = module.slots()?;
    assert!(!slots.is_empty(), "no token present");
    for slot in slots {
        let token = module.token(slot)?;
        assert!(!token.label.is_empty());
        assert!(retry_count(token.flags) <= 3);
    }
    let registry = Arc::new(CertificateRegistry::new());
    module.refresh(&registry)?;
    let certificates = registry.certificates_of(module.path())?;
    assert!(!certificates.is_empty(), "no certificate found");
    assert!(
        certificates
            .iter()
            .any(|c| is_usable(&c.der, Purpose::Authentication) || is_usable(&c.der, Purpose::Signing))
    );
    Ok(())
}

#[test]
#[ignore = "Requires a smart card and its PKCS#11 module"]
fn test_module_is_loaded_twice() -> PResult<()> {
    // a second handle in the same process sees an initialized module and must not finalize it
    let first = load()?;
    let second = load()?;
    drop(second);
    first.slots()?;
    Ok(())
}
