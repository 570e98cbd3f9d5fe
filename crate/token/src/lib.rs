#![allow(non_snake_case)]
#![allow(clippy::missing_safety_doc)]

mod catalog;
mod crypto_module;
mod cryptoki;
pub mod digest_info;
mod error;
mod manager;
mod module;
mod native;
mod registry;
mod rv;
mod session;
mod usage;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

#[cfg(test)]
mod tests;

pub use catalog::{ANY_ATR, LibraryProbe, ModuleCatalog, ModuleEntry, NativeProbe, builtin_entries};
pub use crypto_module::Pkcs11Module;
pub use cryptoki::{Attribute, Cryptoki, ModuleLoader};
pub use error::{PResult, Pkcs11Error};
pub use manager::ModuleManager;
pub use module::{DEFAULT_MAX_CERTIFICATES_PER_SLOT, LoadedModule};
pub use native::{NativeLoader, Pkcs11Lib};
pub use registry::{CertificateEntry, CertificateRegistry, Snapshot, Token};
pub use rv::{ReturnCodeClass, rv_name};
pub use session::{KeyFamily, TokenSession, retry_count};
pub use usage::{certificate_info, is_usable};
