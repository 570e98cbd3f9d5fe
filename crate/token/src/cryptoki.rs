//! The PKCS#11 function table, as used by this crate.
//!
//! Methods mirror the native functions one to one and return the raw return code:
//! translation happens in the callers through [`crate::rv::check_rv`],
//! so that the native module and the in-memory test table are driven exactly the same way.

use std::sync::Arc;

use pkcs11_sys::{
    CK_ATTRIBUTE_TYPE, CK_MECHANISM_TYPE, CK_OBJECT_CLASS, CK_OBJECT_HANDLE, CK_RV,
    CK_SESSION_HANDLE, CK_SLOT_ID, CK_TOKEN_INFO, CK_ULONG, CKA_CLASS, CKA_ID,
};

use crate::PResult;

/// A search template attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    Class(CK_OBJECT_CLASS),
    Id(Vec<u8>),
}

impl Attribute {
    #[must_use]
    pub const fn attribute_type(&self) -> CK_ATTRIBUTE_TYPE {
        match self {
            Self::Class(_) => CKA_CLASS,
            Self::Id(_) => CKA_ID,
        }
    }

    /// The value bytes, laid out the way the native module reads them
    #[must_use]
    pub fn value(&self) -> Vec<u8> {
        match self {
            Self::Class(class) => class.to_ne_bytes().to_vec(),
            Self::Id(id) => id.clone(),
        }
    }
}

pub trait Cryptoki: Send + Sync {
    fn initialize(&self) -> CK_RV;

    fn finalize(&self) -> CK_RV;

    /// `slots` is `None` to query the count only
    fn get_slot_list(
        &self,
        token_present: bool,
        slots: Option<&mut [CK_SLOT_ID]>,
        count: &mut CK_ULONG,
    ) -> CK_RV;

    fn get_token_info(&self, slot: CK_SLOT_ID, info: &mut CK_TOKEN_INFO) -> CK_RV;

    /// Opens a serial, read only session
    fn open_session(&self, slot: CK_SLOT_ID, session: &mut CK_SESSION_HANDLE) -> CK_RV;

    fn close_session(&self, session: CK_SESSION_HANDLE) -> CK_RV;

    /// Log the normal user in. `pin` is `None` when the PIN is entered on a pinpad.
    fn login(&self, session: CK_SESSION_HANDLE, pin: Option<&[u8]>) -> CK_RV;

    fn logout(&self, session: CK_SESSION_HANDLE) -> CK_RV;

    fn find_objects_init(&self, session: CK_SESSION_HANDLE, template: &[Attribute]) -> CK_RV;

    fn find_objects(
        &self,
        session: CK_SESSION_HANDLE,
        objects: &mut [CK_OBJECT_HANDLE],
        count: &mut CK_ULONG,
    ) -> CK_RV;

    fn find_objects_final(&self, session: CK_SESSION_HANDLE) -> CK_RV;

    /// Read a single attribute. `value` is `None` to query the length only.
    fn get_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        attribute: CK_ATTRIBUTE_TYPE,
        value: Option<&mut [u8]>,
        length: &mut CK_ULONG,
    ) -> CK_RV;

    /// Initialize a signature with a parameterless mechanism
    fn sign_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: CK_MECHANISM_TYPE,
        key: CK_OBJECT_HANDLE,
    ) -> CK_RV;

    /// `signature` is `None` to query the signature length only
    fn sign(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        signature: Option<&mut [u8]>,
        length: &mut CK_ULONG,
    ) -> CK_RV;
}

/// Turns a module path into an initialized function table
pub trait ModuleLoader: Send + Sync {
    fn load(&self, path: &str) -> PResult<Arc<dyn Cryptoki>>;
}
