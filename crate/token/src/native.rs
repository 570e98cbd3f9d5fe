use std::{ptr, sync::Arc};

use libloading::{Library, Symbol};
use pkcs11_sys::*;
use tokensign_logger::{debug, info, warn};

use crate::{
    PResult, Pkcs11Error,
    cryptoki::{Attribute, Cryptoki, ModuleLoader},
    rv::rv_name,
};

type GetFunctionList = unsafe extern "C" fn(*mut *mut CK_FUNCTION_LIST) -> CK_RV;

/// Resolve a function pointer copied from the function list,
/// returning `CKR_FUNCTION_NOT_SUPPORTED` from the caller when the module left it empty
macro_rules! native_fn {
    ($lib:expr, $name:ident) => {
        match $lib.$name {
            Some(f) => f,
            None => return CKR_FUNCTION_NOT_SUPPORTED,
        }
    };
}

/// A dynamically loaded PKCS#11 module.
///
/// The function pointers are copied out of the module's function list when loading.
/// The library handle is the last field so that it is unloaded after `Drop` has finalized the
/// module, and sessions hold an `Arc` to this struct so that it is only dropped once they are all
/// closed.
pub struct Pkcs11Lib {
    path: String,
    initialized_here: bool,

    C_Initialize: CK_C_Initialize,
    C_Finalize: CK_C_Finalize,

    C_GetSlotList: CK_C_GetSlotList,
    C_GetTokenInfo: CK_C_GetTokenInfo,

    C_OpenSession: CK_C_OpenSession,
    C_CloseSession: CK_C_CloseSession,
    C_Login: CK_C_Login,
    C_Logout: CK_C_Logout,

    C_FindObjectsInit: CK_C_FindObjectsInit,
    C_FindObjects: CK_C_FindObjects,
    C_FindObjectsFinal: CK_C_FindObjectsFinal,

    C_GetAttributeValue: CK_C_GetAttributeValue,

    C_SignInit: CK_C_SignInit,
    C_Sign: CK_C_Sign,

    // we need to keep the library alive
    _library: Library,
}

impl Pkcs11Lib {
    /// Load the module at `path`, read its function list and initialize it.
    ///
    /// A module already initialized by another user in this process is accepted;
    /// it is then not finalized when this handle is dropped.
    pub fn open(path: &str) -> PResult<Self> {
        let load_failed = |reason: String| Pkcs11Error::ModuleLoadFailed {
            path: path.to_owned(),
            reason,
        };
        let library = unsafe { Library::new(path) }.map_err(|e| load_failed(e.to_string()))?;
        let function_list = unsafe {
            let get_function_list: Symbol<GetFunctionList> = library
                .get(b"C_GetFunctionList")
                .map_err(|e| load_failed(e.to_string()))?;
            let mut function_list: *mut CK_FUNCTION_LIST = ptr::null_mut();
            let rv = get_function_list(&raw mut function_list);
            if rv != CKR_OK {
                return Err(load_failed(format!("C_GetFunctionList: {}", rv_name(rv))));
            }
            function_list
        };
        let Some(fl) = (unsafe { function_list.as_ref() }) else {
            return Err(load_failed("C_GetFunctionList returned no list".to_owned()));
        };
        let mut lib = Self {
            path: path.to_owned(),
            initialized_here: false,
            C_Initialize: fl.C_Initialize,
            C_Finalize: fl.C_Finalize,
            C_GetSlotList: fl.C_GetSlotList,
            C_GetTokenInfo: fl.C_GetTokenInfo,
            C_OpenSession: fl.C_OpenSession,
            C_CloseSession: fl.C_CloseSession,
            C_Login: fl.C_Login,
            C_Logout: fl.C_Logout,
            C_FindObjectsInit: fl.C_FindObjectsInit,
            C_FindObjects: fl.C_FindObjects,
            C_FindObjectsFinal: fl.C_FindObjectsFinal,
            C_GetAttributeValue: fl.C_GetAttributeValue,
            C_SignInit: fl.C_SignInit,
            C_Sign: fl.C_Sign,
            _library: library,
        };
        match lib.initialize() {
            CKR_OK => lib.initialized_here = true,
            CKR_CRYPTOKI_ALREADY_INITIALIZED => {
                info!("{path} was already initialized in this process");
            }
            rv => {
                return Err(Pkcs11Error::NativeInitFailed {
                    path: path.to_owned(),
                    rv,
                });
            }
        }
        debug!("loaded PKCS#11 module {path}");
        Ok(lib)
    }
}

impl Cryptoki for Pkcs11Lib {
    fn initialize(&self) -> CK_RV {
        let mut init_args = CK_C_INITIALIZE_ARGS {
            CreateMutex: None,
            DestroyMutex: None,
            LockMutex: None,
            UnlockMutex: None,
            flags: CKF_OS_LOCKING_OK,
            pReserved: ptr::null_mut(),
        };
        unsafe { native_fn!(self, C_Initialize)((&raw mut init_args).cast()) }
    }

    fn finalize(&self) -> CK_RV {
        unsafe { native_fn!(self, C_Finalize)(ptr::null_mut()) }
    }

    fn get_slot_list(
        &self,
        token_present: bool,
        slots: Option<&mut [CK_SLOT_ID]>,
        count: &mut CK_ULONG,
    ) -> CK_RV {
        let slots = slots.map_or(ptr::null_mut(), <[CK_SLOT_ID]>::as_mut_ptr);
        let token_present = if token_present { CK_TRUE } else { CK_FALSE };
        unsafe { native_fn!(self, C_GetSlotList)(token_present, slots, count) }
    }

    fn get_token_info(&self, slot: CK_SLOT_ID, info: &mut CK_TOKEN_INFO) -> CK_RV {
        unsafe { native_fn!(self, C_GetTokenInfo)(slot, info) }
    }

    fn open_session(&self, slot: CK_SLOT_ID, session: &mut CK_SESSION_HANDLE) -> CK_RV {
        unsafe {
            native_fn!(self, C_OpenSession)(
                slot,
                CKF_SERIAL_SESSION,
                ptr::null_mut(),
                None,
                session,
            )
        }
    }

    fn close_session(&self, session: CK_SESSION_HANDLE) -> CK_RV {
        unsafe { native_fn!(self, C_CloseSession)(session) }
    }

    fn login(&self, session: CK_SESSION_HANDLE, pin: Option<&[u8]>) -> CK_RV {
        let (pin_ptr, pin_len) = match pin {
            Some(pin) => {
                let Ok(len) = CK_ULONG::try_from(pin.len()) else {
                    return CKR_ARGUMENTS_BAD;
                };
                (pin.as_ptr().cast_mut(), len)
            }
            None => (ptr::null_mut(), 0),
        };
        unsafe { native_fn!(self, C_Login)(session, CKU_USER, pin_ptr, pin_len) }
    }

    fn logout(&self, session: CK_SESSION_HANDLE) -> CK_RV {
        unsafe { native_fn!(self, C_Logout)(session) }
    }

    fn find_objects_init(&self, session: CK_SESSION_HANDLE, template: &[Attribute]) -> CK_RV {
        let mut values: Vec<Vec<u8>> = template.iter().map(Attribute::value).collect();
        let mut raw_template = Vec::with_capacity(template.len());
        for (attribute, value) in template.iter().zip(values.iter_mut()) {
            let Ok(len) = CK_ULONG::try_from(value.len()) else {
                return CKR_ARGUMENTS_BAD;
            };
            raw_template.push(CK_ATTRIBUTE {
                type_: attribute.attribute_type(),
                pValue: value.as_mut_ptr().cast(),
                ulValueLen: len,
            });
        }
        let Ok(count) = CK_ULONG::try_from(raw_template.len()) else {
            return CKR_ARGUMENTS_BAD;
        };
        unsafe { native_fn!(self, C_FindObjectsInit)(session, raw_template.as_mut_ptr(), count) }
    }

    fn find_objects(
        &self,
        session: CK_SESSION_HANDLE,
        objects: &mut [CK_OBJECT_HANDLE],
        count: &mut CK_ULONG,
    ) -> CK_RV {
        let Ok(max) = CK_ULONG::try_from(objects.len()) else {
            return CKR_ARGUMENTS_BAD;
        };
        unsafe { native_fn!(self, C_FindObjects)(session, objects.as_mut_ptr(), max, count) }
    }

    fn find_objects_final(&self, session: CK_SESSION_HANDLE) -> CK_RV {
        unsafe { native_fn!(self, C_FindObjectsFinal)(session) }
    }

    fn get_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        attribute: CK_ATTRIBUTE_TYPE,
        value: Option<&mut [u8]>,
        length: &mut CK_ULONG,
    ) -> CK_RV {
        let mut template = CK_ATTRIBUTE {
            type_: attribute,
            pValue: value.map_or(ptr::null_mut(), |v| v.as_mut_ptr().cast()),
            ulValueLen: *length,
        };
        let rv = unsafe {
            native_fn!(self, C_GetAttributeValue)(session, object, &raw mut template, 1)
        };
        *length = template.ulValueLen;
        rv
    }

    fn sign_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: CK_MECHANISM_TYPE,
        key: CK_OBJECT_HANDLE,
    ) -> CK_RV {
        let mut mechanism = CK_MECHANISM {
            mechanism,
            pParameter: ptr::null_mut(),
            ulParameterLen: 0,
        };
        unsafe { native_fn!(self, C_SignInit)(session, &raw mut mechanism, key) }
    }

    fn sign(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        signature: Option<&mut [u8]>,
        length: &mut CK_ULONG,
    ) -> CK_RV {
        let Ok(data_len) = CK_ULONG::try_from(data.len()) else {
            return CKR_ARGUMENTS_BAD;
        };
        let signature = signature.map_or(ptr::null_mut(), <[u8]>::as_mut_ptr);
        unsafe {
            native_fn!(self, C_Sign)(session, data.as_ptr().cast_mut(), data_len, signature, length)
        }
    }
}

impl Drop for Pkcs11Lib {
    fn drop(&mut self) {
        if self.initialized_here {
            let rv = self.finalize();
            if rv != CKR_OK {
                warn!("C_Finalize of {} failed: {}", self.path, rv_name(rv));
            }
        }
        debug!("unloading PKCS#11 module {}", self.path);
    }
}

/// Loads modules from the file system
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl ModuleLoader for NativeLoader {
    fn load(&self, path: &str) -> PResult<Arc<dyn Cryptoki>> {
        Ok(Arc::new(Pkcs11Lib::open(path)?))
    }
}
