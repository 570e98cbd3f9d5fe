use std::num::TryFromIntError;

use pkcs11_sys::{CK_RV, CK_SLOT_ID};
use thiserror::Error;
use tokensign_interfaces::SignError;

use crate::rv::ReturnCodeClass;

pub type PResult<T> = Result<T, Pkcs11Error>;

#[derive(Error, Debug)]
pub enum Pkcs11Error {
    #[error("{0}")]
    Default(String),

    #[error("{function} failed: {name} ({rv:#x})")]
    Native {
        function: &'static str,
        rv: CK_RV,
        name: &'static str,
        class: ReturnCodeClass,
    },

    #[error("Failed loading the PKCS#11 module {path}: {reason}")]
    ModuleLoadFailed { path: String, reason: String },

    #[error("Failed initializing the PKCS#11 module {path}: return code {rv:#x}")]
    NativeInitFailed { path: String, rv: CK_RV },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Private key not found: {0}")]
    KeyNotFound(String),

    #[error("The session to slot {0} is busy")]
    SessionBusy(CK_SLOT_ID),

    #[error("The session is not logged in")]
    NotLoggedIn,

    #[error("Certificate parsing error: {0}")]
    Certificate(String),

    #[error(transparent)]
    LibLoading(#[from] libloading::Error),

    #[error(transparent)]
    TryFromInt(#[from] TryFromIntError),
}

impl Pkcs11Error {
    /// The reduced class of the native return code behind this error, if any
    #[must_use]
    pub const fn class(&self) -> ReturnCodeClass {
        match self {
            Self::Native { class, .. } => *class,
            _ => ReturnCodeClass::Failed,
        }
    }
}

impl From<Pkcs11Error> for SignError {
    fn from(e: Pkcs11Error) -> Self {
        match e {
            Pkcs11Error::InvalidArgument(reason) => Self::InvalidArgument(reason),
            Pkcs11Error::Native { class, .. } => match class {
                ReturnCodeClass::Cancelled => Self::Cancelled,
                ReturnCodeClass::PinIncorrect => Self::PinIncorrect,
                ReturnCodeClass::PinLenRange => Self::PinLength,
                ReturnCodeClass::PinLocked => Self::PinLocked,
                ReturnCodeClass::Ok | ReturnCodeClass::Failed => Self::Technical(e.to_string()),
            },
            e => Self::Technical(e.to_string()),
        }
    }
}
