use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type SignResult<T> = Result<T, SignError>;

/// Errors exchanged between the signing engine components.
///
/// The variants form the reduced taxonomy native return codes are translated into:
/// components branch on these, never on raw module codes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No usable certificates")]
    NoCertificates,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Incorrect PIN")]
    PinIncorrect,

    #[error("PIN length out of range")]
    PinLength,

    #[error("PIN is blocked")]
    PinLocked,

    #[error("Not allowed: {0}")]
    NotAllowed(String),

    #[error("Technical error: {0}")]
    Technical(String),
}

impl SignError {
    /// The caller-facing kind of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NoCertificates => ErrorKind::NoCertificates,
            Self::Cancelled => ErrorKind::UserCancel,
            Self::PinLocked => ErrorKind::PinBlocked,
            Self::NotAllowed(_) => ErrorKind::NotAllowed,
            // a PIN error escaping the retry loop is not recoverable by the caller
            Self::PinIncorrect | Self::PinLength | Self::Technical(_) => {
                ErrorKind::TechnicalError
            }
        }
    }
}

/// The fixed error vocabulary returned to callers of the signing engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    NoCertificates,
    UserCancel,
    PinBlocked,
    TechnicalError,
    NotAllowed,
}

impl ErrorKind {
    /// The wire name of the error, as sent back to the browser
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::NoCertificates => "no_certificates",
            Self::UserCancel => "user_cancel",
            Self::PinBlocked => "pin_blocked",
            Self::TechnicalError => "technical_error",
            Self::NotAllowed => "not_allowed",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<SignError> for ErrorKind {
    fn from(e: SignError) -> Self {
        e.kind()
    }
}
