use thiserror::Error;
use tokensign_interfaces::SignError;
use tokensign_token::Pkcs11Error;

pub type SResult<T> = Result<T, SignerError>;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("{0}")]
    Default(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    Sign(#[from] SignError),

    #[error(transparent)]
    Pkcs11(#[from] Pkcs11Error),
}

impl From<SignerError> for SignError {
    fn from(e: SignerError) -> Self {
        match e {
            SignerError::Sign(e) => e,
            SignerError::Pkcs11(e) => e.into(),
            e => Self::Technical(e.to_string()),
        }
    }
}
