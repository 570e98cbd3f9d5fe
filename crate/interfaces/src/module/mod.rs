mod interface;

pub use interface::{CryptoModule, PinRequirement, SigningSession, TokenPinInfo};
