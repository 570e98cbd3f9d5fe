//! DER encoded `DigestInfo` prefixes for RSA PKCS#1 v1.5 signatures.
//! The hash algorithm is implied by the hash length.

use crate::{PResult, Pkcs11Error};

const SHA1_PREFIX: &[u8] = &[
    0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a, 0x05, 0x00, 0x04, 0x14,
];
const SHA224_PREFIX: &[u8] = &[
    0x30, 0x2d, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x04, 0x05,
    0x00, 0x04, 0x1c,
];
const SHA256_PREFIX: &[u8] = &[
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01, 0x05,
    0x00, 0x04, 0x20,
];
const SHA384_PREFIX: &[u8] = &[
    0x30, 0x41, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02, 0x05,
    0x00, 0x04, 0x30,
];
const SHA512_PREFIX: &[u8] = &[
    0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03, 0x05,
    0x00, 0x04, 0x40,
];

/// The `DigestInfo` prefix for a hash of `hash_len` bytes
pub fn prefix(hash_len: usize) -> PResult<&'static [u8]> {
    match hash_len {
        20 => Ok(SHA1_PREFIX),
        28 => Ok(SHA224_PREFIX),
        32 => Ok(SHA256_PREFIX),
        48 => Ok(SHA384_PREFIX),
        64 => Ok(SHA512_PREFIX),
        len => Err(Pkcs11Error::InvalidArgument(format!(
            "unsupported hash length: {len} bytes"
        ))),
    }
}

/// `DigestInfo || hash`, ready to be signed with `CKM_RSA_PKCS`
pub fn wrap(hash: &[u8]) -> PResult<Vec<u8>> {
    let prefix = prefix(hash.len())?;
    let mut data = Vec::with_capacity(prefix.len() + hash.len());
    data.extend_from_slice(prefix);
    data.extend_from_slice(hash);
    Ok(data)
}
