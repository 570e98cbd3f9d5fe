//! Sessions to a token.
//!
//! [`SessionHandle`] closes its native session when dropped, so every exit path releases it.
//! [`TokenSession`] drives the login and signature of one certificate. It holds the slot lease
//! and an `Arc` to the function table: the module cannot be finalized while a session is alive.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use pkcs11_sys::{
    CK_ATTRIBUTE_TYPE, CK_FLAGS, CK_KEY_TYPE, CK_MECHANISM_TYPE, CK_OBJECT_HANDLE,
    CK_SESSION_HANDLE, CK_SLOT_ID, CK_TOKEN_INFO, CK_ULONG, CK_UNAVAILABLE_INFORMATION,
    CKA_KEY_TYPE, CKF_USER_PIN_COUNT_LOW, CKF_USER_PIN_FINAL_TRY, CKF_USER_PIN_LOCKED, CKK_EC,
    CKM_ECDSA, CKM_RSA_PKCS, CKO_PRIVATE_KEY, CKR_OK,
};
use tokensign_interfaces::{PinRequirement, SignResult, SigningSession, TokenPinInfo};
use tokensign_logger::{debug, trace, warn};
use zeroize::Zeroizing;

use crate::{
    PResult, Pkcs11Error,
    cryptoki::{Attribute, Cryptoki},
    digest_info,
    registry::{CertificateEntry, Token},
    rv::{check_rv, rv_name},
};

/// An open native session, closed on drop
pub(crate) struct SessionHandle {
    cryptoki: Arc<dyn Cryptoki>,
    handle: CK_SESSION_HANDLE,
}

impl SessionHandle {
    pub(crate) fn open(cryptoki: &Arc<dyn Cryptoki>, slot: CK_SLOT_ID) -> PResult<Self> {
        let mut handle: CK_SESSION_HANDLE = 0;
        check_rv("C_OpenSession", cryptoki.open_session(slot, &mut handle))?;
        trace!("opened session {handle} on slot {slot}");
        Ok(Self {
            cryptoki: cryptoki.clone(),
            handle,
        })
    }

    pub(crate) const fn handle(&self) -> CK_SESSION_HANDLE {
        self.handle
    }

    /// Up to `max` objects matching `template`
    pub(crate) fn find_objects(
        &self,
        template: &[Attribute],
        max: usize,
    ) -> PResult<Vec<CK_OBJECT_HANDLE>> {
        check_rv(
            "C_FindObjectsInit",
            self.cryptoki.find_objects_init(self.handle, template),
        )?;
        let mut objects = vec![CK_OBJECT_HANDLE::default(); max];
        let mut count: CK_ULONG = 0;
        let found = check_rv(
            "C_FindObjects",
            self.cryptoki
                .find_objects(self.handle, &mut objects, &mut count),
        );
        // the search is terminated even when it failed
        check_rv(
            "C_FindObjectsFinal",
            self.cryptoki.find_objects_final(self.handle),
        )?;
        found?;
        let count = usize::try_from(count)?;
        objects.truncate(count.min(max));
        Ok(objects)
    }

    pub(crate) fn attribute(
        &self,
        object: CK_OBJECT_HANDLE,
        attribute: CK_ATTRIBUTE_TYPE,
    ) -> PResult<Vec<u8>> {
        let mut length: CK_ULONG = 0;
        check_rv(
            "C_GetAttributeValue",
            self.cryptoki
                .get_attribute_value(self.handle, object, attribute, None, &mut length),
        )?;
        if length == CK_UNAVAILABLE_INFORMATION {
            return Err(Pkcs11Error::Default(format!(
                "attribute {attribute:#x} of object {object} is not available"
            )));
        }
        let mut value = vec![0_u8; usize::try_from(length)?];
        check_rv(
            "C_GetAttributeValue",
            self.cryptoki.get_attribute_value(
                self.handle,
                object,
                attribute,
                Some(&mut value),
                &mut length,
            ),
        )?;
        value.truncate(usize::try_from(length)?);
        Ok(value)
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let rv = self.cryptoki.close_session(self.handle);
        if rv == CKR_OK {
            trace!("closed session {}", self.handle);
        } else {
            warn!("C_CloseSession({}) failed: {}", self.handle, rv_name(rv));
        }
    }
}

/// Exclusive use of a slot by one [`TokenSession`], released on drop
pub(crate) struct SlotLease {
    slot: CK_SLOT_ID,
    leases: Arc<Mutex<HashSet<CK_SLOT_ID>>>,
}

impl SlotLease {
    pub(crate) fn acquire(
        leases: &Arc<Mutex<HashSet<CK_SLOT_ID>>>,
        slot: CK_SLOT_ID,
    ) -> PResult<Self> {
        let mut held = leases
            .lock()
            .map_err(|_| Pkcs11Error::Default("slot leases lock poisoned".to_owned()))?;
        if !held.insert(slot) {
            return Err(Pkcs11Error::SessionBusy(slot));
        }
        Ok(Self {
            slot,
            leases: leases.clone(),
        })
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        if let Ok(mut held) = self.leases.lock() {
            held.remove(&self.slot);
        }
    }
}

/// Read the live token information of a slot
pub(crate) fn read_token(cryptoki: &dyn Cryptoki, slot: CK_SLOT_ID) -> PResult<Token> {
    let mut info = CK_TOKEN_INFO::default();
    check_rv("C_GetTokenInfo", cryptoki.get_token_info(slot, &mut info))?;
    let label = String::from_utf8_lossy(&info.label)
        .trim_end_matches([' ', '\0'])
        .to_owned();
    Ok(Token {
        slot_id: slot,
        label,
        pin_min: usize::try_from(info.ulMinPinLen).unwrap_or(0),
        pin_max: usize::try_from(info.ulMaxPinLen).unwrap_or(usize::MAX),
        flags: info.flags,
    })
}

/// Remaining PIN attempts, as far as the token flags tell.
///
/// 3 is a displayed default: the real maximum is not known from the flags.
#[must_use]
pub const fn retry_count(flags: CK_FLAGS) -> u8 {
    if flags & CKF_USER_PIN_LOCKED != 0 {
        0
    } else if flags & CKF_USER_PIN_FINAL_TRY != 0 {
        1
    } else if flags & CKF_USER_PIN_COUNT_LOW != 0 {
        2
    } else {
        3
    }
}

/// Algorithm family of a private key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    Ec,
}

impl KeyFamily {
    #[must_use]
    pub const fn from_key_type(key_type: CK_KEY_TYPE) -> Self {
        if key_type == CKK_EC { Self::Ec } else { Self::Rsa }
    }

    #[must_use]
    pub const fn mechanism(self) -> CK_MECHANISM_TYPE {
        match self {
            Self::Rsa => CKM_RSA_PKCS,
            Self::Ec => CKM_ECDSA,
        }
    }

    /// The bytes given to `C_Sign` for a raw hash
    pub fn signing_input(self, hash: &[u8]) -> PResult<Vec<u8>> {
        match self {
            Self::Rsa => digest_info::wrap(hash),
            Self::Ec => {
                digest_info::prefix(hash.len())?;
                Ok(hash.to_vec())
            }
        }
    }
}

/// A session over the private key of one certificate.
///
/// The login session is closed after every signature attempt: each `sign` needs a new `login`.
pub struct TokenSession {
    cryptoki: Arc<dyn Cryptoki>,
    certificate: CertificateEntry,
    session: Option<SessionHandle>,
    logged_in: bool,
    _lease: SlotLease,
}

impl TokenSession {
    pub(crate) fn new(
        cryptoki: Arc<dyn Cryptoki>,
        certificate: CertificateEntry,
        lease: SlotLease,
    ) -> Self {
        Self {
            cryptoki,
            certificate,
            session: None,
            logged_in: false,
            _lease: lease,
        }
    }

    #[must_use]
    pub const fn certificate(&self) -> &CertificateEntry {
        &self.certificate
    }

    /// The token, with live flags
    pub fn token(&self) -> PResult<Token> {
        read_token(self.cryptoki.as_ref(), self.certificate.token.slot_id)
    }

    pub fn retry_count(&self) -> PResult<u8> {
        Ok(retry_count(self.token()?.flags))
    }

    /// Log the user in, opening the session if needed.
    /// `pin` is `None` for pinpad tokens.
    pub fn login(&mut self, pin: Option<&[u8]>) -> PResult<()> {
        let session = match self.session.take() {
            Some(session) => session,
            None => SessionHandle::open(&self.cryptoki, self.certificate.token.slot_id)?,
        };
        let rv = self.cryptoki.login(session.handle(), pin);
        // the session survives a failed attempt so that the PIN can be asked again
        self.session = Some(session);
        // an already logged in user is an error too: every signature needs the PIN
        check_rv("C_Login", rv)?;
        self.logged_in = true;
        Ok(())
    }

    /// End the authenticated state of the token, which other sessions to the slot share
    fn logout(&self, session: &SessionHandle) {
        if let Err(e) = check_rv("C_Logout", self.cryptoki.logout(session.handle())) {
            warn!("failed logging out of slot {}: {e}", self.certificate.token.slot_id);
        }
    }

    /// Sign a raw hash with the private key sharing the certificate id
    pub fn sign(&mut self, hash: &[u8]) -> PResult<Vec<u8>> {
        // validated before any native call
        digest_info::prefix(hash.len())?;
        let session = self.session.take();
        let logged_in = std::mem::replace(&mut self.logged_in, false);
        let Some(session) = session.filter(|_| logged_in) else {
            return Err(Pkcs11Error::NotLoggedIn);
        };
        let signature = self.sign_logged_in(&session, hash);
        self.logout(&session);
        // `session` is dropped here: the next signature needs a new login
        signature
    }

    fn sign_logged_in(&self, session: &SessionHandle, hash: &[u8]) -> PResult<Vec<u8>> {
        debug!(
            "signing {} with key {}",
            hex::encode(hash),
            hex::encode(&self.certificate.object_id)
        );

        let keys = session.find_objects(
            &[
                Attribute::Class(CKO_PRIVATE_KEY),
                Attribute::Id(self.certificate.object_id.clone()),
            ],
            2,
        )?;
        let [key] = keys[..] else {
            return Err(Pkcs11Error::KeyNotFound(format!(
                "{} private keys match id {}",
                keys.len(),
                hex::encode(&self.certificate.object_id)
            )));
        };

        let key_type = session.attribute(key, CKA_KEY_TYPE)?;
        let key_type = CK_KEY_TYPE::from_ne_bytes(key_type.as_slice().try_into().map_err(|_| {
            Pkcs11Error::Default(format!("unexpected CKA_KEY_TYPE length: {}", key_type.len()))
        })?);
        let family = KeyFamily::from_key_type(key_type);
        let data = family.signing_input(hash)?;

        check_rv(
            "C_SignInit",
            self.cryptoki
                .sign_init(session.handle(), family.mechanism(), key),
        )?;
        let mut length: CK_ULONG = 0;
        check_rv(
            "C_Sign",
            self.cryptoki
                .sign(session.handle(), &data, None, &mut length),
        )?;
        let mut signature = vec![0_u8; usize::try_from(length)?];
        check_rv(
            "C_Sign",
            self.cryptoki
                .sign(session.handle(), &data, Some(&mut signature), &mut length),
        )?;
        signature.truncate(usize::try_from(length)?);
        Ok(signature)
    }
}

impl Drop for TokenSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take().filter(|_| self.logged_in) {
            self.logout(&session);
        }
    }
}

impl SigningSession for TokenSession {
    fn pin_requirement(&mut self) -> SignResult<PinRequirement> {
        let token = self.token()?;
        let info = TokenPinInfo {
            label: token.label.clone(),
            pin_min: token.pin_min,
            pin_max: token.pin_max,
            retries_left: retry_count(token.flags),
        };
        Ok(if token.has_pinpad() {
            PinRequirement::Pinpad(info)
        } else {
            PinRequirement::Keyboard(info)
        })
    }

    fn login(&mut self, pin: Option<&Zeroizing<String>>) -> SignResult<()> {
        Ok(Self::login(self, pin.map(|pin| pin.as_bytes()))?)
    }

    fn sign(&mut self, hash: &[u8]) -> SignResult<Vec<u8>> {
        Ok(Self::sign(self, hash)?)
    }
}
