//! An in-memory PKCS#11 function table and generated test certificates.
//!
//! [`FakeCryptoki`] behaves like a module with ID cards in its slots: it checks PINs, maintains
//! the retry counter flags, counts the native calls and records the data it signs.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::missing_panics_doc)]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::Duration,
};

use pkcs11_sys::{
    CK_ATTRIBUTE_TYPE, CK_FLAGS, CK_KEY_TYPE, CK_MECHANISM_TYPE, CK_OBJECT_CLASS,
    CK_OBJECT_HANDLE, CK_RV, CK_SESSION_HANDLE, CK_SLOT_ID, CK_TOKEN_INFO, CK_ULONG,
    CK_UNAVAILABLE_INFORMATION, CKA_ID, CKA_KEY_TYPE, CKA_VALUE, CKF_LOGIN_REQUIRED,
    CKF_PROTECTED_AUTHENTICATION_PATH, CKF_TOKEN_INITIALIZED, CKF_USER_PIN_COUNT_LOW,
    CKF_USER_PIN_FINAL_TRY, CKF_USER_PIN_INITIALIZED, CKF_USER_PIN_LOCKED, CKK_EC, CKK_RSA,
    CKM_ECDSA, CKO_CERTIFICATE, CKO_PRIVATE_KEY, CKR_ARGUMENTS_BAD, CKR_ATTRIBUTE_TYPE_INVALID,
    CKR_BUFFER_TOO_SMALL, CKR_MECHANISM_INVALID, CKR_OBJECT_HANDLE_INVALID, CKR_OK,
    CKR_OPERATION_NOT_INITIALIZED, CKR_PIN_INCORRECT, CKR_PIN_LEN_RANGE, CKR_PIN_LOCKED,
    CKR_SESSION_HANDLE_INVALID, CKR_TOKEN_NOT_PRESENT, CKR_USER_ALREADY_LOGGED_IN,
    CKR_USER_NOT_LOGGED_IN,
};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, KeyPair, KeyUsagePurpose,
};
use tokensign_interfaces::Purpose;

use crate::{
    PResult, Pkcs11Error,
    cryptoki::{Attribute, Cryptoki, ModuleLoader},
};

/// The PIN of the tokens built by [`FakeToken::id_card`]
pub const TEST_PIN: &str = "1234";

const MAX_RETRIES: u8 = 3;

/// Extensions of a generated certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateProfile {
    /// TLS client authentication, OU `authentication`
    Authentication,
    /// Non repudiation, OU `signing`
    Signing,
    /// A CA certificate carrying every end entity usage
    CertificateAuthority,
    /// Digital signature key usage only, OU `digital signature`
    DigitalSignatureOu,
    /// TLS client authentication with no basic constraints extension
    NoBasicConstraints,
}

/// A DER certificate for `common_name`, issued by a test CA
#[must_use]
pub fn test_certificate(common_name: &str, profile: CertificateProfile) -> Vec<u8> {
    let ca_key = KeyPair::generate().unwrap();
    let mut ca_params = CertificateParams::default();
    let mut ca_dn = DistinguishedName::new();
    ca_dn.push(DnType::CommonName, "TEST of ESTEID-SK 2015");
    ca_dn.push(DnType::OrganizationName, "AS Sertifitseerimiskeskus");
    ca_params.distinguished_name = ca_dn;
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, "ESTEID");
    params.is_ca = IsCa::ExplicitNoCa;
    match profile {
        CertificateProfile::Authentication => {
            dn.push(DnType::OrganizationalUnitName, "authentication");
            params.key_usages = vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyEncipherment,
            ];
            params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        }
        CertificateProfile::Signing => {
            dn.push(DnType::OrganizationalUnitName, "signing");
            params.key_usages = vec![KeyUsagePurpose::ContentCommitment];
        }
        CertificateProfile::CertificateAuthority => {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages = vec![
                KeyUsagePurpose::KeyCertSign,
                KeyUsagePurpose::CrlSign,
                KeyUsagePurpose::ContentCommitment,
            ];
            params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        }
        CertificateProfile::DigitalSignatureOu => {
            dn.push(DnType::OrganizationalUnitName, "digital signature");
            params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        }
        CertificateProfile::NoBasicConstraints => {
            dn.push(DnType::OrganizationalUnitName, "authentication");
            params.is_ca = IsCa::NoCa;
            params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        }
    }
    params.distinguished_name = dn;
    let key = KeyPair::generate().unwrap();
    params
        .signed_by(&key, &ca_cert, &ca_key)
        .unwrap()
        .der()
        .to_vec()
}

#[derive(Debug, Clone)]
struct FakeObject {
    class: CK_OBJECT_CLASS,
    id: Vec<u8>,
    value: Vec<u8>,
    key_type: CK_KEY_TYPE,
}

/// A token to insert in a [`FakeCryptoki`] slot
#[derive(Debug, Clone)]
pub struct FakeToken {
    label: String,
    pin: String,
    pin_min: usize,
    pin_max: usize,
    retries: u8,
    pinpad: Option<(Duration, CK_RV)>,
    next_login: Option<CK_RV>,
    logged_in: bool,
    objects: Vec<FakeObject>,
}

impl FakeToken {
    /// An empty token accepting [`TEST_PIN`]
    #[must_use]
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_owned(),
            pin: TEST_PIN.to_owned(),
            pin_min: 4,
            pin_max: 12,
            retries: MAX_RETRIES,
            pinpad: None,
            next_login: None,
            logged_in: false,
            objects: Vec::new(),
        }
    }

    /// A token holding an authentication certificate (id `01`) and a signing certificate
    /// (id `02`), each with its RSA private key
    #[must_use]
    pub fn id_card(common_name: &str) -> Self {
        Self::new("PIN1")
            .with_certificate(
                vec![0x01],
                test_certificate(common_name, CertificateProfile::Authentication),
                CKK_RSA,
            )
            .with_certificate(
                vec![0x02],
                test_certificate(common_name, CertificateProfile::Signing),
                CKK_RSA,
            )
    }

    /// Add a certificate and the private key sharing its id
    #[must_use]
    pub fn with_certificate(mut self, id: Vec<u8>, der: Vec<u8>, key_type: CK_KEY_TYPE) -> Self {
        self.objects.push(FakeObject {
            class: CKO_CERTIFICATE,
            id: id.clone(),
            value: der,
            key_type,
        });
        self = self.with_private_key(id, key_type);
        self
    }

    /// Add a private key without a certificate
    #[must_use]
    pub fn with_private_key(mut self, id: Vec<u8>, key_type: CK_KEY_TYPE) -> Self {
        self.objects.push(FakeObject {
            class: CKO_PRIVATE_KEY,
            id,
            value: Vec::new(),
            key_type,
        });
        self
    }

    /// Remove the private keys with the given id
    #[must_use]
    pub fn without_private_key(mut self, id: &[u8]) -> Self {
        self.objects
            .retain(|o| !(o.class == CKO_PRIVATE_KEY && o.id == id));
        self
    }

    /// Use EC keys for every private key
    #[must_use]
    pub fn with_ec_keys(mut self) -> Self {
        for object in &mut self.objects {
            object.key_type = CKK_EC;
        }
        self
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u8) -> Self {
        self.retries = retries.min(MAX_RETRIES);
        self
    }

    /// PIN entry on the reader: `C_Login` waits `delay` and returns `rv`
    #[must_use]
    pub fn with_pinpad(mut self, delay: Duration, rv: CK_RV) -> Self {
        self.pinpad = Some((delay, rv));
        self
    }

    /// The DER bytes of the first certificate usable for `purpose`
    #[must_use]
    pub fn certificate(&self, purpose: Purpose) -> Vec<u8> {
        self.objects
            .iter()
            .filter(|o| o.class == CKO_CERTIFICATE)
            .find(|o| crate::usage::is_usable(&o.value, purpose))
            .map(|o| o.value.clone())
            .expect("no certificate for this purpose")
    }

    fn flags(&self) -> CK_FLAGS {
        let mut flags = CKF_TOKEN_INITIALIZED | CKF_USER_PIN_INITIALIZED | CKF_LOGIN_REQUIRED;
        flags |= match self.retries {
            0 => CKF_USER_PIN_LOCKED,
            1 => CKF_USER_PIN_FINAL_TRY,
            2 => CKF_USER_PIN_COUNT_LOW,
            _ => 0,
        };
        if self.pinpad.is_some() {
            flags |= CKF_PROTECTED_AUTHENTICATION_PATH;
        }
        flags
    }

    /// Verify a keyboard PIN and update the retry counter
    fn check_pin(&mut self, pin: &[u8]) -> CK_RV {
        if self.retries == 0 {
            return CKR_PIN_LOCKED;
        }
        if pin.len() < self.pin_min || pin.len() > self.pin_max {
            return CKR_PIN_LEN_RANGE;
        }
        if pin != self.pin.as_bytes() {
            self.retries -= 1;
            return if self.retries == 0 {
                CKR_PIN_LOCKED
            } else {
                CKR_PIN_INCORRECT
            };
        }
        self.retries = MAX_RETRIES;
        self.logged_in = true;
        CKR_OK
    }
}

#[derive(Debug, Default)]
struct FakeSession {
    slot: CK_SLOT_ID,
    search: Option<Vec<CK_OBJECT_HANDLE>>,
    signing: Option<(CK_MECHANISM_TYPE, CK_OBJECT_HANDLE)>,
}

#[derive(Debug, Default)]
struct FakeState {
    tokens: BTreeMap<CK_SLOT_ID, FakeToken>,
    sessions: HashMap<CK_SESSION_HANDLE, FakeSession>,
    next_session: CK_SESSION_HANDLE,
    calls: HashMap<&'static str, usize>,
    signed: Vec<(CK_MECHANISM_TYPE, Vec<u8>)>,
}

impl FakeState {
    fn session(&mut self, handle: CK_SESSION_HANDLE) -> Result<&mut FakeSession, CK_RV> {
        let slot = self
            .sessions
            .get(&handle)
            .map(|s| s.slot)
            .ok_or(CKR_SESSION_HANDLE_INVALID)?;
        if !self.tokens.contains_key(&slot) {
            return Err(CKR_SESSION_HANDLE_INVALID);
        }
        self.sessions
            .get_mut(&handle)
            .ok_or(CKR_SESSION_HANDLE_INVALID)
    }

    fn object(&self, slot: CK_SLOT_ID, handle: CK_OBJECT_HANDLE) -> Option<&FakeObject> {
        if handle >> 16 != slot {
            return None;
        }
        let index = usize::try_from(handle & 0xffff).ok()?.checked_sub(1)?;
        self.tokens.get(&slot)?.objects.get(index)
    }
}

/// Object handles encode the slot and the object index
fn object_handle(slot: CK_SLOT_ID, index: usize) -> CK_OBJECT_HANDLE {
    (slot << 16) | (index as CK_OBJECT_HANDLE + 1)
}

/// An in-memory PKCS#11 module
#[derive(Debug, Default)]
pub struct FakeCryptoki {
    state: Mutex<FakeState>,
}

impl FakeCryptoki {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn called(&self, function: &'static str) -> MutexGuard<'_, FakeState> {
        let mut state = self.state();
        *state.calls.entry(function).or_default() += 1;
        state
    }

    pub fn insert_token(&self, slot: CK_SLOT_ID, token: FakeToken) {
        self.state().tokens.insert(slot, token);
    }

    /// Pull the card out: its sessions become invalid
    pub fn remove_token(&self, slot: CK_SLOT_ID) {
        let mut state = self.state();
        state.tokens.remove(&slot);
        state.sessions.retain(|_, s| s.slot != slot);
    }

    /// The next `C_Login` on `slot` returns `rv` without checking the PIN
    pub fn fail_next_login(&self, slot: CK_SLOT_ID, rv: CK_RV) {
        if let Some(token) = self.state().tokens.get_mut(&slot) {
            token.next_login = Some(rv);
        }
    }

    #[must_use]
    pub fn retries(&self, slot: CK_SLOT_ID) -> Option<u8> {
        self.state().tokens.get(&slot).map(|t| t.retries)
    }

    /// Number of calls to the named native function, e.g. `C_Login`
    #[must_use]
    pub fn calls(&self, function: &str) -> usize {
        self.state().calls.get(function).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.state().calls.values().sum()
    }

    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.state().sessions.len()
    }

    /// Mechanism and input of every completed `C_Sign`
    #[must_use]
    pub fn signed(&self) -> Vec<(CK_MECHANISM_TYPE, Vec<u8>)> {
        self.state().signed.clone()
    }
}

fn copy_out(value: &[u8], out: Option<&mut [u8]>, length: &mut CK_ULONG) -> CK_RV {
    let Ok(len) = CK_ULONG::try_from(value.len()) else {
        return CKR_ARGUMENTS_BAD;
    };
    match out {
        None => {
            *length = len;
            CKR_OK
        }
        Some(out) if out.len() < value.len() => {
            *length = len;
            CKR_BUFFER_TOO_SMALL
        }
        Some(out) => {
            out[..value.len()].copy_from_slice(value);
            *length = len;
            CKR_OK
        }
    }
}

fn pad<const N: usize>(text: &str) -> [u8; N] {
    let mut out = [b' '; N];
    let bytes = text.as_bytes();
    let len = bytes.len().min(N);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

impl Cryptoki for FakeCryptoki {
    fn initialize(&self) -> CK_RV {
        drop(self.called("C_Initialize"));
        CKR_OK
    }

    fn finalize(&self) -> CK_RV {
        self.called("C_Finalize").sessions.clear();
        CKR_OK
    }

    fn get_slot_list(
        &self,
        _token_present: bool,
        slots: Option<&mut [CK_SLOT_ID]>,
        count: &mut CK_ULONG,
    ) -> CK_RV {
        let state = self.called("C_GetSlotList");
        let present: Vec<CK_SLOT_ID> = state.tokens.keys().copied().collect();
        *count = present.len() as CK_ULONG;
        match slots {
            None => CKR_OK,
            Some(slots) if slots.len() < present.len() => CKR_BUFFER_TOO_SMALL,
            Some(slots) => {
                slots[..present.len()].copy_from_slice(&present);
                CKR_OK
            }
        }
    }

    fn get_token_info(&self, slot: CK_SLOT_ID, info: &mut CK_TOKEN_INFO) -> CK_RV {
        let state = self.called("C_GetTokenInfo");
        let Some(token) = state.tokens.get(&slot) else {
            return CKR_TOKEN_NOT_PRESENT;
        };
        *info = CK_TOKEN_INFO::default();
        info.label = pad(&token.label);
        info.manufacturerID = pad("tokensign");
        info.model = pad("fake");
        info.serialNumber = pad(&format!("{slot:016}"));
        info.flags = token.flags();
        info.ulMinPinLen = token.pin_min as CK_ULONG;
        info.ulMaxPinLen = token.pin_max as CK_ULONG;
        CKR_OK
    }

    fn open_session(&self, slot: CK_SLOT_ID, session: &mut CK_SESSION_HANDLE) -> CK_RV {
        let mut state = self.called("C_OpenSession");
        if !state.tokens.contains_key(&slot) {
            return CKR_TOKEN_NOT_PRESENT;
        }
        state.next_session += 1;
        let handle = state.next_session;
        state.sessions.insert(
            handle,
            FakeSession {
                slot,
                ..FakeSession::default()
            },
        );
        *session = handle;
        CKR_OK
    }

    fn close_session(&self, session: CK_SESSION_HANDLE) -> CK_RV {
        let mut state = self.called("C_CloseSession");
        let Some(closed) = state.sessions.remove(&session) else {
            return CKR_SESSION_HANDLE_INVALID;
        };
        // closing the last session of a slot logs the user out
        if !state.sessions.values().any(|s| s.slot == closed.slot) {
            if let Some(token) = state.tokens.get_mut(&closed.slot) {
                token.logged_in = false;
            }
        }
        CKR_OK
    }

    fn login(&self, session: CK_SESSION_HANDLE, pin: Option<&[u8]>) -> CK_RV {
        let (slot, pinpad) = {
            let mut state = self.called("C_Login");
            let slot = match state.session(session) {
                Ok(s) => s.slot,
                Err(rv) => return rv,
            };
            let Some(token) = state.tokens.get_mut(&slot) else {
                return CKR_TOKEN_NOT_PRESENT;
            };
            if let Some(rv) = token.next_login.take() {
                return rv;
            }
            if token.logged_in {
                return CKR_USER_ALREADY_LOGGED_IN;
            }
            match (token.pinpad, pin) {
                (Some(pinpad), None) => (slot, pinpad),
                (None, Some(pin)) => return token.check_pin(pin),
                _ => return CKR_ARGUMENTS_BAD,
            }
        };
        // the reader keypad is waited for without holding the state
        let (delay, rv) = pinpad;
        thread::sleep(delay);
        if rv == CKR_OK {
            if let Some(token) = self.state().tokens.get_mut(&slot) {
                token.logged_in = true;
            }
        }
        rv
    }

    fn logout(&self, session: CK_SESSION_HANDLE) -> CK_RV {
        let mut state = self.called("C_Logout");
        let slot = match state.session(session) {
            Ok(s) => s.slot,
            Err(rv) => return rv,
        };
        match state.tokens.get_mut(&slot) {
            Some(token) if token.logged_in => {
                token.logged_in = false;
                CKR_OK
            }
            Some(_) => CKR_USER_NOT_LOGGED_IN,
            None => CKR_TOKEN_NOT_PRESENT,
        }
    }

    fn find_objects_init(&self, session: CK_SESSION_HANDLE, template: &[Attribute]) -> CK_RV {
        let mut state = self.called("C_FindObjectsInit");
        let slot = match state.session(session) {
            Ok(s) => s.slot,
            Err(rv) => return rv,
        };
        let Some(token) = state.tokens.get(&slot) else {
            return CKR_TOKEN_NOT_PRESENT;
        };
        let matches: Vec<CK_OBJECT_HANDLE> = token
            .objects
            .iter()
            .enumerate()
            .filter(|(_, object)| {
                // private keys are only visible once logged in
                (object.class != CKO_PRIVATE_KEY || token.logged_in)
                    && template.iter().all(|attribute| match attribute {
                        Attribute::Class(class) => object.class == *class,
                        Attribute::Id(id) => object.id == *id,
                    })
            })
            .map(|(index, _)| object_handle(slot, index))
            .collect();
        match state.session(session) {
            Ok(s) => {
                s.search = Some(matches);
                CKR_OK
            }
            Err(rv) => rv,
        }
    }

    fn find_objects(
        &self,
        session: CK_SESSION_HANDLE,
        objects: &mut [CK_OBJECT_HANDLE],
        count: &mut CK_ULONG,
    ) -> CK_RV {
        let mut state = self.called("C_FindObjects");
        let search = match state.session(session) {
            Ok(s) => s.search.as_mut(),
            Err(rv) => return rv,
        };
        let Some(search) = search else {
            return CKR_OPERATION_NOT_INITIALIZED;
        };
        let n = search.len().min(objects.len());
        for (slot, handle) in objects.iter_mut().zip(search.drain(..n)) {
            *slot = handle;
        }
        *count = n as CK_ULONG;
        CKR_OK
    }

    fn find_objects_final(&self, session: CK_SESSION_HANDLE) -> CK_RV {
        let mut state = self.called("C_FindObjectsFinal");
        match state.session(session) {
            Ok(s) => {
                if s.search.take().is_some() {
                    CKR_OK
                } else {
                    CKR_OPERATION_NOT_INITIALIZED
                }
            }
            Err(rv) => rv,
        }
    }

    fn get_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        attribute: CK_ATTRIBUTE_TYPE,
        value: Option<&mut [u8]>,
        length: &mut CK_ULONG,
    ) -> CK_RV {
        let mut state = self.called("C_GetAttributeValue");
        let slot = match state.session(session) {
            Ok(s) => s.slot,
            Err(rv) => return rv,
        };
        let Some(object) = state.object(slot, object) else {
            return CKR_OBJECT_HANDLE_INVALID;
        };
        let bytes = match attribute {
            CKA_ID => object.id.clone(),
            CKA_VALUE if object.class == CKO_CERTIFICATE => object.value.clone(),
            CKA_KEY_TYPE if object.class == CKO_PRIVATE_KEY => object.key_type.to_ne_bytes().to_vec(),
            _ => {
                *length = CK_UNAVAILABLE_INFORMATION;
                return CKR_ATTRIBUTE_TYPE_INVALID;
            }
        };
        copy_out(&bytes, value, length)
    }

    fn sign_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: CK_MECHANISM_TYPE,
        key: CK_OBJECT_HANDLE,
    ) -> CK_RV {
        let mut state = self.called("C_SignInit");
        let slot = match state.session(session) {
            Ok(s) => s.slot,
            Err(rv) => return rv,
        };
        if !state.tokens.get(&slot).is_some_and(|t| t.logged_in) {
            return CKR_USER_NOT_LOGGED_IN;
        }
        let Some(key_type) = state
            .object(slot, key)
            .filter(|o| o.class == CKO_PRIVATE_KEY)
            .map(|o| o.key_type)
        else {
            return CKR_OBJECT_HANDLE_INVALID;
        };
        if (key_type == CKK_EC) != (mechanism == CKM_ECDSA) {
            return CKR_MECHANISM_INVALID;
        }
        match state.session(session) {
            Ok(s) => {
                s.signing = Some((mechanism, key));
                CKR_OK
            }
            Err(rv) => rv,
        }
    }

    fn sign(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        signature: Option<&mut [u8]>,
        length: &mut CK_ULONG,
    ) -> CK_RV {
        let mut state = self.called("C_Sign");
        let signing = match state.session(session) {
            Ok(s) => s.signing,
            Err(rv) => return rv,
        };
        let Some((mechanism, _key)) = signing else {
            return CKR_OPERATION_NOT_INITIALIZED;
        };
        let size = if mechanism == CKM_ECDSA { 64 } else { 256 };
        // a deterministic stand-in for the signature value
        let value: Vec<u8> = data.iter().copied().cycle().take(size).collect();
        let completes = signature.is_some();
        let rv = copy_out(&value, signature, length);
        // the length query leaves the operation active
        if rv == CKR_OK && completes {
            state.signed.push((mechanism, data.to_vec()));
            if let Ok(s) = state.session(session) {
                s.signing = None;
            }
        }
        rv
    }
}

/// Hands out [`FakeCryptoki`] instances by module path
#[derive(Default)]
pub struct FakeLoader {
    modules: Mutex<HashMap<String, Arc<FakeCryptoki>>>,
    loads: Mutex<Vec<String>>,
}

impl FakeLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_module(self, path: &str, module: Arc<FakeCryptoki>) -> Self {
        self.modules.lock().unwrap().insert(path.to_owned(), module);
        self
    }

    /// Paths passed to `load`, in order
    #[must_use]
    pub fn loads(&self) -> Vec<String> {
        self.loads.lock().unwrap().clone()
    }
}

impl ModuleLoader for FakeLoader {
    fn load(&self, path: &str) -> PResult<Arc<dyn Cryptoki>> {
        self.loads.lock().unwrap().push(path.to_owned());
        let module = self
            .modules
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Pkcs11Error::ModuleLoadFailed {
                path: path.to_owned(),
                reason: "no such module".to_owned(),
            })?;
        module.initialize();
        Ok(module)
    }
}
