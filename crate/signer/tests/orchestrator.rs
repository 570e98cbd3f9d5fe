//! Authentication and signing scenarios against an in-memory PKCS#11 module

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use pkcs11_sys::{CKR_FUNCTION_CANCELED, CKR_OK};
use sha2::{Digest, Sha256};
use tokensign_interfaces::{
    CardReader, CertificateInfo, CertificateSelector, ErrorKind, PinEntry, PinError, PinPrompt,
    PinpadCancel, PlatformCertificateStore, Purpose, SignResult, TokenComposer,
};
use tokensign_signer::{AsyncSigner, Collaborators, SigningOrchestrator, WebOrigin};
use tokensign_token::{
    LibraryProbe, ModuleCatalog, ModuleEntry, ModuleManager,
    test_helpers::{FakeCryptoki, FakeLoader, FakeToken, TEST_PIN},
};
use zeroize::Zeroizing;

const MODULE: &str = "/usr/lib/fake-pkcs11.so";
const ATR: [u8; 4] = [0x3b, 0xfe, 0x18, 0x00];
const SHA256_DIGEST_INFO: &str = "3031300d060960864801650304020105000420";

struct AnyProbe;

impl LibraryProbe for AnyProbe {
    fn exists(&self, _path: &str) -> bool {
        true
    }

    fn can_load(&self, _path: &str) -> bool {
        true
    }
}

struct Reader(Vec<Vec<u8>>);

impl CardReader for Reader {
    fn connected_atrs(&self) -> SignResult<Vec<Vec<u8>>> {
        Ok(self.0.clone())
    }
}

/// Picks the first candidate
#[derive(Default)]
struct Selector {
    calls: AtomicUsize,
}

impl CertificateSelector for Selector {
    fn select(&self, candidates: &[CertificateInfo], _purpose: Purpose) -> Option<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        candidates.first().map(|c| c.der.clone())
    }
}

/// Answers PIN prompts from a script; `None` cancels
#[derive(Default)]
struct Pins {
    script: Mutex<VecDeque<Option<&'static str>>>,
    prompts: Mutex<Vec<PinPrompt>>,
    cancel_pinpad: bool,
    pinpad_finished: AtomicUsize,
}

impl Pins {
    fn new(script: &[Option<&'static str>]) -> Self {
        Self {
            script: Mutex::new(script.iter().copied().collect()),
            ..Self::default()
        }
    }

    fn prompts(&self) -> Vec<PinPrompt> {
        self.prompts.lock().unwrap().clone()
    }
}

impl PinEntry for Pins {
    fn request_pin(&self, prompt: &PinPrompt) -> Option<Zeroizing<String>> {
        self.prompts.lock().unwrap().push(prompt.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .flatten()
            .map(|pin| Zeroizing::new(pin.to_owned()))
    }

    fn pinpad_started(&self, prompt: &PinPrompt, cancel: PinpadCancel) {
        self.prompts.lock().unwrap().push(prompt.clone());
        if self.cancel_pinpad {
            cancel.cancel();
        }
    }

    fn pinpad_finished(&self) {
        self.pinpad_finished.fetch_add(1, Ordering::SeqCst);
    }
}

struct Composer;

impl TokenComposer for Composer {
    fn data_to_be_signed(
        &self,
        _certificate: &[u8],
        origin: &str,
        nonce: &str,
    ) -> SignResult<String> {
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#),
            URL_SAFE_NO_PAD.encode(format!(r#"{{"aud":"{origin}","nonce":"{nonce}"}}"#))
        ))
    }
}

struct Setup {
    orchestrator: SigningOrchestrator,
    fake: Arc<FakeCryptoki>,
    loader: Arc<FakeLoader>,
    selector: Arc<Selector>,
    pins: Arc<Pins>,
}

fn setup_with(
    token: FakeToken,
    pins: Pins,
    entries: Vec<ModuleEntry>,
    platform_store: Option<Arc<dyn PlatformCertificateStore>>,
) -> Setup {
    tokensign_logger::log_init("info,tokensign_signer=debug,tokensign_token=debug");
    let fake = Arc::new(FakeCryptoki::new());
    fake.insert_token(1, token);
    let loader = Arc::new(FakeLoader::new().with_module(MODULE, fake.clone()));
    let catalog = ModuleCatalog::with_probe(entries, Arc::new(AnyProbe));
    let manager = Arc::new(ModuleManager::new(catalog, loader.clone(), 2));
    let selector = Arc::new(Selector::default());
    let pins = Arc::new(pins);
    let collaborators = Collaborators {
        reader: Arc::new(Reader(vec![ATR.to_vec()])),
        selector: selector.clone(),
        pin_entry: pins.clone(),
        composer: Arc::new(Composer),
        platform_store,
    };
    Setup {
        orchestrator: SigningOrchestrator::new(manager, collaborators),
        fake,
        loader,
        selector,
        pins,
    }
}

fn setup(token: FakeToken, pins: Pins) -> Setup {
    setup_with(
        token,
        pins,
        vec![ModuleEntry::new("Fake ID-card", ["3BFE1800"], [MODULE])],
        None,
    )
}

fn origin() -> WebOrigin {
    WebOrigin::parse("https://www.example.ee").unwrap()
}

#[test]
fn test_authenticate_composes_token() {
    let s = setup(
        FakeToken::id_card("MÄNNIK,MARI-LIIS"),
        Pins::new(&[Some(TEST_PIN)]),
    );
    let token = s.orchestrator.authenticate(&origin(), "nonce123").unwrap();

    let data = Composer
        .data_to_be_signed(&[], "www.example.ee", "nonce123")
        .unwrap();
    let signature = token.strip_prefix(&format!("{data}.")).unwrap();
    assert!(!signature.contains('.'));
    assert!(!signature.contains('='));
    assert_eq!(URL_SAFE_NO_PAD.decode(signature).unwrap().len(), 256);

    // the token signs SHA-256 of the data, wrapped in its DigestInfo
    let signed = s.fake.signed();
    assert_eq!(signed.len(), 1);
    let expected = [
        hex::decode(SHA256_DIGEST_INFO).unwrap(),
        Sha256::digest(data.as_bytes()).to_vec(),
    ]
    .concat();
    assert_eq!(signed[0].1, expected);

    // a single authentication certificate is selected without asking
    assert_eq!(s.selector.calls.load(Ordering::SeqCst), 0);
    let prompts = s.pins.prompts();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].origin, "www.example.ee");
    assert_eq!(prompts[0].subject, "MÄNNIK,MARI-LIIS");
    assert_eq!(prompts[0].token.retries_left, 3);
    assert_eq!(prompts[0].last_error, None);
}

#[test]
fn test_count_low_blocks_after_second_wrong_pin() {
    let s = setup(
        FakeToken::id_card("MÄNNIK,MARI-LIIS").with_retries(2),
        Pins::new(&[Some("0000"), Some("0000"), Some("0000")]),
    );
    assert_eq!(
        s.orchestrator.authenticate(&origin(), "nonce123"),
        Err(ErrorKind::PinBlocked)
    );
    let prompts = s.pins.prompts();
    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[0].token.retries_left, 2);
    assert_eq!(prompts[1].token.retries_left, 1);
    assert_eq!(prompts[1].last_error, Some(PinError::Incorrect));
    assert_eq!(s.fake.calls("C_Login"), 2);
}

#[test]
fn test_wrong_pin_then_right_pin() {
    let s = setup(
        FakeToken::id_card("MÄNNIK,MARI-LIIS"),
        Pins::new(&[Some("0000"), Some(TEST_PIN)]),
    );
    assert!(s.orchestrator.authenticate(&origin(), "nonce123").is_ok());
    let prompts = s.pins.prompts();
    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[1].last_error, Some(PinError::Incorrect));
    assert_eq!(prompts[1].token.retries_left, 2);
    assert_eq!(s.fake.retries(1), Some(3));
}

#[test]
fn test_pin_length_error_keeps_attempts() {
    let s = setup(
        FakeToken::id_card("MÄNNIK,MARI-LIIS"),
        Pins::new(&[Some("12"), Some(TEST_PIN)]),
    );
    assert!(s.orchestrator.authenticate(&origin(), "nonce123").is_ok());
    let prompts = s.pins.prompts();
    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[1].last_error, Some(PinError::InvalidLength));
    assert_eq!(prompts[1].token.retries_left, 3);
}

#[test]
fn test_locked_token_is_not_prompted() {
    let s = setup(
        FakeToken::id_card("MÄNNIK,MARI-LIIS").with_retries(0),
        Pins::new(&[Some(TEST_PIN)]),
    );
    assert_eq!(
        s.orchestrator.authenticate(&origin(), "nonce123"),
        Err(ErrorKind::PinBlocked)
    );
    assert!(s.pins.prompts().is_empty());
    assert_eq!(s.fake.calls("C_Login"), 0);
}

#[test]
fn test_pin_dialog_cancel() {
    let s = setup(FakeToken::id_card("MÄNNIK,MARI-LIIS"), Pins::new(&[None]));
    assert_eq!(
        s.orchestrator.authenticate(&origin(), "nonce123"),
        Err(ErrorKind::UserCancel)
    );
    assert_eq!(s.fake.calls("C_Login"), 0);
}

#[test]
fn test_invalid_hash_length_makes_no_native_call() {
    let token = FakeToken::id_card("MÄNNIK,MARI-LIIS");
    let certificate = token.certificate(Purpose::Signing);
    let s = setup(token, Pins::new(&[Some(TEST_PIN)]));
    assert_eq!(
        s.orchestrator.sign(&origin(), &certificate, &[0x01; 33]),
        Err(ErrorKind::InvalidArgument)
    );
    assert_eq!(s.fake.total_calls(), 0);
    assert!(s.loader.loads().is_empty());
}

#[test]
fn test_sign_every_supported_hash() {
    let token = FakeToken::id_card("MÄNNIK,MARI-LIIS");
    let certificate = token.certificate(Purpose::Signing);
    let s = setup(token, Pins::new(&[Some(TEST_PIN); 5]));
    for len in [20_usize, 28, 32, 48, 64] {
        let hash = vec![0x5a_u8; len];
        let signature = s.orchestrator.sign(&origin(), &certificate, &hash).unwrap();
        assert_eq!(signature.len(), 256);
        let signed = s.fake.signed();
        assert!(signed.last().unwrap().1.ends_with(&hash));
    }
    // one login per signature
    assert_eq!(s.pins.prompts().len(), 5);
    assert_eq!(s.fake.calls("C_Login"), 5);
    assert_eq!(s.fake.open_sessions(), 0);
}

#[test]
fn test_sign_with_unknown_certificate() {
    let s = setup(
        FakeToken::id_card("MÄNNIK,MARI-LIIS"),
        Pins::new(&[Some(TEST_PIN)]),
    );
    assert_eq!(
        s.orchestrator.sign(&origin(), b"not a certificate", &[0x01; 32]),
        Err(ErrorKind::InvalidArgument)
    );
}

#[test]
fn test_signing_always_asks_for_the_certificate() {
    let token = FakeToken::id_card("MÄNNIK,MARI-LIIS");
    let signing = token.certificate(Purpose::Signing);
    let authentication = token.certificate(Purpose::Authentication);
    let s = setup(token, Pins::default());

    assert_eq!(
        s.orchestrator
            .select_certificate(&origin(), Purpose::Signing)
            .unwrap(),
        signing
    );
    assert_eq!(s.selector.calls.load(Ordering::SeqCst), 1);

    assert_eq!(
        s.orchestrator
            .select_certificate(&origin(), Purpose::Authentication)
            .unwrap(),
        authentication
    );
    assert_eq!(s.selector.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_swapped_card_is_seen_by_the_next_request() {
    let first = FakeToken::id_card("MÄNNIK,MARI-LIIS");
    let first_certificate = first.certificate(Purpose::Authentication);
    let s = setup(first, Pins::new(&[Some(TEST_PIN)]));
    assert_eq!(
        s.orchestrator
            .select_certificate(&origin(), Purpose::Authentication)
            .unwrap(),
        first_certificate
    );

    s.fake.remove_token(1);
    let second = FakeToken::id_card("JÕEORG,JAAK-KRISTJAN");
    let second_certificate = second.certificate(Purpose::Authentication);
    s.fake.insert_token(1, second);
    assert_eq!(
        s.orchestrator
            .select_certificate(&origin(), Purpose::Authentication)
            .unwrap(),
        second_certificate
    );

    // the removed card's certificate no longer resolves to a token
    assert_eq!(
        s.orchestrator.sign(&origin(), &first_certificate, &[0x01; 32]),
        Err(ErrorKind::InvalidArgument)
    );
    assert!(s.fake.signed().is_empty());
}

#[test]
fn test_no_usable_certificate() {
    let s = setup(FakeToken::new("PIN1"), Pins::default());
    assert_eq!(
        s.orchestrator
            .select_certificate(&origin(), Purpose::Authentication),
        Err(ErrorKind::NoCertificates)
    );
}

#[test]
fn test_pinpad_login() {
    let s = setup(
        FakeToken::id_card("MÄNNIK,MARI-LIIS").with_pinpad(Duration::ZERO, CKR_OK),
        Pins::default(),
    );
    assert!(s.orchestrator.authenticate(&origin(), "nonce123").is_ok());
    let prompts = s.pins.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].pinpad);
    assert_eq!(s.pins.pinpad_finished.load(Ordering::SeqCst), 1);
}

#[test]
fn test_pinpad_cancelled_by_device() {
    let s = setup(
        FakeToken::id_card("MÄNNIK,MARI-LIIS").with_pinpad(Duration::ZERO, CKR_FUNCTION_CANCELED),
        Pins::default(),
    );
    assert_eq!(
        s.orchestrator.authenticate(&origin(), "nonce123"),
        Err(ErrorKind::UserCancel)
    );
}

#[test]
fn test_pinpad_cancelled_by_user() {
    let s = setup(
        FakeToken::id_card("MÄNNIK,MARI-LIIS").with_pinpad(Duration::from_secs(5), CKR_OK),
        Pins {
            cancel_pinpad: true,
            ..Pins::default()
        },
    );
    // the dialog cancel wins over the device, which has not answered yet
    assert_eq!(
        s.orchestrator.authenticate(&origin(), "nonce123"),
        Err(ErrorKind::UserCancel)
    );
    assert!(s.fake.signed().is_empty());
    assert_eq!(s.pins.pinpad_finished.load(Ordering::SeqCst), 1);
}

struct Store {
    certificate: Vec<u8>,
}

impl PlatformCertificateStore for Store {
    fn certificates(&self, purpose: Purpose) -> SignResult<Vec<Vec<u8>>> {
        Ok(match purpose {
            Purpose::Authentication => vec![self.certificate.clone()],
            Purpose::Signing => vec![],
        })
    }

    fn sign(&self, hash: &[u8], _certificate: &[u8]) -> SignResult<Vec<u8>> {
        Ok(hash.iter().rev().copied().collect())
    }
}

#[test]
fn test_platform_store_fallback() {
    let certificate = FakeToken::id_card("MÄNNIK,MARI-LIIS").certificate(Purpose::Authentication);
    // no catalog entry handles the card
    let s = setup_with(
        FakeToken::new("PIN1"),
        Pins::default(),
        vec![],
        Some(Arc::new(Store { certificate })),
    );
    let token = s.orchestrator.authenticate(&origin(), "nonce123").unwrap();
    let (data, signature) = token.rsplit_once('.').unwrap();
    let reversed: Vec<u8> = Sha256::digest(data.as_bytes()).iter().rev().copied().collect();
    assert_eq!(URL_SAFE_NO_PAD.decode(signature).unwrap(), reversed);
    // the store asks for the PIN itself
    assert!(s.pins.prompts().is_empty());
    assert!(s.loader.loads().is_empty());

    assert_eq!(
        s.orchestrator.select_certificate(&origin(), Purpose::Signing),
        Err(ErrorKind::NoCertificates)
    );
}

#[test]
fn test_no_module_and_no_platform_store() {
    let s = setup_with(FakeToken::new("PIN1"), Pins::default(), vec![], None);
    assert_eq!(
        s.orchestrator.authenticate(&origin(), "nonce123"),
        Err(ErrorKind::NoCertificates)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_async_signer() {
    let token = FakeToken::id_card("MÄNNIK,MARI-LIIS");
    let certificate = token.certificate(Purpose::Signing);
    let s = setup(token, Pins::new(&[Some(TEST_PIN)]));
    let signer = AsyncSigner::new(Arc::new(s.orchestrator));

    let selected = signer
        .select_certificate(origin(), Purpose::Signing)
        .await
        .unwrap();
    assert_eq!(selected, certificate);
    let signature = signer
        .sign(origin(), selected, vec![0x11; 48])
        .await
        .unwrap();
    assert_eq!(signature.len(), 256);
    assert_eq!(
        signer.sign(origin(), certificate, vec![0x11; 47]).await,
        Err(ErrorKind::InvalidArgument)
    );
}
