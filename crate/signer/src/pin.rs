//! The login and signature state machine of one signing session.
//!
//! ```text
//! NeedPin ──pin──▶ LoggingIn ──ok──▶ Signing ──ok──▶ Done
//!    ▲                │                 │
//!    └─incorrect PIN──┤                 └─error──▶ Failed
//!                     ├─cancel──▶ Cancelled
//!                     └─blocked / error──▶ Failed
//! ```
//!
//! Wrong PINs are recovered here by prompting again while attempts remain.
//! Pinpad logins run on a separate thread so that the dialog can cancel the wait.

use std::{
    sync::{Arc, Condvar, Mutex},
    thread,
};

use tokensign_interfaces::{
    PinEntry, PinError, PinPrompt, PinRequirement, PinpadCancel, Purpose, SignError, SignResult,
    SigningSession, TokenPinInfo,
};
use tokensign_logger::{debug, info, warn};
use zeroize::Zeroizing;

/// Who a PIN dialog is shown for
#[derive(Debug, Clone)]
pub(crate) struct PromptContext {
    pub(crate) purpose: Purpose,
    pub(crate) origin: String,
    pub(crate) subject: String,
}

/// How the next login is performed
enum Credential {
    /// The backend authenticates by itself
    None,
    Keyboard(Zeroizing<String>),
    Pinpad(PinPrompt),
}

enum SignState {
    NeedPin {
        /// Attempts left as counted locally, capped by the token flags
        retries: Option<u8>,
        last_error: Option<PinError>,
    },
    LoggingIn {
        credential: Credential,
        retries: u8,
    },
    Signing,
    Done(Vec<u8>),
    Cancelled,
    Failed(SignError),
}

/// The result of a pinpad wait
#[derive(Debug)]
pub(crate) enum PinpadOutcome<T> {
    Finished(T),
    Cancelled,
}

/// A one-shot slot where the pinpad thread and the cancel button race: the first writer wins
/// and later writes are rejected
pub(crate) struct PinpadWait<T> {
    outcome: Mutex<Option<PinpadOutcome<T>>>,
    ready: Condvar,
}

impl<T> PinpadWait<T> {
    pub(crate) const fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Store the outcome unless one is already stored.
    /// Returns `Err(outcome)` when another writer came first.
    pub(crate) fn complete(&self, outcome: PinpadOutcome<T>) -> Result<(), PinpadOutcome<T>> {
        let Ok(mut slot) = self.outcome.lock() else {
            return Err(outcome);
        };
        if slot.is_some() {
            return Err(outcome);
        }
        *slot = Some(outcome);
        self.ready.notify_all();
        Ok(())
    }

    /// Block until an outcome is stored
    pub(crate) fn wait(&self) -> SignResult<PinpadOutcome<T>> {
        let poisoned = || SignError::Technical("pinpad wait lock poisoned".to_owned());
        let mut slot = self.outcome.lock().map_err(|_| poisoned())?;
        loop {
            if let Some(outcome) = slot.take() {
                // keep the slot occupied so that late writers are rejected
                *slot = Some(PinpadOutcome::Cancelled);
                return Ok(outcome);
            }
            slot = self.ready.wait(slot).map_err(|_| poisoned())?;
        }
    }
}

type LoginOutcome = (SignResult<()>, Box<dyn SigningSession>);

/// Log in on the reader keypad.
///
/// The session moves to the login thread and comes back with the result; after a cancel it is
/// dropped on that thread once the device answers.
fn pinpad_login(
    session: Box<dyn SigningSession>,
    prompt: &PinPrompt,
    pin_entry: &dyn PinEntry,
) -> SignResult<PinpadOutcome<LoginOutcome>> {
    let wait = Arc::new(PinpadWait::<LoginOutcome>::new());

    let device = wait.clone();
    let mut session = session;
    thread::Builder::new()
        .name("pinpad-login".to_owned())
        .spawn(move || {
            let result = session.login(None);
            if device
                .complete(PinpadOutcome::Finished((result, session)))
                .is_err()
            {
                debug!("pinpad answered after the wait was cancelled, discarding the result");
            }
        })
        .map_err(|e| SignError::Technical(format!("unable to start the pinpad login: {e}")))?;

    let button = wait.clone();
    pin_entry.pinpad_started(
        prompt,
        PinpadCancel::new(move || {
            if button.complete(PinpadOutcome::Cancelled).is_ok() {
                info!("pinpad login cancelled");
            }
        }),
    );
    let outcome = wait.wait();
    pin_entry.pinpad_finished();
    outcome
}

/// Drive login and signature of `hash` to a terminal state
pub(crate) fn login_and_sign(
    session: Box<dyn SigningSession>,
    context: &PromptContext,
    pin_entry: &dyn PinEntry,
    hash: &[u8],
) -> SignResult<Vec<u8>> {
    let mut session = Some(session);
    let mut state = SignState::NeedPin {
        retries: None,
        last_error: None,
    };
    loop {
        state = match state {
            SignState::Done(signature) => return Ok(signature),
            SignState::Cancelled => return Err(SignError::Cancelled),
            SignState::Failed(e) => return Err(e),
            SignState::NeedPin {
                retries,
                last_error,
            } => {
                let requirement = live(&mut session)?.pin_requirement()?;
                need_pin(requirement, retries, last_error, context, pin_entry)
            }
            SignState::LoggingIn {
                credential,
                retries,
            } => {
                let result = match credential {
                    Credential::None => live(&mut session)?.login(None),
                    Credential::Keyboard(pin) => live(&mut session)?.login(Some(&pin)),
                    Credential::Pinpad(prompt) => {
                        let owned = session.take().ok_or_else(lost)?;
                        match pinpad_login(owned, &prompt, pin_entry)? {
                            PinpadOutcome::Finished((result, owned)) => {
                                session = Some(owned);
                                result
                            }
                            // the session stays with the pinpad thread
                            PinpadOutcome::Cancelled => Err(SignError::Cancelled),
                        }
                    }
                };
                after_login(result, retries)
            }
            SignState::Signing => match live(&mut session)?.sign(hash) {
                Ok(signature) => SignState::Done(signature),
                Err(e) => SignState::Failed(e),
            },
        };
    }
}

fn lost() -> SignError {
    SignError::Technical("the signing session was lost".to_owned())
}

fn live(
    session: &mut Option<Box<dyn SigningSession>>,
) -> SignResult<&mut Box<dyn SigningSession>> {
    session.as_mut().ok_or_else(lost)
}

fn need_pin(
    requirement: PinRequirement,
    retries: Option<u8>,
    last_error: Option<PinError>,
    context: &PromptContext,
    pin_entry: &dyn PinEntry,
) -> SignState {
    let (mut token, pinpad) = match requirement {
        PinRequirement::None => {
            return SignState::LoggingIn {
                credential: Credential::None,
                retries: retries.unwrap_or(1),
            };
        }
        PinRequirement::Keyboard(token) => (token, false),
        PinRequirement::Pinpad(token) => (token, true),
    };
    // the token flags are authoritative; the local count only lowers them
    let retries = retries.map_or(token.retries_left, |r| r.min(token.retries_left));
    if retries == 0 {
        warn!("PIN of {} is blocked", token.label);
        return SignState::Failed(SignError::PinLocked);
    }
    token.retries_left = retries;
    let prompt = prompt(context, token, pinpad, last_error);
    if pinpad {
        return SignState::LoggingIn {
            credential: Credential::Pinpad(prompt),
            retries,
        };
    }
    match pin_entry.request_pin(&prompt) {
        Some(pin) => SignState::LoggingIn {
            credential: Credential::Keyboard(pin),
            retries,
        },
        None => SignState::Cancelled,
    }
}

fn prompt(
    context: &PromptContext,
    token: TokenPinInfo,
    pinpad: bool,
    last_error: Option<PinError>,
) -> PinPrompt {
    PinPrompt {
        purpose: context.purpose,
        origin: context.origin.clone(),
        subject: context.subject.clone(),
        token,
        pinpad,
        last_error,
    }
}

fn after_login(result: SignResult<()>, retries: u8) -> SignState {
    match result {
        Ok(()) => SignState::Signing,
        Err(SignError::PinIncorrect) => {
            let retries = retries.saturating_sub(1);
            info!("incorrect PIN, {retries} attempts left");
            if retries == 0 {
                SignState::Failed(SignError::PinLocked)
            } else {
                SignState::NeedPin {
                    retries: Some(retries),
                    last_error: Some(PinError::Incorrect),
                }
            }
        }
        // a PIN of the wrong length does not consume an attempt
        Err(SignError::PinLength) => SignState::NeedPin {
            retries: Some(retries),
            last_error: Some(PinError::InvalidLength),
        },
        Err(SignError::Cancelled) => SignState::Cancelled,
        Err(e) => SignState::Failed(e),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::Duration,
    };

    use tokensign_interfaces::{
        PinEntry, PinPrompt, PinRequirement, PinpadCancel, Purpose, SignError, SignResult,
        SigningSession, TokenPinInfo,
    };
    use zeroize::Zeroizing;

    use super::{PinpadOutcome, PinpadWait, PromptContext, login_and_sign};

    /// A pinpad token whose device answers late
    struct SlowPinpad {
        signed: Arc<AtomicBool>,
    }

    impl SigningSession for SlowPinpad {
        fn pin_requirement(&mut self) -> SignResult<PinRequirement> {
            Ok(PinRequirement::Pinpad(TokenPinInfo {
                label: "PIN1".to_owned(),
                pin_min: 4,
                pin_max: 12,
                retries_left: 3,
            }))
        }

        fn login(&mut self, _pin: Option<&Zeroizing<String>>) -> SignResult<()> {
            thread::sleep(Duration::from_millis(200));
            Ok(())
        }

        fn sign(&mut self, _hash: &[u8]) -> SignResult<Vec<u8>> {
            self.signed.store(true, Ordering::SeqCst);
            Ok(vec![0; 256])
        }
    }

    struct CancelAtOnce;

    impl PinEntry for CancelAtOnce {
        fn request_pin(&self, _prompt: &PinPrompt) -> Option<Zeroizing<String>> {
            None
        }

        fn pinpad_started(&self, _prompt: &PinPrompt, cancel: PinpadCancel) {
            cancel.cancel();
        }
    }

    #[test]
    fn test_pinpad_wait_first_writer_wins() {
        let wait = PinpadWait::<u32>::new();
        assert!(wait.complete(PinpadOutcome::Cancelled).is_ok());
        assert!(wait.complete(PinpadOutcome::Finished(1)).is_err());
        assert!(matches!(wait.wait().unwrap(), PinpadOutcome::Cancelled));
        // results arriving after the wait ended are rejected too
        assert!(wait.complete(PinpadOutcome::Finished(2)).is_err());
    }

    #[test]
    fn test_pinpad_wait_across_threads() {
        let wait = Arc::new(PinpadWait::<u32>::new());
        let device = wait.clone();
        let handle = thread::spawn(move || device.complete(PinpadOutcome::Finished(7)).is_ok());
        assert!(matches!(wait.wait().unwrap(), PinpadOutcome::Finished(7)));
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_pinpad_cancel_is_a_user_cancel() {
        let signed = Arc::new(AtomicBool::new(false));
        let context = PromptContext {
            purpose: Purpose::Signing,
            origin: "example.com".to_owned(),
            subject: "MÄNNIK,MARI-LIIS".to_owned(),
        };
        let result = login_and_sign(
            Box::new(SlowPinpad {
                signed: signed.clone(),
            }),
            &context,
            &CancelAtOnce,
            &[0; 32],
        );
        assert_eq!(result, Err(SignError::Cancelled));
        // the late device answer does not lead to a signature
        thread::sleep(Duration::from_millis(400));
        assert!(!signed.load(Ordering::SeqCst));
    }
}
