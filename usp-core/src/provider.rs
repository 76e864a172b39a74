//! External provider adapters (C11): capability traits only. A production
//! deployment supplies real implementations (an HSM client, a WebAuthn relying
//! party library, an SMS gateway); this crate ships an in-memory/simulated
//! implementation of each so the rest of the platform can be built and tested
//! against the interface, the same shape as the key-metadata storage backend
//! trait elsewhere in this codebase (interface first, swappable backends
//! second).

use crate::error::{Result, UspError};
use crate::types::{ApprovalId, UserId};
use std::collections::HashMap;
use std::sync::Mutex;

/// Rotates a credential on a remote platform (a database, an OS account, a
/// network device). One instance per `platform` string, looked up from a
/// registry by the rotation engine.
pub trait RotationConnector: Send + Sync {
    /// Confirm the credential currently on file still works against the
    /// target platform.
    fn verify(&self, account_ref: &str, secret: &[u8]) -> Result<bool>;
    /// Apply a new secret on the target platform.
    fn rotate(&self, account_ref: &str, new_secret: &[u8]) -> Result<()>;
    /// Generate a new candidate secret meeting the platform's complexity
    /// rules.
    fn generate(&self, min_length: usize) -> Result<Vec<u8>>;
}

pub trait WebAuthnVerifier: Send + Sync {
    fn verify_assertion(&self, credential_id: &str, assertion: &[u8], challenge: &[u8]) -> Result<bool>;
}

/// Sends a one-time code to a destination (phone number, email address).
pub trait OtpDeliverer: Send + Sync {
    fn deliver(&self, destination: &str, code: &str) -> Result<()>;
}

pub trait HardwareOtpVerifier: Send + Sync {
    fn verify(&self, serial: &str, code: &str) -> Result<bool>;
}

/// Out-of-band push approval (a mobile authenticator app). Requesting and
/// polling are separate calls since the user approves asynchronously.
pub trait PushApprover: Send + Sync {
    fn request_approval(&self, user_id: UserId, context: &str) -> Result<ApprovalId>;
    fn poll_approval(&self, approval_id: ApprovalId) -> Result<Option<bool>>;
}

/// An HSM, called through this interface rather than emulated in-process.
pub trait HsmProvider: Send + Sync {
    fn sign(&self, key_id: &str, input: &[u8]) -> Result<Vec<u8>>;
}

/// Always confirms, always rotates successfully. Useful for exercising the
/// rotation state machine without a real target platform.
#[derive(Default)]
pub struct SimulatedRotationConnector;

impl RotationConnector for SimulatedRotationConnector {
    fn verify(&self, _account_ref: &str, _secret: &[u8]) -> Result<bool> {
        Ok(true)
    }

    fn rotate(&self, _account_ref: &str, _new_secret: &[u8]) -> Result<()> {
        Ok(())
    }

    fn generate(&self, min_length: usize) -> Result<Vec<u8>> {
        Ok(usp_crypto::rand::random_password(min_length.max(16))?.into_bytes())
    }
}

/// Accepts an assertion iff it matches a credential registered ahead of time
/// via `register`. Stands in for a real WebAuthn relying-party library.
#[derive(Default)]
pub struct InMemoryWebAuthnVerifier {
    credentials: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryWebAuthnVerifier {
    pub fn register(&self, credential_id: &str, expected_assertion: Vec<u8>) {
        self.credentials.lock().unwrap().insert(credential_id.to_string(), expected_assertion);
    }
}

impl WebAuthnVerifier for InMemoryWebAuthnVerifier {
    fn verify_assertion(&self, credential_id: &str, assertion: &[u8], _challenge: &[u8]) -> Result<bool> {
        let credentials = self.credentials.lock().unwrap();
        Ok(credentials.get(credential_id).map(|expected| expected.as_slice() == assertion).unwrap_or(false))
    }
}

/// Captures the last code sent per destination instead of dispatching to a
/// real SMS/email gateway, so tests can read it back.
#[derive(Default)]
pub struct InMemoryOtpDeliverer {
    sent: Mutex<HashMap<String, String>>,
}

impl InMemoryOtpDeliverer {
    pub fn last_sent(&self, destination: &str) -> Option<String> {
        self.sent.lock().unwrap().get(destination).cloned()
    }
}

impl OtpDeliverer for InMemoryOtpDeliverer {
    fn deliver(&self, destination: &str, code: &str) -> Result<()> {
        self.sent.lock().unwrap().insert(destination.to_string(), code.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryHardwareOtpVerifier {
    valid_codes: Mutex<HashMap<String, String>>,
}

impl InMemoryHardwareOtpVerifier {
    pub fn register(&self, serial: &str, current_code: &str) {
        self.valid_codes.lock().unwrap().insert(serial.to_string(), current_code.to_string());
    }
}

impl HardwareOtpVerifier for InMemoryHardwareOtpVerifier {
    fn verify(&self, serial: &str, code: &str) -> Result<bool> {
        Ok(self.valid_codes.lock().unwrap().get(serial).map(|c| c == code).unwrap_or(false))
    }
}

/// Auto-approves (or auto-denies) every request after being told how to
/// behave, instead of waiting on a real mobile push round-trip.
pub struct SimulatedPushApprover {
    decisions: Mutex<HashMap<ApprovalId, bool>>,
    auto_approve: bool,
}

impl SimulatedPushApprover {
    pub fn new(auto_approve: bool) -> Self {
        Self { decisions: Mutex::new(HashMap::new()), auto_approve }
    }
}

impl PushApprover for SimulatedPushApprover {
    fn request_approval(&self, _user_id: UserId, _context: &str) -> Result<ApprovalId> {
        let id = ApprovalId::new();
        self.decisions.lock().unwrap().insert(id, self.auto_approve);
        Ok(id)
    }

    fn poll_approval(&self, approval_id: ApprovalId) -> Result<Option<bool>> {
        Ok(self.decisions.lock().unwrap().get(&approval_id).copied())
    }
}

/// No HSM configured; any call is a configuration error, not a crypto one.
#[derive(Default)]
pub struct NullHsmProvider;

impl HsmProvider for NullHsmProvider {
    fn sign(&self, _key_id: &str, _input: &[u8]) -> Result<Vec<u8>> {
        Err(UspError::NotSupported("no HSM provider configured".into()))
    }
}
