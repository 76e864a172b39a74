//! Second-factor verification: TOTP, SMS/email OTP, WebAuthn, backup codes,
//! hardware OTP, and push approval. WebAuthn ceremony transport, hardware OTP
//! delivery, and push transport are all delegated to an injected provider
//! capability, not implemented here.

use crate::auth::password::PasswordHash;
use crate::error::{Result, UspError};
use crate::provider::{HardwareOtpVerifier, OtpDeliverer, PushApprover, WebAuthnVerifier};
use crate::types::{now, ApprovalId, UserId};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use totp_rs::{Algorithm, TOTP};
use zeroize::Zeroizing;

const OTP_TTL_MINUTES: i64 = 10;
const TOTP_STEP_SECS: u64 = 30;
const TOTP_SKEW_STEPS: u8 = 1;
const TOTP_DIGITS: usize = 6;

#[derive(Clone)]
pub struct TotpEnrollment {
    secret: Zeroizing<Vec<u8>>,
}

impl TotpEnrollment {
    /// Generate a fresh random secret for a user enrolling a TOTP app.
    pub fn generate() -> Result<Self> {
        let mut bytes = vec![0u8; 20];
        usp_crypto::rand::fill(&mut bytes)?;
        Ok(Self { secret: Zeroizing::new(bytes) })
    }

    pub(crate) fn totp(&self) -> Result<TOTP> {
        TOTP::new(Algorithm::SHA1, TOTP_DIGITS, TOTP_SKEW_STEPS, TOTP_STEP_SECS, self.secret.to_vec())
            .map_err(|e| UspError::ValidationError(e.to_string()))
    }

    pub fn verify(&self, code: &str) -> Result<bool> {
        let totp = self.totp()?;
        let timestamp = now().timestamp() as u64;
        Ok(totp.check(code, timestamp))
    }
}

#[derive(Clone)]
pub struct BackupCode {
    hash: PasswordHash,
    used: bool,
}

impl BackupCode {
    pub fn new(plaintext: &str) -> Result<Self> {
        Ok(Self { hash: PasswordHash::new(plaintext)?, used: false })
    }
}

#[derive(Clone, Default)]
pub struct MfaEnrollment {
    pub totp: Option<TotpEnrollment>,
    pub backup_codes: Vec<BackupCode>,
    pub webauthn_credential_id: Option<String>,
    pub hardware_otp_serial: Option<String>,
    pub otp_destination: Option<String>,
    pub push_enabled: bool,
}

struct PendingOtp {
    hash: PasswordHash,
    expires_at: DateTime<Utc>,
    consumed: bool,
}

fn random_numeric_code(digits: usize) -> Result<String> {
    let mut buf = vec![0u8; digits];
    usp_crypto::rand::fill(&mut buf)?;
    Ok(buf.iter().map(|b| char::from(b'0' + (b % 10)).to_string()).collect())
}

/// Tracks in-flight SMS/email OTP challenges. TOTP, backup codes, WebAuthn,
/// hardware OTP, and push are stateless from this type's point of view (the
/// per-factor secret or provider call carries its own state).
pub struct MfaVerifier {
    pending_otp: Mutex<HashMap<UserId, PendingOtp>>,
}

impl MfaVerifier {
    pub fn new() -> Self {
        Self { pending_otp: Mutex::new(HashMap::new()) }
    }

    pub fn issue_otp(&self, user_id: UserId, deliverer: &dyn OtpDeliverer, destination: &str) -> Result<()> {
        let code = random_numeric_code(TOTP_DIGITS)?;
        let hash = PasswordHash::new(&code)?;
        self.pending_otp.lock().unwrap().insert(user_id, PendingOtp { hash, expires_at: now() + Duration::minutes(OTP_TTL_MINUTES), consumed: false });
        deliverer.deliver(destination, &code)?;
        Ok(())
    }

    pub fn verify_otp(&self, user_id: UserId, code: &str) -> bool {
        let mut pending = self.pending_otp.lock().unwrap();
        let entry = match pending.get_mut(&user_id) {
            Some(e) => e,
            None => return false,
        };
        if entry.consumed || now() > entry.expires_at {
            return false;
        }
        let ok = entry.hash.verify(code);
        if ok {
            entry.consumed = true;
        }
        ok
    }

    pub fn verify_backup_code(&self, enrollment: &mut MfaEnrollment, code: &str) -> bool {
        for backup_code in enrollment.backup_codes.iter_mut() {
            if !backup_code.used && backup_code.hash.verify(code) {
                backup_code.used = true;
                return true;
            }
        }
        false
    }

    pub fn verify_webauthn(&self, verifier: &dyn WebAuthnVerifier, credential_id: &str, assertion: &[u8], challenge: &[u8]) -> Result<bool> {
        verifier.verify_assertion(credential_id, assertion, challenge)
    }

    pub fn verify_hardware_otp(&self, verifier: &dyn HardwareOtpVerifier, serial: &str, code: &str) -> Result<bool> {
        verifier.verify(serial, code)
    }

    pub fn verify_push(&self, approver: &dyn PushApprover, approval_id: ApprovalId) -> Result<bool> {
        Ok(approver.poll_approval(approval_id)?.unwrap_or(false))
    }
}

impl Default for MfaVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Which second factor a login is attempting to satisfy.
pub enum MfaAttempt<'a> {
    Totp { code: &'a str },
    Otp { code: &'a str },
    BackupCode { code: &'a str },
    WebAuthn { assertion: &'a [u8], challenge: &'a [u8] },
    HardwareOtp { code: &'a str },
    Push { approval_id: ApprovalId },
}
