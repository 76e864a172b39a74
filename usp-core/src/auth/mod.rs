//! Authentication & session core (C7): login pipeline, risk assessment,
//! second-factor verification, and step-up sessions.

pub mod mfa;
pub mod password;
pub mod risk;
pub mod session;

pub use mfa::{BackupCode, MfaAttempt, MfaEnrollment, MfaVerifier, TotpEnrollment};
pub use password::PasswordHash;
pub use risk::{LoginContext, RiskAssessment, RiskEngine, RiskFactor, RiskLevel};
pub use session::{AccessClaims, LoginOutcome, LoginRequest, MfaProviders, RefreshOutcome, Session, SessionManager, UserRecord};
