//! Privileged access management (C8/C9): safes, managed accounts, credential
//! rotation, checkout with approval routing, session command recording, and
//! just-in-time grants.

pub mod account;
pub mod checkout;
pub mod jit;
pub mod rotation;
pub mod safe;
pub mod session_recording;

pub use account::{Account, AccountManager, AccountStatus, AccountStore, ApprovalGate, NewAccount, Platform, RevealedSecret};
pub use checkout::{ApprovalPolicy, Checkout, CheckoutManager, CheckoutOutcome, CheckoutState, CheckoutStore};
pub use jit::{JitGrant, JitGrantStatus, JitManager, JitRequest, JitTemplate};
pub use rotation::{ConnectorRegistry, RecoveryStrategy, RevertRecoveryStrategy, RotationEngine};
pub use safe::{NewSafe, Safe, SafeManager, SafePermission, SafeStore};
pub use session_recording::{ExportFormat, SessionCommand, SessionRecorder};
