//! The closed error taxonomy every component maps into. Cryptographic and
//! policy errors are never downgraded to `Internal`; everything a caller can
//! see is one of these stable, classifiable variants.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UspError {
    #[error("vault is sealed")]
    VaultSealed,
    #[error("not initialized")]
    NotInitialized,
    #[error("already initialized")]
    AlreadyInitialized,
    #[error("invalid shares")]
    InvalidShares,
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("check-and-set mismatch")]
    CasMismatch,
    #[error("invalid state for this operation")]
    InvalidState,
    #[error("unauthenticated")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("mfa required")]
    MfaRequired,
    #[error("step-up authentication required")]
    StepUpRequired,
    #[error("account locked out")]
    LockedOut,
    #[error("rate limited")]
    RateLimited,
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("integrity error: {0}")]
    IntegrityError(String),
    #[error("external provider error: {0}")]
    ExternalError(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("internal error")]
    Internal,
}

impl UspError {
    /// The stable taxonomy code, independent of the `Display` message.
    pub fn code(&self) -> &'static str {
        match self {
            UspError::VaultSealed => "VaultSealed",
            UspError::NotInitialized => "NotInitialized",
            UspError::AlreadyInitialized => "AlreadyInitialized",
            UspError::InvalidShares => "InvalidShares",
            UspError::NotFound => "NotFound",
            UspError::AlreadyExists => "AlreadyExists",
            UspError::CasMismatch => "CasMismatch",
            UspError::InvalidState => "InvalidState",
            UspError::Unauthorized => "Unauthorized",
            UspError::Forbidden => "Forbidden",
            UspError::MfaRequired => "MfaRequired",
            UspError::StepUpRequired => "StepUpRequired",
            UspError::LockedOut => "LockedOut",
            UspError::RateLimited => "RateLimited",
            UspError::ValidationError(_) => "ValidationError",
            UspError::IntegrityError(_) => "IntegrityError",
            UspError::ExternalError(_) => "ExternalError",
            UspError::NotSupported(_) => "NotSupported",
            UspError::Internal => "Internal",
        }
    }
}

impl From<usp_crypto::CryptoError> for UspError {
    fn from(_: usp_crypto::CryptoError) -> Self {
        UspError::IntegrityError("cryptographic operation failed".into())
    }
}

impl From<usp_crypto::UnsupportedAlgorithm> for UspError {
    fn from(e: usp_crypto::UnsupportedAlgorithm) -> Self {
        UspError::NotSupported(e.0.to_string())
    }
}

pub type Result<T> = std::result::Result<T, UspError>;
