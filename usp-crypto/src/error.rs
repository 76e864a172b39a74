//! Error types for the crypto primitives layer.

use core::fmt;

/// A cryptographic operation failed. Deliberately uninformative: callers get
/// a single opaque failure so that encoding bugs and authentication failures
/// look identical to an attacker probing the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoError;

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cryptographic operation failed")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CryptoError {}

/// A hash or signature algorithm that isn't in the supported allowlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsupportedAlgorithm(pub &'static str);

impl fmt::Display for UnsupportedAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported algorithm: {}", self.0)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for UnsupportedAlgorithm {}

impl From<UnsupportedAlgorithm> for CryptoError {
    fn from(_: UnsupportedAlgorithm) -> Self {
        CryptoError
    }
}
