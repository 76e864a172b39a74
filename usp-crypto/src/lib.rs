//! # usp-crypto
//!
//! Cryptographic primitives for the unified security platform: AES-256-GCM,
//! HKDF-SHA256, HMAC-SHA256/512, RSA/ECDSA/Ed25519 signing, CSPRNG helpers,
//! Shamir secret sharing over GF(2^8), and the self-describing `vault:v...`
//! wire envelopes.
//!
//! ## What's NOT provided
//!
//! - Key lifecycle (generation policy, rotation, storage) — see `usp-core`.
//! - Novel cryptographic constructions: every primitive here is a
//!   well-known, widely reviewed algorithm.
//! - FIPS certification.

#![deny(unsafe_code)]

pub mod aead;
pub mod envelope;
pub mod error;
pub mod gf256;
pub mod kdf;
pub mod rand;
pub mod shamir;
pub mod signing;

pub use envelope::{CiphertextEnvelope, TaggedEnvelope, WireAlg};
pub use error::{CryptoError, UnsupportedAlgorithm};
pub use shamir::{Share, SECRET_BYTES};
