//! Seal / master-key manager (C2): `Uninitialized -> Sealed <-> Unsealed`.
//!
//! The unsealed master key lives in a single guarded, zeroizable cell.
//! Readers copy it into a local buffer just long enough for one AES-GCM
//! call; the cell is cleared on seal.

use crate::error::{Result, UspError};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Instant;
use usp_crypto::{shamir, Share};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealState {
    Uninitialized,
    Sealed,
    Unsealed,
}

#[derive(Debug, Clone)]
pub struct SealStatus {
    pub sealed: bool,
    pub initialized: bool,
    pub progress: usize,
    pub threshold: u8,
    pub shares: u8,
}

#[derive(Debug, Clone)]
struct SealConfigRow {
    shares: u8,
    threshold: u8,
    /// KEK-wrapped master key: `nonce || tag || ciphertext`, produced by
    /// `usp_crypto::aead` directly (no envelope string needed internally).
    encrypted_master_key: Vec<u8>,
    nonce: [u8; 12],
    version: u32,
}

/// Per-source token bucket, guarding repeated invalid unseal attempts.
/// Mirrors the request-rate-limiting idiom used elsewhere in this codebase,
/// keyed by an opaque source identifier instead of a client IP.
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

struct UnsealRateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    rate_per_sec: f64,
    burst: u32,
}

impl UnsealRateLimiter {
    fn new(rate_per_sec: f64, burst: u32) -> Self {
        Self { buckets: Mutex::new(HashMap::new()), rate_per_sec, burst }
    }

    fn check(&self, source: &str) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        let now = Instant::now();
        let bucket = buckets.entry(source.to_string()).or_insert_with(|| TokenBucket {
            tokens: self.burst as f64,
            last_refill: now,
        });
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst as f64);
        bucket.last_refill = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct UnsealProgress {
    collected: Vec<Share>,
}

pub struct SealManager {
    kek: Zeroizing<[u8; 32]>,
    config: RwLock<Option<SealConfigRow>>,
    master_key: RwLock<Option<Zeroizing<[u8; 32]>>>,
    progress: Mutex<UnsealProgress>,
    rate_limiter: UnsealRateLimiter,
}

impl SealManager {
    pub fn new(kek: [u8; 32]) -> Self {
        Self {
            kek: Zeroizing::new(kek),
            config: RwLock::new(None),
            master_key: RwLock::new(None),
            progress: Mutex::new(UnsealProgress { collected: Vec::new() }),
            rate_limiter: UnsealRateLimiter::new(1.0, 10),
        }
    }

    pub fn state(&self) -> SealState {
        if self.config.read().unwrap().is_none() {
            return SealState::Uninitialized;
        }
        if self.master_key.read().unwrap().is_some() {
            SealState::Unsealed
        } else {
            SealState::Sealed
        }
    }

    /// Generate a master key, split it into `n` shares at `threshold`, wrap
    /// it under the KEK, and persist the config row. Returns the shares
    /// exactly once; no copy is retained.
    pub fn init(&self, shares: u8, threshold: u8) -> Result<Vec<Share>> {
        if self.config.read().unwrap().is_some() {
            return Err(UspError::AlreadyInitialized);
        }
        if threshold == 0 || threshold > shares || shares == 0 {
            return Err(UspError::ValidationError("1 <= threshold <= shares <= 255".into()));
        }

        let master_key = usp_crypto::rand::random_32()?;
        let split_shares = shamir::split(&master_key, shares, threshold)?;

        let nonce = usp_crypto::aead::nonce()?;
        let encrypted_master_key = usp_crypto::aead::seal(&self.kek, &nonce, &master_key, b"usp-seal-config")?;

        *self.config.write().unwrap() = Some(SealConfigRow {
            shares,
            threshold,
            encrypted_master_key,
            nonce,
            version: 1,
        });

        tracing::info!(shares, threshold, "seal: initialized");
        Ok(split_shares)
    }

    /// Feed one share into the current unseal attempt. Duplicate shares
    /// (by x-coordinate) are ignored. `source` identifies the caller for
    /// the invalid-share rate limiter (a client IP, node id, whatever the
    /// deployment uses to distinguish attackers from each other).
    pub fn unseal(&self, share: Share, source: &str) -> Result<SealStatus> {
        let config_guard = self.config.read().unwrap();
        let config = config_guard.as_ref().ok_or(UspError::NotInitialized)?;

        if self.master_key.read().unwrap().is_some() {
            return Ok(self.status());
        }

        let mut progress = self.progress.lock().unwrap();
        if !progress.collected.iter().any(|s| s.x == share.x) {
            progress.collected.push(share);
        }

        if progress.collected.len() < config.threshold as usize {
            let status = SealStatus {
                sealed: true,
                initialized: true,
                progress: progress.collected.len(),
                threshold: config.threshold,
                shares: config.shares,
            };
            return Ok(status);
        }

        let reconstructed = shamir::combine(&progress.collected)?;
        let decrypted = usp_crypto::aead::open(&self.kek, &config.nonce, &config.encrypted_master_key, b"usp-seal-config");

        match decrypted {
            Ok(expected) if expected.as_slice() == reconstructed.as_slice() => {
                drop(config_guard);
                *self.master_key.write().unwrap() = Some(Zeroizing::new(reconstructed));
                progress.collected.clear();
                tracing::info!("seal: unsealed");
                Ok(self.status())
            }
            _ => {
                progress.collected.clear();
                if !self.rate_limiter.check(source) {
                    tracing::warn!(source, "seal: invalid-share rate limit exceeded");
                    return Err(UspError::RateLimited);
                }
                tracing::warn!("seal: invalid shares, progress reset");
                Err(UspError::InvalidShares)
            }
        }
    }

    pub fn seal(&self) {
        *self.master_key.write().unwrap() = None;
        self.progress.lock().unwrap().collected.clear();
        tracing::info!("seal: sealed");
    }

    pub fn status(&self) -> SealStatus {
        let config = self.config.read().unwrap();
        match config.as_ref() {
            None => SealStatus { sealed: true, initialized: false, progress: 0, threshold: 0, shares: 0 },
            Some(c) => SealStatus {
                sealed: self.master_key.read().unwrap().is_none(),
                initialized: true,
                progress: self.progress.lock().unwrap().collected.len(),
                threshold: c.threshold,
                shares: c.shares,
            },
        }
    }

    /// Re-split the existing master key under a new polynomial. Requires
    /// `Unsealed`.
    pub fn rekey(&self, new_shares: u8, new_threshold: u8) -> Result<Vec<Share>> {
        let master_key_guard = self.master_key.read().unwrap();
        let master_key = master_key_guard.as_ref().ok_or(UspError::VaultSealed)?;
        if new_threshold == 0 || new_threshold > new_shares {
            return Err(UspError::ValidationError("1 <= threshold <= shares <= 255".into()));
        }

        let split_shares = shamir::split(master_key, new_shares, new_threshold)?;
        let nonce = usp_crypto::aead::nonce()?;
        let encrypted_master_key = usp_crypto::aead::seal(&self.kek, &nonce, master_key, b"usp-seal-config")?;

        let mut config = self.config.write().unwrap();
        let version = config.as_ref().map(|c| c.version + 1).unwrap_or(1);
        *config = Some(SealConfigRow { shares: new_shares, threshold: new_threshold, encrypted_master_key, nonce, version });

        tracing::info!(new_shares, new_threshold, version, "seal: rekeyed");
        Ok(split_shares)
    }

    /// Run a closure with a short-lived copy of the master key. Fails with
    /// `VaultSealed` if not unsealed; this is the only way any other
    /// component ever touches master-key bytes.
    pub fn with_master_key<R>(&self, f: impl FnOnce(&[u8; 32]) -> Result<R>) -> Result<R> {
        let guard = self.master_key.read().unwrap();
        let key = guard.as_ref().ok_or(UspError::VaultSealed)?;
        f(key)
    }
}
