//! Cryptographic primitives shared by the security services
//!
//! This module collects the small building blocks the rest of the crate
//! composes: OS randomness, SHA-256 key derivation, keyed search hashes and
//! constant-time comparison.
//!
//! # Security
//!
//! Code and hash comparison is vulnerable to timing attacks when using
//! standard string comparison because the comparison may exit early on the
//! first mismatch. All comparisons of secret-derived values go through
//! [`constant_time_compare`], which is backed by the `subtle` crate.

use rand::{TryRngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Fill a fixed-size array with bytes from the OS random number generator.
///
/// # Panics
///
/// Panics if the OS random number generator fails. This indicates a critical
/// system failure (e.g., /dev/urandom unavailable) from which recovery is not
/// possible for security-sensitive operations.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng
        .try_fill_bytes(&mut bytes)
        .expect("OS RNG failure - system entropy source unavailable");
    bytes
}

/// Reduce an arbitrary-length secret to a 256-bit key with SHA-256.
pub fn derive_key(secret: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret);
    hasher.finalize().into()
}

/// Hash `input` keyed by `key` for equality lookups.
///
/// The digest is SHA-256 over `key ‖ input`, hex encoded. The output is
/// deterministic for a given key, so it can be stored next to an encrypted
/// column and compared without decrypting.
pub fn keyed_hash(key: &[u8], input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Perform constant-time comparison of two byte slices.
///
/// This function uses the `subtle` crate to ensure the comparison takes
/// the same amount of time regardless of where (or if) the bytes differ.
///
/// # Returns
///
/// `true` if the slices are equal, `false` otherwise
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
