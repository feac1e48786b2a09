//! Time-based one-time passwords
//!
//! Codes are six digits over a 30 second step, computed with HMAC-SHA1 over
//! the big-endian step counter and dynamic truncation (RFC 6238 / RFC 4226).
//! Secrets are 160 bits of OS randomness, base32 encoded without padding.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use warden_core::totp;
//!
//! let secret = totp::generate_secret();
//! let now = Utc::now();
//! let code = totp::code_at(&secret, totp::current_step(now)).unwrap();
//! assert!(totp::verify(&secret, &code, now).unwrap());
//! ```

use chrono::{DateTime, Utc};
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::{
    crypto::{constant_time_compare, random_bytes},
    error::MfaError,
};

pub const SECRET_BYTES: usize = 20;
pub const DIGITS: usize = 6;
pub const STEP_SECONDS: i64 = 30;

/// Steps either side of the current one that are still accepted.
pub const ALLOWED_SKEW: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotpConfig {
    /// Issuer shown by authenticator apps
    pub issuer: String,
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self {
            issuer: "Warden".to_string(),
        }
    }
}

pub fn generate_secret() -> String {
    BASE32_NOPAD.encode(&random_bytes::<SECRET_BYTES>())
}

/// Decode a base32 secret. Whitespace, padding and lowercase are tolerated.
pub fn decode_secret(secret: &str) -> Result<Vec<u8>, MfaError> {
    let cleaned: String = secret
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .trim_end_matches('=')
        .to_ascii_uppercase();

    if cleaned.is_empty() {
        return Err(MfaError::InvalidSecret);
    }

    BASE32_NOPAD
        .decode(cleaned.as_bytes())
        .map_err(|_| MfaError::InvalidSecret)
}

/// Time step containing `at`.
pub fn current_step(at: DateTime<Utc>) -> u64 {
    at.timestamp().div_euclid(STEP_SECONDS).max(0) as u64
}

fn hotp(key: &[u8], counter: u64) -> Result<u32, MfaError> {
    let mut mac = Hmac::<Sha1>::new_from_slice(key).map_err(|_| MfaError::InvalidSecret)?;
    mac.update(&counter.to_be_bytes());
    let hash = mac.finalize().into_bytes();

    let offset = (hash[hash.len() - 1] & 0x0f) as usize;
    let bin_code = ((hash[offset] as u32 & 0x7f) << 24)
        | ((hash[offset + 1] as u32) << 16)
        | ((hash[offset + 2] as u32) << 8)
        | (hash[offset + 3] as u32);

    Ok(bin_code % 10u32.pow(DIGITS as u32))
}

/// Code for `secret` at the given time step.
pub fn code_at(secret: &str, step: u64) -> Result<String, MfaError> {
    let key = decode_secret(secret)?;
    let code = hotp(&key, step)?;
    Ok(format!("{code:0width$}", width = DIGITS))
}

/// Whether `code` is exactly six ASCII digits.
pub fn is_valid_code_format(code: &str) -> bool {
    code.len() == DIGITS && code.bytes().all(|b| b.is_ascii_digit())
}

/// Check `code` against the step containing `at` and its neighbours.
///
/// Every candidate step is compared, in constant time, even after a match.
pub fn verify(secret: &str, code: &str, at: DateTime<Utc>) -> Result<bool, MfaError> {
    if !is_valid_code_format(code) {
        return Ok(false);
    }

    let key = decode_secret(secret)?;
    let step = current_step(at);

    let mut matched = false;
    for offset in -ALLOWED_SKEW..=ALLOWED_SKEW {
        let Some(candidate) = step.checked_add_signed(offset) else {
            continue;
        };
        let expected = format!("{:0width$}", hotp(&key, candidate)?, width = DIGITS);
        matched |= constant_time_compare(expected.as_bytes(), code.as_bytes());
    }

    Ok(matched)
}

/// Provisioning URL understood by authenticator apps.
pub fn otpauth_url(issuer: &str, account: &str, secret: &str) -> String {
    let label = format!("{issuer}:{account}");
    format!(
        "otpauth://totp/{}?secret={}&issuer={}&algorithm=SHA1&digits={}&period={}",
        urlencoding::encode(&label),
        secret,
        urlencoding::encode(issuer),
        DIGITS,
        STEP_SECONDS
    )
}

/// Split a secret into space separated groups of four for manual entry.
pub fn format_secret_for_display(secret: &str) -> String {
    secret
        .as_bytes()
        .chunks(4)
        .map(|chunk| String::from_utf8_lossy(chunk))
        .collect::<Vec<_>>()
        .join(" ")
}
