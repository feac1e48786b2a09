//! Identities the security services key their state by
//!
//! Rate windows, blocks and login attempts are keyed by a free-form identity
//! string (an IP address or an email). Credentials and tokens are keyed by a
//! [`UserId`]. User ids are generated with a prefix, similar to Stripe's API,
//! and carry at least 96 bits of entropy.

use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::crypto::random_bytes;

/// Generate a prefixed ID with 96 bits of entropy
///
/// The ID format is: `{prefix}_{random_string}`
/// Where the random string is base64 URL-safe encoded without padding.
///
/// # Example
/// ```
/// use warden_core::identity::generate_prefixed_id;
///
/// let user_id = generate_prefixed_id("usr");
/// assert!(user_id.starts_with("usr_"));
/// ```
pub fn generate_prefixed_id(prefix: &str) -> String {
    let encoded = BASE64_URL_SAFE_NO_PAD.encode(random_bytes::<12>());
    format!("{prefix}_{encoded}")
}

/// Normalize an email or IP identity before it is used as a map key.
pub fn normalize_identity(identity: &str) -> String {
    identity.trim().to_ascii_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: &str) -> Self {
        UserId(id.to_string())
    }

    pub fn new_random() -> Self {
        UserId(generate_prefixed_id("usr"))
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new_random()
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
