//! Explicit decision policies for security checks
//!
//! [`LookupPolicy`] decides what a check returns when the state it depends on
//! cannot be read. [`TrustPolicy`] decides which sources skip threat checks
//! entirely. Both are values handed to the services at construction time so
//! the choice is visible in one place.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Outcome to assume when a lookup fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnError {
    /// Treat the check as passed (do not block).
    FailOpen,
    /// Treat the check as failed (block).
    FailClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupPolicy {
    pub on_error: OnError,
}

impl LookupPolicy {
    pub const fn fail_open() -> Self {
        Self {
            on_error: OnError::FailOpen,
        }
    }

    pub const fn fail_closed() -> Self {
        Self {
            on_error: OnError::FailClosed,
        }
    }

    /// Resolve a "does this match?" lookup into a final answer.
    ///
    /// A positive match is always honoured; only errors are subject to the
    /// policy. Errors are logged with the name of the check that produced them.
    pub fn resolve<E: std::fmt::Display>(&self, check: &str, result: Result<bool, E>) -> bool {
        match result {
            Ok(matched) => matched,
            Err(e) => {
                let matched = self.on_error == OnError::FailClosed;
                tracing::warn!(
                    check = check,
                    error = %e,
                    fail_closed = matched,
                    "Security lookup failed, applying lookup policy"
                );
                matched
            }
        }
    }
}

/// Which request sources may bypass rate limiting and blocking.
///
/// The default trusts nobody. [`TrustPolicy::loopback`] is meant for local
/// development only; the facade refuses to build it outside a development
/// environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustPolicy {
    trust_loopback: bool,
}

impl TrustPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn loopback() -> Self {
        Self {
            trust_loopback: true,
        }
    }

    pub fn trusts_loopback(&self) -> bool {
        self.trust_loopback
    }

    pub fn is_trusted(&self, identity: &str) -> bool {
        if !self.trust_loopback {
            return false;
        }

        let identity = identity.trim();
        if identity.eq_ignore_ascii_case("localhost") {
            return true;
        }

        identity
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
    }
}
