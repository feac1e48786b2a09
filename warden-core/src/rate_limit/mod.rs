//! Request rate limiting by caller class
//!
//! [`RateLimiter`] applies one of three general policies depending on who is
//! calling, plus a separate, stricter policy for the login and registration
//! endpoints. The auth endpoint policy uses its own [`SlidingWindowLimiter`]
//! so traffic against it never consumes the general budget, and vice versa.
//!
//! | Caller class    | Default limit |
//! | --------------- | ------------- |
//! | `Anonymous`     | 30 / minute   |
//! | `Authenticated` | 60 / minute   |
//! | `Privileged`    | 120 / minute  |
//! | auth endpoints  | 5 / minute    |

pub mod window;

pub use window::{Admission, RateWindowEntry, SlidingWindowLimiter};

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::{
    clock::SharedClock, error::RateLimitError, identity::normalize_identity,
    policy::TrustPolicy,
};

/// Who is making a request, as far as rate limiting is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerClass {
    Anonymous,
    Authenticated,
    /// Authenticated caller on the privileged (paid) tier
    Privileged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub const fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            window: Duration::minutes(1),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Configuration for the rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub anonymous: RateLimitPolicy,
    pub authenticated: RateLimitPolicy,
    pub privileged: RateLimitPolicy,
    /// Policy for login and registration, independent of the others
    pub auth_endpoint: RateLimitPolicy,
    /// Identities idle for longer than this are evicted by the sweep
    pub idle_eviction: Duration,
    /// How often the eviction sweep runs
    pub sweep_interval: std::time::Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            anonymous: RateLimitPolicy::per_minute(30),
            authenticated: RateLimitPolicy::per_minute(60),
            privileged: RateLimitPolicy::per_minute(120),
            auth_endpoint: RateLimitPolicy::per_minute(5),
            idle_eviction: Duration::minutes(10),
            sweep_interval: std::time::Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn policy_for(&self, class: CallerClass) -> RateLimitPolicy {
        match class {
            CallerClass::Anonymous => self.anonymous,
            CallerClass::Authenticated => self.authenticated,
            CallerClass::Privileged => self.privileged,
        }
    }

    /// Apply the same window length to every policy.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.anonymous = self.anonymous.with_window(window);
        self.authenticated = self.authenticated.with_window(window);
        self.privileged = self.privileged.with_window(window);
        self.auth_endpoint = self.auth_endpoint.with_window(window);
        self
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub retry_after_seconds: Option<i64>,
}

impl RateDecision {
    fn trusted(limit: u32) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            retry_after_seconds: None,
        }
    }

    fn from_admission(limit: u32, admission: Admission) -> Self {
        Self {
            allowed: admission.allowed,
            limit,
            remaining: admission.remaining,
            retry_after_seconds: admission
                .retry_after
                .map(|d| (d.num_milliseconds() + 999) / 1000),
        }
    }

    /// Convert a rejection into [`RateLimitError::TooManyRequests`].
    pub fn into_result(self) -> Result<Self, RateLimitError> {
        if self.allowed {
            Ok(self)
        } else {
            Err(RateLimitError::TooManyRequests {
                retry_after_seconds: self.retry_after_seconds.unwrap_or(1).max(1),
            })
        }
    }
}

pub struct RateLimiter {
    general: SlidingWindowLimiter,
    auth: SlidingWindowLimiter,
    config: RateLimitConfig,
    trust: TrustPolicy,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, trust: TrustPolicy, clock: SharedClock) -> Self {
        Self {
            general: SlidingWindowLimiter::new(Arc::clone(&clock)),
            auth: SlidingWindowLimiter::new(clock),
            config,
            trust,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check a general request for `identity` under the policy of `class`.
    pub fn check(&self, identity: &str, class: CallerClass) -> RateDecision {
        let policy = self.config.policy_for(class);
        self.check_with(&self.general, identity, policy)
    }

    /// Check a login or registration request for `identity`.
    pub fn check_auth_endpoint(&self, identity: &str) -> RateDecision {
        self.check_with(&self.auth, identity, self.config.auth_endpoint)
    }

    fn check_with(
        &self,
        limiter: &SlidingWindowLimiter,
        identity: &str,
        policy: RateLimitPolicy,
    ) -> RateDecision {
        if self.trust.is_trusted(identity) {
            tracing::debug!(identity = identity, "Trusted source bypassed rate limiting");
            return RateDecision::trusted(policy.limit);
        }

        let key = normalize_identity(identity);
        let decision = RateDecision::from_admission(
            policy.limit,
            limiter.admit(&key, policy.limit, policy.window),
        );

        if !decision.allowed {
            tracing::warn!(
                identity = %key,
                limit = policy.limit,
                retry_after_seconds = decision.retry_after_seconds,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Evict idle identities from both limiters. Returns the number evicted.
    pub fn evict_idle(&self) -> usize {
        self.general.evict_idle(self.config.idle_eviction)
            + self.auth.evict_idle(self.config.idle_eviction)
    }

    /// Number of identities tracked across both limiters.
    pub fn tracked_identities(&self) -> usize {
        self.general.len() + self.auth.len()
    }

    /// Start the background eviction sweep.
    ///
    /// The sweep runs on its own timer, independent of the scheduler, until
    /// `shutdown` flips.
    pub fn start_eviction_task(
        self: &Arc<Self>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(period);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        let evicted = limiter.evict_idle();
                        if evicted > 0 {
                            tracing::debug!(evicted = evicted, "Evicted idle rate limit windows");
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down rate limiter eviction task");
                        break;
                    }
                }
            }
        })
    }
}
