//! Core functionality for the warden project
//!
//! This crate contains the security services of the control plane: request
//! rate limiting, brute-force protection with an identity blocklist, TOTP
//! multi-factor authentication, field-level encryption, signed tokens with a
//! revocation list and the scheduled security task runner.
//!
//! Storage is abstracted behind the traits in [`repositories`]. Backends such
//! as `warden-storage-memory` implement them, and application code normally
//! uses the `warden` crate, which wires everything together.
//!
//! See [`RateLimiter`], [`BruteForceGuard`], [`MfaService`],
//! [`FieldEncryption`], [`TokenService`] and [`SecurityScheduler`].
//!
pub mod clock;
pub mod crypto;
pub mod error;
pub mod events;
pub mod identity;
pub mod policy;
pub mod rate_limit;
pub mod repositories;
pub mod scheduler;
pub mod services;
pub mod storage;
pub mod token;
pub mod totp;

pub use clock::{Clock, MockClock, SharedClock, SystemClock};
pub use error::Error;
pub use events::{EventBus, EventHandler, SecurityEvent, Severity};
pub use identity::UserId;
pub use policy::{LookupPolicy, TrustPolicy};
pub use rate_limit::{CallerClass, RateDecision, RateLimitConfig, RateLimiter};
pub use repositories::{
    BruteForceRepository, CredentialRepository, RepositoryProvider,
};
pub use scheduler::{SchedulerConfig, SecurityScheduler, TaskType};
pub use services::{BruteForceGuard, FieldEncryption, MfaService};
pub use storage::{BlockedIdentity, CredentialRecord, LoginAttemptRecord};
pub use token::{TokenBlacklist, TokenClaims, TokenConfig, TokenService, TokenType};
