//! Service layer for security decisions
//!
//! This module contains the concrete services that hold the brute-force,
//! MFA and field encryption logic. Storage is reached only through the
//! repository traits.

pub mod brute_force;
pub mod encryption;
pub mod mfa;

pub use brute_force::{BruteForceCheck, BruteForceConfig, BruteForceGuard};
pub use encryption::{Decryption, FieldEncryption, MIN_KEY_LENGTH};
pub use mfa::{MfaEnrollment, MfaService, MfaStatus};
