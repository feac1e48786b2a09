pub mod utilities;

use thiserror::Error;

use crate::scheduler::TaskType;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("MFA error: {0}")]
    Mfa(#[from] MfaError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),
}

/// Rejections produced by the rate limiter and the brute-force guard.
///
/// Every variant renders the same message so callers cannot tell a block
/// from a rate limit.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Too many requests")]
    TooManyRequests { retry_after_seconds: i64 },

    #[error("Too many requests")]
    Blocked { retry_after_seconds: i64 },
}

impl RateLimitError {
    pub fn retry_after_seconds(&self) -> i64 {
        match self {
            RateLimitError::TooManyRequests {
                retry_after_seconds,
            }
            | RateLimitError::Blocked {
                retry_after_seconds,
            } => *retry_after_seconds,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MfaError {
    #[error("User not found")]
    UnknownIdentity,

    #[error("MFA is not set up for this account")]
    NotEnrolled,

    #[error("MFA code must be 6 digits")]
    InvalidCodeFormat,

    #[error("Invalid MFA code")]
    InvalidCode,

    #[error("MFA is not enabled for this account")]
    NotEnabled,

    #[error("MFA is already enabled for this account")]
    AlreadyEnabled,

    #[error("Invalid MFA secret")]
    InvalidSecret,
}

/// Token validation failures.
///
/// The display text is identical for every variant; the variant itself is
/// only meant for logs and tests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Invalid token")]
    Malformed,

    #[error("Invalid token")]
    Expired,

    #[error("Invalid token")]
    Revoked,

    #[error("Invalid token")]
    WrongType,

    #[error("Token signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption key must be at least {min} characters")]
    KeyTooShort { min: usize },

    #[error("Encryption is disabled")]
    Disabled,

    #[error("Encryption failed")]
    Encryption,

    #[error("Decryption failed")]
    Decryption,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("Task is not registered: {0}")]
    NotRegistered(TaskType),

    #[error("Task is disabled: {0}")]
    TaskDisabled(TaskType),

    #[error("Task already registered: {0}")]
    AlreadyRegistered(TaskType),

    #[error("Scheduler is already running")]
    AlreadyRunning,
}

/// Failure reported by a scheduled task routine.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("Task was cancelled")]
    Cancelled,
}

impl From<Error> for TaskError {
    fn from(error: Error) -> Self {
        TaskError::Failed(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Record not found")]
    NotFound,

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Secret {key} must be at least {min} characters")]
    SecretTooShort { key: String, min: usize },
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Event bus error: {0}")]
    BusError(String),

    #[error("Event handler error: {0}")]
    HandlerError(String),
}

impl Error {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimit(_))
    }

    pub fn is_mfa_error(&self) -> bool {
        matches!(self, Error::Mfa(_))
    }

    pub fn is_token_error(&self) -> bool {
        matches!(self, Error::Token(_))
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::Mfa(MfaError::InvalidCodeFormat)
                | Error::Config(ConfigError::InvalidValue { .. })
        )
    }

    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    pub fn is_crypto_error(&self) -> bool {
        matches!(self, Error::Crypto(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let token_error = Error::Token(TokenError::Revoked);
        assert_eq!(token_error.to_string(), "Token error: Invalid token");

        let storage_error = Error::Storage(StorageError::NotFound);
        assert_eq!(storage_error.to_string(), "Storage error: Record not found");

        let config_error = Error::Config(ConfigError::SecretTooShort {
            key: "WARDEN_JWT_SECRET".to_string(),
            min: 32,
        });
        assert_eq!(
            config_error.to_string(),
            "Configuration error: Secret WARDEN_JWT_SECRET must be at least 32 characters"
        );
    }

    #[test]
    fn test_token_errors_do_not_leak_reason() {
        for error in [
            TokenError::Malformed,
            TokenError::Expired,
            TokenError::Revoked,
            TokenError::WrongType,
        ] {
            assert_eq!(error.to_string(), "Invalid token");
        }
    }

    #[test]
    fn test_rate_limit_errors_share_message() {
        let limited = RateLimitError::TooManyRequests {
            retry_after_seconds: 12,
        };
        let blocked = RateLimitError::Blocked {
            retry_after_seconds: 1800,
        };
        assert_eq!(limited.to_string(), blocked.to_string());
        assert_eq!(limited.retry_after_seconds(), 12);
        assert_eq!(blocked.retry_after_seconds(), 1800);
    }

    #[test]
    fn test_mfa_error_messages_are_distinct() {
        let messages = [
            MfaError::UnknownIdentity.to_string(),
            MfaError::NotEnrolled.to_string(),
            MfaError::InvalidCodeFormat.to_string(),
            MfaError::InvalidCode.to_string(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in messages.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_scheduler_error_variants() {
        let unknown = SchedulerError::UnknownTaskType("nightly_backup".to_string());
        assert_eq!(unknown.to_string(), "Unknown task type: nightly_backup");

        let disabled = SchedulerError::TaskDisabled(TaskType::SecurityAudit);
        assert_eq!(disabled.to_string(), "Task is disabled: security_audit");
    }

    #[test]
    fn test_predicates() {
        assert!(
            Error::RateLimit(RateLimitError::TooManyRequests {
                retry_after_seconds: 1
            })
            .is_rate_limited()
        );
        assert!(Error::Mfa(MfaError::InvalidCodeFormat).is_validation_error());
        assert!(!Error::Mfa(MfaError::InvalidCode).is_validation_error());
        assert!(Error::Storage(StorageError::NotFound).is_storage_error());
        assert!(Error::Crypto(CryptoError::Decryption).is_crypto_error());
        assert!(Error::Token(TokenError::Expired).is_token_error());
    }

    #[test]
    fn test_error_from_conversions() {
        let error: Error = MfaError::InvalidCode.into();
        assert!(matches!(error, Error::Mfa(MfaError::InvalidCode)));

        let error: Error = SchedulerError::AlreadyRunning.into();
        assert!(matches!(
            error,
            Error::Scheduler(SchedulerError::AlreadyRunning)
        ));
    }
}
