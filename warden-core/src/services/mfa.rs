//! TOTP multi-factor authentication service
//!
//! Enrolment is two-phase. [`MfaService::generate_secret`] stores a pending
//! secret with MFA still disabled; only a correct code passed to
//! [`MfaService::verify_and_enable`] flips the enabled flag. A mistyped
//! enrolment code therefore never locks a user out.
//!
//! Secrets are stored through [`FieldEncryption`] when one is configured.

use std::sync::Arc;

use crate::{
    Error, UserId,
    clock::SharedClock,
    error::MfaError,
    events::{EventBus, SecurityEvent},
    repositories::CredentialRepository,
    services::encryption::FieldEncryption,
    storage::CredentialRecord,
    totp::{self, TotpConfig},
};

/// Material handed to the user when enrolment starts.
#[derive(Clone)]
pub struct MfaEnrollment {
    /// Base32 secret
    pub secret: String,
    pub otpauth_url: String,
    /// The secret in groups of four, for manual entry
    pub display_code: String,
}

impl std::fmt::Debug for MfaEnrollment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MfaEnrollment")
            .field("secret", &"[REDACTED]")
            .field("otpauth_url", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MfaStatus {
    pub enabled: bool,
    /// A secret is stored, whether or not it has been activated
    pub enrolled: bool,
}

pub struct MfaService<C: CredentialRepository> {
    credentials: Arc<C>,
    encryption: Option<Arc<FieldEncryption>>,
    config: TotpConfig,
    events: EventBus,
    clock: SharedClock,
}

impl<C: CredentialRepository> MfaService<C> {
    pub fn new(credentials: Arc<C>, config: TotpConfig, events: EventBus, clock: SharedClock) -> Self {
        Self {
            credentials,
            encryption: None,
            config,
            events,
            clock,
        }
    }

    /// Encrypt stored secrets with `encryption`.
    pub fn with_encryption(mut self, encryption: Arc<FieldEncryption>) -> Self {
        self.encryption = Some(encryption);
        self
    }

    pub fn config(&self) -> &TotpConfig {
        &self.config
    }

    /// Start enrolment for a user.
    ///
    /// Overwrites any pending (not yet enabled) secret.
    pub async fn generate_secret(&self, user_id: &UserId) -> Result<MfaEnrollment, Error> {
        let record = self.load(user_id).await?;
        if record.mfa_enabled {
            return Err(MfaError::AlreadyEnabled.into());
        }

        let secret = totp::generate_secret();
        let stored = match &self.encryption {
            Some(encryption) => encryption.encrypt(&secret)?,
            None => secret.clone(),
        };
        self.credentials
            .set_mfa_secret(user_id, Some(stored), false)
            .await?;

        tracing::info!(user_id = %user_id, "Started MFA enrolment");

        Ok(MfaEnrollment {
            otpauth_url: totp::otpauth_url(&self.config.issuer, &record.email, &secret),
            display_code: totp::format_secret_for_display(&secret),
            secret,
        })
    }

    /// Activate MFA once the user proves possession of the pending secret.
    pub async fn verify_and_enable(&self, user_id: &UserId, code: &str) -> Result<(), Error> {
        ensure_code_format(code)?;

        let record = self.load(user_id).await?;
        if record.mfa_enabled {
            return Err(MfaError::AlreadyEnabled.into());
        }

        let secret = self.secret_of(&record)?;
        self.check_code(user_id, &secret, code).await?;

        self.credentials
            .set_mfa_secret(user_id, record.mfa_secret, true)
            .await?;

        tracing::info!(user_id = %user_id, "MFA enabled");
        self.events
            .publish(SecurityEvent::MfaEnabled {
                user_id: user_id.clone(),
                timestamp: self.clock.now(),
            })
            .await;

        Ok(())
    }

    /// Check a code against a plaintext secret at the current time.
    pub fn verify_code(&self, secret: &str, code: &str) -> bool {
        totp::verify(secret, code, self.clock.now()).unwrap_or(false)
    }

    /// Second factor check during login.
    pub async fn verify_login(&self, user_id: &UserId, code: &str) -> Result<(), Error> {
        ensure_code_format(code)?;

        let record = self.load(user_id).await?;
        if !record.mfa_enabled {
            return Err(MfaError::NotEnabled.into());
        }

        let secret = self.secret_of(&record)?;
        self.check_code(user_id, &secret, code).await
    }

    /// Turn MFA off. Requires a current code.
    pub async fn disable(&self, user_id: &UserId, code: &str) -> Result<(), Error> {
        self.verify_login(user_id, code).await?;

        self.credentials.set_mfa_secret(user_id, None, false).await?;

        tracing::info!(user_id = %user_id, "MFA disabled");
        self.events
            .publish(SecurityEvent::MfaDisabled {
                user_id: user_id.clone(),
                timestamp: self.clock.now(),
            })
            .await;

        Ok(())
    }

    pub async fn status(&self, user_id: &UserId) -> Result<MfaStatus, Error> {
        let record = self.load(user_id).await?;
        Ok(MfaStatus {
            enabled: record.mfa_enabled,
            enrolled: record.has_mfa_secret(),
        })
    }

    async fn load(&self, user_id: &UserId) -> Result<CredentialRecord, Error> {
        self.credentials
            .find(user_id)
            .await?
            .ok_or_else(|| MfaError::UnknownIdentity.into())
    }

    fn secret_of(&self, record: &CredentialRecord) -> Result<String, MfaError> {
        let stored = record
            .mfa_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(MfaError::NotEnrolled)?;

        Ok(match &self.encryption {
            Some(encryption) => encryption.decrypt(stored),
            None => stored.to_string(),
        })
    }

    async fn check_code(&self, user_id: &UserId, secret: &str, code: &str) -> Result<(), Error> {
        if totp::verify(secret, code, self.clock.now())? {
            return Ok(());
        }

        tracing::warn!(user_id = %user_id, "MFA code rejected");
        self.events
            .publish(SecurityEvent::MfaVerificationFailed {
                user_id: user_id.clone(),
                timestamp: self.clock.now(),
            })
            .await;

        Err(MfaError::InvalidCode.into())
    }
}

fn ensure_code_format(code: &str) -> Result<(), MfaError> {
    if totp::is_valid_code_format(code) {
        Ok(())
    } else {
        Err(MfaError::InvalidCodeFormat)
    }
}
