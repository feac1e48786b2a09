//! # Warden
//!
//! Warden is an in-process security control plane for multi-tenant services.
//! It sits in front of your request handlers and login flow and gives you:
//! - Per caller rate limiting with a stricter budget for auth endpoints
//! - Brute-force detection with a temporary identity blocklist
//! - TOTP multi-factor authentication
//! - Field-level encryption with deterministic search hashes
//! - Signed access, refresh and MFA-pending tokens with revocation
//! - A scheduler for periodic security tasks
//!
//! Storage is reached through the repository traits of `warden-core`, so
//! any backend implementing [`RepositoryProvider`] can be plugged in.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warden::{WardenBuilder, WardenConfig, CallerClass};
//! use warden_storage_memory::MemoryRepositoryProvider;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = Arc::new(MemoryRepositoryProvider::new());
//!     let warden = WardenBuilder::new()
//!         .with_storage(storage)
//!         .with_config(WardenConfig::from_env()?)
//!         .build()
//!         .await?;
//!
//!     warden.start_background()?;
//!     warden.check_request("203.0.113.7", CallerClass::Anonymous).await?;
//!     warden.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod config;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use warden_core::{
    error::{RateLimitError, SchedulerError, StorageError},
    identity::normalize_identity,
    repositories::{BruteForceRepositoryAdapter, CredentialRepository, CredentialRepositoryAdapter},
    scheduler::{IpBlockCleanupRoutine, TaskRoutine, TokenCleanupRoutine},
    token::{RevocationList, TokenPair, start_cleanup_task},
};

pub use builder::{NoStorage, WardenBuilder, WardenBuilderError, WithStorage};
pub use config::{Environment, WardenConfig};

/// Re-export core types from warden_core
pub use warden_core::{
    CallerClass, Clock, CredentialRecord, Error, EventBus, EventHandler, FieldEncryption,
    MockClock, RateDecision, RepositoryProvider, SecurityEvent, SecurityScheduler, SharedClock,
    TokenClaims, TokenType, UserId, error::MfaError, scheduler::TaskType, services::Decryption,
};

#[cfg(feature = "memory")]
pub use warden_storage_memory::MemoryRepositoryProvider;

pub type Credentials<R> = CredentialRepositoryAdapter<R>;
pub type Blocklist<R> = BruteForceRepositoryAdapter<R>;

pub type Guard<R> = warden_core::BruteForceGuard<Blocklist<R>>;
pub type Mfa<R> = warden_core::MfaService<Credentials<R>>;

const REVOCATION_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);

/// Result of a successful password check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// No second factor needed
    Authenticated(TokenPair),
    /// The user has MFA enabled; exchange this token and a TOTP code via
    /// [`Warden::verify_mfa_login`]
    MfaRequired {
        mfa_token: String,
        expires_at: DateTime<Utc>,
    },
}

struct Background {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// The security control plane.
///
/// One instance owns one of every service. Build it once at startup with
/// [`WardenBuilder`] and share it behind an `Arc`.
pub struct Warden<R: RepositoryProvider> {
    repositories: Arc<R>,
    credentials: Arc<Credentials<R>>,
    rate_limiter: Arc<warden_core::RateLimiter>,
    guard: Arc<Guard<R>>,
    encryption: Arc<FieldEncryption>,
    mfa: Arc<Mfa<R>>,
    tokens: Arc<warden_core::TokenService>,
    scheduler: Arc<SecurityScheduler>,
    events: EventBus,
    clock: SharedClock,
    config: WardenConfig,
    background: Mutex<Option<Background>>,
}

impl<R: RepositoryProvider> Warden<R> {
    pub(crate) async fn assemble(
        repositories: Arc<R>,
        config: WardenConfig,
        clock: SharedClock,
        events: EventBus,
        revocations: Option<Arc<dyn RevocationList>>,
    ) -> Result<Self, Error> {
        let credentials = Arc::new(CredentialRepositoryAdapter::new(repositories.clone()));
        let trust = config.trust_policy();
        if trust.trusts_loopback() {
            tracing::warn!("Loopback sources bypass rate limiting and blocking");
        }

        let rate_limiter = Arc::new(warden_core::RateLimiter::new(
            config.rate_limit.clone(),
            trust.clone(),
            clock.clone(),
        ));
        let guard = Arc::new(
            warden_core::BruteForceGuard::new(
                Arc::new(BruteForceRepositoryAdapter::new(repositories.clone())),
                config.brute_force.clone(),
                events.clone(),
                clock.clone(),
            )
            .with_trust_policy(trust),
        );

        let encryption = Arc::new(FieldEncryption::new(config.encryption_key.as_deref())?);

        let mfa = Arc::new(
            warden_core::MfaService::new(
                credentials.clone(),
                config.totp.clone(),
                events.clone(),
                clock.clone(),
            )
            .with_encryption(encryption.clone()),
        );

        let revocations = revocations.unwrap_or_else(|| {
            Arc::new(warden_core::TokenBlacklist::new(clock.clone())) as Arc<dyn RevocationList>
        });
        let tokens = Arc::new(warden_core::TokenService::new(
            config.token_config(),
            revocations.clone(),
            events.clone(),
        ));

        let scheduler = Arc::new(SecurityScheduler::new(
            config.scheduler.clone(),
            events.clone(),
            clock.clone(),
        ));
        scheduler
            .register(
                TaskType::TokenCleanup,
                Arc::new(TokenCleanupRoutine::new(revocations)),
            )
            .await?;
        scheduler
            .register(
                TaskType::IpBlockCleanup,
                Arc::new(IpBlockCleanupRoutine::new(guard.clone())),
            )
            .await?;

        tracing::info!(
            environment = ?config.environment,
            encryption = encryption.is_enabled(),
            "Warden initialized"
        );

        Ok(Self {
            repositories,
            credentials,
            rate_limiter,
            guard,
            encryption,
            mfa,
            tokens,
            scheduler,
            events,
            clock,
            config,
            background: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &Arc<warden_core::RateLimiter> {
        &self.rate_limiter
    }

    pub fn guard(&self) -> &Arc<Guard<R>> {
        &self.guard
    }

    pub fn encryption(&self) -> &Arc<FieldEncryption> {
        &self.encryption
    }

    pub fn mfa(&self) -> &Arc<Mfa<R>> {
        &self.mfa
    }

    pub fn tokens(&self) -> &Arc<warden_core::TokenService> {
        &self.tokens
    }

    pub fn scheduler(&self) -> &Arc<SecurityScheduler> {
        &self.scheduler
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Health check for all repositories
    pub async fn health_check(&self) -> Result<(), Error> {
        self.repositories.health_check().await
    }

    /// Register the routine for an externally implemented task type.
    pub async fn register_task(
        &self,
        task_type: TaskType,
        routine: Arc<dyn TaskRoutine>,
    ) -> Result<(), Error> {
        self.scheduler.register(task_type, routine).await
    }

    /// Admit or reject a request.
    ///
    /// Blocked identities are rejected before the rate limiter is consulted,
    /// so a blocked caller does not consume rate budget.
    pub async fn check_request(
        &self,
        identity: &str,
        class: CallerClass,
    ) -> Result<RateDecision, Error> {
        self.guard.ensure_not_blocked(identity).await?;
        let decision = self.rate_limiter.check(identity, class);
        self.enforce(identity, decision).await
    }

    /// Gate a login attempt before the password is checked.
    ///
    /// Checks the blocklist for the IP and the email, then their failure
    /// counts, then the auth endpoint rate limit and finally the account
    /// lock. A blocked caller is rejected without consuming rate budget.
    pub async fn precheck_login(&self, email: &str, ip_address: Option<&str>) -> Result<(), Error> {
        self.guard.guard_login(email, ip_address).await?;

        let limited = ip_address.unwrap_or(email);
        let decision = self.rate_limiter.check_auth_endpoint(limited);
        self.enforce(limited, decision).await?;

        if let Some(locked_until) = self.account_lock(email).await {
            let now = self.clock.now();
            tracing::warn!(identity = %normalize_identity(email), locked_until = %locked_until, "Rejected login for locked account");
            return Err(RateLimitError::Blocked {
                retry_after_seconds: (locked_until - now).num_seconds().max(1),
            }
            .into());
        }

        Ok(())
    }

    async fn enforce(&self, identity: &str, decision: RateDecision) -> Result<RateDecision, Error> {
        if !decision.allowed {
            self.events
                .publish(SecurityEvent::RateLimited {
                    identity: normalize_identity(identity),
                    limit: decision.limit,
                    timestamp: self.clock.now(),
                })
                .await;
        }
        Ok(decision.into_result()?)
    }

    async fn account_lock(&self, email: &str) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        match self.credentials.find_by_email(email).await {
            Ok(record) => record
                .and_then(|r| r.locked_until)
                .filter(|until| *until > now),
            Err(e) => self
                .config
                .brute_force
                .lookup_policy
                .resolve("account lock", Err::<bool, _>(e))
                .then(|| now + Duration::minutes(1)),
        }
    }

    /// Record a failed password check.
    ///
    /// Appends to the attempt log under the email and the source IP, and
    /// bumps the account's failure counter.
    /// Reaching the configured threshold locks the account for the block
    /// duration. Unknown emails are logged like any other attempt. Returns
    /// the account's failure count, or 0 for an unknown email.
    pub async fn record_login_failure(
        &self,
        email: &str,
        ip_address: Option<&str>,
        reason: Option<&str>,
    ) -> Result<u32, Error> {
        self.guard
            .record_login_failure(email, ip_address, reason)
            .await?;
        tracing::info!(
            identity = %normalize_identity(email),
            ip = ip_address.unwrap_or("-"),
            reason = reason.unwrap_or("-"),
            "Login failed"
        );

        let Some(record) = self.credentials.find_by_email(email).await? else {
            return Ok(0);
        };

        let failed = record.failed_attempts.saturating_add(1);
        self.credentials
            .set_failed_attempts(&record.user_id, failed)
            .await?;

        if failed >= self.config.brute_force.max_attempts {
            let until = self.clock.now() + self.config.brute_force.block_duration;
            self.credentials
                .set_locked_until(&record.user_id, Some(until))
                .await?;
            tracing::warn!(user_id = %record.user_id, failed_attempts = failed, locked_until = %until, "Locked account after repeated login failures");
        }

        Ok(failed)
    }

    /// Operator unblock of an IP or email.
    ///
    /// For an email that belongs to an account the failure counter and the
    /// account lock are cleared too. Returns `true` if a block existed.
    pub async fn unblock(&self, identity: &str) -> Result<bool, Error> {
        let removed = self.guard.unblock(identity).await?;

        if let Some(record) = self.credentials.find_by_email(identity).await? {
            self.credentials.set_failed_attempts(&record.user_id, 0).await?;
            self.credentials.set_locked_until(&record.user_id, None).await?;
        }

        Ok(removed)
    }

    /// Finish a login after the password has been verified.
    ///
    /// Clears failure state. Users with MFA enabled receive a short lived
    /// MFA-pending token instead of a token pair.
    pub async fn complete_login(
        &self,
        user_id: &UserId,
        ip_address: Option<&str>,
    ) -> Result<LoginOutcome, Error> {
        let record = self
            .credentials
            .find(user_id)
            .await?
            .ok_or(StorageError::NotFound)?;

        self.guard.record_attempt(&record.email, true, None).await?;
        self.guard.reset_failures(&record.email).await?;
        self.credentials.set_failed_attempts(user_id, 0).await?;
        self.credentials.set_locked_until(user_id, None).await?;

        tracing::info!(
            user_id = %user_id,
            ip = ip_address.unwrap_or("-"),
            mfa_required = record.mfa_enabled,
            "Password check passed"
        );

        if record.mfa_enabled {
            let pending = self
                .tokens
                .issue_mfa_pending(user_id, Some(&record.email))?;
            return Ok(LoginOutcome::MfaRequired {
                mfa_token: pending.token,
                expires_at: pending.expires_at,
            });
        }

        self.credentials.record_login(user_id, self.clock.now()).await?;
        self.tokens.issue_pair(user_id, Some(&record.email))
            .map(LoginOutcome::Authenticated)
    }

    /// Exchange an MFA-pending token and a TOTP code for a token pair.
    ///
    /// The account's email goes through the same blocklist and failure count
    /// as a password attempt, and a wrong code counts as a failed login. The
    /// pending token is single use: of concurrent calls with one token only
    /// the first correct one gets a pair.
    pub async fn verify_mfa_login(&self, mfa_token: &str, code: &str) -> Result<TokenPair, Error> {
        let claims = self
            .tokens
            .validate_as(mfa_token, TokenType::MfaPending)
            .await?;
        let user_id = claims.user_id();
        let email = match &claims.email {
            Some(email) => email.clone(),
            None => {
                self.credentials
                    .find(&user_id)
                    .await?
                    .ok_or(StorageError::NotFound)?
                    .email
            }
        };

        self.guard.guard_login(&email, None).await?;

        if let Err(e) = self.mfa.verify_login(&user_id, code).await {
            if matches!(e, Error::Mfa(MfaError::InvalidCode)) {
                self.guard
                    .record_attempt(&email, false, Some("invalid_mfa_code"))
                    .await?;
            }
            return Err(e);
        }

        self.tokens.redeem(&claims).await?;
        self.guard.record_attempt(&email, true, None).await?;
        self.guard.reset_failures(&email).await?;
        self.credentials.record_login(&user_id, self.clock.now()).await?;
        self.tokens.issue_pair(&user_id, Some(&email))
    }

    /// Validate an access token.
    pub async fn authenticate(&self, access_token: &str) -> Result<TokenClaims, Error> {
        self.tokens.validate_as(access_token, TokenType::Access).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, Error> {
        self.tokens.refresh(refresh_token).await
    }

    pub async fn logout(&self, access_token: &str, refresh_token: Option<&str>) -> Result<(), Error> {
        self.tokens.logout(access_token, refresh_token).await
    }

    /// Start the scheduler loop, the rate limiter eviction sweep and the
    /// revocation cleanup.
    pub fn start_background(&self) -> Result<(), Error> {
        let mut background = self.background.lock().unwrap_or_else(|e| e.into_inner());
        if background.is_some() {
            return Err(SchedulerError::AlreadyRunning.into());
        }

        self.scheduler.start()?;

        let (shutdown, receiver) = watch::channel(false);
        let handles = vec![
            self.rate_limiter.start_eviction_task(receiver.clone()),
            start_cleanup_task(
                Arc::clone(self.tokens.revocations()),
                REVOCATION_SWEEP_INTERVAL,
                receiver,
            ),
        ];
        *background = Some(Background { shutdown, handles });

        tracing::info!("Started background security tasks");
        Ok(())
    }

    /// Stop every background task and wait for in-flight task runs.
    pub async fn shutdown(&self) {
        let background = self
            .background
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(background) = background {
            background.shutdown.send_replace(true);
            for handle in background.handles {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Background task failed");
                }
            }
        }

        self.scheduler.shutdown().await;
    }
}
