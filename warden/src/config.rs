//! Environment configuration
//!
//! Every option has a default except the token signing secret. Values are
//! read through a lookup function so tests can supply a map instead of the
//! process environment.
//!
//! ```rust,no_run
//! use warden::WardenConfig;
//!
//! let config = WardenConfig::from_env()?;
//! # Ok::<(), warden_core::error::ConfigError>(())
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use warden_core::{
    error::ConfigError,
    policy::TrustPolicy,
    rate_limit::{RateLimitConfig, RateLimitPolicy},
    scheduler::{RetentionPolicy, SchedulerConfig, TaskOverride, TaskType},
    services::{BruteForceConfig, MIN_KEY_LENGTH},
    token::{MIN_SECRET_LENGTH, TokenConfig},
    totp::TotpConfig,
};

pub const PREFIX: &str = "WARDEN_";

/// Longest span accepted for any configured duration.
pub const MAX_DURATION_DAYS: i64 = 36_500;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Production,
    Development,
}

impl FromStr for Environment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" => Ok(Environment::Development),
            _ => Err(()),
        }
    }
}

#[derive(Clone)]
pub struct WardenConfig {
    pub environment: Environment,
    /// Only honoured in [`Environment::Development`]
    pub trust_loopback: bool,
    pub encryption_key: Option<String>,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub mfa_token_ttl: Duration,
    pub totp: TotpConfig,
    pub rate_limit: RateLimitConfig,
    pub brute_force: BruteForceConfig,
    pub scheduler: SchedulerConfig,
}

impl fmt::Debug for WardenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WardenConfig")
            .field("environment", &self.environment)
            .field("trust_loopback", &self.trust_loopback)
            .field("encryption_enabled", &self.encryption_key.is_some())
            .field("jwt_issuer", &self.jwt_issuer)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("mfa_token_ttl", &self.mfa_token_ttl)
            .field("totp", &self.totp)
            .field("rate_limit", &self.rate_limit)
            .field("brute_force", &self.brute_force)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl WardenConfig {
    /// Defaults for everything, with the given signing secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            environment: Environment::Production,
            trust_loopback: false,
            encryption_key: None,
            jwt_secret: jwt_secret.into(),
            jwt_issuer: None,
            access_token_ttl: Duration::minutes(15),
            refresh_token_ttl: Duration::days(7),
            mfa_token_ttl: Duration::minutes(5),
            totp: TotpConfig::default(),
            rate_limit: RateLimitConfig::default(),
            brute_force: BruteForceConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration from an arbitrary key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let jwt_secret = env
            .string("JWT_SECRET")
            .ok_or_else(|| ConfigError::Missing(env.key("JWT_SECRET")))?;

        let mut config = Self::new(jwt_secret);
        config.environment = match env.string("ENVIRONMENT") {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                key: env.key("ENVIRONMENT"),
                value,
            })?,
            None => Environment::Production,
        };
        config.trust_loopback = env.parse_bool("TRUST_LOOPBACK", false)?;
        config.encryption_key = env.string("ENCRYPTION_KEY");
        config.jwt_issuer = env.string("JWT_ISSUER");
        config.access_token_ttl = env.duration("ACCESS_TOKEN_TTL_SECS", 900, Duration::try_seconds)?;
        config.refresh_token_ttl =
            env.duration("REFRESH_TOKEN_TTL_SECS", 604_800, Duration::try_seconds)?;
        config.mfa_token_ttl = env.duration("MFA_TOKEN_TTL_SECS", 300, Duration::try_seconds)?;
        if let Some(issuer) = env.string("MFA_ISSUER") {
            config.totp.issuer = issuer;
        }

        let window = env.duration("RATE_LIMIT_WINDOW_SECS", 60, Duration::try_seconds)?;
        config.rate_limit = RateLimitConfig {
            anonymous: RateLimitPolicy::per_minute(env.parse("RATE_LIMIT_ANONYMOUS", 30)?),
            authenticated: RateLimitPolicy::per_minute(
                env.parse("RATE_LIMIT_AUTHENTICATED", 60)?,
            ),
            privileged: RateLimitPolicy::per_minute(env.parse("RATE_LIMIT_PRIVILEGED", 120)?),
            auth_endpoint: RateLimitPolicy::per_minute(env.parse("RATE_LIMIT_AUTH_ENDPOINT", 5)?),
            idle_eviction: env.duration("RATE_LIMIT_IDLE_SECS", 600, Duration::try_seconds)?,
            sweep_interval: StdDuration::from_secs(env.parse("RATE_LIMIT_SWEEP_SECS", 60)?),
        }
        .with_window(window);

        config.brute_force = BruteForceConfig {
            max_attempts: env.parse("BRUTE_FORCE_MAX_ATTEMPTS", 5)?,
            ip_max_attempts: env.parse("BRUTE_FORCE_IP_MAX_ATTEMPTS", 20)?,
            window: env.duration("BRUTE_FORCE_WINDOW_MINUTES", 15, Duration::try_minutes)?,
            block_duration: env.duration("BRUTE_FORCE_BLOCK_MINUTES", 30, Duration::try_minutes)?,
            ..BruteForceConfig::default()
        };

        let retention = RetentionPolicy {
            audit_log: env.duration("AUDIT_LOG_RETENTION_DAYS", 90, Duration::try_days)?,
            ip_block: env.duration("IP_BLOCK_RETENTION_DAYS", 30, Duration::try_days)?,
            password_max_age: env.duration("PASSWORD_MAX_AGE_DAYS", 90, Duration::try_days)?,
            inactive_account: env.duration("INACTIVE_ACCOUNT_DAYS", 180, Duration::try_days)?,
        };
        let mut scheduler = SchedulerConfig::default()
            .with_tick(StdDuration::from_secs(env.parse("SCHEDULER_TICK_SECS", 60)?))
            .with_history_capacity(env.parse("SCHEDULER_HISTORY", 100)?)
            .with_retention(retention);
        for task_type in TaskType::ALL {
            let task_override = env.task_override(task_type)?;
            if task_override != TaskOverride::default() {
                scheduler = scheduler.with_override(task_type, task_override);
            }
        }
        config.scheduler = scheduler;

        config.validate()?;
        Ok(config)
    }

    /// Check secret lengths, thresholds and timer periods.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("BRUTE_FORCE_MAX_ATTEMPTS", self.brute_force.max_attempts),
            ("BRUTE_FORCE_IP_MAX_ATTEMPTS", self.brute_force.ip_max_attempts),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: format!("{PREFIX}{name}"),
                    value: "0".to_string(),
                });
            }
        }

        let max = Duration::days(MAX_DURATION_DAYS);
        for (name, span) in [
            ("ACCESS_TOKEN_TTL_SECS", self.access_token_ttl),
            ("REFRESH_TOKEN_TTL_SECS", self.refresh_token_ttl),
            ("MFA_TOKEN_TTL_SECS", self.mfa_token_ttl),
            ("RATE_LIMIT_WINDOW_SECS", self.rate_limit.auth_endpoint.window),
            ("BRUTE_FORCE_WINDOW_MINUTES", self.brute_force.window),
            ("BRUTE_FORCE_BLOCK_MINUTES", self.brute_force.block_duration),
        ] {
            if span <= Duration::zero() || span > max {
                return Err(ConfigError::InvalidValue {
                    key: format!("{PREFIX}{name}"),
                    value: span.to_string(),
                });
            }
        }

        for (name, period) in [
            ("SCHEDULER_TICK_SECS", self.scheduler.tick),
            ("RATE_LIMIT_SWEEP_SECS", self.rate_limit.sweep_interval),
        ] {
            if period.is_zero() {
                return Err(ConfigError::InvalidValue {
                    key: format!("{PREFIX}{name}"),
                    value: "0".to_string(),
                });
            }
        }

        if self.jwt_secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::SecretTooShort {
                key: format!("{PREFIX}JWT_SECRET"),
                min: MIN_SECRET_LENGTH,
            });
        }
        if let Some(key) = &self.encryption_key {
            if key.len() < MIN_KEY_LENGTH {
                return Err(ConfigError::SecretTooShort {
                    key: format!("{PREFIX}ENCRYPTION_KEY"),
                    min: MIN_KEY_LENGTH,
                });
            }
        }
        Ok(())
    }

    /// The loopback bypass needs both a development environment and the flag.
    pub fn trust_policy(&self) -> TrustPolicy {
        if self.environment == Environment::Development && self.trust_loopback {
            TrustPolicy::loopback()
        } else {
            TrustPolicy::none()
        }
    }

    pub fn token_config(&self) -> TokenConfig {
        let config = TokenConfig::new_hs256(self.jwt_secret.as_bytes().to_vec())
            .with_access_ttl(self.access_token_ttl)
            .with_refresh_ttl(self.refresh_token_ttl)
            .with_mfa_pending_ttl(self.mfa_token_ttl);
        match &self.jwt_issuer {
            Some(issuer) => config.with_issuer(issuer.clone()),
            None => config,
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn key(&self, name: &str) -> String {
        format!("{PREFIX}{name}")
    }

    /// Unset and blank values both count as absent.
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(&self.key(name))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, name: &str, default: T) -> Result<T, ConfigError> {
        self.parse_opt(name).map(|v| v.unwrap_or(default))
    }

    fn parse_opt<T: FromStr>(&self, name: &str) -> Result<Option<T>, ConfigError> {
        match self.string(name) {
            Some(value) => value.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
                key: self.key(name),
                value,
            }),
            None => Ok(None),
        }
    }

    /// Parse a non-negative count of `unit`s into a duration.
    ///
    /// Values that do not fit [`MAX_DURATION_DAYS`] are rejected rather than
    /// overflowing later date arithmetic.
    fn duration(
        &self,
        name: &str,
        default: u32,
        unit: fn(i64) -> Option<Duration>,
    ) -> Result<Duration, ConfigError> {
        let count: u64 = self.parse(name, u64::from(default))?;
        i64::try_from(count)
            .ok()
            .and_then(unit)
            .filter(|span| *span <= Duration::days(MAX_DURATION_DAYS))
            .ok_or_else(|| ConfigError::InvalidValue {
                key: self.key(name),
                value: count.to_string(),
            })
    }

    fn parse_bool(&self, name: &str, default: bool) -> Result<bool, ConfigError> {
        Ok(self.parse_bool_opt(name)?.unwrap_or(default))
    }

    fn parse_bool_opt(&self, name: &str) -> Result<Option<bool>, ConfigError> {
        let Some(value) = self.string(name) else {
            return Ok(None);
        };
        match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                key: self.key(name),
                value,
            }),
        }
    }

    fn task_override(&self, task_type: TaskType) -> Result<TaskOverride, ConfigError> {
        let base = format!("TASK_{}", task_type.env_key());
        Ok(TaskOverride {
            interval: self
                .parse_opt::<u64>(&format!("{base}_INTERVAL_SECS"))?
                .map(StdDuration::from_secs),
            timeout: self
                .parse_opt::<u64>(&format!("{base}_TIMEOUT_SECS"))?
                .map(StdDuration::from_secs),
            enabled: self.parse_bool_opt(&format!("{base}_ENABLED"))?,
        })
    }
}
