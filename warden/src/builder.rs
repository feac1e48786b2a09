//! Builder pattern for constructing Warden instances
//!
//! This module provides a type-safe builder for creating [`Warden`] instances
//! with compile-time validation of storage configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use warden::{WardenBuilder, WardenConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warden = WardenBuilder::new()
//!         .with_memory_storage()
//!         .with_config(WardenConfig::from_env()?)
//!         .build()
//!         .await?;
//!
//!     warden.start_background()?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use warden_core::{
    Error, EventBus, EventHandler, RepositoryProvider, SharedClock,
    clock::system_clock,
    error::{ConfigError, CryptoError, ValidationError, utilities::RequiredFieldExt},
    token::RevocationList,
};

use crate::{Warden, WardenConfig};

/// Errors that can occur when building a Warden instance.
#[derive(Debug, thiserror::Error)]
pub enum WardenBuilderError {
    /// A required setting was not provided
    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid encryption key: {0}")]
    Crypto(#[from] CryptoError),

    /// A service failed to initialize
    #[error("Initialization failed: {0}")]
    Initialization(#[from] Error),
}

/// Marker type indicating no storage has been configured yet.
pub struct NoStorage;

/// Marker type indicating storage has been configured.
pub struct WithStorage<R: RepositoryProvider> {
    repositories: Arc<R>,
}

/// A type-safe builder for constructing [`Warden`] instances.
///
/// Storage must be configured before [`build`](WardenBuilder::build) becomes
/// available. A configuration is required; everything else has a default.
pub struct WardenBuilder<Storage> {
    storage: Storage,
    config: Option<WardenConfig>,
    clock: SharedClock,
    handlers: Vec<Arc<dyn EventHandler>>,
    revocations: Option<Arc<dyn RevocationList>>,
    log_events: bool,
}

impl Default for WardenBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl WardenBuilder<NoStorage> {
    /// Create a new builder.
    ///
    /// # Defaults
    ///
    /// - Clock: system clock
    /// - Security events: logged through `tracing`
    /// - Revocation list: in-process blacklist
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            config: None,
            clock: system_clock(),
            handlers: Vec::new(),
            revocations: None,
            log_events: true,
        }
    }

    /// Use the given repository provider.
    pub fn with_storage<R: RepositoryProvider>(
        self,
        repositories: Arc<R>,
    ) -> WardenBuilder<WithStorage<R>> {
        WardenBuilder {
            storage: WithStorage { repositories },
            config: self.config,
            clock: self.clock,
            handlers: self.handlers,
            revocations: self.revocations,
            log_events: self.log_events,
        }
    }

    /// Use a fresh in-memory repository provider.
    #[cfg(feature = "memory")]
    pub fn with_memory_storage(
        self,
    ) -> WardenBuilder<WithStorage<warden_storage_memory::MemoryRepositoryProvider>> {
        self.with_storage(Arc::new(
            warden_storage_memory::MemoryRepositoryProvider::new(),
        ))
    }
}

impl<Storage> WardenBuilder<Storage> {
    pub fn with_config(mut self, config: WardenConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the time source. Tests pass a [`MockClock`](warden_core::MockClock).
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Deliver security events to an additional handler.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Whether security events are also logged through `tracing`.
    pub fn with_event_logging(mut self, enabled: bool) -> Self {
        self.log_events = enabled;
        self
    }

    /// Replace the in-process revocation list, e.g. with a shared store.
    pub fn with_revocation_list(mut self, revocations: Arc<dyn RevocationList>) -> Self {
        self.revocations = Some(revocations);
        self
    }
}

impl<R: RepositoryProvider> WardenBuilder<WithStorage<R>> {
    /// The configured repository provider.
    pub fn repositories(&self) -> &Arc<R> {
        &self.storage.repositories
    }

    /// Build the Warden instance.
    pub async fn build(self) -> Result<Warden<R>, WardenBuilderError> {
        let config = self.config.require_field("Warden configuration")?;
        config.validate()?;

        let events = if self.log_events {
            EventBus::with_tracing()
        } else {
            EventBus::new()
        };
        for handler in self.handlers {
            events.register(handler).await;
        }

        let warden = Warden::assemble(
            self.storage.repositories,
            config,
            self.clock,
            events,
            self.revocations,
        )
        .await
        .map_err(|e| match e {
            Error::Crypto(e) => WardenBuilderError::Crypto(e),
            Error::Config(e) => WardenBuilderError::Config(e),
            e => WardenBuilderError::Initialization(e),
        })?;

        Ok(warden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WardenConfig;
    use warden_storage_memory::MemoryRepositoryProvider;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[tokio::test]
    async fn test_build_requires_config() {
        let result = WardenBuilder::new()
            .with_storage(Arc::new(MemoryRepositoryProvider::new()))
            .build()
            .await;

        match result {
            Err(WardenBuilderError::Validation(ValidationError::MissingField(msg))) => {
                assert_eq!(msg, "Warden configuration is required");
            }
            _ => panic!("Expected missing configuration error"),
        }
    }

    #[tokio::test]
    async fn test_build_rejects_short_secret() {
        let result = WardenBuilder::new()
            .with_storage(Arc::new(MemoryRepositoryProvider::new()))
            .with_config(WardenConfig::new("short"))
            .build()
            .await;

        assert!(matches!(
            result,
            Err(WardenBuilderError::Config(ConfigError::SecretTooShort { .. }))
        ));
    }

    #[tokio::test]
    async fn test_build_registers_builtin_tasks() {
        let warden = WardenBuilder::new()
            .with_storage(Arc::new(MemoryRepositoryProvider::new()))
            .with_config(WardenConfig::new(SECRET))
            .with_event_logging(false)
            .build()
            .await
            .unwrap();

        let registered: Vec<_> = warden
            .scheduler()
            .status()
            .await
            .into_iter()
            .map(|t| t.task_type)
            .collect();
        assert_eq!(
            registered,
            vec![
                warden_core::TaskType::TokenCleanup,
                warden_core::TaskType::IpBlockCleanup
            ]
        );
        assert!(!warden.encryption().is_enabled());
        warden.health_check().await.unwrap();
    }
}
