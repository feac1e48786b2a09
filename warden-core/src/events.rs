use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{UserId, error::EventError, scheduler::TaskType};

/// Severity attached to every security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// Represents security events that can be emitted by the event bus
///
/// Events are used to notify the audit collaborator about decisions taken by
/// the control plane: rejected requests, blocks, MFA changes, revocations
/// and scheduled task failures.
#[derive(Debug, Clone)]
pub enum SecurityEvent {
    /// A request was rejected because its identity is blocked.
    BlockedRequest {
        identity: String,
        blocked_until: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// A request was rejected by the rate limiter.
    RateLimited {
        identity: String,
        limit: u32,
        timestamp: DateTime<Utc>,
    },

    /// A login attempt failed.
    LoginFailed {
        identity: String,
        failed_attempts: u32,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Failed attempts for an identity crossed the brute-force threshold.
    BruteForceDetected {
        identity: String,
        failed_attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// An identity was added to the blocklist.
    IdentityBlocked {
        identity: String,
        reason: String,
        blocked_until: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// An identity was removed from the blocklist by an operator.
    IdentityUnblocked {
        identity: String,
        timestamp: DateTime<Utc>,
    },

    MfaEnabled {
        user_id: UserId,
        timestamp: DateTime<Utc>,
    },

    MfaDisabled {
        user_id: UserId,
        timestamp: DateTime<Utc>,
    },

    /// A TOTP code was rejected.
    MfaVerificationFailed {
        user_id: UserId,
        timestamp: DateTime<Utc>,
    },

    TokenRevoked {
        jti: String,
        timestamp: DateTime<Utc>,
    },

    /// A scheduled task routine returned an error or timed out.
    ScheduledTaskFailed {
        task_type: TaskType,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl SecurityEvent {
    pub fn severity(&self) -> Severity {
        match self {
            SecurityEvent::BlockedRequest { .. } => Severity::Medium,
            SecurityEvent::RateLimited { .. } => Severity::Low,
            SecurityEvent::LoginFailed { .. } => Severity::Low,
            SecurityEvent::BruteForceDetected { .. } => Severity::High,
            SecurityEvent::IdentityBlocked { .. } => Severity::High,
            SecurityEvent::IdentityUnblocked { .. } => Severity::Medium,
            SecurityEvent::MfaEnabled { .. } => Severity::Info,
            SecurityEvent::MfaDisabled { .. } => Severity::Medium,
            SecurityEvent::MfaVerificationFailed { .. } => Severity::Medium,
            SecurityEvent::TokenRevoked { .. } => Severity::Info,
            SecurityEvent::ScheduledTaskFailed { .. } => Severity::High,
        }
    }

    /// Short machine-readable name for the event.
    pub fn kind(&self) -> &'static str {
        match self {
            SecurityEvent::BlockedRequest { .. } => "blocked_request",
            SecurityEvent::RateLimited { .. } => "rate_limited",
            SecurityEvent::LoginFailed { .. } => "login_failed",
            SecurityEvent::BruteForceDetected { .. } => "brute_force_detected",
            SecurityEvent::IdentityBlocked { .. } => "identity_blocked",
            SecurityEvent::IdentityUnblocked { .. } => "identity_unblocked",
            SecurityEvent::MfaEnabled { .. } => "mfa_enabled",
            SecurityEvent::MfaDisabled { .. } => "mfa_disabled",
            SecurityEvent::MfaVerificationFailed { .. } => "mfa_verification_failed",
            SecurityEvent::TokenRevoked { .. } => "token_revoked",
            SecurityEvent::ScheduledTaskFailed { .. } => "scheduled_task_failed",
        }
    }
}

/// A trait for handling events emitted by the event bus
///
/// Implementors of this trait can be registered with the [`EventBus`] to receive and process events.
/// The handler is called asynchronously for each event emitted.
///
/// # Errors
///
/// Returns an [`EventError`] if event handling fails. The error will be propagated back through the event bus.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle_event(&self, event: &SecurityEvent) -> Result<(), EventError>;
}

/// Event handler that writes every event to `tracing`.
///
/// The log level follows the event severity.
#[derive(Debug, Default)]
pub struct TracingEventHandler;

#[async_trait]
impl EventHandler for TracingEventHandler {
    async fn handle_event(&self, event: &SecurityEvent) -> Result<(), EventError> {
        let severity = event.severity();
        match severity {
            Severity::Info | Severity::Low => {
                tracing::info!(kind = event.kind(), ?severity, event = ?event, "Security event")
            }
            Severity::Medium => {
                tracing::warn!(kind = event.kind(), ?severity, event = ?event, "Security event")
            }
            Severity::High | Severity::Critical => {
                tracing::error!(kind = event.kind(), ?severity, event = ?event, "Security event")
            }
        }
        Ok(())
    }
}

/// Event bus that can emit events and register event handlers
///
/// The event bus is responsible for managing event handlers and emitting events to them.
///
/// # Examples
///
/// ```
/// # use std::sync::Arc;
/// # use warden_core::events::{EventBus, TracingEventHandler};
/// # tokio_test_block_on(async {
/// let event_bus = EventBus::default();
/// event_bus.register(Arc::new(TracingEventHandler)).await;
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new event bus with no handlers
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Create an event bus that logs every event through `tracing`
    pub fn with_tracing() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(vec![Arc::new(TracingEventHandler)])),
        }
    }

    /// Register an event handler with the event bus
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// Emit an event to all registered handlers
    pub async fn emit(&self, event: &SecurityEvent) -> Result<(), EventError> {
        for handler in self.handlers.read().await.iter() {
            handler.handle_event(event).await?;
        }

        Ok(())
    }

    /// Emit an event, logging instead of returning handler failures.
    ///
    /// Security decisions never depend on the audit sink being healthy.
    pub async fn publish(&self, event: SecurityEvent) {
        if let Err(e) = self.emit(&event).await {
            tracing::warn!(kind = event.kind(), error = %e, "Failed to publish security event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingHandler {
        kinds: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle_event(&self, event: &SecurityEvent) -> Result<(), EventError> {
            self.kinds.lock().unwrap().push(event.kind());
            Ok(())
        }
    }

    struct ErroringEventHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for ErroringEventHandler {
        async fn handle_event(&self, _event: &SecurityEvent) -> Result<(), EventError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EventError::HandlerError("sink offline".into()))
        }
    }

    fn token_revoked() -> SecurityEvent {
        SecurityEvent::TokenRevoked {
            jti: "jti-1".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_empty() {
        let event_bus = EventBus::default();
        event_bus
            .emit(&token_revoked())
            .await
            .expect("Failed to emit event");
    }

    #[tokio::test]
    async fn test_event_bus_delivers_to_handlers() {
        let event_bus = EventBus::with_tracing();
        let handler = Arc::new(RecordingHandler {
            kinds: Mutex::new(Vec::new()),
        });
        event_bus.register(handler.clone()).await;

        event_bus.emit(&token_revoked()).await.unwrap();
        event_bus
            .emit(&SecurityEvent::IdentityUnblocked {
                identity: "10.0.0.1".to_string(),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(
            *handler.kinds.lock().unwrap(),
            vec!["token_revoked", "identity_unblocked"]
        );
    }

    #[tokio::test]
    async fn test_event_bus_error_propagation() {
        let event_bus = EventBus::default();
        event_bus
            .register(Arc::new(ErroringEventHandler {
                calls: AtomicUsize::new(0),
            }))
            .await;

        let result = event_bus.emit(&token_revoked()).await;
        assert!(matches!(result, Err(EventError::HandlerError(_))));
    }

    #[tokio::test]
    async fn test_publish_swallows_handler_errors() {
        let event_bus = EventBus::default();
        let handler = Arc::new(ErroringEventHandler {
            calls: AtomicUsize::new(0),
        });
        event_bus.register(handler.clone()).await;

        event_bus.publish(token_revoked()).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Info < Severity::Low);
        let event = SecurityEvent::BruteForceDetected {
            identity: "a@b.com".to_string(),
            failed_attempts: 5,
            timestamp: Utc::now(),
        };
        assert_eq!(event.severity(), Severity::High);
    }
}
