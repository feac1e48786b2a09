//! Task routines and the context they run with.
//!
//! Most routines (audits, scans, table maintenance, reports) belong to
//! external collaborators and are registered by the embedding application.
//! The two cleanup routines whose state lives in this crate ship here.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;

use super::TaskType;
use crate::{
    error::TaskError, repositories::BruteForceRepository, services::BruteForceGuard,
    token::RevocationList,
};

/// Retention windows handed to cleanup and check routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub audit_log: Duration,
    /// Expired blocks and login attempts older than this are deleted
    pub ip_block: Duration,
    pub password_max_age: Duration,
    pub inactive_account: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            audit_log: Duration::days(90),
            ip_block: Duration::days(30),
            password_max_age: Duration::days(90),
            inactive_account: Duration::days(180),
        }
    }
}

/// Everything a routine receives for one run.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_type: TaskType,
    pub started_at: DateTime<Utc>,
    pub retention: RetentionPolicy,
    cancel: watch::Receiver<bool>,
}

impl TaskContext {
    pub fn new(
        task_type: TaskType,
        started_at: DateTime<Utc>,
        retention: RetentionPolicy,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            task_type,
            started_at,
            retention,
            cancel,
        }
    }

    /// Whether the scheduler has started shutting down.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolve once the scheduler starts shutting down.
    ///
    /// Long running routines should select on this and return early.
    pub async fn cancelled(&mut self) {
        // A dropped sender also means shutdown
        let _ = self.cancel.wait_for(|cancelled| *cancelled).await;
    }
}

/// A unit of scheduled work.
///
/// On success the routine returns a short summary that is stored in the
/// execution log.
#[async_trait]
pub trait TaskRoutine: Send + Sync + 'static {
    async fn run(&self, ctx: TaskContext) -> Result<String, TaskError>;
}

struct FnRoutine<F>(F);

#[async_trait]
impl<F, Fut> TaskRoutine for FnRoutine<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, TaskError>> + Send + 'static,
{
    async fn run(&self, ctx: TaskContext) -> Result<String, TaskError> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a [`TaskRoutine`].
///
/// ```
/// use warden_core::{error::TaskError, scheduler::routine_fn};
///
/// let routine = routine_fn(|ctx| async move {
///     Ok::<_, TaskError>(format!("audited at {}", ctx.started_at))
/// });
/// # let _ = routine;
/// ```
pub fn routine_fn<F, Fut>(f: F) -> Arc<dyn TaskRoutine>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, TaskError>> + Send + 'static,
{
    Arc::new(FnRoutine(f))
}

/// Purges expired entries from the token revocation list.
pub struct TokenCleanupRoutine {
    revocations: Arc<dyn RevocationList>,
}

impl TokenCleanupRoutine {
    pub fn new(revocations: Arc<dyn RevocationList>) -> Self {
        Self { revocations }
    }
}

#[async_trait]
impl TaskRoutine for TokenCleanupRoutine {
    async fn run(&self, _ctx: TaskContext) -> Result<String, TaskError> {
        let purged = self.revocations.purge_expired().await?;
        Ok(format!("Purged {purged} expired token revocations"))
    }
}

/// Deletes long expired blocks and old login attempts.
pub struct IpBlockCleanupRoutine<R: BruteForceRepository> {
    guard: Arc<BruteForceGuard<R>>,
}

impl<R: BruteForceRepository> IpBlockCleanupRoutine<R> {
    pub fn new(guard: Arc<BruteForceGuard<R>>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl<R: BruteForceRepository> TaskRoutine for IpBlockCleanupRoutine<R> {
    async fn run(&self, ctx: TaskContext) -> Result<String, TaskError> {
        let blocks = self.guard.purge_expired(ctx.retention.ip_block).await?;
        let attempts = self.guard.prune_attempts(ctx.retention.ip_block).await?;
        Ok(format!(
            "Removed {blocks} expired blocks and {attempts} old login attempts"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, MockClock};
    use crate::token::TokenBlacklist;

    fn context(cancel: watch::Receiver<bool>) -> TaskContext {
        TaskContext::new(
            TaskType::TokenCleanup,
            Utc::now(),
            RetentionPolicy::default(),
            cancel,
        )
    }

    #[tokio::test]
    async fn test_routine_fn_runs_closure() {
        let (_tx, rx) = watch::channel(false);
        let routine = routine_fn(|ctx| async move { Ok::<_, TaskError>(format!("ran {}", ctx.task_type)) });

        assert_eq!(routine.run(context(rx)).await.unwrap(), "ran token_cleanup");
    }

    #[tokio::test]
    async fn test_context_observes_cancellation() {
        let (tx, rx) = watch::channel(false);
        let mut ctx = context(rx);
        assert!(!ctx.is_cancelled());

        tx.send(true).unwrap();
        ctx.cancelled().await;
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_token_cleanup_routine() {
        let clock = MockClock::new();
        let blacklist = Arc::new(TokenBlacklist::new(Arc::new(clock.clone())));
        blacklist
            .add("jti", clock.now() + Duration::minutes(1))
            .await
            .unwrap();
        clock.advance(Duration::minutes(2));

        let (_tx, rx) = watch::channel(false);
        let routine = TokenCleanupRoutine::new(blacklist.clone());
        let summary = routine.run(context(rx)).await.unwrap();

        assert_eq!(summary, "Purged 1 expired token revocations");
        assert!(blacklist.is_empty().await);
    }

    #[test]
    fn test_retention_defaults() {
        let retention = RetentionPolicy::default();
        assert_eq!(retention.audit_log, Duration::days(90));
        assert_eq!(retention.ip_block, Duration::days(30));
        assert_eq!(retention.inactive_account, Duration::days(180));
    }
}
