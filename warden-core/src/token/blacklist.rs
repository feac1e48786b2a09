//! Revocation list for issued tokens.
//!
//! Entries are keyed by `jti` and carry the expiry of the token they revoke.
//! Once that expiry passes the token is rejected by signature validation
//! anyway, so the entry is treated as absent and dropped by the next sweep.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{Error, clock::SharedClock};

/// Store of revoked token ids.
///
/// The in-process [`TokenBlacklist`] suits a single node. A deployment with
/// several nodes implements this over a shared store; call sites do not
/// change.
#[async_trait]
pub trait RevocationList: Send + Sync + 'static {
    /// Revoke `jti` until `expires_at`.
    ///
    /// Returns `true` only for the call that revoked it. A `jti` that is
    /// already revoked, or an expiry that has already passed, yields `false`.
    /// The check and the insert are a single atomic step.
    async fn add(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<bool, Error>;

    async fn is_revoked(&self, jti: &str) -> Result<bool, Error>;

    /// Drop entries whose expiry has passed. Returns the number removed.
    async fn purge_expired(&self) -> Result<u64, Error>;
}

pub struct TokenBlacklist {
    entries: RwLock<HashMap<String, DateTime<Utc>>>,
    clock: SharedClock,
}

impl TokenBlacklist {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl RevocationList for TokenBlacklist {
    async fn add(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<bool, Error> {
        let now = self.clock.now();
        if expires_at <= now {
            return Ok(false);
        }

        let mut entries = self.entries.write().await;
        match entries.get_mut(jti) {
            Some(expiry) if *expiry > now => {
                if *expiry < expires_at {
                    *expiry = expires_at;
                }
                Ok(false)
            }
            _ => {
                entries.insert(jti.to_string(), expires_at);
                Ok(true)
            }
        }
    }

    async fn is_revoked(&self, jti: &str) -> Result<bool, Error> {
        let now = self.clock.now();
        Ok(self
            .entries
            .read()
            .await
            .get(jti)
            .is_some_and(|expiry| *expiry > now))
    }

    async fn purge_expired(&self) -> Result<u64, Error> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, expiry| *expiry > now);
        Ok((before - entries.len()) as u64)
    }
}

/// Start a background task that purges expired revocations every `period`.
///
/// The task stops when `shutdown` flips.
pub fn start_cleanup_task(
    revocations: Arc<dyn RevocationList>,
    period: std::time::Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = interval_timer.tick() => {
                    match revocations.purge_expired().await {
                        Ok(0) => {}
                        Ok(count) => tracing::debug!(count = count, "Purged expired token revocations"),
                        Err(e) => tracing::error!(error = %e, "Failed to purge token revocations"),
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("Shutting down token revocation cleanup task");
                    break;
                }
            }
        }
    })
}
