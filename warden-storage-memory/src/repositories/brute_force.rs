//! In-memory implementation of the brute force protection repository.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use warden_core::{
    BlockedIdentity, Error, LoginAttemptRecord, repositories::BruteForceRepository,
};

/// Append-only attempt log.
///
/// Every entry carries a sequence number. A reset stores the next sequence
/// number for the identity, and counting skips entries below it.
#[derive(Default)]
struct AttemptLog {
    next_seq: u64,
    entries: Vec<(u64, LoginAttemptRecord)>,
    resets: HashMap<String, u64>,
}

/// Login attempt log and identity blocklist.
///
/// Identities arrive already normalized by the guard.
#[derive(Default)]
pub struct MemoryBruteForceRepository {
    attempts: RwLock<AttemptLog>,
    blocks: RwLock<HashMap<String, BlockedIdentity>>,
}

impl MemoryBruteForceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of attempts currently in the log.
    pub async fn attempt_count(&self) -> usize {
        self.attempts.read().await.entries.len()
    }
}

#[async_trait]
impl BruteForceRepository for MemoryBruteForceRepository {
    async fn record_attempt(&self, attempt: LoginAttemptRecord) -> Result<(), Error> {
        let mut log = self.attempts.write().await;
        let seq = log.next_seq;
        log.next_seq += 1;
        log.entries.push((seq, attempt));
        Ok(())
    }

    async fn count_failures_since(
        &self,
        identity: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, Error> {
        let log = self.attempts.read().await;
        let floor = log.resets.get(identity).copied().unwrap_or(0);
        let count = log
            .entries
            .iter()
            .filter(|(seq, a)| {
                *seq >= floor && a.identity == identity && !a.success && a.attempted_at >= since
            })
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn reset_failures(&self, identity: &str) -> Result<(), Error> {
        let mut log = self.attempts.write().await;
        let floor = log.next_seq;
        log.resets.insert(identity.to_string(), floor);
        Ok(())
    }

    async fn prune_attempts(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let mut log = self.attempts.write().await;
        let len = log.entries.len();
        log.entries.retain(|(_, a)| a.attempted_at >= before);
        let removed = (len - log.entries.len()) as u64;

        // A reset is only needed while entries older than it remain
        let oldest = log.entries.first().map(|(seq, _)| *seq);
        log.resets
            .retain(|_, floor| oldest.is_some_and(|oldest| oldest < *floor));

        tracing::debug!(removed, remaining = log.entries.len(), "Pruned in-memory login attempts");
        Ok(removed)
    }

    async fn upsert_block(
        &self,
        identity: &str,
        reason: &str,
        blocked_at: DateTime<Utc>,
        blocked_until: DateTime<Utc>,
    ) -> Result<BlockedIdentity, Error> {
        let mut blocks = self.blocks.write().await;
        let block = blocks
            .entry(identity.to_string())
            .and_modify(|b| {
                b.reason = reason.to_string();
                b.blocked_at = blocked_at;
                b.blocked_until = blocked_until;
                b.attempt_count += 1;
            })
            .or_insert_with(|| BlockedIdentity {
                identity: identity.to_string(),
                reason: reason.to_string(),
                blocked_at,
                blocked_until,
                attempt_count: 1,
            });
        Ok(block.clone())
    }

    async fn find_block(&self, identity: &str) -> Result<Option<BlockedIdentity>, Error> {
        Ok(self.blocks.read().await.get(identity).cloned())
    }

    async fn remove_block(&self, identity: &str) -> Result<bool, Error> {
        Ok(self.blocks.write().await.remove(identity).is_some())
    }

    async fn list_blocks(&self) -> Result<Vec<BlockedIdentity>, Error> {
        Ok(self.blocks.read().await.values().cloned().collect())
    }

    async fn purge_blocks(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let mut blocks = self.blocks.write().await;
        let len = blocks.len();
        blocks.retain(|_, b| b.blocked_until >= before);
        let removed = (len - blocks.len()) as u64;
        tracing::debug!(removed, remaining = blocks.len(), "Purged in-memory blocks");
        Ok(removed)
    }
}
