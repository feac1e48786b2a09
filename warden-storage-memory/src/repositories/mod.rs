//! Repository implementations for in-memory storage

pub mod brute_force;
pub mod credential;

pub use brute_force::MemoryBruteForceRepository;
pub use credential::MemoryCredentialRepository;

use async_trait::async_trait;
use std::sync::Arc;
use warden_core::{
    Error,
    repositories::{BruteForceRepositoryProvider, CredentialRepositoryProvider, RepositoryProvider},
};

/// Repository provider implementation for in-memory storage
///
/// This struct implements all the individual repository provider traits
/// as well as the unified `RepositoryProvider` trait.
#[derive(Default)]
pub struct MemoryRepositoryProvider {
    credentials: Arc<MemoryCredentialRepository>,
    brute_force: Arc<MemoryBruteForceRepository>,
}

impl MemoryRepositoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialRepositoryProvider for MemoryRepositoryProvider {
    type CredentialRepo = MemoryCredentialRepository;

    fn credentials(&self) -> &Self::CredentialRepo {
        &self.credentials
    }
}

impl BruteForceRepositoryProvider for MemoryRepositoryProvider {
    type BruteForceRepo = MemoryBruteForceRepository;

    fn brute_force(&self) -> &Self::BruteForceRepo {
        &self.brute_force
    }
}

#[async_trait]
impl RepositoryProvider for MemoryRepositoryProvider {
    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}
