//! In-process storage backend for warden
//!
//! Keeps credentials, login attempts and blocks in memory behind tokio
//! locks. Suitable for tests and single node deployments that do not need
//! the blocklist to survive a restart.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use warden_storage_memory::MemoryRepositoryProvider;
//!
//! let storage = Arc::new(MemoryRepositoryProvider::new());
//! storage.credentials().insert(record).await;
//! ```

pub mod repositories;

pub use repositories::{
    MemoryBruteForceRepository, MemoryCredentialRepository, MemoryRepositoryProvider,
};
