//! Repository traits for data access layer
//!
//! This module defines the repository interfaces that services use to interact with storage.
//! These traits provide a clean abstraction over the underlying storage implementation.
//!
//! # Trait Hierarchy
//!
//! - Individual `*Repository` traits define the operations for each data domain
//! - Individual `*RepositoryProvider` traits provide access to each repository type
//! - [`RepositoryProvider`] is a supertrait combining all provider traits plus lifecycle methods

pub mod adapter;
pub mod brute_force;
pub mod credential;

pub use adapter::{BruteForceRepositoryAdapter, CredentialRepositoryAdapter};
pub use brute_force::BruteForceRepository;
pub use credential::CredentialRepository;

use async_trait::async_trait;

use crate::Error;

/// Provider trait for credential repository access.
pub trait CredentialRepositoryProvider: Send + Sync + 'static {
    /// The credential repository implementation type
    type CredentialRepo: CredentialRepository;

    /// Get the credential repository
    fn credentials(&self) -> &Self::CredentialRepo;
}

/// Provider trait for brute force protection repository access.
pub trait BruteForceRepositoryProvider: Send + Sync + 'static {
    /// The brute force protection repository implementation type
    type BruteForceRepo: BruteForceRepository;

    /// Get the brute force protection repository
    fn brute_force(&self) -> &Self::BruteForceRepo;
}

/// Provider trait that storage implementations must implement to provide all repositories.
///
/// # Implementing a Custom Storage Backend
///
/// ```rust,ignore
/// use warden_core::repositories::*;
///
/// struct MyStorage { /* ... */ }
///
/// impl CredentialRepositoryProvider for MyStorage {
///     type CredentialRepo = MyCredentialRepository;
///     fn credentials(&self) -> &Self::CredentialRepo { &self.credentials }
/// }
///
/// // ... implement BruteForceRepositoryProvider ...
///
/// #[async_trait]
/// impl RepositoryProvider for MyStorage {
///     async fn health_check(&self) -> Result<(), Error> { /* ... */ }
/// }
/// ```
#[async_trait]
pub trait RepositoryProvider: CredentialRepositoryProvider + BruteForceRepositoryProvider {
    /// Health check for all repositories
    async fn health_check(&self) -> Result<(), Error>;
}
