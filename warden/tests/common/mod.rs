//! Shared setup for the integration tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use warden::{
    CredentialRecord, EventHandler, MemoryRepositoryProvider, MockClock, SecurityEvent, UserId,
    Warden, WardenBuilder, WardenConfig,
};
use warden_core::{
    error::EventError,
    repositories::{CredentialRepository, CredentialRepositoryProvider},
};

pub const JWT_SECRET: &str = "integration-test-signing-secret-0123456789";
pub const ENCRYPTION_KEY: &str = "integration-test-master-key-0123456789abcdef";

/// Collects every published event.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<SecurityEvent>>,
}

impl RecordingHandler {
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.kind()).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle_event(&self, event: &SecurityEvent) -> Result<(), EventError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub struct TestWarden {
    pub warden: Warden<MemoryRepositoryProvider>,
    pub storage: Arc<MemoryRepositoryProvider>,
    pub clock: MockClock,
    pub events: Arc<RecordingHandler>,
}

impl TestWarden {
    /// Provision a user in the credential store.
    pub async fn add_user(&self, email: &str) -> UserId {
        let user_id = UserId::new_random();
        self.storage
            .credentials()
            .insert(CredentialRecord::new(user_id.clone(), email))
            .await;
        user_id
    }

    pub async fn record(&self, user_id: &UserId) -> CredentialRecord {
        self.storage
            .credentials()
            .find(user_id)
            .await
            .unwrap()
            .expect("user exists")
    }
}

pub fn config() -> WardenConfig {
    WardenConfig::new(JWT_SECRET)
}

pub async fn setup(config: WardenConfig) -> TestWarden {
    let _ = tracing_subscriber::fmt().try_init();

    let storage = Arc::new(MemoryRepositoryProvider::new());
    let clock = MockClock::new();
    let events = Arc::new(RecordingHandler::default());

    let warden = WardenBuilder::new()
        .with_storage(storage.clone())
        .with_config(config)
        .with_clock(Arc::new(clock.clone()))
        .with_event_handler(events.clone())
        .build()
        .await
        .expect("Failed to build Warden");

    TestWarden {
        warden,
        storage,
        clock,
        events,
    }
}
