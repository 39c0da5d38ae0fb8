//! Test infrastructure for the beacon workspace.
//!
//! Provides a mock ingestion endpoint, scripted transports and a `TestEnv`
//! bundling a throwaway database with the mock server.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use beacon_core::{DeviceIdProvider, FixedDeviceId, Storage};
use beacon_delivery::{ClientConfig, DeliveryTarget, PersistentRequestStore};
use tempfile::TempDir;

pub mod fixtures;
pub mod http;

pub use fixtures::{
    response, success_response, without_device_id, FailureKind, ScriptedTransport,
};
pub use http::{MockResponse, MockServer, RecordedRequest};

/// App key used by test environments.
pub const TEST_APP_KEY: &str = "test-app-key";

/// Device id used by test environments.
pub const TEST_DEVICE_ID: &str = "test-device";

/// Database plus mock endpoint for integration tests.
pub struct TestEnv {
    /// Mock ingestion endpoint
    pub http_mock: MockServer,
    /// Storage under test
    pub storage: Storage,
    _dir: Option<TempDir>,
}

impl TestEnv {
    /// Creates an environment with an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub async fn new() -> Result<Self> {
        Ok(Self {
            http_mock: MockServer::start().await,
            storage: Storage::in_memory().await?,
            _dir: None,
        })
    }

    /// Creates an environment with a database file in a temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created.
    pub async fn on_disk() -> Result<Self> {
        let dir = TempDir::new()?;
        let storage = Storage::open(dir.path().join("beacon.db")).await?;

        Ok(Self { http_mock: MockServer::start().await, storage, _dir: Some(dir) })
    }

    /// Request store over this environment's storage.
    pub fn request_store(&self) -> Arc<PersistentRequestStore> {
        Arc::new(PersistentRequestStore::new(self.storage.clone()))
    }

    /// Client configuration with short timeouts.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        }
    }

    /// Delivery target pointing at the mock endpoint with a fixed device id.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn delivery_target(&self) -> Result<DeliveryTarget> {
        self.delivery_target_with(Arc::new(FixedDeviceId::new(TEST_DEVICE_ID)), self.client_config())
    }

    /// Delivery target with a custom device id source and client config.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn delivery_target_with(
        &self,
        device_id: Arc<dyn DeviceIdProvider>,
        client_config: ClientConfig,
    ) -> Result<DeliveryTarget> {
        Ok(DeliveryTarget::new(
            self.http_mock.url(),
            TEST_APP_KEY,
            self.request_store(),
            device_id,
            client_config,
        )?)
    }
}
