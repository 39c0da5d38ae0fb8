//! Enqueue and trigger orchestration for the delivery worker.
//!
//! The queue owns the delivery configuration and at most one in-flight
//! worker task. `tick` is cheap and safe to call from any foreground
//! operation: it spawns a run only when requests are queued and no previous
//! run is still going.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use beacon_core::DeviceIdProvider;
use tokio::{runtime::Handle, sync::Mutex, task::JoinHandle};
use tracing::{debug, info};
use url::Url;

use crate::{
    client::{ClientConfig, DeliveryClient, Transport},
    error::{DeliveryError, Result},
    storage::RequestStore,
    worker::{DeliveryWorker, RunSummary, WorkerContext},
};

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Where and how queued requests are delivered.
#[derive(Clone)]
pub struct DeliveryTarget {
    /// Base URL of the ingestion endpoint.
    pub server_url: String,
    /// Application key, checked for presence only.
    pub app_key: String,
    /// Request log.
    pub store: Arc<dyn RequestStore>,
    /// Device identifier source.
    pub device_id: Arc<dyn DeviceIdProvider>,
    /// Transport used by workers.
    pub transport: Arc<dyn Transport>,
}

impl DeliveryTarget {
    /// Creates a target delivering through a new `DeliveryClient`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the client cannot be
    /// built from `client_config`.
    pub fn new(
        server_url: impl Into<String>,
        app_key: impl Into<String>,
        store: Arc<dyn RequestStore>,
        device_id: Arc<dyn DeviceIdProvider>,
        client_config: ClientConfig,
    ) -> Result<Self> {
        let transport = Arc::new(DeliveryClient::new(client_config)?);
        Ok(Self::with_transport(server_url, app_key, store, device_id, transport))
    }

    /// Creates a target delivering through `transport`.
    pub fn with_transport(
        server_url: impl Into<String>,
        app_key: impl Into<String>,
        store: Arc<dyn RequestStore>,
        device_id: Arc<dyn DeviceIdProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            app_key: app_key.into(),
            store,
            device_id,
            transport,
        }
    }
}

impl std::fmt::Debug for DeliveryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryTarget")
            .field("server_url", &self.server_url)
            .field("app_key", &self.app_key)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct QueueState {
    server_url: Option<String>,
    app_key: Option<String>,
    store: Option<Arc<dyn RequestStore>>,
    device_id: Option<Arc<dyn DeviceIdProvider>>,
    transport: Option<Arc<dyn Transport>>,
    executor: Option<Handle>,
    worker: Option<JoinHandle<RunSummary>>,
}

impl QueueState {
    fn validated(&self) -> Result<WorkerContext> {
        let app_key = self
            .app_key
            .as_deref()
            .ok_or_else(|| DeliveryError::configuration("app key has not been set"))?;
        if app_key.is_empty() {
            return Err(DeliveryError::configuration("app key is empty"));
        }

        let store =
            self.store.clone().ok_or_else(|| DeliveryError::configuration("store has not been set"))?;
        let device_id = self
            .device_id
            .clone()
            .ok_or_else(|| DeliveryError::configuration("device id has not been set"))?;
        let transport = self
            .transport
            .clone()
            .ok_or_else(|| DeliveryError::configuration("transport has not been set"))?;

        let server_url = self
            .server_url
            .clone()
            .ok_or_else(|| DeliveryError::configuration("server URL has not been set"))?;
        let parsed = Url::parse(&server_url)
            .map_err(|e| DeliveryError::configuration(format!("invalid server URL: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DeliveryError::configuration(format!(
                "unsupported server URL scheme: {}",
                parsed.scheme()
            )));
        }

        Ok(WorkerContext { server_url, store, device_id, transport })
    }

    fn worker_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    fn ensure_executor(&mut self) -> Result<Handle> {
        if let Some(handle) = &self.executor {
            return Ok(handle.clone());
        }

        let handle = Handle::try_current()
            .map_err(|e| DeliveryError::configuration(format!("no async runtime: {e}")))?;
        self.executor = Some(handle.clone());
        Ok(handle)
    }
}

/// Orchestrates enqueueing requests and triggering the single worker.
pub struct DeliveryQueue {
    state: Mutex<QueueState>,
    worker_runs: AtomicUsize,
    last_summary: Arc<Mutex<Option<RunSummary>>>,
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("worker_runs", &self.worker_runs.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl DeliveryQueue {
    /// Creates an unconfigured queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            worker_runs: AtomicUsize::new(0),
            last_summary: Arc::new(Mutex::new(None)),
        }
    }

    /// Creates a queue configured with `target`.
    pub async fn with_target(target: DeliveryTarget) -> Self {
        let queue = Self::new();
        queue.configure(target).await;
        queue
    }

    /// Replaces the delivery configuration.
    pub async fn configure(&self, target: DeliveryTarget) {
        let mut state = self.state.lock().await;
        state.server_url = Some(target.server_url);
        state.app_key = Some(target.app_key);
        state.store = Some(target.store);
        state.device_id = Some(target.device_id);
        state.transport = Some(target.transport);
    }

    /// Verifies the queue is fully and validly configured.
    ///
    /// Has no side effects and can be called any number of times.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` naming the first missing
    /// or invalid setting.
    pub async fn check_internal_state(&self) -> Result<()> {
        self.state.lock().await.validated().map(|_| ())
    }

    /// Persists `request` at the tail of the log and triggers delivery.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the queue is not configured and
    /// `StorageError` if the store is unhealthy or the append fails.
    pub async fn enqueue(&self, request: &str) -> Result<()> {
        let store = self.state.lock().await.validated()?.store;

        store.health_check().await?;
        store.add_connection(request).await?;
        debug!(request_len = request.len(), "request queued");

        self.tick().await
    }

    /// Starts a worker run if requests are queued and none is in flight.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the queue is not configured or no
    /// runtime is available, and `StorageError` if the log cannot be read.
    pub async fn tick(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let context = state.validated()?;

        if context.store.is_empty_connections().await? {
            return Ok(());
        }
        if state.worker_running() {
            debug!("delivery worker already running");
            return Ok(());
        }

        let executor = state.ensure_executor()?;
        let worker = DeliveryWorker::new(context);
        let last_summary = self.last_summary.clone();

        state.worker = Some(executor.spawn(async move {
            let summary = worker.run().await;
            *last_summary.lock().await = Some(summary.clone());
            summary
        }));

        let runs = self.worker_runs.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(runs, "spawned delivery worker");
        Ok(())
    }

    /// Alias of `tick`.
    ///
    /// # Errors
    ///
    /// See `tick`.
    pub async fn ensure_worker_running(&self) -> Result<()> {
        self.tick().await
    }

    /// Returns the runtime handle workers are spawned on, capturing the
    /// current one on first use.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` when called outside a tokio runtime
    /// before any handle was captured.
    pub async fn ensure_executor(&self) -> Result<Handle> {
        self.state.lock().await.ensure_executor()
    }

    /// Drops all configuration and abandons the in-flight worker.
    ///
    /// Requests already queued stay in the store but are not retried by
    /// this queue until it is configured again.
    pub async fn halt(&self) {
        let mut state = self.state.lock().await;
        if let Some(worker) = state.worker.take() {
            worker.abort();
        }
        *state = QueueState::default();
        *self.last_summary.lock().await = None;

        info!("delivery queue halted");
    }

    /// Returns true while a worker run is in flight.
    pub async fn is_worker_running(&self) -> bool {
        self.state.lock().await.worker_running()
    }

    /// Number of worker runs spawned since creation.
    pub fn worker_runs(&self) -> usize {
        self.worker_runs.load(Ordering::SeqCst)
    }

    /// Summary of the most recently finished run.
    pub async fn last_summary(&self) -> Option<RunSummary> {
        self.last_summary.lock().await.clone()
    }

    /// Waits until no worker run is in flight.
    pub async fn wait_until_idle(&self) {
        while self.is_worker_running().await {
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }
}
