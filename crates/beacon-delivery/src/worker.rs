//! Single drain run over the request log.
//!
//! A run sends the head request, removes it on acknowledgement and moves to
//! the next one. The first failure of any kind ends the run and leaves the
//! head in place for the next tick. Requests are never reordered or skipped.

use std::sync::Arc;

use beacon_core::{encoding::encode_component, DeviceIdProvider};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    client::Transport,
    error::{DeliveryError, ErrorCategory, Result},
    storage::RequestStore,
};

/// Everything a run needs, captured when the run is spawned.
#[derive(Clone)]
pub struct WorkerContext {
    /// Base URL of the ingestion endpoint.
    pub server_url: String,
    /// Request log to drain.
    pub store: Arc<dyn RequestStore>,
    /// Source of the device identifier appended to each request.
    pub device_id: Arc<dyn DeviceIdProvider>,
    /// Transport used to send requests.
    pub transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext").field("server_url", &self.server_url).finish_non_exhaustive()
    }
}

/// Classification of one send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The request never got a complete response.
    TransportError,
    /// Status outside 2xx.
    BadStatus,
    /// 2xx but the body is not a JSON object.
    BadBody,
    /// 2xx JSON without a success result.
    NotSuccess,
    /// Acknowledged by the endpoint.
    Success,
}

impl DeliveryOutcome {
    /// Maps an acknowledgement result to an outcome.
    pub fn from_result(result: &Result<()>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(DeliveryError::BadStatus { .. }) => Self::BadStatus,
            Err(DeliveryError::BadBody { .. }) => Self::BadBody,
            Err(DeliveryError::NotSuccess { .. }) => Self::NotSuccess,
            Err(_) => Self::TransportError,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunSummary {
    /// The log is empty.
    Drained {
        /// Requests acknowledged during the run
        delivered: usize,
    },
    /// Requests remain but no device id is available yet.
    Blocked {
        /// Requests acknowledged during the run
        delivered: usize,
    },
    /// A send failed; the head stays queued.
    Stopped {
        /// Requests acknowledged during the run
        delivered: usize,
        /// Classification of the failed attempt
        outcome: DeliveryOutcome,
    },
    /// The request store failed while reading or removing.
    StoreFailed {
        /// Requests acknowledged during the run
        delivered: usize,
        /// Storage error message
        error: String,
    },
}

impl RunSummary {
    /// Number of requests acknowledged and removed during the run.
    pub fn delivered(&self) -> usize {
        match self {
            Self::Drained { delivered }
            | Self::Blocked { delivered }
            | Self::Stopped { delivered, .. }
            | Self::StoreFailed { delivered, .. } => *delivered,
        }
    }
}

/// Drains the request log head-first.
#[derive(Debug)]
pub struct DeliveryWorker {
    context: WorkerContext,
}

impl DeliveryWorker {
    /// Creates a worker over `context`.
    pub fn new(context: WorkerContext) -> Self {
        Self { context }
    }

    /// Returns the context this worker was built with.
    pub fn context(&self) -> &WorkerContext {
        &self.context
    }

    /// Sends queued requests until the log is empty or an attempt fails.
    ///
    /// Never returns an error: every failure ends the run and is reported
    /// in the summary.
    pub async fn run(&self) -> RunSummary {
        let run_id = Uuid::new_v4();
        let span = info_span!("delivery_run", %run_id, server_url = %self.context.server_url);

        async move {
            let summary = self.drain().await;
            debug!(?summary, "delivery run finished");
            summary
        }
        .instrument(span)
        .await
    }

    async fn drain(&self) -> RunSummary {
        let mut delivered = 0;

        loop {
            let requests = match self.context.store.connections().await {
                Ok(requests) => requests,
                Err(error) => {
                    warn!(error = %error, "failed to read request log");
                    return RunSummary::StoreFailed { delivered, error: error.to_string() };
                },
            };

            let Some(head) = requests.into_iter().next() else {
                return RunSummary::Drained { delivered };
            };

            let Some(device_id) = self.context.device_id.current_id() else {
                info!("No device id available yet, leaving requests queued");
                return RunSummary::Blocked { delivered };
            };

            let payload = format!("{head}&device_id={}", encode_component(&device_id));
            let result = self.attempt(&payload).await;
            let outcome = DeliveryOutcome::from_result(&result);

            if let Err(error) = result {
                let category = ErrorCategory::from(&error);
                if error.is_retryable() {
                    warn!(
                        error = %error,
                        %category,
                        ?outcome,
                        "request not acknowledged, stopping run"
                    );
                } else {
                    error!(
                        error = %error,
                        %category,
                        "request cannot be sent until delivery is reconfigured"
                    );
                }
                return RunSummary::Stopped { delivered, outcome };
            }

            match self.context.store.remove_connection(&head).await {
                Ok(_) => {
                    delivered += 1;
                    debug!(delivered, "request acknowledged");
                },
                Err(error) => {
                    warn!(error = %error, "failed to remove acknowledged request");
                    return RunSummary::StoreFailed { delivered, error: error.to_string() };
                },
            }
        }
    }

    async fn attempt(&self, payload: &str) -> Result<()> {
        let response = self.context.transport.send(&self.context.server_url, payload).await?;
        debug!(
            status = response.status_code,
            duration_ms = response.duration.as_millis(),
            "received response"
        );
        response.acknowledgement()
    }
}
