//! Delivery pipeline for queued telemetry requests.
//!
//! Requests are fully encoded query strings persisted in a `RequestStore`.
//! The `DeliveryQueue` appends them and triggers at most one
//! `DeliveryWorker` run at a time. A run drains the log head-first over HTTP
//! and stops at the first request the endpoint does not acknowledge, leaving
//! it queued for the next trigger.
//!
//! # Delivery guarantees
//!
//! - **At least once** - a request is removed only after a 2xx response whose
//!   JSON body reports `"result": "success"`.
//! - **In order** - the head is always sent first and never skipped.
//! - **Single flight** - concurrent triggers start one worker.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use beacon_core::{FixedDeviceId, Storage};
//! use beacon_delivery::{
//!     client::ClientConfig, DeliveryError, DeliveryQueue, DeliveryTarget, PersistentRequestStore,
//! };
//!
//! # async fn example(storage: Storage) -> Result<(), DeliveryError> {
//! let target = DeliveryTarget::new(
//!     "https://collector.example.com",
//!     "app-key",
//!     Arc::new(PersistentRequestStore::new(storage)),
//!     Arc::new(FixedDeviceId::new("device-1")),
//!     ClientConfig::default(),
//! )?;
//! let queue = DeliveryQueue::with_target(target).await;
//!
//! queue.enqueue("app_key=app-key&timestamp=0&sdk_version=0.1.0&begin_session=1").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod queue;
pub mod storage;
pub mod worker;

pub use client::{ClientConfig, DeliveryClient, DeliveryResponse, RequestMode, Transport};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use queue::{DeliveryQueue, DeliveryTarget};
pub use storage::{PersistentRequestStore, RequestStore};
pub use worker::{DeliveryOutcome, DeliveryWorker, RunSummary, WorkerContext};

/// Default connect and read timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
