//! Session tracking and event batching for the beacon telemetry pipeline.
//!
//! [`SessionController`] is the public surface. It records events into a
//! persistent batch, turns session transitions into requests, and hands every
//! request to the durable delivery queue from `beacon-delivery`:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use beacon_core::{FixedDeviceId, Storage};
//! use beacon_sdk::{HeartbeatTimer, SdkConfig, SessionController, StaticDeviceInfo};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = SdkConfig::load()?;
//! let storage = Storage::open(&config.database_path).await?;
//! let controller = Arc::new(
//!     SessionController::init(
//!         &config,
//!         storage,
//!         Arc::new(FixedDeviceId::new("device-1")),
//!         Arc::new(StaticDeviceInfo::current("1.0.0")),
//!     )
//!     .await?,
//! );
//! let _timer = HeartbeatTimer::start(controller.clone(), config.heartbeat_interval());
//!
//! controller.on_foreground_enter().await?;
//! controller.record_event("purchase", None, 1, 9.99).await?;
//! controller.on_foreground_exit().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod batcher;
pub mod config;
mod crash;
pub mod device;
pub mod error;
pub mod request;
pub mod session;
pub mod timer;

pub use batcher::EventBatcher;
pub use config::SdkConfig;
pub use device::{DeviceInfo, StaticDeviceInfo};
pub use error::{Result, SdkError};
pub use request::{RequestBuilder, SDK_VERSION};
pub use session::{SessionController, VIEW_EVENT_KEY};
pub use timer::HeartbeatTimer;
