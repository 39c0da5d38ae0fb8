//! Core domain models and persistence primitives for beacon.
//!
//! Provides the recorded `Event` model, the durable request and event logs
//! backed by SQLite, the device identity collaborator and a clock
//! abstraction. The delivery and SDK crates build on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod encoding;
pub mod error;
pub mod identity;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use identity::{DeviceId, DeviceIdProvider, FixedDeviceId};
pub use models::{Event, EventStamp, Segmentation};
pub use storage::{PersistentLog, Storage};
pub use time::{Clock, RealClock, TestClock};
