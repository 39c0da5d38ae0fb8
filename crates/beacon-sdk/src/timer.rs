//! Periodic heartbeat driving `SessionController::on_timer`.

use std::{sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::{error::SdkError, session::SessionController};

/// Background task ticking the controller at a fixed period.
///
/// The first tick fires one full period after `start`. Dropping the timer
/// stops it.
#[derive(Debug)]
pub struct HeartbeatTimer {
    handle: JoinHandle<()>,
}

impl HeartbeatTimer {
    /// Spawns the timer on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(controller: Arc<SessionController>, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                match controller.on_timer().await {
                    Ok(()) => {},
                    Err(SdkError::NotInitialized) => {
                        debug!("controller halted, stopping heartbeat");
                        break;
                    },
                    Err(e) => warn!(error = %e, "heartbeat failed"),
                }
            }
        });

        Self { handle }
    }

    /// Stops the timer.
    pub fn stop(self) {
        self.handle.abort();
    }

    /// Returns true once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for HeartbeatTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
