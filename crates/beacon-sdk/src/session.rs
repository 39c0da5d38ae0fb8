//! The public entry point: session lifecycle, event recording and the
//! auxiliary reports, all funnelled into one delivery queue.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use beacon_core::{Clock, DeviceIdProvider, RealClock, Segmentation, Storage};
use beacon_delivery::{DeliveryQueue, DeliveryTarget, PersistentRequestStore};
use serde_json::Value;
use tokio::{runtime::Handle, sync::Mutex};
use tracing::{debug, info, warn};

use crate::{
    batcher::EventBatcher,
    config::SdkConfig,
    crash,
    device::DeviceInfo,
    error::{Result, SdkError},
    request::RequestBuilder,
};

/// Orchestrates sessions and event delivery for one application.
///
/// Construct exactly one per process in the composition root and share it
/// behind an `Arc`. Operations never wait on the network: they persist a
/// request and nudge the delivery queue, which sends in the background.
///
/// After [`halt`](Self::halt) every operation returns
/// `SdkError::NotInitialized`.
pub struct SessionController {
    state: Mutex<Option<Session>>,
    crash_reporting: AtomicBool,
}

/// Event key for screen views.
pub const VIEW_EVENT_KEY: &str = "[CLY]_view";

struct Session {
    storage: Storage,
    queue: Arc<DeliveryQueue>,
    batcher: EventBatcher,
    builder: RequestBuilder,
    device_info: Arc<dyn DeviceInfo>,
    clock: Arc<dyn Clock>,
    event_queue_threshold: usize,
    disable_update_session_requests: bool,
    active_count: u32,
    session_anchor: Option<Instant>,
    crash_logs: Vec<String>,
    crash_segments: Segmentation,
    view_tracking: bool,
    first_view: bool,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController").finish_non_exhaustive()
    }
}

impl SessionController {
    /// Initialises the SDK against `storage` using the system clock.
    ///
    /// Requests left in storage by a previous run start delivering
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Configuration` if `config` is invalid and
    /// `SdkError::Delivery` if the HTTP client cannot be built.
    pub async fn init(
        config: &SdkConfig,
        storage: Storage,
        device_id: Arc<dyn DeviceIdProvider>,
        device_info: Arc<dyn DeviceInfo>,
    ) -> Result<Self> {
        Self::init_with_clock(config, storage, device_id, device_info, Arc::new(RealClock::new()))
            .await
    }

    /// Like [`init`](Self::init) with an injected clock.
    ///
    /// # Errors
    ///
    /// See [`init`](Self::init).
    pub async fn init_with_clock(
        config: &SdkConfig,
        storage: Storage,
        device_id: Arc<dyn DeviceIdProvider>,
        device_info: Arc<dyn DeviceInfo>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(PersistentRequestStore::new(storage.clone()));
        let target = DeliveryTarget::new(
            config.server_url.clone(),
            config.app_key.clone(),
            store,
            device_id,
            config.to_client_config(),
        )?;
        let queue = Arc::new(DeliveryQueue::with_target(target).await);
        queue.check_internal_state().await?;
        queue.tick().await?;

        info!(
            server_url = %config.server_url,
            event_queue_threshold = config.event_queue_threshold,
            "beacon initialized"
        );

        let session = Session {
            batcher: EventBatcher::new(storage.events.clone(), clock.clone()),
            builder: RequestBuilder::new(config.app_key.clone(), clock.clone()),
            storage,
            queue,
            device_info,
            clock,
            event_queue_threshold: config.event_queue_threshold,
            disable_update_session_requests: config.disable_update_session_requests,
            active_count: 0,
            session_anchor: None,
            crash_logs: Vec::new(),
            crash_segments: Segmentation::new(),
            view_tracking: false,
            first_view: true,
        };

        Ok(Self { state: Mutex::new(Some(session)), crash_reporting: AtomicBool::new(false) })
    }

    /// Returns true until [`halt`](Self::halt) is called.
    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Records an analytics event and flushes the batch once it reaches the
    /// configured threshold.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Validation` for an empty key, a count below 1 or a
    /// segmentation entry with an empty key or value.
    pub async fn record_event(
        &self,
        key: &str,
        segmentation: Option<Segmentation>,
        count: i32,
        sum: f64,
    ) -> Result<()> {
        let mut guard = self.state.lock().await;
        active(&mut guard)?.record_event(key, segmentation, count, sum).await
    }

    /// Turns automatic view recording on foreground entry on or off.
    pub async fn set_view_tracking(&self, enable: bool) -> Result<()> {
        let mut guard = self.state.lock().await;
        active(&mut guard)?.view_tracking = enable;
        Ok(())
    }

    /// Whether views are recorded automatically on foreground entry.
    pub async fn is_view_tracking_enabled(&self) -> Result<bool> {
        let mut guard = self.state.lock().await;
        Ok(active(&mut guard)?.view_tracking)
    }

    /// Records a view event for `name`. The first view of the controller's
    /// lifetime is flagged with `start=1`.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Validation` for an empty name.
    pub async fn record_view(&self, name: &str) -> Result<()> {
        let mut guard = self.state.lock().await;
        active(&mut guard)?.record_view(name).await
    }

    /// Queues a session start.
    pub async fn begin_session(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        active(&mut guard)?.begin_session().await
    }

    /// Queues a session end reporting `duration_secs`.
    pub async fn end_session(&self, duration_secs: i64) -> Result<()> {
        let mut guard = self.state.lock().await;
        active(&mut guard)?.end_session(duration_secs).await
    }

    /// Queues a session duration update. Non-positive durations queue
    /// nothing and do not touch the delivery queue.
    pub async fn heartbeat(&self, duration_secs: i64) -> Result<()> {
        let mut guard = self.state.lock().await;
        active(&mut guard)?.heartbeat(duration_secs).await
    }

    /// Marks a foreground context as started. The first one begins a session.
    pub async fn on_foreground_enter(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        active(&mut guard)?.enter_foreground().await
    }

    /// Like [`on_foreground_enter`](Self::on_foreground_enter), also recording
    /// a view for `view_name` when view tracking is enabled.
    pub async fn on_foreground_enter_with_view(&self, view_name: &str) -> Result<()> {
        let mut guard = self.state.lock().await;
        let session = active(&mut guard)?;

        session.enter_foreground().await?;
        if session.view_tracking {
            session.record_view(view_name).await?;
        }
        Ok(())
    }

    /// Marks a foreground context as stopped. The last one ends the session
    /// and flushes pending events regardless of the threshold.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::UnbalancedSession` without a matching enter.
    pub async fn on_foreground_exit(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        let session = active(&mut guard)?;

        if session.active_count == 0 {
            return Err(SdkError::UnbalancedSession);
        }

        session.active_count -= 1;
        if session.active_count == 0 {
            let duration = session.rounded_seconds_since_last_update();
            session.end_session(duration).await?;
            session.session_anchor = None;
            session.flush_pending_events().await?;
        }
        Ok(())
    }

    /// Periodic tick: reports elapsed session time and flushes pending
    /// events while a session is active.
    pub async fn on_timer(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        let session = active(&mut guard)?;

        if session.active_count == 0 {
            return Ok(());
        }

        if !session.disable_update_session_requests {
            let duration = session.rounded_seconds_since_last_update();
            session.heartbeat(duration).await?;
        }
        session.flush_pending_events().await
    }

    /// Adds a line to the breadcrumb log attached to crash reports.
    pub async fn add_crash_log(&self, record: impl Into<String>) -> Result<()> {
        let mut guard = self.state.lock().await;
        active(&mut guard)?.crash_logs.push(record.into());
        Ok(())
    }

    /// Replaces the custom segments attached to crash reports.
    pub async fn set_custom_crash_segments(&self, segments: Segmentation) -> Result<()> {
        let mut guard = self.state.lock().await;
        active(&mut guard)?.crash_segments = segments;
        Ok(())
    }

    /// Queues a crash report for `trace`. Crash reports are sent as POST.
    pub async fn log_exception(&self, trace: &str, nonfatal: bool) -> Result<()> {
        let mut guard = self.state.lock().await;
        let session = active(&mut guard)?;

        if trace.is_empty() {
            return Err(SdkError::validation("crash trace must not be empty"));
        }

        let crash = session.crash_json(trace, nonfatal);
        let request = session.builder.crash_report(&crash);
        session.enqueue(&request).await?;
        warn!(nonfatal, "crash report queued");
        Ok(())
    }

    /// Reports panics as fatal crashes.
    ///
    /// Installs a process-wide panic hook that queues a crash report with
    /// `_nonfatal=false` and then calls the previously installed hook. The
    /// hook waits a bounded time for the report to be persisted, so a panic
    /// raised while this controller is locked loses the report rather than
    /// hanging. Calling this again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::NotInitialized` after [`halt`](Self::halt) and
    /// `SdkError::Configuration` outside a tokio runtime.
    pub async fn enable_crash_reporting(self: &Arc<Self>) -> Result<()> {
        if self.state.lock().await.is_none() {
            return Err(SdkError::NotInitialized);
        }
        let handle = Handle::try_current()
            .map_err(|e| SdkError::configuration(format!("crash reporting needs a runtime: {e}")))?;

        if self.crash_reporting.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        crash::install_panic_hook(Arc::downgrade(self), handle);
        info!("crash reporting enabled");
        Ok(())
    }

    /// Queues a user profile update.
    ///
    /// A non-empty `picturePath` field makes the worker upload that local
    /// file alongside the request.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Validation` unless `details` is a JSON object.
    pub async fn set_user_data(&self, details: &Value) -> Result<()> {
        let mut guard = self.state.lock().await;
        let session = active(&mut guard)?;

        if !details.is_object() {
            return Err(SdkError::validation("user details must be a JSON object"));
        }

        let request = session.builder.user_details(&details.to_string());
        session.enqueue(&request).await
    }

    /// Queues a location report.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Validation` for coordinates outside the valid
    /// latitude and longitude ranges.
    pub async fn set_location(&self, latitude: f64, longitude: f64) -> Result<()> {
        let mut guard = self.state.lock().await;
        let session = active(&mut guard)?;

        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(SdkError::validation("coordinates out of range"));
        }

        let request = session.builder.location(latitude, longitude);
        session.enqueue(&request).await
    }

    /// Turns periodic session duration updates off or on.
    pub async fn set_disable_update_session_requests(&self, disable: bool) -> Result<()> {
        let mut guard = self.state.lock().await;
        active(&mut guard)?.disable_update_session_requests = disable;
        Ok(())
    }

    /// Number of foreground contexts currently entered.
    pub async fn active_count(&self) -> Result<u32> {
        let mut guard = self.state.lock().await;
        Ok(active(&mut guard)?.active_count)
    }

    /// Number of recorded events not yet folded into a request.
    pub async fn pending_event_count(&self) -> Result<usize> {
        let mut guard = self.state.lock().await;
        Ok(active(&mut guard)?.batcher.pending_count().await?)
    }

    /// The delivery queue backing this controller.
    pub async fn delivery_queue(&self) -> Result<Arc<DeliveryQueue>> {
        let mut guard = self.state.lock().await;
        Ok(active(&mut guard)?.queue.clone())
    }

    /// Resets the SDK: stops delivery, drops every queued request and event,
    /// and forgets the configuration.
    ///
    /// Requests in flight are abandoned and never retried.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Storage` if the stores cannot be cleared. The
    /// controller is halted either way.
    pub async fn halt(&self) -> Result<()> {
        let Some(session) = self.state.lock().await.take() else {
            return Err(SdkError::NotInitialized);
        };

        session.queue.halt().await;
        session.storage.clear_all().await?;
        info!("beacon halted");
        Ok(())
    }
}

fn active(state: &mut Option<Session>) -> Result<&mut Session> {
    state.as_mut().ok_or(SdkError::NotInitialized)
}

impl Session {
    async fn record_event(
        &self,
        key: &str,
        segmentation: Option<Segmentation>,
        count: i32,
        sum: f64,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(SdkError::validation("event key must not be empty"));
        }
        if count < 1 {
            return Err(SdkError::validation("event count must be at least 1"));
        }
        if let Some(segmentation) = &segmentation {
            if segmentation.iter().any(|(k, v)| k.is_empty() || v.is_empty()) {
                return Err(SdkError::validation(
                    "segmentation keys and values must not be empty",
                ));
            }
        }

        self.batcher.record(key, segmentation, count, sum).await?;
        self.send_events_if_needed().await
    }

    async fn record_view(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(SdkError::validation("view name must not be empty"));
        }

        let mut segments = Segmentation::from([
            ("name".to_string(), name.to_string()),
            ("visit".to_string(), "1".to_string()),
            ("segment".to_string(), std::env::consts::OS.to_string()),
        ]);
        if self.first_view {
            segments.insert("start".to_string(), "1".to_string());
        }

        self.record_event(VIEW_EVENT_KEY, Some(segments), 1, 0.0).await?;
        self.first_view = false;
        debug!(view = name, "view recorded");
        Ok(())
    }

    /// The count only moves once the begin request is safely queued.
    async fn enter_foreground(&mut self) -> Result<()> {
        if self.active_count == 0 {
            let anchor = self.clock.now();
            self.begin_session().await?;
            self.session_anchor = Some(anchor);
        }
        self.active_count += 1;
        Ok(())
    }

    async fn enqueue(&self, request: &str) -> Result<()> {
        self.queue.enqueue(request).await?;
        Ok(())
    }

    async fn begin_session(&self) -> Result<()> {
        let request = self.builder.begin_session(&self.device_info.metrics_json());
        self.enqueue(&request).await?;
        debug!("session started");
        Ok(())
    }

    async fn end_session(&self, duration_secs: i64) -> Result<()> {
        let request = self.builder.end_session(duration_secs);
        self.enqueue(&request).await?;
        debug!(duration_secs, "session ended");
        Ok(())
    }

    async fn heartbeat(&self, duration_secs: i64) -> Result<()> {
        match self.builder.update_session(duration_secs) {
            Some(request) => self.enqueue(&request).await,
            None => Ok(()),
        }
    }

    async fn send_events_if_needed(&self) -> Result<()> {
        let pending = self.batcher.pending_count().await?;
        if pending >= self.event_queue_threshold {
            debug!(pending, threshold = self.event_queue_threshold, "event threshold reached");
            self.flush_events().await?;
        }
        Ok(())
    }

    async fn flush_pending_events(&self) -> Result<()> {
        if self.batcher.pending_count().await? > 0 {
            self.flush_events().await?;
        }
        Ok(())
    }

    async fn flush_events(&self) -> Result<()> {
        let fragment = self.batcher.flush_to_payload_fragment().await?;
        let request = self.builder.record_events(&fragment);
        self.enqueue(&request).await
    }

    /// Whole seconds since the anchor, rounded half up. Moves the anchor to
    /// now.
    fn rounded_seconds_since_last_update(&mut self) -> i64 {
        let now = self.clock.now();
        let elapsed = self
            .session_anchor
            .map_or(Duration::ZERO, |anchor| now.saturating_duration_since(anchor));
        self.session_anchor = Some(now);

        i64::try_from((elapsed.as_millis() + 500) / 1000).unwrap_or(i64::MAX)
    }

    fn crash_json(&self, trace: &str, nonfatal: bool) -> String {
        let mut crash = self.device_info.crash_json(trace, nonfatal);

        if !self.crash_logs.is_empty() {
            crash.insert("_logs".to_string(), Value::String(self.crash_logs.join("\n")));
        }
        if !self.crash_segments.is_empty() {
            let custom = self
                .crash_segments
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            crash.insert("_custom".to_string(), Value::Object(custom));
        }

        Value::Object(crash).to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use beacon_core::{FixedDeviceId, TestClock};

    use super::*;
    use crate::device::StaticDeviceInfo;

    // Unroutable endpoint: workers fail fast and requests stay queued.
    fn config() -> SdkConfig {
        SdkConfig {
            server_url: "http://127.0.0.1:9".to_string(),
            app_key: "test-app".to_string(),
            event_queue_threshold: 3,
            ..SdkConfig::default()
        }
    }

    async fn controller() -> (SessionController, Storage, TestClock) {
        let storage = Storage::in_memory().await.unwrap();
        let clock = TestClock::new();
        let controller = SessionController::init_with_clock(
            &config(),
            storage.clone(),
            Arc::new(FixedDeviceId::new("device-1")),
            Arc::new(StaticDeviceInfo::current("1.0")),
            Arc::new(clock.clone()),
        )
        .await
        .unwrap();
        (controller, storage, clock)
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let storage = Storage::in_memory().await.unwrap();
        let config = SdkConfig { app_key: String::new(), ..config() };

        let result = SessionController::init(
            &config,
            storage,
            Arc::new(FixedDeviceId::new("device-1")),
            Arc::new(StaticDeviceInfo::default()),
        )
        .await;

        assert!(matches!(result, Err(SdkError::Configuration(_))));
    }

    #[tokio::test]
    async fn record_event_validates_arguments() {
        let (controller, storage, _) = controller().await;

        assert!(matches!(
            controller.record_event("", None, 1, 0.0).await,
            Err(SdkError::Validation(_))
        ));
        assert!(matches!(
            controller.record_event("tap", None, 0, 0.0).await,
            Err(SdkError::Validation(_))
        ));

        let segmentation = Segmentation::from([("screen".to_string(), String::new())]);
        assert!(matches!(
            controller.record_event("tap", Some(segmentation), 1, 0.0).await,
            Err(SdkError::Validation(_))
        ));

        assert!(storage.events.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn threshold_folds_events_into_one_request() {
        let (controller, storage, _) = controller().await;

        controller.record_event("a", None, 1, 0.0).await.unwrap();
        controller.record_event("b", None, 1, 0.0).await.unwrap();
        assert_eq!(controller.pending_event_count().await.unwrap(), 2);
        assert!(storage.connections.is_empty().await.unwrap());

        controller.record_event("c", None, 1, 0.0).await.unwrap();

        assert_eq!(controller.pending_event_count().await.unwrap(), 0);
        let queued = storage.connections.read_all().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert!(queued[0].contains("&events=%5B"));
    }

    #[tokio::test]
    async fn foreground_nesting_begins_and_ends_once() {
        let (controller, storage, clock) = controller().await;

        controller.on_foreground_enter().await.unwrap();
        controller.on_foreground_enter().await.unwrap();
        clock.advance(Duration::from_millis(12_600));
        controller.on_foreground_exit().await.unwrap();
        assert_eq!(controller.active_count().await.unwrap(), 1);
        controller.on_foreground_exit().await.unwrap();

        let queued = storage.connections.read_all().await.unwrap();
        assert_eq!(queued.len(), 2);
        assert!(queued[0].contains("&begin_session=1&metrics="));
        assert!(queued[1].ends_with("&end_session=1&session_duration=13"));
    }

    #[tokio::test]
    async fn failed_begin_leaves_count_untouched() {
        let (controller, storage, _) = controller().await;
        storage.pool().close().await;

        assert!(controller.on_foreground_enter().await.is_err());

        assert_eq!(controller.active_count().await.unwrap(), 0);
        assert!(matches!(
            controller.on_foreground_exit().await,
            Err(SdkError::UnbalancedSession)
        ));
    }

    #[tokio::test]
    async fn first_view_is_flagged_as_start() {
        let (controller, storage, _) = controller().await;

        controller.record_view("Home").await.unwrap();
        controller.record_view("Settings").await.unwrap();

        let raw = storage.events.read_all().await.unwrap();
        let views: Vec<_> = raw.iter().filter_map(|e| beacon_core::Event::from_json(e)).collect();
        assert_eq!(views.len(), 2);
        assert!(views.iter().all(|v| v.key == VIEW_EVENT_KEY && v.count == 1));

        let first = views[0].segmentation.as_ref().unwrap();
        assert_eq!(first["name"], "Home");
        assert_eq!(first["visit"], "1");
        assert_eq!(first["segment"], std::env::consts::OS);
        assert_eq!(first["start"], "1");

        let second = views[1].segmentation.as_ref().unwrap();
        assert_eq!(second["name"], "Settings");
        assert!(!second.contains_key("start"));

        assert!(controller.record_view("").await.is_err());
    }

    #[tokio::test]
    async fn view_tracking_records_on_enter_only_when_enabled() {
        let (controller, storage, _) = controller().await;
        assert!(!controller.is_view_tracking_enabled().await.unwrap());

        controller.on_foreground_enter_with_view("Splash").await.unwrap();
        controller.on_foreground_exit().await.unwrap();
        assert!(storage.events.is_empty().await.unwrap());

        controller.set_view_tracking(true).await.unwrap();
        controller.on_foreground_enter_with_view("Checkout").await.unwrap();

        assert_eq!(controller.active_count().await.unwrap(), 1);
        let views = storage.events.read_all().await.unwrap();
        assert_eq!(views.len(), 1);
        assert!(views[0].contains("Checkout"));
    }

    #[tokio::test]
    async fn unbalanced_exit_is_an_error() {
        let (controller, storage, _) = controller().await;

        assert!(matches!(
            controller.on_foreground_exit().await,
            Err(SdkError::UnbalancedSession)
        ));
        assert!(storage.connections.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn exit_flushes_events_below_threshold() {
        let (controller, storage, _) = controller().await;

        controller.on_foreground_enter().await.unwrap();
        controller.record_event("view", None, 1, 0.0).await.unwrap();
        controller.on_foreground_exit().await.unwrap();

        let queued = storage.connections.read_all().await.unwrap();
        assert_eq!(queued.len(), 3);
        assert!(queued[1].contains("&end_session=1"));
        assert!(queued[2].contains("&events=%5B"));
    }

    #[tokio::test]
    async fn timer_reports_elapsed_time_only_while_active() {
        let (controller, storage, clock) = controller().await;

        clock.advance(Duration::from_secs(60));
        controller.on_timer().await.unwrap();
        assert!(storage.connections.is_empty().await.unwrap());

        controller.on_foreground_enter().await.unwrap();
        clock.advance(Duration::from_secs(60));
        controller.on_timer().await.unwrap();

        let queued = storage.connections.read_all().await.unwrap();
        assert_eq!(queued.len(), 2);
        assert!(queued[1].ends_with("&session_duration=60"));
    }

    #[tokio::test]
    async fn disabled_updates_skip_heartbeat() {
        let (controller, storage, clock) = controller().await;
        controller.set_disable_update_session_requests(true).await.unwrap();

        controller.on_foreground_enter().await.unwrap();
        controller.record_event("view", None, 1, 0.0).await.unwrap();
        clock.advance(Duration::from_secs(60));
        controller.on_timer().await.unwrap();

        let queued = storage.connections.read_all().await.unwrap();
        assert_eq!(queued.len(), 2);
        assert!(queued[1].contains("&events="));
    }

    #[tokio::test]
    async fn crash_report_carries_logs_and_segments() {
        let (controller, storage, _) = controller().await;
        controller.add_crash_log("opened settings").await.unwrap();
        controller.add_crash_log("tapped save").await.unwrap();
        controller
            .set_custom_crash_segments(Segmentation::from([("build".to_string(), "42".to_string())]))
            .await
            .unwrap();

        controller.log_exception("panicked at 'boom'", true).await.unwrap();

        let queued = storage.connections.read_all().await.unwrap();
        let crash = beacon_core::encoding::query_value(&queued[0], "crash").unwrap();
        let crash: Value = serde_json::from_str(&crash).unwrap();
        assert_eq!(crash["_error"], "panicked at 'boom'");
        assert_eq!(crash["_nonfatal"], "true");
        assert_eq!(crash["_logs"], "opened settings\ntapped save");
        assert_eq!(crash["_custom"]["build"], "42");
    }

    #[tokio::test]
    async fn user_data_and_location_are_validated() {
        let (controller, storage, _) = controller().await;

        assert!(controller.set_user_data(&Value::from("name")).await.is_err());
        assert!(controller.set_location(91.0, 0.0).await.is_err());

        controller.set_user_data(&serde_json::json!({"name": "Ada"})).await.unwrap();
        controller.set_location(52.52, 13.405).await.unwrap();

        let queued = storage.connections.read_all().await.unwrap();
        assert_eq!(queued.len(), 2);
        assert!(queued[0].contains("&user_details="));
        assert!(queued[1].contains("&location=52.52%2C13.405"));
    }

    #[tokio::test]
    async fn halt_clears_state_and_rejects_calls() {
        let (controller, storage, _) = controller().await;
        controller.record_event("a", None, 1, 0.0).await.unwrap();
        controller.begin_session().await.unwrap();

        controller.halt().await.unwrap();

        assert!(!controller.is_initialized().await);
        assert!(storage.connections.is_empty().await.unwrap());
        assert!(storage.events.is_empty().await.unwrap());
        assert!(matches!(
            controller.record_event("a", None, 1, 0.0).await,
            Err(SdkError::NotInitialized)
        ));
        assert!(matches!(controller.halt().await, Err(SdkError::NotInitialized)));
    }
}
