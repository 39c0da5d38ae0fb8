//! Query string construction for every request kind the SDK sends.
//!
//! Builders are pure functions of the app key and the clock. The device id is
//! left out on purpose: the delivery worker appends it at send time so that
//! requests queued before the id was known still go out with it.

use std::sync::Arc;

use beacon_core::{encoding::encode_component, Clock};

/// Version string sent as `sdk_version`.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builds request payloads in the `key=value&...` form the endpoint expects.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    app_key: String,
    clock: Arc<dyn Clock>,
}

impl RequestBuilder {
    /// Creates a builder stamping requests with `clock`.
    pub fn new(app_key: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self { app_key: app_key.into(), clock }
    }

    fn base(&self) -> String {
        format!(
            "app_key={}&timestamp={}&sdk_version={}",
            encode_component(&self.app_key),
            self.clock.unix_seconds(),
            SDK_VERSION
        )
    }

    /// Session start carrying the device metrics object.
    pub fn begin_session(&self, metrics_json: &str) -> String {
        format!("{}&begin_session=1&metrics={}", self.base(), encode_component(metrics_json))
    }

    /// Session duration update. Returns `None` when there is nothing to report.
    pub fn update_session(&self, duration_secs: i64) -> Option<String> {
        (duration_secs > 0)
            .then(|| format!("{}&session_duration={}", self.base(), duration_secs))
    }

    /// Session end, with the trailing duration when positive.
    pub fn end_session(&self, duration_secs: i64) -> String {
        let mut request = format!("{}&end_session=1", self.base());
        if duration_secs > 0 {
            request.push_str(&format!("&session_duration={duration_secs}"));
        }
        request
    }

    /// Event batch. `fragment` is already percent-encoded.
    pub fn record_events(&self, fragment: &str) -> String {
        format!("{}&events={}", self.base(), fragment)
    }

    /// Crash report. Requests with this parameter are sent as POST.
    pub fn crash_report(&self, crash_json: &str) -> String {
        format!("{}&crash={}", self.base(), encode_component(crash_json))
    }

    /// User profile update.
    pub fn user_details(&self, details_json: &str) -> String {
        format!("{}&user_details={}", self.base(), encode_component(details_json))
    }

    /// Location report.
    pub fn location(&self, latitude: f64, longitude: f64) -> String {
        format!(
            "{}&location={}",
            self.base(),
            encode_component(&format!("{latitude},{longitude}"))
        )
    }
}
