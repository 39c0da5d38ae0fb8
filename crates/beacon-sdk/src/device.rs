//! Device metadata attached to session and crash requests.

use serde_json::{Map, Value};

/// Supplies the metadata JSON documents sent with session starts and crash
/// reports. Implementations return unencoded JSON text.
pub trait DeviceInfo: Send + Sync + 'static {
    /// Metrics object sent with `begin_session`.
    fn metrics_json(&self) -> String;

    /// Crash object for a report carrying `trace`.
    fn crash_json(&self, trace: &str, nonfatal: bool) -> Map<String, Value>;
}

/// Device metadata fixed at construction time.
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceInfo {
    /// Device model.
    pub device: String,
    /// Operating system name.
    pub os: String,
    /// Operating system version.
    pub os_version: String,
    /// Host application version.
    pub app_version: String,
}

impl StaticDeviceInfo {
    /// Metadata for the running host, with the given application version.
    pub fn current(app_version: impl Into<String>) -> Self {
        Self {
            device: std::env::consts::ARCH.to_string(),
            os: std::env::consts::OS.to_string(),
            os_version: String::new(),
            app_version: app_version.into(),
        }
    }

    fn common_fields(&self, target: &mut Map<String, Value>) {
        insert_non_empty(target, "_device", &self.device);
        insert_non_empty(target, "_os", &self.os);
        insert_non_empty(target, "_os_version", &self.os_version);
        insert_non_empty(target, "_app_version", &self.app_version);
    }
}

impl DeviceInfo for StaticDeviceInfo {
    fn metrics_json(&self) -> String {
        let mut metrics = Map::new();
        self.common_fields(&mut metrics);
        Value::Object(metrics).to_string()
    }

    fn crash_json(&self, trace: &str, nonfatal: bool) -> Map<String, Value> {
        let mut crash = Map::new();
        insert_non_empty(&mut crash, "_error", trace);
        crash.insert("_nonfatal".to_string(), Value::String(nonfatal.to_string()));
        self.common_fields(&mut crash);
        crash
    }
}

/// Empty values are left out entirely rather than sent as `""`.
pub(crate) fn insert_non_empty(target: &mut Map<String, Value>, key: &str, value: &str) {
    if !value.is_empty() {
        target.insert(key.to_string(), Value::String(value.to_string()));
    }
}
