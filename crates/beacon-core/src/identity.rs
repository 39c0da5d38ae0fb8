//! Device identity collaborator.
//!
//! The delivery worker appends the device identifier at send time. Some
//! identifier sources only resolve after startup, so a provider may report
//! the identifier as pending; the worker then leaves the request log
//! untouched until a later trigger.

use std::sync::RwLock;

/// Source of the device identifier attached to every delivered request.
pub trait DeviceIdProvider: Send + Sync + 'static {
    /// Returns the identifier, or `None` while it is not yet available.
    fn current_id(&self) -> Option<String>;
}

/// Identifier supplied by the host application at construction time.
#[derive(Debug, Clone)]
pub struct FixedDeviceId(String);

impl FixedDeviceId {
    /// Creates a provider that always reports `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl DeviceIdProvider for FixedDeviceId {
    fn current_id(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Identifier that becomes available at some point after startup.
#[derive(Debug, Default)]
pub struct DeviceId {
    id: RwLock<Option<String>>,
}

impl DeviceId {
    /// Creates a provider whose identifier is still pending.
    pub fn pending() -> Self {
        Self::default()
    }

    /// Resolves the identifier. Empty values keep it pending.
    pub fn set(&self, id: impl Into<String>) {
        let id = id.into();
        if let Ok(mut slot) = self.id.write() {
            *slot = (!id.is_empty()).then_some(id);
        }
    }
}

impl DeviceIdProvider for DeviceId {
    fn current_id(&self) -> Option<String> {
        self.id.read().ok().and_then(|id| id.clone())
    }
}
