//! Shared tracking status cell
//!
//! The controller, dispatcher, and monitor all write here; the host only
//! reads snapshots through `ProximityMonitor::status`.

use crate::error::EngineError;
use parking_lot::Mutex;

/// Caller-visible tracking state
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingStatus {
    pub is_tracking: bool,
    pub error: Option<EngineError>,
}

#[derive(Default)]
struct StatusInner {
    tracking: bool,
    error: Option<EngineError>,
}

/// Interior-mutable status shared across the engine's tasks
#[derive(Default)]
pub struct StatusCell {
    inner: Mutex<StatusInner>,
}

impl StatusCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tracking(&self, tracking: bool) {
        self.inner.lock().tracking = tracking;
    }

    pub fn record_error(&self, error: EngineError) {
        self.inner.lock().error = Some(error);
    }

    pub fn clear_error(&self) {
        self.inner.lock().error = None;
    }

    pub fn snapshot(&self) -> TrackingStatus {
        let inner = self.inner.lock();
        TrackingStatus { is_tracking: inner.tracking, error: inner.error.clone() }
    }
}
