//! Device location capability
//!
//! The platform side (OS geolocation) implements this; the engine only
//! requests permissions and owns at most one subscription at a time.

use crate::domain::types::{AccuracyTier, Position};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Result of a permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

impl PermissionStatus {
    pub fn granted(&self) -> bool {
        *self == PermissionStatus::Granted
    }
}

/// Sampling parameters for a position subscription
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchOptions {
    pub accuracy: AccuracyTier,
    pub min_interval_ms: u64,
    pub min_distance_m: f64,
}

/// Handle to an active position subscription
pub trait LocationSubscription: Send + Sync {
    /// Stop delivering updates; idempotent
    fn cancel(&self);
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Request while-in-use location access; denial is terminal for the
    /// current tracking session
    async fn request_foreground_permission(&self) -> Result<PermissionStatus>;

    /// Request always-on location access; best effort, absence only
    /// degrades the background sampling policy
    async fn request_background_permission(&self) -> Result<PermissionStatus>;

    /// Start streaming position updates into `updates`
    async fn watch_position(
        &self,
        options: WatchOptions,
        updates: mpsc::Sender<Position>,
    ) -> Result<Box<dyn LocationSubscription>>;
}
