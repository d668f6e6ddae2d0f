//! Error types for the proximity engine
//!
//! Every asynchronous entry point converts failures into one of these
//! variants; nothing from this subsystem propagates as an unhandled fault
//! to the host application.

use thiserror::Error;

/// Failures surfaced through the tracking status
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Foreground location permission refused; tracking cannot start
    /// until the user acts
    #[error("foreground location permission denied")]
    PermissionDenied,

    /// The platform position subscription failed to start
    #[error("location subscription failed: {0}")]
    SubscriptionFailure(String),

    /// Audio playback or notification scheduling failed for one alert;
    /// the alert is dropped and the queue continues
    #[error("alert delivery failed: {0}")]
    NotificationDeliveryFailure(String),

    /// Settings were applied in memory but could not be persisted
    #[error("settings not persisted: {0}")]
    SettingsPersistenceFailure(String),
}
