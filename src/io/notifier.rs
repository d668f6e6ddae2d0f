//! System notification capability
//!
//! Notifications fire immediately when scheduled; the engine never uses
//! deferred triggers.

use crate::domain::types::{StopId, StopStatus};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Action button attached to a notification category
#[derive(Debug, Clone, Serialize)]
pub struct CategoryAction {
    pub id: String,
    pub title: String,
}

/// Structured data carried by an alert notification, for the host UI to
/// deep-link into the stop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertPayload {
    /// Unique id for this alert delivery
    pub alert_id: String,
    /// Delivery timestamp (epoch ms)
    pub ts: u64,
    pub stop_id: StopId,
    pub status: StopStatus,
    pub kind: String,
    /// Distance at evaluation time, rounded to whole meters
    pub distance_m: u64,
    pub lat: f64,
    pub lng: f64,
}

/// A notification ready to schedule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertNotification {
    pub category: String,
    pub title: String,
    pub body: String,
    /// Accent color hex for platforms that render one
    pub color: String,
    pub high_priority: bool,
    /// Not auto-dismissed; stays until the driver acts on it
    pub sticky: bool,
    pub data: AlertPayload,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Register a notification category with its action buttons; called
    /// once per dispatcher lifetime before any schedule
    async fn register_category(&self, id: &str, actions: &[CategoryAction]) -> Result<()>;

    /// Schedule a notification for immediate delivery
    async fn schedule(&self, notification: AlertNotification) -> Result<()>;
}
