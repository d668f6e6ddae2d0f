//! Alert dispatch worker - serialized audio and notification delivery
//!
//! The monitor enqueues pending alerts via a bounded mpsc channel and a
//! single consumer drains it, so "at most one alert in flight" holds
//! structurally rather than by flag checking. Cooldown bookkeeping lives
//! with the consumer: a `(stop, kind)` pair never fires twice within the
//! configured window.

use crate::domain::types::{epoch_ms, AlertKind, Stop, StopId};
use crate::error::EngineError;
use crate::infra::settings::{ProximitySettings, SettingsStore, SoundAssignment};
use crate::io::audio::AudioOutput;
use crate::io::notifier::{AlertNotification, AlertPayload, CategoryAction, Notifier};
use crate::services::status::StatusCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Notification category id registered for proximity alerts
pub const ALERT_CATEGORY: &str = "proximity-alert";

/// Gap between alerts so one sound finishes before the next starts
const SETTLE_DELAY: Duration = Duration::from_millis(1500);

/// Pause after a failed delivery before the next item
const FAILURE_BACKOFF: Duration = Duration::from_millis(500);

/// A queued alert awaiting dispatch
#[derive(Debug, Clone)]
pub struct PendingAlert {
    pub stop: Stop,
    pub distance_m: f64,
    /// When the alert was enqueued, for queue-delay visibility
    pub enqueued_at: Instant,
}

/// Non-blocking enqueue handle for the dispatch worker
#[derive(Clone)]
pub struct AlertSender {
    tx: mpsc::Sender<PendingAlert>,
}

impl AlertSender {
    /// Append an alert to the queue and return immediately
    ///
    /// A full queue drops the alert with a warning; the stop re-alerts on
    /// its next range entry.
    pub fn enqueue(&self, stop: &Stop, distance_m: f64) {
        let alert =
            PendingAlert { stop: stop.clone(), distance_m, enqueued_at: Instant::now() };
        if self.tx.try_send(alert).is_err() {
            warn!(stop_id = %stop.id, "alert_queue_full_dropped");
        }
    }
}

/// Per-kind notification copy
fn kind_copy(kind: AlertKind) -> (&'static str, &'static str) {
    match kind {
        AlertKind::Collect => ("Collection stop ahead", "#2e7d32"),
        AlertKind::Skip => ("Skip stop ahead", "#c62828"),
        AlertKind::NewCustomer => ("New customer ahead", "#1565c0"),
    }
}

fn sound_uri(kind: AlertKind, sounds: &SoundAssignment) -> &str {
    match kind {
        AlertKind::Collect => &sounds.collect,
        AlertKind::Skip => &sounds.skip,
        AlertKind::NewCustomer => &sounds.new_customer,
    }
}

fn default_actions() -> Vec<CategoryAction> {
    vec![
        CategoryAction { id: "open-stop".to_string(), title: "Open stop".to_string() },
        CategoryAction { id: "dismiss".to_string(), title: "Dismiss".to_string() },
    ]
}

/// Worker that delivers alerts one at a time
pub struct DispatchWorker {
    rx: mpsc::Receiver<PendingAlert>,
    cancel: watch::Receiver<bool>,
    audio: Arc<dyn AudioOutput>,
    notifier: Arc<dyn Notifier>,
    settings: Arc<SettingsStore>,
    status: Arc<StatusCell>,
    /// Last fire time per (stop, kind); timestamps only move forward
    cooldowns: HashMap<(StopId, AlertKind), Instant>,
}

impl DispatchWorker {
    /// Run the worker until the channel closes or cancellation is signaled
    ///
    /// Cancellation is checked between items, so an in-flight delivery
    /// completes and the remainder of the queue is abandoned.
    pub async fn run(mut self) {
        info!("alert_worker_started");

        if let Err(e) = self.notifier.register_category(ALERT_CATEGORY, &default_actions()).await
        {
            warn!(error = %e, "alert_category_registration_failed");
        }

        while let Some(alert) = self.rx.recv().await {
            if *self.cancel.borrow() {
                info!("alert_worker_cancelled");
                break;
            }

            let settings = self.settings.current();
            let cooldown = Duration::from_millis(settings.notification_cooldown_ms);
            self.prune_cooldowns(cooldown);

            let kind = AlertKind::classify(alert.stop.status);
            let key = (alert.stop.id.clone(), kind);
            if let Some(last) = self.cooldowns.get(&key) {
                if last.elapsed() <= cooldown {
                    debug!(
                        stop_id = %alert.stop.id,
                        kind = %kind.as_str(),
                        "alert_cooling_down_dropped"
                    );
                    continue;
                }
            }

            match self.deliver(&alert, kind, &settings).await {
                Ok(()) => {
                    self.cooldowns.insert(key, Instant::now());
                    info!(
                        stop_id = %alert.stop.id,
                        kind = %kind.as_str(),
                        distance_m = %alert.distance_m.round(),
                        queue_delay_ms = %alert.enqueued_at.elapsed().as_millis(),
                        "alert_dispatched"
                    );
                    tokio::time::sleep(SETTLE_DELAY).await;
                }
                Err(e) => {
                    warn!(stop_id = %alert.stop.id, error = %e, "alert_delivery_failed");
                    self.status
                        .record_error(EngineError::NotificationDeliveryFailure(e.to_string()));
                    tokio::time::sleep(FAILURE_BACKOFF).await;
                }
            }
        }

        info!("alert_worker_stopped");
    }

    /// One full delivery: audio acquire, playback + notification, release
    async fn deliver(
        &self,
        alert: &PendingAlert,
        kind: AlertKind,
        settings: &ProximitySettings,
    ) -> anyhow::Result<()> {
        let sound = sound_uri(kind, &settings.sounds);
        self.audio.configure_playback().await?;
        let handle = self.audio.load(sound).await?;

        let result = async {
            self.audio.set_volume(handle, 1.0).await?;
            let notification = build_notification(alert, kind);
            // Playback starts while the notification schedules; both must land
            let (played, scheduled) =
                tokio::join!(self.audio.play(handle), self.notifier.schedule(notification));
            played?;
            scheduled?;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        // The handle is released on the failure path too
        if let Err(e) = self.audio.unload(handle).await {
            debug!(error = %e, "audio_unload_failed");
        }
        result
    }

    /// Drop records old enough that they can never suppress again
    fn prune_cooldowns(&mut self, cooldown: Duration) {
        self.cooldowns.retain(|_, last| last.elapsed() <= cooldown * 2);
    }
}

fn build_notification(alert: &PendingAlert, kind: AlertKind) -> AlertNotification {
    let (title, color) = kind_copy(kind);
    let distance_m = alert.distance_m.round() as u64;
    AlertNotification {
        category: ALERT_CATEGORY.to_string(),
        title: title.to_string(),
        body: format!("{} ({} m away)", alert.stop.address, distance_m),
        color: color.to_string(),
        high_priority: true,
        sticky: true,
        data: AlertPayload {
            alert_id: Uuid::now_v7().to_string(),
            ts: epoch_ms(),
            stop_id: alert.stop.id.clone(),
            status: alert.stop.status,
            kind: kind.as_str().to_string(),
            distance_m,
            lat: alert.stop.lat.unwrap_or(0.0),
            lng: alert.stop.lng.unwrap_or(0.0),
        },
    }
}

/// Create an alert channel and its worker
///
/// Returns the sender (for the monitor) and the worker (to be spawned).
pub fn create_dispatcher(
    audio: Arc<dyn AudioOutput>,
    notifier: Arc<dyn Notifier>,
    settings: Arc<SettingsStore>,
    status: Arc<StatusCell>,
    cancel: watch::Receiver<bool>,
    buffer_size: usize,
) -> (AlertSender, DispatchWorker) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let worker = DispatchWorker {
        rx,
        cancel,
        audio,
        notifier,
        settings,
        status,
        cooldowns: HashMap::new(),
    };
    (AlertSender { tx }, worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::StopStatus;
    use crate::infra::settings::SettingsPatch;
    use crate::io::sim::{SimAudio, SimNotifier};
    use crate::io::storage::MemoryStore;

    struct TestDispatcher {
        alerts: AlertSender,
        audio: Arc<SimAudio>,
        notifier: Arc<SimNotifier>,
        settings: Arc<SettingsStore>,
        status: Arc<StatusCell>,
        cancel_tx: watch::Sender<bool>,
    }

    fn create_test_dispatcher() -> TestDispatcher {
        let audio = Arc::new(SimAudio::new());
        let notifier = Arc::new(SimNotifier::new());
        let settings = Arc::new(SettingsStore::new(Arc::new(MemoryStore::new())));
        let status = Arc::new(StatusCell::new());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (alerts, worker) = create_dispatcher(
            audio.clone(),
            notifier.clone(),
            settings.clone(),
            status.clone(),
            cancel_rx,
            32,
        );
        tokio::spawn(worker.run());
        TestDispatcher { alerts, audio, notifier, settings, status, cancel_tx }
    }

    fn stop(id: &str, status: StopStatus) -> Stop {
        Stop {
            id: StopId::from(id),
            address: format!("{id} Main St"),
            lat: Some(37.7749),
            lng: Some(-122.4194),
            status,
            notes: None,
        }
    }

    async fn wait_for_scheduled(notifier: &SimNotifier, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if notifier.scheduled().len() >= count {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("expected scheduled notifications");
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_alert_plays_sound_and_schedules() {
        let d = create_test_dispatcher();
        d.alerts.enqueue(&stop("a", StopStatus::Collect), 12.4);
        wait_for_scheduled(&d.notifier, 1).await;

        let scheduled = d.notifier.scheduled();
        assert_eq!(scheduled.len(), 1);
        let n = &scheduled[0];
        assert_eq!(n.category, ALERT_CATEGORY);
        assert_eq!(n.title, "Collection stop ahead");
        assert!(n.high_priority);
        assert!(n.sticky);
        assert_eq!(n.data.stop_id, StopId::from("a"));
        assert_eq!(n.data.kind, "collect");
        assert_eq!(n.data.distance_m, 12);
        assert_eq!(n.data.lat, 37.7749);

        assert_eq!(d.audio.played(), vec!["sounds/collect.mp3".to_string()]);
        assert_eq!(d.audio.volumes(), vec![1.0]);
        // Handle released after completion
        assert_eq!(d.audio.outstanding_handles(), 0);
        assert_eq!(d.notifier.categories(), vec![ALERT_CATEGORY.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kind_mapping_skip_and_unrecognized() {
        let d = create_test_dispatcher();
        d.alerts.enqueue(&stop("s", StopStatus::Skip), 20.0);
        d.alerts.enqueue(&stop("p", StopStatus::Pending), 25.0);
        wait_for_scheduled(&d.notifier, 2).await;

        let scheduled = d.notifier.scheduled();
        assert_eq!(scheduled[0].data.kind, "skip");
        assert_eq!(scheduled[0].title, "Skip stop ahead");
        // Pending classifies as a collection alert
        assert_eq!(scheduled[1].data.kind, "collect");
        assert_eq!(
            d.audio.played(),
            vec!["sounds/skip.mp3".to_string(), "sounds/collect.mp3".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_suppresses_repeat_for_same_stop_and_kind() {
        let d = create_test_dispatcher();
        let s = stop("a", StopStatus::Collect);
        d.alerts.enqueue(&s, 12.0);
        d.alerts.enqueue(&s, 9.0);
        d.alerts.enqueue(&stop("b", StopStatus::Collect), 30.0);
        wait_for_scheduled(&d.notifier, 2).await;

        // Settle past any trailing work; still only two deliveries
        tokio::time::sleep(Duration::from_secs(5)).await;
        let ids: Vec<_> =
            d.notifier.scheduled().iter().map(|n| n.data.stop_id.clone()).collect();
        assert_eq!(ids, vec![StopId::from("a"), StopId::from("b")]);
    }

    #[tokio::test]
    async fn test_cooldown_expires_and_realerts() {
        let d = create_test_dispatcher();
        // Shrink the window so the test can outwait it in real time
        assert!(
            d.settings
                .save(SettingsPatch {
                    notification_cooldown_ms: Some(50),
                    ..Default::default()
                })
                .await
        );

        let s = stop("a", StopStatus::Collect);
        d.alerts.enqueue(&s, 12.0);
        wait_for_scheduled(&d.notifier, 1).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        d.alerts.enqueue(&s, 14.0);
        wait_for_scheduled(&d.notifier, 2).await;
        assert_eq!(d.notifier.scheduled().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_order_across_enqueues() {
        let d = create_test_dispatcher();
        for id in ["first", "second", "third"] {
            d.alerts.enqueue(&stop(id, StopStatus::Collect), 10.0);
        }
        wait_for_scheduled(&d.notifier, 3).await;
        let ids: Vec<_> =
            d.notifier.scheduled().iter().map(|n| n.data.stop_id.0.clone()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_failure_recorded_and_queue_continues() {
        let d = create_test_dispatcher();
        d.notifier.set_fail_schedule(true);
        d.alerts.enqueue(&stop("a", StopStatus::Collect), 10.0);

        // Give the worker a chance to fail the first delivery
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(
            d.status.snapshot().error,
            Some(EngineError::NotificationDeliveryFailure(_))
        ));
        assert_eq!(d.notifier.scheduled().len(), 0);
        // Audio handle is not leaked by the failure path
        assert_eq!(d.audio.outstanding_handles(), 0);

        // The next item still delivers
        d.notifier.set_fail_schedule(false);
        d.alerts.enqueue(&stop("b", StopStatus::Collect), 10.0);
        wait_for_scheduled(&d.notifier, 1).await;
        assert_eq!(d.notifier.scheduled()[0].data.stop_id, StopId::from("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_alert_not_in_cooldown() {
        let d = create_test_dispatcher();
        d.notifier.set_fail_schedule(true);
        let s = stop("a", StopStatus::Collect);
        d.alerts.enqueue(&s, 10.0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(d.notifier.scheduled().len(), 0);

        // Failure did not record a cooldown; the stop alerts on retry-entry
        d.notifier.set_fail_schedule(false);
        d.alerts.enqueue(&s, 10.0);
        wait_for_scheduled(&d.notifier, 1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_failure_surfaces_error_without_leaking_handle() {
        let d = create_test_dispatcher();
        d.audio.set_fail_play(true);
        d.alerts.enqueue(&stop("a", StopStatus::Collect), 10.0);
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(matches!(
            d.status.snapshot().error,
            Some(EngineError::NotificationDeliveryFailure(_))
        ));
        assert_eq!(d.audio.played().len(), 0);
        assert_eq!(d.audio.outstanding_handles(), 0);

        // The queue keeps moving and the next delivery plays its sound
        d.audio.set_fail_play(false);
        d.alerts.enqueue(&stop("b", StopStatus::Collect), 10.0);
        wait_for_scheduled(&d.notifier, 2).await;
        assert_eq!(d.audio.played(), vec!["sounds/collect.mp3".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_abandons_queue() {
        let d = create_test_dispatcher();
        d.cancel_tx.send(true).unwrap();
        // Let the cancel propagate before enqueueing
        tokio::time::sleep(Duration::from_millis(50)).await;

        d.alerts.enqueue(&stop("a", StopStatus::Collect), 10.0);
        d.alerts.enqueue(&stop("b", StopStatus::Collect), 10.0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(d.notifier.scheduled().len(), 0);
    }
}
