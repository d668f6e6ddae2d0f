//! Location subscription lifecycle and sampling policy
//!
//! Owns the single active position subscription: requests permissions,
//! selects accuracy and interval from the app lifecycle state, restarts
//! the subscription on foreground/background transitions, and forwards
//! only samples that clear the minimum-movement gate.

use crate::domain::geo;
use crate::domain::types::{AccuracyTier, AppLifecycle, Coord, Position};
use crate::error::EngineError;
use crate::infra::settings::{ProximitySettings, SettingsStore};
use crate::io::location::{LocationProvider, LocationSubscription, PermissionStatus, WatchOptions};
use crate::services::status::StatusCell;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Bound on permission round-trips so start never hangs
const PERMISSION_TIMEOUT: Duration = Duration::from_secs(3);

/// Buffer for raw positions between the platform and the movement gate
const RAW_BUFFER: usize = 32;

/// Controller states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    Stopped,
    Starting,
    Tracking,
    Stopping,
}

impl TrackingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingState::Stopped => "stopped",
            TrackingState::Starting => "starting",
            TrackingState::Tracking => "tracking",
            TrackingState::Stopping => "stopping",
        }
    }
}

/// One active subscription and the task pumping its samples
struct Session {
    subscription: Box<dyn LocationSubscription>,
    pump: JoinHandle<()>,
}

pub struct LocationTrackingController {
    provider: Arc<dyn LocationProvider>,
    settings: Arc<SettingsStore>,
    status: Arc<StatusCell>,
    lifecycle: watch::Receiver<AppLifecycle>,
    state: Mutex<TrackingState>,
    session: tokio::sync::Mutex<Option<Session>>,
    /// Where background access was granted at start time
    background_granted: AtomicBool,
    /// Movement gate: last coordinate forwarded to the orchestrator.
    /// Survives lifecycle restarts, cleared by stop().
    last_forwarded: Arc<Mutex<Option<Coord>>>,
    /// Sink for accepted samples, set on start
    sample_tx: Mutex<Option<mpsc::Sender<Position>>>,
}

impl LocationTrackingController {
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        settings: Arc<SettingsStore>,
        status: Arc<StatusCell>,
        lifecycle: watch::Receiver<AppLifecycle>,
    ) -> Self {
        Self {
            provider,
            settings,
            status,
            lifecycle,
            state: Mutex::new(TrackingState::Stopped),
            session: tokio::sync::Mutex::new(None),
            background_granted: AtomicBool::new(false),
            last_forwarded: Arc::new(Mutex::new(None)),
            sample_tx: Mutex::new(None),
        }
    }

    pub fn state(&self) -> TrackingState {
        *self.state.lock()
    }

    /// Start tracking, forwarding accepted samples into `sample_tx`
    ///
    /// No-op when already starting or tracking. Permission denial is
    /// terminal for this session; the caller decides when to retry.
    pub async fn start(&self, sample_tx: mpsc::Sender<Position>) -> Result<(), EngineError> {
        {
            let mut state = self.state.lock();
            match *state {
                TrackingState::Starting | TrackingState::Tracking => {
                    debug!(state = %state.as_str(), "tracking_start_ignored");
                    return Ok(());
                }
                _ => *state = TrackingState::Starting,
            }
        }
        info!("tracking_starting");

        let foreground =
            timeout(PERMISSION_TIMEOUT, self.provider.request_foreground_permission()).await;
        if !matches!(foreground, Ok(Ok(PermissionStatus::Granted))) {
            warn!("foreground_permission_denied");
            *self.state.lock() = TrackingState::Stopped;
            self.status.set_tracking(false);
            self.status.record_error(EngineError::PermissionDenied);
            return Err(EngineError::PermissionDenied);
        }

        // Best effort: absence only coarsens the background policy
        let background = matches!(
            timeout(PERMISSION_TIMEOUT, self.provider.request_background_permission()).await,
            Ok(Ok(PermissionStatus::Granted))
        );
        self.background_granted.store(background, Ordering::Relaxed);
        debug!(background_granted = %background, "permissions_resolved");

        *self.sample_tx.lock() = Some(sample_tx);

        match self.open_session().await {
            Ok(()) => {
                *self.state.lock() = TrackingState::Tracking;
                self.status.set_tracking(true);
                self.status.clear_error();
                info!("tracking_started");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "subscription_failed");
                *self.state.lock() = TrackingState::Stopped;
                self.status.set_tracking(false);
                let error = EngineError::SubscriptionFailure(e.to_string());
                self.status.record_error(error.clone());
                Err(error)
            }
        }
    }

    /// Stop tracking; idempotent
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state == TrackingState::Stopped {
                return;
            }
            *state = TrackingState::Stopping;
        }

        self.close_session().await;
        *self.last_forwarded.lock() = None;
        *self.sample_tx.lock() = None;
        *self.state.lock() = TrackingState::Stopped;
        self.status.set_tracking(false);
        self.status.clear_error();
        info!("tracking_stopped");
    }

    /// React to a lifecycle transition
    ///
    /// While tracking, the subscription is fully torn down and recreated
    /// so the accuracy/interval policy is re-selected for the new state.
    pub async fn handle_lifecycle_change(&self, lifecycle: AppLifecycle) {
        if self.state() != TrackingState::Tracking {
            debug!(lifecycle = %lifecycle.as_str(), "lifecycle_change_ignored");
            return;
        }
        info!(lifecycle = %lifecycle.as_str(), "lifecycle_restart");

        if let Err(e) = self.open_session().await {
            warn!(error = %e, "lifecycle_restart_failed");
            *self.state.lock() = TrackingState::Stopped;
            self.status.set_tracking(false);
            self.status.record_error(EngineError::SubscriptionFailure(e.to_string()));
        }
    }

    /// Create the subscription and its pump task, tearing down any prior
    /// session first (at most one subscription exists at a time)
    async fn open_session(&self) -> anyhow::Result<()> {
        self.close_session().await;

        let settings = self.settings.current();
        let lifecycle = *self.lifecycle.borrow();
        let options = self.select_options(&settings, lifecycle);
        debug!(
            lifecycle = %lifecycle.as_str(),
            accuracy = %options.accuracy.as_str(),
            interval_ms = %options.min_interval_ms,
            "watch_options_selected"
        );

        let sample_tx = self
            .sample_tx
            .lock()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("sample sink not set"))?;

        let (raw_tx, mut raw_rx) = mpsc::channel::<Position>(RAW_BUFFER);
        let subscription = self.provider.watch_position(options, raw_tx).await?;

        let gate = self.last_forwarded.clone();
        let min_movement_m = settings.min_movement_m;
        let pump = tokio::spawn(async move {
            while let Some(position) = raw_rx.recv().await {
                let forward = {
                    let mut last = gate.lock();
                    match *last {
                        Some(prev)
                            if geo::distance_m(prev, position.coord) < min_movement_m =>
                        {
                            false
                        }
                        _ => {
                            *last = Some(position.coord);
                            true
                        }
                    }
                };
                if !forward {
                    debug!("position_below_movement_threshold");
                    continue;
                }
                if sample_tx.send(position).await.is_err() {
                    // Orchestrator is gone; the session is being torn down
                    break;
                }
            }
        });

        *self.session.lock().await = Some(Session { subscription, pump });
        Ok(())
    }

    async fn close_session(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.subscription.cancel();
            session.pump.abort();
            debug!("session_closed");
        }
    }

    /// Accuracy and interval as a function of lifecycle state and
    /// background permission, bounding battery cost while backgrounded
    fn select_options(
        &self,
        settings: &ProximitySettings,
        lifecycle: AppLifecycle,
    ) -> WatchOptions {
        match lifecycle {
            AppLifecycle::Foreground => WatchOptions {
                accuracy: settings.accuracy,
                min_interval_ms: settings.foreground_interval_ms,
                min_distance_m: settings.min_movement_m,
            },
            AppLifecycle::Background => WatchOptions {
                accuracy: if self.background_granted.load(Ordering::Relaxed) {
                    AccuracyTier::Balanced
                } else {
                    AccuracyTier::Low
                },
                min_interval_ms: settings.background_interval_ms,
                min_distance_m: settings.min_movement_m,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::sim::SimLocationProvider;
    use crate::io::storage::MemoryStore;

    struct TestController {
        controller: LocationTrackingController,
        provider: Arc<SimLocationProvider>,
        status: Arc<StatusCell>,
        lifecycle_tx: watch::Sender<AppLifecycle>,
        sample_rx: mpsc::Receiver<Position>,
        sample_tx: mpsc::Sender<Position>,
    }

    fn create_test_controller() -> TestController {
        let provider = Arc::new(SimLocationProvider::new());
        let settings = Arc::new(SettingsStore::new(Arc::new(MemoryStore::new())));
        let status = Arc::new(StatusCell::new());
        let (lifecycle_tx, lifecycle_rx) = watch::channel(AppLifecycle::Foreground);
        let controller = LocationTrackingController::new(
            provider.clone(),
            settings,
            status.clone(),
            lifecycle_rx,
        );
        let (sample_tx, sample_rx) = mpsc::channel(16);
        TestController { controller, provider, status, lifecycle_tx, sample_rx, sample_tx }
    }

    async fn recv_sample(rx: &mut mpsc::Receiver<Position>) -> Option<Position> {
        tokio::time::timeout(Duration::from_millis(200), rx.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn test_start_creates_subscription_and_tracks() {
        let mut t = create_test_controller();
        t.controller.start(t.sample_tx.clone()).await.unwrap();

        assert_eq!(t.controller.state(), TrackingState::Tracking);
        assert!(t.provider.has_active_watch());
        assert!(t.status.snapshot().is_tracking);

        t.provider.push(Position::new(37.7749, -122.4194)).await;
        let sample = recv_sample(&mut t.sample_rx).await.unwrap();
        assert_eq!(sample.coord.lat, 37.7749);
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let t = create_test_controller();
        t.controller.start(t.sample_tx.clone()).await.unwrap();
        t.controller.start(t.sample_tx.clone()).await.unwrap();
        // Only one subscription was ever created
        assert_eq!(t.provider.watch_options().len(), 1);
    }

    #[tokio::test]
    async fn test_permission_denied_is_terminal() {
        let t = create_test_controller();
        t.provider.deny_foreground();

        let result = t.controller.start(t.sample_tx.clone()).await;
        assert_eq!(result, Err(EngineError::PermissionDenied));
        assert_eq!(t.controller.state(), TrackingState::Stopped);
        assert!(!t.provider.has_active_watch());

        let status = t.status.snapshot();
        assert!(!status.is_tracking);
        assert_eq!(status.error, Some(EngineError::PermissionDenied));
    }

    #[tokio::test]
    async fn test_subscription_failure_surfaces_error() {
        let t = create_test_controller();
        t.provider.set_fail_watch(true);

        let result = t.controller.start(t.sample_tx.clone()).await;
        assert!(matches!(result, Err(EngineError::SubscriptionFailure(_))));
        assert_eq!(t.controller.state(), TrackingState::Stopped);
        assert!(matches!(
            t.status.snapshot().error,
            Some(EngineError::SubscriptionFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_movement_gate_suppresses_stationary_samples() {
        let mut t = create_test_controller();
        t.controller.start(t.sample_tx.clone()).await.unwrap();

        // First sample always forwards
        t.provider.push(Position::new(37.7749, -122.4194)).await;
        assert!(recv_sample(&mut t.sample_rx).await.is_some());

        // ~1m move, below the 10m default gate
        t.provider.push(Position::new(37.77491, -122.4194)).await;
        assert!(recv_sample(&mut t.sample_rx).await.is_none());

        // ~111m move clears the gate
        t.provider.push(Position::new(37.7759, -122.4194)).await;
        assert!(recv_sample(&mut t.sample_rx).await.is_some());
    }

    #[tokio::test]
    async fn test_lifecycle_transition_restarts_with_new_policy() {
        let mut t = create_test_controller();
        t.controller.start(t.sample_tx.clone()).await.unwrap();

        t.lifecycle_tx.send(AppLifecycle::Background).unwrap();
        t.controller.handle_lifecycle_change(AppLifecycle::Background).await;

        let options = t.provider.watch_options();
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].accuracy, AccuracyTier::High);
        assert_eq!(options[0].min_interval_ms, 5_000);
        // Background without the background grant degrades to low accuracy
        assert_eq!(options[1].accuracy, AccuracyTier::Low);
        assert_eq!(options[1].min_interval_ms, 15_000);
        assert_eq!(t.controller.state(), TrackingState::Tracking);

        // The movement gate survives the restart
        t.provider.push(Position::new(37.7749, -122.4194)).await;
        assert!(recv_sample(&mut t.sample_rx).await.is_some());
        t.provider.push(Position::new(37.77491, -122.4194)).await;
        assert!(recv_sample(&mut t.sample_rx).await.is_none());
    }

    #[tokio::test]
    async fn test_background_grant_selects_balanced_accuracy() {
        let t = create_test_controller();
        t.provider.grant_background();
        t.lifecycle_tx.send(AppLifecycle::Background).unwrap();
        t.controller.start(t.sample_tx.clone()).await.unwrap();

        let options = t.provider.watch_options();
        assert_eq!(options[0].accuracy, AccuracyTier::Balanced);
        assert_eq!(options[0].min_interval_ms, 15_000);
    }

    #[tokio::test]
    async fn test_lifecycle_change_while_stopped_is_ignored() {
        let t = create_test_controller();
        t.controller.handle_lifecycle_change(AppLifecycle::Background).await;
        assert_eq!(t.controller.state(), TrackingState::Stopped);
        assert!(t.provider.watch_options().is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_clears_state() {
        let t = create_test_controller();
        t.controller.start(t.sample_tx.clone()).await.unwrap();

        t.controller.stop().await;
        assert_eq!(t.controller.state(), TrackingState::Stopped);
        assert!(!t.provider.has_active_watch());
        assert!(!t.status.snapshot().is_tracking);

        t.controller.stop().await;
        assert_eq!(t.controller.state(), TrackingState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_clears_error_and_movement_gate() {
        let mut t = create_test_controller();
        t.controller.start(t.sample_tx.clone()).await.unwrap();
        t.provider.push(Position::new(37.7749, -122.4194)).await;
        assert!(recv_sample(&mut t.sample_rx).await.is_some());

        t.status.record_error(EngineError::SubscriptionFailure("x".to_string()));
        t.controller.stop().await;
        assert_eq!(t.status.snapshot().error, None);

        // After a restart the first sample forwards even if stationary
        t.controller.start(t.sample_tx.clone()).await.unwrap();
        t.provider.push(Position::new(37.7749, -122.4194)).await;
        assert!(recv_sample(&mut t.sample_rx).await.is_some());
    }
}
