//! Proximity monitor - the engine's external contract
//!
//! Composes the settings store, tracking controller, distance evaluator,
//! and alert dispatcher. On every accepted position sample the full stop
//! list is re-evaluated, the in-range set is diffed against the previous
//! one, and newly-entered stops are enqueued for alerting. Stops leaving
//! range produce nothing, and a stop that stays in range never re-alerts
//! until it first drops out.

use crate::domain::geo;
use crate::domain::types::{AppLifecycle, NearbyStop, Position, Stop, StopId};
use crate::error::EngineError;
use crate::infra::settings::{ProximitySettings, SettingsPatch, SettingsStore};
use crate::io::audio::AudioOutput;
use crate::io::location::LocationProvider;
use crate::io::notifier::Notifier;
use crate::io::storage::KeyValueStore;
use crate::services::dispatcher::{create_dispatcher, AlertSender};
use crate::services::status::{StatusCell, TrackingStatus};
use crate::services::tracking::LocationTrackingController;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Buffer for accepted samples between the controller and the sample loop
const SAMPLE_BUFFER: usize = 64;

/// Buffer for pending alerts; overflow drops with a warning
const ALERT_BUFFER: usize = 32;

/// Tasks and handles owned by one enabled run
struct RunHandles {
    cancel_tx: watch::Sender<bool>,
    sample_loop: JoinHandle<()>,
    supervisor: JoinHandle<()>,
}

struct MonitorInner {
    stops: Mutex<Vec<Stop>>,
    nearby: Mutex<Vec<NearbyStop>>,
    settings: Arc<SettingsStore>,
    status: Arc<StatusCell>,
    controller: Arc<LocationTrackingController>,
    audio: Arc<dyn AudioOutput>,
    notifier: Arc<dyn Notifier>,
    lifecycle: watch::Receiver<AppLifecycle>,
    run: Mutex<Option<RunHandles>>,
}

impl MonitorInner {
    /// Evaluate one accepted sample and enqueue newly-entered stops
    fn handle_sample(&self, position: Position, alerts: &AlertSender) {
        let settings = self.settings.current();
        let stops = self.stops.lock().clone();
        let in_range = geo::find_in_range(position.coord, &stops, settings.alert_distance_m);

        let mut nearby = self.nearby.lock();
        let previous: HashSet<StopId> =
            nearby.iter().map(|entry| entry.stop.id.clone()).collect();

        let mut newly_entered = 0;
        // in_range is ascending by distance, so enqueue order is too
        for entry in &in_range {
            if !previous.contains(&entry.stop.id) {
                alerts.enqueue(&entry.stop, entry.distance_m);
                newly_entered += 1;
            }
        }

        debug!(
            lat = %position.coord.lat,
            lng = %position.coord.lng,
            in_range = %in_range.len(),
            newly_entered = %newly_entered,
            "sample_evaluated"
        );
        *nearby = in_range;
    }
}

/// External-facing handle for the proximity engine
pub struct ProximityMonitor {
    inner: Arc<MonitorInner>,
}

impl ProximityMonitor {
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        audio: Arc<dyn AudioOutput>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn KeyValueStore>,
        lifecycle: watch::Receiver<AppLifecycle>,
    ) -> Self {
        let settings = Arc::new(SettingsStore::new(store));
        let status = Arc::new(StatusCell::new());
        let controller = Arc::new(LocationTrackingController::new(
            provider,
            settings.clone(),
            status.clone(),
            lifecycle.clone(),
        ));
        Self {
            inner: Arc::new(MonitorInner {
                stops: Mutex::new(Vec::new()),
                nearby: Mutex::new(Vec::new()),
                settings,
                status,
                controller,
                audio,
                notifier,
                lifecycle,
                run: Mutex::new(None),
            }),
        }
    }

    /// Read persisted settings into memory; call once before enabling
    pub async fn load_settings(&self) -> ProximitySettings {
        self.inner.settings.load().await
    }

    /// Start tracking against the given stop list
    ///
    /// Resets the in-range set, so a stop that was in range before a
    /// previous disable re-alerts if it is still in range. Returns the
    /// tracking error when the session cannot start; the dispatcher and
    /// status remain usable either way.
    pub async fn enable(&self, stops: Vec<Stop>) -> Result<(), EngineError> {
        // A fresh enable always starts from a clean run
        self.disable().await;

        info!(stops = %stops.len(), "monitor_enabled");
        *self.inner.stops.lock() = stops;
        self.inner.nearby.lock().clear();

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (alerts, worker) = create_dispatcher(
            self.inner.audio.clone(),
            self.inner.notifier.clone(),
            self.inner.settings.clone(),
            self.inner.status.clone(),
            cancel_rx,
            ALERT_BUFFER,
        );
        tokio::spawn(worker.run());

        let (sample_tx, mut sample_rx) = mpsc::channel::<Position>(SAMPLE_BUFFER);
        let loop_inner = self.inner.clone();
        let sample_loop = tokio::spawn(async move {
            while let Some(position) = sample_rx.recv().await {
                loop_inner.handle_sample(position, &alerts);
            }
        });

        let supervisor_controller = self.inner.controller.clone();
        let mut supervisor_lifecycle = self.inner.lifecycle.clone();
        let supervisor = tokio::spawn(async move {
            while supervisor_lifecycle.changed().await.is_ok() {
                let lifecycle = *supervisor_lifecycle.borrow_and_update();
                supervisor_controller.handle_lifecycle_change(lifecycle).await;
            }
        });

        *self.inner.run.lock() = Some(RunHandles { cancel_tx, sample_loop, supervisor });

        self.inner.controller.start(sample_tx).await
    }

    /// Stop tracking and clear the in-range set
    ///
    /// Safe to call at any point, including mid-dispatch: the in-flight
    /// alert completes, unstarted queue items are abandoned.
    pub async fn disable(&self) {
        let run = self.inner.run.lock().take();
        self.inner.controller.stop().await;

        if let Some(run) = run {
            if run.cancel_tx.send(true).is_err() {
                debug!("alert_worker_already_gone");
            }
            run.sample_loop.abort();
            run.supervisor.abort();
            self.inner.nearby.lock().clear();
            info!("monitor_disabled");
        }
    }

    /// Current in-range stops, ascending by distance
    pub fn nearby(&self) -> Vec<NearbyStop> {
        self.inner.nearby.lock().clone()
    }

    pub fn settings(&self) -> ProximitySettings {
        self.inner.settings.current()
    }

    /// Merge and persist a settings patch
    ///
    /// `false` means the patch was rejected or not durable; a non-durable
    /// patch still applies for this session.
    pub async fn save_settings(&self, patch: SettingsPatch) -> bool {
        let durable = self.inner.settings.save(patch).await;
        if !durable {
            warn!("settings_save_not_durable");
            self.inner
                .status
                .record_error(EngineError::SettingsPersistenceFailure(
                    "settings apply for this session only".to_string(),
                ));
        }
        durable
    }

    pub fn status(&self) -> TrackingStatus {
        self.inner.status.snapshot()
    }
}
