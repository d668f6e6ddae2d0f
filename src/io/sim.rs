//! Simulated capabilities for local testing and the sim binary
//!
//! Each fake records the calls it receives and can be scripted to deny
//! permissions or fail operations, so engine behavior can be driven
//! end-to-end without device hardware.

use crate::domain::types::Position;
use crate::io::audio::{AudioHandle, AudioOutput};
use crate::io::location::{
    LocationProvider, LocationSubscription, PermissionStatus, WatchOptions,
};
use crate::io::notifier::{AlertNotification, CategoryAction, Notifier};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

struct ActiveWatch {
    id: u64,
    tx: mpsc::Sender<Position>,
}

/// Scriptable location provider; positions are pushed by the test or the
/// sim driver rather than arriving from the OS
pub struct SimLocationProvider {
    foreground: Mutex<PermissionStatus>,
    background: Mutex<PermissionStatus>,
    active: Arc<Mutex<Option<ActiveWatch>>>,
    watch_log: Mutex<Vec<WatchOptions>>,
    fail_watch: AtomicBool,
    next_id: AtomicU64,
}

impl SimLocationProvider {
    pub fn new() -> Self {
        Self {
            foreground: Mutex::new(PermissionStatus::Granted),
            background: Mutex::new(PermissionStatus::Denied),
            active: Arc::new(Mutex::new(None)),
            watch_log: Mutex::new(Vec::new()),
            fail_watch: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn deny_foreground(&self) {
        *self.foreground.lock() = PermissionStatus::Denied;
    }

    pub fn grant_background(&self) {
        *self.background.lock() = PermissionStatus::Granted;
    }

    /// Make the next `watch_position` call fail
    pub fn set_fail_watch(&self, fail: bool) {
        self.fail_watch.store(fail, Ordering::Relaxed);
    }

    /// Deliver a position to the active subscription
    ///
    /// Returns false when no subscription is active or the engine has
    /// stopped consuming.
    pub async fn push(&self, position: Position) -> bool {
        let tx = match &*self.active.lock() {
            Some(watch) => watch.tx.clone(),
            None => return false,
        };
        tx.send(position).await.is_ok()
    }

    /// Options of every subscription created so far, in creation order
    pub fn watch_options(&self) -> Vec<WatchOptions> {
        self.watch_log.lock().clone()
    }

    pub fn has_active_watch(&self) -> bool {
        self.active.lock().is_some()
    }
}

impl Default for SimLocationProvider {
    fn default() -> Self {
        Self::new()
    }
}

struct SimSubscription {
    id: u64,
    active: Arc<Mutex<Option<ActiveWatch>>>,
}

impl LocationSubscription for SimSubscription {
    fn cancel(&self) {
        let mut active = self.active.lock();
        if active.as_ref().map(|w| w.id) == Some(self.id) {
            *active = None;
            debug!(watch_id = %self.id, "sim_watch_cancelled");
        }
    }
}

#[async_trait]
impl LocationProvider for SimLocationProvider {
    async fn request_foreground_permission(&self) -> Result<PermissionStatus> {
        Ok(*self.foreground.lock())
    }

    async fn request_background_permission(&self) -> Result<PermissionStatus> {
        Ok(*self.background.lock())
    }

    async fn watch_position(
        &self,
        options: WatchOptions,
        updates: mpsc::Sender<Position>,
    ) -> Result<Box<dyn LocationSubscription>> {
        if self.fail_watch.load(Ordering::Relaxed) {
            anyhow::bail!("simulated subscription failure");
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.watch_log.lock().push(options);
        *self.active.lock() = Some(ActiveWatch { id, tx: updates });
        debug!(watch_id = %id, accuracy = %options.accuracy.as_str(), "sim_watch_started");
        Ok(Box::new(SimSubscription { id, active: self.active.clone() }))
    }
}

/// Recording audio fake; playback is instant unless a duration is set
#[derive(Default)]
pub struct SimAudio {
    loaded: Mutex<HashMap<AudioHandle, String>>,
    played: Mutex<Vec<String>>,
    volumes: Mutex<Vec<f64>>,
    play_duration: Mutex<Duration>,
    fail_play: AtomicBool,
    next_handle: AtomicU64,
}

impl SimAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_play_duration(&self, duration: Duration) {
        *self.play_duration.lock() = duration;
    }

    pub fn set_fail_play(&self, fail: bool) {
        self.fail_play.store(fail, Ordering::Relaxed);
    }

    /// URIs played to completion, in order
    pub fn played(&self) -> Vec<String> {
        self.played.lock().clone()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.volumes.lock().clone()
    }

    /// Handles loaded but not yet unloaded
    pub fn outstanding_handles(&self) -> usize {
        self.loaded.lock().len()
    }
}

#[async_trait]
impl AudioOutput for SimAudio {
    async fn configure_playback(&self) -> Result<()> {
        Ok(())
    }

    async fn load(&self, uri: &str) -> Result<AudioHandle> {
        let handle = AudioHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.loaded.lock().insert(handle, uri.to_string());
        Ok(handle)
    }

    async fn set_volume(&self, handle: AudioHandle, volume: f64) -> Result<()> {
        if !self.loaded.lock().contains_key(&handle) {
            anyhow::bail!("set_volume on unknown handle");
        }
        self.volumes.lock().push(volume);
        Ok(())
    }

    async fn play(&self, handle: AudioHandle) -> Result<()> {
        let uri = self
            .loaded
            .lock()
            .get(&handle)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("play on unknown handle"))?;
        if self.fail_play.load(Ordering::Relaxed) {
            anyhow::bail!("simulated playback failure");
        }
        let duration = *self.play_duration.lock();
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
        self.played.lock().push(uri);
        Ok(())
    }

    async fn unload(&self, handle: AudioHandle) -> Result<()> {
        self.loaded.lock().remove(&handle);
        Ok(())
    }
}

/// Recording notifier fake
#[derive(Default)]
pub struct SimNotifier {
    categories: Mutex<Vec<String>>,
    scheduled: Mutex<Vec<AlertNotification>>,
    fail_schedule: AtomicBool,
}

impl SimNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_schedule(&self, fail: bool) {
        self.fail_schedule.store(fail, Ordering::Relaxed);
    }

    pub fn categories(&self) -> Vec<String> {
        self.categories.lock().clone()
    }

    /// Notifications scheduled so far, in delivery order
    pub fn scheduled(&self) -> Vec<AlertNotification> {
        self.scheduled.lock().clone()
    }
}

#[async_trait]
impl Notifier for SimNotifier {
    async fn register_category(&self, id: &str, _actions: &[CategoryAction]) -> Result<()> {
        self.categories.lock().push(id.to_string());
        Ok(())
    }

    async fn schedule(&self, notification: AlertNotification) -> Result<()> {
        if self.fail_schedule.load(Ordering::Relaxed) {
            anyhow::bail!("simulated scheduling failure");
        }
        debug!(
            stop_id = %notification.data.stop_id,
            title = %notification.title,
            "sim_notification_scheduled"
        );
        self.scheduled.lock().push(notification);
        Ok(())
    }
}
