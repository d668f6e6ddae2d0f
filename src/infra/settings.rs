//! User-tunable proximity settings
//!
//! Persisted as a single JSON document in the key-value capability.
//! Every field carries a serde default, so a persisted blob from an older
//! build merges over the built-in defaults instead of replacing them.

use crate::domain::types::AccuracyTier;
use crate::io::storage::KeyValueStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Storage key for the persisted settings document
pub const SETTINGS_KEY: &str = "proximity_settings";

/// Bound on storage round-trips so load/save never hang
const STORAGE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundAssignment {
    #[serde(default = "default_collect_sound")]
    pub collect: String,
    #[serde(default = "default_skip_sound")]
    pub skip: String,
    #[serde(default = "default_new_customer_sound")]
    pub new_customer: String,
}

fn default_collect_sound() -> String {
    "sounds/collect.mp3".to_string()
}

fn default_skip_sound() -> String {
    "sounds/skip.mp3".to_string()
}

fn default_new_customer_sound() -> String {
    "sounds/new_customer.mp3".to_string()
}

impl Default for SoundAssignment {
    fn default() -> Self {
        Self {
            collect: default_collect_sound(),
            skip: default_skip_sound(),
            new_customer: default_new_customer_sound(),
        }
    }
}

/// All numeric fields are strictly positive; patches violating that are
/// rejected at `save` time and persisted blobs are sanitized at `load` time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximitySettings {
    /// Alert radius around each stop (meters)
    #[serde(default = "default_alert_distance_m")]
    pub alert_distance_m: f64,
    /// Minimum device movement before a new sample is evaluated (meters)
    #[serde(default = "default_min_movement_m")]
    pub min_movement_m: f64,
    /// Minimum gap between repeated alerts for the same stop and kind
    #[serde(default = "default_notification_cooldown_ms")]
    pub notification_cooldown_ms: u64,
    /// Sampling interval while the app is foregrounded
    #[serde(default = "default_foreground_interval_ms")]
    pub foreground_interval_ms: u64,
    /// Sampling interval while the app is backgrounded
    #[serde(default = "default_background_interval_ms")]
    pub background_interval_ms: u64,
    /// Accuracy tier requested while foregrounded
    #[serde(default = "default_accuracy")]
    pub accuracy: AccuracyTier,
    #[serde(default)]
    pub sounds: SoundAssignment,
}

fn default_alert_distance_m() -> f64 {
    50.0
}

fn default_min_movement_m() -> f64 {
    10.0
}

fn default_notification_cooldown_ms() -> u64 {
    120_000
}

fn default_foreground_interval_ms() -> u64 {
    5_000
}

fn default_background_interval_ms() -> u64 {
    15_000
}

fn default_accuracy() -> AccuracyTier {
    AccuracyTier::High
}

impl Default for ProximitySettings {
    fn default() -> Self {
        Self {
            alert_distance_m: default_alert_distance_m(),
            min_movement_m: default_min_movement_m(),
            notification_cooldown_ms: default_notification_cooldown_ms(),
            foreground_interval_ms: default_foreground_interval_ms(),
            background_interval_ms: default_background_interval_ms(),
            accuracy: default_accuracy(),
            sounds: SoundAssignment::default(),
        }
    }
}

impl ProximitySettings {
    /// Replace non-positive numeric fields from a persisted blob with
    /// their defaults, so a corrupt document cannot disable the engine
    fn sanitize(mut self) -> Self {
        if self.alert_distance_m <= 0.0 {
            warn!(value = %self.alert_distance_m, "settings_alert_distance_invalid");
            self.alert_distance_m = default_alert_distance_m();
        }
        if self.min_movement_m <= 0.0 {
            warn!(value = %self.min_movement_m, "settings_min_movement_invalid");
            self.min_movement_m = default_min_movement_m();
        }
        if self.notification_cooldown_ms == 0 {
            self.notification_cooldown_ms = default_notification_cooldown_ms();
        }
        if self.foreground_interval_ms == 0 {
            self.foreground_interval_ms = default_foreground_interval_ms();
        }
        if self.background_interval_ms == 0 {
            self.background_interval_ms = default_background_interval_ms();
        }
        self
    }
}

/// Partial settings update; omitted fields keep their current values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_distance_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_movement_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_cooldown_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreground_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<AccuracyTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sounds: Option<SoundAssignment>,
}

impl SettingsPatch {
    /// Reject patches carrying non-positive numeric values
    fn validate(&self) -> Result<(), &'static str> {
        if matches!(self.alert_distance_m, Some(v) if v <= 0.0) {
            return Err("alert_distance_m must be positive");
        }
        if matches!(self.min_movement_m, Some(v) if v <= 0.0) {
            return Err("min_movement_m must be positive");
        }
        if self.notification_cooldown_ms == Some(0) {
            return Err("notification_cooldown_ms must be positive");
        }
        if self.foreground_interval_ms == Some(0) {
            return Err("foreground_interval_ms must be positive");
        }
        if self.background_interval_ms == Some(0) {
            return Err("background_interval_ms must be positive");
        }
        Ok(())
    }

    fn apply(&self, base: &mut ProximitySettings) {
        if let Some(v) = self.alert_distance_m {
            base.alert_distance_m = v;
        }
        if let Some(v) = self.min_movement_m {
            base.min_movement_m = v;
        }
        if let Some(v) = self.notification_cooldown_ms {
            base.notification_cooldown_ms = v;
        }
        if let Some(v) = self.foreground_interval_ms {
            base.foreground_interval_ms = v;
        }
        if let Some(v) = self.background_interval_ms {
            base.background_interval_ms = v;
        }
        if let Some(v) = self.accuracy {
            base.accuracy = v;
        }
        if let Some(ref v) = self.sounds {
            base.sounds = v.clone();
        }
    }
}

/// In-memory settings with best-effort persistence
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
    current: Mutex<ProximitySettings>,
}

impl SettingsStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store, current: Mutex::new(ProximitySettings::default()) }
    }

    /// Read the persisted document and merge it over the defaults
    ///
    /// Missing or corrupt storage falls back to defaults; this never fails.
    pub async fn load(&self) -> ProximitySettings {
        let loaded = match timeout(STORAGE_TIMEOUT, self.store.get(SETTINGS_KEY)).await {
            Ok(Ok(Some(raw))) => match serde_json::from_str::<ProximitySettings>(&raw) {
                Ok(settings) => {
                    debug!("settings_loaded");
                    settings.sanitize()
                }
                Err(e) => {
                    warn!(error = %e, "settings_parse_failed_using_defaults");
                    ProximitySettings::default()
                }
            },
            Ok(Ok(None)) => {
                debug!("settings_not_persisted_using_defaults");
                ProximitySettings::default()
            }
            Ok(Err(e)) => {
                warn!(error = %e, "settings_read_failed_using_defaults");
                ProximitySettings::default()
            }
            Err(_) => {
                warn!("settings_read_timeout_using_defaults");
                ProximitySettings::default()
            }
        };

        *self.current.lock() = loaded.clone();
        loaded
    }

    /// Merge a patch into the current settings and persist the result
    ///
    /// Returns `false` when the patch is invalid (nothing applied) or when
    /// persistence fails (applied for this session, not durable).
    pub async fn save(&self, patch: SettingsPatch) -> bool {
        if let Err(reason) = patch.validate() {
            warn!(reason = %reason, "settings_patch_rejected");
            return false;
        }

        let merged = {
            let mut current = self.current.lock();
            patch.apply(&mut current);
            current.clone()
        };

        let raw = match serde_json::to_string(&merged) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "settings_serialize_failed");
                return false;
            }
        };

        match timeout(STORAGE_TIMEOUT, self.store.set(SETTINGS_KEY, &raw)).await {
            Ok(Ok(())) => {
                debug!("settings_persisted");
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "settings_persist_failed");
                false
            }
            Err(_) => {
                warn!("settings_persist_timeout");
                false
            }
        }
    }

    /// Snapshot of the current in-memory settings
    pub fn current(&self) -> ProximitySettings {
        self.current.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::storage::MemoryStore;

    fn store_with(raw: Option<&str>) -> SettingsStore {
        let backing = Arc::new(MemoryStore::new());
        if let Some(raw) = raw {
            backing.insert(SETTINGS_KEY, raw);
        }
        SettingsStore::new(backing)
    }

    #[test]
    fn test_defaults() {
        let settings = ProximitySettings::default();
        assert_eq!(settings.alert_distance_m, 50.0);
        assert_eq!(settings.min_movement_m, 10.0);
        assert_eq!(settings.notification_cooldown_ms, 120_000);
        assert_eq!(settings.foreground_interval_ms, 5_000);
        assert_eq!(settings.background_interval_ms, 15_000);
        assert_eq!(settings.accuracy, AccuracyTier::High);
        assert_eq!(settings.sounds.collect, "sounds/collect.mp3");
    }

    #[tokio::test]
    async fn test_load_merges_partial_blob_over_defaults() {
        let store = store_with(Some(r#"{"alert_distance_m": 80.0}"#));
        let settings = store.load().await;
        assert_eq!(settings.alert_distance_m, 80.0);
        // Everything else stays at its default
        assert_eq!(settings.min_movement_m, 10.0);
        assert_eq!(settings.notification_cooldown_ms, 120_000);
    }

    #[tokio::test]
    async fn test_load_ignores_unknown_fields() {
        let store = store_with(Some(r#"{"alert_distance_m": 75.0, "future_field": true}"#));
        let settings = store.load().await;
        assert_eq!(settings.alert_distance_m, 75.0);
    }

    #[tokio::test]
    async fn test_load_corrupt_blob_falls_back_to_defaults() {
        let store = store_with(Some("not json at all {"));
        let settings = store.load().await;
        assert_eq!(settings, ProximitySettings::default());
    }

    #[tokio::test]
    async fn test_load_sanitizes_invalid_values() {
        let store = store_with(Some(r#"{"alert_distance_m": -5.0, "min_movement_m": 0.0}"#));
        let settings = store.load().await;
        assert_eq!(settings.alert_distance_m, 50.0);
        assert_eq!(settings.min_movement_m, 10.0);
    }

    #[tokio::test]
    async fn test_save_then_current_returns_merged() {
        let store = store_with(None);
        let patch = SettingsPatch { alert_distance_m: Some(80.0), ..Default::default() };
        assert!(store.save(patch).await);

        let settings = store.current();
        assert_eq!(settings.alert_distance_m, 80.0);
        assert_eq!(settings.min_movement_m, 10.0);
        assert_eq!(settings.foreground_interval_ms, 5_000);
    }

    #[tokio::test]
    async fn test_save_persists_round_trip() {
        let backing = Arc::new(MemoryStore::new());
        let store = SettingsStore::new(backing.clone());
        let patch = SettingsPatch { notification_cooldown_ms: Some(30_000), ..Default::default() };
        assert!(store.save(patch).await);

        // A fresh store over the same backing sees the saved value
        let reloaded = SettingsStore::new(backing);
        let settings = reloaded.load().await;
        assert_eq!(settings.notification_cooldown_ms, 30_000);
    }

    #[tokio::test]
    async fn test_save_rejects_invalid_patch() {
        let store = store_with(None);
        let patch = SettingsPatch { alert_distance_m: Some(0.0), ..Default::default() };
        assert!(!store.save(patch).await);
        // Nothing was applied
        assert_eq!(store.current(), ProximitySettings::default());
    }

    #[tokio::test]
    async fn test_save_write_failure_applies_in_memory() {
        let backing = Arc::new(MemoryStore::new());
        backing.set_fail_writes(true);
        let store = SettingsStore::new(backing);

        let patch = SettingsPatch { alert_distance_m: Some(65.0), ..Default::default() };
        assert!(!store.save(patch).await);
        // Applied for this session even though not durable
        assert_eq!(store.current().alert_distance_m, 65.0);
    }
}
