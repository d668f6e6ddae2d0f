//! Infrastructure - settings persistence
//!
//! This module contains infrastructure concerns:
//! - `settings` - User-tunable thresholds (defaults, merge, persistence)

pub mod settings;

// Re-export commonly used types
pub use settings::{ProximitySettings, SettingsPatch, SettingsStore, SoundAssignment};
