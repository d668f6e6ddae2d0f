//! Audio playback capability
//!
//! Alert sounds are short clips; the dispatcher loads, plays to
//! completion, and unloads one handle at a time.

use anyhow::Result;
use async_trait::async_trait;

/// Opaque handle to a loaded sound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioHandle(pub u64);

#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Configure the platform audio session for alert playback
    /// (e.g. play through silent mode, duck other audio)
    async fn configure_playback(&self) -> Result<()>;

    /// Load a sound by URI and return a playable handle
    async fn load(&self, uri: &str) -> Result<AudioHandle>;

    /// Set playback volume in `0.0..=1.0`
    async fn set_volume(&self, handle: AudioHandle, volume: f64) -> Result<()>;

    /// Start playback and resolve once playback completes
    async fn play(&self, handle: AudioHandle) -> Result<()>;

    /// Release the handle and its platform resources
    async fn unload(&self, handle: AudioHandle) -> Result<()>;
}
