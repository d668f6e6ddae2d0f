//! IO modules - capability interfaces consumed by the engine
//!
//! The engine never talks to OS primitives directly; it consumes these
//! trait objects supplied by the host:
//! - `location` - Permission requests and position subscriptions
//! - `audio` - Alert sound playback
//! - `notifier` - System notification scheduling
//! - `storage` - Key-value persistence for settings
//! - `sim` - In-process implementations for tests and the sim binary

pub mod audio;
pub mod location;
pub mod notifier;
pub mod sim;
pub mod storage;

// Re-export commonly used types
pub use audio::{AudioHandle, AudioOutput};
pub use location::{
    LocationProvider, LocationSubscription, PermissionStatus, WatchOptions,
};
pub use notifier::{AlertNotification, AlertPayload, CategoryAction, Notifier};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
