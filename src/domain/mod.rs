//! Domain types and pure evaluation logic
//!
//! This module contains the core business types:
//! - `types` - Stops, statuses, alert kinds, positions, lifecycle state
//! - `geo` - Haversine distance and in-range evaluation

pub mod geo;
pub mod types;

// Re-export commonly used types
pub use types::{
    AccuracyTier, AlertKind, AppLifecycle, Coord, NearbyStop, Position, Stop, StopId, StopStatus,
};
