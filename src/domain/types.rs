//! Shared types for the proximity engine

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Newtype wrapper for stop IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StopId(pub String);

impl std::fmt::Display for StopId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StopId {
    fn from(s: &str) -> Self {
        StopId(s.to_string())
    }
}

/// Collection status of a stop, as recorded by the route data layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStatus {
    Collect,
    Skip,
    NewCustomer,
    Pending,
}

impl std::str::FromStr for StopStatus {
    type Err = std::convert::Infallible;

    /// Case-insensitive parse; anything unrecognized is treated as pending
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "collect" => StopStatus::Collect,
            "skip" => StopStatus::Skip,
            "new customer" | "new_customer" | "newcustomer" => StopStatus::NewCustomer,
            _ => StopStatus::Pending,
        })
    }
}

impl StopStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopStatus::Collect => "collect",
            StopStatus::Skip => "skip",
            StopStatus::NewCustomer => "new_customer",
            StopStatus::Pending => "pending",
        }
    }
}

/// Classification of a stop driving notification copy and sound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    Collect,
    Skip,
    NewCustomer,
}

impl AlertKind {
    /// Map a stop status to its alert kind; pending and anything
    /// unrecognized upstream fall back to a collection alert
    pub fn classify(status: StopStatus) -> Self {
        match status {
            StopStatus::Skip => AlertKind::Skip,
            StopStatus::NewCustomer => AlertKind::NewCustomer,
            StopStatus::Collect | StopStatus::Pending => AlertKind::Collect,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Collect => "collect",
            AlertKind::Skip => "skip",
            AlertKind::NewCustomer => "new_customer",
        }
    }
}

/// WGS84 coordinate pair (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lat: f64,
    pub lng: f64,
}

impl Coord {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// A raw device position sample from the location capability
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub coord: Coord,
    /// Horizontal accuracy estimate in meters, if the platform reports one
    pub accuracy_m: Option<f64>,
}

impl Position {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { coord: Coord::new(lat, lng), accuracy_m: None }
    }
}

/// A collection stop as supplied by the route data layer
///
/// The engine only reads stops; coordinates may be absent for addresses
/// that failed geocoding and such stops never match proximity checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub id: StopId,
    pub address: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    pub status: StopStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Stop {
    pub fn coord(&self) -> Option<Coord> {
        Some(Coord::new(self.lat?, self.lng?))
    }
}

/// A stop annotated with its distance from the latest accepted position
///
/// The distance is transient: recomputed on every sample, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyStop {
    pub stop: Stop,
    pub distance_m: f64,
}

/// Application lifecycle state as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    Foreground,
    Background,
}

impl AppLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppLifecycle::Foreground => "foreground",
            AppLifecycle::Background => "background",
        }
    }
}

/// Location accuracy tier requested from the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyTier {
    Low,
    Balanced,
    High,
}

impl AccuracyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccuracyTier::Low => "low",
            AccuracyTier::Balanced => "balanced",
            AccuracyTier::High => "high",
        }
    }
}

/// Current epoch time in milliseconds
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
