//! Proximity engine simulation harness
//!
//! Replays a scripted walk past a stop list against the engine, using the
//! in-process capability implementations. Useful for tuning thresholds
//! without device hardware.
//!
//! Usage:
//!   cargo run --bin proximity-sim -- --scenario config/demo.toml

use clap::Parser;
use proximity_engine::domain::types::{AppLifecycle, Position, Stop};
use proximity_engine::infra::settings::SettingsPatch;
use proximity_engine::io::sim::{SimAudio, SimLocationProvider, SimNotifier};
use proximity_engine::io::storage::FileStore;
use proximity_engine::services::monitor::ProximityMonitor;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Proximity engine walk simulator
#[derive(Parser, Debug)]
#[command(name = "proximity-sim", version, about)]
struct Args {
    /// Path to TOML scenario file
    #[arg(short, long, default_value = "config/demo.toml")]
    scenario: String,

    /// Path for persisted settings
    #[arg(long, default_value = "sim-settings.json")]
    settings_file: String,
}

/// One waypoint of the scripted walk
#[derive(Debug, Clone, Deserialize)]
struct Waypoint {
    lat: f64,
    lng: f64,
    /// Dwell at this waypoint before the next one
    #[serde(default = "default_hold_ms")]
    hold_ms: u64,
    /// Move the app to background (true) or foreground (false) before
    /// this waypoint is pushed
    #[serde(default)]
    background: Option<bool>,
}

fn default_hold_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
struct Scenario {
    #[serde(default)]
    stops: Vec<Stop>,
    #[serde(default)]
    walk: Vec<Waypoint>,
    #[serde(default)]
    settings: Option<SettingsPatch>,
}

impl Scenario {
    /// Load a scenario - tries the TOML file first, falls back to the
    /// built-in demo route
    fn load(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(scenario) => scenario,
                Err(e) => {
                    eprintln!("Warning: failed to parse {path}: {e}. Using built-in scenario.");
                    Self::built_in()
                }
            },
            Err(e) => {
                eprintln!("Warning: failed to read {path}: {e}. Using built-in scenario.");
                Self::built_in()
            }
        }
    }

    /// Three stops along one block of a San Francisco route
    fn built_in() -> Self {
        let raw = r#"
            [[stops]]
            id = "demo-1"
            address = "101 Valencia St"
            lat = 37.7749
            lng = -122.4194
            status = "collect"

            [[stops]]
            id = "demo-2"
            address = "115 Valencia St"
            lat = 37.7753
            lng = -122.4194
            status = "skip"

            [[stops]]
            id = "demo-3"
            address = "131 Valencia St"
            lat = 37.7757
            lng = -122.4194
            status = "new_customer"

            [[walk]]
            lat = 37.7741
            lng = -122.4194

            [[walk]]
            lat = 37.7747
            lng = -122.4194

            [[walk]]
            lat = 37.7752
            lng = -122.4194

            [[walk]]
            lat = 37.7757
            lng = -122.4194
            background = true

            [[walk]]
            lat = 37.7762
            lng = -122.4194
        "#;
        toml::from_str(raw).expect("built-in scenario parses")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging, level via RUST_LOG (default: info)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let scenario = Scenario::load(&args.scenario);
    info!(
        scenario = %args.scenario,
        stops = %scenario.stops.len(),
        waypoints = %scenario.walk.len(),
        "proximity-sim starting"
    );

    let provider = Arc::new(SimLocationProvider::new());
    provider.grant_background();
    let audio = Arc::new(SimAudio::new());
    let notifier = Arc::new(SimNotifier::new());
    let store = Arc::new(FileStore::new(&args.settings_file));
    let (lifecycle_tx, lifecycle_rx) = watch::channel(AppLifecycle::Foreground);

    let monitor = ProximityMonitor::new(
        provider.clone(),
        audio.clone(),
        notifier.clone(),
        store,
        lifecycle_rx,
    );

    let settings = monitor.load_settings().await;
    info!(
        alert_distance_m = %settings.alert_distance_m,
        cooldown_ms = %settings.notification_cooldown_ms,
        "settings_loaded"
    );

    if let Some(patch) = scenario.settings.clone() {
        if !monitor.save_settings(patch).await {
            warn!("scenario_settings_not_durable");
        }
    }

    monitor.enable(scenario.stops.clone()).await?;

    for (i, waypoint) in scenario.walk.iter().enumerate() {
        if let Some(background) = waypoint.background {
            let state =
                if background { AppLifecycle::Background } else { AppLifecycle::Foreground };
            info!(lifecycle = %state.as_str(), "lifecycle_toggled");
            let _ = lifecycle_tx.send(state);
            // Give the supervisor a beat to restart the subscription
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let position = Position::new(waypoint.lat, waypoint.lng);
        if !provider.push(position).await {
            warn!(waypoint = %i, "position_dropped_no_subscription");
        }
        tokio::time::sleep(Duration::from_millis(waypoint.hold_ms)).await;

        let nearby = monitor.nearby();
        info!(
            waypoint = %i,
            lat = %waypoint.lat,
            lng = %waypoint.lng,
            in_range = %nearby.len(),
            "waypoint_done"
        );
    }

    // Let trailing alerts drain before reporting
    tokio::time::sleep(Duration::from_secs(2)).await;

    let alerts = notifier.scheduled();
    for alert in &alerts {
        info!(
            stop_id = %alert.data.stop_id,
            kind = %alert.data.kind,
            distance_m = %alert.data.distance_m,
            "alert_delivered"
        );
    }
    info!(
        alerts = %alerts.len(),
        sounds = %audio.played().len(),
        status = ?monitor.status(),
        "walk_complete"
    );

    monitor.disable().await;
    info!("proximity-sim shutdown complete");
    Ok(())
}
