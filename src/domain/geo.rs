//! Great-circle distance evaluation over the stop list
//!
//! Pure and synchronous. Stops may span kilometers across a route, so
//! distances use the haversine formula on a spherical earth rather than a
//! flat-earth approximation.

use crate::domain::types::{Coord, NearbyStop, Stop};
use std::cmp::Ordering;

/// Mean earth radius in meters (WGS84 spherical approximation)
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates, in meters
pub fn distance_m(a: Coord, b: Coord) -> f64 {
    let lat1_rad = a.lat.to_radians();
    let lat2_rad = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Stops within `radius_m` of `position`, annotated with their computed
/// distance and sorted ascending by distance
///
/// Stops without a complete coordinate pair are silently excluded.
pub fn find_in_range(position: Coord, stops: &[Stop], radius_m: f64) -> Vec<NearbyStop> {
    let mut hits: Vec<NearbyStop> = stops
        .iter()
        .filter_map(|stop| {
            let coord = stop.coord()?;
            let distance_m = distance_m(position, coord);
            (distance_m <= radius_m).then(|| NearbyStop { stop: stop.clone(), distance_m })
        })
        .collect();

    hits.sort_by(|a, b| a.distance_m.partial_cmp(&b.distance_m).unwrap_or(Ordering::Equal));
    hits
}
