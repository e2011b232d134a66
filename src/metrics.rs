//! Motion metrics
//!
//! Pure functions over positions and durations. Nothing here holds state.

use crate::location::TrackPoint;

/// Mean Earth radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in decimal degrees, in kilometers.
///
/// Symmetric in its arguments and exactly zero for identical points.
pub fn haversine_distance_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = a;
    let (lat2, lon2) = b;
    if lat1 == lat2 && lon1 == lon2 {
        return 0.0;
    }

    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt());
    EARTH_RADIUS_KM * c
}

/// Distance between two route points
pub fn point_distance_km(a: &TrackPoint, b: &TrackPoint) -> f64 {
    haversine_distance_km((a.latitude, a.longitude), (b.latitude, b.longitude))
}

/// Sum of consecutive pairwise distances along a route
pub fn cumulative_distance_km(points: &[TrackPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| point_distance_km(&pair[0], &pair[1]))
        .sum()
}

/// Convert m/s to km/h rounded to one decimal. Missing speed counts as zero.
pub fn to_kmh(meters_per_second: Option<f64>) -> f64 {
    let speed = meters_per_second.filter(|s| s.is_finite()).unwrap_or(0.0);
    (speed * 3.6 * 10.0).round() / 10.0
}

/// Average speed over a distance and elapsed time, in km/h with one decimal
pub fn average_speed_kmh(distance_km: f64, elapsed_secs: u64) -> f64 {
    if elapsed_secs == 0 {
        return 0.0;
    }
    let kmh = distance_km / (elapsed_secs as f64 / 3600.0);
    (kmh * 10.0).round() / 10.0
}

/// Human readable elapsed time: `"1h 1m"`, `"1m 5s"` or `"7s"`
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Round altitude to whole meters; missing altitude counts as zero
pub fn normalize_altitude(altitude: Option<f64>) -> f64 {
    altitude.filter(|a| a.is_finite()).unwrap_or(0.0).round()
}
