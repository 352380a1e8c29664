use chrono::{DateTime, Utc};

use crate::error::IntakeError;
use crate::types::IssueType;

const EARTH_RADIUS_M: f64 = 6_371_000.0;
const METERS_PER_DEGREE: f64 = 111_320.0;
const BOX_SLACK: f64 = 1.05;
const MAX_GEOHASH_PRECISION: usize = 12;

/// Haversine great-circle distance between two lat/lng points in meters.
pub fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lng / 2.0).sin().powi(2);
    // Clamp guards asin against rounding just above 1.0 for antipodal points.
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_M * c
}

/// Whether a coordinate pair is finite and inside WGS84 bounds.
pub fn valid_coordinates(lat: f64, lng: f64) -> bool {
    lat.is_finite()
        && lng.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lng)
}

/// `(min_lat, max_lat, min_lng, max_lng)` of a box that contains every point
/// within `radius_m`. Stores use it as a cheap prefilter before the exact
/// haversine check, so it errs on the large side.
pub fn bounding_box(lat: f64, lng: f64, radius_m: f64) -> (f64, f64, f64, f64) {
    // Meters per degree of latitude on the haversine sphere.
    let meters_per_degree = EARTH_RADIUS_M.to_radians();
    let d_lat = radius_m * BOX_SLACK / meters_per_degree;
    let cos_lat = lat.to_radians().cos().abs().max(1e-6);
    let d_lng = (d_lat / cos_lat).min(180.0);
    (lat - d_lat, lat + d_lat, lng - d_lng, lng + d_lng)
}

/// Worst-case (equatorial) diagonal of a geohash cell in meters.
pub fn geohash_cell_diagonal_m(precision: usize) -> f64 {
    let bits = 5 * precision as i32;
    let lng_bits = (bits + 1) / 2;
    let lat_bits = bits / 2;
    let lng_m = 360.0 / 2f64.powi(lng_bits) * METERS_PER_DEGREE;
    let lat_m = 180.0 / 2f64.powi(lat_bits) * METERS_PER_DEGREE;
    (lng_m * lng_m + lat_m * lat_m).sqrt()
}

/// Coarsest geohash precision whose cells never span more than `radius_m`.
/// Two points in the same cell are then always within the radius.
pub fn geohash_precision_for_radius(radius_m: f64) -> usize {
    (1..=MAX_GEOHASH_PRECISION)
        .find(|p| geohash_cell_diagonal_m(*p) <= radius_m)
        .unwrap_or(MAX_GEOHASH_PRECISION)
}

/// Radius + recency bounds within which two detections are the same issue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuplicateWindow {
    pub radius_m: f64,
    pub window: chrono::Duration,
}

impl Default for DuplicateWindow {
    fn default() -> Self {
        Self {
            radius_m: 50.0,
            window: chrono::Duration::days(7),
        }
    }
}

impl DuplicateWindow {
    /// Oldest creation timestamp still inside the window for a report observed at `at`.
    pub fn since(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        at.checked_sub_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Key shared by candidates that are certainly the same real-world issue:
    /// same type, same geohash cell (cell diagonal <= radius) and same
    /// window-aligned time bucket. Stores enforce one open report per key.
    pub fn uniqueness_key(
        &self,
        issue_type: IssueType,
        lat: f64,
        lng: f64,
        at: DateTime<Utc>,
    ) -> Result<String, IntakeError> {
        let precision = geohash_precision_for_radius(self.radius_m);
        let cell = geohash::encode(geohash::Coord { x: lng, y: lat }, precision)
            .map_err(|_| IntakeError::InvalidLocation { lat, lng })?;
        let window_secs = self.window.num_seconds().max(1);
        let bucket = at.timestamp().div_euclid(window_secs);
        Ok(format!("{issue_type}:{cell}:{bucket}"))
    }
}
