//! Great-circle distance and the exact membership filter.

use barfly_types::{GeoPoint, IndexedRecord, SearchQuery};

use crate::geohash::check_point;
use crate::GeoError;

/// Mean Earth radius in meters (spherical WGS-84 approximation).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Half the Earth's circumference. Queries at or beyond this radius are
/// rejected.
pub const MAX_RADIUS_M: f64 = std::f64::consts::PI * EARTH_RADIUS_M;

/// Haversine distance between two points, in meters.
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Point reached by travelling `distance_m` from `origin` along the initial
/// `bearing_deg` (clockwise from north). Longitude is normalised to
/// `[-180, 180]`.
pub fn destination(origin: GeoPoint, bearing_deg: f64, distance_m: f64) -> GeoPoint {
    let delta = distance_m / EARTH_RADIUS_M;
    let theta = bearing_deg.to_radians();
    let lat1 = origin.lat.to_radians();
    let lng1 = origin.lng.to_radians();

    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
    let lng2 = lng1
        + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

    let mut lng = lng2.to_degrees();
    while lng > 180.0 {
        lng -= 360.0;
    }
    while lng < -180.0 {
        lng += 360.0;
    }
    GeoPoint::new(lat2.to_degrees().clamp(-90.0, 90.0), lng)
}

/// Distance from the query center to `point`.
///
/// # Errors
///
/// `InvalidCoordinate` if `point` is out of range; a corrupt stored location
/// is reported rather than silently measured.
pub fn distance_to(query: &SearchQuery, point: GeoPoint) -> Result<f64, GeoError> {
    check_point(point)?;
    Ok(haversine_distance(query.center, point))
}

/// Inclusive radius test: `distance == radius` is inside.
pub fn within_radius(query: &SearchQuery, point: GeoPoint) -> Result<bool, GeoError> {
    Ok(distance_to(query, point)? <= query.radius_m)
}

/// Keeps the records within `query`'s radius, preserving input order.
///
/// Records with invalid locations are dropped with a warning.
pub fn refine<I>(records: I, query: &SearchQuery) -> Vec<IndexedRecord>
where
    I: IntoIterator<Item = IndexedRecord>,
{
    records
        .into_iter()
        .filter(|record| match within_radius(query, record.location) {
            Ok(inside) => inside,
            Err(e) => {
                tracing::warn!(record_id = %record.id, error = %e, "dropping record with invalid location");
                false
            }
        })
        .collect()
}
