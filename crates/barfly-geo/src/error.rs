//! Error types for geohash and proximity planning.

/// Errors raised by the geo layer. All of them are caller errors and are
/// reported synchronously.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeoError {
    #[error("invalid coordinate: lat={lat}, lng={lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("invalid geohash precision {0}; expected 1..=12")]
    InvalidPrecision(usize),

    #[error("invalid geohash: {0:?}")]
    InvalidGeohash(String),

    #[error("invalid radius {0}; expected a positive, finite number of meters")]
    InvalidRadius(f64),

    #[error("radius {radius_m} m is too large; maximum is {max_m} m")]
    RadiusTooLarge { radius_m: f64, max_m: f64 },
}
