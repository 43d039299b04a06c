//! Error types for live views.

use std::time::Duration;

use barfly_geo::GeoError;
use barfly_store::StoreError;

/// Errors raised when opening a live view, or delivered as the final item of
/// its delta stream.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("invalid coordinate: lat={lat}, lng={lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("invalid radius: {0} m")]
    InvalidRadius(f64),

    #[error("radius {radius_m} m exceeds the maximum of {max_m} m")]
    RadiusTooLarge { radius_m: f64, max_m: f64 },

    #[error("invalid query: {0}")]
    InvalidQuery(GeoError),

    /// Some key ranges could not be read. Retried before surfacing as
    /// [`LiveError::InitializationFailed`].
    #[error("{failed} of {total} key ranges failed to load")]
    StorePartialFailure { failed: usize, total: usize },

    #[error("snapshot failed after {attempts} attempts: {last}")]
    InitializationFailed {
        attempts: u32,
        #[source]
        last: Box<LiveError>,
    },

    #[error("snapshot did not complete within {0:?}")]
    InitializationTimeout(Duration),

    #[error("change feed disconnected and could not be resumed")]
    FeedDisconnected,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LiveError {
    /// `true` for errors caused by the caller's input rather than the system.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidCoordinate { .. }
                | Self::InvalidRadius(_)
                | Self::RadiusTooLarge { .. }
                | Self::InvalidQuery(_)
        )
    }
}

impl From<GeoError> for LiveError {
    fn from(e: GeoError) -> Self {
        match e {
            GeoError::InvalidCoordinate { lat, lng } => Self::InvalidCoordinate { lat, lng },
            GeoError::InvalidRadius(r) => Self::InvalidRadius(r),
            GeoError::RadiusTooLarge { radius_m, max_m } => Self::RadiusTooLarge { radius_m, max_m },
            other => Self::InvalidQuery(other),
        }
    }
}
