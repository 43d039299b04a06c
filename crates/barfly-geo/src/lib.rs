//! Geospatial core for proximity discovery.
//!
//! Three pieces, leaves first:
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`geohash`] | base-32 geohash encode/decode and radius → precision |
//! | [`bounds`] | covering a search circle with a minimal set of key ranges |
//! | [`distance`] | haversine distance and the exact membership filter |
//!
//! The planner only narrows the candidate set; [`refine`] is the authority
//! on membership.
//!
//! ```rust,ignore
//! use barfly_geo::{plan_bounds, refine};
//!
//! let bounds = plan_bounds(&query)?;
//! let candidates = fetch_somehow(&bounds).await?;
//! let members = refine(candidates, &query);
//! ```

pub mod bounds;
pub mod distance;
mod error;
pub mod geohash;

pub use bounds::{plan_bounds, KeyRange, KEY_SPACE_END, MAX_GRID_CELLS};
pub use distance::{
    destination, distance_to, haversine_distance, refine, within_radius, EARTH_RADIUS_M,
    MAX_RADIUS_M,
};
pub use error::GeoError;
pub use geohash::{
    cell_dimensions, decode, encode, precision_for_radius, BoundingBox, INDEX_PRECISION,
    MAX_PRECISION,
};
