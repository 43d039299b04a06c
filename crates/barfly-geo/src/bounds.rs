//! Search-circle coverage planning.
//!
//! [`plan_bounds`] turns a [`SearchQuery`] into a short, ordered list of
//! half-open geohash key ranges. Every point of the circle hashes into at
//! least one range; points outside the circle may too, and are discarded
//! later by [`crate::refine`].

use std::collections::BTreeSet;

use barfly_types::{GeoPoint, SearchQuery};
use serde::{Deserialize, Serialize};

use crate::distance::{haversine_distance, EARTH_RADIUS_M, MAX_RADIUS_M};
use crate::geohash::{
    self, cell_dimensions, check_point, precision_for_radius, successor, INDEX_PRECISION,
};
use crate::GeoError;

/// Sorts after every geohash; used as the end of a range that runs to the
/// end of the key space.
pub const KEY_SPACE_END: &str = "~";

/// Largest cell grid enumerated at one precision before falling back to the
/// next coarser one.
pub const MAX_GRID_CELLS: usize = 36;

/// Slack added to the cell-center distance test, in meters.
const PRUNE_SLACK_M: f64 = 1.0;

/// A half-open range `[start, end)` over the geohash key space.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    pub start: String,
    pub end: String,
}

impl KeyRange {
    /// The range of every key starting with `prefix`.
    pub fn for_prefix(prefix: &str) -> Self {
        Self {
            start: prefix.to_string(),
            end: successor(prefix).unwrap_or_else(|| KEY_SPACE_END.to_string()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.start.as_str() <= key && key < self.end.as_str()
    }

    /// `true` when `next` begins where `self` ends, treating `next.start` as
    /// equal to `self.end` padded with the lowest symbol.
    fn touches(&self, next: &KeyRange) -> bool {
        next.start
            .strip_prefix(self.end.as_str())
            .is_some_and(|rest| rest.bytes().all(|b| b == b'0'))
    }
}

/// Plans the key ranges that cover `query`'s circle.
///
/// # Errors
///
/// `InvalidCoordinate` for a bad center, `InvalidRadius` for a non-positive
/// or non-finite radius, `RadiusTooLarge` for radii of half the Earth's
/// circumference or more.
pub fn plan_bounds(query: &SearchQuery) -> Result<Vec<KeyRange>, GeoError> {
    check_point(query.center)?;
    let radius = query.radius_m;
    if !radius.is_finite() || radius <= 0.0 {
        return Err(GeoError::InvalidRadius(radius));
    }
    if radius >= MAX_RADIUS_M {
        return Err(GeoError::RadiusTooLarge {
            radius_m: radius,
            max_m: MAX_RADIUS_M,
        });
    }

    // Stored keys are only INDEX_PRECISION long; a longer prefix would sort
    // after every key it is meant to match.
    let mut precision = precision_for_radius(radius).min(INDEX_PRECISION);
    loop {
        if let Some(cells) = covering_cells(query, precision)? {
            let ranges = coalesce(&cells);
            tracing::trace!(
                precision,
                cells = cells.len(),
                ranges = ranges.len(),
                "planned proximity bounds"
            );
            return Ok(ranges);
        }
        precision -= 1;
    }
}

/// Enumerates the cells at `precision` that may intersect the circle, or
/// `None` if the candidate grid is larger than [`MAX_GRID_CELLS`] and a
/// coarser precision should be tried. Precision 1 always yields cells.
fn covering_cells(
    query: &SearchQuery,
    precision: usize,
) -> Result<Option<BTreeSet<String>>, GeoError> {
    let (cell_h, cell_w) = cell_dimensions(precision);
    let rows = (180.0 / cell_h).round() as i64;
    let cols = (360.0 / cell_w).round() as i64;

    let center = query.center;
    let angular = query.radius_m / EARTH_RADIUS_M;
    let angular_deg = angular.to_degrees();

    let lat_min = (center.lat - angular_deg).max(-90.0);
    let lat_max = (center.lat + angular_deg).min(90.0);
    let row_of = |lat: f64| (((lat + 90.0) / cell_h).floor() as i64).clamp(0, rows - 1);
    let (row_lo, row_hi) = (row_of(lat_min), row_of(lat_max));

    // A circle that reaches a pole spans every longitude. Otherwise the
    // widest longitude offset on the sphere is asin(sin δ / cos φ).
    let covers_pole = center.lat + angular_deg >= 90.0 || center.lat - angular_deg <= -90.0;
    let lng_offset = if covers_pole {
        None
    } else {
        let ratio = angular.sin() / center.lat.to_radians().cos();
        (ratio < 1.0).then(|| ratio.asin().to_degrees())
    };

    let col_range: Vec<i64> = match lng_offset {
        Some(offset) => {
            let col_of = |lng: f64| ((lng + 180.0) / cell_w).floor() as i64;
            let (lo, hi) = (col_of(center.lng - offset), col_of(center.lng + offset));
            if hi - lo + 1 >= cols {
                (0..cols).collect()
            } else {
                (lo..=hi).map(|c| c.rem_euclid(cols)).collect()
            }
        }
        None => (0..cols).collect(),
    };

    let grid = (row_hi - row_lo + 1) as usize * col_range.len();
    if grid > MAX_GRID_CELLS && precision > 1 {
        return Ok(None);
    }

    let mut cells = BTreeSet::new();
    for row in row_lo..=row_hi {
        for &col in &col_range {
            let cell_center = GeoPoint::new(
                -90.0 + (row as f64 + 0.5) * cell_h,
                -180.0 + (col as f64 + 0.5) * cell_w,
            );
            let key = geohash::encode(cell_center, precision)?;
            let bbox = geohash::decode(key.as_str())?;
            let half_diagonal = bbox
                .perimeter_samples()
                .iter()
                .map(|corner| haversine_distance(cell_center, *corner))
                .fold(0.0_f64, f64::max);

            let reach = query.radius_m + half_diagonal * 1.01 + PRUNE_SLACK_M;
            if haversine_distance(center, cell_center) <= reach {
                cells.insert(key.into_string());
            }
        }
    }

    Ok(Some(cells))
}

/// Maps sorted cell prefixes to ranges, merging ranges that touch.
fn coalesce(cells: &BTreeSet<String>) -> Vec<KeyRange> {
    let mut ranges: Vec<KeyRange> = Vec::with_capacity(cells.len());
    for cell in cells {
        let next = KeyRange::for_prefix(cell);
        match ranges.last_mut() {
            Some(last) if last.touches(&next) => last.end = next.end,
            _ => ranges.push(next),
        }
    }
    ranges
}
