//! Base-32 geohash codec.
//!
//! A geohash interleaves longitude and latitude bisection bits (longitude
//! first) and packs them five at a time into the alphabet
//! `0123456789bcdefghjkmnpqrstuvwxyz`. Each extra character shrinks the cell
//! by a factor of 32 in area.

use barfly_types::{GeoPoint, GeohashKey};
use serde::{Deserialize, Serialize};

use crate::distance::EARTH_RADIUS_M;
use crate::GeoError;

pub(crate) const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Longest supported geohash (cells of a few centimetres).
pub const MAX_PRECISION: usize = 12;

/// Precision at which the store indexes record locations (~1.2 m × 0.6 m).
pub const INDEX_PRECISION: usize = 10;

const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

/// The rectangle covered by a geohash cell, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    /// Inclusive containment test.
    pub fn contains(&self, point: GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lng..=self.max_lng).contains(&point.lng)
    }

    /// The four corners followed by the four edge midpoints.
    pub(crate) fn perimeter_samples(&self) -> [GeoPoint; 8] {
        let c = self.center();
        [
            GeoPoint::new(self.min_lat, self.min_lng),
            GeoPoint::new(self.min_lat, self.max_lng),
            GeoPoint::new(self.max_lat, self.min_lng),
            GeoPoint::new(self.max_lat, self.max_lng),
            GeoPoint::new(self.min_lat, c.lng),
            GeoPoint::new(self.max_lat, c.lng),
            GeoPoint::new(c.lat, self.min_lng),
            GeoPoint::new(c.lat, self.max_lng),
        ]
    }
}

fn check_precision(precision: usize) -> Result<(), GeoError> {
    if (1..=MAX_PRECISION).contains(&precision) {
        Ok(())
    } else {
        Err(GeoError::InvalidPrecision(precision))
    }
}

pub(crate) fn check_point(point: GeoPoint) -> Result<(), GeoError> {
    if point.is_valid() {
        Ok(())
    } else {
        Err(GeoError::InvalidCoordinate {
            lat: point.lat,
            lng: point.lng,
        })
    }
}

/// Encodes a point into a geohash of exactly `precision` characters.
///
/// # Errors
///
/// `InvalidCoordinate` for out-of-range latitude/longitude and
/// `InvalidPrecision` outside `1..=12`.
pub fn encode(point: GeoPoint, precision: usize) -> Result<GeohashKey, GeoError> {
    check_point(point)?;
    check_precision(precision)?;

    let (mut lat_lo, mut lat_hi) = (-90.0_f64, 90.0_f64);
    let (mut lng_lo, mut lng_hi) = (-180.0_f64, 180.0_f64);
    let mut out = String::with_capacity(precision);
    let mut even = true;

    for _ in 0..precision {
        let mut idx = 0usize;
        for _ in 0..5 {
            idx <<= 1;
            if even {
                let mid = (lng_lo + lng_hi) / 2.0;
                if point.lng >= mid {
                    idx |= 1;
                    lng_lo = mid;
                } else {
                    lng_hi = mid;
                }
            } else {
                let mid = (lat_lo + lat_hi) / 2.0;
                if point.lat >= mid {
                    idx |= 1;
                    lat_lo = mid;
                } else {
                    lat_hi = mid;
                }
            }
            even = !even;
        }
        out.push(BASE32[idx] as char);
    }

    Ok(GeohashKey::from_encoded(out))
}

/// Decodes a geohash (or any prefix of one) to its cell's bounding box.
///
/// # Errors
///
/// `InvalidGeohash` if the key is empty, longer than 12 characters, or
/// contains a character outside the alphabet.
pub fn decode(key: &str) -> Result<BoundingBox, GeoError> {
    if key.is_empty() || key.len() > MAX_PRECISION {
        return Err(GeoError::InvalidGeohash(key.to_string()));
    }

    let mut bb = BoundingBox {
        min_lat: -90.0,
        max_lat: 90.0,
        min_lng: -180.0,
        max_lng: 180.0,
    };
    let mut even = true;

    for byte in key.bytes() {
        let idx = BASE32
            .iter()
            .position(|&c| c == byte)
            .ok_or_else(|| GeoError::InvalidGeohash(key.to_string()))?;
        for bit in (0..5).rev() {
            let set = (idx >> bit) & 1 == 1;
            if even {
                let mid = (bb.min_lng + bb.max_lng) / 2.0;
                if set {
                    bb.min_lng = mid;
                } else {
                    bb.max_lng = mid;
                }
            } else {
                let mid = (bb.min_lat + bb.max_lat) / 2.0;
                if set {
                    bb.min_lat = mid;
                } else {
                    bb.max_lat = mid;
                }
            }
            even = !even;
        }
    }

    Ok(bb)
}

/// Cell `(height, width)` in degrees for a precision.
pub fn cell_dimensions(precision: usize) -> (f64, f64) {
    let bits = precision as u32 * 5;
    let lng_bits = bits.div_ceil(2);
    let lat_bits = bits / 2;
    (
        180.0 / f64::from(1u32 << lat_bits),
        360.0 / f64::from(1u32 << lng_bits),
    )
}

/// Finest precision whose cells are at least `2 × radius` on both axes at the
/// equator, so the search circle fits within a 2 × 2 grid of cells there.
///
/// Non-positive radii map to [`MAX_PRECISION`]; anything larger than a
/// precision-1 cell maps to 1.
pub fn precision_for_radius(radius_m: f64) -> usize {
    let diameter = 2.0 * radius_m;
    (1..=MAX_PRECISION)
        .rev()
        .find(|&p| {
            let (h, w) = cell_dimensions(p);
            h.min(w) * METERS_PER_DEGREE >= diameter
        })
        .unwrap_or(1)
}

/// Lexicographic successor of a geohash prefix within the key space: the
/// smallest string greater than every key starting with `prefix`.
///
/// Returns `None` when `prefix` is all `z`, i.e. it runs to the end of the
/// key space.
pub(crate) fn successor(prefix: &str) -> Option<String> {
    let mut bytes = prefix.as_bytes().to_vec();
    while let Some(last) = bytes.pop() {
        let idx = BASE32.iter().position(|&c| c == last)?;
        if idx + 1 < BASE32.len() {
            bytes.push(BASE32[idx + 1]);
            return String::from_utf8(bytes).ok();
        }
    }
    None
}
