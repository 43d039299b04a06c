//! Shared types for the Barfly platform.
//!
//! This crate provides the value types that flow between the geo planner,
//! the record store, the live sync engine and the HTTP layer: points and
//! geohash keys, stored records, change-feed events and subscriber deltas.
//!
//! No crate in the workspace depends on anything *except* `barfly-types` for
//! cross-cutting type definitions, which keeps the dependency graph acyclic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A point on the WGS-84 sphere approximation, in decimal degrees.
///
/// Construction does not validate; the geo crate rejects out-of-range
/// coordinates with `InvalidCoordinate` wherever a point is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Returns `true` if latitude is in `[-90, 90]` and longitude in
    /// `[-180, 180]` (NaN is never valid).
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lng)
    }
}

/// A base-32 geohash string. Its length is its precision.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeohashKey(String);

impl GeohashKey {
    /// Wraps an already-encoded geohash. Callers outside the geo crate should
    /// obtain keys from `barfly_geo::encode` instead.
    pub fn from_encoded(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn precision(&self) -> usize {
        self.0.len()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for GeohashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for GeohashKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A circular proximity query. Immutable for the lifetime of a subscription;
/// moving the center or changing the radius means opening a new one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub center: GeoPoint,
    pub radius_m: f64,
}

impl SearchQuery {
    pub const fn new(center: GeoPoint, radius_m: f64) -> Self {
        Self { center, radius_m }
    }
}

/// The store collections that carry a change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    /// Geolocated pub sessions.
    Sessions,
    /// Append-only chat messages, partitioned by room.
    Messages,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sessions => "sessions",
            Self::Messages => "messages",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A geolocated session record as held by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRecord {
    /// Store-assigned unique ID.
    pub id: String,
    pub location: GeoPoint,
    /// Geohash of `location`, derived by the store on every location write.
    pub geohash: GeohashKey,
    /// Monotonic creation time in Unix milliseconds.
    pub created_at: i64,
    /// Feed sequence of the last change applied to this record.
    pub version: u64,
    /// Opaque application payload.
    pub payload: serde_json::Value,
}

/// A chat message in a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMessage {
    pub id: String,
    pub room_id: String,
    /// Server-assigned per-room sequence, starting at 1.
    pub sequence: u64,
    /// Creation time in Unix milliseconds. Informational only; ordering
    /// always uses `sequence`.
    pub created_at: i64,
    pub payload: serde_json::Value,
}

/// The kind of mutation a change-feed event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// One entry of a collection's change feed.
///
/// For `Delete`, `record` is the last state before deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent<R> {
    pub kind: ChangeKind,
    /// Collection-wide monotonic sequence.
    pub sequence: u64,
    pub record: R,
}

/// What happened to a record from one subscriber's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaKind {
    Added,
    Updated,
    Removed,
}

impl DeltaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Updated => "updated",
            Self::Removed => "removed",
        }
    }
}

/// The unit emitted to subscribers.
///
/// `sequence` is the ordering key of the change that produced the delta: the
/// feed sequence for proximity views, the room sequence for chat views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta<R> {
    pub kind: DeltaKind,
    pub sequence: u64,
    pub record: R,
}

impl<R> Delta<R> {
    pub fn added(sequence: u64, record: R) -> Self {
        Self {
            kind: DeltaKind::Added,
            sequence,
            record,
        }
    }

    pub fn updated(sequence: u64, record: R) -> Self {
        Self {
            kind: DeltaKind::Updated,
            sequence,
            record,
        }
    }

    pub fn removed(sequence: u64, record: R) -> Self {
        Self {
            kind: DeltaKind::Removed,
            sequence,
            record,
        }
    }
}
