//! Session CRUD and one-shot proximity handlers.

use crate::{api::ApiError, AppState};
use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
};
use barfly_geo::haversine_distance;
use barfly_store::RecordStore;
use barfly_types::{GeoPoint, IndexedRecord, SearchQuery};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Request body for `POST /api/sessions`.
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub lat: f64,
    pub lng: f64,
    /// Application payload stored verbatim.
    #[serde(default)]
    pub payload: Value,
}

/// Request body for `PATCH /api/sessions/{id}/location`.
#[derive(Debug, Deserialize)]
pub struct MoveSessionRequest {
    pub lat: f64,
    pub lng: f64,
}

/// Request body for `PATCH /api/sessions/{id}`.
#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    pub payload: Value,
}

/// Proximity parameters shared by the one-shot and streaming endpoints.
#[derive(Debug, Deserialize)]
pub struct NearbyParams {
    pub lat: f64,
    pub lng: f64,
    /// Radius in meters.
    pub radius: f64,
}

impl NearbyParams {
    pub fn query(&self) -> SearchQuery {
        SearchQuery::new(GeoPoint::new(self.lat, self.lng), self.radius)
    }
}

/// One result of `GET /api/sessions/nearby`.
#[derive(Debug, Serialize, Deserialize)]
pub struct NearbySession {
    #[serde(flatten)]
    pub record: IndexedRecord,
    #[serde(rename = "distanceM")]
    pub distance_m: f64,
}

/// Response body for `GET /api/sessions/nearby`.
#[derive(Debug, Serialize, Deserialize)]
pub struct NearbyResponse {
    pub results: Vec<NearbySession>,
}

/// Handler for `POST /api/sessions`.
pub async fn create_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<IndexedRecord>), ApiError> {
    let event = state
        .store
        .create_session(GeoPoint::new(body.lat, body.lng), body.payload)
        .await?;
    tracing::debug!(session_id = %event.record.id, sequence = event.sequence, "session created");
    Ok((StatusCode::CREATED, Json(event.record)))
}

/// Handler for `GET /api/sessions/{id}`.
pub async fn get_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<IndexedRecord>, ApiError> {
    Ok(Json(state.store.get_session(&id).await?))
}

/// Handler for `PATCH /api/sessions/{id}/location`.
pub async fn move_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<MoveSessionRequest>,
) -> Result<Json<IndexedRecord>, ApiError> {
    let event = state
        .store
        .move_session(&id, GeoPoint::new(body.lat, body.lng))
        .await?;
    Ok(Json(event.record))
}

/// Handler for `PATCH /api/sessions/{id}`.
pub async fn update_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateSessionRequest>,
) -> Result<Json<IndexedRecord>, ApiError> {
    let event = state.store.update_session_payload(&id, body.payload).await?;
    Ok(Json(event.record))
}

/// Handler for `DELETE /api/sessions/{id}`.
pub async fn delete_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_session(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for `GET /api/sessions/nearby`.
///
/// Results are sorted nearest first; ties keep creation order.
pub async fn nearby_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<NearbyParams>,
) -> Result<Json<NearbyResponse>, ApiError> {
    let query = params.query();
    let records = state.engine.nearby(query).await?;

    let mut results: Vec<NearbySession> = records
        .into_iter()
        .map(|record| NearbySession {
            distance_m: haversine_distance(query.center, record.location),
            record,
        })
        .collect();
    // `nearby` returns creation order, so a stable sort keeps it for ties.
    results.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));

    Ok(Json(NearbyResponse { results }))
}
