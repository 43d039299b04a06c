//! Chat room message handlers.

use crate::{api::ApiError, AppState};
use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
};
use barfly_store::{Page, RecordStore};
use barfly_types::RoomMessage;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Longest accepted room id, in bytes.
pub const MAX_ROOM_ID_LEN: usize = 128;

/// Default and maximum page size for message listings.
const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

/// Request body for `POST /api/rooms/{room_id}/messages`.
#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub payload: Value,
}

/// Query parameters for `GET /api/rooms/{room_id}/messages`.
#[derive(Debug, Deserialize)]
pub struct ListMessagesParams {
    /// Only messages with a greater room sequence are returned.
    #[serde(default)]
    pub after: u64,
    pub limit: Option<usize>,
    #[serde(rename = "pageToken")]
    pub page_token: Option<String>,
}

pub(crate) fn validate_room_id(room_id: &str) -> Result<(), ApiError> {
    if room_id.trim().is_empty() {
        return Err(ApiError::BadRequest("room id must not be empty".to_string()));
    }
    if room_id.len() > MAX_ROOM_ID_LEN {
        return Err(ApiError::BadRequest(format!(
            "room id exceeds {MAX_ROOM_ID_LEN} bytes"
        )));
    }
    Ok(())
}

/// Handler for `POST /api/rooms/{room_id}/messages`.
pub async fn post_message_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(room_id): Path<String>,
    Json(body): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<RoomMessage>), ApiError> {
    validate_room_id(&room_id)?;
    let event = state.store.append_message(&room_id, body.payload).await?;
    tracing::debug!(room_id = %room_id, sequence = event.record.sequence, "message appended");
    Ok((StatusCode::CREATED, Json(event.record)))
}

/// Handler for `GET /api/rooms/{room_id}/messages`.
pub async fn list_messages_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(params): Query<ListMessagesParams>,
) -> Result<Json<Page<RoomMessage>>, ApiError> {
    validate_room_id(&room_id)?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let page = state
        .store
        .room_range(&room_id, params.after, params.page_token.as_deref(), limit)
        .await?;
    Ok(Json(page))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_ids_are_bounded() {
        assert!(validate_room_id("the-crown").is_ok());
        assert!(validate_room_id("").is_err());
        assert!(validate_room_id("   ").is_err());
        assert!(validate_room_id(&"r".repeat(MAX_ROOM_ID_LEN)).is_ok());
        assert!(validate_room_id(&"r".repeat(MAX_ROOM_ID_LEN + 1)).is_err());
    }
}
