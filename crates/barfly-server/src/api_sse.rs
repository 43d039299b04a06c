//! SSE delta stream handlers.
//!
//! Each delta becomes one event named after its kind (`added`, `updated`,
//! `removed`) with the delta's sequence as the event id. A view that fails
//! after opening ends with a single `error` event.

use crate::{
    api::ApiError, api_rooms::validate_room_id, api_sessions::NearbyParams, AppState,
};
use axum::{
    extract::{Extension, Path, Query},
    response::{
        sse::{Event, KeepAlive},
        Sse,
    },
};
use barfly_live::LiveError;
use barfly_types::Delta;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use tokio_stream::StreamExt;

/// Query parameters for `GET /events/rooms/{room_id}`.
#[derive(Debug, Deserialize)]
pub struct RoomStreamParams {
    #[serde(default)]
    pub after: u64,
}

fn delta_event<R: Serialize>(
    item: Result<Delta<R>, LiveError>,
) -> Option<Result<Event, Infallible>> {
    match item {
        Ok(delta) => match serde_json::to_string(&delta.record) {
            Ok(data) => Some(Ok(Event::default()
                .event(delta.kind.as_str())
                .id(delta.sequence.to_string())
                .data(data))),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize delta");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "live view ended with an error");
            let data = serde_json::json!({ "error": e.to_string() }).to_string();
            Some(Ok(Event::default().event("error").data(data)))
        }
    }
}

/// Handler for `GET /events/nearby`.
///
/// Streams the baseline members of the circle as `added` events, then every
/// change to membership.
pub async fn nearby_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<NearbyParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // Dropping the SSE body drops the delta stream, which closes the view.
    let (deltas, _cancel) = state.engine.subscribe_nearby(params.query()).await?;
    tracing::debug!(
        view_id = %deltas.view_id(),
        lat = params.lat,
        lng = params.lng,
        radius_m = params.radius,
        "nearby SSE stream opened"
    );
    let events = deltas.filter_map(delta_event);
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Handler for `GET /events/rooms/{room_id}`.
pub async fn room_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(params): Query<RoomStreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    validate_room_id(&room_id)?;
    let (deltas, _cancel) = state.engine.subscribe_room(&room_id, params.after).await?;
    tracing::debug!(
        view_id = %deltas.view_id(),
        room_id = %room_id,
        after = params.after,
        "room SSE stream opened"
    );
    let events = deltas.filter_map(delta_event);
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
