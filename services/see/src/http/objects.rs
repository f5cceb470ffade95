//! The state API: `/objects` and `/assets/<id>`.

use super::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use see_protocol::{decode_batches, Object};
use std::collections::HashMap;
use tracing::warn;

/// `GET /objects`: snapshot of the object map.
pub async fn get_objects(State(state): State<AppState>) -> Json<HashMap<String, Object>> {
    Json(state.vis.states.objects().await)
}

/// `POST`/`PUT /objects`: a JSON array of envelopes, handled exactly like a
/// websocket frame from a browser. 204 on success, 500 on a decode error.
pub async fn post_objects(State(state): State<AppState>, body: Bytes) -> Response {
    match decode_batches(&body) {
        Ok(batches) => {
            for batch in batches {
                state.vis.recv_from_client(batch).await;
            }
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            warn!(error = %e, "rejecting unparseable /objects body");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// `GET /assets/<id>`: the stored bytes with their stored content type.
pub async fn get_asset(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.vis.assets.get(&id).await {
        Some(asset) => (
            [(header::CONTENT_TYPE, asset.content_type)],
            asset.bytes,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}
