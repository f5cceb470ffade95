//! Raw translator states: `GET /mqhub/states/<path>`.
//!
//! Only mounted while the schema-translator source is active. The payload
//! is served exactly as last received from the bus, with the content type
//! the schema declares.

use super::AppState;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use see_protocol::DEFAULT_CONTENT_TYPE;

pub async fn get_state(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    let Some(schema) = &state.schema else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if let Some(entry) = schema.find_state_schema(&path) {
        if let Some(bytes) = schema.find_state(&entry.component, &entry.endpoint) {
            let content_type = entry
                .content_type
                .clone()
                .filter(|ct| !ct.is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_owned());
            return ([(header::CONTENT_TYPE, content_type)], bytes).into_response();
        }
    }
    (StatusCode::NOT_FOUND, "not found").into_response()
}
