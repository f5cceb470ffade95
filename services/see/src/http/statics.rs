//! Static files from the layered filesystem (everything no other route
//! claimed).

use super::AppState;
use crate::webfs::WebFsError;
use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tracing::error;

pub async fn serve(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    match state.web.fs.open(uri.path()).await {
        Ok((bytes, content_type)) => {
            ([(header::CONTENT_TYPE, content_type)], bytes).into_response()
        }
        Err(WebFsError::NotFound | WebFsError::InvalidPath) => {
            StatusCode::NOT_FOUND.into_response()
        }
        Err(WebFsError::Io(e)) => {
            error!(path = %uri.path(), error = %e, "static file read failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
