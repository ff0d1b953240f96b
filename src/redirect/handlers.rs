use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::error;

use crate::api::AppState;
use crate::storage::StorageError;

/// Redirect to original URL
pub async fn redirect_url(
    State(state): State<Arc<AppState>>,
    Path(alias): Path<String>,
) -> Response {
    match state.shortener.get(&alias).await {
        Ok(url) => Redirect::temporary(&url.original_url).into_response(),
        Err(StorageError::Deleted(_)) => {
            (StatusCode::GONE, "This link has been deleted").into_response()
        }
        Err(e) if e.is_not_found() => (StatusCode::NOT_FOUND, "URL not found").into_response(),
        Err(e) => {
            error!(alias = %alias, "Failed to resolve alias: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}
