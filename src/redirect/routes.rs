use axum::{routing::get, Router};
use std::sync::Arc;

use crate::api::AppState;

use super::handlers::redirect_url;

pub fn create_redirect_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/{alias}", get(redirect_url))
        .with_state(state)
}
