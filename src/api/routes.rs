use axum::{
    body::Body,
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    routing::{get, post},
    Router,
};
use ipnet::IpNet;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    decompression::RequestDecompressionLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::alias::new_random_string;
use crate::auth::{user_middleware, AuthService};
use crate::redirect::create_redirect_router;
use crate::service::Shortener;

use super::handlers::{
    delete_user_urls, internal_stats, list_user_urls, ping, shorten_batch, shorten_json,
    shorten_text, AppState,
};

/// Tags each request with a random alphanumeric `x-request-id`
#[derive(Clone, Copy, Default)]
struct RandomRequestId;

impl MakeRequestId for RandomRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&new_random_string(16))
            .ok()
            .map(RequestId::new)
    }
}

pub fn create_api_router(
    shortener: Arc<Shortener>,
    auth_service: Arc<AuthService>,
    trusted_subnet: Option<IpNet>,
) -> Router {
    let state = Arc::new(AppState {
        shortener,
        trusted_subnet,
    });

    Router::new()
        .route("/", post(shorten_text))
        .route("/api/shorten", post(shorten_json))
        .route("/api/shorten/batch", post(shorten_batch))
        .route(
            "/api/user/urls",
            get(list_user_urls).delete(delete_user_urls),
        )
        .route("/api/internal/stats", get(internal_stats))
        .route("/ping", get(ping))
        .with_state(Arc::clone(&state))
        .merge(create_redirect_router(state))
        .layer(middleware::from_fn(move |req: Request, next: Next| {
            let auth = Arc::clone(&auth_service);
            user_middleware(auth, req, next)
        }))
        .layer(RequestDecompressionLayer::new())
        .layer(CompressionLayer::new())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id
                )
            }),
        )
        .layer(SetRequestIdLayer::x_request_id(RandomRequestId))
}
