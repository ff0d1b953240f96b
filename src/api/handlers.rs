use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use ipnet::IpNet;
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::auth::{is_trusted, CurrentUser};
use crate::models::{BatchItem, BatchResult, ShortenRequest, ShortenResponse};
use crate::service::Shortener;
use crate::storage::StorageError;

pub struct AppState {
    pub shortener: Arc<Shortener>,
    pub trusted_subnet: Option<IpNet>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Map a storage failure to a response, logging the ones that are our fault
fn storage_error(context: &str, e: StorageError) -> ApiError {
    match e {
        StorageError::NotFound(_) => api_error(StatusCode::NOT_FOUND, "URL not found"),
        StorageError::Deleted(_) => api_error(StatusCode::GONE, "URL has been deleted"),
        StorageError::AlreadyExists(alias) => api_error(
            StatusCode::CONFLICT,
            format!("Alias '{alias}' already exists"),
        ),
        StorageError::Conflict { alias } => api_error(
            StatusCode::CONFLICT,
            format!("URL already shortened as '{alias}'"),
        ),
        StorageError::Other(e) => {
            error!("{} failed: {:#}", context, e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to {context}"))
        }
    }
}

/// Accept absolute http(s) URLs only, returning them in normalized form.
///
/// The parser strips tabs and newlines and percent-encodes non-ASCII, so the
/// stored URL is always safe to send back in a `Location` header.
fn validate_url(raw: &str) -> Result<String, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "URL cannot be empty"));
    }

    let parsed = url::Url::parse(trimmed)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Only http and https URLs can be shortened",
        ));
    }

    Ok(parsed.into())
}

fn status_for(created: bool) -> StatusCode {
    if created {
        StatusCode::CREATED
    } else {
        StatusCode::CONFLICT
    }
}

/// Shorten a URL sent as the raw request body
pub async fn shorten_text(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    body: String,
) -> Response {
    let url = match validate_url(&body) {
        Ok(url) => url,
        Err((status, Json(body))) => return (status, body.error).into_response(),
    };

    match state.shortener.put(&url, user.id).await {
        Ok(shortened) => (status_for(shortened.created), shortened.short_url).into_response(),
        Err(e) => {
            let (status, Json(body)) = storage_error("shorten URL", e);
            (status, body.error).into_response()
        }
    }
}

/// Shorten a URL sent as `{"url": "..."}`
pub async fn shorten_json(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    payload: Result<Json<ShortenRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ShortenResponse>), ApiError> {
    let Json(payload) =
        payload.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;
    let url = validate_url(&payload.url)?;

    let shortened = state
        .shortener
        .put(&url, user.id)
        .await
        .map_err(|e| storage_error("shorten URL", e))?;

    Ok((
        status_for(shortened.created),
        Json(ShortenResponse {
            result: shortened.short_url,
        }),
    ))
}

/// Shorten several URLs at once, echoing each correlation id
pub async fn shorten_batch(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    payload: Result<Json<Vec<BatchItem>>, JsonRejection>,
) -> Result<(StatusCode, Json<Vec<BatchResult>>), ApiError> {
    let Json(items) = payload.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;
    if items.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Batch cannot be empty"));
    }

    let items = items
        .into_iter()
        .map(|item| {
            Ok(BatchItem {
                original_url: validate_url(&item.original_url)?,
                correlation_id: item.correlation_id,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let results = state
        .shortener
        .put_batch(user.id, items)
        .await
        .map_err(|e| storage_error("shorten batch", e))?;

    Ok((StatusCode::CREATED, Json(results)))
}

/// List the caller's live links
pub async fn list_user_urls(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Response, ApiError> {
    if !user.authenticated {
        return Err(api_error(StatusCode::UNAUTHORIZED, "No user cookie"));
    }

    let urls = state
        .shortener
        .get_all(user.id)
        .await
        .map_err(|e| storage_error("list URLs", e))?;

    if urls.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    Ok(Json(urls).into_response())
}

/// Queue the caller's aliases for deletion
pub async fn delete_user_urls(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    payload: Result<Json<Vec<String>>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    if !user.authenticated {
        return Err(api_error(StatusCode::UNAUTHORIZED, "No user cookie"));
    }
    let Json(aliases) = payload.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;

    state
        .shortener
        .delete(user.id, aliases)
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    Ok(StatusCode::ACCEPTED)
}

/// Link and user counts, for callers inside the trusted subnet
pub async fn internal_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if !is_trusted(state.trusted_subnet.as_ref(), &headers) {
        return Err(api_error(StatusCode::FORBIDDEN, "Forbidden"));
    }

    let json = state
        .shortener
        .stats()
        .await
        .map_err(|e| storage_error("collect stats", e))?;

    Ok(([(header::CONTENT_TYPE, "application/json")], json).into_response())
}

/// Storage health check
pub async fn ping(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.shortener.healthcheck().await {
        Ok(true) => StatusCode::OK,
        Ok(false) => StatusCode::INTERNAL_SERVER_ERROR,
        Err(e) => {
            error!("Healthcheck failed: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert_eq!(
            validate_url("  http://example.com/a?b=c \n").unwrap(),
            "http://example.com/a?b=c"
        );
        assert!(validate_url("").is_err());
        assert!(validate_url("example.com").is_err());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url(r#"{"url":"http://example.com"}"#).is_err());
    }

    #[test]
    fn test_validate_url_normalizes() {
        assert_eq!(
            validate_url("http://example.com").unwrap(),
            "http://example.com/"
        );
        assert_eq!(
            validate_url("http://example.com/caf\u{e9}").unwrap(),
            "http://example.com/caf%C3%A9"
        );
        assert_eq!(
            validate_url("http://example.com/a\nb").unwrap(),
            "http://example.com/ab"
        );
    }
}
