// api/src/auth.rs

use crate::{ApiError, AppState};
use axum::extract::{Query, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ApiKeyQuery {
    api_key: Option<String>,
}

/// Gate every route but `/health` behind `X-API-Key`/`?api_key=` when
/// `require_api_key` is set. A deployment with no key required simply
/// passes every request through.
pub async fn require_api_key(
    State(state): State<AppState>,
    Query(query): Query<ApiKeyQuery>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.require_api_key {
        return Ok(next.run(request).await);
    }

    let header_key = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let supplied = header_key.or(query.api_key);

    match (&state.api_key, supplied) {
        (Some(expected), Some(got)) if expected == &got => Ok(next.run(request).await),
        _ => Err(ApiError::Unauthorized),
    }
}
