use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::admin::handlers::ApiError;

/// Bearer-token check for the admin API. An empty key disables the check.
pub async fn admin_auth_middleware(
    State(api_key): State<Arc<str>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if api_key.is_empty() {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented == Some(&*api_key) {
        return next.run(request).await;
    }

    tracing::warn!(path = %request.uri().path(), "rejected admin request without valid api key");
    ApiError::new(StatusCode::UNAUTHORIZED, "missing or invalid api key").into_response()
}
