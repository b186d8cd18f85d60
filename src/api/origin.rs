use axum::{extract::Request, http::header, middleware::Next, response::Response};

use super::error::ApiError;

/// Check the Origin header on WebSocket upgrade requests.
///
/// - Non-WebSocket requests: pass through (CORS handles HTTP)
/// - No Origin header: pass through (players are not browsers)
/// - Origin host equals the request's Host header: pass through
/// - Origin in the allowed list: pass through
/// - Otherwise: reject with 403
pub async fn check_ws_origin(
    allowed_origins: Vec<String>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let is_ws_upgrade = req
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade {
        return Ok(next.run(req).await);
    }

    let origin = match req.headers().get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
        None => return Ok(next.run(req).await),
        Some(o) => o.to_string(),
    };

    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok());
    if let (Some(host), Some(origin_host)) = (host, origin_host(&origin)) {
        if origin_host.eq_ignore_ascii_case(host) {
            return Ok(next.run(req).await);
        }
    }

    if allowed_origins.iter().any(|allowed| allowed == &origin) {
        return Ok(next.run(req).await);
    }

    tracing::warn!(origin = %origin, "rejected websocket upgrade from foreign origin");
    Err(ApiError::OriginNotAllowed)
}

/// `host[:port]` part of an origin such as `https://example.com:8080`.
fn origin_host(origin: &str) -> Option<&str> {
    let (_, rest) = origin.split_once("://")?;
    let host = rest.split('/').next()?;
    (!host.is_empty()).then_some(host)
}
