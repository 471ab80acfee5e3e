use crate::{resolver::Resolution, AppState};
use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::{net::SocketAddr, sync::Arc};

/// GET /:code
///
/// Resolve the short code (cache first, then the store) and redirect. The
/// click is queued for the background writer, so the response never waits on
/// the analytics write.
pub async fn redirect(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let ip = extract_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr));

    match state.resolver.resolve_from(&code, Utc::now(), ip).await {
        Ok(Resolution::Target(url)) => see_other(&url),
        Ok(Resolution::NotFound) => {
            (StatusCode::NOT_FOUND, "Short link not found").into_response()
        }
        Err(e) => {
            tracing::error!("Redirect for '{}' failed: {}", code, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}

/// GET /
/// Send visitors of the bare domain to the configured ROOT_REDIRECT_URL.
pub async fn index(State(state): State<Arc<AppState>>) -> Response {
    see_other(&state.config.root_redirect_url)
}

// ── Helpers ────────────────────────────────────────────────────────────────

/// 303 to `url`. A target that cannot be a header value is a 500, not a panic.
fn see_other(url: &str) -> Response {
    match HeaderValue::try_from(url) {
        Ok(location) => (StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response(),
        Err(_) => {
            tracing::error!("Target {:?} is not a valid Location header", url);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}

/// Client address recorded with a click: first hop of X-Forwarded-For, then
/// X-Real-IP, then the peer address of the connection.
pub fn extract_ip(headers: &HeaderMap, addr: Option<SocketAddr>) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    };

    header("x-forwarded-for")
        .or_else(|| header("x-real-ip"))
        .or_else(|| addr.map(|a| a.ip().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn see_other_sets_location() {
        let response = see_other("https://example.com/a");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "https://example.com/a");
    }

    #[test]
    fn unrepresentable_target_is_an_error_response() {
        let response = see_other("https://example.com/a\nb");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::LOCATION).is_none());
    }

    #[test]
    fn forwarded_for_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();

        assert_eq!(
            extract_ip(&headers, Some(addr)).as_deref(),
            Some("203.0.113.7")
        );
    }

    #[test]
    fn falls_back_to_real_ip_then_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(extract_ip(&headers, None).as_deref(), Some("198.51.100.2"));

        let addr: SocketAddr = "192.0.2.1:443".parse().unwrap();
        assert_eq!(
            extract_ip(&HeaderMap::new(), Some(addr)).as_deref(),
            Some("192.0.2.1")
        );
        assert_eq!(extract_ip(&HeaderMap::new(), None), None);
    }
}
