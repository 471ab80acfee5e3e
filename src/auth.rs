use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Header carrying the authenticated owner identifier. Authentication
/// happens upstream; whatever sits in front of this service must strip the
/// header from client requests and set it itself.
pub const OWNER_HEADER: &str = "x-owner-id";

const MAX_OWNER_LEN: usize = 128;

/// Extractor that yields the owner identifier of the current request. If the
/// header is missing or malformed the extractor short-circuits with a 401 so
/// the handler never runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

impl Owner {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub struct MissingOwner;

impl IntoResponse for MissingOwner {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "error": "Missing owner identity." })),
        )
            .into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = MissingOwner;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.len() <= MAX_OWNER_LEN)
            .map(|v| Owner(v.to_owned()))
            .ok_or(MissingOwner)
    }
}
