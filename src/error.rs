use thiserror::Error;

/// Every failure the link engine can report.
///
/// Validation and ownership errors are user-correctable and are handed back
/// to the HTTP layer as-is. `CodeSpaceExhausted`, `ResolutionFailed` and
/// `Store` are operational and render as a generic 500.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("link not found")]
    NotFound,

    #[error("link belongs to another owner")]
    Forbidden,

    #[error("no free short code after {attempts} attempts")]
    CodeSpaceExhausted { attempts: u32 },

    #[error("could not resolve short code: {0}")]
    ResolutionFailed(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl LinkError {
    /// `true` for errors the caller caused and can fix.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LinkError::InvalidUrl(_) | LinkError::NotFound | LinkError::Forbidden
        )
    }
}

pub type Result<T, E = LinkError> = std::result::Result<T, E>;
