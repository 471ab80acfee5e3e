use url::Url;

use crate::error::LinkError;

/// Longest destination URL accepted.
pub const MAX_URL_LEN: usize = 4096;

/// Check that `raw` is an absolute http(s) URL with a host and return it
/// trimmed. Applied on both create and update.
///
/// The result is always safe to send in a `Location` header: control
/// characters are rejected, and non-ASCII input is stored in its parsed form
/// (punycode host, percent-encoded path).
pub fn validate_url(raw: &str) -> Result<String, LinkError> {
    let url = raw.trim();

    if url.is_empty() {
        return Err(LinkError::InvalidUrl("URL must not be empty".into()));
    }
    if url.len() > MAX_URL_LEN {
        return Err(LinkError::InvalidUrl(format!(
            "URL is longer than {MAX_URL_LEN} characters"
        )));
    }

    // The url parser silently drops tabs and newlines, so check the raw text.
    if url.bytes().any(|b| b.is_ascii_control()) {
        return Err(LinkError::InvalidUrl(
            "URL must not contain control characters".into(),
        ));
    }

    let parsed = Url::parse(url).map_err(|e| LinkError::InvalidUrl(format!("{url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(LinkError::InvalidUrl(format!(
                "scheme '{other}' is not allowed, use http:// or https://"
            )));
        }
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(LinkError::InvalidUrl(format!("{url}: missing host")));
    }

    if url.is_ascii() {
        Ok(url.to_owned())
    } else {
        Ok(parsed.into())
    }
}
