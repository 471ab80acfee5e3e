use chrono::{DateTime, Utc};

use crate::{
    clicks::ClickRecorder,
    codegen::is_plausible_code,
    error::{LinkError, Result},
    models::ClickEvent,
    store::LinkStore,
};

/// Outcome of resolving a short code. `NotFound` is a normal answer, not an
/// error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Destination URL to redirect to.
    Target(String),
    NotFound,
}

/// Turns a short code into its destination and queues the click without
/// waiting for it to be written.
#[derive(Clone)]
pub struct RedirectResolver {
    store: LinkStore,
    recorder: ClickRecorder,
}

impl RedirectResolver {
    pub fn new(store: LinkStore, recorder: ClickRecorder) -> Self {
        Self { store, recorder }
    }

    pub async fn resolve(&self, code: &str, now: DateTime<Utc>) -> Result<Resolution> {
        self.resolve_from(code, now, None).await
    }

    /// Resolve `code` at `now` on behalf of a visitor at `client_ip`.
    ///
    /// Store lookups are retried with a timeout inside `LinkStore`; if they
    /// keep failing the result is `ResolutionFailed`. Click recording
    /// problems are logged and never change the outcome.
    pub async fn resolve_from(
        &self,
        code: &str,
        now: DateTime<Utc>,
        client_ip: Option<String>,
    ) -> Result<Resolution> {
        if !is_plausible_code(code) {
            return Ok(Resolution::NotFound);
        }

        let link = match self.store.get_at(code, now).await {
            Ok(link) => link,
            Err(LinkError::NotFound) => return Ok(Resolution::NotFound),
            Err(LinkError::ResolutionFailed(msg)) => {
                tracing::error!("Lookup of short code '{}' failed: {}", code, msg);
                return Err(LinkError::ResolutionFailed(msg));
            }
            Err(e) => {
                tracing::error!("Lookup of short code '{}' failed: {:?}", code, e);
                return Err(LinkError::ResolutionFailed(e.to_string()));
            }
        };

        let event = ClickEvent {
            link_code: link.short_code,
            occurred_at: now,
            ip_address: client_ip,
        };
        if let Err(e) = self.recorder.record(event) {
            tracing::warn!("Click on '{}' not recorded: {}", code, e);
        }

        Ok(Resolution::Target(link.original_url))
    }
}
