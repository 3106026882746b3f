//! Errors from the page fetcher. Callers treat every variant as "no document".

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to create HTTP client: {source}")]
    ClientBuild { source: reqwest::Error },

    #[error("Network error: could not reach {url}: {source}")]
    Network { url: String, source: reqwest::Error },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead { url: String, source: reqwest::Error },

    #[error("Could not launch headless browser: {reason}")]
    BrowserLaunch { reason: String },

    #[error("Browser failed to render {url}: {reason}")]
    Render { url: String, reason: String },

    #[error("Timed out after {secs}s waiting for {url} to render")]
    RenderTimeout { url: String, secs: u64 },
}

impl FetchError {
    /// True when the failure looks like a TLS or certificate problem.
    pub fn is_certificate_error(&self) -> bool {
        let message = match self {
            FetchError::Render { reason, .. } | FetchError::BrowserLaunch { reason } => {
                reason.to_lowercase()
            }
            FetchError::Network { source, .. } => format!("{:?}", source).to_lowercase(),
            _ => return false,
        };
        ["ssl", "certificate", "err_cert"]
            .iter()
            .any(|needle| message.contains(needle))
    }
}
