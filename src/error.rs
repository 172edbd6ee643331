//! Error types for the acquisition strategies.

/// Why a single strategy (direct fetch or rendering) could not produce markup.
///
/// These never escape `ContentAcquirer::acquire`; they decide whether the
/// orchestrator falls through to the next strategy and end up as the
/// `error` string of a failed `FetchResult`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The target could not be parsed as an absolute URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The request did not complete within its time budget.
    #[error("request timed out")]
    Timeout,

    /// Connection, TLS or body-read failure.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// The response is not an HTML document.
    #[error("unsupported content type: {0}")]
    NotHtml(String),

    /// The browser session could not be started.
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// The rendered page had no visible content at all.
    #[error("rendered page was blank")]
    BlankPage,

    /// Any other rendering failure.
    #[error("render failed: {0}")]
    Render(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}
