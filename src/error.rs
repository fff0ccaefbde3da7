use thiserror::Error;

pub(crate) type Result<T> = std::result::Result<T, JoinWatchError>;

/// Errors that abort a whole invocation.
///
/// Per-event lookup failures never become one of these; they are folded
/// into the event's enrichment outcome instead.
#[derive(Debug, Error)]
pub(crate) enum JoinWatchError {
    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The persistent dedup store failed for a reason other than a duplicate.
    #[error("dedupe store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Transport failure talking to the log source or the delivery webhook.
    #[error("http error: {0}")]
    Http(String),

    /// The delivery webhook answered with a non-success status.
    #[error("delivery failed: {status} {body}")]
    Delivery { status: u16, body: String },

    /// The log source answered with an error payload.
    #[error("log source error: {0}")]
    LogSource(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ureq::Error> for JoinWatchError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, response) => {
                let body = response.into_string().unwrap_or_default();
                JoinWatchError::Delivery { status, body }
            }
            ureq::Error::Transport(transport) => JoinWatchError::Http(transport.to_string()),
        }
    }
}
