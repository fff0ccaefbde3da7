use std::time::Duration;

use thiserror::Error;

pub(crate) const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;
const USER_AGENT: &str = "joinwatch/0.1 (+https://jp.finalfantasyxiv.com)";
const ACCEPT_HTML: &str = "text/html,application/xhtml+xml";
const ACCEPT_LANGUAGE: &str = "ja,en;q=0.8";

/// A failed page fetch. Timeouts land here like any other transport error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub(crate) enum FetchError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("read body: {0}")]
    Body(String),
}

/// Fetches HTML documents from the character directory.
pub(crate) trait HtmlFetcher {
    fn fetch_text(&self, url: &str) -> Result<String, FetchError>;
}

pub(crate) struct UreqFetcher {
    agent: ureq::Agent,
}

impl UreqFetcher {
    pub(crate) fn new(timeout_ms: u64) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(timeout_ms.max(1)))
            .user_agent(USER_AGENT)
            .build();
        Self { agent }
    }
}

impl HtmlFetcher for UreqFetcher {
    fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .agent
            .get(url)
            .set("Accept", ACCEPT_HTML)
            .set("Accept-Language", ACCEPT_LANGUAGE)
            .call()
            .map_err(|err| match err {
                ureq::Error::Status(status, response) => FetchError::Status {
                    status,
                    body: response
                        .into_string()
                        .map(|body| body.chars().take(200).collect())
                        .unwrap_or_default(),
                },
                ureq::Error::Transport(transport) => FetchError::Transport(transport.to_string()),
            })?;
        response
            .into_string()
            .map_err(|e| FetchError::Body(e.to_string()))
    }
}
