use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{JoinWatchError, Result};
use crate::util::Clock;

pub(crate) const DISCORD_MAX_CHARS: usize = 1900;
const DEFAULT_RETRY_AFTER_MS: u64 = 1500;
const DELIVERY_TIMEOUT_MS: u64 = 30_000;

/// Hands the rendered text block to whoever should read it.
pub(crate) trait Notifier {
    fn deliver(&self, text: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    #[serde(default)]
    retry_after: Option<f64>,
}

/// Wraps text in a code block, neutralising embedded fences and keeping
/// the message under the webhook's length limit.
pub(crate) fn to_discord_code_block(text: &str, max_chars: usize) -> String {
    let sanitized = text.replace("```", "'''");
    let sanitized = sanitized.trim();
    let body = if sanitized.chars().count() > max_chars {
        let kept: String = sanitized.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", kept.trim_end())
    } else {
        sanitized.to_string()
    };
    format!("```\n{body}\n```")
}

fn retry_after_ms(response: ureq::Response) -> u64 {
    let header_secs = response
        .header("retry-after")
        .and_then(|v| v.trim().parse::<f64>().ok());
    let body_secs = response
        .into_json::<RateLimitBody>()
        .ok()
        .and_then(|body| body.retry_after);
    body_secs
        .or(header_secs)
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| (secs * 1000.0).ceil() as u64)
        .unwrap_or(DEFAULT_RETRY_AFTER_MS)
}

pub(crate) struct DiscordWebhook<'a, C: Clock> {
    agent: ureq::Agent,
    webhook_url: String,
    username: Option<String>,
    avatar_url: Option<String>,
    clock: &'a C,
}

impl<'a, C: Clock> DiscordWebhook<'a, C> {
    pub(crate) fn new(
        webhook_url: String,
        username: Option<String>,
        avatar_url: Option<String>,
        clock: &'a C,
    ) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(DELIVERY_TIMEOUT_MS))
            .build();
        Self {
            agent,
            webhook_url,
            username,
            avatar_url,
            clock,
        }
    }

    fn send(&self, content: &str) -> std::result::Result<ureq::Response, ureq::Error> {
        let payload = WebhookPayload {
            content,
            username: self.username.as_deref(),
            avatar_url: self.avatar_url.as_deref(),
        };
        self.agent
            .post(&self.webhook_url)
            .set("Content-Type", "application/json")
            .send_json(&payload)
    }

    /// Posts once; on HTTP 429 waits the advertised delay and retries once.
    pub(crate) fn post(&self, content: &str) -> Result<()> {
        match self.send(content) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(429, response)) => {
                let wait_ms = retry_after_ms(response);
                warn!(wait_ms, "webhook rate limited, retrying once");
                self.clock.sleep(Duration::from_millis(wait_ms));
                self.send(content).map(|_| ()).map_err(JoinWatchError::from)
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl<C: Clock> Notifier for DiscordWebhook<'_, C> {
    fn deliver(&self, text: &str) -> Result<()> {
        self.post(&to_discord_code_block(text, DISCORD_MAX_CHARS))?;
        info!("delivered notification to webhook");
        Ok(())
    }
}

/// Writes the text block to stdout instead of delivering it.
pub(crate) struct StdoutNotifier;

impl Notifier for StdoutNotifier {
    fn deliver(&self, text: &str) -> Result<()> {
        println!("{text}");
        Ok(())
    }
}
