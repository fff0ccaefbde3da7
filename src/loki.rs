use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{JoinWatchError, Result};

pub(crate) const QUERY_RANGE_PATH: &str = "/loki/api/v1/query_range";
pub(crate) const DEFAULT_QUERY_LIMIT: u32 = 500;
const QUERY_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Deserialize)]
struct QueryRangeResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryRangeData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryRangeData {
    #[serde(default)]
    result: Vec<LokiStream>,
}

#[derive(Debug, Deserialize)]
struct LokiStream {
    #[serde(default)]
    #[allow(dead_code)]
    stream: HashMap<String, String>,
    #[serde(default)]
    values: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LokiLogEntry {
    pub(crate) timestamp_ns: String,
    pub(crate) line: String,
}

fn timestamp_ns(at: DateTime<Utc>) -> String {
    // Out-of-range dates only happen past year 2262.
    at.timestamp_nanos_opt().unwrap_or(i64::MAX).to_string()
}

/// `end - lookback_seconds`, rejecting lookbacks chrono cannot represent.
pub(crate) fn window_start(end: DateTime<Utc>, lookback_seconds: u64) -> Result<DateTime<Utc>> {
    i64::try_from(lookback_seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|lookback| end.checked_sub_signed(lookback))
        .ok_or_else(|| JoinWatchError::Config(format!("lookback out of range: {lookback_seconds}s")))
}

pub(crate) fn build_query_url(base_url: &str, query: &str, start_ns: &str, end_ns: &str) -> Result<Url> {
    let base = Url::parse(base_url)
        .map_err(|e| JoinWatchError::Config(format!("invalid LOKI_BASE_URL {base_url}: {e}")))?;
    let mut url = base
        .join(QUERY_RANGE_PATH)
        .map_err(|e| JoinWatchError::Config(format!("invalid LOKI_BASE_URL {base_url}: {e}")))?;
    url.query_pairs_mut()
        .append_pair("query", query)
        .append_pair("start", start_ns)
        .append_pair("end", end_ns)
        .append_pair("limit", &DEFAULT_QUERY_LIMIT.to_string())
        .append_pair("direction", "BACKWARD");
    Ok(url)
}

/// Flattens every stream's values, oldest first. Streams arrive unsorted
/// relative to each other.
pub(crate) fn parse_query_range(body: &str) -> Result<Vec<LokiLogEntry>> {
    let payload: QueryRangeResponse = serde_json::from_str(body)?;
    if payload.status != "success" {
        let mut message = payload.error.unwrap_or_else(|| "Loki error".to_string());
        if let Some(kind) = payload.error_type {
            message.push_str(&format!(" ({kind})"));
        }
        return Err(JoinWatchError::LogSource(message));
    }
    let mut entries: Vec<LokiLogEntry> = payload
        .data
        .map(|data| data.result)
        .unwrap_or_default()
        .into_iter()
        .flat_map(|stream| stream.values)
        .map(|(timestamp_ns, line)| LokiLogEntry { timestamp_ns, line })
        .collect();
    entries.sort_by_key(|entry| entry.timestamp_ns.parse::<u128>().unwrap_or(0));
    Ok(entries)
}

pub(crate) struct LokiClient {
    agent: ureq::Agent,
    base_url: String,
}

impl LokiClient {
    pub(crate) fn new(base_url: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(QUERY_TIMEOUT_MS))
            .build();
        Self {
            agent,
            base_url: base_url.to_string(),
        }
    }

    pub(crate) fn query_range(&self, query: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<LokiLogEntry>> {
        let url = build_query_url(&self.base_url, query, &timestamp_ns(start), &timestamp_ns(end))?;
        debug!(%url, "querying loki");
        let response = self
            .agent
            .get(url.as_str())
            .set("Accept", "application/json")
            .call();
        let body = match response {
            Ok(response) => response.into_string()?,
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(JoinWatchError::LogSource(format!("query failed: {status} {body}")));
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(JoinWatchError::Http(transport.to_string()));
            }
        };
        parse_query_range(&body)
    }

    /// Lines logged in the last `lookback_seconds`, oldest first.
    pub(crate) fn recent_lines(&self, query: &str, lookback_seconds: u64) -> Result<Vec<String>> {
        let end = Utc::now();
        let start = window_start(end, lookback_seconds)?;
        let entries = self.query_range(query, start, end)?;
        Ok(entries.into_iter().map(|entry| entry.line).collect())
    }
}
