use std::path::{Path, PathBuf};

use crate::config_file::{load_file_config, FileConfig};
use crate::dedupe::{DedupeConfig, DEFAULT_TTL_SECONDS};
use crate::enrich::DEFAULT_PACING_MS;
use crate::error::{JoinWatchError, Result};
use crate::http::DEFAULT_FETCH_TIMEOUT_MS;
use crate::lodestone::DEFAULT_LODESTONE_BASE_URL;
use crate::util::{env_optional, parse_bool};

pub(crate) const DEFAULT_LOOKBACK_SECONDS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DiscordConfig {
    pub(crate) webhook_url: Option<String>,
    pub(crate) username: Option<String>,
    pub(crate) avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LokiConfig {
    pub(crate) base_url: Option<String>,
    pub(crate) query: Option<String>,
    pub(crate) lookback_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AppConfig {
    pub(crate) discord: DiscordConfig,
    pub(crate) enable_lodestone: bool,
    /// World assumed for lines that omit it (the log owner's own world).
    pub(crate) default_world_name: Option<String>,
    /// `None` disables cross-invocation dedupe.
    pub(crate) dedupe: Option<DedupeConfig>,
    pub(crate) lodestone_base_url: String,
    pub(crate) pacing_ms: u64,
    pub(crate) fetch_timeout_ms: u64,
    pub(crate) loki: LokiConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            discord: DiscordConfig {
                webhook_url: None,
                username: None,
                avatar_url: None,
            },
            enable_lodestone: true,
            default_world_name: None,
            dedupe: None,
            lodestone_base_url: DEFAULT_LODESTONE_BASE_URL.to_string(),
            pacing_ms: DEFAULT_PACING_MS,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            loki: LokiConfig {
                base_url: None,
                query: None,
                lookback_seconds: DEFAULT_LOOKBACK_SECONDS,
            },
        }
    }
}

/// Flags that win over both the environment and the config file.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConfigOverrides {
    pub(crate) default_world_name: Option<String>,
    pub(crate) dedupe_db_path: Option<PathBuf>,
    pub(crate) no_lodestone: bool,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn strict_u64(name: &str, value: Option<String>) -> Result<Option<u64>> {
    value
        .map(|raw| {
            raw.parse::<u64>()
                .map_err(|_| JoinWatchError::Config(format!("Invalid {name}: {raw}")))
        })
        .transpose()
}

/// Positive integer or fall back; a bad TTL must not disable dedupe.
fn positive_u64(value: Option<String>) -> Option<u64> {
    value
        .and_then(|raw| raw.parse::<i64>().ok())
        .filter(|v| *v > 0)
        .map(|v| v as u64)
}

impl AppConfig {
    /// Layers `file`, then `env`, over the defaults.
    pub(crate) fn from_sources(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = AppConfig::default();
        let env = |name: &str| non_empty(env(name));

        let enable_lodestone = match env("ENABLE_LODESTONE") {
            Some(raw) => parse_bool(&raw)
                .or(file.enable_lodestone)
                .unwrap_or(defaults.enable_lodestone),
            None => file.enable_lodestone.unwrap_or(defaults.enable_lodestone),
        };

        let ttl_seconds = positive_u64(env("DEDUPE_TTL_SECONDS"))
            .or(file.dedupe_ttl_seconds.filter(|ttl| *ttl > 0))
            .unwrap_or(DEFAULT_TTL_SECONDS);
        let dedupe = env("DEDUPE_DB_PATH")
            .or(non_empty(file.dedupe_db_path))
            .map(|path| DedupeConfig {
                db_path: PathBuf::from(path),
                ttl_seconds,
            });

        Ok(Self {
            discord: DiscordConfig {
                webhook_url: env("DISCORD_WEBHOOK_URL").or(non_empty(file.discord_webhook_url)),
                username: env("DISCORD_USERNAME").or(non_empty(file.discord_username)),
                avatar_url: env("DISCORD_AVATAR_URL").or(non_empty(file.discord_avatar_url)),
            },
            enable_lodestone,
            default_world_name: env("DEFAULT_WORLD_NAME").or(non_empty(file.default_world_name)),
            dedupe,
            lodestone_base_url: env("LODESTONE_BASE_URL")
                .or(non_empty(file.lodestone_base_url))
                .unwrap_or(defaults.lodestone_base_url),
            pacing_ms: strict_u64("LODESTONE_PACING_MS", env("LODESTONE_PACING_MS"))?
                .or(file.lodestone_pacing_ms)
                .unwrap_or(defaults.pacing_ms),
            fetch_timeout_ms: strict_u64("LODESTONE_TIMEOUT_MS", env("LODESTONE_TIMEOUT_MS"))?
                .or(file.lodestone_timeout_ms)
                .unwrap_or(defaults.fetch_timeout_ms),
            loki: LokiConfig {
                base_url: env("LOKI_BASE_URL").or(non_empty(file.loki_base_url)),
                query: env("LOKI_QUERY").or(non_empty(file.loki_query)),
                lookback_seconds: strict_u64("LOOKBACK_SECONDS", env("LOOKBACK_SECONDS"))?
                    .or(file.lookback_seconds)
                    .unwrap_or(defaults.loki.lookback_seconds),
            },
        })
    }

    pub(crate) fn load(config_path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let file = match config_path {
            Some(path) => load_file_config(path)?,
            None => FileConfig::default(),
        };
        let mut config = Self::from_sources(file, env_optional)?;
        config.apply_overrides(overrides);
        Ok(config)
    }

    pub(crate) fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(world) = non_empty(overrides.default_world_name.clone()) {
            self.default_world_name = Some(world);
        }
        if let Some(path) = &overrides.dedupe_db_path {
            let ttl_seconds = self
                .dedupe
                .as_ref()
                .map(|dedupe| dedupe.ttl_seconds)
                .unwrap_or(DEFAULT_TTL_SECONDS);
            self.dedupe = Some(DedupeConfig {
                db_path: path.clone(),
                ttl_seconds,
            });
        }
        if overrides.no_lodestone {
            self.enable_lodestone = false;
        }
    }

    pub(crate) fn require_webhook_url(&self) -> Result<&str> {
        self.discord
            .webhook_url
            .as_deref()
            .ok_or_else(|| JoinWatchError::Config("Missing DISCORD_WEBHOOK_URL".to_string()))
    }
}
