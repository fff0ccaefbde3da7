use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{JoinWatchError, Result};

/// Optional JSON config file. Every field may be overridden by the environment.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileConfig {
    #[serde(default)]
    pub(crate) discord_webhook_url: Option<String>,
    #[serde(default)]
    pub(crate) discord_username: Option<String>,
    #[serde(default)]
    pub(crate) discord_avatar_url: Option<String>,
    #[serde(default)]
    pub(crate) enable_lodestone: Option<bool>,
    #[serde(default)]
    pub(crate) default_world_name: Option<String>,
    #[serde(default)]
    pub(crate) dedupe_db_path: Option<String>,
    #[serde(default)]
    pub(crate) dedupe_ttl_seconds: Option<u64>,
    #[serde(default)]
    pub(crate) lodestone_base_url: Option<String>,
    #[serde(default)]
    pub(crate) lodestone_pacing_ms: Option<u64>,
    #[serde(default)]
    pub(crate) lodestone_timeout_ms: Option<u64>,
    #[serde(default)]
    pub(crate) loki_base_url: Option<String>,
    #[serde(default)]
    pub(crate) loki_query: Option<String>,
    #[serde(default)]
    pub(crate) lookback_seconds: Option<u64>,
}

pub(crate) fn load_file_config(path: &Path) -> Result<FileConfig> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        JoinWatchError::Config(format!("cannot read config file {}: {e}", path.display()))
    })?;
    serde_json::from_str(&data).map_err(|e| {
        JoinWatchError::Config(format!("invalid config file {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_parses() {
        let config: FileConfig =
            serde_json::from_str(r#"{"default_world_name": "Titan", "dedupe_ttl_seconds": 60}"#).unwrap();
        assert_eq!(config.default_world_name.as_deref(), Some("Titan"));
        assert_eq!(config.dedupe_ttl_seconds, Some(60));
        assert_eq!(config.enable_lodestone, None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_json::from_str::<FileConfig>(r#"{"dedupe_table": "x"}"#).is_err());
    }

    #[test]
    fn missing_file_is_config_error() {
        let path = std::env::temp_dir().join("joinwatch_test_missing_config.json");
        let _ = std::fs::remove_file(&path);
        assert!(matches!(load_file_config(&path), Err(JoinWatchError::Config(_))));
    }
}
