//! Session configuration, loaded from TOML

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::value::Value;

const DEFAULT_CAPABILITY_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_EVENT_CAPACITY: usize = 256;
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;

/// Everything a session needs besides its capabilities
///
/// Every field has a default, so a file only lists what it overrides:
///
/// ```toml
/// capability_timeout_ms = 5000
///
/// [fetch]
/// user_agent = "my-repl"
///
/// [query]
/// url = "http://localhost:8000/query"
///
/// [globals]
/// team_id = 2
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Upper bound for one asynchronous capability call; 0 disables it
    pub capability_timeout_ms: u64,
    /// Buffered events per subscriber before it starts lagging
    pub event_capacity: usize,
    pub fetch: FetchConfig,
    /// HTTP endpoint answering `run(query)`; without it `run` is not registered
    pub query: Option<QueryConfig>,
    /// Host globals visible to scripts by name
    pub globals: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub user_agent: String,
    /// Whole-request timeout; 0 leaves it to the capability timeout
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryConfig {
    /// Receives `{"query": ...}` as a JSON POST
    pub url: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            capability_timeout_ms: DEFAULT_CAPABILITY_TIMEOUT_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            fetch: FetchConfig::default(),
            query: None,
            globals: BTreeMap::new(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            user_agent: concat!("hogrepl/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
        }
    }
}

impl SessionConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), "Loaded session config");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn capability_timeout(&self) -> Option<Duration> {
        (self.capability_timeout_ms > 0).then(|| Duration::from_millis(self.capability_timeout_ms))
    }

    /// Configured globals as VM values
    pub fn global_values(&self) -> BTreeMap<String, Value> {
        self.globals
            .iter()
            .map(|(name, json)| (name.clone(), Value::from_json(json.clone())))
            .collect()
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = SessionConfig::from_toml_str("").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.capability_timeout(), Some(Duration::from_secs(30)));
        assert!(config.fetch.user_agent.starts_with("hogrepl/"));
        assert!(config.query.is_none());
    }

    #[test]
    fn test_query_endpoint() {
        let config = SessionConfig::from_toml_str("[query]\nurl = \"http://localhost:8000/query\"\n").unwrap();
        assert_eq!(
            config.query,
            Some(QueryConfig {
                url: "http://localhost:8000/query".to_string()
            })
        );
        assert!(matches!(
            SessionConfig::from_toml_str("[query]\n"),
            Err(ConfigError::TomlParse(_))
        ));
    }

    #[test]
    fn test_overrides_and_globals() {
        let config = SessionConfig::from_toml_str(
            r#"
            capability_timeout_ms = 0

            [fetch]
            user_agent = "test-agent"

            [globals]
            team_id = 2
            project = { name = "demo", tags = ["a"] }
            "#,
        )
        .unwrap();

        assert_eq!(config.capability_timeout(), None);
        assert_eq!(config.fetch.user_agent, "test-agent");
        assert_eq!(config.fetch.timeout_ms, DEFAULT_FETCH_TIMEOUT_MS);

        let globals = config.global_values();
        assert_eq!(globals["team_id"], Value::Int(2));
        assert_eq!(globals["project"].to_string(), "{'name': 'demo', 'tags': ['a']}");
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(matches!(
            SessionConfig::from_toml_str("event_capacity = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("unknown_key = 1"),
            Err(ConfigError::TomlParse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SessionConfig::load("/nonexistent/hogrepl.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
