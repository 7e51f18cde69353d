//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::unsubscribe::classifier::Vocabulary;

/// Default per-request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default cap on concurrently running unsubscribe attempts.
const DEFAULT_MAX_CONCURRENT: usize = 8;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout applied to every outbound request.
    pub request_timeout: Duration,
    /// Maximum number of runs executing at once during bulk fan-out.
    pub max_concurrent_runs: usize,
    /// User agent marking requests as automated.
    pub user_agent: String,
    /// Base for resolving relative body links.
    pub base_url: Option<String>,
    /// Success / challenge / error phrase lists for the classifier.
    pub vocabulary: Vocabulary,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_concurrent_runs: DEFAULT_MAX_CONCURRENT,
            user_agent: format!(
                "unsub-engine/{} (automated unsubscribe)",
                env!("CARGO_PKG_VERSION")
            ),
            base_url: None,
            vocabulary: Vocabulary::default(),
        }
    }
}

impl EngineConfig {
    /// Build config from `UNSUB_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Missing or unparsable
    /// values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let request_timeout = lookup("UNSUB_TIMEOUT_SECS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        let max_concurrent_runs = lookup("UNSUB_MAX_CONCURRENT")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_concurrent_runs);

        let user_agent = lookup("UNSUB_USER_AGENT")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.user_agent);

        let base_url = lookup("UNSUB_BASE_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let list = |key: &str, fallback: Vec<String>| -> Vec<String> {
            lookup(key)
                .map(|s| {
                    s.split(',')
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|terms| !terms.is_empty())
                .unwrap_or(fallback)
        };

        let vocabulary = Vocabulary::new(
            list("UNSUB_SUCCESS_TERMS", defaults.vocabulary.success),
            list("UNSUB_CHALLENGE_TERMS", defaults.vocabulary.challenge),
            list("UNSUB_ERROR_TERMS", defaults.vocabulary.error),
        );

        Self {
            request_timeout,
            max_concurrent_runs,
            user_agent,
            base_url,
            vocabulary,
        }
    }
}

/// Settings only the server binary needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub db_path: PathBuf,
    pub http_port: u16,
}

impl ServerConfig {
    /// Read `UNSUB_DB_PATH` and `UNSUB_HTTP_PORT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unlike the engine settings, a
    /// malformed port is an error rather than a fallback.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("UNSUB_DB_PATH")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "./data/unsub-engine.db".to_string());

        let http_port = match lookup("UNSUB_HTTP_PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                key: "UNSUB_HTTP_PORT".into(),
                message: format!("{raw:?}: {e}"),
            })?,
            None => 8080,
        };

        Ok(Self {
            db_path: PathBuf::from(db_path),
            http_port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = EngineConfig::from_lookup(|_| None);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.max_concurrent_runs, 8);
        assert!(config.user_agent.starts_with("unsub-engine/"));
        assert!(config.base_url.is_none());
        assert_eq!(config.vocabulary, Vocabulary::default());
    }

    #[test]
    fn reads_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("UNSUB_TIMEOUT_SECS", "3"),
            ("UNSUB_MAX_CONCURRENT", "2"),
            ("UNSUB_BASE_URL", "https://news.example/"),
            ("UNSUB_SUCCESS_TERMS", "Abgemeldet, désabonné"),
        ]));
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(config.max_concurrent_runs, 2);
        assert_eq!(config.base_url.as_deref(), Some("https://news.example/"));
        assert_eq!(config.vocabulary.success, vec!["abgemeldet", "désabonné"]);
        assert_eq!(config.vocabulary.challenge, Vocabulary::default().challenge);
    }

    #[test]
    fn garbage_values_fall_back() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("UNSUB_TIMEOUT_SECS", "soon"),
            ("UNSUB_MAX_CONCURRENT", "0"),
            ("UNSUB_CHALLENGE_TERMS", " , "),
        ]));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.max_concurrent_runs, 8);
        assert_eq!(config.vocabulary.challenge, Vocabulary::default().challenge);
    }

    #[test]
    fn server_config_defaults_and_overrides() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.db_path, PathBuf::from("./data/unsub-engine.db"));
        assert_eq!(config.http_port, 8080);

        let config = ServerConfig::from_lookup(lookup_from(&[
            ("UNSUB_DB_PATH", "/tmp/u.db"),
            ("UNSUB_HTTP_PORT", "9090"),
        ]))
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/u.db"));
        assert_eq!(config.http_port, 9090);
    }

    #[test]
    fn bad_port_is_rejected() {
        let err = ServerConfig::from_lookup(lookup_from(&[("UNSUB_HTTP_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "UNSUB_HTTP_PORT"));
    }
}
