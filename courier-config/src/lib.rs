use std::{collections::BTreeMap, fs, path::Path};

use courier_models::RetryPolicy;
use log::info;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Process-wide declarative configuration for topics and their subscriptions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    /// Subscriptions are inert and configuration lookups are synthesized.
    #[serde(default)]
    pub testing: bool,
    #[serde(default = "default_test_service")]
    pub test_service: String,
    #[serde(default)]
    pub tracing_enabled: bool,
    #[serde(default)]
    pub topics: BTreeMap<String, TopicDeclaration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicDeclaration {
    #[serde(default)]
    pub subscriptions: BTreeMap<String, SubscriptionDeclaration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionDeclaration {
    /// Service that owns the subscription handler.
    pub service: String,
    /// Index of the handler definition in the trace metadata.
    #[serde(default)]
    pub trace_idx: i32,
    /// Backend-side subscription name, when it differs from the declared one.
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

impl RuntimeConfig {
    /// Configuration used when running under test: every subscription lookup is
    /// synthesized and attributed to `service`.
    pub fn for_testing(service: impl Into<String>) -> Self {
        Self {
            testing: true,
            test_service: service.into(),
            ..Self::default()
        }
    }

    pub fn topic(&self, topic: &str) -> Option<&TopicDeclaration> {
        self.topics.get(topic)
    }

    pub fn subscription(&self, topic: &str, name: &str) -> Option<&SubscriptionDeclaration> {
        self.topic(topic)
            .and_then(|declaration| declaration.subscriptions.get(name))
    }
}

pub fn load_config(path: &Path) -> Result<RuntimeConfig, ConfigError> {
    let display = path.display().to_string();
    let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: display.clone(),
        source,
    })?;
    let config = parse_config(&data).map_err(|source| ConfigError::Parse {
        path: display.clone(),
        source,
    })?;

    info!(
        "Loaded runtime config from {} ({} topics, testing: {})",
        display,
        config.topics.len(),
        config.testing
    );
    Ok(config)
}

pub fn parse_config(data: &str) -> Result<RuntimeConfig, serde_json::Error> {
    serde_json::from_str(data)
}

fn default_test_service() -> String {
    "test".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_models::MaxRetries;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "tracing_enabled": true,
        "topics": {
            "orders": {
                "subscriptions": {
                    "send-receipt": {
                        "service": "billing",
                        "trace_idx": 7,
                        "retry_policy": { "max_retries": 5, "min_backoff_ms": 500 }
                    }
                }
            }
        }
    }"#;

    #[test]
    fn parses_declarations() {
        let config = parse_config(SAMPLE).unwrap();
        assert!(!config.testing);
        assert!(config.tracing_enabled);
        assert_eq!(config.test_service, "test");

        let subscription = config.subscription("orders", "send-receipt").unwrap();
        assert_eq!(subscription.service, "billing");
        assert_eq!(subscription.trace_idx, 7);
        assert_eq!(subscription.provider_name, None);
        let policy = subscription.retry_policy.as_ref().unwrap();
        assert_eq!(policy.max_retries, Some(MaxRetries::Limited(5)));

        assert!(config.subscription("orders", "unknown").is_none());
        assert!(config.subscription("payments", "send-receipt").is_none());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert!(config.topic("orders").is_some());
    }

    #[test]
    fn reports_missing_and_malformed_files() {
        let missing = load_config(Path::new("/nonexistent/courier.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        let malformed = load_config(file.path()).unwrap_err();
        assert!(matches!(malformed, ConfigError::Parse { .. }));
    }

    #[test]
    fn testing_config_has_no_declarations() {
        let config = RuntimeConfig::for_testing("svc");
        assert!(config.testing);
        assert_eq!(config.test_service, "svc");
        assert!(config.topics.is_empty());
    }
}
