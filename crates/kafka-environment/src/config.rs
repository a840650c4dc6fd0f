//! Environment configuration.
//!
//! An [`EnvironmentConfig`] can be built in code or loaded from YAML:
//!
//! ```yaml
//! broker_count: 2
//! topic_names: [basic01, basic02]
//! topic_specs:
//!   - name: retained
//!     partitions: 4
//!     configs:
//!       retention.ms: "5000"
//! with_schema_registry: true
//! limits:
//!   max_brokers: 2
//!   readiness_retries: 200
//! ```
//!
//! The tuning limits can be overridden through `KAFKA_ENV_MAX_BROKERS`,
//! `KAFKA_ENV_READINESS_RETRIES` and `KAFKA_ENV_READINESS_INTERVAL_MS`.

use crate::{Credential, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Topic with explicit options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicSpec {
    /// Topic name
    pub name: String,
    /// Partition count; the broker count when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<u32>,
    /// Topic config overrides
    #[serde(default)]
    pub configs: BTreeMap<String, String>,
}

impl TopicSpec {
    /// Topic with default options
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: None,
            configs: BTreeMap::new(),
        }
    }

    /// Set the partition count
    pub fn partitions(mut self, partitions: u32) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// Add a config override
    pub fn config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configs.insert(key.into(), value.into());
        self
    }
}

/// Local resource caps and readiness tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Limits {
    /// Upper bound on the broker count
    pub max_brokers: usize,
    /// Pause between coordination readiness probes, in milliseconds
    pub readiness_interval_ms: u64,
    /// Number of coordination readiness probes
    pub readiness_retries: u32,
    /// Timeout of a single coordination command, in milliseconds
    pub command_timeout_ms: u64,
    /// How long a broker waits for the coordination service, in milliseconds
    pub broker_connect_timeout_ms: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_brokers: 2,
            readiness_interval_ms: 25,
            readiness_retries: 200,
            command_timeout_ms: 500,
            broker_connect_timeout_ms: 10_000,
        }
    }
}

impl Limits {
    /// Pause between readiness probes
    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }

    /// Coordination command timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Broker connect timeout
    pub fn broker_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.broker_connect_timeout_ms)
    }
}

/// Requested topology of an environment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Requested broker count, clamped by [`EnvironmentConfig::effective_broker_count`]
    pub broker_count: i32,
    /// Topics created with default options
    pub topic_names: Vec<String>,
    /// Topics created with explicit options
    pub topic_specs: Vec<TopicSpec>,
    /// Start a schema registry
    pub with_schema_registry: bool,
    /// Start a REST gateway
    pub with_rest_gateway: bool,
    /// Start a stream-query server
    pub with_stream_query: bool,
    /// SASL listeners and authenticated sessions
    pub with_security: bool,
    /// Extra client credentials accepted by secured brokers
    pub credentials: Vec<Credential>,
    /// Start the environment as part of construction
    pub auto_start: bool,
    /// Tuning limits
    pub limits: Limits,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            broker_count: 1,
            topic_names: Vec::new(),
            topic_specs: Vec::new(),
            with_schema_registry: false,
            with_rest_gateway: false,
            with_stream_query: false,
            with_security: false,
            credentials: Vec::new(),
            auto_start: false,
            limits: Limits::default(),
        }
    }
}

impl EnvironmentConfig {
    /// One broker, nothing else
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse YAML, apply environment overrides and validate
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let mut config: EnvironmentConfig = serde_yaml::from_str(content)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Set the requested broker count
    pub fn brokers(mut self, count: i32) -> Self {
        self.broker_count = count;
        self
    }

    /// Add a topic with default options
    pub fn topic(mut self, name: impl Into<String>) -> Self {
        self.topic_names.push(name.into());
        self
    }

    /// Add a topic with explicit options
    pub fn topic_spec(mut self, spec: TopicSpec) -> Self {
        self.topic_specs.push(spec);
        self
    }

    /// Toggle the schema registry
    pub fn with_schema_registry(mut self, enabled: bool) -> Self {
        self.with_schema_registry = enabled;
        self
    }

    /// Toggle the REST gateway
    pub fn with_rest_gateway(mut self, enabled: bool) -> Self {
        self.with_rest_gateway = enabled;
        self
    }

    /// Toggle the stream-query server
    pub fn with_stream_query(mut self, enabled: bool) -> Self {
        self.with_stream_query = enabled;
        self
    }

    /// Toggle SASL
    pub fn with_security(mut self, enabled: bool) -> Self {
        self.with_security = enabled;
        self
    }

    /// Accept an extra client credential on secured brokers
    pub fn credential(mut self, credential: Credential) -> Self {
        self.credentials.push(credential);
        self
    }

    /// Start during construction
    pub fn auto_start(mut self, enabled: bool) -> Self {
        self.auto_start = enabled;
        self
    }

    /// Replace the tuning limits
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Whether any topic was requested
    pub fn has_topics(&self) -> bool {
        !self.topic_names.is_empty() || !self.topic_specs.is_empty()
    }

    /// Broker count after clamping.
    ///
    /// A feature that needs brokers (topics, schema registry, REST gateway,
    /// stream query) raises a count below 1 to 1. Negative counts otherwise
    /// mean 0. The result never exceeds `limits.max_brokers`.
    pub fn effective_broker_count(&self) -> usize {
        let requested = if self.needs_broker() && self.broker_count < 1 {
            1
        } else {
            self.broker_count.max(0) as usize
        };
        requested.min(self.limits.max_brokers)
    }

    /// Whether a requested feature only works with at least one broker
    pub fn needs_broker(&self) -> bool {
        self.has_topics()
            || self.with_schema_registry
            || self.with_rest_gateway
            || self.with_stream_query
    }

    /// Every requested topic; an explicit spec wins over a plain name
    pub fn all_topics(&self) -> Vec<TopicSpec> {
        let mut topics: BTreeMap<&str, TopicSpec> = self
            .topic_names
            .iter()
            .map(|name| (name.as_str(), TopicSpec::new(name.clone())))
            .collect();
        for spec in &self.topic_specs {
            topics.insert(spec.name.as_str(), spec.clone());
        }
        topics.into_values().collect()
    }

    /// Check the configuration for values no environment can honour
    pub fn validate(&self) -> Result<()> {
        for topic in self.all_topics() {
            if topic.name.trim().is_empty() {
                return Err(Error::Config("topic names must not be empty".to_string()));
            }
            if topic.partitions == Some(0) {
                return Err(Error::Config(format!(
                    "topic '{}' needs at least one partition",
                    topic.name
                )));
            }
        }

        if self.limits.max_brokers == 0 && self.needs_broker() {
            return Err(Error::Config(
                "max_brokers is 0 but topics or broker-backed services were requested"
                    .to_string(),
            ));
        }

        if self.limits.readiness_retries == 0 {
            return Err(Error::Config(
                "readiness_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply tuning overrides from a variable lookup
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("KAFKA_ENV_MAX_BROKERS") {
            self.limits.max_brokers = parse_override("KAFKA_ENV_MAX_BROKERS", &value)?;
        }
        if let Some(value) = lookup("KAFKA_ENV_READINESS_RETRIES") {
            self.limits.readiness_retries = parse_override("KAFKA_ENV_READINESS_RETRIES", &value)?;
        }
        if let Some(value) = lookup("KAFKA_ENV_READINESS_INTERVAL_MS") {
            self.limits.readiness_interval_ms =
                parse_override("KAFKA_ENV_READINESS_INTERVAL_MS", &value)?;
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has invalid value {:?}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_count_clamping() {
        assert_eq!(EnvironmentConfig::new().effective_broker_count(), 1);
        assert_eq!(EnvironmentConfig::new().brokers(5).effective_broker_count(), 2);
        assert_eq!(EnvironmentConfig::new().brokers(0).effective_broker_count(), 0);
        assert_eq!(EnvironmentConfig::new().brokers(-2).effective_broker_count(), 0);

        let with_topic = EnvironmentConfig::new().brokers(0).topic("basic01");
        assert_eq!(with_topic.effective_broker_count(), 1);

        let with_registry = EnvironmentConfig::new()
            .brokers(-2)
            .with_schema_registry(true);
        assert_eq!(with_registry.effective_broker_count(), 1);

        let wider = EnvironmentConfig::new().brokers(5).limits(Limits {
            max_brokers: 4,
            ..Limits::default()
        });
        assert_eq!(wider.effective_broker_count(), 4);
    }

    #[test]
    fn test_spec_overrides_plain_topic() {
        let config = EnvironmentConfig::new()
            .topic("basic01")
            .topic("retained")
            .topic_spec(TopicSpec::new("retained").partitions(4));

        let topics = config.all_topics();
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0], TopicSpec::new("basic01"));
        assert_eq!(topics[1].partitions, Some(4));
    }

    #[test]
    fn test_yaml_loading() {
        let yaml = r#"
broker_count: 2
topic_names: [basic01]
topic_specs:
  - name: retained
    partitions: 4
    configs:
      retention.ms: "5000"
with_schema_registry: true
credentials:
  - username: alice
    password: secret
limits:
  readiness_retries: 10
"#;
        let config: EnvironmentConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.broker_count, 2);
        assert!(config.with_schema_registry);
        assert!(!config.with_stream_query);
        assert_eq!(config.topic_specs[0].configs["retention.ms"], "5000");
        assert_eq!(config.credentials[0].username, "alice");
        assert_eq!(config.limits.readiness_retries, 10);
        assert_eq!(config.limits.max_brokers, 2);
    }

    #[test]
    fn test_validation() {
        let empty_name = EnvironmentConfig::new().topic(" ");
        assert!(matches!(empty_name.validate(), Err(Error::Config(_))));

        let no_partitions = EnvironmentConfig::new().topic_spec(TopicSpec::new("t").partitions(0));
        assert!(matches!(no_partitions.validate(), Err(Error::Config(_))));

        let zero_cap = Limits {
            max_brokers: 0,
            ..Limits::default()
        };
        let dropped_topics = EnvironmentConfig::new().topic("t").limits(zero_cap.clone());
        assert!(matches!(dropped_topics.validate(), Err(Error::Config(_))));

        let dropped_registry = EnvironmentConfig::new()
            .brokers(0)
            .with_schema_registry(true)
            .limits(zero_cap.clone());
        assert!(matches!(dropped_registry.validate(), Err(Error::Config(_))));

        let coordination_only = EnvironmentConfig::new().brokers(0).limits(zero_cap);
        assert!(coordination_only.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let mut config = EnvironmentConfig::new();
        config
            .apply_overrides(|name| match name {
                "KAFKA_ENV_MAX_BROKERS" => Some("3".to_string()),
                "KAFKA_ENV_READINESS_INTERVAL_MS" => Some(" 10 ".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.limits.max_brokers, 3);
        assert_eq!(config.limits.readiness_interval(), Duration::from_millis(10));
        assert_eq!(config.limits.readiness_retries, 200);

        let mut capped = EnvironmentConfig::new().topic("t");
        capped
            .apply_overrides(|name| (name == "KAFKA_ENV_MAX_BROKERS").then(|| "0".to_string()))
            .unwrap();
        assert!(matches!(capped.validate(), Err(Error::Config(_))));

        let invalid = config.apply_overrides(|name| {
            (name == "KAFKA_ENV_READINESS_RETRIES").then(|| "many".to_string())
        });
        assert!(matches!(invalid, Err(Error::Config(_))));
    }
}
