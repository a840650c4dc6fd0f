//! # Kafka Environment
//!
//! An in-process message-broker cluster for automated tests: one
//! coordination service, up to a configurable number of brokers, and an
//! optional schema registry, REST gateway and stream-query server.
//!
//! The [`KafkaEnvironment`] allocates ports and working directories, starts
//! the services in dependency order, provisions the requested topics once,
//! and publishes every lifecycle transition as a fresh, immutable
//! [`ServerPark`] snapshot.
//!
//! ## Example
//!
//! ```no_run
//! use kafka_environment::{EnvironmentConfig, KafkaEnvironment};
//!
//! # async fn example() -> kafka_environment::Result<()> {
//! let config = EnvironmentConfig::new()
//!     .brokers(1)
//!     .topic("basic01")
//!     .topic("basic02");
//!
//! let mut env = KafkaEnvironment::new(config).await?;
//! env.start().await?;
//!
//! let admin = env.admin_client().expect("brokers are running");
//! println!("topics: {:?}", admin.list_topics().await?);
//!
//! env.tear_down().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod config;
mod environment;
mod park;
pub mod ports;
mod schema_registry;
mod security;
pub mod services;
mod topics;

pub use config::{EnvironmentConfig, Limits, TopicSpec};
pub use environment::KafkaEnvironment;
pub use park::{BrokerStatus, SchemaRegistryStatus, ServerPark, ServerParkStatus, Transition};
pub use schema_registry::SchemaRegistryClient;
pub use security::SecurityContext;
pub use services::{ManagedService, Readiness, ServiceStatus, ServiceView};
pub use topics::TopicProvisioner;

pub use embedded_engines::{AdminClient, Credential, NewTopic};

/// Error types for environment operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No free local port could be found
    #[error("Port allocation failed: {0}")]
    PortAllocation(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An embedded engine failed
    #[error("Engine error: {0}")]
    Engine(#[from] embedded_engines::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Failed to parse YAML configuration
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request against an embedded service failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Topics were not confirmed by the cluster
    #[error("Topic provisioning failed: {0}")]
    TopicProvisioning(String),
}

/// Result type for environment operations
pub type Result<T> = std::result::Result<T, Error>;
