//! # Embedded Engines
//!
//! Lightweight, in-process stand-ins for the heavyweight pieces of a local
//! message-broker cluster: a coordination service, broker nodes, a schema
//! registry, a REST gateway and a stream-query server.
//!
//! Every engine owns a dedicated OS thread running its own tokio runtime.
//! The thread is created when the engine starts and joined when it shuts
//! down, so an engine value is single-use: build a fresh one for every
//! start/stop cycle.
//!
//! ## Example
//!
//! ```no_run
//! use embedded_engines::{CoordinationConfig, CoordinationEngine};
//!
//! # async fn example() -> embedded_engines::Result<()> {
//! let config = CoordinationConfig::new(2181, std::env::temp_dir().join("coordination"));
//! let engine = CoordinationEngine::start(config).await?;
//! println!("coordination service listening on {}", engine.local_addr());
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod broker;
pub mod coordination;
mod http;
pub mod rest_gateway;
pub mod runtime;
pub mod schema_registry;
pub mod security;
pub mod stream_query;

pub use broker::{
    AdminClient, AdminErrorCode, BrokerConfig, BrokerEngine, BrokerNode, BrokerSecurity,
    ClusterDescription, NewTopic, PartitionInfo, TopicDescription,
};
pub use coordination::{
    CoordinationConfig, CoordinationEngine, CoordinationErrorCode, CoordinationSession,
    FourLetterWord,
};
pub use rest_gateway::{RestGatewayConfig, RestGatewayEngine};
pub use runtime::EngineThread;
pub use schema_registry::{SchemaRegistryConfig, SchemaRegistryEngine};
pub use security::Credential;
pub use stream_query::{StreamQueryConfig, StreamQueryEngine};

/// Error types for engine operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address the engine tried to bind
        addr: String,
        /// Underlying bind failure
        #[source]
        source: std::io::Error,
    },

    /// Engine thread or runtime failure
    #[error("Engine runtime error: {0}")]
    Runtime(String),

    /// Coordination service answered with an error
    #[error("Coordination error ({code:?}): {message}")]
    Coordination {
        /// Error code returned by the coordination service
        code: CoordinationErrorCode,
        /// Human readable detail
        message: String,
    },

    /// Broker answered an admin request with an error
    #[error("Admin error ({code:?}): {message}")]
    Admin {
        /// Error code returned by the broker
        code: AdminErrorCode,
        /// Human readable detail
        message: String,
    },

    /// Malformed message on the wire
    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    /// Peer answered with a response that does not match the request
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// No engine answered within the allowed time
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Address or URL could not be parsed
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Strip an optional `SCHEME://` prefix from a listener URL, leaving `host:port`.
pub fn strip_scheme(url: &str) -> &str {
    match url.find("://") {
        Some(index) => &url[index + 3..],
        None => url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_scheme() {
        assert_eq!(strip_scheme("PLAINTEXT://localhost:9092"), "localhost:9092");
        assert_eq!(strip_scheme("http://localhost:8081"), "localhost:8081");
        assert_eq!(strip_scheme("localhost:2181"), "localhost:2181");
    }
}
