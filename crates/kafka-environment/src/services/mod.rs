//! Managed services.
//!
//! Every sub-service of an environment implements [`ManagedService`]: a
//! fixed identity (host, port, URL) and a two-state lifecycle. The engine
//! behind a service exists only while it is running; each `start` builds a
//! fresh one and each `stop` discards it.

mod broker;
mod coordination;
mod http;

pub use broker::BrokerService;
pub use coordination::{CoordinationService, FAILED_COMMAND, Readiness, send_command};
pub use http::{RestGatewayService, SchemaRegistryService, StreamQueryService};

use crate::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Host every embedded service listens on
pub const HOST: &str = "localhost";

/// Lifecycle status of a managed service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceStatus {
    /// No engine exists
    NotRunning,
    /// The engine is serving
    Running,
}

/// Immutable snapshot of a managed service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceView {
    /// Service name, unique within an environment
    pub name: String,
    /// Host
    pub host: String,
    /// Port
    pub port: u16,
    /// Connection URL
    pub url: String,
    /// Status at snapshot time
    pub status: ServiceStatus,
}

/// A sub-service whose lifecycle the environment controls.
///
/// Transitions are idempotent: `start` does nothing unless the service is
/// not running, `stop` does nothing unless it is running.
#[async_trait]
pub trait ManagedService: Send + Sync {
    /// Service name, unique within an environment
    fn name(&self) -> &str;

    /// Host the service listens on
    fn host(&self) -> &str {
        HOST
    }

    /// Port assigned at construction
    fn port(&self) -> u16;

    /// Connection URL
    fn url(&self) -> String;

    /// Current status
    fn status(&self) -> ServiceStatus;

    /// Build a fresh engine and wait until it serves
    async fn start(&mut self) -> Result<()>;

    /// Stop and discard the engine.
    ///
    /// Engine shutdown failures are logged and swallowed.
    async fn stop(&mut self);

    /// Snapshot of the service
    fn view(&self) -> ServiceView {
        ServiceView {
            name: self.name().to_string(),
            host: self.host().to_string(),
            port: self.port(),
            url: self.url(),
            status: self.status(),
        }
    }
}

/// Status derived from whether an engine is held
pub(crate) fn status_of<T>(engine: &Option<T>) -> ServiceStatus {
    if engine.is_some() {
        ServiceStatus::Running
    } else {
        ServiceStatus::NotRunning
    }
}
