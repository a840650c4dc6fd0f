//! Immutable server-park snapshots and the lifecycle state machine.

use crate::services::{ServiceStatus, ServiceView};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle status of a whole environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServerParkStatus {
    /// Services constructed, nothing started yet
    Initialized,
    /// All services running
    Started,
    /// All services stopped, may start again
    Stopped,
    /// Working directories deleted; terminal
    TearDownCompleted,
}

/// Lifecycle request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Start every service
    Start,
    /// Stop every service
    Stop,
    /// Stop if needed and release all resources
    TearDown,
}

impl ServerParkStatus {
    /// Status reached by applying `transition`, or `None` when it is a no-op
    pub fn next(self, transition: Transition) -> Option<ServerParkStatus> {
        use ServerParkStatus::*;
        match (self, transition) {
            (TearDownCompleted, _) => None,
            (Initialized | Stopped, Transition::Start) => Some(Started),
            (Started, Transition::Stop) => Some(Stopped),
            (_, Transition::TearDown) => Some(TearDownCompleted),
            _ => None,
        }
    }

    /// Whether no transition leaves this status
    pub fn is_terminal(self) -> bool {
        self == ServerParkStatus::TearDownCompleted
    }
}

/// Whether the topology has brokers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BrokerStatus {
    /// Brokers exist
    Available {
        /// Brokers ordered by id
        brokers: Vec<ServiceView>,
        /// Comma-joined broker URLs
        brokers_url: String,
    },
    /// Coordination-only topology, or torn down
    NotAvailable,
}

/// Whether the topology has a schema registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SchemaRegistryStatus {
    /// A schema registry exists
    Available {
        /// The registry
        service: ServiceView,
    },
    /// No schema registry requested, or torn down
    NotAvailable,
}

/// Snapshot of an environment at one point of its lifecycle.
///
/// A new value is built for every transition; holders of an older snapshot
/// never observe it change.
#[derive(Debug, Clone, Serialize)]
pub struct ServerPark {
    /// The coordination service
    pub coordination: ServiceView,
    /// Broker availability
    pub broker_status: BrokerStatus,
    /// Schema registry availability
    pub schema_registry_status: SchemaRegistryStatus,
    /// Lifecycle status
    pub status: ServerParkStatus,
    /// When this snapshot was taken
    pub created_at: DateTime<Utc>,
}

impl ServerPark {
    /// Build a snapshot
    pub fn new(
        coordination: ServiceView,
        broker_status: BrokerStatus,
        schema_registry_status: SchemaRegistryStatus,
        status: ServerParkStatus,
    ) -> Self {
        Self {
            coordination,
            broker_status,
            schema_registry_status,
            status,
            created_at: Utc::now(),
        }
    }

    /// Brokers, empty when not available
    pub fn brokers(&self) -> &[ServiceView] {
        match &self.broker_status {
            BrokerStatus::Available { brokers, .. } => brokers,
            BrokerStatus::NotAvailable => &[],
        }
    }

    /// Comma-joined broker URLs, when brokers are available
    pub fn brokers_url(&self) -> Option<&str> {
        match &self.broker_status {
            BrokerStatus::Available { brokers_url, .. } => Some(brokers_url),
            BrokerStatus::NotAvailable => None,
        }
    }

    /// The schema registry, when available
    pub fn schema_registry(&self) -> Option<&ServiceView> {
        match &self.schema_registry_status {
            SchemaRegistryStatus::Available { service } => Some(service),
            SchemaRegistryStatus::NotAvailable => None,
        }
    }

    /// Number of brokers currently running
    pub fn running_brokers(&self) -> usize {
        self.brokers()
            .iter()
            .filter(|b| b.status == ServiceStatus::Running)
            .count()
    }
}

// Snapshots compare by content; the timestamp only records when they were taken.
impl PartialEq for ServerPark {
    fn eq(&self, other: &Self) -> bool {
        self.coordination == other.coordination
            && self.broker_status == other.broker_status
            && self.schema_registry_status == other.schema_registry_status
            && self.status == other.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ServerParkStatus::*;

    fn view(name: &str, port: u16, status: ServiceStatus) -> ServiceView {
        ServiceView {
            name: name.to_string(),
            host: "localhost".to_string(),
            port,
            url: format!("PLAINTEXT://localhost:{}", port),
            status,
        }
    }

    #[test]
    fn test_transitions() {
        assert_eq!(Initialized.next(Transition::Start), Some(Started));
        assert_eq!(Started.next(Transition::Start), None);
        assert_eq!(Started.next(Transition::Stop), Some(Stopped));
        assert_eq!(Stopped.next(Transition::Stop), None);
        assert_eq!(Stopped.next(Transition::Start), Some(Started));
        assert_eq!(Initialized.next(Transition::Stop), None);

        for status in [Initialized, Started, Stopped] {
            assert_eq!(status.next(Transition::TearDown), Some(TearDownCompleted));
        }
    }

    #[test]
    fn test_tear_down_is_terminal() {
        assert!(TearDownCompleted.is_terminal());
        for transition in [Transition::Start, Transition::Stop, Transition::TearDown] {
            assert_eq!(TearDownCompleted.next(transition), None);
        }
    }

    #[test]
    fn test_accessors() {
        let park = ServerPark::new(
            view("coordination", 2181, ServiceStatus::Running),
            BrokerStatus::Available {
                brokers: vec![
                    view("broker-0", 9092, ServiceStatus::Running),
                    view("broker-1", 9093, ServiceStatus::NotRunning),
                ],
                brokers_url: "PLAINTEXT://localhost:9092,PLAINTEXT://localhost:9093".to_string(),
            },
            SchemaRegistryStatus::NotAvailable,
            Started,
        );

        assert_eq!(park.brokers().len(), 2);
        assert_eq!(park.running_brokers(), 1);
        assert_eq!(park.brokers_url().map(|u| u.split(',').count()), Some(2));
        assert!(park.schema_registry().is_none());

        let empty = ServerPark::new(
            view("coordination", 2181, ServiceStatus::NotRunning),
            BrokerStatus::NotAvailable,
            SchemaRegistryStatus::NotAvailable,
            TearDownCompleted,
        );
        assert!(empty.brokers().is_empty());
        assert!(empty.brokers_url().is_none());
    }

    #[test]
    fn test_equality_ignores_timestamp() {
        let build = || {
            ServerPark::new(
                view("coordination", 2181, ServiceStatus::Running),
                BrokerStatus::NotAvailable,
                SchemaRegistryStatus::NotAvailable,
                Started,
            )
        };
        let first = build();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert_eq!(first, build());
    }
}
