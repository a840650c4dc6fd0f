//! The environment orchestrator.

use crate::park::Transition;
use crate::services::{
    BrokerService, CoordinationService, ManagedService, RestGatewayService, SchemaRegistryService,
    StreamQueryService,
};
use crate::{
    AdminClient, BrokerStatus, EnvironmentConfig, Error, Result, SchemaRegistryClient,
    SchemaRegistryStatus, SecurityContext, ServerPark, ServerParkStatus, ServiceView,
    TopicProvisioner, ports,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// A local message-broker cluster for tests.
///
/// Services start in dependency order (coordination, brokers, schema
/// registry, REST gateway, stream query) and stop in reverse. Every
/// transition publishes a new [`ServerPark`]. Dropping the environment stops
/// any engine still running and deletes the working directory.
pub struct KafkaEnvironment {
    config: EnvironmentConfig,
    security: SecurityContext,
    coordination: CoordinationService,
    brokers: Vec<BrokerService>,
    schema_registry: Option<SchemaRegistryService>,
    rest_gateway: Option<RestGatewayService>,
    stream_query: Option<StreamQueryService>,
    topics_provisioned: bool,
    park: Arc<ServerPark>,
    // Dropped last, after every engine is gone
    work_dir: Option<TempDir>,
}

impl KafkaEnvironment {
    /// Allocate ports and directories for the configured topology.
    ///
    /// Starts the environment right away when `auto_start` is set.
    pub async fn new(config: EnvironmentConfig) -> Result<Self> {
        config.validate()?;

        let security = SecurityContext::from_flag(config.with_security, &config.credentials);
        let work_dir = tempfile::Builder::new()
            .prefix("kafka-environment-")
            .tempdir()?;
        let root = work_dir.path().to_path_buf();
        let limits = config.limits.clone();

        let coordination = CoordinationService::new(
            ports::allocate()?,
            root.join("coordination"),
            limits.clone(),
            security.clone(),
        );

        let broker_count = config.effective_broker_count();
        if broker_count as i64 != config.broker_count as i64 {
            debug!(
                "Requested {} broker(s), running {}",
                config.broker_count, broker_count
            );
        }
        let brokers: Vec<BrokerService> = ports::allocate_many(broker_count)?
            .into_iter()
            .enumerate()
            .map(|(id, port)| {
                BrokerService::new(
                    id as u32,
                    port,
                    coordination.url(),
                    root.clone(),
                    broker_count,
                    limits.broker_connect_timeout(),
                    security.clone(),
                )
            })
            .collect();
        let brokers_url = join_urls(&brokers);

        let with_brokers = |wanted: bool| wanted && !brokers.is_empty();
        let schema_registry = if with_brokers(config.with_schema_registry) {
            Some(SchemaRegistryService::new(
                ports::allocate()?,
                brokers_url.clone(),
                security.clone(),
            ))
        } else {
            None
        };
        let rest_gateway = if with_brokers(config.with_rest_gateway) {
            Some(RestGatewayService::new(
                ports::allocate()?,
                brokers_url.clone(),
                security.clone(),
            ))
        } else {
            None
        };
        let stream_query = if with_brokers(config.with_stream_query) {
            Some(StreamQueryService::new(
                ports::allocate()?,
                brokers_url.clone(),
                root.join("stream-query"),
                security.clone(),
            ))
        } else {
            None
        };

        let auto_start = config.auto_start;
        let mut env = Self {
            config,
            security,
            coordination,
            brokers,
            schema_registry,
            rest_gateway,
            stream_query,
            topics_provisioned: false,
            park: Arc::new(placeholder_park()),
            work_dir: Some(work_dir),
        };
        env.publish(ServerParkStatus::Initialized);

        info!(
            "Kafka environment initialised in {:?} with {} broker(s)",
            root,
            env.brokers.len()
        );

        if auto_start {
            env.start().await?;
        }
        Ok(env)
    }

    /// Start every service in dependency order.
    ///
    /// A no-op unless the park is `Initialized` or `Stopped`. Topics are
    /// provisioned on the first successful start only. When a service fails
    /// to start, the services already started are stopped again and the
    /// park keeps its previous status.
    pub async fn start(&mut self) -> Result<()> {
        let Some(next) = self.park.status.next(Transition::Start) else {
            debug!("Start ignored in status {:?}", self.park.status);
            return Ok(());
        };

        if let Err(e) = self.start_services().await {
            warn!("Environment start failed, stopping started services: {}", e);
            self.stop_services().await;
            return Err(e);
        }

        self.publish(next);
        Ok(())
    }

    /// Stop every service in reverse dependency order; a no-op unless `Started`
    pub async fn stop(&mut self) {
        let Some(next) = self.park.status.next(Transition::Stop) else {
            debug!("Stop ignored in status {:?}", self.park.status);
            return;
        };

        self.stop_services().await;
        self.publish(next);
    }

    /// Stop if needed, drop every service and delete the working directory.
    ///
    /// Terminal: later calls to any lifecycle operation are no-ops.
    pub async fn tear_down(&mut self) {
        let Some(next) = self.park.status.next(Transition::TearDown) else {
            return;
        };

        if self.park.status == ServerParkStatus::Started {
            self.stop_services().await;
        }
        self.brokers.clear();
        self.schema_registry = None;
        self.rest_gateway = None;
        self.stream_query = None;

        if let Some(work_dir) = self.work_dir.take() {
            let path = work_dir.path().to_path_buf();
            match work_dir.close() {
                Ok(()) => debug!("Removed working directory {:?}", path),
                Err(e) => warn!("Failed to remove working directory {:?}: {}", path, e),
            }
        }

        self.publish(next);
    }

    /// Alias of [`KafkaEnvironment::tear_down`]
    pub async fn close(&mut self) {
        self.tear_down().await
    }

    /// Stop a single broker; only while `Started`
    pub async fn stop_broker(&mut self, index: usize) -> Result<()> {
        if self.park.status != ServerParkStatus::Started {
            return Ok(());
        }
        self.broker_mut(index)?.stop().await;
        self.publish(self.park.status);
        Ok(())
    }

    /// Restart a single stopped broker; only while `Started`
    pub async fn start_broker(&mut self, index: usize) -> Result<()> {
        if self.park.status != ServerParkStatus::Started {
            return Ok(());
        }
        self.broker_mut(index)?.start().await?;
        self.publish(self.park.status);
        Ok(())
    }

    /// Current snapshot
    pub fn server_park(&self) -> Arc<ServerPark> {
        self.park.clone()
    }

    /// Current lifecycle status
    pub fn status(&self) -> ServerParkStatus {
        self.park.status
    }

    /// Configuration the environment was built from
    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// Security settings shared by the services
    pub fn security(&self) -> &SecurityContext {
        &self.security
    }

    /// The coordination service
    pub fn coordination(&self) -> &CoordinationService {
        &self.coordination
    }

    /// Coordination service `host:port`; `None` after teardown
    pub fn coordination_url(&self) -> Option<String> {
        (!self.park.status.is_terminal()).then(|| self.coordination.url())
    }

    /// Brokers; empty when none exist or after teardown
    pub fn brokers(&self) -> &[ServiceView] {
        self.park.brokers()
    }

    /// Comma-joined broker URLs
    pub fn brokers_url(&self) -> Option<&str> {
        self.park.brokers_url()
    }

    /// Admin client, only when brokers exist and the park is `Started`
    pub fn admin_client(&self) -> Option<AdminClient> {
        if self.park.status != ServerParkStatus::Started {
            return None;
        }
        let brokers_url = self.park.brokers_url()?;

        let mut admin = AdminClient::new(brokers_url).ok()?;
        if let Some(credential) = self.security.client_credential() {
            admin = admin.with_credential(credential);
        }
        Some(admin)
    }

    /// Schema registry client, when a registry exists
    pub fn schema_registry(&self) -> Option<SchemaRegistryClient> {
        self.park
            .schema_registry()
            .map(|service| SchemaRegistryClient::new(service.url.clone()))
    }

    /// REST gateway URL, when a gateway exists
    pub fn rest_gateway_url(&self) -> Option<String> {
        self.rest_gateway.as_ref().map(|s| s.url())
    }

    /// Stream-query server URL, when one exists
    pub fn stream_query_url(&self) -> Option<String> {
        self.stream_query.as_ref().map(|s| s.url())
    }

    /// Working directory; `None` after teardown
    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_ref().map(|d| d.path())
    }

    async fn start_services(&mut self) -> Result<()> {
        self.coordination.start().await?;
        for broker in &mut self.brokers {
            broker.start().await?;
        }
        if let Some(registry) = &mut self.schema_registry {
            registry.start().await?;
        }
        if let Some(gateway) = &mut self.rest_gateway {
            gateway.start().await?;
        }
        if let Some(query) = &mut self.stream_query {
            query.start().await?;
        }

        if !self.topics_provisioned && self.config.has_topics() {
            if let Some(admin) = self.running_admin_client()? {
                let limits = &self.config.limits;
                TopicProvisioner::new(admin, self.brokers.len())
                    .with_confirmation(limits.readiness_retries, limits.readiness_interval())
                    .provision(&self.config.all_topics())
                    .await?;
                self.topics_provisioned = true;
            }
        }
        Ok(())
    }

    async fn stop_services(&mut self) {
        if let Some(query) = &mut self.stream_query {
            query.stop().await;
        }
        if let Some(gateway) = &mut self.rest_gateway {
            gateway.stop().await;
        }
        if let Some(registry) = &mut self.schema_registry {
            registry.stop().await;
        }
        for broker in self.brokers.iter_mut().rev() {
            broker.stop().await;
        }
        self.coordination.stop().await;
    }

    // Admin client for provisioning, built before the park flips to Started
    fn running_admin_client(&self) -> Result<Option<AdminClient>> {
        if self.brokers.is_empty() {
            return Ok(None);
        }

        let mut admin = AdminClient::new(&join_urls(&self.brokers))?;
        if let Some(credential) = self.security.client_credential() {
            admin = admin.with_credential(credential);
        }
        Ok(Some(admin))
    }

    fn broker_mut(&mut self, index: usize) -> Result<&mut BrokerService> {
        let count = self.brokers.len();
        self.brokers
            .get_mut(index)
            .ok_or_else(|| Error::Config(format!("no broker {} (have {})", index, count)))
    }

    fn publish(&mut self, status: ServerParkStatus) {
        let broker_status = if self.brokers.is_empty() {
            BrokerStatus::NotAvailable
        } else {
            BrokerStatus::Available {
                brokers: self.brokers.iter().map(|b| b.view()).collect(),
                brokers_url: join_urls(&self.brokers),
            }
        };
        let schema_registry_status = match &self.schema_registry {
            Some(registry) => SchemaRegistryStatus::Available {
                service: registry.view(),
            },
            None => SchemaRegistryStatus::NotAvailable,
        };

        let previous = self.park.status;
        self.park = Arc::new(ServerPark::new(
            self.coordination.view(),
            broker_status,
            schema_registry_status,
            status,
        ));
        if previous != status {
            info!("Server park {:?} -> {:?}", previous, status);
        }
    }
}

fn join_urls(brokers: &[BrokerService]) -> String {
    brokers
        .iter()
        .map(|b| b.url())
        .collect::<Vec<_>>()
        .join(",")
}

fn placeholder_park() -> ServerPark {
    ServerPark::new(
        ServiceView {
            name: String::new(),
            host: String::new(),
            port: 0,
            url: String::new(),
            status: crate::ServiceStatus::NotRunning,
        },
        BrokerStatus::NotAvailable,
        SchemaRegistryStatus::NotAvailable,
        ServerParkStatus::Initialized,
    )
}
