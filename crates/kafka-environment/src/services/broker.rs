//! Broker nodes.

use super::{HOST, ManagedService, ServiceStatus, status_of};
use crate::{Result, SecurityContext};
use async_trait::async_trait;
use embedded_engines::{BrokerConfig, BrokerEngine};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A broker node.
///
/// Each start gets a new log directory `broker-<id>-<uuid>` under the
/// environment's working directory; stop deletes it again. Topic metadata
/// lives in the coordination service and survives the restart.
pub struct BrokerService {
    id: u32,
    name: String,
    port: u16,
    coordination_url: String,
    work_root: PathBuf,
    num_partitions: u32,
    connect_timeout: Duration,
    security: SecurityContext,
    log_dir: Option<PathBuf>,
    engine: Option<BrokerEngine>,
}

impl BrokerService {
    /// Broker `id` of a cluster of `broker_count`, registering at `coordination_url`
    pub fn new(
        id: u32,
        port: u16,
        coordination_url: impl Into<String>,
        work_root: PathBuf,
        broker_count: usize,
        connect_timeout: Duration,
        security: SecurityContext,
    ) -> Self {
        Self {
            id,
            name: format!("broker-{}", id),
            port,
            coordination_url: coordination_url.into(),
            work_root,
            num_partitions: broker_count.max(1) as u32,
            connect_timeout,
            security,
            log_dir: None,
            engine: None,
        }
    }

    /// Broker id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Log directory of the running engine
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

#[async_trait]
impl ManagedService for BrokerService {
    fn name(&self) -> &str {
        &self.name
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn url(&self) -> String {
        format!("{}://{}:{}", self.security.protocol(), HOST, self.port)
    }

    fn status(&self) -> ServiceStatus {
        status_of(&self.engine)
    }

    async fn start(&mut self) -> Result<()> {
        if self.engine.is_some() {
            return Ok(());
        }

        let log_dir = self
            .work_root
            .join(format!("broker-{}-{}", self.id, uuid::Uuid::new_v4()));
        let mut config = BrokerConfig::new(
            self.id,
            self.port,
            self.coordination_url.clone(),
            log_dir.clone(),
        );
        config.num_partitions = self.num_partitions;
        config.coordination_timeout = self.connect_timeout;
        if let Some(security) = self.security.broker_security() {
            config = config.with_security(security);
        }

        match BrokerEngine::start(config).await {
            Ok(engine) => {
                self.engine = Some(engine);
                self.log_dir = Some(log_dir);
                info!("Broker {} running at {}", self.id, self.url());
                Ok(())
            }
            Err(e) => {
                remove_log_dir(&log_dir).await;
                Err(e.into())
            }
        }
    }

    async fn stop(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };

        if let Err(e) = engine.shutdown().await {
            warn!("Broker {} shutdown failed: {}", self.id, e);
        }
        if let Some(log_dir) = self.log_dir.take() {
            remove_log_dir(&log_dir).await;
        }
        info!("Broker {} stopped", self.id);
    }
}

async fn remove_log_dir(log_dir: &Path) {
    match tokio::fs::remove_dir_all(log_dir).await {
        Ok(()) => debug!("Removed broker log dir {:?}", log_dir),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove broker log dir {:?}: {}", log_dir, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::CoordinationService;
    use crate::{Limits, ports};

    #[tokio::test]
    async fn test_log_dir_lives_only_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordination = CoordinationService::new(
            ports::allocate().unwrap(),
            dir.path().join("coordination"),
            Limits::default(),
            SecurityContext::disabled(),
        );
        coordination.start().await.unwrap();

        let mut broker = BrokerService::new(
            0,
            ports::allocate().unwrap(),
            coordination.url(),
            dir.path().to_path_buf(),
            1,
            Duration::from_secs(5),
            SecurityContext::disabled(),
        );
        assert!(broker.log_dir().is_none());

        broker.start().await.unwrap();
        let first = broker.log_dir().unwrap().to_path_buf();
        assert!(first.is_dir());
        assert!(first.starts_with(dir.path()));
        assert!(
            first
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("broker-0-"))
        );

        broker.stop().await;
        assert!(broker.log_dir().is_none());
        assert!(!first.exists());

        broker.start().await.unwrap();
        let second = broker.log_dir().unwrap().to_path_buf();
        assert_ne!(first, second);

        broker.stop().await;
        coordination.stop().await;
    }
}
