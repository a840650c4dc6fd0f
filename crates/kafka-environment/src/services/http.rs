//! HTTP services layered on the broker set.

use super::{HOST, ManagedService, ServiceStatus, status_of};
use crate::{Result, SecurityContext};
use async_trait::async_trait;
use embedded_engines::{
    RestGatewayConfig, RestGatewayEngine, SchemaRegistryConfig, SchemaRegistryEngine,
    StreamQueryConfig, StreamQueryEngine,
};
use std::path::PathBuf;
use tracing::{info, warn};

fn http_url(port: u16) -> String {
    format!("http://{}:{}", HOST, port)
}

/// Schema registry backed by the broker set
pub struct SchemaRegistryService {
    port: u16,
    brokers_url: String,
    security: SecurityContext,
    engine: Option<SchemaRegistryEngine>,
}

impl SchemaRegistryService {
    /// Registry on `port` for the brokers at `brokers_url`
    pub fn new(port: u16, brokers_url: impl Into<String>, security: SecurityContext) -> Self {
        Self {
            port,
            brokers_url: brokers_url.into(),
            security,
            engine: None,
        }
    }
}

#[async_trait]
impl ManagedService for SchemaRegistryService {
    fn name(&self) -> &str {
        "schema-registry"
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn url(&self) -> String {
        http_url(self.port)
    }

    fn status(&self) -> ServiceStatus {
        status_of(&self.engine)
    }

    async fn start(&mut self) -> Result<()> {
        if self.engine.is_some() {
            return Ok(());
        }

        let mut config = SchemaRegistryConfig::new(self.port, self.brokers_url.clone());
        if let Some(credential) = self.security.client_credential() {
            config = config.with_credential(credential);
        }
        self.engine = Some(SchemaRegistryEngine::start(config).await?);
        info!("Schema registry running at {}", self.url());
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(engine) = self.engine.take() {
            if let Err(e) = engine.shutdown().await {
                warn!("Schema registry shutdown failed: {}", e);
            }
        }
    }
}

/// REST gateway over the broker set
pub struct RestGatewayService {
    port: u16,
    brokers_url: String,
    security: SecurityContext,
    engine: Option<RestGatewayEngine>,
}

impl RestGatewayService {
    /// Gateway on `port` for the brokers at `brokers_url`
    pub fn new(port: u16, brokers_url: impl Into<String>, security: SecurityContext) -> Self {
        Self {
            port,
            brokers_url: brokers_url.into(),
            security,
            engine: None,
        }
    }
}

#[async_trait]
impl ManagedService for RestGatewayService {
    fn name(&self) -> &str {
        "rest-gateway"
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn url(&self) -> String {
        http_url(self.port)
    }

    fn status(&self) -> ServiceStatus {
        status_of(&self.engine)
    }

    async fn start(&mut self) -> Result<()> {
        if self.engine.is_some() {
            return Ok(());
        }

        let mut config = RestGatewayConfig::new(self.port, self.brokers_url.clone());
        if let Some(credential) = self.security.client_credential() {
            config = config.with_credential(credential);
        }
        self.engine = Some(RestGatewayEngine::start(config).await?);
        info!("REST gateway running at {}", self.url());
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(engine) = self.engine.take() {
            if let Err(e) = engine.shutdown().await {
                warn!("REST gateway shutdown failed: {}", e);
            }
        }
    }
}

/// Stream-query server over the broker set
pub struct StreamQueryService {
    port: u16,
    brokers_url: String,
    install_dir: PathBuf,
    security: SecurityContext,
    engine: Option<StreamQueryEngine>,
}

impl StreamQueryService {
    /// Server on `port` for the brokers at `brokers_url`, keeping state in `install_dir`
    pub fn new(
        port: u16,
        brokers_url: impl Into<String>,
        install_dir: PathBuf,
        security: SecurityContext,
    ) -> Self {
        Self {
            port,
            brokers_url: brokers_url.into(),
            install_dir,
            security,
            engine: None,
        }
    }
}

#[async_trait]
impl ManagedService for StreamQueryService {
    fn name(&self) -> &str {
        "stream-query"
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn url(&self) -> String {
        http_url(self.port)
    }

    fn status(&self) -> ServiceStatus {
        status_of(&self.engine)
    }

    async fn start(&mut self) -> Result<()> {
        if self.engine.is_some() {
            return Ok(());
        }

        let mut config =
            StreamQueryConfig::new(self.port, self.brokers_url.clone(), self.install_dir.clone());
        if let Some(credential) = self.security.client_credential() {
            config = config.with_credential(credential);
        }
        self.engine = Some(StreamQueryEngine::start(config).await?);
        info!("Stream-query server running at {}", self.url());
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(engine) = self.engine.take() {
            if let Err(e) = engine.shutdown().await {
                warn!("Stream-query server shutdown failed: {}", e);
            }
        }
    }
}
