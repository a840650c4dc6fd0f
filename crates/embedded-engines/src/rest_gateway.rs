//! Embedded REST gateway exposing cluster metadata over HTTP.

use crate::{
    AdminClient, AdminErrorCode, Error, Result, http::ApiError, runtime::EngineThread,
    security::Credential,
};
use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

/// Configuration of a REST gateway engine
#[derive(Debug, Clone)]
pub struct RestGatewayConfig {
    /// HTTP port on localhost
    pub port: u16,
    /// Broker bootstrap servers
    pub bootstrap_servers: String,
    /// Credential for a secured cluster
    pub credential: Option<Credential>,
}

impl RestGatewayConfig {
    /// Gateway for a plaintext cluster
    pub fn new(port: u16, bootstrap_servers: impl Into<String>) -> Self {
        Self {
            port,
            bootstrap_servers: bootstrap_servers.into(),
            credential: None,
        }
    }

    /// Authenticate against a secured cluster
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }
}

/// A running REST gateway
pub struct RestGatewayEngine {
    port: u16,
    thread: EngineThread,
}

impl RestGatewayEngine {
    /// Start serving
    pub async fn start(config: RestGatewayConfig) -> Result<Self> {
        let mut admin = AdminClient::new(&config.bootstrap_servers)?;
        if let Some(credential) = config.credential {
            admin = admin.with_credential(credential);
        }

        let router = Router::new()
            .route("/topics", get(list_topics))
            .route("/topics/{name}", get(describe_topic))
            .route("/brokers", get(list_brokers))
            .with_state(Arc::new(admin));

        let thread =
            crate::http::serve_router(format!("rest-gateway-{}", config.port), config.port, router)
                .await?;

        info!("REST gateway listening on port {}", config.port);
        Ok(Self {
            port: config.port,
            thread,
        })
    }

    /// HTTP port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop serving
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down REST gateway on port {}", self.port);
        self.thread.shutdown().await
    }
}

type Shared = Arc<AdminClient>;

async fn list_topics(State(admin): State<Shared>) -> std::result::Result<Json<Vec<String>>, ApiError> {
    Ok(Json(admin.list_topics().await?))
}

async fn describe_topic(
    State(admin): State<Shared>,
    Path(name): Path<String>,
) -> std::result::Result<Json<Value>, ApiError> {
    let topic = admin.describe_topic(&name).await.map_err(|e| match e {
        Error::Admin {
            code: AdminErrorCode::UnknownTopic,
            ..
        } => ApiError::new(StatusCode::NOT_FOUND, 40401, "Topic not found."),
        other => other.into(),
    })?;

    let partitions: Vec<Value> = topic
        .partitions
        .iter()
        .map(|p| {
            let replicas: Vec<Value> = p
                .replicas
                .iter()
                .map(|broker| {
                    json!({
                        "broker": broker,
                        "leader": p.leader == Some(*broker),
                        "in_sync": p.isr.contains(broker),
                    })
                })
                .collect();
            json!({
                "partition": p.partition,
                "leader": p.leader,
                "replicas": replicas,
            })
        })
        .collect();

    Ok(Json(json!({
        "name": topic.name,
        "configs": topic.configs,
        "partitions": partitions,
    })))
}

async fn list_brokers(State(admin): State<Shared>) -> std::result::Result<Json<Value>, ApiError> {
    let cluster = admin.describe_cluster().await?;
    let ids: Vec<u32> = cluster.nodes.iter().map(|n| n.id).collect();
    Ok(Json(json!({ "brokers": ids })))
}
