//! Embedded stream-query server.
//!
//! Accepts a small statement language over `POST /ksql`: listing streams,
//! tables and topics, and creating or dropping streams and tables backed by
//! existing topics. Queries themselves are not executed.

mod statement;

pub use statement::{Listing, SourceKind, Statement};

use crate::{
    AdminClient, Result, http::ApiError, runtime::EngineThread, security::Credential,
};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Configuration of a stream-query engine
#[derive(Debug, Clone)]
pub struct StreamQueryConfig {
    /// HTTP port on localhost
    pub port: u16,
    /// Broker bootstrap servers
    pub bootstrap_servers: String,
    /// Credential for a secured cluster
    pub credential: Option<Credential>,
    /// Directory for the engine's state files
    pub install_dir: PathBuf,
    /// Service id reported by `/info`
    pub service_id: String,
}

impl StreamQueryConfig {
    /// Plain configuration
    pub fn new(port: u16, bootstrap_servers: impl Into<String>, install_dir: impl Into<PathBuf>) -> Self {
        Self {
            port,
            bootstrap_servers: bootstrap_servers.into(),
            credential: None,
            install_dir: install_dir.into(),
            service_id: "default_".to_string(),
        }
    }

    /// Authenticate against a secured cluster
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }
}

/// A running stream-query engine
pub struct StreamQueryEngine {
    port: u16,
    thread: EngineThread,
}

impl StreamQueryEngine {
    /// Check the cluster is reachable and start serving
    pub async fn start(config: StreamQueryConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.install_dir).await?;

        let mut admin = AdminClient::new(&config.bootstrap_servers)?;
        if let Some(credential) = &config.credential {
            admin = admin.with_credential(credential.clone());
        }
        let cluster = admin.describe_cluster().await?;
        debug!(
            "Stream-query engine attached to cluster {} with {} broker(s)",
            cluster.cluster_id,
            cluster.nodes.len()
        );

        let state = Arc::new(QueryState {
            admin,
            cluster_id: cluster.cluster_id,
            service_id: config.service_id.clone(),
            sources: Mutex::new(BTreeMap::new()),
            sequence: AtomicU64::new(0),
        });
        let router = Router::new()
            .route("/info", get(server_info))
            .route("/ksql", post(run_statements))
            .with_state(state);

        let thread =
            crate::http::serve_router(format!("stream-query-{}", config.port), config.port, router)
                .await?;

        info!("Stream-query engine listening on port {}", config.port);
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
        info!("Shutting down stream-query engine on port {}", self.port);
        self.thread.shutdown().await
    }
}

#[derive(Debug, Clone)]
struct Source {
    kind: SourceKind,
    topic: String,
    value_format: String,
}

struct QueryState {
    admin: AdminClient,
    cluster_id: String,
    service_id: String,
    sources: Mutex<BTreeMap<String, Source>>,
    sequence: AtomicU64,
}

type Shared = Arc<QueryState>;

async fn server_info(State(state): State<Shared>) -> Json<Value> {
    Json(json!({
        "KsqlServerInfo": {
            "version": env!("CARGO_PKG_VERSION"),
            "kafkaClusterId": state.cluster_id,
            "ksqlServiceId": state.service_id,
            "serverStatus": "RUNNING",
        }
    }))
}

#[derive(Debug, Deserialize)]
struct KsqlRequest {
    ksql: String,
}

async fn run_statements(
    State(state): State<Shared>,
    Json(request): Json<KsqlRequest>,
) -> std::result::Result<Json<Vec<Value>>, ApiError> {
    let mut entities = Vec::new();
    for text in statement::split(&request.ksql) {
        let statement_text = format!("{};", text);
        let statement = statement::parse(text)
            .map_err(|message| statement_error(&statement_text, message))?;
        entities.push(execute(&state, statement, &statement_text).await?);
    }
    Ok(Json(entities))
}

async fn execute(
    state: &QueryState,
    statement: Statement,
    statement_text: &str,
) -> std::result::Result<Value, ApiError> {
    match statement {
        Statement::List(Listing::Topics) => {
            let mut topics = Vec::new();
            for name in state.admin.list_topics().await? {
                let description = state.admin.describe_topic(&name).await?;
                let replica_info: Vec<usize> = description
                    .partitions
                    .iter()
                    .map(|p| p.replicas.len())
                    .collect();
                topics.push(json!({ "name": name, "replicaInfo": replica_info }));
            }
            Ok(json!({
                "@type": "kafka_topics",
                "statementText": statement_text,
                "topics": topics,
                "warnings": [],
            }))
        }
        Statement::List(listing) => {
            let kind = if listing == Listing::Tables {
                SourceKind::Table
            } else {
                SourceKind::Stream
            };
            let sources = state.sources.lock().await;
            let listed: Vec<Value> = sources
                .iter()
                .filter(|(_, source)| source.kind == kind)
                .map(|(name, source)| {
                    json!({
                        "type": kind.keyword(),
                        "name": name,
                        "topic": source.topic,
                        "valueFormat": source.value_format,
                    })
                })
                .collect();

            let field = match kind {
                SourceKind::Stream => "streams",
                SourceKind::Table => "tables",
            };
            let mut body = json!({
                "@type": field,
                "statementText": statement_text,
                "warnings": [],
            });
            body[field] = Value::Array(listed);
            Ok(body)
        }
        Statement::Create {
            kind,
            name,
            topic,
            value_format,
        } => {
            if !state.admin.list_topics().await?.contains(&topic) {
                return Err(statement_error(
                    statement_text,
                    format!("Kafka topic does not exist: {}", topic),
                ));
            }

            let mut sources = state.sources.lock().await;
            if let Some(existing) = sources.get(&name) {
                return Err(statement_error(
                    statement_text,
                    format!(
                        "Cannot add {} '{}': A {} with the same name already exists",
                        kind.keyword().to_lowercase(),
                        name,
                        existing.kind.keyword().to_lowercase()
                    ),
                ));
            }
            sources.insert(
                name.clone(),
                Source {
                    kind,
                    topic,
                    value_format,
                },
            );

            let message = match kind {
                SourceKind::Stream => "Stream created",
                SourceKind::Table => "Table created",
            };
            Ok(command_status(state, statement_text, kind, &name, "create", message))
        }
        Statement::Drop {
            kind,
            name,
            if_exists,
        } => {
            let mut sources = state.sources.lock().await;
            let message = match sources.get(&name) {
                Some(source) if source.kind == kind => {
                    let message =
                        format!("Source `{}` (topic: {}) was dropped.", name, source.topic);
                    sources.remove(&name);
                    message
                }
                _ if if_exists => format!("Source `{}` does not exist.", name),
                _ => {
                    return Err(statement_error(
                        statement_text,
                        format!("{} {} does not exist.", kind.keyword().to_lowercase(), name),
                    ));
                }
            };

            Ok(command_status(state, statement_text, kind, &name, "drop", &message))
        }
    }
}

fn command_status(
    state: &QueryState,
    statement_text: &str,
    kind: SourceKind,
    name: &str,
    action: &str,
    message: &str,
) -> Value {
    let sequence = state.sequence.fetch_add(1, Ordering::SeqCst) + 1;
    json!({
        "@type": "currentStatus",
        "statementText": statement_text,
        "commandId": format!("{}/{}/{}", kind.keyword().to_lowercase(), name, action),
        "commandStatus": {
            "status": "SUCCESS",
            "message": message,
        },
        "commandSequenceNumber": sequence,
        "warnings": [],
    })
}

fn statement_error(statement_text: &str, message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, 40001, message).for_statement(statement_text)
}
