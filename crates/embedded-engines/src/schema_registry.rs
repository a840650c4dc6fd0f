//! Embedded schema registry.
//!
//! Speaks the subset of the Confluent schema-registry REST API that test
//! clients need: global compatibility config, subjects, versions and schema
//! lookup by id. Schemas live in memory for the lifetime of the engine; the
//! `_schemas` topic is created on the cluster so clients that look for it
//! find it.

use crate::{
    AdminClient, AdminErrorCode, Error, NewTopic, Result, http::ApiError, runtime::EngineThread,
    security::Credential,
};
use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Topic holding registered schemas
pub const SCHEMAS_TOPIC: &str = "_schemas";

const COMPATIBILITY_LEVELS: [&str; 7] = [
    "NONE",
    "BACKWARD",
    "BACKWARD_TRANSITIVE",
    "FORWARD",
    "FORWARD_TRANSITIVE",
    "FULL",
    "FULL_TRANSITIVE",
];

/// Configuration of a schema registry engine
#[derive(Debug, Clone)]
pub struct SchemaRegistryConfig {
    /// HTTP port on localhost
    pub port: u16,
    /// Broker bootstrap servers
    pub bootstrap_servers: String,
    /// Credential for a secured cluster
    pub credential: Option<Credential>,
    /// Initial global compatibility level
    pub compatibility_level: String,
}

impl SchemaRegistryConfig {
    /// Registry with `BACKWARD` compatibility
    pub fn new(port: u16, bootstrap_servers: impl Into<String>) -> Self {
        Self {
            port,
            bootstrap_servers: bootstrap_servers.into(),
            credential: None,
            compatibility_level: "BACKWARD".to_string(),
        }
    }

    /// Authenticate against a secured cluster
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }
}

/// A running schema registry
pub struct SchemaRegistryEngine {
    port: u16,
    thread: EngineThread,
}

impl SchemaRegistryEngine {
    /// Create the schemas topic and start serving
    pub async fn start(config: SchemaRegistryConfig) -> Result<Self> {
        let mut admin = AdminClient::new(&config.bootstrap_servers)?;
        if let Some(credential) = &config.credential {
            admin = admin.with_credential(credential.clone());
        }

        match admin
            .create_topic(NewTopic::new(SCHEMAS_TOPIC).partitions(1).replication_factor(1))
            .await
        {
            Ok(()) => debug!("Created {} topic", SCHEMAS_TOPIC),
            Err(Error::Admin {
                code: AdminErrorCode::TopicAlreadyExists,
                ..
            }) => debug!("{} topic already exists", SCHEMAS_TOPIC),
            Err(e) => return Err(e),
        }

        let state = Arc::new(RegistryState {
            compatibility: Mutex::new(config.compatibility_level.clone()),
            store: Mutex::new(SchemaStore::default()),
        });
        let thread = crate::http::serve_router(
            format!("schema-registry-{}", config.port),
            config.port,
            router(state),
        )
        .await?;

        info!("Schema registry listening on port {}", config.port);
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
        info!("Shutting down schema registry on port {}", self.port);
        self.thread.shutdown().await
    }
}

struct RegistryState {
    compatibility: Mutex<String>,
    store: Mutex<SchemaStore>,
}

type Shared = Arc<RegistryState>;

fn router(state: Shared) -> Router {
    Router::new()
        .route("/config", get(get_config).put(put_config))
        .route("/subjects", get(list_subjects))
        .route("/subjects/{subject}", delete(delete_subject))
        .route(
            "/subjects/{subject}/versions",
            get(list_versions).post(register_schema),
        )
        .route("/subjects/{subject}/versions/{version}", get(get_version))
        .route("/schemas/ids/{id}", get(get_schema))
        .with_state(state)
}

/// Registered schemas and the subjects referring to them
#[derive(Debug, Default)]
struct SchemaStore {
    /// Schema text by id; ids start at 1
    schemas: Vec<String>,
    /// Schema ids per subject, oldest version first
    subjects: BTreeMap<String, Vec<u32>>,
}

impl SchemaStore {
    /// Register a schema under a subject, returning its id
    fn register(&mut self, subject: &str, schema: &str) -> u32 {
        let id = match self.schemas.iter().position(|s| s == schema) {
            Some(index) => index as u32 + 1,
            None => {
                self.schemas.push(schema.to_string());
                self.schemas.len() as u32
            }
        };

        let versions = self.subjects.entry(subject.to_string()).or_default();
        if !versions.contains(&id) {
            versions.push(id);
        }
        id
    }

    fn versions(&self, subject: &str) -> std::result::Result<&Vec<u32>, ApiError> {
        self.subjects
            .get(subject)
            .ok_or_else(|| subject_not_found(subject))
    }

    /// Resolve a version, `latest` or a 1-based number, to `(version, id)`
    fn version(&self, subject: &str, version: &str) -> std::result::Result<(usize, u32), ApiError> {
        let versions = self.versions(subject)?;
        let index = if version == "latest" {
            versions.len().checked_sub(1)
        } else {
            version
                .parse::<usize>()
                .ok()
                .and_then(|v| v.checked_sub(1))
                .filter(|index| *index < versions.len())
        };

        index
            .map(|index| (index + 1, versions[index]))
            .ok_or_else(|| {
                ApiError::new(
                    StatusCode::NOT_FOUND,
                    40402,
                    format!("Version {} not found.", version),
                )
            })
    }

    fn schema(&self, id: u32) -> Option<&String> {
        (id as usize)
            .checked_sub(1)
            .and_then(|index| self.schemas.get(index))
    }
}

fn subject_not_found(subject: &str) -> ApiError {
    ApiError::new(
        StatusCode::NOT_FOUND,
        40401,
        format!("Subject '{}' not found.", subject),
    )
}

async fn get_config(State(state): State<Shared>) -> Json<Value> {
    let level = state.compatibility.lock().await.clone();
    Json(json!({ "compatibilityLevel": level }))
}

#[derive(Debug, Deserialize)]
struct ConfigUpdate {
    compatibility: String,
}

async fn put_config(
    State(state): State<Shared>,
    Json(update): Json<ConfigUpdate>,
) -> std::result::Result<Json<Value>, ApiError> {
    let level = update.compatibility.to_uppercase();
    if !COMPATIBILITY_LEVELS.contains(&level.as_str()) {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            42203,
            format!("Invalid compatibility level {}", update.compatibility),
        ));
    }

    *state.compatibility.lock().await = level.clone();
    Ok(Json(json!({ "compatibility": level })))
}

async fn list_subjects(State(state): State<Shared>) -> Json<Vec<String>> {
    Json(state.store.lock().await.subjects.keys().cloned().collect())
}

async fn list_versions(
    State(state): State<Shared>,
    Path(subject): Path<String>,
) -> std::result::Result<Json<Vec<usize>>, ApiError> {
    let store = state.store.lock().await;
    let count = store.versions(&subject)?.len();
    Ok(Json((1..=count).collect()))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    schema: String,
}

async fn register_schema(
    State(state): State<Shared>,
    Path(subject): Path<String>,
    Json(request): Json<RegisterRequest>,
) -> std::result::Result<Json<Value>, ApiError> {
    if serde_json::from_str::<Value>(&request.schema).is_err() {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            42201,
            "Input schema is an invalid Avro schema",
        ));
    }

    let id = state.store.lock().await.register(&subject, &request.schema);
    debug!("Registered schema {} under subject {}", id, subject);
    Ok(Json(json!({ "id": id })))
}

async fn get_version(
    State(state): State<Shared>,
    Path((subject, version)): Path<(String, String)>,
) -> std::result::Result<Json<Value>, ApiError> {
    let store = state.store.lock().await;
    let (version, id) = store.version(&subject, &version)?;
    let schema = store
        .schema(id)
        .ok_or_else(|| ApiError::internal(format!("schema {} missing", id)))?;

    Ok(Json(json!({
        "subject": subject,
        "version": version,
        "id": id,
        "schema": schema,
    })))
}

async fn delete_subject(
    State(state): State<Shared>,
    Path(subject): Path<String>,
) -> std::result::Result<Json<Vec<usize>>, ApiError> {
    let mut store = state.store.lock().await;
    let removed = store
        .subjects
        .remove(&subject)
        .ok_or_else(|| subject_not_found(&subject))?;
    Ok(Json((1..=removed.len()).collect()))
}

async fn get_schema(
    State(state): State<Shared>,
    Path(id): Path<u32>,
) -> std::result::Result<Json<Value>, ApiError> {
    let store = state.store.lock().await;
    let schema = store.schema(id).ok_or_else(|| {
        ApiError::new(StatusCode::NOT_FOUND, 40403, format!("Schema {} not found", id))
    })?;
    Ok(Json(json!({ "schema": schema })))
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: &str = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"}]}"#;
    const ORDER: &str = r#"{"type":"record","name":"Order","fields":[]}"#;

    #[test]
    fn test_register_reuses_ids() {
        let mut store = SchemaStore::default();
        assert_eq!(store.register("users-value", USER), 1);
        assert_eq!(store.register("orders-value", ORDER), 2);
        assert_eq!(store.register("users-copy-value", USER), 1);
        assert_eq!(store.register("users-value", USER), 1);

        assert_eq!(store.subjects["users-value"], vec![1]);
        assert_eq!(store.schema(2).map(String::as_str), Some(ORDER));
        assert!(store.schema(0).is_none());
        assert!(store.schema(3).is_none());
    }

    #[test]
    fn test_version_lookup() {
        let mut store = SchemaStore::default();
        store.register("users-value", USER);
        store.register("users-value", ORDER);

        assert_eq!(store.version("users-value", "1").unwrap(), (1, 1));
        assert_eq!(store.version("users-value", "latest").unwrap(), (2, 2));
        assert_eq!(store.version("users-value", "3").unwrap_err().error_code, 40402);
        assert_eq!(store.version("users-value", "0").unwrap_err().error_code, 40402);
        assert_eq!(store.version("missing", "1").unwrap_err().error_code, 40401);
    }
}
