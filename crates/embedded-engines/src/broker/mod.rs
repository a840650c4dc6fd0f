//! Embedded broker nodes.
//!
//! A broker registers itself as an ephemeral node with the coordination
//! service and keeps all topic metadata there, so any broker of a cluster can
//! answer admin requests about every topic. Clients talk to a broker through
//! [`AdminClient`] using a line-delimited JSON admin protocol.

mod client;
mod handler;
mod protocol;

pub use client::AdminClient;
pub use protocol::{
    AdminErrorCode, AdminRequest, AdminResponse, BrokerNode, ClusterDescription, NewTopic,
    PartitionInfo, TopicDescription,
};

use crate::{
    Error, Result,
    coordination::CoordinationSession,
    runtime::{EngineThread, Ready, ShutdownSignal},
    security::Credential,
};
use handler::{BROKER_IDS, BROKER_TOPICS, CLUSTER_ID, TOPIC_CONFIGS, TopicDefaults};
use protocol::BrokerRegistration;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// SASL settings of a secured broker
#[derive(Debug, Clone)]
pub struct BrokerSecurity {
    /// Credential the broker presents to the coordination service
    pub inter_broker: Credential,
    /// Client credentials accepted on the listener
    pub users: Vec<Credential>,
}

impl BrokerSecurity {
    fn accepts(&self, username: &str, password: &str) -> bool {
        Credential::accepts(&self.users, username, password)
            || Credential::accepts(std::slice::from_ref(&self.inter_broker), username, password)
    }
}

/// Configuration of a broker node
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker id, unique within the cluster
    pub broker_id: u32,
    /// Listener port on localhost
    pub port: u16,
    /// Coordination service `host:port`
    pub coordination_connect: String,
    /// Working directory for logs and `meta.properties`
    pub log_dir: PathBuf,
    /// Partition count for topics created without one
    pub num_partitions: u32,
    /// Replication factor for topics created without one
    pub default_replication_factor: u16,
    /// How long to wait for the coordination service on start
    pub coordination_timeout: Duration,
    /// SASL settings; plaintext when absent
    pub security: Option<BrokerSecurity>,
}

impl BrokerConfig {
    /// Plaintext broker with single-partition, single-replica defaults
    pub fn new(
        broker_id: u32,
        port: u16,
        coordination_connect: impl Into<String>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            broker_id,
            port,
            coordination_connect: coordination_connect.into(),
            log_dir: log_dir.into(),
            num_partitions: 1,
            default_replication_factor: 1,
            coordination_timeout: Duration::from_secs(10),
            security: None,
        }
    }

    /// Enable SASL on the listener
    pub fn with_security(mut self, security: BrokerSecurity) -> Self {
        self.security = Some(security);
        self
    }

    /// Listener protocol name
    pub fn protocol(&self) -> &'static str {
        if self.security.is_some() {
            "SASL_PLAINTEXT"
        } else {
            "PLAINTEXT"
        }
    }

    /// Advertised listener, e.g. `PLAINTEXT://localhost:9092`
    pub fn listener(&self) -> String {
        format!("{}://localhost:{}", self.protocol(), self.port)
    }

    fn topic_defaults(&self) -> TopicDefaults {
        TopicDefaults {
            partitions: self.num_partitions,
            replication_factor: self.default_replication_factor,
        }
    }
}

/// A running broker node
pub struct BrokerEngine {
    broker_id: u32,
    addr: SocketAddr,
    thread: EngineThread,
}

impl BrokerEngine {
    /// Bind the listener, register with the coordination service and start serving
    pub async fn start(config: BrokerConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.log_dir).await?;

        let broker_id = config.broker_id;
        let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
        let thread = EngineThread::spawn(format!("broker-{}", broker_id), move |ready, shutdown| {
            serve(config, ready, shutdown)
        })
        .await?;

        info!("Broker {} listening on {}", broker_id, addr);
        Ok(Self {
            broker_id,
            addr,
            thread,
        })
    }

    /// Broker id
    pub fn broker_id(&self) -> u32 {
        self.broker_id
    }

    /// Address the broker listens on
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Deregister and stop the broker
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down broker {}", self.broker_id);
        self.thread.shutdown().await
    }
}

struct BrokerState {
    config: BrokerConfig,
    session: Mutex<CoordinationSession>,
}

async fn serve(config: BrokerConfig, ready: Ready, mut shutdown: ShutdownSignal) {
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(source) => {
            return ready.fail(Error::Bind {
                addr: addr.to_string(),
                source,
            });
        }
    };

    let session = match register(&config).await {
        Ok(session) => session,
        Err(e) => return ready.fail(e),
    };

    let state = Arc::new(BrokerState {
        config,
        session: Mutex::new(session),
    });
    ready.ok();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Broker {} connection from {}", state.config.broker_id, peer);
                    let state = state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, state).await {
                            debug!("Admin connection from {} ended: {}", peer, e);
                        }
                    });
                }
                Err(e) => warn!("Failed to accept admin connection: {}", e),
            }
        }
    }

    deregister(&state).await;
}

/// Open the metadata session, seed cluster nodes and register the broker
async fn register(config: &BrokerConfig) -> Result<CoordinationSession> {
    write_meta_properties(config).await?;

    let mut session =
        CoordinationSession::connect(&config.coordination_connect, config.coordination_timeout)
            .await?;
    if let Some(security) = &config.security {
        session.authenticate(&security.inter_broker).await?;
    }

    for path in [BROKER_IDS, BROKER_TOPICS, TOPIC_CONFIGS] {
        session.create_if_absent(path, "").await?;
    }
    if session
        .create_if_absent(CLUSTER_ID, &uuid::Uuid::new_v4().to_string())
        .await?
    {
        debug!("Broker {} initialised cluster metadata", config.broker_id);
    }

    let registration = BrokerRegistration {
        id: config.broker_id,
        host: "localhost".to_string(),
        port: config.port,
        endpoints: vec![config.listener()],
        timestamp: chrono::Utc::now(),
    };
    let path = format!("{}/{}", BROKER_IDS, config.broker_id);
    session
        .create(&path, &serde_json::to_string(&registration)?, true)
        .await
        .map_err(|e| match e {
            Error::Coordination {
                code: crate::CoordinationErrorCode::NodeExists,
                ..
            } => Error::Runtime(format!(
                "broker id {} is already registered",
                config.broker_id
            )),
            other => other,
        })?;

    Ok(session)
}

async fn write_meta_properties(config: &BrokerConfig) -> Result<()> {
    let contents = format!(
        "version=0\nbroker.id={}\nlisteners={}\nzookeeper.connect={}\n",
        config.broker_id,
        config.listener(),
        config.coordination_connect
    );
    tokio::fs::write(config.log_dir.join("meta.properties"), contents).await?;
    Ok(())
}

async fn deregister(state: &BrokerState) {
    let path = format!("{}/{}", BROKER_IDS, state.config.broker_id);
    let mut session = state.session.lock().await;

    // The coordination service may already be gone during teardown
    if let Err(e) = session.delete(&path).await {
        debug!(
            "Broker {} could not deregister: {}",
            state.config.broker_id, e
        );
    }
    info!("Broker {} stopped", state.config.broker_id);
}

async fn handle_connection(stream: TcpStream, state: Arc<BrokerState>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut authenticated = state.config.security.is_none();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<AdminRequest>(&line) {
            Ok(AdminRequest::Authenticate { username, password }) => {
                match &state.config.security {
                    Some(security) if !security.accepts(&username, &password) => {
                        warn!(
                            "Broker {} rejected credentials for {}",
                            state.config.broker_id, username
                        );
                        AdminResponse::error(
                            AdminErrorCode::AuthenticationFailed,
                            format!("Authentication failed for user {}", username),
                        )
                    }
                    _ => {
                        authenticated = true;
                        AdminResponse::Authenticated
                    }
                }
            }
            Ok(_) if !authenticated => AdminResponse::error(
                AdminErrorCode::AuthenticationFailed,
                "SASL authentication required",
            ),
            Ok(request) => {
                let mut session = state.session.lock().await;
                handler::handle(request, &mut session, state.config.topic_defaults()).await
            }
            Err(e) => AdminResponse::error(AdminErrorCode::InvalidRequest, e.to_string()),
        };

        if let AdminResponse::Error {
            code: AdminErrorCode::CoordinationError,
            message,
        } = &response
        {
            error!(
                "Broker {} lost the coordination service: {}",
                state.config.broker_id, message
            );
        }

        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
    }

    Ok(())
}
