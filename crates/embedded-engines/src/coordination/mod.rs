//! Embedded coordination service.
//!
//! Brokers register themselves and store cluster metadata here. Besides
//! metadata sessions, the service answers 4-letter diagnostic words so test
//! code and readiness probes can check on it without a client library.

mod client;
mod protocol;
mod tree;

pub use client::CoordinationSession;
pub use protocol::{CoordinationErrorCode, FourLetterWord, SessionRequest, SessionResponse};
pub use tree::{Znode, ZnodeTree};

use crate::{
    Error, Result,
    runtime::{EngineThread, Ready, ShutdownSignal},
    security::Credential,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Configuration of a coordination engine
#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    /// Client port on localhost
    pub port: u16,
    /// Directory holding the node snapshot
    pub data_dir: PathBuf,
    /// Basic time unit, reported by `conf`
    pub tick_time: Duration,
    /// Maximum concurrent metadata sessions; 0 means unlimited
    pub max_client_connections: usize,
    /// When set, metadata sessions must authenticate with one of these
    pub credentials: Option<Vec<Credential>>,
}

impl CoordinationConfig {
    /// Plain configuration with default tuning
    pub fn new(port: u16, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            port,
            data_dir: data_dir.into(),
            tick_time: Duration::from_millis(1000),
            max_client_connections: 0,
            credentials: None,
        }
    }

    /// Require session authentication with the given credentials
    pub fn with_credentials(mut self, credentials: Vec<Credential>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Location of the persistent node snapshot
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("version-2").join("snapshot.json")
    }
}

/// A running coordination engine
pub struct CoordinationEngine {
    addr: SocketAddr,
    thread: EngineThread,
}

impl CoordinationEngine {
    /// Bind the client port and start serving
    pub async fn start(config: CoordinationConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
        let thread = EngineThread::spawn(format!("coordination-{}", config.port), move |ready, shutdown| {
            serve(config, ready, shutdown)
        })
        .await?;

        info!("Coordination engine listening on {}", addr);
        Ok(Self { addr, thread })
    }

    /// Address the engine listens on
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections, drop all sessions and join the engine thread
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down coordination engine on {}", self.addr);
        self.thread.shutdown().await
    }
}

struct CoordinationState {
    config: CoordinationConfig,
    tree: Mutex<ZnodeTree>,
    next_session: AtomicU64,
    sessions: AtomicUsize,
    received: AtomicU64,
    started_at: Instant,
}

async fn serve(config: CoordinationConfig, ready: Ready, mut shutdown: ShutdownSignal) {
    let tree = match ZnodeTree::open(config.snapshot_path()) {
        Ok(tree) => tree,
        Err(e) => return ready.fail(e.into()),
    };

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

    let state = Arc::new(CoordinationState {
        config,
        tree: Mutex::new(tree),
        next_session: AtomicU64::new(1),
        sessions: AtomicUsize::new(0),
        received: AtomicU64::new(0),
        started_at: Instant::now(),
    });
    ready.ok();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Coordination connection from {}", peer);
                    let state = state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, state).await {
                            debug!("Coordination connection from {} ended: {}", peer, e);
                        }
                    });
                }
                Err(e) => warn!("Failed to accept coordination connection: {}", e),
            }
        }
    }

    debug!("Coordination engine on {} stopped accepting", addr);
}

async fn handle_connection(mut stream: TcpStream, state: Arc<CoordinationState>) -> Result<()> {
    let mut opening = [0u8; 4];
    if stream.read_exact(&mut opening).await.is_err() {
        return Ok(());
    }
    state.received.fetch_add(1, Ordering::Relaxed);

    if let Some(word) = FourLetterWord::parse(&opening) {
        let response = four_letter_response(word, &state).await;
        stream.write_all(response.as_bytes()).await?;
        stream.shutdown().await?;
        return Ok(());
    }

    if opening[0] != b'{' {
        debug!(
            "Unknown command {:?}, closing connection",
            String::from_utf8_lossy(&opening)
        );
        return Ok(());
    }

    let limit = state.config.max_client_connections;
    if limit > 0 && state.sessions.load(Ordering::SeqCst) >= limit {
        warn!("Too many coordination sessions (limit {}), rejecting", limit);
        return Ok(());
    }

    let session = state.next_session.fetch_add(1, Ordering::SeqCst);
    state.sessions.fetch_add(1, Ordering::SeqCst);
    let result = run_session(stream, &opening, session, &state).await;
    state.sessions.fetch_sub(1, Ordering::SeqCst);

    let expired = state.tree.lock().await.expire_session(session);
    if !expired.is_empty() {
        debug!("Session 0x{:x} closed, removed ephemerals {:?}", session, expired);
    }
    result
}

async fn run_session(
    stream: TcpStream,
    opening: &[u8],
    session: u64,
    state: &CoordinationState,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(opening.chain(reader)).lines();
    let mut authenticated = state.config.credentials.is_none();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        state.received.fetch_add(1, Ordering::Relaxed);

        let response = match serde_json::from_str::<SessionRequest>(&line) {
            Ok(SessionRequest::Auth { username, password }) => {
                let accepted = state.config.credentials.as_deref().unwrap_or_default();
                if state.config.credentials.is_none()
                    || Credential::accepts(accepted, &username, &password)
                {
                    authenticated = true;
                    SessionResponse::Ok
                } else {
                    warn!("Session 0x{:x} failed authentication as {}", session, username);
                    SessionResponse::error(CoordinationErrorCode::AuthFailed, username)
                }
            }
            Ok(_) if !authenticated => SessionResponse::error(
                CoordinationErrorCode::NotAuthenticated,
                "session must authenticate first",
            ),
            Ok(request) => apply(request, session, &state.tree).await,
            Err(e) => SessionResponse::error(CoordinationErrorCode::BadRequest, e.to_string()),
        };

        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
    }

    Ok(())
}

async fn apply(request: SessionRequest, session: u64, tree: &Mutex<ZnodeTree>) -> SessionResponse {
    let mut tree = tree.lock().await;

    let outcome = match &request {
        SessionRequest::Create {
            path,
            data,
            ephemeral,
        } => tree
            .create(path, data.clone(), ephemeral.then_some(session))
            .map(|_| SessionResponse::Ok),
        SessionRequest::Get { path } => tree.get(path).map(|node| SessionResponse::Data {
            data: node.data.clone(),
            version: node.version,
        }),
        SessionRequest::Set { path, data } => {
            tree.set(path, data.clone()).map(|_| SessionResponse::Ok)
        }
        SessionRequest::Delete { path } => tree.delete(path).map(|_| SessionResponse::Ok),
        SessionRequest::Children { path } => tree
            .children(path)
            .map(|children| SessionResponse::Children { children }),
        SessionRequest::Exists { path } => {
            tree.exists(path).map(|exists| SessionResponse::Exists { exists })
        }
        SessionRequest::Auth { .. } => Ok(SessionResponse::Ok),
    };

    outcome.unwrap_or_else(|code| SessionResponse::error(code, request_path(&request)))
}

fn request_path(request: &SessionRequest) -> String {
    match request {
        SessionRequest::Create { path, .. }
        | SessionRequest::Get { path }
        | SessionRequest::Set { path, .. }
        | SessionRequest::Delete { path }
        | SessionRequest::Children { path }
        | SessionRequest::Exists { path } => path.clone(),
        SessionRequest::Auth { username, .. } => username.clone(),
    }
}

async fn four_letter_response(word: FourLetterWord, state: &CoordinationState) -> String {
    let tree = state.tree.lock().await;
    let received = state.received.load(Ordering::Relaxed);
    let sessions = state.sessions.load(Ordering::SeqCst);
    let version = concat!("embedded-engines ", env!("CARGO_PKG_VERSION"));

    let server_stats = format!(
        "Zookeeper version: {}\n\
         Latency min/avg/max: 0/0/0\n\
         Received: {}\n\
         Sent: {}\n\
         Connections: {}\n\
         Outstanding: 0\n\
         Zxid: 0x{:x}\n\
         Mode: standalone\n\
         Node count: {}\n",
        version,
        received,
        received,
        sessions,
        tree.zxid(),
        tree.len()
    );

    match word {
        FourLetterWord::Ruok => "imok".to_string(),
        FourLetterWord::Reqs => String::new(),
        FourLetterWord::Isro => "rw".to_string(),
        FourLetterWord::Srvr => server_stats,
        FourLetterWord::Stat => format!("Clients:\n /127.0.0.1[{}]\n\n{}", sessions, server_stats),
        FourLetterWord::Conf => format!(
            "clientPort={}\n\
             dataDir={}\n\
             tickTime={}\n\
             maxClientCnxns={}\n\
             serverId=0\n",
            state.config.port,
            state.config.data_dir.display(),
            state.config.tick_time.as_millis(),
            state.config.max_client_connections
        ),
        FourLetterWord::Mntr => format!(
            "zk_version\t{}\n\
             zk_avg_latency\t0\n\
             zk_packets_received\t{}\n\
             zk_num_alive_connections\t{}\n\
             zk_outstanding_requests\t0\n\
             zk_server_state\tstandalone\n\
             zk_znode_count\t{}\n\
             zk_ephemerals_count\t{}\n\
             zk_uptime\t{}\n",
            version,
            received,
            sessions,
            tree.len(),
            tree.ephemeral_count(),
            state.started_at.elapsed().as_millis()
        ),
        FourLetterWord::Dump => {
            let by_session = tree.ephemerals_by_session();
            let mut dump = format!(
                "SessionTracker dump:\nSession Sets ({}):\nephemeral nodes dump:\nSessions with Ephemerals ({}):\n",
                sessions,
                by_session.len()
            );
            for (session, paths) in by_session {
                dump.push_str(&format!("0x{:x}:\n", session));
                for path in paths {
                    dump.push_str(&format!("\t{}\n", path));
                }
            }
            dump
        }
        FourLetterWord::Envi => format!(
            "Environment:\n\
             zookeeper.version={}\n\
             host.name=localhost\n\
             os.name={}\n\
             os.arch={}\n",
            version,
            std::env::consts::OS,
            std::env::consts::ARCH
        ),
    }
}
