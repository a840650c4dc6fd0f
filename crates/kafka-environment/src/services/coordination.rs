//! Coordination service and its 4-letter command channel.

use super::{HOST, ManagedService, ServiceStatus, status_of};
use crate::{Limits, Result, SecurityContext};
use async_trait::async_trait;
use embedded_engines::{CoordinationConfig, CoordinationEngine};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Returned by [`send_command`] when the service cannot be reached
pub const FAILED_COMMAND: &str = "4LEXCEPTION";

/// Outcome of the last readiness poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// `ruok` was answered with `imok`
    Ready,
    /// The retry budget ran out; the service was marked running anyway
    TimedOut {
        /// Probes sent
        attempts: u32,
    },
}

/// Send a 4-letter command over a fresh connection and return the raw answer.
///
/// Each answer line is returned with a trailing `\n`. Any connection or IO
/// failure, including the timeout, yields [`FAILED_COMMAND`].
pub async fn send_command(host: &str, port: u16, command: &str, timeout: Duration) -> String {
    let exchange = async {
        let mut stream = TcpStream::connect((host, port)).await?;
        stream.write_all(command.as_bytes()).await?;
        stream.flush().await?;

        let mut lines = BufReader::new(stream).lines();
        let mut response = String::new();
        while let Some(line) = lines.next_line().await? {
            response.push_str(&line);
            response.push('\n');
        }
        Ok::<_, std::io::Error>(response)
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            debug!("Command {} to {}:{} failed: {}", command, host, port, e);
            FAILED_COMMAND.to_string()
        }
        Err(_) => {
            debug!("Command {} to {}:{} timed out", command, host, port);
            FAILED_COMMAND.to_string()
        }
    }
}

/// The coordination service brokers register with
pub struct CoordinationService {
    port: u16,
    data_dir: PathBuf,
    limits: Limits,
    security: SecurityContext,
    readiness: Option<Readiness>,
    engine: Option<CoordinationEngine>,
}

impl CoordinationService {
    /// Service on `port` keeping its snapshot under `data_dir`
    pub fn new(port: u16, data_dir: PathBuf, limits: Limits, security: SecurityContext) -> Self {
        Self {
            port,
            data_dir,
            limits,
            security,
            readiness: None,
            engine: None,
        }
    }

    /// Result of the most recent readiness poll
    pub fn readiness(&self) -> Option<Readiness> {
        self.readiness
    }

    /// Send a 4-letter command to this service
    pub async fn command(&self, command: &str) -> String {
        send_command(HOST, self.port, command, self.limits.command_timeout()).await
    }

    /// Poll `ruok` on `port` until it answers `imok` or the retries run out.
    ///
    /// The outcome is recorded; a timeout is logged but never fails the service.
    pub(crate) async fn await_ready(&mut self, port: u16) -> Readiness {
        let retries = self.limits.readiness_retries;
        let mut readiness = Readiness::TimedOut { attempts: retries };
        for attempt in 1..=retries {
            let answer = send_command(HOST, port, "ruok", self.limits.command_timeout()).await;
            if answer == "imok\n" {
                debug!("Coordination service ready after {} probe(s)", attempt);
                readiness = Readiness::Ready;
                break;
            }
            tokio::time::sleep(self.limits.readiness_interval()).await;
        }

        if let Readiness::TimedOut { attempts } = readiness {
            warn!(
                "Coordination service on port {} did not answer ruok after {} probes, marking it running anyway",
                port, attempts
            );
        }
        self.readiness = Some(readiness);
        readiness
    }
}

#[async_trait]
impl ManagedService for CoordinationService {
    fn name(&self) -> &str {
        "coordination"
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn url(&self) -> String {
        format!("{}:{}", HOST, self.port)
    }

    fn status(&self) -> ServiceStatus {
        status_of(&self.engine)
    }

    async fn start(&mut self) -> Result<()> {
        if self.engine.is_some() {
            return Ok(());
        }

        let mut config = CoordinationConfig::new(self.port, self.data_dir.clone());
        if let Some(credentials) = self.security.coordination_credentials() {
            config = config.with_credentials(credentials);
        }
        self.engine = Some(CoordinationEngine::start(config).await?);

        self.await_ready(self.port).await;

        info!("Coordination service running at {}", self.url());
        Ok(())
    }

    async fn stop(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };

        if let Err(e) = engine.shutdown().await {
            warn!("Coordination service shutdown failed: {}", e);
        }
        info!("Coordination service on port {} stopped", self.port);
    }
}
