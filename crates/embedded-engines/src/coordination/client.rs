//! Metadata session client for the coordination service.

use super::protocol::{CoordinationErrorCode, SessionRequest, SessionResponse};
use crate::{Error, Result, security::Credential, strip_scheme};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

const CONNECT_BACKOFF: Duration = Duration::from_millis(50);

/// A metadata session with the coordination service.
///
/// Ephemeral nodes created through the session disappear when it is closed
/// or dropped.
pub struct CoordinationSession {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl CoordinationSession {
    /// Connect to `host:port`, retrying until `timeout` elapses
    pub async fn connect(connect: &str, timeout: Duration) -> Result<Self> {
        let addr = strip_scheme(connect).to_string();
        let deadline = Instant::now() + timeout;

        let stream = loop {
            match TcpStream::connect(&addr).await {
                Ok(stream) => break stream,
                Err(e) if Instant::now() < deadline => {
                    debug!("Coordination service at {} not reachable yet: {}", addr, e);
                    tokio::time::sleep(CONNECT_BACKOFF).await;
                }
                Err(e) => {
                    return Err(Error::Unavailable(format!(
                        "coordination service at {} unreachable after {:?}: {}",
                        addr, timeout, e
                    )));
                }
            }
        };

        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    /// Send one request and wait for its response
    pub async fn request(&mut self, request: &SessionRequest) -> Result<SessionResponse> {
        let mut encoded = serde_json::to_string(request)?;
        encoded.push('\n');
        self.writer.write_all(encoded.as_bytes()).await?;

        let line = self.lines.next_line().await?.ok_or_else(|| {
            Error::Unavailable("coordination service closed the session".to_string())
        })?;
        Ok(serde_json::from_str(&line)?)
    }

    /// Authenticate the session
    pub async fn authenticate(&mut self, credential: &Credential) -> Result<()> {
        let request = SessionRequest::Auth {
            username: credential.username.clone(),
            password: credential.password.clone(),
        };
        self.expect_ok(&request).await
    }

    /// Create a node
    pub async fn create(&mut self, path: &str, data: &str, ephemeral: bool) -> Result<()> {
        let request = SessionRequest::Create {
            path: path.to_string(),
            data: data.to_string(),
            ephemeral,
        };
        self.expect_ok(&request).await
    }

    /// Create a persistent node unless it exists; returns whether it was created
    pub async fn create_if_absent(&mut self, path: &str, data: &str) -> Result<bool> {
        match self.create(path, data, false).await {
            Ok(()) => Ok(true),
            Err(Error::Coordination {
                code: CoordinationErrorCode::NodeExists,
                ..
            }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read a node, `None` when it does not exist
    pub async fn get(&mut self, path: &str) -> Result<Option<String>> {
        let request = SessionRequest::Get {
            path: path.to_string(),
        };
        match self.request(&request).await? {
            SessionResponse::Data { data, .. } => Ok(Some(data)),
            SessionResponse::Error {
                code: CoordinationErrorCode::NoNode,
                ..
            } => Ok(None),
            other => Err(into_error(other)),
        }
    }

    /// Replace a node's payload
    pub async fn set(&mut self, path: &str, data: &str) -> Result<()> {
        let request = SessionRequest::Set {
            path: path.to_string(),
            data: data.to_string(),
        };
        self.expect_ok(&request).await
    }

    /// Delete a node
    pub async fn delete(&mut self, path: &str) -> Result<()> {
        let request = SessionRequest::Delete {
            path: path.to_string(),
        };
        self.expect_ok(&request).await
    }

    /// Children of a node; empty when the node does not exist
    pub async fn children(&mut self, path: &str) -> Result<Vec<String>> {
        let request = SessionRequest::Children {
            path: path.to_string(),
        };
        match self.request(&request).await? {
            SessionResponse::Children { children } => Ok(children),
            SessionResponse::Error {
                code: CoordinationErrorCode::NoNode,
                ..
            } => Ok(Vec::new()),
            other => Err(into_error(other)),
        }
    }

    /// Whether a node exists
    pub async fn exists(&mut self, path: &str) -> Result<bool> {
        let request = SessionRequest::Exists {
            path: path.to_string(),
        };
        match self.request(&request).await? {
            SessionResponse::Exists { exists } => Ok(exists),
            other => Err(into_error(other)),
        }
    }

    /// Close the session, expiring its ephemeral nodes
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    async fn expect_ok(&mut self, request: &SessionRequest) -> Result<()> {
        match self.request(request).await? {
            SessionResponse::Ok => Ok(()),
            other => Err(into_error(other)),
        }
    }
}

fn into_error(response: SessionResponse) -> Error {
    match response {
        SessionResponse::Error { code, message } => Error::Coordination { code, message },
        other => Error::UnexpectedResponse(format!("{:?}", other)),
    }
}
