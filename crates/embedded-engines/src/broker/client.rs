//! Admin client for embedded brokers.

use super::protocol::{
    AdminRequest, AdminResponse, ClusterDescription, NewTopic, TopicDescription,
};
use crate::{Error, Result, security::Credential, strip_scheme};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

/// Admin client for a broker cluster.
///
/// Every call opens a fresh connection to the first reachable bootstrap
/// server, so the client stays usable while individual brokers stop and
/// start.
#[derive(Debug, Clone)]
pub struct AdminClient {
    bootstrap: Vec<String>,
    credential: Option<Credential>,
    timeout: Duration,
}

impl AdminClient {
    /// Client for a comma separated bootstrap list, with or without scheme
    pub fn new(bootstrap_servers: &str) -> Result<Self> {
        let bootstrap: Vec<String> = bootstrap_servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| strip_scheme(s).to_string())
            .collect();

        if bootstrap.is_empty() {
            return Err(Error::InvalidAddress(format!(
                "no bootstrap servers in {:?}",
                bootstrap_servers
            )));
        }

        Ok(Self {
            bootstrap,
            credential: None,
            timeout: Duration::from_secs(10),
        })
    }

    /// Authenticate every connection with the given credential
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bootstrap servers as `host:port`
    pub fn bootstrap_servers(&self) -> &[String] {
        &self.bootstrap
    }

    /// Live brokers and controller
    pub async fn describe_cluster(&self) -> Result<ClusterDescription> {
        match self.call(AdminRequest::DescribeCluster).await? {
            AdminResponse::Cluster(cluster) => Ok(cluster),
            other => Err(into_error(other)),
        }
    }

    /// Number of live brokers
    pub async fn number_of_brokers(&self) -> Result<usize> {
        Ok(self.describe_cluster().await?.nodes.len())
    }

    /// Topic names, sorted
    pub async fn list_topics(&self) -> Result<Vec<String>> {
        match self.call(AdminRequest::ListTopics).await? {
            AdminResponse::Topics { names } => Ok(names),
            other => Err(into_error(other)),
        }
    }

    /// Create a topic
    pub async fn create_topic(&self, topic: NewTopic) -> Result<()> {
        match self.call(AdminRequest::CreateTopic(topic)).await? {
            AdminResponse::TopicCreated { .. } => Ok(()),
            other => Err(into_error(other)),
        }
    }

    /// Describe a topic
    pub async fn describe_topic(&self, name: &str) -> Result<TopicDescription> {
        let request = AdminRequest::DescribeTopic {
            name: name.to_string(),
        };
        match self.call(request).await? {
            AdminResponse::Topic(description) => Ok(description),
            other => Err(into_error(other)),
        }
    }

    /// Delete a topic
    pub async fn delete_topic(&self, name: &str) -> Result<()> {
        let request = AdminRequest::DeleteTopic {
            name: name.to_string(),
        };
        match self.call(request).await? {
            AdminResponse::TopicDeleted { .. } => Ok(()),
            other => Err(into_error(other)),
        }
    }

    async fn call(&self, request: AdminRequest) -> Result<AdminResponse> {
        let exchange = async {
            let mut connection = self.connect().await?;
            if let Some(credential) = &self.credential {
                let authenticate = AdminRequest::Authenticate {
                    username: credential.username.clone(),
                    password: credential.password.clone(),
                };
                match connection.exchange(&authenticate).await? {
                    AdminResponse::Authenticated => {}
                    other => return Err(into_error(other)),
                }
            }
            connection.exchange(&request).await
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                Error::Unavailable(format!(
                    "no broker in {:?} answered within {:?}",
                    self.bootstrap, self.timeout
                ))
            })?
    }

    async fn connect(&self) -> Result<Connection> {
        let mut last_error = None;
        for server in &self.bootstrap {
            match TcpStream::connect(server.as_str()).await {
                Ok(stream) => {
                    let (reader, writer) = stream.into_split();
                    return Ok(Connection {
                        lines: BufReader::new(reader).lines(),
                        writer,
                    });
                }
                Err(e) => {
                    debug!("Bootstrap server {} unreachable: {}", server, e);
                    last_error = Some(e);
                }
            }
        }

        Err(Error::Unavailable(format!(
            "no reachable broker in {:?}: {}",
            self.bootstrap,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

struct Connection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn exchange(&mut self, request: &AdminRequest) -> Result<AdminResponse> {
        let mut encoded = serde_json::to_string(request)?;
        encoded.push('\n');
        self.writer.write_all(encoded.as_bytes()).await?;

        let line = self
            .lines
            .next_line()
            .await?
            .ok_or_else(|| Error::Unavailable("broker closed the connection".to_string()))?;
        Ok(serde_json::from_str(&line)?)
    }
}

fn into_error(response: AdminResponse) -> Error {
    match response {
        AdminResponse::Error { code, message } => Error::Admin { code, message },
        other => Error::UnexpectedResponse(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_parsing() {
        let client =
            AdminClient::new("PLAINTEXT://localhost:9092, SASL_PLAINTEXT://localhost:9093").unwrap();
        assert_eq!(
            client.bootstrap_servers(),
            &["localhost:9092".to_string(), "localhost:9093".to_string()]
        );

        assert!(matches!(
            AdminClient::new(" , "),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_cluster() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = AdminClient::new(&format!("localhost:{}", port))
            .unwrap()
            .with_timeout(Duration::from_secs(2));
        assert!(matches!(
            client.list_topics().await,
            Err(Error::Unavailable(_))
        ));
    }
}
