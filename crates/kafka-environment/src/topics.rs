//! Topic provisioning.

use crate::{AdminClient, Error, NewTopic, Result, TopicSpec};
use embedded_engines::AdminErrorCode;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

/// Creates requested topics on a broker set and waits until they are listed.
///
/// Partition count and replication factor default to the broker count.
pub struct TopicProvisioner {
    admin: AdminClient,
    broker_count: usize,
    confirm_retries: u32,
    confirm_interval: Duration,
}

impl TopicProvisioner {
    /// Provisioner for a cluster of `broker_count` brokers
    pub fn new(admin: AdminClient, broker_count: usize) -> Self {
        Self {
            admin,
            broker_count,
            confirm_retries: 40,
            confirm_interval: Duration::from_millis(25),
        }
    }

    /// Tune the confirmation poll
    pub fn with_confirmation(mut self, retries: u32, interval: Duration) -> Self {
        self.confirm_retries = retries;
        self.confirm_interval = interval;
        self
    }

    /// Create every topic that does not exist yet
    pub async fn provision(&self, topics: &[TopicSpec]) -> Result<()> {
        if self.broker_count == 0 || topics.is_empty() {
            return Ok(());
        }

        let default_count = self.broker_count as u32;
        for spec in topics {
            let mut topic = NewTopic::new(spec.name.clone())
                .partitions(spec.partitions.unwrap_or(default_count))
                .replication_factor(self.broker_count as u16);
            topic.configs = spec.configs.clone();

            match self.admin.create_topic(topic).await {
                Ok(()) => debug!("Requested topic {}", spec.name),
                Err(embedded_engines::Error::Admin {
                    code: AdminErrorCode::TopicAlreadyExists,
                    ..
                }) => debug!("Topic {} already exists", spec.name),
                Err(e) => return Err(e.into()),
            }
        }

        self.confirm(topics).await?;
        info!("Provisioned {} topic(s)", topics.len());
        Ok(())
    }

    async fn confirm(&self, topics: &[TopicSpec]) -> Result<()> {
        let wanted: BTreeSet<&str> = topics.iter().map(|t| t.name.as_str()).collect();

        for _ in 0..self.confirm_retries {
            let listed = self.admin.list_topics().await?;
            let missing: Vec<&str> = wanted
                .iter()
                .copied()
                .filter(|name| !listed.iter().any(|l| l == name))
                .collect();
            if missing.is_empty() {
                return Ok(());
            }
            debug!("Waiting for topics {:?}", missing);
            tokio::time::sleep(self.confirm_interval).await;
        }

        Err(Error::TopicProvisioning(format!(
            "topics {:?} not listed after {} checks",
            wanted, self.confirm_retries
        )))
    }
}
