//! Admin protocol spoken on a broker's listener.
//!
//! Newline-delimited JSON: one [`AdminRequest`] per line, answered by one
//! [`AdminResponse`] line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Admin request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AdminRequest {
    /// SASL/PLAIN style authentication
    Authenticate {
        /// User name
        username: String,
        /// Password
        password: String,
    },
    /// Live brokers and controller
    DescribeCluster,
    /// All topic names
    ListTopics,
    /// Create a topic
    CreateTopic(NewTopic),
    /// Partitions and configs of one topic
    DescribeTopic {
        /// Topic name
        name: String,
    },
    /// Remove a topic
    DeleteTopic {
        /// Topic name
        name: String,
    },
}

/// Admin response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AdminResponse {
    /// Authentication accepted
    Authenticated,
    /// Cluster description
    Cluster(ClusterDescription),
    /// Topic names, sorted
    Topics {
        /// Names
        names: Vec<String>,
    },
    /// Topic created
    TopicCreated {
        /// Topic name
        name: String,
    },
    /// Topic deleted
    TopicDeleted {
        /// Topic name
        name: String,
    },
    /// Topic description
    Topic(TopicDescription),
    /// Request rejected
    Error {
        /// Error code
        code: AdminErrorCode,
        /// Human readable detail
        message: String,
    },
}

impl AdminResponse {
    /// Build an error response
    pub fn error(code: AdminErrorCode, message: impl Into<String>) -> Self {
        AdminResponse::Error {
            code,
            message: message.into(),
        }
    }
}

/// Admin error codes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AdminErrorCode {
    /// Topic exists already
    TopicAlreadyExists,
    /// Topic does not exist
    UnknownTopic,
    /// Topic name is not legal
    InvalidTopic,
    /// Partition count is not legal
    InvalidPartitions,
    /// Replication factor exceeds the live brokers
    InvalidReplicationFactor,
    /// Missing or rejected credentials
    AuthenticationFailed,
    /// Broker could not reach the coordination service
    CoordinationError,
    /// Request could not be parsed
    InvalidRequest,
}

/// Topic creation request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NewTopic {
    /// Topic name
    pub name: String,
    /// Partition count; the broker default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<u32>,
    /// Replication factor; the broker default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_factor: Option<u16>,
    /// Topic level config overrides
    #[serde(default)]
    pub configs: BTreeMap<String, String>,
}

impl NewTopic {
    /// Topic with broker defaults
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the partition count
    pub fn partitions(mut self, partitions: u32) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// Set the replication factor
    pub fn replication_factor(mut self, replication_factor: u16) -> Self {
        self.replication_factor = Some(replication_factor);
        self
    }

    /// Add a config override
    pub fn config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configs.insert(key.into(), value.into());
        self
    }
}

/// A live broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerNode {
    /// Broker id
    pub id: u32,
    /// Host
    pub host: String,
    /// Port
    pub port: u16,
}

/// Cluster membership
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterDescription {
    /// Cluster id
    pub cluster_id: String,
    /// Controller broker id, the lowest live id
    pub controller: Option<u32>,
    /// Live brokers ordered by id
    pub nodes: Vec<BrokerNode>,
}

/// A partition and its replicas
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartitionInfo {
    /// Partition number
    pub partition: u32,
    /// First live replica
    pub leader: Option<u32>,
    /// Assigned replicas, preferred leader first
    pub replicas: Vec<u32>,
    /// Replicas currently live
    pub isr: Vec<u32>,
}

/// Topic description
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicDescription {
    /// Topic name
    pub name: String,
    /// Whether the topic is broker internal (`__` prefix)
    pub internal: bool,
    /// Partitions ordered by number
    pub partitions: Vec<PartitionInfo>,
    /// Config overrides
    pub configs: BTreeMap<String, String>,
}

/// Broker registration stored under `/brokers/ids/<id>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct BrokerRegistration {
    pub id: u32,
    pub host: String,
    pub port: u16,
    pub endpoints: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Replica assignment stored under `/brokers/topics/<name>`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct TopicAssignment {
    pub partitions: BTreeMap<u32, Vec<u32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_topic_wire_format() {
        let request = AdminRequest::CreateTopic(
            NewTopic::new("basic01")
                .partitions(4)
                .config("retention.ms", "5000"),
        );
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["op"], "create_topic");
        assert_eq!(json["name"], "basic01");
        assert_eq!(json["partitions"], 4);
        assert_eq!(json["configs"]["retention.ms"], "5000");
        assert!(json.get("replication_factor").is_none());
    }

    #[test]
    fn test_unit_requests_parse() {
        let parsed: AdminRequest = serde_json::from_str(r#"{"op":"list_topics"}"#).unwrap();
        assert_eq!(parsed, AdminRequest::ListTopics);
    }

    #[test]
    fn test_assignment_keys_round_trip_as_strings() {
        let assignment = TopicAssignment {
            partitions: BTreeMap::from([(0, vec![0, 1]), (1, vec![1, 0])]),
        };
        let json = serde_json::to_string(&assignment).unwrap();
        assert_eq!(json, r#"{"partitions":{"0":[0,1],"1":[1,0]}}"#);
        let parsed: TopicAssignment = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, assignment);
    }
}
