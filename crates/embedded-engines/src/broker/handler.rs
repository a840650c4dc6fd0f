//! Admin request handling backed by coordination-service metadata.

use super::protocol::{
    AdminErrorCode, AdminRequest, AdminResponse, BrokerNode, BrokerRegistration,
    ClusterDescription, NewTopic, PartitionInfo, TopicAssignment, TopicDescription,
};
use crate::{Error, Result, coordination::CoordinationSession};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use tracing::{debug, info};

pub(crate) const BROKER_IDS: &str = "/brokers/ids";
pub(crate) const BROKER_TOPICS: &str = "/brokers/topics";
pub(crate) const TOPIC_CONFIGS: &str = "/config/topics";
pub(crate) const CLUSTER_ID: &str = "/cluster/id";

const MAX_TOPIC_NAME: usize = 249;

static LEGAL_TOPIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._-]+$").expect("topic name pattern is valid")
});

/// Defaults applied to topic creation requests
#[derive(Debug, Clone, Copy)]
pub(crate) struct TopicDefaults {
    pub partitions: u32,
    pub replication_factor: u16,
}

/// Dispatch one admin request against the cluster metadata
pub(crate) async fn handle(
    request: AdminRequest,
    session: &mut CoordinationSession,
    defaults: TopicDefaults,
) -> AdminResponse {
    let outcome = match request {
        AdminRequest::DescribeCluster => describe_cluster(session).await.map(AdminResponse::Cluster),
        AdminRequest::ListTopics => session
            .children(BROKER_TOPICS)
            .await
            .map(|names| AdminResponse::Topics { names }),
        AdminRequest::CreateTopic(topic) => create_topic(session, topic, defaults).await,
        AdminRequest::DescribeTopic { name } => describe_topic(session, &name).await,
        AdminRequest::DeleteTopic { name } => delete_topic(session, &name).await,
        AdminRequest::Authenticate { .. } => Ok(AdminResponse::Authenticated),
    };

    outcome.unwrap_or_else(|e| match e {
        Error::Admin { code, message } => AdminResponse::error(code, message),
        other => AdminResponse::error(AdminErrorCode::CoordinationError, other.to_string()),
    })
}

/// Validate a topic name
pub(crate) fn validate_topic_name(name: &str) -> Result<()> {
    let legal = !name.is_empty()
        && name.len() <= MAX_TOPIC_NAME
        && name != "."
        && name != ".."
        && LEGAL_TOPIC.is_match(name);

    if legal {
        Ok(())
    } else {
        Err(admin_error(
            AdminErrorCode::InvalidTopic,
            format!("Topic name {:?} is illegal", name),
        ))
    }
}

/// Round-robin replica assignment across live brokers
pub(crate) fn assign_replicas(
    brokers: &[u32],
    partitions: u32,
    replication_factor: u16,
) -> BTreeMap<u32, Vec<u32>> {
    (0..partitions)
        .map(|partition| {
            let replicas = (0..replication_factor as usize)
                .map(|replica| brokers[(partition as usize + replica) % brokers.len()])
                .collect();
            (partition, replicas)
        })
        .collect()
}

async fn live_brokers(session: &mut CoordinationSession) -> Result<Vec<u32>> {
    let mut ids: Vec<u32> = session
        .children(BROKER_IDS)
        .await?
        .iter()
        .filter_map(|id| id.parse().ok())
        .collect();
    ids.sort_unstable();
    Ok(ids)
}

async fn describe_cluster(session: &mut CoordinationSession) -> Result<ClusterDescription> {
    let cluster_id = session.get(CLUSTER_ID).await?.unwrap_or_default();

    let mut nodes = Vec::new();
    for id in live_brokers(session).await? {
        let path = format!("{}/{}", BROKER_IDS, id);
        // A broker may deregister between listing and reading
        let Some(raw) = session.get(&path).await? else {
            continue;
        };
        let registration: BrokerRegistration = serde_json::from_str(&raw)?;
        nodes.push(BrokerNode {
            id: registration.id,
            host: registration.host,
            port: registration.port,
        });
    }

    Ok(ClusterDescription {
        cluster_id,
        controller: nodes.first().map(|n| n.id),
        nodes,
    })
}

async fn create_topic(
    session: &mut CoordinationSession,
    topic: NewTopic,
    defaults: TopicDefaults,
) -> Result<AdminResponse> {
    validate_topic_name(&topic.name)?;

    let partitions = topic.partitions.unwrap_or(defaults.partitions);
    if partitions == 0 {
        return Err(admin_error(
            AdminErrorCode::InvalidPartitions,
            "Number of partitions must be larger than 0",
        ));
    }

    let brokers = live_brokers(session).await?;
    let replication_factor = topic
        .replication_factor
        .unwrap_or(defaults.replication_factor);
    if replication_factor == 0 || replication_factor as usize > brokers.len() {
        return Err(admin_error(
            AdminErrorCode::InvalidReplicationFactor,
            format!(
                "Replication factor: {} larger than available brokers: {}",
                replication_factor,
                brokers.len()
            ),
        ));
    }

    let topic_path = format!("{}/{}", BROKER_TOPICS, topic.name);
    if session.exists(&topic_path).await? {
        return Err(admin_error(
            AdminErrorCode::TopicAlreadyExists,
            format!("Topic '{}' already exists.", topic.name),
        ));
    }

    let assignment = TopicAssignment {
        partitions: assign_replicas(&brokers, partitions, replication_factor),
    };
    session
        .create(
            &format!("{}/{}", TOPIC_CONFIGS, topic.name),
            &serde_json::to_string(&topic.configs)?,
            false,
        )
        .await
        .or_else(ignore_existing)?;
    session
        .create(&topic_path, &serde_json::to_string(&assignment)?, false)
        .await?;

    info!(
        "Created topic {} with {} partition(s), replication factor {}",
        topic.name, partitions, replication_factor
    );
    Ok(AdminResponse::TopicCreated { name: topic.name })
}

async fn describe_topic(session: &mut CoordinationSession, name: &str) -> Result<AdminResponse> {
    let Some(raw) = session.get(&format!("{}/{}", BROKER_TOPICS, name)).await? else {
        return Err(unknown_topic(name));
    };
    let assignment: TopicAssignment = serde_json::from_str(&raw)?;

    let configs = match session.get(&format!("{}/{}", TOPIC_CONFIGS, name)).await? {
        Some(raw) => serde_json::from_str(&raw)?,
        None => BTreeMap::new(),
    };

    let live: BTreeSet<u32> = live_brokers(session).await?.into_iter().collect();
    let partitions = assignment
        .partitions
        .into_iter()
        .map(|(partition, replicas)| {
            let isr: Vec<u32> = replicas
                .iter()
                .copied()
                .filter(|id| live.contains(id))
                .collect();
            PartitionInfo {
                partition,
                leader: isr.first().copied(),
                replicas,
                isr,
            }
        })
        .collect();

    Ok(AdminResponse::Topic(TopicDescription {
        name: name.to_string(),
        internal: name.starts_with("__"),
        partitions,
        configs,
    }))
}

async fn delete_topic(session: &mut CoordinationSession, name: &str) -> Result<AdminResponse> {
    let topic_path = format!("{}/{}", BROKER_TOPICS, name);
    if !session.exists(&topic_path).await? {
        return Err(unknown_topic(name));
    }

    session.delete(&topic_path).await?;
    session
        .delete(&format!("{}/{}", TOPIC_CONFIGS, name))
        .await
        .or_else(ignore_missing)?;

    debug!("Deleted topic {}", name);
    Ok(AdminResponse::TopicDeleted {
        name: name.to_string(),
    })
}

fn admin_error(code: AdminErrorCode, message: impl Into<String>) -> Error {
    Error::Admin {
        code,
        message: message.into(),
    }
}

fn unknown_topic(name: &str) -> Error {
    admin_error(
        AdminErrorCode::UnknownTopic,
        format!("This server does not host this topic-partition: {}", name),
    )
}

fn ignore_existing(e: Error) -> Result<()> {
    match e {
        Error::Coordination {
            code: crate::CoordinationErrorCode::NodeExists,
            ..
        } => Ok(()),
        other => Err(other),
    }
}

fn ignore_missing(e: Error) -> Result<()> {
    match e {
        Error::Coordination {
            code: crate::CoordinationErrorCode::NoNode,
            ..
        } => Ok(()),
        other => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names() {
        for legal in ["basic01", "a.b-c_d", "_schemas", "__consumer_offsets"] {
            assert!(validate_topic_name(legal).is_ok(), "{}", legal);
        }
        let too_long = "x".repeat(250);
        for illegal in ["", ".", "..", "with space", "slash/ed", too_long.as_str()] {
            assert!(validate_topic_name(illegal).is_err(), "{}", illegal);
        }
    }

    #[test]
    fn test_round_robin_assignment() {
        let assignment = assign_replicas(&[0, 1], 4, 2);
        assert_eq!(assignment[&0], vec![0, 1]);
        assert_eq!(assignment[&1], vec![1, 0]);
        assert_eq!(assignment[&2], vec![0, 1]);
        assert_eq!(assignment[&3], vec![1, 0]);

        let single = assign_replicas(&[3], 2, 1);
        assert_eq!(single[&0], vec![3]);
        assert_eq!(single[&1], vec![3]);
    }
}
