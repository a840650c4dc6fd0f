//! Integration tests for the environment lifecycle
//!
//! Every test builds a real environment on free localhost ports and checks
//! it through the admin client, the published server park and the HTTP
//! services.

mod common;

use common::{started, user_topics};
use kafka_environment::services::FAILED_COMMAND;
use kafka_environment::{
    BrokerStatus, Credential, EnvironmentConfig, Error, KafkaEnvironment, Limits,
    ManagedService, SchemaRegistryStatus, ServerParkStatus, ServiceStatus, TopicSpec,
};
use serde_json::Value;
use std::sync::Arc;

#[tokio::test]
async fn test_default_environment_with_topics() -> anyhow::Result<()> {
    let mut env = started(EnvironmentConfig::new().topic("basic01").topic("basic02")).await?;

    assert_eq!(env.status(), ServerParkStatus::Started);
    assert_eq!(env.brokers().len(), 1);
    assert_eq!(env.coordination().command("ruok").await, "imok\n");

    let admin = env.admin_client().expect("brokers are running");
    assert_eq!(admin.number_of_brokers().await?, 1);
    assert_eq!(user_topics(&env).await?, vec!["basic01", "basic02"]);

    let description = admin.describe_topic("basic01").await?;
    assert_eq!(description.partitions.len(), 1);
    assert_eq!(description.partitions[0].replicas, vec![0]);

    let work_dir = env.work_dir().expect("not torn down").to_path_buf();
    env.tear_down().await;
    assert!(!work_dir.exists());
    Ok(())
}

#[tokio::test]
async fn test_broker_count_is_capped() -> anyhow::Result<()> {
    let mut env = started(EnvironmentConfig::new().brokers(5).topic("capped")).await?;

    assert_eq!(env.brokers().len(), 2);
    let admin = env.admin_client().expect("brokers are running");
    assert_eq!(admin.number_of_brokers().await?, 2);

    let description = admin.describe_topic("capped").await?;
    assert_eq!(description.partitions.len(), 2);
    for partition in &description.partitions {
        assert_eq!(partition.replicas.len(), 2);
    }

    let urls = env.brokers_url().expect("brokers exist");
    assert_eq!(urls.split(',').count(), 2);
    assert!(urls.split(',').all(|u| u.starts_with("PLAINTEXT://localhost:")));

    env.tear_down().await;
    Ok(())
}

#[tokio::test]
async fn test_coordination_only_environment() -> anyhow::Result<()> {
    for count in [0, -2] {
        let mut env = started(EnvironmentConfig::new().brokers(count)).await?;

        assert_eq!(env.status(), ServerParkStatus::Started);
        assert!(env.brokers().is_empty());
        assert!(env.brokers_url().is_none());
        assert!(env.admin_client().is_none());
        assert!(env.schema_registry().is_none());
        assert_eq!(env.server_park().broker_status, BrokerStatus::NotAvailable);
        assert_eq!(env.coordination().command("ruok").await, "imok\n");

        env.tear_down().await;
    }
    Ok(())
}

#[tokio::test]
async fn test_topics_imply_a_broker() -> anyhow::Result<()> {
    let mut env = started(EnvironmentConfig::new().brokers(0).topic("needs-broker")).await?;

    assert_eq!(env.brokers().len(), 1);
    assert_eq!(user_topics(&env).await?, vec!["needs-broker"]);

    env.tear_down().await;
    Ok(())
}

#[tokio::test]
async fn test_lifecycle_operations_are_idempotent() -> anyhow::Result<()> {
    common::init_logging();
    let mut env = KafkaEnvironment::new(EnvironmentConfig::new()).await?;

    let initialized = env.server_park();
    assert_eq!(initialized.status, ServerParkStatus::Initialized);
    assert!(
        initialized
            .brokers()
            .iter()
            .all(|b| b.status == ServiceStatus::NotRunning)
    );

    env.stop().await;
    assert_eq!(env.server_park(), initialized);
    assert!(env.admin_client().is_none());

    env.start().await?;
    let first = env.server_park();
    assert_eq!(first.status, ServerParkStatus::Started);
    assert_eq!(first.running_brokers(), 1);

    env.start().await?;
    assert_eq!(env.server_park(), first);

    // Snapshots handed out earlier never change
    assert_eq!(initialized.status, ServerParkStatus::Initialized);

    env.stop().await;
    let stopped = env.server_park();
    assert_eq!(stopped.status, ServerParkStatus::Stopped);
    assert_eq!(stopped.coordination.status, ServiceStatus::NotRunning);
    assert_eq!(stopped.running_brokers(), 0);

    env.stop().await;
    assert_eq!(env.server_park(), stopped);

    env.tear_down().await;
    Ok(())
}

#[tokio::test]
async fn test_restart_keeps_topics() -> anyhow::Result<()> {
    let mut env = started(EnvironmentConfig::new().topic("kept01").topic("kept02")).await?;
    let before = user_topics(&env).await?;

    env.stop().await;
    assert_eq!(env.coordination().command("ruok").await, FAILED_COMMAND);

    env.start().await?;
    assert_eq!(env.status(), ServerParkStatus::Started);
    assert_eq!(user_topics(&env).await?, before);

    env.tear_down().await;
    Ok(())
}

#[tokio::test]
async fn test_topics_are_provisioned_only_once() -> anyhow::Result<()> {
    let mut env = started(EnvironmentConfig::new().topic("once")).await?;
    let admin = env.admin_client().expect("brokers are running");
    admin.delete_topic("once").await?;
    assert!(user_topics(&env).await?.is_empty());

    env.stop().await;
    env.start().await?;

    assert_eq!(env.status(), ServerParkStatus::Started);
    assert!(user_topics(&env).await?.is_empty());

    env.tear_down().await;
    Ok(())
}

#[tokio::test]
async fn test_failed_start_rolls_back() -> anyhow::Result<()> {
    common::init_logging();
    let mut env = KafkaEnvironment::new(EnvironmentConfig::new().topic("after-retry")).await?;
    let broker_port = env.brokers()[0].port;

    let blocker = std::net::TcpListener::bind(("127.0.0.1", broker_port))?;
    assert!(env.start().await.is_err());
    assert_eq!(env.status(), ServerParkStatus::Initialized);
    assert_eq!(env.coordination().status(), ServiceStatus::NotRunning);
    assert!(env.admin_client().is_none());
    drop(blocker);

    env.start().await?;
    assert_eq!(env.status(), ServerParkStatus::Started);
    assert_eq!(env.coordination().status(), ServiceStatus::Running);
    assert_eq!(user_topics(&env).await?, vec!["after-retry"]);

    env.tear_down().await;
    Ok(())
}

#[tokio::test]
async fn test_tear_down_is_terminal() -> anyhow::Result<()> {
    let mut env = started(EnvironmentConfig::new().with_schema_registry(true)).await?;
    let coordination_url = env.coordination_url().expect("not torn down");
    assert_eq!(coordination_url, format!("localhost:{}", env.coordination().port()));

    env.tear_down().await;
    let torn_down = env.server_park();
    assert_eq!(torn_down.status, ServerParkStatus::TearDownCompleted);
    assert_eq!(torn_down.broker_status, BrokerStatus::NotAvailable);
    assert_eq!(
        torn_down.schema_registry_status,
        SchemaRegistryStatus::NotAvailable
    );
    assert!(env.work_dir().is_none());

    env.start().await?;
    env.stop().await;
    env.close().await;
    assert_eq!(env.server_park(), torn_down);
    assert!(env.admin_client().is_none());
    assert!(env.coordination_url().is_none());
    assert_eq!(env.coordination().command("ruok").await, FAILED_COMMAND);
    Ok(())
}

#[tokio::test]
async fn test_topic_specs_override_defaults() -> anyhow::Result<()> {
    let spec = TopicSpec::new("orders")
        .partitions(4)
        .config("retention.ms", "60000");
    let mut env = started(
        EnvironmentConfig::new()
            .topic("orders")
            .topic_spec(spec)
            .topic("plain"),
    )
    .await?;

    let admin = env.admin_client().expect("brokers are running");
    let orders = admin.describe_topic("orders").await?;
    assert_eq!(orders.partitions.len(), 4);
    assert_eq!(
        orders.configs.get("retention.ms").map(String::as_str),
        Some("60000")
    );

    let plain = admin.describe_topic("plain").await?;
    assert_eq!(plain.partitions.len(), 1);
    assert!(plain.configs.is_empty());

    env.tear_down().await;
    Ok(())
}

#[tokio::test]
async fn test_schema_registry() -> anyhow::Result<()> {
    let mut env = started(EnvironmentConfig::new().with_schema_registry(true)).await?;

    let park = env.server_park();
    let service = park.schema_registry().expect("registry requested");
    assert_eq!(service.status, ServiceStatus::Running);
    assert!(service.url.starts_with("http://localhost:"));

    let registry = env.schema_registry().expect("registry requested");
    assert_eq!(registry.compatibility_level().await?, "BACKWARD");
    assert!(registry.subjects().await?.is_empty());

    let schema = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"}]}"#;
    let id = registry.register("users-value", schema).await?;
    assert_eq!(registry.register("users-value", schema).await?, id);
    assert_eq!(registry.subjects().await?, vec!["users-value"]);
    assert_eq!(registry.versions("users-value").await?, vec![1]);

    let admin = env.admin_client().expect("brokers are running");
    assert!(admin.list_topics().await?.contains(&"_schemas".to_string()));

    env.tear_down().await;
    Ok(())
}

#[tokio::test]
async fn test_rest_gateway_and_stream_query() -> anyhow::Result<()> {
    let mut env = started(
        EnvironmentConfig::new()
            .brokers(0)
            .topic("events")
            .with_rest_gateway(true)
            .with_stream_query(true),
    )
    .await?;
    assert_eq!(env.brokers().len(), 1);

    let http = reqwest::Client::new();
    let gateway = env.rest_gateway_url().expect("gateway requested");
    let topics: Vec<String> = http
        .get(format!("{}/topics", gateway))
        .send()
        .await?
        .json()
        .await?;
    assert!(topics.contains(&"events".to_string()));

    let brokers: Value = http
        .get(format!("{}/brokers", gateway))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(brokers["brokers"], serde_json::json!([0]));

    let query = env.stream_query_url().expect("stream query requested");
    let response = http
        .post(format!("{}/ksql", query))
        .json(&serde_json::json!({ "ksql": "LIST TOPICS;" }))
        .send()
        .await?;
    assert!(response.status().is_success());
    let body: Value = response.json().await?;
    let listed = body[0]["topics"].as_array().cloned().unwrap_or_default();
    assert!(listed.iter().any(|t| t["name"] == "events"));

    env.tear_down().await;
    assert!(env.rest_gateway_url().is_none());
    assert!(env.stream_query_url().is_none());
    Ok(())
}

#[tokio::test]
async fn test_single_broker_stop_and_start() -> anyhow::Result<()> {
    let mut env = started(EnvironmentConfig::new().brokers(2).topic("resilient")).await?;
    let admin = env.admin_client().expect("brokers are running");

    env.stop_broker(1).await?;
    assert_eq!(env.server_park().running_brokers(), 1);
    assert_eq!(env.brokers()[1].status, ServiceStatus::NotRunning);
    assert_eq!(admin.number_of_brokers().await?, 1);
    assert!(admin.list_topics().await?.contains(&"resilient".to_string()));

    env.start_broker(1).await?;
    assert_eq!(env.server_park().running_brokers(), 2);
    assert_eq!(admin.number_of_brokers().await?, 2);

    assert!(matches!(env.stop_broker(7).await, Err(Error::Config(_))));

    env.tear_down().await;
    Ok(())
}

#[tokio::test]
async fn test_secured_environment() -> anyhow::Result<()> {
    let mut env = started(
        EnvironmentConfig::new()
            .with_security(true)
            .credential(Credential::new("srvapp", "secret"))
            .topic("secured"),
    )
    .await?;

    assert!(env.security().is_enabled());
    let urls = env.brokers_url().expect("brokers exist");
    assert!(urls.starts_with("SASL_PLAINTEXT://localhost:"));

    let admin = env.admin_client().expect("brokers are running");
    assert!(admin.list_topics().await?.contains(&"secured".to_string()));

    let extra = kafka_environment::AdminClient::new(urls)?
        .with_credential(Credential::new("srvapp", "secret"));
    assert_eq!(extra.number_of_brokers().await?, 1);

    let anonymous = kafka_environment::AdminClient::new(urls)?;
    assert!(anonymous.list_topics().await.is_err());

    let wrong = kafka_environment::AdminClient::new(urls)?
        .with_credential(Credential::new("srvapp", "wrong"));
    assert!(wrong.list_topics().await.is_err());

    env.tear_down().await;
    Ok(())
}

#[tokio::test]
async fn test_environment_from_yaml_file() -> anyhow::Result<()> {
    common::init_logging();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("environment.yaml");
    std::fs::write(
        &path,
        r#"
broker_count: 1
topic_names: [from-yaml]
topic_specs:
  - name: compacted
    partitions: 2
    configs:
      cleanup.policy: compact
auto_start: true
limits:
  readiness_retries: 100
"#,
    )?;

    let config = EnvironmentConfig::from_file(&path)?;
    assert_eq!(config.limits.readiness_retries, 100);
    assert_eq!(config.limits.max_brokers, Limits::default().max_brokers);

    let mut env = KafkaEnvironment::new(config).await?;
    assert_eq!(env.status(), ServerParkStatus::Started);
    assert_eq!(user_topics(&env).await?, vec!["compacted", "from-yaml"]);

    let admin = env.admin_client().expect("brokers are running");
    assert_eq!(admin.describe_topic("compacted").await?.partitions.len(), 2);

    env.tear_down().await;
    Ok(())
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected() {
    common::init_logging();
    let config = EnvironmentConfig::new().topic_spec(TopicSpec::new("empty").partitions(0));
    assert!(matches!(
        KafkaEnvironment::new(config).await,
        Err(Error::Config(_))
    ));

    let no_room_for_topics = EnvironmentConfig::new().topic("dropped").limits(Limits {
        max_brokers: 0,
        ..Limits::default()
    });
    assert!(matches!(
        KafkaEnvironment::new(no_room_for_topics).await,
        Err(Error::Config(_))
    ));
}

#[tokio::test]
async fn test_snapshot_can_be_shared() -> anyhow::Result<()> {
    let mut env = started(EnvironmentConfig::new()).await?;

    let park = env.server_park();
    let reader = Arc::clone(&park);
    let handle = tokio::spawn(async move { reader.status });
    assert_eq!(handle.await?, ServerParkStatus::Started);

    let json = serde_json::to_value(park.as_ref())?;
    assert_eq!(json["status"], "Started");
    assert_eq!(json["coordination"]["name"], "coordination");

    env.tear_down().await;
    Ok(())
}
