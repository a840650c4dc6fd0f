//! Common test utilities for environment integration tests

#![allow(dead_code)]

use anyhow::Result;
use kafka_environment::{EnvironmentConfig, KafkaEnvironment};
use std::sync::Once;

static INIT: Once = Once::new();

/// Route `tracing` output through the test harness once per binary
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "kafka_environment=debug,embedded_engines=info".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Build and start an environment
pub async fn started(config: EnvironmentConfig) -> Result<KafkaEnvironment> {
    init_logging();
    let mut env = KafkaEnvironment::new(config).await?;
    env.start().await?;
    Ok(env)
}

/// Topic names sorted, without internal topics
pub async fn user_topics(env: &KafkaEnvironment) -> Result<Vec<String>> {
    let admin = env
        .admin_client()
        .ok_or_else(|| anyhow::anyhow!("no admin client"))?;
    let mut topics: Vec<String> = admin
        .list_topics()
        .await?
        .into_iter()
        .filter(|t| !t.starts_with('_'))
        .collect();
    topics.sort();
    Ok(topics)
}
