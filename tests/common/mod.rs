#![allow(dead_code)]

use chrono::NaiveDateTime;
use kafka_helper::capture::{assign_field, Diffable};
use kafka_helper::config::{
    CaptureConfig, Config, HelperConfig, KafkaConfig, DEFAULT_RETRY_CRON_JOB,
};
use kafka_helper::kafka::InMemoryPublisher;
use kafka_helper::retry::{ManualClock, RetryCoordinator, RetrySettings};
use kafka_helper::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::sync::Arc;

pub const RETRY_TOPIC: &str = "retry-topic";
pub const DEAD_TOPIC: &str = "dead-topic";

/// Get test configuration from environment variables
pub fn get_test_config() -> Config {
    let kafka = KafkaConfig {
        brokers: env::var("TEST_KAFKA_BROKERS")
            .unwrap_or_else(|_| "localhost:9092".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect(),
        client_id: format!("kafka-helper-test-{}", std::process::id()),
        compression: "none".to_string(),
        acks: "all".to_string(),
        linger_ms: 0,
        batch_size: 1,
        message_timeout_ms: 5_000,
        session_timeout_ms: 6_000,
    };

    let helper = HelperConfig {
        retry_topic: format!("test_retry_{}", std::process::id()),
        retry_group: format!("test_retry_group_{}", std::process::id()),
        retry_cron_job: DEFAULT_RETRY_CRON_JOB.to_string(),
        dead_topic: Some(format!("test_dead_{}", std::process::id())),
        dead_group: None,
        max_retry_count: 2,
        enabled: true,
    };

    Config {
        kafka,
        helper,
        capture: CaptureConfig::default(),
    }
}

pub fn ts(raw: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").unwrap()
}

/// Coordinator over an in-memory publisher and a manual clock.
pub fn coordinator(
    max_retry_count: u32,
    now: NaiveDateTime,
) -> (Arc<RetryCoordinator>, InMemoryPublisher, Arc<ManualClock>) {
    let publisher = InMemoryPublisher::new();
    let clock = Arc::new(ManualClock::new(now));
    let settings = RetrySettings {
        retry_topic: RETRY_TOPIC.to_string(),
        dead_topic: Some(DEAD_TOPIC.to_string()),
        max_retry_count,
    };
    let coordinator = Arc::new(RetryCoordinator::new(
        settings,
        Arc::new(publisher.clone()),
        clock.clone(),
    ));
    (coordinator, publisher, clock)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub last_name: Option<String>,
}

impl Diffable for Customer {
    const ENTITY_TYPE: &'static str = "customer";

    fn property_names() -> &'static [&'static str] {
        &["name", "lastName"]
    }

    fn identifier(&self) -> Option<Value> {
        self.id.map(Value::from)
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<()> {
        match name {
            "id" => assign_field(&mut self.id, name, value),
            "name" => assign_field(&mut self.name, name, value),
            "lastName" => assign_field(&mut self.last_name, name, value),
            other => Err(Error::InvalidField {
                field: other.to_string(),
                reason: "unknown property".to_string(),
            }),
        }
    }
}
