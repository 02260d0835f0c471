use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::{Error, Result};

pub const DEFAULT_RETRY_CRON_JOB: &str = "0 0 0 * * *";
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 5;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub kafka: KafkaConfig,
    pub helper: HelperConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
}

/// The `kafka-helper` section. Keys keep their camelCase spelling so existing
/// deployments' property files carry over.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HelperConfig {
    #[serde(rename = "retryTopic", alias = "retrytopic", alias = "retry_topic")]
    pub retry_topic: String,
    #[serde(rename = "retryGroup", alias = "retrygroup", alias = "retry_group")]
    pub retry_group: String,
    #[serde(
        rename = "retryCronJob",
        alias = "retrycronjob",
        alias = "retry_cron_job",
        default = "default_retry_cron_job"
    )]
    pub retry_cron_job: String,
    #[serde(rename = "deadTopic", alias = "deadtopic", alias = "dead_topic", default)]
    pub dead_topic: Option<String>,
    #[serde(rename = "deadGroup", alias = "deadgroup", alias = "dead_group", default)]
    pub dead_group: Option<String>,
    #[serde(
        rename = "maxRetryCount",
        alias = "maxretrycount",
        alias = "max_retry_count",
        default = "default_max_retry_count"
    )]
    pub max_retry_count: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CaptureConfig {
    /// Entity type (`Diffable::ENTITY_TYPE`) to topic binding.
    #[serde(default)]
    pub entities: HashMap<String, EntityTopicConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EntityTopicConfig {
    pub topic: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("KAFKA_HELPER")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("kafka.brokers")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.kafka.brokers.is_empty() {
            return Err(Error::Config("kafka.brokers must not be empty".to_string()));
        }

        if !self.helper.enabled {
            return Ok(());
        }

        if self.helper.retry_topic.trim().is_empty() {
            return Err(Error::Config("helper.retryTopic must not be empty".to_string()));
        }
        if self.helper.retry_group.trim().is_empty() {
            return Err(Error::Config("helper.retryGroup must not be empty".to_string()));
        }
        if let Some(dead_topic) = &self.helper.dead_topic {
            if dead_topic == &self.helper.retry_topic {
                return Err(Error::Config(
                    "helper.deadTopic must differ from helper.retryTopic".to_string(),
                ));
            }
        }

        self.helper
            .retry_cron_job
            .parse::<cron::Schedule>()
            .map_err(|e| Error::Config(format!("invalid helper.retryCronJob: {}", e)))?;

        Ok(())
    }

    pub fn bootstrap_servers(&self) -> String {
        self.kafka.brokers.join(",")
    }
}

impl HelperConfig {
    /// The dead-letter topic, if one is configured and non-blank.
    pub fn dead_topic(&self) -> Option<&str> {
        self.dead_topic
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

fn default_client_id() -> String {
    "kafka-helper".to_string()
}

fn default_compression() -> String {
    "snappy".to_string()
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_linger_ms() -> u32 {
    5
}

fn default_batch_size() -> usize {
    16384
}

fn default_message_timeout_ms() -> u64 {
    30_000
}

fn default_session_timeout_ms() -> u64 {
    10_000
}

fn default_retry_cron_job() -> String {
    DEFAULT_RETRY_CRON_JOB.to_string()
}

fn default_max_retry_count() -> u32 {
    DEFAULT_MAX_RETRY_COUNT
}

fn default_enabled() -> bool {
    true
}
