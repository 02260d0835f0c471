use crate::kafka::Envelope;
use crate::{config::KafkaConfig, Error, Result};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Where the broker put a published record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Completion handle of a fire-and-forget send.
///
/// Dropping it detaches the send; awaiting it yields the broker's verdict.
pub type DeliveryHandle = JoinHandle<Result<Delivery>>;

/// Asynchronous keyed send to a named topic.
///
/// `send` never blocks on broker acknowledgment. Implementations log the
/// outcome themselves (success with partition/offset, failure as
/// [`Error::PublishFailure`]) and never retry.
pub trait Publisher: Send + Sync {
    fn send(&self, topic: &str, envelope: Envelope) -> DeliveryHandle;
}

pub struct KafkaProducer {
    producer: FutureProducer,
    queue_timeout: Duration,
}

impl KafkaProducer {
    pub fn new(brokers: &[String], config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("client.id", &config.client_id)
            .set("compression.type", &config.compression)
            .set("acks", &config.acks)
            .set("linger.ms", config.linger_ms.to_string())
            .set("batch.size", config.batch_size.to_string())
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .create()
            .map_err(Error::Kafka)?;

        Ok(Self {
            producer,
            queue_timeout: Duration::from_millis(config.message_timeout_ms),
        })
    }
}

impl Publisher for KafkaProducer {
    fn send(&self, topic: &str, envelope: Envelope) -> DeliveryHandle {
        let producer = self.producer.clone();
        let queue_timeout = self.queue_timeout;
        let topic = topic.to_string();

        tokio::spawn(async move {
            let headers = envelope.owned_headers();
            let record = FutureRecord::to(&topic)
                .key(envelope.key.as_str())
                .payload(envelope.payload.as_ref())
                .headers(headers);

            let result = producer.send(record, Timeout::After(queue_timeout)).await;
            match result {
                Ok((partition, offset)) => {
                    info!(
                        topic = %topic,
                        partition,
                        offset,
                        key = %envelope.key,
                        "Message sent"
                    );
                    Ok(Delivery {
                        topic,
                        partition,
                        offset,
                    })
                }
                Err((e, _)) => {
                    error!(
                        topic = %topic,
                        key = %envelope.key,
                        error = %e,
                        "Failed to publish message"
                    );
                    Err(Error::PublishFailure {
                        topic,
                        reason: e.to_string(),
                    })
                }
            }
        })
    }
}
