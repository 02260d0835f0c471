use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{error, info};

use crate::kafka::{Delivery, DeliveryHandle, Envelope, Publisher};
use crate::Error;

/// In-memory publisher for tests and local pipelines.
///
/// Every send is appended to a shared log and acknowledged with a
/// per-topic offset. Topics marked with [`InMemoryPublisher::fail_topic`]
/// reject sends with [`Error::PublishFailure`] instead.
#[derive(Clone, Default)]
pub struct InMemoryPublisher {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    sent: Vec<(String, Envelope)>,
    offsets: HashMap<String, i64>,
    failing: HashSet<String>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later send to `topic` fail.
    pub fn fail_topic(&self, topic: impl Into<String>) {
        self.lock().failing.insert(topic.into());
    }

    /// Every accepted `(topic, envelope)` pair, in send order.
    pub fn sent(&self) -> Vec<(String, Envelope)> {
        self.lock().sent.clone()
    }

    /// Envelopes accepted for one topic, in send order.
    pub fn sent_to(&self, topic: &str) -> Vec<Envelope> {
        self.lock()
            .sent
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Drains the log.
    pub fn take(&self) -> Vec<(String, Envelope)> {
        std::mem::take(&mut self.lock().sent)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned log is still a usable log.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Publisher for InMemoryPublisher {
    fn send(&self, topic: &str, envelope: Envelope) -> DeliveryHandle {
        let result = {
            let mut state = self.lock();
            if state.failing.contains(topic) {
                error!(topic, key = %envelope.key, "Failed to publish message");
                Err(Error::PublishFailure {
                    topic: topic.to_string(),
                    reason: "topic marked as failing".to_string(),
                })
            } else {
                let offset = state.offsets.entry(topic.to_string()).or_insert(0);
                let delivery = Delivery {
                    topic: topic.to_string(),
                    partition: 0,
                    offset: *offset,
                };
                *offset += 1;
                state.sent.push((topic.to_string(), envelope));
                info!(
                    topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Message sent to in-memory log"
                );
                Ok(delivery)
            }
        };

        tokio::spawn(async move { result })
    }
}
