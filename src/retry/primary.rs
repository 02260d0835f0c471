use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::kafka::{Disposition, Envelope, RecordHandler};
use crate::retry::{headers, RetryCoordinator};

/// Primary-topic handler that turns processing failures into scheduled
/// retries.
///
/// Every record is acknowledged: a failed one lives on as a new record on
/// the retry topic, due after `delay`. A record whose retry cannot be
/// scheduled (unreadable retry headers, out-of-range delay) is acknowledged
/// too and dropped with an error log.
pub struct RetryingHandler<F> {
    topic: String,
    delay: Duration,
    coordinator: Arc<RetryCoordinator>,
    process: F,
}

impl<F> RetryingHandler<F>
where
    F: Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
{
    pub fn new(
        topic: impl Into<String>,
        delay: Duration,
        coordinator: Arc<RetryCoordinator>,
        process: F,
    ) -> Self {
        Self {
            topic: topic.into(),
            delay,
            coordinator,
            process,
        }
    }
}

impl<F> RecordHandler for RetryingHandler<F>
where
    F: Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, envelope: Envelope) -> Disposition {
        let attempt = headers::retry_count(&envelope.headers).unwrap_or_default();

        match (self.process)(&envelope) {
            Ok(()) => {
                debug!(topic = %self.topic, key = %envelope.key, attempt, "Message processed");
            }
            Err(e) => {
                warn!(
                    topic = %self.topic,
                    key = %envelope.key,
                    attempt,
                    error = %e,
                    "Processing failed, scheduling retry"
                );
                if let Err(e) = self
                    .coordinator
                    .schedule_retry(self.delay, &self.topic, &envelope)
                {
                    error!(
                        topic = %self.topic,
                        key = %envelope.key,
                        error = %e,
                        "Could not schedule retry, dropping message"
                    );
                }
            }
        }

        Disposition::Acknowledge
    }
}
