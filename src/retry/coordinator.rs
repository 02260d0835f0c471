use chrono::NaiveDateTime;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::HelperConfig;
use crate::kafka::{DeliveryHandle, Disposition, Envelope, Publisher, RecordHandler, Restartable};
use crate::retry::headers::{self, RetryMetadata};
use crate::retry::scheduler::restart_if_running;
use crate::retry::Clock;
use crate::{Error, Result};

/// Routing settings of the coordinator.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub retry_topic: String,
    pub dead_topic: Option<String>,
    pub max_retry_count: u32,
}

impl From<&HelperConfig> for RetrySettings {
    fn from(config: &HelperConfig) -> Self {
        Self {
            retry_topic: config.retry_topic.clone(),
            dead_topic: config.dead_topic().map(str::to_string),
            max_retry_count: config.max_retry_count,
        }
    }
}

/// Result of inspecting one record polled from the retry topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// `executionTime` has not passed yet.
    NotDue { execution_at: NaiveDateTime },
    /// Headers missing or unparseable.
    Malformed { reason: String },
    /// Republished unchanged to its target topic.
    Retried { topic: String, retry_count: u32 },
    /// Retry budget exhausted, moved to the dead-letter topic.
    DeadLettered { topic: String, retry_count: u32 },
    /// Retry budget exhausted and no dead-letter topic configured.
    Dropped { retry_count: u32 },
}

impl RetryOutcome {
    pub fn disposition(&self) -> Disposition {
        match self {
            RetryOutcome::NotDue { .. } | RetryOutcome::Malformed { .. } => Disposition::Hold,
            RetryOutcome::Retried { .. }
            | RetryOutcome::DeadLettered { .. }
            | RetryOutcome::Dropped { .. } => Disposition::Acknowledge,
        }
    }
}

/// Decides whether a failed record is rescheduled, redelivered or
/// dead-lettered.
///
/// Each retry attempt is an independent record moving through
/// `Fresh -> Scheduled -> {Due-Retry, Due-Dead}`:
///
/// - [`schedule_retry`](Self::schedule_retry) is the `Fresh -> Scheduled`
///   transition: the record goes to the retry topic with incremented metadata.
/// - [`on_retry_topic_message`](Self::on_retry_topic_message) runs for every
///   poll of the retry topic. Records that are not yet due are held and seen
///   again after the next listener restart; due records go back to their
///   target topic, or to the dead-letter topic once `retryCount` exceeds
///   `maxRetryCount`.
pub struct RetryCoordinator {
    settings: RetrySettings,
    publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
    retry_listener: OnceLock<Arc<dyn Restartable>>,
}

impl RetryCoordinator {
    pub fn new(
        settings: RetrySettings,
        publisher: Arc<dyn Publisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            publisher,
            clock,
            retry_listener: OnceLock::new(),
        }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// Attaches the retry-topic listener so that a successful
    /// [`schedule_retry`](Self::schedule_retry) restarts it once the delay
    /// has elapsed. Only the first call has an effect.
    pub fn attach_retry_listener(&self, listener: Arc<dyn Restartable>) {
        if self.retry_listener.set(listener).is_err() {
            warn!("Retry listener already attached");
        }
    }

    /// Sends `envelope` to the retry topic, due after `delay`.
    ///
    /// `envelope.headers` are the prior headers: a missing `retryCount` means
    /// this is the first failure. `original_topic` is recorded as the target
    /// the record returns to once due.
    pub fn schedule_retry(
        &self,
        delay: Duration,
        original_topic: &str,
        envelope: &Envelope,
    ) -> Result<DeliveryHandle> {
        let now = self.clock.now();
        let retry_count = headers::retry_count(&envelope.headers)?;
        let created_at = if retry_count > 0 {
            headers::created_at(&envelope.headers)?
        } else {
            now
        };
        let next_count = retry_count.checked_add(1).ok_or_else(|| Error::MalformedMetadata {
            header: headers::RETRY_COUNT.to_string(),
            reason: format!("{} cannot be incremented", retry_count),
        })?;
        let delay = chrono::Duration::from_std(delay).map_err(|e| Error::InvalidField {
            field: "delay".to_string(),
            reason: e.to_string(),
        })?;
        let execution_at = now.checked_add_signed(delay).ok_or_else(|| Error::InvalidField {
            field: "delay".to_string(),
            reason: "execution time out of range".to_string(),
        })?;

        let metadata = RetryMetadata {
            created_at,
            execution_at,
            retry_count: next_count,
            target_topic: original_topic.to_string(),
        };

        let mut scheduled = envelope.clone();
        metadata.write_to(&mut scheduled.headers);

        info!(
            topic = %self.settings.retry_topic,
            key = %envelope.key,
            retry_count = metadata.retry_count,
            execution_at = %headers::format_timestamp(&metadata.execution_at),
            "Scheduling retry"
        );

        let handle = self.publisher.send(&self.settings.retry_topic, scheduled);
        Ok(match self.retry_listener.get() {
            Some(listener) => restart_after_delivery(handle, Arc::clone(listener), delay),
            None => handle,
        })
    }

    /// Inspects one record polled from the retry topic.
    pub fn on_retry_topic_message(&self, envelope: &Envelope) -> RetryOutcome {
        let metadata = match RetryMetadata::decode(&envelope.headers) {
            Ok(metadata) => metadata,
            Err(e) => {
                error!(key = %envelope.key, error = %e, "Malformed record on retry topic");
                return RetryOutcome::Malformed {
                    reason: e.to_string(),
                };
            }
        };

        let now = self.clock.now();
        if now <= metadata.execution_at {
            debug!(
                key = %envelope.key,
                retry_count = metadata.retry_count,
                execution_at = %headers::format_timestamp(&metadata.execution_at),
                "Retry not due yet"
            );
            return RetryOutcome::NotDue {
                execution_at: metadata.execution_at,
            };
        }

        if metadata.retry_count > self.settings.max_retry_count {
            return self.dead_letter(envelope, metadata, now);
        }

        info!(
            topic = %metadata.target_topic,
            key = %envelope.key,
            retry_count = metadata.retry_count,
            "Retrying message"
        );
        let _ = self.publisher.send(&metadata.target_topic, envelope.clone());
        RetryOutcome::Retried {
            topic: metadata.target_topic,
            retry_count: metadata.retry_count,
        }
    }

    fn dead_letter(
        &self,
        envelope: &Envelope,
        metadata: RetryMetadata,
        now: NaiveDateTime,
    ) -> RetryOutcome {
        let retry_count = metadata.retry_count;
        let Some(dead_topic) = self.settings.dead_topic.clone() else {
            error!(
                key = %envelope.key,
                retry_count,
                max_retry_count = self.settings.max_retry_count,
                "Maximum retry count reached and dead topic is not configured"
            );
            return RetryOutcome::Dropped { retry_count };
        };

        let final_metadata = RetryMetadata {
            execution_at: now,
            ..metadata
        };
        let mut dead = envelope.clone();
        final_metadata.write_to(&mut dead.headers);

        warn!(
            topic = %dead_topic,
            key = %envelope.key,
            retry_count,
            target_topic = %final_metadata.target_topic,
            "Retries exhausted, dead-lettering message"
        );
        let _ = self.publisher.send(&dead_topic, dead);
        RetryOutcome::DeadLettered {
            topic: dead_topic,
            retry_count,
        }
    }
}

impl RecordHandler for RetryCoordinator {
    fn handle(&self, envelope: Envelope) -> Disposition {
        self.on_retry_topic_message(&envelope).disposition()
    }
}

// Restarts the retry listener `delay` after the scheduled record landed, so
// short delays don't wait for the next cron tick.
fn restart_after_delivery(
    handle: DeliveryHandle,
    listener: Arc<dyn Restartable>,
    delay: chrono::Duration,
) -> DeliveryHandle {
    tokio::spawn(async move {
        let delivery = match handle.await {
            Ok(result) => result?,
            Err(e) => {
                return Err(Error::Listener {
                    message: format!("retry send task failed: {}", e),
                })
            }
        };

        let wait = delay.to_std().unwrap_or_default();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            restart_if_running(listener);
        });

        Ok::<_, Error>(delivery)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::InMemoryPublisher;
    use crate::retry::headers::{CREATED_TIME, EXECUTION_TIME, RETRY_COUNT, TARGET_TOPIC};
    use crate::retry::ManualClock;
    use chrono::Duration as ChronoDuration;

    const CUSTOMER_TOPIC: &str = "customer-topic";
    const RETRY_TOPIC: &str = "customer-retry-topic";
    const DEAD_TOPIC: &str = "customer-dead-topic";

    fn t0() -> NaiveDateTime {
        headers::parse_timestamp("test", "2024-03-01T10:00:00").unwrap()
    }

    fn setup(dead_topic: Option<&str>) -> (RetryCoordinator, InMemoryPublisher, Arc<ManualClock>) {
        let publisher = InMemoryPublisher::new();
        let clock = Arc::new(ManualClock::new(t0()));
        let coordinator = RetryCoordinator::new(
            RetrySettings {
                retry_topic: RETRY_TOPIC.to_string(),
                dead_topic: dead_topic.map(str::to_string),
                max_retry_count: 5,
            },
            Arc::new(publisher.clone()),
            clock.clone(),
        );
        (coordinator, publisher, clock)
    }

    fn scheduled(retry_count: u32, execution_at: NaiveDateTime) -> Envelope {
        let mut envelope = Envelope::new("customer1", "{\"id\":1,\"name\":\"customer1\"}");
        RetryMetadata {
            created_at: t0(),
            execution_at,
            retry_count,
            target_topic: CUSTOMER_TOPIC.to_string(),
        }
        .write_to(&mut envelope.headers);
        envelope
    }

    #[tokio::test]
    async fn test_first_retry_starts_count_at_one() {
        let (coordinator, publisher, _clock) = setup(Some(DEAD_TOPIC));
        let original = Envelope::new("customer1", "payload");

        coordinator
            .schedule_retry(Duration::from_secs(60), CUSTOMER_TOPIC, &original)
            .unwrap()
            .await
            .unwrap()
            .unwrap();

        let sent = publisher.sent_to(RETRY_TOPIC);
        assert_eq!(sent.len(), 1);
        let metadata = RetryMetadata::decode(&sent[0].headers).unwrap();
        assert_eq!(metadata.retry_count, 1);
        assert_eq!(metadata.created_at, t0());
        assert_eq!(metadata.execution_at, t0() + ChronoDuration::seconds(60));
        assert_eq!(metadata.target_topic, CUSTOMER_TOPIC);
        assert_eq!(sent[0].key, "customer1");
        assert_eq!(sent[0].payload, original.payload);
    }

    #[tokio::test]
    async fn test_rescheduling_increments_count_and_keeps_created_time() {
        let (coordinator, publisher, clock) = setup(Some(DEAD_TOPIC));
        clock.advance(ChronoDuration::minutes(30));
        let now = clock.now();
        let redelivered = scheduled(3, t0() + ChronoDuration::minutes(20));

        let _ =
            coordinator.schedule_retry(Duration::from_millis(1500), CUSTOMER_TOPIC, &redelivered);

        let metadata = RetryMetadata::decode(&publisher.sent_to(RETRY_TOPIC)[0].headers).unwrap();
        assert_eq!(metadata.retry_count, 4);
        assert_eq!(metadata.created_at, t0());
        assert_eq!(metadata.execution_at, now + ChronoDuration::milliseconds(1500));
    }

    #[tokio::test]
    async fn test_zero_delay_schedules_at_now() {
        let (coordinator, publisher, _clock) = setup(None);

        let original = Envelope::new("k", "v");
        let _ = coordinator.schedule_retry(Duration::ZERO, CUSTOMER_TOPIC, &original);

        let metadata = RetryMetadata::decode(&publisher.sent_to(RETRY_TOPIC)[0].headers).unwrap();
        assert_eq!(metadata.execution_at, t0());
    }

    #[tokio::test]
    async fn test_schedule_keeps_unrelated_headers() {
        let (coordinator, publisher, _clock) = setup(None);
        let original = Envelope::new("k", "v").with_header("traceparent", "00-abc-01");

        let _ = coordinator.schedule_retry(Duration::from_secs(1), CUSTOMER_TOPIC, &original);

        let sent = &publisher.sent_to(RETRY_TOPIC)[0];
        assert_eq!(sent.header("traceparent"), Some("00-abc-01"));
        assert_eq!(sent.header(RETRY_COUNT), Some("1"));
    }

    #[tokio::test]
    async fn test_schedule_rejects_garbled_retry_count() {
        let (coordinator, publisher, _clock) = setup(None);
        let original = Envelope::new("k", "v").with_header(RETRY_COUNT, "many");

        let result =
            coordinator.schedule_retry(Duration::from_secs(1), CUSTOMER_TOPIC, &original);
        assert!(matches!(result, Err(Error::MalformedMetadata { .. })));
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_rejects_exhausted_counter() {
        let (coordinator, publisher, _clock) = setup(None);
        let original = Envelope::new("k", "v")
            .with_header(RETRY_COUNT, u32::MAX.to_string())
            .with_header(CREATED_TIME, "2024-03-01T09:00:00");

        let result =
            coordinator.schedule_retry(Duration::from_secs(1), CUSTOMER_TOPIC, &original);
        assert!(matches!(
            result,
            Err(Error::MalformedMetadata { header, .. }) if header == RETRY_COUNT
        ));
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_rejects_delay_past_calendar_range() {
        let (coordinator, publisher, _clock) = setup(None);
        let original = Envelope::new("k", "v");

        let result = coordinator.schedule_retry(
            Duration::from_secs(10_000_000_000_000),
            CUSTOMER_TOPIC,
            &original,
        );
        assert!(matches!(
            result,
            Err(Error::InvalidField { field, .. }) if field == "delay"
        ));
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_requires_created_time_after_first_retry() {
        let (coordinator, _publisher, _clock) = setup(None);
        let original = Envelope::new("k", "v").with_header(RETRY_COUNT, "2");

        let result =
            coordinator.schedule_retry(Duration::from_secs(1), CUSTOMER_TOPIC, &original);
        assert!(matches!(
            result,
            Err(Error::MalformedMetadata { header, .. }) if header == CREATED_TIME
        ));
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported_through_handle() {
        let (coordinator, publisher, _clock) = setup(None);
        publisher.fail_topic(RETRY_TOPIC);

        let handle = coordinator
            .schedule_retry(Duration::from_secs(1), CUSTOMER_TOPIC, &Envelope::new("k", "v"))
            .unwrap();
        assert!(matches!(handle.await.unwrap(), Err(Error::PublishFailure { .. })));
    }

    #[tokio::test]
    async fn test_execution_time_boundary_is_exclusive() {
        let (coordinator, publisher, clock) = setup(Some(DEAD_TOPIC));
        let execution_at = t0() + ChronoDuration::seconds(1);
        let envelope = scheduled(1, execution_at);

        clock.set(execution_at);
        assert_eq!(
            coordinator.on_retry_topic_message(&envelope),
            RetryOutcome::NotDue { execution_at }
        );
        assert!(publisher.sent().is_empty());

        clock.advance(ChronoDuration::milliseconds(1));
        assert_eq!(
            coordinator.on_retry_topic_message(&envelope),
            RetryOutcome::Retried {
                topic: CUSTOMER_TOPIC.to_string(),
                retry_count: 1
            }
        );
    }

    #[tokio::test]
    async fn test_due_record_republished_unchanged() {
        let (coordinator, publisher, clock) = setup(Some(DEAD_TOPIC));
        let envelope = scheduled(5, t0());
        clock.advance(ChronoDuration::seconds(1));

        let outcome = coordinator.on_retry_topic_message(&envelope);

        assert_eq!(outcome.disposition(), Disposition::Acknowledge);
        assert_eq!(publisher.sent_to(CUSTOMER_TOPIC), vec![envelope]);
        assert!(publisher.sent_to(DEAD_TOPIC).is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_record_goes_to_dead_topic() {
        let (coordinator, publisher, clock) = setup(Some(DEAD_TOPIC));
        let envelope = scheduled(6, t0());
        clock.advance(ChronoDuration::seconds(5));
        let now = clock.now();

        let outcome = coordinator.on_retry_topic_message(&envelope);
        assert_eq!(
            outcome,
            RetryOutcome::DeadLettered {
                topic: DEAD_TOPIC.to_string(),
                retry_count: 6
            }
        );

        let dead = publisher.sent_to(DEAD_TOPIC);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].key, envelope.key);
        assert_eq!(dead[0].payload, envelope.payload);
        let metadata = RetryMetadata::decode(&dead[0].headers).unwrap();
        assert_eq!(metadata.retry_count, 6);
        assert_eq!(metadata.created_at, t0());
        assert_eq!(metadata.execution_at, now);
        assert_eq!(metadata.target_topic, CUSTOMER_TOPIC);
        assert!(publisher.sent_to(CUSTOMER_TOPIC).is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_without_dead_topic_is_dropped() {
        let (coordinator, publisher, clock) = setup(None);
        clock.advance(ChronoDuration::seconds(5));

        let outcome = coordinator.on_retry_topic_message(&scheduled(6, t0()));

        assert_eq!(outcome, RetryOutcome::Dropped { retry_count: 6 });
        assert_eq!(outcome.disposition(), Disposition::Acknowledge);
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_record_is_held() {
        let (coordinator, publisher, _clock) = setup(Some(DEAD_TOPIC));
        for key in [CREATED_TIME, EXECUTION_TIME, RETRY_COUNT, TARGET_TOPIC] {
            let mut envelope = scheduled(1, t0());
            envelope.headers.remove(key);

            let outcome = coordinator.on_retry_topic_message(&envelope);
            assert!(matches!(outcome, RetryOutcome::Malformed { .. }), "missing {}", key);
            assert_eq!(outcome.disposition(), Disposition::Hold);
        }
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_record_handler_maps_outcomes() {
        let (coordinator, _publisher, clock) = setup(Some(DEAD_TOPIC));
        let envelope = scheduled(1, t0() + ChronoDuration::minutes(1));

        assert_eq!(coordinator.handle(envelope.clone()), Disposition::Hold);
        clock.advance(ChronoDuration::minutes(2));
        assert_eq!(coordinator.handle(envelope), Disposition::Acknowledge);
    }
}
