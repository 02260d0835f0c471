use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capture::{ChangeCapture, EntityTopicRegistry};
use crate::kafka::{Envelope, KafkaProducer, ListenerContainer, ListenerSettings, Publisher};
use crate::retry::{
    Clock, DeadLetterAuditor, RedeliveryScheduler, RetryCoordinator, RetrySettings,
    RetryingHandler, SystemClock,
};
use crate::{Config, Error, Result};

pub const RETRY_LISTENER_ID: &str = "retryContainer";
pub const DEAD_LETTER_LISTENER_ID: &str = "deadContainer";

/// Wires the retry machinery from one [`Config`].
///
/// Owns the shared publisher, the [`RetryCoordinator`], the retry-topic
/// listener and, when both `deadTopic` and `deadGroup` are set, a
/// [`DeadLetterAuditor`] listener. Application code obtains primary-topic
/// listeners and change capture from here so everything shares one producer.
pub struct Relay {
    config: Config,
    publisher: Arc<dyn Publisher>,
    coordinator: Arc<RetryCoordinator>,
    retry_listener: ListenerContainer,
    dead_letter_listener: Option<ListenerContainer>,
}

impl Relay {
    pub fn new(config: Config) -> Result<Self> {
        let producer = KafkaProducer::new(&config.kafka.brokers, &config.kafka)?;
        Ok(Self::with_publisher(config, Arc::new(producer), Arc::new(SystemClock)))
    }

    pub fn with_publisher(
        config: Config,
        publisher: Arc<dyn Publisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let helper = &config.helper;
        let coordinator = Arc::new(RetryCoordinator::new(
            RetrySettings::from(helper),
            Arc::clone(&publisher),
            clock,
        ));

        let retry_listener = ListenerContainer::new(
            ListenerSettings::new(
                RETRY_LISTENER_ID,
                helper.retry_topic.clone(),
                helper.retry_group.clone(),
                &config,
            ),
            coordinator.clone(),
        );
        coordinator.attach_retry_listener(Arc::new(retry_listener.clone()));

        let dead_letter_listener = match (helper.dead_topic(), helper.dead_group.as_deref()) {
            (Some(topic), Some(group)) if !group.trim().is_empty() => Some(ListenerContainer::new(
                ListenerSettings::new(DEAD_LETTER_LISTENER_ID, topic, group, &config),
                Arc::new(DeadLetterAuditor),
            )),
            _ => None,
        };

        Self {
            config,
            publisher,
            coordinator,
            retry_listener,
            dead_letter_listener,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.helper.enabled
    }

    pub fn publisher(&self) -> Arc<dyn Publisher> {
        Arc::clone(&self.publisher)
    }

    pub fn coordinator(&self) -> Arc<RetryCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn retry_listener(&self) -> &ListenerContainer {
        &self.retry_listener
    }

    pub fn dead_letter_listener(&self) -> Option<&ListenerContainer> {
        self.dead_letter_listener.as_ref()
    }

    pub fn capture(&self, registry: EntityTopicRegistry) -> ChangeCapture {
        ChangeCapture::new(Arc::new(registry), self.publisher())
    }

    /// Listener for an application topic whose failures are scheduled for
    /// retry after `delay`. `None` when the helper is disabled.
    pub fn primary_listener<F>(
        &self,
        id: &str,
        topic: &str,
        group_id: &str,
        delay: Duration,
        process: F,
    ) -> Option<ListenerContainer>
    where
        F: Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if !self.is_enabled() {
            return None;
        }

        let handler = RetryingHandler::new(topic, delay, self.coordinator(), process);
        Some(ListenerContainer::new(
            ListenerSettings::new(id, topic, group_id, &self.config),
            Arc::new(handler),
        ))
    }

    /// Runs the retry listener, the redelivery scheduler and the dead-letter
    /// auditor until `token` is cancelled, then stops them.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        if !self.is_enabled() {
            warn!("Retry helper disabled, nothing to run");
            return Ok(());
        }

        let scheduler = RedeliveryScheduler::new(
            &self.config.helper.retry_cron_job,
            Arc::new(self.retry_listener.clone()),
        )?;

        self.retry_listener.start().await?;
        if let Some(listener) = &self.dead_letter_listener {
            if let Err(e) = listener.start().await {
                self.retry_listener.stop().await;
                return Err(e);
            }
        }

        let scheduler_handle = scheduler.spawn(token.child_token());
        info!(
            retry_topic = %self.config.helper.retry_topic,
            dead_topic = ?self.config.helper.dead_topic(),
            cron = %self.config.helper.retry_cron_job,
            "Relay running"
        );

        token.cancelled().await;
        info!("Relay shutting down");

        if let Err(e) = scheduler_handle.await {
            return Err(Error::Listener {
                message: format!("redelivery scheduler task failed: {}", e),
            });
        }
        self.retry_listener.stop().await;
        if let Some(listener) = &self.dead_letter_listener {
            listener.stop().await;
        }

        info!("Relay stopped");
        Ok(())
    }
}
