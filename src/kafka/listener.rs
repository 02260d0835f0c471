use crate::kafka::Envelope;
use crate::{Config, Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message, TopicPartitionList};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// What a handler decided about a polled record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Commit the record's offset.
    Acknowledge,
    /// Leave the record uncommitted; it is polled again after the next restart.
    Hold,
}

/// Per-record callback of a [`ListenerContainer`].
///
/// Runs on the partition's delivery path, so it must not block beyond its
/// own processing.
pub trait RecordHandler: Send + Sync + 'static {
    fn handle(&self, envelope: Envelope) -> Disposition;
}

/// A consumer that can be bounced to force a fresh poll cycle.
pub trait Restartable: Send + Sync + 'static {
    fn id(&self) -> &str;
    fn is_running(&self) -> bool;
    fn restart(&self) -> BoxFuture<'static, Result<()>>;
}

#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub id: String,
    pub topic: String,
    pub group_id: String,
    pub bootstrap_servers: String,
    pub session_timeout_ms: u64,
}

impl ListenerSettings {
    pub fn new(
        id: impl Into<String>,
        topic: impl Into<String>,
        group_id: impl Into<String>,
        config: &Config,
    ) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            group_id: group_id.into(),
            bootstrap_servers: config.bootstrap_servers(),
            session_timeout_ms: config.kafka.session_timeout_ms,
        }
    }
}

/// One consumer-group subscription on one topic, with a start/stop lifecycle.
///
/// Offsets are committed only for records the handler acknowledges. A held
/// record pauses its partition until the container is restarted, so the
/// group's committed offset never moves past it; restarting rejoins the group
/// from that offset and the record is polled again.
#[derive(Clone)]
pub struct ListenerContainer {
    inner: Arc<Inner>,
}

struct Inner {
    settings: ListenerSettings,
    handler: Arc<dyn RecordHandler>,
    running: Mutex<Option<Running>>,
    running_flag: Arc<AtomicBool>,
}

struct Running {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerContainer {
    pub fn new(settings: ListenerSettings, handler: Arc<dyn RecordHandler>) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                handler,
                running: Mutex::new(None),
                running_flag: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    pub fn settings(&self) -> &ListenerSettings {
        &self.inner.settings
    }

    pub fn is_running(&self) -> bool {
        self.inner.running_flag.load(Ordering::SeqCst)
    }

    /// Subscribes and starts polling. Starting a running container is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.inner.running.lock().await;
        self.start_locked(&mut running)
    }

    /// Stops polling after the in-flight record (and its commit) completes.
    pub async fn stop(&self) {
        let mut running = self.inner.running.lock().await;
        self.stop_locked(&mut running).await;
    }

    pub async fn restart(&self) -> Result<()> {
        let mut running = self.inner.running.lock().await;
        self.stop_locked(&mut running).await;
        self.start_locked(&mut running)
    }

    fn start_locked(&self, running: &mut Option<Running>) -> Result<()> {
        if let Some(current) = running.as_ref() {
            if !current.task.is_finished() {
                debug!(listener = %self.inner.settings.id, "Listener already running");
                return Ok(());
            }
            warn!(listener = %self.inner.settings.id, "Replacing exited listener task");
            *running = None;
        }

        let settings = &self.inner.settings;
        let consumer = create_consumer(settings)?;
        let token = CancellationToken::new();
        self.inner.running_flag.store(true, Ordering::SeqCst);
        let poll = tokio::spawn(poll_loop(
            consumer,
            settings.id.clone(),
            Arc::clone(&self.inner.handler),
            token.clone(),
        ));
        let task = supervise(
            poll,
            settings.id.clone(),
            Arc::clone(&self.inner.running_flag),
        );

        *running = Some(Running { token, task });
        info!(
            listener = %settings.id,
            topic = %settings.topic,
            group = %settings.group_id,
            "Listener started"
        );
        Ok(())
    }

    async fn stop_locked(&self, running: &mut Option<Running>) {
        let Some(Running { token, task }) = running.take() else {
            return;
        };

        token.cancel();
        if let Err(e) = task.await {
            error!(listener = %self.inner.settings.id, error = %e, "Listener task failed");
        }
        self.inner.running_flag.store(false, Ordering::SeqCst);
        info!(listener = %self.inner.settings.id, "Listener stopped");
    }
}

impl Restartable for ListenerContainer {
    fn id(&self) -> &str {
        &self.inner.settings.id
    }

    fn is_running(&self) -> bool {
        ListenerContainer::is_running(self)
    }

    fn restart(&self) -> BoxFuture<'static, Result<()>> {
        let this = self.clone();
        async move { ListenerContainer::restart(&this).await }.boxed()
    }
}

/// Awaits the poll task and clears `running` once it exits, whether it was
/// stopped or its handler panicked.
fn supervise(poll: JoinHandle<()>, id: String, running: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = poll.await {
            error!(listener = %id, error = %e, "Listener poll task died");
        }
        running.store(false, Ordering::SeqCst);
    })
}

/// Waits out a poll error. `false` when cancelled meanwhile.
async fn pause_after_error(token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => true,
    }
}

fn create_consumer(settings: &ListenerSettings) -> Result<StreamConsumer> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &settings.bootstrap_servers)
        .set("group.id", &settings.group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .set("session.timeout.ms", settings.session_timeout_ms.to_string())
        .create()
        .map_err(Error::Kafka)?;

    consumer
        .subscribe(&[settings.topic.as_str()])
        .map_err(Error::Kafka)?;

    Ok(consumer)
}

#[instrument(skip_all, fields(listener = %id))]
async fn poll_loop(
    consumer: StreamConsumer,
    id: String,
    handler: Arc<dyn RecordHandler>,
    token: CancellationToken,
) {
    let mut held: HashSet<(String, i32)> = HashSet::new();

    loop {
        let message = tokio::select! {
            _ = token.cancelled() => break,
            message = consumer.recv() => message,
        };

        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Error while polling");
                if !pause_after_error(&token).await {
                    break;
                }
                continue;
            }
        };

        let partition = (message.topic().to_string(), message.partition());
        if held.contains(&partition) {
            continue;
        }

        let envelope = Envelope::from_message(&message);
        match handler.handle(envelope) {
            Disposition::Acknowledge => {
                if let Err(e) = consumer.commit_message(&message, CommitMode::Sync) {
                    error!(
                        topic = %partition.0,
                        partition = partition.1,
                        offset = message.offset(),
                        error = %e,
                        "Failed to commit offset"
                    );
                }
            }
            Disposition::Hold => {
                debug!(
                    topic = %partition.0,
                    partition = partition.1,
                    offset = message.offset(),
                    "Holding partition until next restart"
                );
                let mut tpl = TopicPartitionList::new();
                tpl.add_partition(&partition.0, partition.1);
                if let Err(e) = consumer.pause(&tpl) {
                    warn!(error = %e, "Failed to pause partition");
                }
                held.insert(partition);
            }
        }
    }

    consumer.unsubscribe();
}
