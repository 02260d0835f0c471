use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::kafka::Restartable;
use crate::Result;

/// Restarts `target` in the background if it is currently running.
///
/// Returns the restart task, or `None` when the target was stopped and
/// nothing was done. The caller is never blocked on the restart itself.
pub fn restart_if_running(target: Arc<dyn Restartable>) -> Option<JoinHandle<()>> {
    if !target.is_running() {
        debug!(listener = target.id(), "Listener not running, skipping restart");
        return None;
    }

    info!(listener = target.id(), "Restarting listener");
    let id = target.id().to_string();
    let restart = target.restart();
    Some(tokio::spawn(async move {
        if let Err(e) = restart.await {
            error!(listener = %id, error = %e, "Listener restart failed");
        }
    }))
}

/// Periodically bounces the retry listener so held records are polled again.
///
/// The cron expression has six fields with seconds first
/// (`0 0 0 * * *` is daily at midnight) and is evaluated in UTC.
pub struct RedeliveryScheduler {
    schedule: Schedule,
    target: Arc<dyn Restartable>,
}

impl RedeliveryScheduler {
    pub fn new(expression: &str, target: Arc<dyn Restartable>) -> Result<Self> {
        let schedule = Schedule::from_str(expression)?;
        Ok(Self { schedule, target })
    }

    pub fn next_fire_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(after).next()
    }

    /// One scheduler step: restart the target if it is running.
    pub fn tick(&self) -> Option<JoinHandle<()>> {
        restart_if_running(Arc::clone(&self.target))
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let Some(next) = self.next_fire_after(&now) else {
                    warn!("Redelivery schedule has no upcoming fire time");
                    break;
                };
                let wait = (next - now).to_std().unwrap_or_default();
                debug!(
                    listener = self.target.id(),
                    next = %next,
                    "Next listener restart scheduled"
                );

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {
                        // Restart handle is detached.
                        let _ = self.tick();
                    }
                }
            }
            debug!("Redelivery scheduler stopped");
        })
    }
}
