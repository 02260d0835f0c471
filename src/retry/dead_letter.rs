use tracing::{error, warn};

use crate::kafka::{Disposition, Envelope, RecordHandler};
use crate::retry::headers::{format_timestamp, RetryMetadata};

/// Dead-letter listener that writes one audit line per exhausted record.
///
/// The dead-letter topic is the durable record of permanent failures; this
/// handler only makes them visible in the logs. Records are always
/// acknowledged, malformed or not.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadLetterAuditor;

impl RecordHandler for DeadLetterAuditor {
    fn handle(&self, envelope: Envelope) -> Disposition {
        match RetryMetadata::decode(&envelope.headers) {
            Ok(metadata) => warn!(
                key = %envelope.key,
                retry_count = metadata.retry_count,
                created_at = %format_timestamp(&metadata.created_at),
                execution_at = %format_timestamp(&metadata.execution_at),
                target_topic = %metadata.target_topic,
                "Dead letter"
            ),
            Err(e) => error!(key = %envelope.key, error = %e, "Dead letter without retry metadata"),
        }
        Disposition::Acknowledge
    }
}
