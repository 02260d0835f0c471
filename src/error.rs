//! Error types and result handling for kafka-helper.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use kafka_helper::{Error, Result};
//!
//! fn read_retry_count(raw: &str) -> Result<u32> {
//!     raw.parse().map_err(|e| Error::MalformedMetadata {
//!         header: "retryCount".to_string(),
//!         reason: format!("{}", e),
//!     })
//! }
//!
//! match read_retry_count("two") {
//!     Ok(count) => println!("retry #{}", count),
//!     Err(Error::MalformedMetadata { header, .. }) => eprintln!("bad header {}", header),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for kafka-helper operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, from the config file, environment or validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka client, producer or consumer error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// JSON serialization error when encoding change events.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Retry metadata headers are missing or unparseable.
    ///
    /// Messages failing with this error on the retry topic are left
    /// unacknowledged and will be redelivered on every restart.
    #[error("Malformed retry metadata in header '{header}': {reason}")]
    MalformedMetadata {
        /// Header key that failed to decode
        header: String,
        /// What was wrong with it
        reason: String,
    },

    /// A change event could not be attributed to an entity instance.
    #[error("Identifier field '{field}' has no value in entity {entity}")]
    MissingIdentifier {
        /// Display name of the entity
        entity: String,
        /// Name of the identifier property
        field: String,
    },

    /// The broker rejected a send.
    #[error("Failed to publish to '{topic}': {reason}")]
    PublishFailure {
        /// Destination topic
        topic: String,
        /// Broker or client error text
        reason: String,
    },

    /// A snapshot value could not be applied to an entity field.
    #[error("Invalid value for field '{field}': {reason}")]
    InvalidField {
        /// Property name
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Invalid cron expression for the redelivery scheduler.
    #[error("Schedule error: {0}")]
    Schedule(#[from] cron::error::Error),

    /// Listener container lifecycle error.
    #[error("Listener error: {message}")]
    Listener {
        /// Description of the listener failure
        message: String,
    },
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

/// A convenient Result type alias for kafka-helper operations.
///
/// This is equivalent to `std::result::Result<T, kafka_helper::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
