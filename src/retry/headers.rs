//! Retry metadata carried in record headers.
//!
//! Four string headers travel with every scheduled or dead-lettered record.
//! Their names are fixed for interop with existing deployments:
//!
//! | header          | value                                   |
//! |-----------------|-----------------------------------------|
//! | `createdTime`   | first failure time, `2024-03-01T10:00:00.125` |
//! | `executionTime` | earliest time the record may be retried |
//! | `retryCount`    | decimal attempt counter, starts at `1`  |
//! | `targetTopic`   | original (non-retry) destination        |
//!
//! Timestamps are ISO-8601 local date-times without offset, read from the
//! UTC clock (see [`crate::retry::SystemClock`]).

use chrono::NaiveDateTime;
use std::collections::BTreeMap;

use crate::{Error, Result};

pub const CREATED_TIME: &str = "createdTime";
pub const EXECUTION_TIME: &str = "executionTime";
pub const RETRY_COUNT: &str = "retryCount";
pub const TARGET_TOPIC: &str = "targetTopic";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
// Minute precision, as emitted by some producers when seconds are zero.
const TIMESTAMP_FORMAT_SHORT: &str = "%Y-%m-%dT%H:%M";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryMetadata {
    pub created_at: NaiveDateTime,
    pub execution_at: NaiveDateTime,
    pub retry_count: u32,
    pub target_topic: String,
}

impl RetryMetadata {
    pub fn encode(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        self.write_to(&mut headers);
        headers
    }

    /// Writes the four retry headers, replacing any previous values and
    /// leaving unrelated headers in place.
    pub fn write_to(&self, headers: &mut BTreeMap<String, String>) {
        headers.insert(CREATED_TIME.to_string(), format_timestamp(&self.created_at));
        headers.insert(EXECUTION_TIME.to_string(), format_timestamp(&self.execution_at));
        headers.insert(RETRY_COUNT.to_string(), self.retry_count.to_string());
        headers.insert(TARGET_TOPIC.to_string(), self.target_topic.clone());
    }

    pub fn decode(headers: &BTreeMap<String, String>) -> Result<Self> {
        let created_at = parse_timestamp(CREATED_TIME, required(headers, CREATED_TIME)?)?;
        let execution_at = parse_timestamp(EXECUTION_TIME, required(headers, EXECUTION_TIME)?)?;
        let retry_count = parse_retry_count(required(headers, RETRY_COUNT)?)?;
        let target_topic = required(headers, TARGET_TOPIC)?;

        if target_topic.trim().is_empty() {
            return Err(malformed(TARGET_TOPIC, "empty topic name"));
        }

        Ok(Self {
            created_at,
            execution_at,
            retry_count,
            target_topic: target_topic.to_string(),
        })
    }
}

/// Retry count of a record that may never have been retried.
///
/// Absent means first failure and yields `0`; present but unparseable is
/// still an error.
pub fn retry_count(headers: &BTreeMap<String, String>) -> Result<u32> {
    match headers.get(RETRY_COUNT) {
        Some(raw) => parse_retry_count(raw),
        None => Ok(0),
    }
}

/// Creation time of a previously scheduled record.
pub fn created_at(headers: &BTreeMap<String, String>) -> Result<NaiveDateTime> {
    parse_timestamp(CREATED_TIME, required(headers, CREATED_TIME)?)
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(header: &str, raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT_SHORT))
        .map_err(|e| malformed(header, format!("'{}' is not a date-time: {}", raw, e)))
}

fn parse_retry_count(raw: &str) -> Result<u32> {
    raw.trim()
        .parse()
        .map_err(|e| malformed(RETRY_COUNT, format!("'{}' is not a count: {}", raw, e)))
}

fn required<'a>(headers: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
    headers
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| malformed(key, "header missing"))
}

fn malformed(header: &str, reason: impl Into<String>) -> Error {
    Error::MalformedMetadata {
        header: header.to_string(),
        reason: reason.into(),
    }
}
