use bytes::Bytes;
use rdkafka::message::{Header, Headers, OwnedHeaders};
use rdkafka::Message;
use std::collections::BTreeMap;

/// The unit moved between primary, retry and dead-letter topics.
///
/// The payload is opaque to the retry machinery; headers are the only
/// channel for retry metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    pub key: String,
    pub payload: Bytes,
    pub headers: BTreeMap<String, String>,
}

impl Envelope {
    pub fn new(key: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Builds an envelope from a consumed record.
    ///
    /// Header values are decoded as UTF-8 (lossy); headers without a value
    /// are skipped. A missing key becomes the empty string.
    pub fn from_message<M: Message>(message: &M) -> Self {
        let key = message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default();

        let payload = message
            .payload()
            .map(Bytes::copy_from_slice)
            .unwrap_or_default();

        let mut headers = BTreeMap::new();
        if let Some(record_headers) = message.headers() {
            for header in record_headers.iter() {
                if let Some(value) = header.value {
                    headers.insert(
                        header.key.to_string(),
                        String::from_utf8_lossy(value).into_owned(),
                    );
                }
            }
        }

        Self {
            key,
            payload,
            headers,
        }
    }

    pub fn owned_headers(&self) -> OwnedHeaders {
        self.headers
            .iter()
            .fold(OwnedHeaders::new_with_capacity(self.headers.len()), |acc, (k, v)| {
                acc.insert(Header {
                    key: k.as_str(),
                    value: Some(v.as_bytes()),
                })
            })
    }
}
