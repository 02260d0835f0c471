use crate::Result;
use bytes::Bytes;
use serde::Serialize;

pub struct JsonSerializer;

impl JsonSerializer {
    pub fn serialize<T: Serialize>(event: &T) -> Result<Bytes> {
        serde_json::to_vec(event).map(Bytes::from).map_err(Into::into)
    }
}
