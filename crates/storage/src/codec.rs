//! Record serialization.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreResult;

/// Turns records into stored bytes and back.
pub trait Codec: Send + Sync + 'static {
    fn encode<T: Serialize>(&self, value: &T) -> StoreResult<Vec<u8>>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> StoreResult<T>;
}

/// JSON, the default encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> StoreResult<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
