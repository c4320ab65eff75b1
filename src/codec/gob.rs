//! The default binary codec: compact, fixed-shape encoding via `bincode`.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}
