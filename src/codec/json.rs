//! A self-describing JSON codec, useful for debugging wire traffic by hand.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}
