// src/serialization/codec.rs
//! State codecs
//!
//! An active object's state is first captured as a JSON [`Value`]
//! (through its serde impls), then turned into bytes by a [`StateCodec`]
//! for migration packets and checkpoints.

use crate::serialization::compressor::{CompressionLevel, Compressor};
use crate::utils::errors::CodecError;
use serde_json::Value;
use std::fmt;

/// Encodes captured object state to bytes and back
pub trait StateCodec: Send + Sync + fmt::Debug {
    /// Short name, for logs
    fn name(&self) -> &'static str;

    fn encode(&self, state: &Value) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

/// Plain JSON bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl StateCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, state: &Value) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(state).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// JSON compressed with zstd
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdCodec {
    compressor: Compressor,
}

impl ZstdCodec {
    pub fn new(level: CompressionLevel) -> Self {
        Self {
            compressor: Compressor::new(level),
        }
    }
}

impl StateCodec for ZstdCodec {
    fn name(&self) -> &'static str {
        "json+zstd"
    }

    fn encode(&self, state: &Value) -> Result<Vec<u8>, CodecError> {
        let raw = JsonCodec.encode(state)?;
        self.compressor
            .compress(&raw)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        let raw = self
            .compressor
            .decompress(bytes)
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        JsonCodec.decode(&raw)
    }
}
