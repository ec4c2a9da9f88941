// src/serialization/mod.rs
//! State serialization for migration and checkpointing

pub mod codec;
pub mod compressor;

pub use codec::{JsonCodec, StateCodec, ZstdCodec};
pub use compressor::{CompressionLevel, Compressor};
