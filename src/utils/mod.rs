// src/utils/mod.rs
//! Shared utilities: the error taxonomy and layered configuration.

pub mod config;
pub mod errors;

pub use config::RuntimeConfig;
pub use errors::{ActiveError, Result};
