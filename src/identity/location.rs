// src/identity/location.rs
//! Network location of a node

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Host and port of a node hosting bodies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub host: String,
    pub port: u16,
}

impl Location {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Location {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("missing port in location '{}'", s))?;
        if host.is_empty() {
            return Err(format!("missing host in location '{}'", s));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("bad port in location '{}': {}", s, e))?;
        Ok(Self::new(host, port))
    }
}
