//! Administrative request and response bodies

use serde::{Deserialize, Serialize};

use super::key::ResourceKey;
use crate::error::{Error, Result};

/// Body of `/in-progress` and `/delete`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminRequest {
    /// Absolute upstream URL of the resource
    pub url: String,
}

impl AdminRequest {
    /// Build a request for `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Decode a JSON body and resolve its target key
    pub fn parse_key(body: &[u8]) -> Result<ResourceKey> {
        let request: AdminRequest = serde_json::from_slice(body)
            .map_err(|e| Error::MalformedAdminRequest(format!("expected {{\"url\": ...}}: {e}")))?;
        ResourceKey::parse(&request.url)
            .map_err(|e| Error::MalformedAdminRequest(e.to_string()))
    }
}

/// Answer of `/delete`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeOutcome {
    /// Whether the state was cleared
    pub success: bool,
    /// Human-readable message
    pub message: String,
}

impl PurgeOutcome {
    /// Successful purge
    pub fn cleared() -> Self {
        Self {
            success: true,
            message: "Storage cleared".to_string(),
        }
    }
}
