//! Companion-side connectors for WearLog
//!
//! ## Overview
//!
//! The device hands rotated log files to the companion over the transfer
//! link. This crate moves them on to a remote HTTP endpoint and reports each
//! outcome back so the device can mark the file as delivered:
//!
//! ```text
//! Inbox ──pop──→ RelayClient ──POST text/csv──→ upload endpoint
//!   ↑                 │                               │
//!   └──── report ─────┘ ←──── {success, response} ────┘
//! ```
//!
//! - [`http`]: blocking uploader on `ureq`, with optional authentication
//! - [`relay`]: [`relay::RelayClient`] and its `tokio` wake daemon
//! - [`server`]: reference upload endpoint on `tiny_http`
//!
//! ## Wire format
//!
//! One request per file:
//!
//! ```text
//! POST <apiurl>/<fupendpoint>
//! Content-Type: text/csv
//! Content-Disposition: attachment; filename=<name>
//!
//! <raw CSV bytes>
//! ```
//!
//! The endpoint answers `{"success": bool, "response": string}` with HTTP
//! 200 (saved), 400 (bad request) or 500 (write failure).
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use wearlog_connectors::http::{HttpConfig, HttpUploader};
//! use wearlog_connectors::relay::RelayClient;
//! use wearlog_core::{LocalLink, Settings};
//!
//! let uploader = HttpUploader::new(HttpConfig::new().timeout_secs(30))?;
//! let mut relay = RelayClient::new(LocalLink::new(), uploader, &Settings::default());
//! relay.on_wake();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub mod relay;

#[cfg(feature = "server")]
pub mod server;

// Re-export common types
#[cfg(feature = "http")]
pub use http::{AuthMethod, HttpConfig, HttpError, HttpUploader};
#[cfg(feature = "http")]
pub use relay::{RelayClient, WakeReport};
#[cfg(feature = "server")]
pub use server::{RelayServer, ServerConfig, ServerError};

/// Common connector errors
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Body returned by the upload endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub response: String,
}

impl UploadResponse {
    pub fn ok(response: impl Into<String>) -> Self {
        Self {
            success: true,
            response: response.into(),
        }
    }

    pub fn failed(response: impl Into<String>) -> Self {
        Self {
            success: false,
            response: response.into(),
        }
    }
}

/// Trait for remote file delivery
pub trait Connector {
    type Error: std::fmt::Display;

    /// Deliver the file `name` to `target`; `Ok` only when the remote accepted it
    fn send(&mut self, target: &str, name: &str, data: &[u8]) -> Result<UploadResponse, Self::Error>;

    /// Liveness check against `target`
    fn probe(&mut self, target: &str) -> Result<UploadResponse, Self::Error>;

    /// Get connection statistics
    fn stats(&self) -> ConnectionStats;
}

/// Connection statistics common to all connectors
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Files delivered successfully
    pub messages_sent: u64,
    /// Files that failed to deliver
    pub messages_failed: u64,
    /// Total payload bytes delivered
    pub bytes_sent: u64,
    /// Last error message
    pub last_error: Option<String>,
}
