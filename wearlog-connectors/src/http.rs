//! HTTP uploader for companion-to-cloud file delivery
//!
//! ## Overview
//!
//! [`HttpUploader`] posts one log file per request using the lightweight,
//! blocking `ureq` client. The body is the raw CSV; the file name travels in a
//! `Content-Disposition` header so the endpoint can store the file under the
//! same name the device gave it.
//!
//! ## Design Decisions
//!
//! - One request per file, no batching: the device-side acknowledgement is
//!   per file name.
//! - No retries inside a wake: a failed file goes back to pending on the
//!   device and is offered again by the next backup scan.
//! - Every request carries the configured timeout (default 30 s).
//!
//! ## Targets
//!
//! A target is either an absolute `http(s)://` URL, as resolved from the
//! settings, or a path joined to [`HttpConfig::base_url`].
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use wearlog_connectors::http::{HttpConfig, HttpUploader};
//! use wearlog_connectors::Connector;
//!
//! let config = HttpConfig::new()
//!     .base_url("https://api.example.com")
//!     .bearer_token("your-api-token")
//!     .timeout_secs(30);
//!
//! let mut http = HttpUploader::new(config)?;
//! http.send("/upload", "heartrate_20240101-120000.log.csv", b"timestamp;sensor;data\n")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use log::{debug, info, warn};
use thiserror::Error;

use crate::{ConnectionStats, Connector, UploadResponse};

/// HTTP-specific errors
#[derive(Debug, Error)]
pub enum HttpError {
    /// Network or request error
    #[error("Request failed: {0}")]
    Request(String),

    /// Server returned error status
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// The endpoint answered 2xx but did not accept the file
    #[error("Upload rejected: {0}")]
    Rejected(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// HTTP configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Prefix for relative targets
    pub base_url: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Authentication method
    pub auth: AuthMethod,
    /// Custom headers
    pub headers: HashMap<String, String>,
    /// User agent string
    pub user_agent: String,
}

/// Authentication methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// No authentication
    None,
    /// Bearer token
    Bearer(String),
    /// Basic authentication
    Basic { username: String, password: String },
    /// API key in header
    ApiKey { header: String, value: String },
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpConfig {
    /// Defaults: no base URL, 30 s timeout, no authentication
    pub fn new() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            auth: AuthMethod::None,
            headers: HashMap::new(),
            user_agent: format!("WearLog/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set bearer token authentication
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.auth = AuthMethod::Bearer(token.into());
        self
    }

    /// Set basic authentication
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = AuthMethod::Basic {
            username: username.into(),
            password: password.into(),
        };
        self
    }

    /// Set API key authentication
    pub fn api_key(mut self, header: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth = AuthMethod::ApiKey {
            header: header.into(),
            value: value.into(),
        };
        self
    }

    /// Set request timeout in seconds
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// Add custom header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// `Authorization`-style header for `auth`, if any
fn auth_header(auth: &AuthMethod) -> Option<(String, String)> {
    match auth {
        AuthMethod::None => None,
        AuthMethod::Bearer(token) => Some(("Authorization".into(), format!("Bearer {}", token))),
        AuthMethod::Basic { username, password } => {
            let credentials =
                base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password));
            Some(("Authorization".into(), format!("Basic {}", credentials)))
        }
        AuthMethod::ApiKey { header, value } => Some((header.clone(), value.clone())),
    }
}

/// Uploader using the lightweight ureq client
pub struct HttpUploader {
    config: HttpConfig,
    agent: ureq::Agent,
    stats: ConnectionStats,
}

impl HttpUploader {
    /// Create new uploader
    pub fn new(config: HttpConfig) -> Result<Self, HttpError> {
        if let Some(base) = &config.base_url {
            if !is_absolute(base) {
                return Err(HttpError::Config(
                    "Base URL must start with http:// or https://".into(),
                ));
            }
        }

        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build();

        Ok(Self {
            config,
            agent,
            stats: ConnectionStats::default(),
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Absolute URL for `target`
    pub fn resolve(&self, target: &str) -> Result<String, HttpError> {
        if is_absolute(target) {
            return Ok(target.to_string());
        }
        match &self.config.base_url {
            Some(base) => Ok(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                target.trim_start_matches('/')
            )),
            None => Err(HttpError::Config(format!("{} is not an absolute URL", target))),
        }
    }

    /// Build request with authentication and headers
    fn build_request(&self, mut request: ureq::Request) -> ureq::Request {
        if let Some((name, value)) = auth_header(&self.config.auth) {
            request = request.set(&name, &value);
        }
        for (name, value) in &self.config.headers {
            request = request.set(name, value);
        }
        request.set("Accept", "application/json")
    }

    fn parse_body(text: &str) -> Result<UploadResponse, HttpError> {
        serde_json::from_str(text).map_err(|e| HttpError::Serialization(e.to_string()))
    }

    /// Turn a ureq outcome into the endpoint's response body
    fn read_response(result: Result<ureq::Response, ureq::Error>) -> Result<UploadResponse, HttpError> {
        match result {
            Ok(resp) => {
                let text = resp
                    .into_string()
                    .map_err(|e| HttpError::Request(e.to_string()))?;
                Self::parse_body(&text)
            }
            Err(ureq::Error::Status(status, resp)) => {
                let text = resp.into_string().unwrap_or_default();
                let message = Self::parse_body(&text)
                    .map(|body| body.response)
                    .unwrap_or(text);
                Err(HttpError::ServerError { status, message })
            }
            Err(ureq::Error::Transport(e)) => Err(HttpError::Request(e.to_string())),
        }
    }

    fn record_failure(&mut self, error: &HttpError) {
        self.stats.messages_failed += 1;
        self.stats.last_error = Some(error.to_string());
    }

    /// POST one file
    pub fn upload(&mut self, target: &str, name: &str, data: &[u8]) -> Result<UploadResponse, HttpError> {
        let result = self.try_upload(target, name, data);
        match &result {
            Ok(body) => {
                self.stats.messages_sent += 1;
                self.stats.bytes_sent += data.len() as u64;
                info!("Uploaded {}: {}", name, body.response);
            }
            Err(e) => {
                warn!("Failed to send {}: {}", name, e);
                self.record_failure(e);
            }
        }
        result
    }

    fn try_upload(&self, target: &str, name: &str, data: &[u8]) -> Result<UploadResponse, HttpError> {
        let url = self.resolve(target)?;
        debug!("POST {} ({} bytes) to {}", name, data.len(), url);

        let request = self
            .build_request(self.agent.post(&url))
            .set("Content-Type", "text/csv")
            .set("Content-Disposition", &format!("attachment; filename={}", name));

        let body = Self::read_response(request.send_bytes(data))?;
        if body.success {
            Ok(body)
        } else {
            Err(HttpError::Rejected(body.response))
        }
    }

    /// `GET <target>?test=LogSender`
    pub fn get_probe(&mut self, target: &str) -> Result<UploadResponse, HttpError> {
        let url = self.resolve(target)?;
        debug!("Testing call to {}", url);
        let request = self
            .build_request(self.agent.get(&url))
            .set("Content-Type", "application/json")
            .query("test", "LogSender");

        let result = Self::read_response(request.call());
        if let Err(e) = &result {
            self.record_failure(e);
        }
        result
    }
}

impl Connector for HttpUploader {
    type Error = HttpError;

    fn send(&mut self, target: &str, name: &str, data: &[u8]) -> Result<UploadResponse, Self::Error> {
        self.upload(target, name, data)
    }

    fn probe(&mut self, target: &str) -> Result<UploadResponse, Self::Error> {
        self.get_probe(target)
    }

    fn stats(&self) -> ConnectionStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = HttpConfig::new()
            .base_url("https://api.example.com")
            .bearer_token("test-token")
            .timeout_secs(60)
            .header("X-Custom", "value");

        assert_eq!(config.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(config.headers.contains_key("X-Custom"));
        assert_eq!(config.auth, AuthMethod::Bearer("test-token".into()));
    }

    #[test]
    fn test_url_validation() {
        let result = HttpUploader::new(HttpConfig::new().base_url("not-a-url"));
        assert!(matches!(result, Err(HttpError::Config(_))));

        assert!(HttpUploader::new(HttpConfig::new().base_url("https://valid.url")).is_ok());
        assert!(HttpUploader::new(HttpConfig::new()).is_ok());
    }

    #[test]
    fn targets_resolve_against_base_url() {
        let http = HttpUploader::new(HttpConfig::new().base_url("http://10.0.2.2:8080/")).unwrap();
        assert_eq!(http.resolve("/upload").unwrap(), "http://10.0.2.2:8080/upload");
        assert_eq!(http.resolve("https://other/x").unwrap(), "https://other/x");

        let bare = HttpUploader::new(HttpConfig::new()).unwrap();
        assert!(matches!(bare.resolve("upload"), Err(HttpError::Config(_))));
    }

    #[test]
    fn basic_auth_is_base64_encoded() {
        let header = auth_header(&AuthMethod::Basic {
            username: "watch".into(),
            password: "secret".into(),
        });
        assert_eq!(
            header,
            Some(("Authorization".to_string(), "Basic d2F0Y2g6c2VjcmV0".to_string()))
        );
        assert_eq!(auth_header(&AuthMethod::None), None);
    }

    #[test]
    fn unreachable_endpoint_counts_as_failure() {
        let mut http = HttpUploader::new(HttpConfig::new().timeout_secs(1)).unwrap();
        let result = http.send("http://127.0.0.1:9/upload", "a.log.csv", b"x");
        assert!(matches!(result, Err(HttpError::Request(_))));

        let stats = http.stats();
        assert_eq!(stats.messages_failed, 1);
        assert_eq!(stats.messages_sent, 0);
        assert!(stats.last_error.is_some());
    }
}
