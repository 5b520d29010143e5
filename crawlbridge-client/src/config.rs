//! Client configuration.

use crate::error::{ClientError, ClientResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the platform API client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL for the platform API (e.g. "https://demo.example.com/api").
    pub endpoint: String,

    /// Value of the `API-Version` request header.
    pub api_version: String,

    /// Crawler type this instance serves; the fetched Source must match.
    pub crawler_type: String,

    /// Organisation owning the source.
    pub organisation_id: String,

    /// Knowledge base owning the source.
    pub kb_id: String,

    /// Security id presented on every call.
    pub sid: String,

    /// System key: seeds the shared-secret buffer and session keys.
    pub system_key: String,

    /// Numeric source id, 1..=65535.
    pub source_id: i32,

    /// Wrap request/response bodies in the crypto envelope.
    pub use_encryption: bool,

    /// Terminate the process after one completed run.
    pub exit_after_run: bool,

    /// Enable the on-disk dedup cache.
    pub use_cache: bool,

    /// Delay between attempts while the server is unreachable.
    pub network_retry_interval: Duration,

    /// How long a fetched Source stays fresh before it is re-fetched.
    pub source_refresh_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_version: "1".to_string(),
            crawler_type: crate::types::CRAWLER_TYPE_FILE.to_string(),
            organisation_id: String::new(),
            kb_id: String::new(),
            sid: String::new(),
            system_key: String::new(),
            source_id: -1,
            use_encryption: false,
            exit_after_run: false,
            use_cache: true,
            network_retry_interval: Duration::from_secs(60),
            source_refresh_interval: Duration::from_secs(120),
        }
    }
}

impl ClientConfig {
    /// Validates the configuration; every failure here is fatal at setup.
    pub fn validate(&self) -> ClientResult<()> {
        if !(self.endpoint.starts_with("https://") || self.endpoint.starts_with("http://")) {
            return Err(ClientError::Config(format!(
                "endpoint must be an http(s) URL: \"{}\"",
                self.endpoint
            )));
        }
        if !self.endpoint.ends_with("/api") {
            return Err(ClientError::Config(format!(
                "endpoint must end with /api: \"{}\"",
                self.endpoint
            )));
        }
        if self.organisation_id.is_empty() {
            return Err(ClientError::Config("missing organisation id".into()));
        }
        if self.kb_id.is_empty() {
            return Err(ClientError::Config("missing kb id".into()));
        }
        if self.sid.is_empty() {
            return Err(ClientError::Config("missing sid".into()));
        }
        if self.crawler_type.is_empty() {
            return Err(ClientError::Config("missing crawler type".into()));
        }
        if !(1..=65535).contains(&self.source_id) {
            return Err(ClientError::Config(format!(
                "invalid source id: {}",
                self.source_id
            )));
        }
        if self.use_encryption && self.system_key.is_empty() {
            return Err(ClientError::Config(
                "encryption enabled but no system key given".into(),
            ));
        }
        Ok(())
    }
}
