//! Relay configuration: where the relay target comes from and whether it is usable.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{header, Client};
use shared::{domain::RelayTarget, protocol::RelayConfigRow};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;

use crate::transition::RelayReadiness;

const SINGLE_OBJECT_ACCEPT: &str = "application/vnd.pgrst.object+json";

/// Relay target as seen by the controller. `NotLoaded` keeps uploads blocked
/// until a configuration source has resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayConfig {
    Disabled,
    NotLoaded,
    Unavailable(String),
    Ready(RelayTarget),
}

impl RelayConfig {
    pub fn readiness(&self) -> RelayReadiness {
        match self {
            Self::Disabled => RelayReadiness::Disabled,
            Self::NotLoaded => {
                RelayReadiness::Unavailable("relay configuration has not been loaded yet".into())
            }
            Self::Unavailable(reason) => RelayReadiness::Unavailable(reason.clone()),
            Self::Ready(target) if !target.is_complete() => {
                RelayReadiness::Unavailable(ConfigError::Incomplete.to_string())
            }
            Self::Ready(_) => RelayReadiness::Ready,
        }
    }

    pub fn target(&self) -> Option<&RelayTarget> {
        match self {
            Self::Ready(target) => Some(target),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to fetch relay configuration: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("relay configuration backend returned HTTP {status}: {message}")]
    Backend { status: u16, message: String },
    #[error("relay configuration is incomplete (api_id, api_hash and server_url are required)")]
    Incomplete,
    #[error("invalid configuration url '{0}'")]
    InvalidUrl(String),
}

#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load(&self) -> Result<RelayTarget, ConfigError>;
}

pub struct StaticConfigSource {
    target: RelayTarget,
}

impl StaticConfigSource {
    pub fn new(target: RelayTarget) -> Self {
        Self { target }
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn load(&self) -> Result<RelayTarget, ConfigError> {
        Ok(self.target.clone())
    }
}

/// Reads the single relay configuration row from the backend's REST interface.
pub struct RestConfigSource {
    http: Client,
    table_url: String,
    api_key: String,
}

impl RestConfigSource {
    pub fn new(base_url: &str, api_key: impl Into<String>, table: &str) -> Result<Self, ConfigError> {
        let parsed =
            Url::parse(base_url.trim()).map_err(|_| ConfigError::InvalidUrl(base_url.to_string()))?;
        if table.trim().is_empty() {
            return Err(ConfigError::InvalidUrl(format!("{base_url} (empty table name)")));
        }
        Ok(Self {
            http: Client::new(),
            table_url: format!(
                "{}/rest/v1/{}",
                parsed.as_str().trim_end_matches('/'),
                table.trim()
            ),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl ConfigSource for RestConfigSource {
    async fn load(&self) -> Result<RelayTarget, ConfigError> {
        let response = self
            .http
            .get(&self.table_url)
            .query(&[("select", "*")])
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .header(header::ACCEPT, SINGLE_OBJECT_ACCEPT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ConfigError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        let row: RelayConfigRow = response.json().await?;
        Ok(row.into())
    }
}

/// Loads once and reuses the result. Failures are not cached, so a later
/// call retries the underlying source.
pub struct CachedConfigSource {
    inner: Arc<dyn ConfigSource>,
    cached: Mutex<Option<RelayTarget>>,
}

impl CachedConfigSource {
    pub fn new(inner: Arc<dyn ConfigSource>) -> Self {
        Self {
            inner,
            cached: Mutex::new(None),
        }
    }

    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }
}

#[async_trait]
impl ConfigSource for CachedConfigSource {
    async fn load(&self) -> Result<RelayTarget, ConfigError> {
        let mut cached = self.cached.lock().await;
        if let Some(target) = cached.as_ref() {
            return Ok(target.clone());
        }
        let target = self.inner.load().await?;
        *cached = Some(target.clone());
        Ok(target)
    }
}

/// Resolves a source into the controller's view of the relay.
pub async fn resolve_relay_config(source: &dyn ConfigSource) -> RelayConfig {
    match source.load().await {
        Ok(target) if target.is_complete() => {
            info!(server_url = %target.server_url, "relay configuration loaded");
            RelayConfig::Ready(target)
        }
        Ok(_) => {
            warn!("relay configuration is missing credentials");
            RelayConfig::Unavailable(ConfigError::Incomplete.to_string())
        }
        Err(error) => {
            warn!(%error, "relay configuration could not be loaded");
            RelayConfig::Unavailable(error.to_string())
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
