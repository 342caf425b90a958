use std::env;
use std::time::Duration;

use crate::error::{FbAdsError, Result};

const DEFAULT_GRAPH_URL: &str = "https://graph.facebook.com";
const DEFAULT_ADS_GRAPH_URL: &str = "https://adsmanager-graph.facebook.com";
const DEFAULT_WEB_URL: &str = "https://www.facebook.com";
const DEFAULT_API_VERSION: &str = "v18.0";
const DEFAULT_POLICY_DOC_ID: &str = "1975240642598857";

/// Endpoints and deadlines for talking to Facebook.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Graph API root (batch, insights, GraphQL).
    pub graph_url: String,
    /// Ads manager Graph host, used for image uploads.
    pub ads_graph_url: String,
    /// Consumer web surface, scraped for the session access token.
    pub web_url: String,
    pub api_version: String,
    /// Applied to every outbound request.
    pub request_timeout: Duration,
    /// Applied to a whole `create_ad` / `get_ad_stats` invocation.
    pub pipeline_timeout: Duration,
    /// Persisted GraphQL document that accepts the ads policy.
    pub policy_doc_id: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            graph_url: DEFAULT_GRAPH_URL.to_string(),
            ads_graph_url: DEFAULT_ADS_GRAPH_URL.to_string(),
            web_url: DEFAULT_WEB_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            request_timeout: Duration::from_secs(30),
            pipeline_timeout: Duration::from_secs(180),
            policy_doc_id: DEFAULT_POLICY_DOC_ID.to_string(),
        }
    }
}

impl GraphConfig {
    /// Load configuration from environment variables, falling back to the
    /// public Facebook endpoints for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            graph_url: env_or("FB_ADS_GRAPH_URL", &defaults.graph_url),
            ads_graph_url: env_or("FB_ADS_ADS_GRAPH_URL", &defaults.ads_graph_url),
            web_url: env_or("FB_ADS_WEB_URL", &defaults.web_url),
            api_version: env_or("FB_ADS_API_VERSION", &defaults.api_version),
            request_timeout: secs_env("FB_ADS_REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
            pipeline_timeout: secs_env("FB_ADS_PIPELINE_TIMEOUT_SECS", defaults.pipeline_timeout)?,
            policy_doc_id: env_or("FB_ADS_POLICY_DOC_ID", &defaults.policy_doc_id),
        })
    }

    /// Same endpoints for every host, used when pointing at a local fake.
    pub fn with_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/').to_string();
        Self {
            graph_url: base.clone(),
            ads_graph_url: base.clone(),
            web_url: base,
            ..Self::default()
        }
    }

    /// Versioned Graph API root, e.g. `https://graph.facebook.com/v18.0`.
    pub fn graph_root(&self) -> String {
        format!("{}/{}", self.graph_url.trim_end_matches('/'), self.api_version)
    }

    pub fn ads_graph_root(&self) -> String {
        format!(
            "{}/{}",
            self.ads_graph_url.trim_end_matches('/'),
            self.api_version
        )
    }

    pub fn web_root(&self) -> &str {
        self.web_url.trim_end_matches('/')
    }

    pub fn log_redacted(&self) {
        tracing::info!(
            graph_url = self.graph_url.as_str(),
            ads_graph_url = self.ads_graph_url.as_str(),
            web_url = self.web_url.as_str(),
            api_version = self.api_version.as_str(),
            request_timeout_secs = self.request_timeout.as_secs(),
            pipeline_timeout_secs = self.pipeline_timeout.as_secs(),
            "Graph config loaded"
        );
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn secs_env(key: &str, default: Duration) -> Result<Duration> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| FbAdsError::Config(format!("{key} must be a number of seconds, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}
