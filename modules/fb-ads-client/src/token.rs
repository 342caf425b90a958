//! Access token acquisition.
//!
//! TokenSource is the seam: the session scraper below walks the ads manager
//! web flow to lift the short-lived token out of the page, and can be swapped
//! for an OAuth-backed source without touching the pipelines.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::config::GraphConfig;
use crate::credentials::SessionCredentials;
use crate::error::{FbAdsError, Result};
use crate::graph::{parse_url, GraphSession};

static RE_LOCATION_REPLACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"window\.location\.replace\("(.*?)"\)"#).unwrap());
static RE_ACCESS_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"accessToken="(.*?)""#).unwrap());
static RE_ACCOUNT_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"act=(\d+)").unwrap());

/// Token and ad account for one invocation. Never cached.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub access_token: String,
    pub ad_account_id: String,
}

impl std::fmt::Debug for AccessGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGrant")
            .field("access_token", &"<redacted>")
            .field("ad_account_id", &self.ad_account_id)
            .finish()
    }
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn acquire_token(&self, credentials: &SessionCredentials) -> Result<AccessGrant>;
}

/// Returns a grant obtained elsewhere, e.g. from an OAuth exchange.
pub struct StaticTokenSource {
    grant: AccessGrant,
}

impl StaticTokenSource {
    pub fn new(access_token: impl Into<String>, ad_account_id: impl Into<String>) -> Self {
        Self {
            grant: AccessGrant {
                access_token: access_token.into(),
                ad_account_id: ad_account_id.into(),
            },
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn acquire_token(&self, _credentials: &SessionCredentials) -> Result<AccessGrant> {
        Ok(self.grant.clone())
    }
}

/// Scrapes the token from the ads manager pages using the session cookies.
pub struct SessionScrapeTokenSource {
    config: GraphConfig,
}

impl SessionScrapeTokenSource {
    pub fn new(config: GraphConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TokenSource for SessionScrapeTokenSource {
    async fn acquire_token(&self, credentials: &SessionCredentials) -> Result<AccessGrant> {
        let session = GraphSession::new(&self.config, credentials)?;
        let web = self.config.web_root();

        // Warms the session; neither the body nor the status matters.
        session.visit(&format!("{web}/profile.php")).await?;

        let manager = scrape_page(&session, &format!("{web}/adsmanager/manage/campaigns")).await?;
        let redirect = resolve_redirect(web, &extract_redirect(&manager)?)?;
        session.attach_cookies(&redirect)?;
        tracing::debug!(redirect = redirect.as_str(), "Following ads manager redirect");

        let page = scrape_page(&session, &redirect).await?;
        let grant = AccessGrant {
            access_token: extract_access_token(&page)?,
            ad_account_id: extract_account_id(&page)?,
        };
        tracing::info!(account = grant.ad_account_id.as_str(), "Access token acquired");
        Ok(grant)
    }
}

/// A rejected ads manager page means the session cannot yield a token.
async fn scrape_page(session: &GraphSession, url: &str) -> Result<String> {
    session.get_page(url).await.map_err(|e| match e {
        FbAdsError::Api { status, .. } => {
            FbAdsError::TokenExtraction(format!("{url} returned status {status}"))
        }
        other => other,
    })
}

/// Target of the `window.location.replace("...")` call, with JS escapes removed.
pub fn extract_redirect(html: &str) -> Result<String> {
    RE_LOCATION_REPLACE
        .captures(html)
        .map(|c| c[1].replace('\\', ""))
        .ok_or_else(|| FbAdsError::TokenExtraction("ads manager redirect not found".into()))
}

pub fn extract_access_token(html: &str) -> Result<String> {
    let token = RE_ACCESS_TOKEN
        .captures(html)
        .map(|c| c[1].to_string())
        .ok_or_else(|| FbAdsError::TokenExtraction("accessToken not found".into()))?;
    if token.is_empty() {
        return Err(FbAdsError::TokenExtraction("accessToken is empty".into()));
    }
    Ok(token)
}

pub fn extract_account_id(html: &str) -> Result<String> {
    RE_ACCOUNT_ID
        .captures(html)
        .map(|c| c[1].to_string())
        .ok_or_else(|| FbAdsError::TokenExtraction("act= account id not found".into()))
}

/// Redirects may be site-relative; resolve them against the web root.
fn resolve_redirect(web_root: &str, target: &str) -> Result<String> {
    let base = parse_url(&format!("{web_root}/"))?;
    base.join(target)
        .map(String::from)
        .map_err(|e| FbAdsError::TokenExtraction(format!("bad redirect {target:?}: {e}")))
}
