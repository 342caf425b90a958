//! HTTP transport for one pipeline invocation.
//!
//! A GraphSession owns a reqwest client configured with the caller's proxy,
//! user agent and cookies, so every outbound call (web pages, Graph REST,
//! batch, GraphQL, image download) goes through the same settings.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use reqwest::cookie::Jar;
use reqwest::{Proxy, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::batch::{BatchOperation, BatchResponseItem, MAX_BATCH_SIZE};
use crate::config::GraphConfig;
use crate::credentials::SessionCredentials;
use crate::error::{FbAdsError, Result};
use crate::stats::{accounts_fields, AdAccountEntry, Paged, StatsMode, TimeRange, ACCOUNTS_LIMIT};
use crate::token::AccessGrant;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GraphSession {
    client: reqwest::Client,
    jar: Arc<Jar>,
    cookie_pairs: Vec<String>,
    config: GraphConfig,
}

impl GraphSession {
    pub fn new(config: &GraphConfig, credentials: &SessionCredentials) -> Result<Self> {
        let jar = Arc::new(Jar::default());

        let mut builder = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .user_agent(credentials.user_agent.as_str())
            .timeout(config.request_timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(config.request_timeout));

        if let Some(proxy) = credentials.proxy_url()? {
            let proxy = Proxy::all(proxy.as_str()).map_err(|e| FbAdsError::InvalidProxy(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build()?;
        let session = Self {
            client,
            jar,
            cookie_pairs: credentials.cookie_pairs(),
            config: config.clone(),
        };

        for base in [&config.web_url, &config.graph_url, &config.ads_graph_url] {
            session.attach_cookies(base)?;
        }
        Ok(session)
    }

    /// Make the session cookies visible to requests against `url`'s host.
    pub fn attach_cookies(&self, url: &str) -> Result<()> {
        let url = parse_url(url)?;
        for pair in &self.cookie_pairs {
            self.jar.add_cookie_str(pair, &url);
        }
        Ok(())
    }

    /// GET `url` for its side effects only; the status is not inspected.
    pub async fn visit(&self, url: &str) -> Result<()> {
        tracing::debug!(url, "Visiting page");
        let resp = self.client.get(url).send().await?;
        tracing::debug!(url, status = resp.status().as_u16(), "Visited page");
        Ok(())
    }

    /// Fetch a web page body, following redirects.
    pub async fn get_page(&self, url: &str) -> Result<String> {
        tracing::debug!(url, "Fetching page");
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(FbAdsError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.text().await?)
    }

    /// POST a batch in one call and return the decoded body untouched.
    pub async fn post_batch(&self, operations: &[BatchOperation], access_token: &str) -> Result<Value> {
        let url = format!("{}/", self.config.graph_root());
        tracing::debug!(operations = operations.len(), "Submitting batch");

        let resp = self
            .client
            .post(&url)
            .json(&json!({ "batch": operations, "access_token": access_token }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(FbAdsError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.json().await?)
    }

    /// Run independent operations as one or more batches of at most
    /// `MAX_BATCH_SIZE`, returning the elements in request order.
    pub async fn execute_batch(
        &self,
        operations: &[BatchOperation],
        access_token: &str,
    ) -> Result<Vec<Option<BatchResponseItem>>> {
        let mut items = Vec::with_capacity(operations.len());
        for chunk in operations.chunks(MAX_BATCH_SIZE) {
            let body = self.post_batch(chunk, access_token).await?;
            let chunk_items: Vec<Option<BatchResponseItem>> = serde_json::from_value(body)?;
            if chunk_items.len() != chunk.len() {
                return Err(FbAdsError::Parse(format!(
                    "batch returned {} elements for {} operations",
                    chunk_items.len(),
                    chunk.len()
                )));
            }
            items.extend(chunk_items);
        }
        Ok(items)
    }

    /// Accept the ads policy on behalf of the account. Must succeed before
    /// anything is created.
    pub async fn accept_policy(&self, grant: &AccessGrant) -> Result<()> {
        let url = format!("{}/graphql", self.config.graph_url.trim_end_matches('/'));
        let variables = json!({
            "input": {
                "client_mutation_id": "1",
                "actor_id": grant.ad_account_id,
            }
        })
        .to_string();

        let resp = self
            .client
            .post(&url)
            .form(&[
                ("doc_id", self.config.policy_doc_id.as_str()),
                ("variables", variables.as_str()),
                ("access_token", grant.access_token.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() != 200 {
            let message = resp.text().await.unwrap_or_default();
            return Err(FbAdsError::AcceptPolicy {
                status: status.as_u16(),
                message,
            });
        }
        tracing::info!(account = grant.ad_account_id.as_str(), "Ads policy accepted");
        Ok(())
    }

    async fn download_image(&self, image_url: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(image_url).send().await?;
        let status = resp.status();
        if status.as_u16() != 200 {
            return Err(FbAdsError::ImageUpload(format!(
                "downloading {image_url} returned status {status}"
            )));
        }
        Ok(resp.bytes().await?.to_vec())
    }

    /// Download the creative image, upload it to the ad account and return
    /// the image hash Facebook assigns.
    pub async fn upload_image(&self, grant: &AccessGrant, image_url: &str) -> Result<String> {
        let bytes = self.download_image(image_url).await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        tracing::info!(image_url, bytes = bytes.len(), "Uploading creative image");

        let url = format!(
            "{}/act_{}/adimages",
            self.config.ads_graph_root(),
            grant.ad_account_id
        );
        let resp = self
            .client
            .post(&url)
            .form(&[
                ("access_token", grant.access_token.as_str()),
                ("bytes", encoded.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() != 200 {
            let message = resp.text().await.unwrap_or_default();
            return Err(FbAdsError::ImageUpload(format!("status {status}: {message}")));
        }

        let body: Value = resp.json().await?;
        body.pointer("/images/bytes/hash")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| FbAdsError::ImageUpload(format!("no image hash in response: {body}")))
    }

    /// List the user's ad accounts with payment methods and one page of
    /// the nested campaigns or adsets.
    pub async fn fetch_ad_accounts(
        &self,
        access_token: &str,
        mode: StatsMode,
        range: &TimeRange,
    ) -> Result<Paged<AdAccountEntry>> {
        let url = format!("{}/me/adaccounts", self.config.graph_root());
        let fields = accounts_fields(mode, range);
        let limit = ACCOUNTS_LIMIT.to_string();

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("limit", limit.as_str()),
                ("fields", fields.as_str()),
                ("access_token", access_token),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() != 200 {
            let message = resp.text().await.unwrap_or_default();
            return Err(FbAdsError::StatsRetrieval(format!(
                "ad accounts request returned status {status}: {message}"
            )));
        }
        decode_json(resp).await
    }
}

async fn decode_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let text = resp.text().await?;
    Ok(serde_json::from_str(&text)?)
}

pub(crate) fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| FbAdsError::Config(format!("invalid URL {url:?}: {e}")))
}
