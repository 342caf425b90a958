//! The two public pipelines.
//!
//! create_ad:    token → accept policy → upload image → creation batch
//! get_ad_stats: token → ad accounts → seed → daily batch → aggregate batch
//!               → reconcile → flatten
//!
//! Every step runs to completion before the next starts; any error ends the
//! invocation with nothing partial returned.

use std::future::Future;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::Value;
use tracing::info;

use crate::batch::validate_batch;
use crate::config::GraphConfig;
use crate::creation::{build_creation_batch, AdPayload, AdsTargetOptions};
use crate::credentials::SessionCredentials;
use crate::error::{FbAdsError, Result};
use crate::graph::GraphSession;
use crate::stats::{
    decode_insight_batch, into_reports, reconcile, seed_accounts, AccountReport, StatsMode,
    TimeRange,
};
use crate::token::{SessionScrapeTokenSource, TokenSource};

pub struct AdsService {
    config: GraphConfig,
    tokens: Arc<dyn TokenSource>,
}

impl AdsService {
    /// Service that scrapes tokens from the caller's session.
    pub fn new(config: GraphConfig) -> Self {
        let tokens = Arc::new(SessionScrapeTokenSource::new(config.clone()));
        Self { config, tokens }
    }

    pub fn with_token_source(config: GraphConfig, tokens: Arc<dyn TokenSource>) -> Self {
        Self { config, tokens }
    }

    async fn with_deadline<T>(&self, pipeline: impl Future<Output = Result<T>>) -> Result<T> {
        let deadline = self.config.pipeline_timeout;
        tokio::time::timeout(deadline, pipeline)
            .await
            .map_err(|_| FbAdsError::Timeout(deadline.as_secs()))?
    }

    /// Create campaign, adset, creative and ad in one batch. Returns the raw
    /// batch response array.
    pub async fn create_ad(
        &self,
        credentials: &SessionCredentials,
        payload: &AdPayload,
        options: &AdsTargetOptions,
    ) -> Result<Value> {
        self.with_deadline(self.run_create_ad(credentials, payload, options))
            .await
    }

    async fn run_create_ad(
        &self,
        credentials: &SessionCredentials,
        payload: &AdPayload,
        options: &AdsTargetOptions,
    ) -> Result<Value> {
        let session = GraphSession::new(&self.config, credentials)?;
        let grant = self.tokens.acquire_token(credentials).await?;

        session.accept_policy(&grant).await?;

        let image_hash = session
            .upload_image(&grant, &payload.creative_configs.image)
            .await?;

        let operations = build_creation_batch(options, payload, &image_hash);
        validate_batch(&operations)?;

        info!(
            account = grant.ad_account_id.as_str(),
            campaign = options.campaign_name.as_str(),
            operations = operations.len(),
            "Submitting ad creation batch"
        );
        let response = session.post_batch(&operations, &grant.access_token).await?;
        info!(account = grant.ad_account_id.as_str(), "Ad creation batch completed");
        Ok(response)
    }

    /// Per-account statistics for every campaign or adset over the range,
    /// optionally broken down by day.
    pub async fn get_ad_stats(
        &self,
        by_day: bool,
        mode: StatsMode,
        date_from: NaiveDate,
        date_to: NaiveDate,
        credentials: &SessionCredentials,
    ) -> Result<Vec<AccountReport>> {
        let range = TimeRange::new(date_from, date_to);
        self.with_deadline(self.run_get_ad_stats(by_day, mode, range, credentials))
            .await
    }

    async fn run_get_ad_stats(
        &self,
        by_day: bool,
        mode: StatsMode,
        range: TimeRange,
        credentials: &SessionCredentials,
    ) -> Result<Vec<AccountReport>> {
        let session = GraphSession::new(&self.config, credentials)?;
        let grant = self.tokens.acquire_token(credentials).await?;
        let token = grant.access_token.as_str();

        let accounts = session.fetch_ad_accounts(token, mode, &range).await?;
        let (mut seeds, requests) = seed_accounts(&accounts, mode, &range, by_day);
        info!(
            accounts = seeds.len(),
            records = seeds.iter().map(|s| s.len()).sum::<usize>(),
            requests = requests.len(),
            %mode,
            by_day,
            "Seeded stats report"
        );

        if seeds.is_empty() {
            return Ok(Vec::new());
        }

        let daily = if by_day {
            let items = session.execute_batch(&requests.daily, token).await?;
            Some(decode_insight_batch(items)?)
        } else {
            None
        };
        let aggregate = decode_insight_batch(session.execute_batch(&requests.aggregate, token).await?)?;

        let passes = reconcile(&mut seeds, daily.as_deref(), &aggregate, mode)?;
        info!(passes, "Insights reconciled");

        Ok(into_reports(seeds))
    }
}
