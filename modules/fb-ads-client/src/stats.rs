//! Insight statistics: seed per-account reports from the ad accounts
//! listing, fetch daily and aggregate insights as two separate request
//! lists, and fold both back into the seeded records.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::batch::{BatchOperation, BatchResponseItem};
use crate::de::{flex_f64, flex_u64};
use crate::error::{FbAdsError, Result};

/// Page size used for the accounts listing and its nested edge.
pub const ACCOUNTS_LIMIT: u32 = 500;
const INSIGHTS_LIMIT: u32 = 5000;

/// Whether statistics are reported per campaign or per adset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsMode {
    Campaigns,
    Adsets,
}

impl StatsMode {
    /// Edge name on the ad account node.
    pub fn edge(self) -> &'static str {
        match self {
            StatsMode::Campaigns => "campaigns",
            StatsMode::Adsets => "adsets",
        }
    }

    /// Insights `level` parameter.
    pub fn level(self) -> &'static str {
        match self {
            StatsMode::Campaigns => "campaign",
            StatsMode::Adsets => "adset",
        }
    }
}

impl fmt::Display for StatsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.edge())
    }
}

impl FromStr for StatsMode {
    type Err = FbAdsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "campaigns" => Ok(StatsMode::Campaigns),
            "adsets" => Ok(StatsMode::Adsets),
            other => Err(FbAdsError::Config(format!(
                "unknown stats mode {other:?}, expected campaigns or adsets"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub since: NaiveDate,
    pub until: NaiveDate,
}

impl TimeRange {
    pub fn new(since: NaiveDate, until: NaiveDate) -> Self {
        Self { since, until }
    }

    /// `{"since":"YYYY-MM-DD","until":"YYYY-MM-DD"}` as the Graph API expects.
    pub fn to_json(&self) -> String {
        format!(r#"{{"since":"{}","until":"{}"}}"#, self.since, self.until)
    }
}

/// Two decimals, ties to even (`0.125` -> `0.12`).
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

/// Cents from the accounts listing to major units, two decimals.
pub fn format_spent(cents: i64) -> f64 {
    round2(cents as f64 * 0.01)
}

/// `fields` parameter for the accounts listing with the nested
/// campaign/adset edge restricted to `range`.
pub fn accounts_fields(mode: StatsMode, range: &TimeRange) -> String {
    format!(
        "name,status,adtrust_dsl,\
         all_payment_methods{{pm_credit_card{{account_id,credential_id,display_string,exp_month,exp_year}}}},\
         currency,\
         {edge}.limit({limit}).time_range({range}){{id,name,status,cpm,ctr,impressions,spent}}",
        edge = mode.edge(),
        limit = ACCOUNTS_LIMIT,
        range = range.to_json(),
    )
}

// ---------------------------------------------------------------------------
// Graph API response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Paged<T> {
    #[serde(default)]
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentMethods {
    pub pm_credit_card: Option<Paged<Value>>,
}

/// One entry of `me/adaccounts` with the requested nested fields.
#[derive(Debug, Clone, Deserialize)]
pub struct AdAccountEntry {
    pub id: String,
    pub name: Option<String>,
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "flex_f64")]
    pub adtrust_dsl: Option<f64>,
    pub all_payment_methods: Option<PaymentMethods>,
    pub campaigns: Option<Paged<ModeObject>>,
    pub adsets: Option<Paged<ModeObject>>,
}

impl AdAccountEntry {
    fn mode_objects(&self, mode: StatsMode) -> &[ModeObject] {
        let edge = match mode {
            StatsMode::Campaigns => &self.campaigns,
            StatsMode::Adsets => &self.adsets,
        };
        edge.as_ref().map(|p| p.data.as_slice()).unwrap_or_default()
    }
}

/// A campaign or adset embedded in the accounts listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ModeObject {
    pub id: String,
    pub name: Option<String>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "flex_f64")]
    pub cpm: Option<f64>,
    #[serde(default, deserialize_with = "flex_f64")]
    pub ctr: Option<f64>,
    #[serde(default, deserialize_with = "flex_u64")]
    pub impressions: Option<u64>,
    /// Minor units.
    #[serde(default, deserialize_with = "flex_f64")]
    pub spent: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CostValue {
    #[serde(default, deserialize_with = "flex_f64")]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CostPerResult {
    #[serde(default)]
    pub values: Vec<CostValue>,
}

/// One row of an insights query.
#[derive(Debug, Clone, Deserialize)]
pub struct InsightRow {
    pub campaign_id: Option<String>,
    pub adset_id: Option<String>,
    #[serde(default)]
    pub cost_per_result: Vec<CostPerResult>,
    #[serde(default, deserialize_with = "flex_f64")]
    pub cpm: Option<f64>,
    #[serde(default, deserialize_with = "flex_f64")]
    pub ctr: Option<f64>,
    #[serde(default, deserialize_with = "flex_u64")]
    pub impressions: Option<u64>,
    /// Major units, unlike `ModeObject::spent`.
    #[serde(default, deserialize_with = "flex_f64")]
    pub spend: Option<f64>,
    pub date_start: Option<String>,
}

impl InsightRow {
    fn object_id(&self, mode: StatsMode) -> Option<&str> {
        match mode {
            StatsMode::Campaigns => self.campaign_id.as_deref(),
            StatsMode::Adsets => self.adset_id.as_deref(),
        }
    }

    /// `cost_per_result[0].values[0].value`, or 0 when any step is missing.
    pub fn cpl(&self) -> f64 {
        self.cost_per_result
            .first()
            .and_then(|c| c.values.first())
            .and_then(|v| v.value)
            .unwrap_or(0.0)
    }

    fn daily_metrics(&self) -> DailyMetrics {
        DailyMetrics {
            day: self.date_start.clone(),
            cpl: round2(self.cpl()),
            cpm: round2(self.cpm.unwrap_or(0.0)),
            ctr: self.ctr.unwrap_or(0.0),
            impressions: self.impressions.unwrap_or(0),
            spent: round2(self.spend.unwrap_or(0.0)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsightPage {
    #[serde(default)]
    pub data: Vec<InsightRow>,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyMetrics {
    pub day: Option<String>,
    pub cpl: f64,
    pub cpm: f64,
    pub ctr: f64,
    pub impressions: u64,
    pub spent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsRecord {
    pub id: String,
    pub name: Option<String>,
    pub status: Option<String>,
    pub cpm: f64,
    pub cpl: f64,
    pub ctr: Option<f64>,
    pub impressions: Option<u64>,
    pub spent: f64,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub by_day: Vec<DailyMetrics>,
}

impl MetricsRecord {
    fn seed(object: &ModeObject, range: &TimeRange) -> Self {
        Self {
            id: object.id.clone(),
            name: object.name.clone(),
            status: object.status.clone(),
            cpm: object.cpm.unwrap_or(0.0),
            cpl: 0.0,
            ctr: object.ctr,
            impressions: object.impressions,
            spent: format_spent(object.spent.unwrap_or(0.0) as i64),
            date_from: range.since,
            date_to: range.until,
            by_day: Vec::new(),
        }
    }
}

/// Statistics for one ad account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountReport {
    pub id: String,
    pub name: Option<String>,
    pub currency: Option<String>,
    pub adtrust_dsl: Option<f64>,
    pub credit_card: Vec<Value>,
    pub data: Vec<MetricsRecord>,
}

/// An account report under construction. Records are kept in insertion
/// order with an id index for the reconciliation passes.
#[derive(Debug, Clone)]
pub struct AccountSeed {
    report: AccountReport,
    index: HashMap<String, usize>,
}

impl AccountSeed {
    pub fn from_entry(entry: &AdAccountEntry, mode: StatsMode, range: &TimeRange) -> Self {
        let credit_card = entry
            .all_payment_methods
            .as_ref()
            .and_then(|pm| pm.pm_credit_card.as_ref())
            .map(|cards| cards.data.clone())
            .unwrap_or_default();

        let mut seed = Self {
            report: AccountReport {
                id: entry.id.clone(),
                name: entry.name.clone(),
                currency: entry.currency.clone(),
                adtrust_dsl: entry.adtrust_dsl,
                credit_card,
                data: Vec::new(),
            },
            index: HashMap::new(),
        };
        for object in entry.mode_objects(mode) {
            seed.insert(MetricsRecord::seed(object, range));
        }
        seed
    }

    pub fn len(&self) -> usize {
        self.report.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.report.data.is_empty()
    }

    fn insert(&mut self, record: MetricsRecord) {
        match self.index.get(&record.id) {
            Some(&i) => self.report.data[i] = record,
            None => {
                self.index.insert(record.id.clone(), self.report.data.len());
                self.report.data.push(record);
            }
        }
    }

    fn record_mut(&mut self, id: &str) -> Option<&mut MetricsRecord> {
        let i = *self.index.get(id)?;
        self.report.data.get_mut(i)
    }

    pub fn into_report(self) -> AccountReport {
        self.report
    }
}

/// Insight queries, one per account in each list, aligned with the seeds.
#[derive(Debug, Clone, Default)]
pub struct InsightRequests {
    pub daily: Vec<BatchOperation>,
    pub aggregate: Vec<BatchOperation>,
}

impl InsightRequests {
    pub fn len(&self) -> usize {
        self.daily.len() + self.aggregate.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Insights query for one account. `daily` adds `time_increment=1`.
pub fn insight_request(account_id: &str, mode: StatsMode, range: &TimeRange, daily: bool) -> BatchOperation {
    let level = mode.level();
    let mut url = format!(
        "{account_id}/insights?fields={level}_id,cost_per_result,cpm,ctr,impressions,spend\
         &level={level}&limit={limit}&time_range={range}&include_headers=false",
        limit = INSIGHTS_LIMIT,
        range = range.to_json(),
    );
    if daily {
        url.push_str("&time_increment=1");
    }
    BatchOperation::get(url)
}

/// Seed one report per account and build the insight request lists.
pub fn seed_accounts(
    accounts: &Paged<AdAccountEntry>,
    mode: StatsMode,
    range: &TimeRange,
    by_day: bool,
) -> (Vec<AccountSeed>, InsightRequests) {
    let mut seeds = Vec::with_capacity(accounts.data.len());
    let mut requests = InsightRequests::default();

    for entry in &accounts.data {
        if by_day {
            requests.daily.push(insight_request(&entry.id, mode, range, true));
        }
        requests.aggregate.push(insight_request(&entry.id, mode, range, false));
        seeds.push(AccountSeed::from_entry(entry, mode, range));
    }

    (seeds, requests)
}

/// Turn raw batch elements into insight pages. Any element that is null
/// or not HTTP 200 aborts the whole aggregation.
pub fn decode_insight_batch(items: Vec<Option<BatchResponseItem>>) -> Result<Vec<InsightPage>> {
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| -> Result<InsightPage> {
            let item = item.ok_or_else(|| {
                FbAdsError::StatsRetrieval(format!("batch element {i} was not executed"))
            })?;
            let body = item.body.as_deref().unwrap_or_default();
            if !item.is_ok() {
                tracing::warn!(index = i, code = item.code, "Insights batch element rejected");
                return Err(FbAdsError::StatsRetrieval(format!("response from FB: {body}")));
            }
            Ok(serde_json::from_str(body)?)
        })
        .collect()
}

fn check_alignment(seeds: &[AccountSeed], pages: &[InsightPage], list: &str) -> Result<()> {
    if seeds.len() != pages.len() {
        return Err(FbAdsError::StatsRetrieval(format!(
            "{list} insights returned {} results for {} accounts",
            pages.len(),
            seeds.len()
        )));
    }
    Ok(())
}

/// Append daily rows to each record's `by_day`.
fn apply_daily(seeds: &mut [AccountSeed], pages: &[InsightPage], mode: StatsMode) {
    for (seed, page) in seeds.iter_mut().zip(pages) {
        for row in &page.data {
            let Some(id) = row.object_id(mode) else { continue };
            if let Some(record) = seed.record_mut(id) {
                record.by_day.push(row.daily_metrics());
            }
        }
    }
}

/// Overwrite `cpl`/`cpm` with the full-range values.
fn apply_aggregate(seeds: &mut [AccountSeed], pages: &[InsightPage], mode: StatsMode) {
    for (seed, page) in seeds.iter_mut().zip(pages) {
        for row in &page.data {
            let Some(id) = row.object_id(mode) else { continue };
            if let Some(record) = seed.record_mut(id) {
                record.cpl = round2(row.cpl());
                record.cpm = round2(row.cpm.unwrap_or(0.0));
            }
        }
    }
}

/// Fold insight results into the seeds: daily rows first (when present),
/// then aggregate values. Returns the number of passes applied.
pub fn reconcile(
    seeds: &mut [AccountSeed],
    daily: Option<&[InsightPage]>,
    aggregate: &[InsightPage],
    mode: StatsMode,
) -> Result<usize> {
    let mut passes = 0;
    if let Some(daily) = daily {
        check_alignment(seeds, daily, "daily")?;
        apply_daily(seeds, daily, mode);
        passes += 1;
    }
    check_alignment(seeds, aggregate, "aggregate")?;
    apply_aggregate(seeds, aggregate, mode);
    passes += 1;
    Ok(passes)
}

/// Flatten seeds into the final report list.
pub fn into_reports(seeds: Vec<AccountSeed>) -> Vec<AccountReport> {
    seeds.into_iter().map(AccountSeed::into_report).collect()
}
