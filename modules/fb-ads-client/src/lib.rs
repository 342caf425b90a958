pub mod batch;
pub mod config;
pub mod creation;
pub mod credentials;
mod de;
pub mod error;
pub mod graph;
pub mod service;
pub mod stats;
pub mod token;

pub use batch::{validate_batch, BatchMethod, BatchOperation, BatchResponseItem, ResultRef};
pub use config::GraphConfig;
pub use creation::{AdPayload, AdsTargetOptions, BudgetLevel, BudgetType, CreativeConfigs};
pub use credentials::{
    convert_proxy_format, cookies_to_map, CookieEntry, LeadCredentials, SessionCredentials,
};
pub use error::{FbAdsError, Result};
pub use graph::GraphSession;
pub use service::AdsService;
pub use stats::{format_spent, AccountReport, DailyMetrics, MetricsRecord, StatsMode, TimeRange};
pub use token::{AccessGrant, SessionScrapeTokenSource, StaticTokenSource, TokenSource};
