use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fb_ads_client::{AdPayload, AdsService, AdsTargetOptions, GraphConfig, LeadCredentials, StatsMode};

#[derive(Parser)]
#[command(name = "fb-ads", about = "Create Facebook ads and pull their statistics")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create campaign, adset, creative and ad in one batch
    CreateAd {
        /// JSON file with cookies, user_agent and optional proxy
        #[arg(long)]
        credentials: PathBuf,
        /// JSON file with `payload` and `adsTargetOptions`
        #[arg(long)]
        ad: PathBuf,
    },
    /// Per-account campaign or adset statistics
    Stats {
        #[arg(long)]
        credentials: PathBuf,
        /// campaigns or adsets
        #[arg(long, default_value = "campaigns")]
        mode: StatsMode,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        /// Include a per-day breakdown for every record
        #[arg(long)]
        by_day: bool,
    },
}

#[derive(Deserialize)]
struct AdRequest {
    payload: AdPayload,
    #[serde(rename = "adsTargetOptions")]
    ads_target_options: AdsTargetOptions,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fb_ads=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = GraphConfig::from_env()?;
    config.log_redacted();
    let service = AdsService::new(config);

    let output = match cli.command {
        Command::CreateAd { credentials, ad } => {
            let credentials = read_json::<LeadCredentials>(&credentials)?.into_session();
            let request: AdRequest = read_json(&ad)?;
            info!(campaign = request.ads_target_options.campaign_name.as_str(), "Creating ad");
            service
                .create_ad(&credentials, &request.payload, &request.ads_target_options)
                .await?
        }
        Command::Stats {
            credentials,
            mode,
            from,
            to,
            by_day,
        } => {
            let credentials = read_json::<LeadCredentials>(&credentials)?.into_session();
            info!(%mode, %from, %to, by_day, "Fetching ad statistics");
            let reports = service
                .get_ad_stats(by_day, mode, from, to, &credentials)
                .await?;
            serde_json::to_value(reports)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
