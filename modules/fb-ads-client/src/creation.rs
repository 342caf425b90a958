//! Builds the six-step ad creation batch:
//! ad accounts → page id → campaign → adset → creative → ad.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::batch::{form_value, BatchOperation, ResultRef};

pub const OP_GET_ADACCOUNTS: &str = "get_adaccounts";
pub const OP_GET_PAGE_ID: &str = "get_page_id";
pub const OP_CREATE_CAMPAIGN: &str = "create_campaign";
pub const OP_CREATE_ADSET: &str = "create_adset";
pub const OP_CREATE_ADCREATIVE: &str = "create_adcreative";
pub const OP_CREATE_AD: &str = "create_ad";

/// Which object in the hierarchy carries the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetLevel {
    Campaign,
    Adset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetType {
    Daily,
    Lifetime,
}

impl fmt::Display for BudgetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetType::Daily => f.write_str("daily"),
            BudgetType::Lifetime => f.write_str("lifetime"),
        }
    }
}

/// Campaign, adset and ad parameters. Passed through to Facebook as-is;
/// the Graph API is the validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdsTargetOptions {
    pub campaign_name: String,
    pub objective: String,
    pub adset_name: String,
    pub ad_name: String,

    pub budget_object: BudgetLevel,
    pub budget_type: BudgetType,
    /// Minor currency units.
    pub budget: u64,
    pub bid_strategy: String,

    pub countries: Vec<String>,
    #[serde(default)]
    pub location_types: Vec<String>,
    pub age_from: u8,
    pub age_to: u8,
    pub genders: u8,
    #[serde(default)]
    pub adlocale: Vec<u32>,
    pub window_days: u32,
    pub custom_event_type: String,

    #[serde(default = "default_special_ad_categories")]
    pub special_ad_categories: Vec<String>,
    #[serde(default = "default_special_ad_category_country")]
    pub special_ad_category_country: String,
}

fn default_special_ad_categories() -> Vec<String> {
    vec!["CREDIT".to_string()]
}

fn default_special_ad_category_country() -> String {
    "UA".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreativeConfigs {
    pub text: String,
    pub description: String,
    pub header: String,
    pub link: String,
    /// URL of the image to upload.
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdPayload {
    #[serde(rename = "creativeConfigs")]
    pub creative_configs: CreativeConfigs,
}

/// Budget fields for `level`, or the bare `&` separator when the budget
/// lives on the other level. Values are form-encoded.
pub fn budget_clause(level: BudgetLevel, options: &AdsTargetOptions) -> String {
    if options.budget_object == level {
        format!(
            "{}_budget={}&bid_strategy={}&",
            options.budget_type,
            options.budget,
            form_value(&options.bid_strategy)
        )
    } else {
        "&".to_string()
    }
}

fn ad_account_path(edge: &str) -> String {
    format!(
        "act_{}/{edge}",
        ResultRef::new(OP_GET_ADACCOUNTS, "$.data.0.account_id")
    )
}

fn page_id_ref() -> String {
    ResultRef::new(OP_GET_PAGE_ID, "$.data.0.id").to_string()
}

pub fn campaign_body(options: &AdsTargetOptions) -> String {
    let categories = options.special_ad_categories.join(",");
    format!(
        "name={}&objective={}&status=ACTIVE&{}special_ad_categories={}&special_ad_category_country={}",
        form_value(&options.campaign_name),
        form_value(&options.objective),
        budget_clause(BudgetLevel::Campaign, options),
        form_value(&categories),
        form_value(&options.special_ad_category_country),
    )
}

pub fn adset_body(options: &AdsTargetOptions) -> String {
    let targeting = json!({
        "geo_locations": {
            "countries": options.countries,
            "location_types": options.location_types,
        },
        "age_min": options.age_from,
        "age_max": options.age_to,
        "genders": [options.genders],
        "locales": options.adlocale,
        "publisher_platforms": ["facebook"],
        "facebook_positions": ["feed"],
    });
    let attribution_spec = json!([
        { "event_type": "CLICK_THROUGH", "window_days": options.window_days }
    ]);
    let promoted_object = json!({
        "page_id": page_id_ref(),
        "custom_event_type": options.custom_event_type,
    });

    format!(
        "name={}&billing_event=IMPRESSIONS&optimization_goal=LEAD_GENERATION&campaign_id={}&targeting={}&status=ACTIVE&{}attribution_spec={}&promoted_object={}",
        form_value(&options.adset_name),
        ResultRef::new(OP_CREATE_CAMPAIGN, "$.id"),
        form_value(&targeting.to_string()),
        budget_clause(BudgetLevel::Adset, options),
        form_value(&attribution_spec.to_string()),
        form_value(&promoted_object.to_string()),
    )
}

pub fn adcreative_body(options: &AdsTargetOptions, creative: &CreativeConfigs, image_hash: &str) -> String {
    let story_spec = json!({
        "page_id": page_id_ref(),
        "link_data": {
            "message": creative.text,
            "description": creative.description,
            "name": creative.header,
            "link": creative.link,
            "image_hash": image_hash,
            "call_to_action": {
                "type": "LEARN_MORE",
                "value": { "link": creative.link },
            },
        },
    });
    format!(
        "name={}&object_story_spec={}",
        form_value(&options.ad_name),
        form_value(&story_spec.to_string())
    )
}

pub fn ad_body(options: &AdsTargetOptions) -> String {
    let creative = json!({
        "creative_id": ResultRef::new(OP_CREATE_ADCREATIVE, "$.id").to_string(),
    });
    format!(
        "name={}&adset_id={}&status=ACTIVE&creative={}",
        form_value(&options.ad_name),
        ResultRef::new(OP_CREATE_ADSET, "$.id"),
        form_value(&creative.to_string()),
    )
}

/// The ordered creation batch. `image_hash` comes from a prior upload.
pub fn build_creation_batch(
    options: &AdsTargetOptions,
    payload: &AdPayload,
    image_hash: &str,
) -> Vec<BatchOperation> {
    vec![
        BatchOperation::get("me/adaccounts").named(OP_GET_ADACCOUNTS),
        BatchOperation::get("me/accounts").named(OP_GET_PAGE_ID),
        BatchOperation::post(ad_account_path("campaigns"), campaign_body(options))
            .named(OP_CREATE_CAMPAIGN),
        BatchOperation::post(ad_account_path("adsets"), adset_body(options)).named(OP_CREATE_ADSET),
        BatchOperation::post(
            ad_account_path("adcreatives"),
            adcreative_body(options, &payload.creative_configs, image_hash),
        )
        .named(OP_CREATE_ADCREATIVE),
        BatchOperation::post(ad_account_path("ads"), ad_body(options)).named(OP_CREATE_AD),
    ]
}
