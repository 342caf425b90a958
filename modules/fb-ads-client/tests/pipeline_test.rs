//! End-to-end pipeline tests against a local fake of the Facebook web and
//! Graph endpoints. No network access needed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Form, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use chrono::NaiveDate;
use serde_json::{json, Value};

use fb_ads_client::{
    AdPayload, AdsService, AdsTargetOptions, FbAdsError, GraphConfig, SessionCredentials,
    StaticTokenSource, StatsMode,
};

const TOKEN: &str = "EAABfaketoken";
const ACCOUNT: &str = "555";
const IMAGE_BYTES: &[u8] = b"not-really-a-png";

// ---------------------------------------------------------------------------
// Fake Facebook
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Behaviour {
    break_redirect: bool,
    reject_policy: bool,
    reject_insight: bool,
    slow_accounts: bool,
    profile_error: bool,
    landing_error: bool,
    /// Extra accounts appended to the listing, `act_bulk0..`.
    bulk_accounts: usize,
}

#[derive(Default)]
struct Fake {
    behaviour: Behaviour,
    calls: Mutex<Vec<String>>,
    batches: Mutex<Vec<Value>>,
    saw_cookie: AtomicBool,
}

impl Fake {
    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn batches(&self) -> Vec<Value> {
        self.batches.lock().unwrap().clone()
    }
}

type Shared = Arc<Fake>;

async fn profile(State(fake): State<Shared>, headers: HeaderMap) -> (StatusCode, Html<&'static str>) {
    fake.record("profile");
    let cookie = headers
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if cookie.contains("c_user=100") && cookie.contains("xs=secret") {
        fake.saw_cookie.store(true, Ordering::SeqCst);
    }
    if fake.behaviour.profile_error {
        return (StatusCode::INTERNAL_SERVER_ERROR, Html("<html>oops</html>"));
    }
    (StatusCode::OK, Html("<html>profile</html>"))
}

async fn ads_manager(State(fake): State<Shared>) -> Html<String> {
    fake.record("ads_manager");
    if fake.behaviour.break_redirect {
        return Html("<html>checkpoint</html>".to_string());
    }
    Html(format!(
        r#"<script>window.location.replace("\/adsmanager\/landing?act={ACCOUNT}&nav_entry_point=lep")</script>"#
    ))
}

async fn landing(State(fake): State<Shared>) -> (StatusCode, Html<String>) {
    fake.record("landing");
    if fake.behaviour.landing_error {
        return (StatusCode::FORBIDDEN, Html("<html>login</html>".to_string()));
    }
    (
        StatusCode::OK,
        Html(format!(
            r#"<script>require("x",{{accessToken="{TOKEN}",useLocal:1}});var u="/adsmanager?act={ACCOUNT}";</script>"#
        )),
    )
}

async fn graphql(State(fake): State<Shared>, Form(form): Form<HashMap<String, String>>) -> impl IntoResponse {
    fake.record("graphql");
    assert_eq!(form.get("doc_id").map(String::as_str), Some("1975240642598857"));
    assert_eq!(form.get("access_token").map(String::as_str), Some(TOKEN));
    let variables: Value = serde_json::from_str(&form["variables"]).unwrap();
    assert_eq!(variables["input"]["actor_id"], ACCOUNT);

    if fake.behaviour.reject_policy {
        (StatusCode::FORBIDDEN, Json(json!({"error": "nope"})))
    } else {
        (StatusCode::OK, Json(json!({"data": {}})))
    }
}

async fn image(State(fake): State<Shared>) -> &'static [u8] {
    fake.record("image");
    IMAGE_BYTES
}

async fn adimages(State(fake): State<Shared>, Form(form): Form<HashMap<String, String>>) -> Json<Value> {
    fake.record("adimages");
    let expected = base64::engine::general_purpose::STANDARD.encode(IMAGE_BYTES);
    assert_eq!(form.get("bytes"), Some(&expected));
    Json(json!({"images": {"bytes": {"hash": "hash-abc"}}}))
}

async fn adaccounts(State(fake): State<Shared>, Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    fake.record("adaccounts");
    if fake.behaviour.slow_accounts {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    assert_eq!(query.get("access_token").map(String::as_str), Some(TOKEN));
    assert_eq!(query.get("limit").map(String::as_str), Some("500"));
    assert!(query["fields"].contains("campaigns.limit(500)"));

    let mut accounts = vec![
        json!({
            "id": "act_1",
            "name": "Main",
            "currency": "USD",
            "campaigns": {"data": [
                {"id": "c1", "name": "Leads", "status": "ACTIVE", "cpm": "0", "ctr": "1.2", "impressions": "900", "spent": "1050"},
                {"id": "c2", "name": "Retarget", "status": "PAUSED", "spent": "0"}
            ]}
        }),
        json!({"id": "act_2", "name": "Spare", "currency": "EUR"}),
    ];
    accounts.extend((0..fake.behaviour.bulk_accounts).map(|i| {
        json!({
            "id": format!("act_bulk{i}"),
            "currency": "USD",
            "campaigns": {"data": [{"id": format!("b{i}"), "status": "ACTIVE", "spent": "100"}]}
        })
    }));

    Json(json!({ "data": accounts }))
}

fn insight_body(relative_url: &str) -> Value {
    if let Some(rest) = relative_url.strip_prefix("act_bulk") {
        let index = rest.split('/').next().unwrap_or_default();
        return json!({ "data": [
            {"campaign_id": format!("b{index}"), "cpm": format!("{index}.5"), "cost_per_result": [{"values": [{"value": "0.2"}]}]}
        ]});
    }
    let rows = match (relative_url.starts_with("act_1/"), relative_url.contains("time_increment=1")) {
        (true, true) => json!([
            {"campaign_id": "c1", "date_start": "2024-05-01", "cpm": "2.5", "ctr": "1", "impressions": "400", "spend": "4.004"},
            {"campaign_id": "c1", "date_start": "2024-05-02", "cpm": "3.5", "ctr": "1.4", "impressions": "500", "spend": "6.5"}
        ]),
        (true, false) => json!([
            {"campaign_id": "c1", "cpm": "3.111", "cost_per_result": [{"indicator": "lead", "values": [{"value": "1.239"}]}]}
        ]),
        (false, _) => json!([]),
    };
    json!({ "data": rows })
}

async fn batch(State(fake): State<Shared>, Json(request): Json<Value>) -> Json<Value> {
    fake.record("batch");
    assert_eq!(request["access_token"], TOKEN);
    let ops = request["batch"].as_array().cloned().unwrap_or_default();
    fake.batches.lock().unwrap().push(request.clone());

    let items: Vec<Value> = ops
        .iter()
        .enumerate()
        .map(|(i, op)| {
            let url = op["relative_url"].as_str().unwrap_or_default();
            if op.get("name").is_some() {
                return json!({"code": 200, "body": format!(r#"{{"id":"{i}"}}"#)});
            }
            if fake.behaviour.reject_insight && i == 1 {
                return json!({"code": 400, "body": r#"{"error":{"message":"Invalid parameter"}}"#});
            }
            json!({"code": 200, "headers": [], "body": insight_body(url).to_string()})
        })
        .collect();
    Json(Value::Array(items))
}

async fn start(behaviour: Behaviour) -> (String, Shared) {
    let fake = Arc::new(Fake {
        behaviour,
        ..Fake::default()
    });

    let app = Router::new()
        .route("/profile.php", get(profile))
        .route("/adsmanager/manage/campaigns", get(ads_manager))
        .route("/adsmanager/landing", get(landing))
        .route("/graphql", post(graphql))
        .route("/image.png", get(image))
        .route("/v18.0/act_555/adimages", post(adimages))
        .route("/v18.0/me/adaccounts", get(adaccounts))
        .route("/v18.0/", post(batch))
        .with_state(fake.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), fake)
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn credentials() -> SessionCredentials {
    let mut cookies = HashMap::new();
    cookies.insert("c_user".to_string(), "100".to_string());
    cookies.insert("xs".to_string(), "secret".to_string());
    SessionCredentials::new(cookies, "Mozilla/5.0 (test)", None)
}

fn options() -> AdsTargetOptions {
    serde_json::from_value(json!({
        "campaign_name": "Spring",
        "objective": "OUTCOME_LEADS",
        "adset_name": "Spring adset",
        "ad_name": "Spring ad",
        "budget_object": "adset",
        "budget_type": "daily",
        "budget": 1000,
        "bid_strategy": "LOWEST_COST_WITHOUT_CAP",
        "countries": ["UA"],
        "age_from": 21,
        "age_to": 60,
        "genders": 2,
        "window_days": 1,
        "custom_event_type": "LEAD"
    }))
    .unwrap()
}

fn payload(base: &str) -> AdPayload {
    serde_json::from_value(json!({
        "creativeConfigs": {
            "text": "Hello",
            "description": "World",
            "header": "Title",
            "link": "https://example.com",
            "image": format!("{base}/image.png")
        }
    }))
    .unwrap()
}

fn may(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
}

fn static_service(base: &str) -> AdsService {
    AdsService::with_token_source(
        GraphConfig::with_base_url(base),
        Arc::new(StaticTokenSource::new(TOKEN, ACCOUNT)),
    )
}

// ---------------------------------------------------------------------------
// Ad creation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_ad_scrapes_token_accepts_policy_uploads_then_batches() {
    let (base, fake) = start(Behaviour::default()).await;
    let service = AdsService::new(GraphConfig::with_base_url(&base));

    let response = service
        .create_ad(&credentials(), &payload(&base), &options())
        .await
        .unwrap();

    assert_eq!(response.as_array().map(Vec::len), Some(6));
    assert_eq!(
        fake.calls(),
        vec!["profile", "ads_manager", "landing", "graphql", "image", "adimages", "batch"]
    );
    assert!(fake.saw_cookie.load(Ordering::SeqCst), "session cookies should reach the web pages");

    let batch = &fake.batches()[0]["batch"];
    assert_eq!(batch[0]["name"], "get_adaccounts");
    assert_eq!(batch[5]["name"], "create_ad");
    let creative_body = batch[4]["body"].as_str().unwrap();
    assert!(creative_body.contains("hash-abc"));
    let adset_body = batch[3]["body"].as_str().unwrap();
    assert!(adset_body.contains("daily_budget=1000&bid_strategy=LOWEST_COST_WITHOUT_CAP&"));
}

#[tokio::test]
async fn failing_profile_page_does_not_block_token_scrape() {
    let (base, fake) = start(Behaviour {
        profile_error: true,
        ..Behaviour::default()
    })
    .await;
    let service = AdsService::new(GraphConfig::with_base_url(&base));

    service
        .create_ad(&credentials(), &payload(&base), &options())
        .await
        .unwrap();

    assert_eq!(&fake.calls()[..3], ["profile", "ads_manager", "landing"]);
}

#[tokio::test]
async fn rejected_landing_page_is_a_token_extraction_error() {
    let (base, fake) = start(Behaviour {
        landing_error: true,
        ..Behaviour::default()
    })
    .await;
    let service = AdsService::new(GraphConfig::with_base_url(&base));

    let err = service
        .create_ad(&credentials(), &payload(&base), &options())
        .await
        .unwrap_err();

    match err {
        FbAdsError::TokenExtraction(msg) => assert!(msg.contains("403")),
        other => panic!("expected TokenExtraction, got {other:?}"),
    }
    assert_eq!(fake.calls(), vec!["profile", "ads_manager", "landing"]);
}

#[tokio::test]
async fn special_characters_reach_facebook_intact() {
    let (base, fake) = start(Behaviour::default()).await;
    let mut opts = options();
    opts.campaign_name = "Sale & Promo".to_string();
    let mut ad = payload(&base);
    ad.creative_configs.link = "https://shop.example/?utm_source=fb&utm_medium=cpc".to_string();

    static_service(&base)
        .create_ad(&credentials(), &ad, &opts)
        .await
        .unwrap();

    let batch = &fake.batches()[0]["batch"];
    let campaign: HashMap<String, String> =
        url::form_urlencoded::parse(batch[2]["body"].as_str().unwrap().as_bytes())
            .into_owned()
            .collect();
    assert_eq!(campaign["name"], "Sale & Promo");

    let creative: HashMap<String, String> =
        url::form_urlencoded::parse(batch[4]["body"].as_str().unwrap().as_bytes())
            .into_owned()
            .collect();
    let spec: Value = serde_json::from_str(&creative["object_story_spec"]).unwrap();
    assert_eq!(spec["link_data"]["link"], "https://shop.example/?utm_source=fb&utm_medium=cpc");
    assert_eq!(spec["link_data"]["image_hash"], "hash-abc");
}

#[tokio::test]
async fn rejected_policy_stops_before_any_creation() {
    let (base, fake) = start(Behaviour {
        reject_policy: true,
        ..Behaviour::default()
    })
    .await;

    let err = static_service(&base)
        .create_ad(&credentials(), &payload(&base), &options())
        .await
        .unwrap_err();

    assert!(matches!(err, FbAdsError::AcceptPolicy { status: 403, .. }));
    assert_eq!(fake.calls(), vec!["graphql"]);
}

#[tokio::test]
async fn missing_redirect_is_a_token_extraction_error() {
    let (base, fake) = start(Behaviour {
        break_redirect: true,
        ..Behaviour::default()
    })
    .await;
    let service = AdsService::new(GraphConfig::with_base_url(&base));

    let err = service
        .create_ad(&credentials(), &payload(&base), &options())
        .await
        .unwrap_err();

    assert!(matches!(err, FbAdsError::TokenExtraction(_)));
    assert_eq!(fake.calls(), vec!["profile", "ads_manager"]);
}

#[tokio::test]
async fn image_download_failure_is_an_upload_error() {
    let (base, _fake) = start(Behaviour::default()).await;
    let mut bad = payload(&base);
    bad.creative_configs.image = format!("{base}/missing.png");

    let err = static_service(&base)
        .create_ad(&credentials(), &bad, &options())
        .await
        .unwrap_err();

    assert!(matches!(err, FbAdsError::ImageUpload(_)));
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn aggregate_stats_use_one_batch_and_update_scalars() {
    let (base, fake) = start(Behaviour::default()).await;

    let reports = static_service(&base)
        .get_ad_stats(false, StatsMode::Campaigns, may(1), may(2), &credentials())
        .await
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(fake.calls(), vec!["adaccounts", "batch"]);
    assert_eq!(fake.batches()[0]["batch"].as_array().unwrap().len(), 2);

    let c1 = &reports[0].data[0];
    assert_eq!(c1.id, "c1");
    assert_eq!(c1.spent, 10.5);
    assert_eq!(c1.cpm, 3.11);
    assert_eq!(c1.cpl, 1.24);
    assert_eq!(c1.impressions, Some(900));
    assert!(c1.by_day.is_empty());
    assert_eq!(reports[0].data[1].cpl, 0.0);
    assert!(reports[1].data.is_empty());
}

#[tokio::test]
async fn daily_stats_run_daily_batch_before_aggregate() {
    let (base, fake) = start(Behaviour::default()).await;

    let reports = static_service(&base)
        .get_ad_stats(true, StatsMode::Campaigns, may(1), may(2), &credentials())
        .await
        .unwrap();

    assert_eq!(fake.calls(), vec!["adaccounts", "batch", "batch"]);
    let batches = fake.batches();
    let first_url = batches[0]["batch"][0]["relative_url"].as_str().unwrap();
    let second_url = batches[1]["batch"][0]["relative_url"].as_str().unwrap();
    assert!(first_url.contains("time_increment=1"));
    assert!(!second_url.contains("time_increment"));

    let c1 = &reports[0].data[0];
    assert_eq!(c1.by_day.len(), 2);
    assert_eq!(c1.by_day[0].day.as_deref(), Some("2024-05-01"));
    assert_eq!(c1.by_day[0].spent, 4.0);
    assert_eq!(c1.by_day[1].impressions, 500);
    assert_eq!(c1.cpm, 3.11);
    assert_eq!(c1.cpl, 1.24);
}

#[tokio::test]
async fn large_account_lists_are_split_into_chunked_batches() {
    let (base, fake) = start(Behaviour {
        bulk_accounts: 50,
        ..Behaviour::default()
    })
    .await;

    let reports = static_service(&base)
        .get_ad_stats(false, StatsMode::Campaigns, may(1), may(2), &credentials())
        .await
        .unwrap();

    assert_eq!(fake.calls(), vec!["adaccounts", "batch", "batch"]);
    let batches = fake.batches();
    assert_eq!(batches[0]["batch"].as_array().unwrap().len(), 50);
    assert_eq!(batches[1]["batch"].as_array().unwrap().len(), 2);
    assert!(batches[1]["batch"][1]["relative_url"]
        .as_str()
        .unwrap()
        .starts_with("act_bulk49/"));

    assert_eq!(reports.len(), 52);
    assert_eq!(reports[0].data[0].cpm, 3.11);
    let last = reports.last().unwrap();
    assert_eq!(last.id, "act_bulk49");
    assert_eq!(last.data[0].id, "b49");
    assert_eq!(last.data[0].cpm, 49.5);
    assert_eq!(last.data[0].cpl, 0.2);
    assert_eq!(last.data[0].spent, 1.0);
    let middle = &reports[27];
    assert_eq!(middle.data[0].cpm, 25.5);
}

#[tokio::test]
async fn rejected_insight_aborts_whole_report() {
    let (base, _fake) = start(Behaviour {
        reject_insight: true,
        ..Behaviour::default()
    })
    .await;

    let err = static_service(&base)
        .get_ad_stats(false, StatsMode::Campaigns, may(1), may(2), &credentials())
        .await
        .unwrap_err();

    match err {
        FbAdsError::StatsRetrieval(msg) => assert!(msg.contains("Invalid parameter")),
        other => panic!("expected StatsRetrieval, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_upstream_hits_pipeline_deadline() {
    let (base, _fake) = start(Behaviour {
        slow_accounts: true,
        ..Behaviour::default()
    })
    .await;
    let mut config = GraphConfig::with_base_url(&base);
    config.pipeline_timeout = Duration::from_millis(200);
    let service = AdsService::with_token_source(config, Arc::new(StaticTokenSource::new(TOKEN, ACCOUNT)));

    let err = service
        .get_ad_stats(false, StatsMode::Campaigns, may(1), may(2), &credentials())
        .await
        .unwrap_err();

    assert!(matches!(err, FbAdsError::Timeout(_)));
}
