//! Checker, binder, and monitor against a local HTTP service.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Form, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use apiwatch_auth::{AuthResolver, SecretResolver, TokenCache};
use apiwatch_config::{
    AuthConfig, DataBinding, DataSourceConfig, EndpointConfig, MonitorConfig, QuerySpec,
};
use apiwatch_probe::{
    CheckResult, DataBinder, HttpChecker, LogNotifier, Monitor, Probe, Reason, RetryPolicy,
    SqlDataSources, StoreSink,
};
use apiwatch_store::EventStore;

#[derive(Clone, Default)]
struct Service {
    flaky_calls: Arc<AtomicUsize>,
    token_fetches: Arc<AtomicUsize>,
}

async fn unavailable() -> impl IntoResponse {
    (StatusCode::SERVICE_UNAVAILABLE, "down for maintenance")
}

async fn challenge() -> impl IntoResponse {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer error=\"invalid_token\"")],
        "",
    )
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "OK",
        "ok": "false",
        "a/b": "slash",
        "a~b": "tilde",
        "data": { "items": [10, 20, 30] }
    }))
}

async fn not_json() -> &'static str {
    "<html>fine</html>"
}

async fn slow() -> Json<serde_json::Value> {
    tokio::time::sleep(Duration::from_millis(150)).await;
    Json(json!({ "status": "OK" }))
}

async fn echo_headers(headers: HeaderMap) -> Json<serde_json::Value> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    Json(json!({
        "api_key": get("x-api-key"),
        "authorization": get("authorization"),
        "customer": get("x-customer"),
        "content_type": get("content-type"),
    }))
}

async fn order(
    Path(number): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Json<serde_json::Value> {
    let customer = headers
        .get("x-customer")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
    Json(json!({ "order": number, "customer": customer, "received": body }))
}

async fn flaky(State(service): State<Service>) -> impl IntoResponse {
    let n = service.flaky_calls.fetch_add(1, Ordering::SeqCst);
    if n < 2 {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})))
    } else {
        (StatusCode::OK, Json(json!({ "attempt": n + 1 })))
    }
}

async fn token(
    State(service): State<Service>,
    Form(form): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    if form.get("client_secret").map(String::as_str) != Some("right") {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid_client" })));
    }
    let n = service.token_fetches.fetch_add(1, Ordering::SeqCst) + 1;
    (
        StatusCode::OK,
        Json(json!({ "access_token": format!("token-{n}"), "expires_in": 3600 })),
    )
}

async fn stalled_token() -> StatusCode {
    tokio::time::sleep(Duration::from_secs(3600)).await;
    StatusCode::OK
}

async fn serve(service: Service) -> SocketAddr {
    let app = Router::new()
        .route("/unavailable", get(unavailable))
        .route("/challenge", get(challenge))
        .route("/health", get(health))
        .route("/not-json", get(not_json))
        .route("/slow", get(slow))
        .route("/echo", get(echo_headers).post(echo_headers))
        .route("/orders/{number}", post(order))
        .route("/flaky", get(flaky).post(flaky))
        .route("/token", post(token))
        .route("/stalled-token", post(stalled_token))
        .with_state(service);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(5),
    }
}

fn checker(config: MonitorConfig) -> HttpChecker {
    let config = Arc::new(config);
    let http = reqwest::Client::new();
    let secrets = Arc::new(SecretResolver::without_vault());
    let tokens = Arc::new(TokenCache::new(http.clone()).with_timeout(config.timeout().unwrap()));
    let auth = Arc::new(AuthResolver::new(secrets.clone(), tokens));
    let sources = Arc::new(SqlDataSources::new(config.clone(), secrets));
    let binder = Arc::new(DataBinder::new(sources));
    HttpChecker::new(http, config, binder, auth)
        .unwrap()
        .with_retry(fast_retry())
}

fn endpoint(name: &str, url: String) -> EndpointConfig {
    EndpointConfig {
        name: name.to_string(),
        url,
        ..Default::default()
    }
}

async fn check(config: MonitorConfig, ep: &EndpointConfig) -> CheckResult {
    checker(config).check(ep).await.unwrap()
}

#[tokio::test]
async fn service_unavailable_is_bad_status() {
    let addr = serve(Service::default()).await;
    let ep = endpoint("orders", format!("http://{addr}/unavailable"));

    let result = check(MonitorConfig::default(), &ep).await;
    assert!(!result.is_success());
    assert_eq!(result.reason, Reason::BadStatus);
    assert!(result.details.contains("503"));
    assert!(result.details.contains("Body: down for maintenance"));
    assert_eq!(result.persisted_status(), Some(503));
}

#[tokio::test]
async fn challenge_header_is_reported() {
    let addr = serve(Service::default()).await;
    let ep = endpoint("secure", format!("http://{addr}/challenge"));

    let result = check(MonitorConfig::default(), &ep).await;
    assert_eq!(result.reason, Reason::BadStatus);
    assert_eq!(
        result.details,
        "Got 401 (WWW-Authenticate: Bearer error=\"invalid_token\")"
    );
}

#[tokio::test]
async fn json_mismatch_beats_latency_when_fast() {
    let addr = serve(Service::default()).await;
    let mut ep = endpoint("health", format!("http://{addr}/health"));
    ep.success.max_latency_ms = Some(100);
    ep.success.json_pointer = Some("/ok".to_string());
    ep.success.expected_value = Some("true".to_string());

    let result = check(MonitorConfig::default(), &ep).await;
    assert_eq!(result.reason, Reason::JsonMismatch);
    assert!(result.details.contains("value: 'false' | Expected: 'true'"));
    assert_eq!(result.persisted_status(), None);
}

#[tokio::test]
async fn json_pointer_passes_case_insensitively() {
    let addr = serve(Service::default()).await;
    let mut ep = endpoint("health", format!("http://{addr}/health"));
    ep.success.json_pointer = Some("/status".to_string());
    ep.success.expected_value = Some("ok".to_string());
    assert_eq!(check(MonitorConfig::default(), &ep).await.reason, Reason::Ok);

    ep.success.case_insensitive = false;
    assert_eq!(
        check(MonitorConfig::default(), &ep).await.reason,
        Reason::JsonMismatch
    );
}

#[tokio::test]
async fn escaped_pointers_and_array_indexes() {
    let addr = serve(Service::default()).await;
    let mut ep = endpoint("health", format!("http://{addr}/health"));

    for (pointer, expected) in [("/a~1b", "slash"), ("/a~0b", "tilde"), ("/data/items/1", "20")] {
        ep.success.json_pointer = Some(pointer.to_string());
        ep.success.expected_value = Some(expected.to_string());
        let result = check(MonitorConfig::default(), &ep).await;
        assert_eq!(result.reason, Reason::Ok, "pointer {pointer}");
    }
}

#[tokio::test]
async fn latency_budget_exceeded_is_slow() {
    let addr = serve(Service::default()).await;
    let mut ep = endpoint("slow", format!("http://{addr}/slow"));
    ep.success.max_latency_ms = Some(50);

    let result = check(MonitorConfig::default(), &ep).await;
    assert_eq!(result.reason, Reason::Slow);
    assert!(result.details.ends_with("ms > 50ms"));
    assert!(result.elapsed >= Duration::from_millis(150));
}

#[tokio::test]
async fn unparseable_body_with_pointer_is_a_fault() {
    let addr = serve(Service::default()).await;
    let mut ep = endpoint("html", format!("http://{addr}/not-json"));
    ep.success.json_pointer = Some("/status".to_string());

    let err = checker(MonitorConfig::default()).check(&ep).await.unwrap_err();
    assert!(matches!(err, apiwatch_probe::ProbeError::Json(_)));
}

#[tokio::test]
async fn transient_statuses_are_retried_for_idempotent_methods() {
    let service = Service::default();
    let addr = serve(service.clone()).await;
    let ep = endpoint("flaky", format!("http://{addr}/flaky"));

    let result = check(MonitorConfig::default(), &ep).await;
    assert_eq!(result.reason, Reason::Ok);
    assert_eq!(service.flaky_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn post_is_not_retried() {
    let service = Service::default();
    let addr = serve(service.clone()).await;
    let mut ep = endpoint("flaky", format!("http://{addr}/flaky"));
    ep.method = "POST".to_string();

    let result = check(MonitorConfig::default(), &ep).await;
    assert_eq!(result.reason, Reason::BadStatus);
    assert_eq!(service.flaky_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn connection_refused_is_a_fault() {
    let ep = endpoint("gone", "http://127.0.0.1:1/health".to_string());
    let result = checker(MonitorConfig::default()).check(&ep).await;
    assert!(matches!(result, Err(apiwatch_probe::ProbeError::Http(_))));
}

#[tokio::test]
async fn api_key_reaches_the_service() {
    let addr = serve(Service::default()).await;
    let mut ep = endpoint("keyed", format!("http://{addr}/echo"));
    ep.auth = AuthConfig {
        kind: Some("ApiKey".to_string()),
        value: Some("s3cret".to_string()),
        ..Default::default()
    };
    ep.success.json_pointer = Some("/api_key".to_string());
    ep.success.expected_value = Some("s3cret".to_string());
    ep.success.case_insensitive = false;

    assert_eq!(check(MonitorConfig::default(), &ep).await.reason, Reason::Ok);
}

#[tokio::test]
async fn default_profile_supplies_bearer_token() {
    let service = Service::default();
    let addr = serve(service.clone()).await;

    let mut auth_profiles = BTreeMap::new();
    auth_profiles.insert(
        "Corp".to_string(),
        AuthConfig {
            kind: Some("OAuth2".to_string()),
            token_url: Some(format!("http://{addr}/token")),
            client_id: Some("monitor".to_string()),
            client_secret: Some("right".to_string()),
            scope: Some("api://orders/.default".to_string()),
            ..Default::default()
        },
    );
    let config = MonitorConfig {
        default_auth_ref: Some("corp".to_string()),
        auth_profiles,
        ..Default::default()
    };

    let mut ep = endpoint("bearer", format!("http://{addr}/echo"));
    ep.success.json_pointer = Some("/authorization".to_string());
    ep.success.expected_value = Some("Bearer token-1".to_string());

    let probe = checker(config);
    assert_eq!(probe.check(&ep).await.unwrap().reason, Reason::Ok);
    assert_eq!(probe.check(&ep).await.unwrap().reason, Reason::Ok);
    assert_eq!(service.token_fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejected_token_grant_is_a_fault() {
    let addr = serve(Service::default()).await;
    let mut ep = endpoint("bearer", format!("http://{addr}/echo"));
    ep.auth = AuthConfig {
        kind: Some("Bearer".to_string()),
        token_url: Some(format!("http://{addr}/token")),
        client_id: Some("monitor".to_string()),
        client_secret: Some("wrong".to_string()),
        ..Default::default()
    };

    let err = checker(MonitorConfig::default()).check(&ep).await.unwrap_err();
    assert!(matches!(err, apiwatch_probe::ProbeError::Auth(_)));
}

#[tokio::test]
async fn stalled_token_endpoint_fails_the_check_in_time() {
    let addr = serve(Service::default()).await;
    let mut ep = endpoint("bearer", format!("http://{addr}/echo"));
    ep.auth = AuthConfig {
        kind: Some("OAuth2".to_string()),
        token_url: Some(format!("http://{addr}/stalled-token")),
        client_id: Some("monitor".to_string()),
        client_secret: Some("right".to_string()),
        ..Default::default()
    };
    let config = MonitorConfig {
        default_timeout: "300ms".to_string(),
        ..Default::default()
    };

    let outcome = tokio::time::timeout(Duration::from_secs(5), checker(config).check(&ep))
        .await
        .expect("check should not hang on the token endpoint");
    assert!(matches!(outcome, Err(apiwatch_probe::ProbeError::Auth(_))));
}

#[tokio::test]
async fn binding_substitutes_database_values() {
    let addr = serve(Service::default()).await;

    let mut data_sources = BTreeMap::new();
    data_sources.insert(
        "Erp".to_string(),
        DataSourceConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        },
    );
    let config = MonitorConfig {
        data_sources,
        ..Default::default()
    };

    let mut headers = BTreeMap::new();
    headers.insert("X-Customer".to_string(), "{Customer}".to_string());
    let mut ep = endpoint("order", String::new());
    ep.method = "POST".to_string();
    ep.binding = Some(DataBinding {
        data_source: Some("erp".to_string()),
        queries: vec![
            QuerySpec {
                name: "OrderNo".to_string(),
                sql: "SELECT 'A 17'".to_string(),
            },
            QuerySpec {
                name: "Customer".to_string(),
                sql: "SELECT 'acme'".to_string(),
            },
            QuerySpec {
                name: "Qty".to_string(),
                sql: "SELECT 3".to_string(),
            },
        ],
        url_template: Some(format!("http://{addr}/orders/{{OrderNo}}")),
        body_template: Some(r#"{"qty": {Qty}, "note": "{Missing}"}"#.to_string()),
        headers,
    });
    ep.success.json_pointer = Some("/order".to_string());
    ep.success.expected_value = Some("a 17".to_string());

    let probe = checker(config);
    assert_eq!(probe.check(&ep).await.unwrap().reason, Reason::Ok);

    ep.success.json_pointer = Some("/received/qty".to_string());
    ep.success.expected_value = Some("3".to_string());
    assert_eq!(probe.check(&ep).await.unwrap().reason, Reason::Ok);

    ep.success.json_pointer = Some("/received/note".to_string());
    ep.success.expected_value = None;
    assert_eq!(probe.check(&ep).await.unwrap().reason, Reason::Ok);

    ep.success.json_pointer = Some("/customer".to_string());
    ep.success.expected_value = Some("ACME".to_string());
    assert_eq!(probe.check(&ep).await.unwrap().reason, Reason::Ok);
}

#[tokio::test]
async fn binding_with_unknown_data_source_is_a_fault() {
    let addr = serve(Service::default()).await;
    let mut ep = endpoint("order", format!("http://{addr}/health"));
    ep.binding = Some(DataBinding {
        data_source: Some("nowhere".to_string()),
        queries: vec![QuerySpec {
            name: "x".to_string(),
            sql: "SELECT 1".to_string(),
        }],
        ..Default::default()
    });

    let err = checker(MonitorConfig::default()).check(&ep).await.unwrap_err();
    assert!(matches!(
        err,
        apiwatch_probe::ProbeError::DataSourceNotFound(name) if name == "nowhere"
    ));
}

#[tokio::test]
async fn monitor_records_every_attempt_in_the_store() {
    let addr = serve(Service::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let store = EventStore::open(&dir.path().join("events.redb")).unwrap();

    let mut ok = endpoint("health", format!("http://{addr}/health"));
    ok.environment = Some("Staging".to_string());
    let down = endpoint("down", format!("http://{addr}/unavailable"));

    let config = MonitorConfig::default();
    let probe = Arc::new(checker(config.clone()));
    let sink = Arc::new(StoreSink::new(store.clone(), config.default_environment.clone()));
    let monitor = Monitor::new(probe, sink, Arc::new(LogNotifier)).with_jitter(0..0);

    monitor.start(ok).await;
    monitor.start(down).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while store.count().unwrap() < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    monitor.stop_all().await;

    let latest = store.latest().unwrap();
    assert_eq!(latest.len(), 2);

    let down = latest.iter().find(|e| e.endpoint_name == "down").unwrap();
    assert_eq!(down.environment, "Prod");
    assert!(!down.is_success);
    assert_eq!(down.reason, "BadStatus");
    assert_eq!(down.http_status, Some(503));

    let health = latest.iter().find(|e| e.endpoint_name == "health").unwrap();
    assert_eq!(health.environment, "Staging");
    assert!(health.is_success);
    assert_eq!(health.http_status, Some(200));
    assert_eq!(health.reason, "OK");
}
