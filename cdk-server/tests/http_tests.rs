// File: cdk-server/tests/http_tests.rs

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use cdk_core::rate_limit::{Budget, RateLimitConfig};
use cdk_core::repositories::InMemoryStore;
use cdk_core::test_utils::helpers::{ISSUER_TOKEN, memory_service, user_token};
use cdk_server::http::{AppState, create_router};

fn test_app(rate_limits: RateLimitConfig) -> (Router, Arc<InMemoryStore>) {
    let (service, store) = memory_service(3, rate_limits);
    let state = AppState::new(Arc::new(service)).trusting_forwarded_for(true);
    (create_router(state), store)
}

async fn send(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "203.0.113.50");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .expect("valid request"),
        None => builder.body(Body::empty()).expect("valid request"),
    };

    let response = app.clone().oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("JSON body")
    };
    (status, value)
}

async fn mint(app: &Router, count: i64) -> (String, Vec<String>) {
    let (status, body) = send(
        app,
        Method::POST,
        "/v1/batches",
        Some(ISSUER_TOKEN),
        Some(json!({
            "prefix": "SUM",
            "count": count,
            "length": 8,
            "category": "summer-event",
            "metadata": {"reward": "gems", "amount": 500}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let batch_id = body["data"]["batch_id"].as_str().expect("batch id").to_string();
    let sample = body["data"]["sample"]
        .as_array()
        .expect("sample")
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect();
    (batch_id, sample)
}

fn error_kind(body: &Value) -> &str {
    assert_eq!(body["success"], json!(false), "{body}");
    body["error"]["kind"].as_str().expect("error kind")
}

#[tokio::test]
async fn create_batch_returns_envelope_with_sample() {
    let (app, store) = test_app(RateLimitConfig::default());
    let (batch_id, sample) = mint(&app, 3).await;

    assert_eq!(sample.len(), 3);
    assert!(sample.iter().all(|c| c.len() == 8 && c.starts_with("SUM")));
    assert_eq!(store.code_count(), 3);

    let (status, body) = send(&app, Method::GET, &format!("/v1/batches/{batch_id}"), Some(ISSUER_TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["counts"]["unused"], json!(3));
    assert_eq!(body["data"]["batch"]["category"], json!("summer-event"));
}

#[tokio::test]
async fn redeem_then_retry_maps_to_conflict() {
    let (app, _store) = test_app(RateLimitConfig::default());
    let (_, sample) = mint(&app, 2).await;

    let token = user_token(1);
    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/redeem",
        Some(&token),
        Some(json!({"code": sample[0], "platform": "ios", "app_version": "3.2.1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["success"], json!(true));
    assert_eq!(body["data"]["metadata"]["reward"], json!("gems"));

    let other = user_token(2);
    let (status, body) = send(&app, Method::POST, "/v1/redeem", Some(&other), Some(json!({"code": sample[0]}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_kind(&body), "code-already-used");

    let (status, body) = send(&app, Method::GET, "/v1/users/me/redemptions", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let history = body["data"]["user_redemptions"].as_array().expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["client"]["network_origin"], json!("203.0.113.50"));
    assert_eq!(history[0]["client"]["platform"], json!("ios"));
}

#[tokio::test]
async fn forwarded_for_is_ignored_without_trusted_proxy() {
    let (service, _store) = memory_service(1, RateLimitConfig::default());
    let app = create_router(AppState::new(Arc::new(service)));
    let (_, sample) = mint(&app, 1).await;

    let token = user_token(1);
    let (status, _) = send(&app, Method::POST, "/v1/redeem", Some(&token), Some(json!({"code": sample[0]}))).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, Method::GET, "/v1/users/me/redemptions", Some(&token), None).await;
    let history = body["data"]["user_redemptions"].as_array().expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["client"]["network_origin"], Value::Null);
}

#[tokio::test]
async fn verify_reports_reasons_without_consuming() {
    let (app, store) = test_app(RateLimitConfig::default());
    let (_, sample) = mint(&app, 1).await;
    let token = user_token(1);

    let (status, body) = send(&app, Method::POST, "/v1/verify", Some(&token), Some(json!({"code": sample[0]}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], json!(true));
    assert!(body["data"]["expires_at"].is_string());
    assert_eq!(store.event_count(), 0);

    let (status, body) = send(&app, Method::POST, "/v1/verify", Some(&token), Some(json!({"code": "NOPE2345"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], json!(false));
    assert_eq!(body["data"]["reason"], json!("code-not-found"));
}

#[tokio::test]
async fn failure_kinds_map_to_status_codes() {
    let (app, store) = test_app(RateLimitConfig::default());
    let (_, sample) = mint(&app, 2).await;

    // No credential.
    let (status, body) = send(&app, Method::POST, "/v1/redeem", None, Some(json!({"code": sample[0]}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_kind(&body), "unauthorized");

    // Plain user on an issuer route.
    let token = user_token(1);
    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/batches",
        Some(&token),
        Some(json!({"count": 1, "length": 8, "category": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_kind(&body), "forbidden");

    // Out-of-range count.
    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/batches",
        Some(ISSUER_TOKEN),
        Some(json!({"count": 1001, "length": 8, "category": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(&body), "invalid-parameters");

    // Malformed body.
    let (status, body) = send(&app, Method::POST, "/v1/redeem", Some(&token), Some(json!({"nope": 1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(&body), "invalid-parameters");

    // Unknown code.
    let (status, body) = send(&app, Method::POST, "/v1/redeem", Some(&token), Some(json!({"code": "SUMZZZZZ"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_kind(&body), "code-not-found");

    // Expired code.
    store
        .set_code_expiry(&sample[1], chrono::Utc::now() - chrono::Duration::minutes(5))
        .expect("code exists");
    let (status, body) = send(&app, Method::POST, "/v1/redeem", Some(&token), Some(json!({"code": sample[1]}))).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(error_kind(&body), "code-expired");

    // Unknown batch and unparsable batch id.
    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/v1/batches/{}", uuid::Uuid::new_v4()),
        Some(ISSUER_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_kind(&body), "not-found");

    let (status, _) = send(&app, Method::GET, "/v1/batches/not-a-uuid", Some(ISSUER_TOKEN), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rate_limited_requests_get_429_and_retry_after() {
    let limits = RateLimitConfig {
        verify: Budget::per_minute(1),
        ..Default::default()
    };
    let (app, _store) = test_app(limits);
    let token = user_token(1);

    let (status, _) = send(&app, Method::POST, "/v1/verify", Some(&token), Some(json!({"code": "ANYCODE2"}))).await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/verify")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"code": "ANYCODE2"}).to_string()))
        .expect("valid request");
    let response = app.clone().oneshot(request).await.expect("router is infallible");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn options_describes_route_without_auth() {
    let (app, store) = test_app(RateLimitConfig::default());

    let (status, body) = send(&app, Method::OPTIONS, "/v1/redeem", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["auth"], json!("bearer"));
    assert_eq!(body["data"]["rate_limit"]["action"], json!("redeem"));
    assert_eq!(body["data"]["rate_limit"]["max_requests"], json!(20));
    assert_eq!(body["data"]["rate_limit"]["window_secs"], json!(60));

    let (status, body) = send(&app, Method::OPTIONS, "/v1/batches", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["role"], json!("issuer"));
    assert_eq!(store.code_count(), 0);
}

#[tokio::test]
async fn unsupported_operations_are_501() {
    let (app, _store) = test_app(RateLimitConfig::default());

    let (status, body) = send(&app, Method::POST, "/v1/codes/SUMABCDE/revoke", Some(ISSUER_TOKEN), None).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(error_kind(&body), "not-implemented");

    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/v1/batches/{}/export", uuid::Uuid::new_v4()),
        Some(ISSUER_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn healthz_reports_audit_failures() {
    let (app, _store) = test_app(RateLimitConfig::default());

    let (status, body) = send(&app, Method::GET, "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], json!("ok"));
    assert_eq!(body["data"]["audit_failures"], json!(0));
}
