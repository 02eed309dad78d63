//! Router wiring.
//!
//! Every documented route also answers `OPTIONS` with what it accepts, which
//! role it needs and the budget it is charged against. Discovery requests are
//! not authenticated and not rate limited.

use axum::Router;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, any, get, post};
use axum::http::{HeaderValue, header};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use cdk_core::rate_limit::Action;

use super::AppState;
use super::handlers;
use super::response::ApiResponse;

#[derive(Debug, Clone, Copy)]
struct RouteInfo {
    path: &'static str,
    methods: &'static [&'static str],
    role: Option<&'static str>,
    action: Action,
}

const BATCHES: RouteInfo = RouteInfo {
    path: "/v1/batches",
    methods: &["POST", "OPTIONS"],
    role: Some("issuer"),
    action: Action::CreateBatch,
};

const BATCH: RouteInfo = RouteInfo {
    path: "/v1/batches/{batch_id}",
    methods: &["GET", "OPTIONS"],
    role: Some("issuer"),
    action: Action::Query,
};

const REDEEM: RouteInfo = RouteInfo {
    path: "/v1/redeem",
    methods: &["POST", "OPTIONS"],
    role: None,
    action: Action::Redeem,
};

const VERIFY: RouteInfo = RouteInfo {
    path: "/v1/verify",
    methods: &["POST", "OPTIONS"],
    role: None,
    action: Action::Verify,
};

const HISTORY: RouteInfo = RouteInfo {
    path: "/v1/users/me/redemptions",
    methods: &["GET", "OPTIONS"],
    role: None,
    action: Action::Query,
};

#[derive(Debug, Serialize)]
pub struct Capability {
    pub path: &'static str,
    pub methods: &'static [&'static str],
    pub auth: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    pub rate_limit: RateLimitView,
}

#[derive(Debug, Serialize)]
pub struct RateLimitView {
    pub action: &'static str,
    pub max_requests: u32,
    pub window_secs: u64,
}

fn capability(info: RouteInfo) -> MethodRouter<AppState> {
    axum::routing::options(move |State(state): State<AppState>| async move {
        let budget = state.service.rate_limits().budget(info.action);
        let mut response: Response = ApiResponse::ok(Capability {
            path: info.path,
            methods: info.methods,
            auth: "bearer",
            role: info.role,
            rate_limit: RateLimitView {
                action: info.action.as_str(),
                max_requests: budget.max_requests,
                window_secs: budget.window.as_secs(),
            },
        })
        .into_response();
        if let Ok(allow) = HeaderValue::from_str(&info.methods.join(", ")) {
            response.headers_mut().insert(header::ALLOW, allow);
        }
        response
    })
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(BATCHES.path, post(handlers::create_batch).merge(capability(BATCHES)))
        .route(BATCH.path, get(handlers::batch_summary).merge(capability(BATCH)))
        .route(REDEEM.path, post(handlers::redeem).merge(capability(REDEEM)))
        .route(VERIFY.path, post(handlers::verify).merge(capability(VERIFY)))
        .route(HISTORY.path, get(handlers::redemption_history).merge(capability(HISTORY)))
        .route("/v1/batches/{batch_id}/export", any(handlers::not_implemented))
        .route("/v1/codes/{code}/revoke", any(handlers::not_implemented))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
