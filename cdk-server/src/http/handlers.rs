// File: cdk-server/src/http/handlers.rs

use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cdk_common::error::Error;
use cdk_common::models::{
    BatchCreated, BatchSummary, ClientContext, NewBatchRequest, RedeemReceipt, RedemptionEvent,
    VerifyOutcome,
};

use super::AppState;
use super::extract::{Ctx, JsonBody};
use super::response::{ApiError, ApiResponse};

pub const DEFAULT_HISTORY_LIMIT: i64 = 20;

type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct RedeemBody {
    pub code: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub app_version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyBody {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RedemptionHistory {
    pub user_redemptions: Vec<RedemptionEvent>,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub audit_failures: u64,
}

pub async fn create_batch(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    JsonBody(req): JsonBody<NewBatchRequest>,
) -> ApiResult<BatchCreated> {
    let created = state.service.create_batch(&ctx, req).await?;
    Ok(ApiResponse::created(created))
}

pub async fn batch_summary(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    Path(batch_id): Path<String>,
) -> ApiResult<BatchSummary> {
    let batch_id = Uuid::parse_str(&batch_id)
        .map_err(|_| Error::InvalidParameters(format!("'{}' is not a batch id", batch_id)))?;
    let summary = state.service.batch_summary(&ctx, batch_id).await?;
    Ok(ApiResponse::ok(summary))
}

pub async fn redeem(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    JsonBody(body): JsonBody<RedeemBody>,
) -> ApiResult<RedeemReceipt> {
    let client = ClientContext {
        platform: body.platform,
        app_version: body.app_version,
        network_origin: None,
    };
    let receipt = state.service.redeem(&ctx, &body.code, client).await?;
    Ok(ApiResponse::ok(receipt))
}

pub async fn verify(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    JsonBody(body): JsonBody<VerifyBody>,
) -> ApiResult<VerifyOutcome> {
    let outcome = state.service.verify(&ctx, &body.code).await?;
    Ok(ApiResponse::ok(outcome))
}

pub async fn redemption_history(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<RedemptionHistory> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let user_redemptions = state.service.redemption_history(&ctx, limit).await?;
    Ok(ApiResponse::ok(RedemptionHistory { user_redemptions }))
}

pub async fn not_implemented() -> ApiError {
    ApiError(Error::NotImplemented(
        "this operation is not offered by this service".into(),
    ))
}

pub async fn healthz(State(state): State<AppState>) -> ApiResponse<Health> {
    ApiResponse::ok(Health {
        status: "ok",
        audit_failures: state.service.audit_failures(),
    })
}
