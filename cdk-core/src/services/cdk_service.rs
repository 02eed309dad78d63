//! Entry points for the redemption-code subsystem.
//!
//! Every call runs the same pipeline: authenticate, throttle, then hand off
//! to the owning service. The whole call runs under one deadline measured
//! from entry.
//!
//! Redeem and batch creation write more than one record, so they run in
//! their own task and the deadline only stops the wait. A redeem that
//! outlives its deadline still finishes its claim and audit event; the caller
//! gets `busy` and re-verifies. A batch that outlives its deadline is
//! discarded once it completes, so a retry never leaves a twin behind.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinError;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};
use uuid::Uuid;

use cdk_common::models::{
    BatchCreated, BatchSummary, Caller, ClientContext, NewBatchRequest, RedeemReceipt,
    RedemptionEvent, VerifyOutcome,
};
use cdk_common::traits::auth_traits::CallerAuthenticator;
use cdk_common::traits::repository_traits::{
    BatchRepository, CodeRepository, RedemptionEventRepository,
};

use crate::Error;
use crate::rate_limit::{Action, CallerKey, RateLimitConfig, RateLimiter};
use crate::services::{BatchService, RedeemService, VerifyService};

pub const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_secs(2);

/// Per-request caller information gathered by the transport.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub credential: Option<String>,
    pub network_origin: Option<String>,
}

impl RequestContext {
    pub fn new(credential: Option<&str>, network_origin: Option<&str>) -> Self {
        Self {
            credential: credential.map(String::from),
            network_origin: network_origin.map(String::from),
        }
    }
}

pub struct CdkService {
    authenticator: Arc<dyn CallerAuthenticator>,
    limiter: Arc<RateLimiter>,
    batch_service: Arc<BatchService>,
    redeem_service: Arc<RedeemService>,
    verify_service: VerifyService,
    deadline: Duration,
}

impl CdkService {
    pub fn new(
        authenticator: Arc<dyn CallerAuthenticator>,
        limiter: Arc<RateLimiter>,
        batch_service: BatchService,
        redeem_service: RedeemService,
        verify_service: VerifyService,
        deadline: Duration,
    ) -> Self {
        Self {
            authenticator,
            limiter,
            batch_service: Arc::new(batch_service),
            redeem_service: Arc::new(redeem_service),
            verify_service,
            deadline,
        }
    }

    pub fn from_repositories(
        batch_repo: Arc<dyn BatchRepository + Send + Sync>,
        code_repo: Arc<dyn CodeRepository + Send + Sync>,
        event_repo: Arc<dyn RedemptionEventRepository + Send + Sync>,
        authenticator: Arc<dyn CallerAuthenticator>,
        rate_limits: RateLimitConfig,
        deadline: Duration,
    ) -> Self {
        Self::new(
            authenticator,
            Arc::new(RateLimiter::new(rate_limits)),
            BatchService::new(batch_repo, code_repo.clone()),
            RedeemService::new(code_repo.clone(), event_repo),
            VerifyService::new(code_repo),
            deadline,
        )
    }

    pub async fn create_batch(&self, ctx: &RequestContext, req: NewBatchRequest) -> Result<BatchCreated, Error> {
        let deadline = Instant::now() + self.deadline;
        let caller = timeout_at(deadline, self.admit(ctx, Action::CreateBatch)).await??;

        let batches = self.batch_service.clone();
        let mut task = tokio::spawn(async move { batches.create_batch(&caller, req).await });

        match timeout_at(deadline, &mut task).await {
            Ok(joined) => flatten(joined),
            Err(elapsed) => {
                warn!("Batch creation passed its deadline; it will be discarded when it completes");
                let batches = self.batch_service.clone();
                tokio::spawn(async move {
                    if let Ok(Ok(created)) = task.await {
                        batches.discard(created.batch_id).await;
                    }
                });
                Err(elapsed.into())
            }
        }
    }

    pub async fn batch_summary(&self, ctx: &RequestContext, batch_id: Uuid) -> Result<BatchSummary, Error> {
        self.with_deadline(async {
            let caller = self.admit(ctx, Action::Query).await?;
            self.batch_service.batch_summary(&caller, batch_id).await
        })
        .await
    }

    pub async fn redeem(
        &self,
        ctx: &RequestContext,
        code: &str,
        mut client: ClientContext,
    ) -> Result<RedeemReceipt, Error> {
        if client.network_origin.is_none() {
            client.network_origin = ctx.network_origin.clone();
        }
        let deadline = Instant::now() + self.deadline;
        let caller = timeout_at(deadline, self.admit(ctx, Action::Redeem)).await??;

        let redeems = self.redeem_service.clone();
        let code = code.to_string();
        let mut task = tokio::spawn(async move { redeems.redeem(&caller, &code, client).await });

        match timeout_at(deadline, &mut task).await {
            Ok(joined) => flatten(joined),
            Err(elapsed) => {
                // Dropping the handle detaches the task; the claim and its
                // audit event still complete.
                warn!("Redeem passed its deadline; finishing in the background");
                Err(elapsed.into())
            }
        }
    }

    pub async fn verify(&self, ctx: &RequestContext, code: &str) -> Result<VerifyOutcome, Error> {
        self.with_deadline(async {
            self.admit(ctx, Action::Verify).await?;
            self.verify_service.verify(code).await
        })
        .await
    }

    pub async fn redemption_history(&self, ctx: &RequestContext, limit: i64) -> Result<Vec<RedemptionEvent>, Error> {
        self.with_deadline(async {
            let caller = self.admit(ctx, Action::Query).await?;
            self.redeem_service.list_redemptions_for_user(&caller, limit).await
        })
        .await
    }

    pub fn audit_failures(&self) -> u64 {
        self.redeem_service.audit_failures()
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn rate_limits(&self) -> &RateLimitConfig {
        self.limiter.config()
    }

    /// Authenticates and charges the attempt against the caller's budget.
    /// Failed authentications are charged to the network origin, so token
    /// guessing is throttled too.
    async fn admit(&self, ctx: &RequestContext, action: Action) -> Result<Caller, Error> {
        let auth = self.authenticator.authenticate(ctx.credential.as_deref()).await;
        let key = match &auth {
            Ok(caller) => CallerKey::User(&caller.user_id),
            Err(_) => CallerKey::Origin(ctx.network_origin.as_deref().unwrap_or("unknown")),
        };
        self.limiter.check(action, key)?;
        let caller = auth?;
        debug!(action = %action, user_id = %caller.user_id, "Admitted request");
        Ok(caller)
    }

    async fn with_deadline<T, F>(&self, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        tokio::time::timeout(self.deadline, fut).await?
    }
}

fn flatten<T>(joined: Result<Result<T, Error>, JoinError>) -> Result<T, Error> {
    joined.map_err(|e| Error::Internal(format!("request task failed: {e}")))?
}
