use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use cdk_common::models::{
    Caller, ClientContext, CodeStatus, RedeemReceipt, RedemptionEvent,
};
use cdk_common::traits::repository_traits::{CodeRepository, RedemptionEventRepository};

use crate::Error;
use crate::services::code_generator::normalize_code;

pub const MAX_HISTORY_LIMIT: i64 = 100;

pub struct RedeemService {
    code_repo: Arc<dyn CodeRepository + Send + Sync>,
    event_repo: Arc<dyn RedemptionEventRepository + Send + Sync>,
    /// Claims that succeeded but whose audit event could not be written.
    audit_failures: AtomicU64,
}

impl RedeemService {
    pub fn new(
        code_repo: Arc<dyn CodeRepository + Send + Sync>,
        event_repo: Arc<dyn RedemptionEventRepository + Send + Sync>,
    ) -> Self {
        Self {
            code_repo,
            event_repo,
            audit_failures: AtomicU64::new(0),
        }
    }

    /// Consumes `raw_code` for `caller`.
    ///
    /// The state change is one conditional write in the store. When it matches
    /// nothing, the current record is read only to pick the precise failure.
    /// Retrying after a success always yields `CodeAlreadyUsed`.
    pub async fn redeem(
        &self,
        caller: &Caller,
        raw_code: &str,
        client: ClientContext,
    ) -> Result<RedeemReceipt, Error> {
        let code = normalize_code(raw_code)?;
        let now = Utc::now();

        let claimed = self
            .code_repo
            .claim_code(&code, &caller.user_id, now)
            .await
            .map_err(|e| {
                error!(
                    code = %code,
                    user_id = %caller.user_id,
                    at = %now,
                    error = %e,
                    "Claim failed at the store"
                );
                e
            })?;

        let Some(claimed) = claimed else {
            return Err(self.explain_unclaimed(&code, caller, now).await);
        };

        let event = RedemptionEvent {
            event_id: Uuid::new_v4(),
            code: claimed.code.clone(),
            user_id: caller.user_id.clone(),
            batch_id: claimed.batch_id,
            redeemed_at: now,
            client,
        };
        if let Err(e) = self.event_repo.append_event(&event).await {
            // The claim stands; the user keeps the benefit. Operators get the
            // counter and this log line.
            self.audit_failures.fetch_add(1, Ordering::Relaxed);
            error!(
                code = %event.code,
                batch_id = %event.batch_id,
                user_id = %event.user_id,
                at = %event.redeemed_at,
                error = %e,
                "Redemption succeeded but the audit event was not recorded"
            );
        }

        info!(
            code = %claimed.code,
            batch_id = %claimed.batch_id,
            user_id = %caller.user_id,
            "Code redeemed"
        );

        Ok(RedeemReceipt {
            success: true,
            code: claimed.code,
            user_id: caller.user_id.clone(),
            category: claimed.category,
            metadata: claimed.metadata,
            redeemed_at: now,
        })
    }

    /// Redemption history for the caller, newest first.
    pub async fn list_redemptions_for_user(
        &self,
        caller: &Caller,
        limit: i64,
    ) -> Result<Vec<RedemptionEvent>, Error> {
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        self.event_repo.list_events_for_user(&caller.user_id, limit).await
    }

    pub fn audit_failures(&self) -> u64 {
        self.audit_failures.load(Ordering::Relaxed)
    }

    async fn explain_unclaimed(&self, code: &str, caller: &Caller, now: chrono::DateTime<Utc>) -> Error {
        match self.code_repo.get_code(code).await {
            Ok(None) => Error::CodeNotFound(code.to_string()),
            Ok(Some(c)) if c.status == CodeStatus::Redeemed => Error::CodeAlreadyUsed(code.to_string()),
            Ok(Some(c)) if c.is_expired_at(now) => Error::CodeExpired(code.to_string()),
            Ok(Some(c)) => {
                // Unused and unexpired yet the conditional write matched
                // nothing: the row changed between the two statements.
                warn!(
                    code = %code,
                    batch_id = %c.batch_id,
                    user_id = %caller.user_id,
                    "Claim missed a claimable code"
                );
                Error::Internal(format!("claim on {} did not apply", code))
            }
            Err(e) => {
                error!(
                    code = %code,
                    user_id = %caller.user_id,
                    at = %now,
                    error = %e,
                    "Failed to read code after unmatched claim"
                );
                e
            }
        }
    }
}
