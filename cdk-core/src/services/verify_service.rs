use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use cdk_common::models::{CodeStatus, InvalidReason, VerifyOutcome};
use cdk_common::traits::repository_traits::CodeRepository;

use crate::Error;
use crate::services::code_generator::normalize_code;

/// Read-only pre-flight check. Never writes.
pub struct VerifyService {
    code_repo: Arc<dyn CodeRepository + Send + Sync>,
}

impl VerifyService {
    pub fn new(code_repo: Arc<dyn CodeRepository + Send + Sync>) -> Self {
        Self { code_repo }
    }

    pub async fn verify(&self, raw_code: &str) -> Result<VerifyOutcome, Error> {
        let code = normalize_code(raw_code)?;
        let now = Utc::now();

        let outcome = match self.code_repo.get_code(&code).await? {
            None => VerifyOutcome::invalid(InvalidReason::CodeNotFound),
            Some(c) if c.status == CodeStatus::Redeemed => {
                VerifyOutcome::invalid(InvalidReason::CodeAlreadyUsed)
            }
            Some(c) if c.is_expired_at(now) => VerifyOutcome::invalid(InvalidReason::CodeExpired),
            Some(c) => VerifyOutcome::valid(c.expires_at),
        };
        debug!(code = %code, valid = outcome.valid, "Verified code");
        Ok(outcome)
    }
}
