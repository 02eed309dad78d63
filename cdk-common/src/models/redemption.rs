// File: cdk-common/src/models/redemption.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::caller::ClientContext;
use crate::models::code::BenefitMetadata;

/// Append-only audit record, one per redeemed code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedemptionEvent {
    pub event_id: Uuid,
    pub code: String,
    pub user_id: String,
    pub batch_id: Uuid,
    pub redeemed_at: DateTime<Utc>,
    pub client: ClientContext,
}

/// What the redeemer gets back from a successful claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemReceipt {
    pub success: bool,
    pub code: String,
    pub user_id: String,
    pub category: String,
    pub metadata: BenefitMetadata,
    pub redeemed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidReason {
    CodeNotFound,
    CodeAlreadyUsed,
    CodeExpired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<InvalidReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl VerifyOutcome {
    pub fn valid(expires_at: DateTime<Utc>) -> Self {
        Self {
            valid: true,
            reason: None,
            expires_at: Some(expires_at),
        }
    }

    pub fn invalid(reason: InvalidReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            expires_at: None,
        }
    }
}
