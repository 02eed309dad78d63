// File: cdk-common/src/models/batch.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::code::BenefitMetadata;

/// One issuance request. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: Uuid,
    pub prefix: String,
    pub requested_count: i32,
    pub code_length: i32,
    pub expires_at: DateTime<Utc>,
    pub category: String,
    pub metadata: BenefitMetadata,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Parameters an issuer supplies to mint a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewBatchRequest {
    #[serde(default)]
    pub prefix: String,
    pub count: i64,
    pub length: i64,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub category: String,
    #[serde(default)]
    pub metadata: BenefitMetadata,
}

/// Returned to the operator after a successful issuance. Only a sample of
/// the codes is included, never the full list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCreated {
    pub batch_id: Uuid,
    pub created: usize,
    pub sample: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeCounts {
    pub unused: i64,
    pub redeemed: i64,
    pub expired: i64,
}

impl CodeCounts {
    pub fn total(&self) -> i64 {
        self.unused + self.redeemed + self.expired
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch: Batch,
    pub counts: CodeCounts,
}
