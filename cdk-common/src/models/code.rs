// File: cdk-common/src/models/code.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Opaque benefit payload. Copied by value from the batch onto each code.
pub type BenefitMetadata = serde_json::Map<String, serde_json::Value>;

/// Stored lifecycle state. Expiry is derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeStatus {
    Unused,
    Redeemed,
}

impl CodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeStatus::Unused => "unused",
            CodeStatus::Redeemed => "redeemed",
        }
    }
}

impl fmt::Display for CodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unused" => Ok(CodeStatus::Unused),
            "redeemed" => Ok(CodeStatus::Redeemed),
            other => Err(Error::Parse(format!("unknown code status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    pub code: String,
    pub batch_id: Uuid,
    pub status: CodeStatus,
    pub expires_at: DateTime<Utc>,
    pub category: String,
    pub metadata: BenefitMetadata,
    pub created_at: DateTime<Utc>,
    pub redeemed_by: Option<String>,
    pub redeemed_at: Option<DateTime<Utc>>,
}

impl Code {
    /// `status == unused AND now > expires_at`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == CodeStatus::Unused && now > self.expires_at
    }

    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == CodeStatus::Unused && now <= self.expires_at
    }
}
