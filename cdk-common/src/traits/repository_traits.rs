use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Error;
use crate::models::{Batch, Code, CodeCounts, RedemptionEvent};

#[async_trait]
pub trait BatchRepository: Send + Sync {
    async fn create_batch(&self, batch: &Batch) -> Result<(), Error>;
    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<Batch>, Error>;

    /// Removes a batch that was never handed to its issuer: its unused codes,
    /// then the batch row itself once no code references it. Returns the
    /// number of codes removed.
    async fn discard_batch(&self, batch_id: Uuid) -> Result<u64, Error>;
}

#[async_trait]
pub trait CodeRepository: Send + Sync {
    /// Inserts one `unused` row per code, copying expiry, category and
    /// metadata from `batch`. Rows whose code string already exists are
    /// skipped by the unique constraint and returned so the caller can
    /// regenerate them.
    async fn insert_codes(&self, batch: &Batch, codes: &[String]) -> Result<Vec<String>, Error>;

    async fn get_code(&self, code: &str) -> Result<Option<Code>, Error>;

    /// Single conditional write: unused and unexpired -> redeemed.
    /// Returns the updated record, or `None` when no row matched.
    async fn claim_code(
        &self,
        code: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Code>, Error>;

    async fn count_codes_for_batch(&self, batch_id: Uuid, now: DateTime<Utc>) -> Result<CodeCounts, Error>;
}

#[async_trait]
pub trait RedemptionEventRepository: Send + Sync {
    async fn append_event(&self, event: &RedemptionEvent) -> Result<(), Error>;
    async fn get_event_for_code(&self, code: &str) -> Result<Option<RedemptionEvent>, Error>;
    async fn list_events_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<RedemptionEvent>, Error>;
}
