//! In-memory store for tests and single-process deployments.
//!
//! Implements all three repository traits over `DashMap`s. The claim path
//! takes the shard lock of the code's entry and flips the state inside that
//! one critical section, so it has the same compare-and-set semantics as the
//! conditional `UPDATE` used by the Postgres backend.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use cdk_common::error::Error;
use cdk_common::models::{Batch, Code, CodeCounts, CodeStatus, RedemptionEvent};
use cdk_common::traits::repository_traits::{
    BatchRepository, CodeRepository, RedemptionEventRepository,
};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    batches: DashMap<Uuid, Batch>,
    codes: DashMap<String, Code>,
    /// Keyed by code: at most one event per code.
    events: DashMap<String, RedemptionEvent>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn code_count(&self) -> usize {
        self.codes.len()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Rewrites a code's expiry. Operator/test hook; not reachable from the
    /// request path.
    pub fn set_code_expiry(&self, code: &str, expires_at: DateTime<Utc>) -> Result<(), Error> {
        match self.codes.get_mut(code) {
            Some(mut entry) => {
                entry.expires_at = expires_at;
                Ok(())
            }
            None => Err(Error::CodeNotFound(code.to_string())),
        }
    }

    pub fn codes_for_batch(&self, batch_id: Uuid) -> Vec<Code> {
        self.codes
            .iter()
            .filter(|c| c.batch_id == batch_id)
            .map(|c| c.value().clone())
            .collect()
    }
}

#[async_trait]
impl BatchRepository for InMemoryStore {
    async fn create_batch(&self, batch: &Batch) -> Result<(), Error> {
        match self.batches.entry(batch.batch_id) {
            Entry::Occupied(_) => Err(Error::Internal(format!(
                "batch {} already exists",
                batch.batch_id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(batch.clone());
                Ok(())
            }
        }
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<Batch>, Error> {
        Ok(self.batches.get(&batch_id).map(|b| b.value().clone()))
    }

    async fn discard_batch(&self, batch_id: Uuid) -> Result<u64, Error> {
        let mut removed = 0;
        let mut kept = 0;
        self.codes.retain(|_, c| {
            if c.batch_id != batch_id {
                return true;
            }
            if c.status == CodeStatus::Unused {
                removed += 1;
                false
            } else {
                kept += 1;
                true
            }
        });
        if kept == 0 {
            self.batches.remove(&batch_id);
        }
        Ok(removed)
    }
}

#[async_trait]
impl CodeRepository for InMemoryStore {
    async fn insert_codes(&self, batch: &Batch, codes: &[String]) -> Result<Vec<String>, Error> {
        if !self.batches.contains_key(&batch.batch_id) {
            return Err(Error::Internal(format!(
                "codes reference unknown batch {}",
                batch.batch_id
            )));
        }

        let mut rejected = Vec::new();
        for code in codes {
            match self.codes.entry(code.clone()) {
                Entry::Occupied(_) => rejected.push(code.clone()),
                Entry::Vacant(entry) => {
                    entry.insert(Code {
                        code: code.clone(),
                        batch_id: batch.batch_id,
                        status: CodeStatus::Unused,
                        expires_at: batch.expires_at,
                        category: batch.category.clone(),
                        metadata: batch.metadata.clone(),
                        created_at: batch.created_at,
                        redeemed_by: None,
                        redeemed_at: None,
                    });
                }
            }
        }
        Ok(rejected)
    }

    async fn get_code(&self, code: &str) -> Result<Option<Code>, Error> {
        Ok(self.codes.get(code).map(|c| c.value().clone()))
    }

    async fn claim_code(
        &self,
        code: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Code>, Error> {
        // `get_mut` holds the shard write lock until `entry` drops.
        let Some(mut entry) = self.codes.get_mut(code) else {
            return Ok(None);
        };
        if !entry.is_claimable_at(now) {
            return Ok(None);
        }
        entry.status = CodeStatus::Redeemed;
        entry.redeemed_by = Some(user_id.to_string());
        entry.redeemed_at = Some(now);
        Ok(Some(entry.value().clone()))
    }

    async fn count_codes_for_batch(&self, batch_id: Uuid, now: DateTime<Utc>) -> Result<CodeCounts, Error> {
        let mut counts = CodeCounts::default();
        for c in self.codes.iter().filter(|c| c.batch_id == batch_id) {
            match c.status {
                CodeStatus::Redeemed => counts.redeemed += 1,
                CodeStatus::Unused if c.is_expired_at(now) => counts.expired += 1,
                CodeStatus::Unused => counts.unused += 1,
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl RedemptionEventRepository for InMemoryStore {
    async fn append_event(&self, event: &RedemptionEvent) -> Result<(), Error> {
        let redeemed = self
            .codes
            .get(&event.code)
            .is_some_and(|c| c.status == CodeStatus::Redeemed);
        if !redeemed {
            return Err(Error::Internal(format!(
                "redemption event for code {} which is not redeemed",
                event.code
            )));
        }

        match self.events.entry(event.code.clone()) {
            Entry::Occupied(_) => Err(Error::Internal(format!(
                "redemption event for code {} already recorded",
                event.code
            ))),
            Entry::Vacant(entry) => {
                entry.insert(event.clone());
                Ok(())
            }
        }
    }

    async fn get_event_for_code(&self, code: &str) -> Result<Option<RedemptionEvent>, Error> {
        Ok(self.events.get(code).map(|e| e.value().clone()))
    }

    async fn list_events_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<RedemptionEvent>, Error> {
        let mut list: Vec<RedemptionEvent> = self
            .events
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.value().clone())
            .collect();
        list.sort_by(|a, b| b.redeemed_at.cmp(&a.redeemed_at));
        list.truncate(limit.max(0) as usize);
        Ok(list)
    }
}
