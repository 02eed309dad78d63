use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use cdk_common::models::{Batch, BatchCreated, BatchSummary, Caller, NewBatchRequest, Role};
use cdk_common::traits::repository_traits::{BatchRepository, CodeRepository};

use crate::Error;
use crate::services::code_generator::{self, MAX_CODE_LENGTH, MIN_CODE_LENGTH};

pub const MIN_BATCH_COUNT: i64 = 1;
pub const MAX_BATCH_COUNT: i64 = 1000;
pub const DEFAULT_EXPIRY_DAYS: i64 = 30;
pub const MAX_CATEGORY_LEN: usize = 64;

/// Regeneration attempts per slot when a fresh code repeats one already
/// produced for this batch.
pub const MAX_GENERATE_ATTEMPTS: usize = 10;

/// Insert rounds against the store's unique constraint before giving up.
pub const MAX_INSERT_ROUNDS: usize = 3;

pub const SAMPLE_SIZE: usize = 5;

pub struct BatchService {
    batch_repo: Arc<dyn BatchRepository + Send + Sync>,
    code_repo: Arc<dyn CodeRepository + Send + Sync>,
}

impl BatchService {
    pub fn new(
        batch_repo: Arc<dyn BatchRepository + Send + Sync>,
        code_repo: Arc<dyn CodeRepository + Send + Sync>,
    ) -> Self {
        Self {
            batch_repo,
            code_repo,
        }
    }

    /// Mints a batch of `count` codes for an issuer.
    ///
    /// Role and parameters are checked before anything is written. Codes are
    /// generated up front, then the batch row is written, then all codes go
    /// out in one bulk insert. Codes the store rejects as duplicates are
    /// regenerated and re-inserted for up to `MAX_INSERT_ROUNDS` rounds.
    /// A batch that fails after its row was written is discarded, so the
    /// store never keeps a batch short of its codes.
    pub async fn create_batch(&self, issuer: &Caller, req: NewBatchRequest) -> Result<BatchCreated, Error> {
        require_issuer(issuer)?;

        let now = Utc::now();
        let validated = validate_request(&req, now)?;

        let batch = Batch {
            batch_id: Uuid::new_v4(),
            prefix: validated.prefix,
            requested_count: validated.count as i32,
            code_length: validated.length as i32,
            expires_at: validated.expires_at,
            category: validated.category,
            metadata: req.metadata,
            created_by: issuer.user_id.clone(),
            created_at: now,
        };

        let mut produced: HashSet<String> = HashSet::with_capacity(validated.count);
        let mut codes = Vec::with_capacity(validated.count);
        for _ in 0..validated.count {
            codes.push(self.fresh_code(&batch, &mut produced)?);
        }

        self.batch_repo.create_batch(&batch).await.map_err(|e| {
            error!(
                batch_id = %batch.batch_id,
                issuer = %issuer.user_id,
                error = %e,
                "Failed to persist batch"
            );
            e
        })?;

        if let Err(e) = self.insert_all(&batch, &mut codes, &mut produced).await {
            self.discard(batch.batch_id).await;
            return Err(e);
        }

        info!(
            batch_id = %batch.batch_id,
            issuer = %issuer.user_id,
            count = codes.len(),
            category = %batch.category,
            "Created code batch"
        );

        Ok(BatchCreated {
            batch_id: batch.batch_id,
            created: codes.len(),
            sample: codes.iter().take(SAMPLE_SIZE).cloned().collect(),
            expires_at: batch.expires_at,
        })
    }

    /// Removes a batch nobody will receive. Failures are logged only; the
    /// caller already has an error or has gone away.
    pub async fn discard(&self, batch_id: Uuid) {
        match self.batch_repo.discard_batch(batch_id).await {
            Ok(removed) => warn!(batch_id = %batch_id, removed, "Discarded incomplete batch"),
            Err(e) => error!(
                batch_id = %batch_id,
                error = %e,
                "Failed to discard incomplete batch"
            ),
        }
    }

    /// Bulk-inserts `codes`, replacing the ones the store rejects.
    async fn insert_all(
        &self,
        batch: &Batch,
        codes: &mut [String],
        produced: &mut HashSet<String>,
    ) -> Result<(), Error> {
        let mut pending = codes.to_vec();
        for round in 0..MAX_INSERT_ROUNDS {
            let rejected = self.code_repo.insert_codes(batch, &pending).await.map_err(|e| {
                error!(
                    batch_id = %batch.batch_id,
                    round,
                    error = %e,
                    "Bulk code insert failed"
                );
                e
            })?;
            if rejected.is_empty() {
                return Ok(());
            }

            warn!(
                batch_id = %batch.batch_id,
                collisions = rejected.len(),
                round,
                "Store rejected duplicate codes, regenerating"
            );
            let rejected: HashSet<String> = rejected.into_iter().collect();
            pending.clear();
            for slot in codes.iter_mut() {
                if rejected.contains(slot) {
                    let replacement = self.fresh_code(batch, produced)?;
                    *slot = replacement.clone();
                    pending.push(replacement);
                }
            }
        }

        error!(
            batch_id = %batch.batch_id,
            missing = pending.len(),
            "Giving up on batch after repeated code collisions"
        );
        Err(Error::Collision(format!(
            "{} codes of batch {} could not be made unique",
            pending.len(),
            batch.batch_id
        )))
    }

    /// Operator view of one batch with live state counts.
    pub async fn batch_summary(&self, issuer: &Caller, batch_id: Uuid) -> Result<BatchSummary, Error> {
        require_issuer(issuer)?;

        let batch = self
            .batch_repo
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("batch {}", batch_id)))?;
        let counts = self.code_repo.count_codes_for_batch(batch_id, Utc::now()).await?;
        Ok(BatchSummary { batch, counts })
    }

    /// Draws a code not yet produced for this batch. A slot that still
    /// collides after `MAX_GENERATE_ATTEMPTS` fails the batch rather than
    /// accepting a duplicate.
    fn fresh_code(&self, batch: &Batch, produced: &mut HashSet<String>) -> Result<String, Error> {
        for attempt in 1..=MAX_GENERATE_ATTEMPTS {
            let code = code_generator::generate(batch.code_length as usize, &batch.prefix);
            if produced.insert(code.clone()) {
                return Ok(code);
            }
            warn!(batch_id = %batch.batch_id, attempt, "Generated duplicate code within batch");
        }
        Err(Error::Collision(format!(
            "no unique code after {} attempts for batch {}",
            MAX_GENERATE_ATTEMPTS, batch.batch_id
        )))
    }
}

fn require_issuer(caller: &Caller) -> Result<(), Error> {
    if caller.has_role(Role::Issuer) {
        Ok(())
    } else {
        Err(Error::Forbidden(format!(
            "caller '{}' lacks the issuer role",
            caller.user_id
        )))
    }
}

struct ValidatedRequest {
    prefix: String,
    count: usize,
    length: usize,
    expires_at: DateTime<Utc>,
    category: String,
}

fn validate_request(req: &NewBatchRequest, now: DateTime<Utc>) -> Result<ValidatedRequest, Error> {
    if !(MIN_BATCH_COUNT..=MAX_BATCH_COUNT).contains(&req.count) {
        return Err(Error::InvalidParameters(format!(
            "count must be between {} and {}",
            MIN_BATCH_COUNT, MAX_BATCH_COUNT
        )));
    }
    if !(MIN_CODE_LENGTH as i64..=MAX_CODE_LENGTH as i64).contains(&req.length) {
        return Err(Error::InvalidParameters(format!(
            "length must be between {} and {}",
            MIN_CODE_LENGTH, MAX_CODE_LENGTH
        )));
    }
    let length = req.length as usize;
    let prefix = code_generator::normalize_prefix(&req.prefix, length)?;

    let category = req.category.trim().to_string();
    if category.is_empty() || category.len() > MAX_CATEGORY_LEN {
        return Err(Error::InvalidParameters(format!(
            "category must be 1 to {} characters",
            MAX_CATEGORY_LEN
        )));
    }

    let expires_at = req
        .expires_at
        .unwrap_or_else(|| now + Duration::days(DEFAULT_EXPIRY_DAYS));
    if expires_at <= now {
        return Err(Error::InvalidParameters("expires_at must be in the future".into()));
    }

    Ok(ValidatedRequest {
        prefix,
        count: req.count as usize,
        length,
        expires_at,
        category,
    })
}
