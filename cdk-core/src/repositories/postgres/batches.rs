// File: cdk-core/src/repositories/postgres/batches.rs

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use cdk_common::error::Error;
use cdk_common::models::{Batch, BenefitMetadata};
use cdk_common::traits::repository_traits::BatchRepository;

#[derive(Clone)]
pub struct PostgresBatchRepository {
    pool: Pool<Postgres>,
}

impl PostgresBatchRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BatchRepository for PostgresBatchRepository {
    async fn create_batch(&self, batch: &Batch) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO cdk_batches (
                batch_id,
                prefix,
                requested_count,
                code_length,
                expires_at,
                category,
                metadata,
                created_by,
                created_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            "#,
        )
            .bind(batch.batch_id)
            .bind(&batch.prefix)
            .bind(batch.requested_count)
            .bind(batch.code_length)
            .bind(batch.expires_at)
            .bind(&batch.category)
            .bind(Json(&batch.metadata))
            .bind(&batch.created_by)
            .bind(batch.created_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<Batch>, Error> {
        let row_opt = sqlx::query(
            r#"
            SELECT
                batch_id,
                prefix,
                requested_count,
                code_length,
                expires_at,
                category,
                metadata,
                created_by,
                created_at
            FROM cdk_batches
            WHERE batch_id = $1
            "#,
        )
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(r) = row_opt {
            let metadata: Json<BenefitMetadata> = r.try_get("metadata")?;
            Ok(Some(Batch {
                batch_id: r.try_get("batch_id")?,
                prefix: r.try_get("prefix")?,
                requested_count: r.try_get("requested_count")?,
                code_length: r.try_get("code_length")?,
                expires_at: r.try_get("expires_at")?,
                category: r.try_get("category")?,
                metadata: metadata.0,
                created_by: r.try_get("created_by")?,
                created_at: r.try_get("created_at")?,
            }))
        } else {
            Ok(None)
        }
    }

    async fn discard_batch(&self, batch_id: Uuid) -> Result<u64, Error> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query(
            "DELETE FROM cdk_codes WHERE batch_id = $1 AND status = 'unused'"
        )
            .bind(batch_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(
            r#"
            DELETE FROM cdk_batches b
            WHERE b.batch_id = $1
              AND NOT EXISTS (SELECT 1 FROM cdk_codes c WHERE c.batch_id = b.batch_id)
            "#,
        )
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(removed)
    }
}
