// File: cdk-core/src/repositories/postgres/codes.rs

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use cdk_common::error::Error;
use cdk_common::models::{Batch, BenefitMetadata, Code, CodeCounts};
use cdk_common::traits::repository_traits::CodeRepository;

const CODE_COLUMNS: &str = r#"
    code,
    batch_id,
    status,
    expires_at,
    category,
    metadata,
    created_at,
    redeemed_by,
    redeemed_at
"#;

#[derive(Clone)]
pub struct PostgresCodeRepository {
    pool: Pool<Postgres>,
}

impl PostgresCodeRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn code_from_row(r: &PgRow) -> Result<Code, Error> {
    let status: String = r.try_get("status")?;
    let metadata: Json<BenefitMetadata> = r.try_get("metadata")?;
    Ok(Code {
        code: r.try_get("code")?,
        batch_id: r.try_get("batch_id")?,
        status: status.parse()?,
        expires_at: r.try_get("expires_at")?,
        category: r.try_get("category")?,
        metadata: metadata.0,
        created_at: r.try_get("created_at")?,
        redeemed_by: r.try_get("redeemed_by")?,
        redeemed_at: r.try_get("redeemed_at")?,
    })
}

#[async_trait]
impl CodeRepository for PostgresCodeRepository {
    async fn insert_codes(&self, batch: &Batch, codes: &[String]) -> Result<Vec<String>, Error> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }

        // One statement for the whole slice. ON CONFLICT leaves existing codes
        // untouched; whatever is missing from RETURNING was rejected.
        let rows = sqlx::query(
            r#"
            INSERT INTO cdk_codes (
                code, batch_id, status, expires_at,
                category, metadata, created_at
            )
            SELECT c, $2, 'unused', $3, $4, $5, $6
            FROM UNNEST($1::text[]) AS t(c)
            ON CONFLICT (code) DO NOTHING
            RETURNING code
            "#,
        )
            .bind(codes)
            .bind(batch.batch_id)
            .bind(batch.expires_at)
            .bind(&batch.category)
            .bind(Json(&batch.metadata))
            .bind(batch.created_at)
            .fetch_all(&self.pool)
            .await?;

        let mut inserted = HashSet::with_capacity(rows.len());
        for r in rows {
            inserted.insert(r.try_get::<String, _>("code")?);
        }

        // A code listed twice in `codes` is inserted once; report the second
        // occurrence as rejected too.
        let mut seen = HashSet::with_capacity(codes.len());
        let rejected = codes
            .iter()
            .filter(|c| !inserted.contains(*c) || !seen.insert(c.as_str()))
            .cloned()
            .collect();
        Ok(rejected)
    }

    async fn get_code(&self, code: &str) -> Result<Option<Code>, Error> {
        let sql = format!("SELECT {CODE_COLUMNS} FROM cdk_codes WHERE code = $1");
        let row_opt = sqlx::query(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        row_opt.as_ref().map(code_from_row).transpose()
    }

    async fn claim_code(
        &self,
        code: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Code>, Error> {
        let sql = format!(
            r#"
            UPDATE cdk_codes
            SET status = 'redeemed',
                redeemed_by = $2,
                redeemed_at = $3
            WHERE code = $1
              AND status = 'unused'
              AND expires_at >= $3
            RETURNING {CODE_COLUMNS}
            "#
        );
        let row_opt = sqlx::query(&sql)
            .bind(code)
            .bind(user_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        row_opt.as_ref().map(code_from_row).transpose()
    }

    async fn count_codes_for_batch(&self, batch_id: Uuid, now: DateTime<Utc>) -> Result<CodeCounts, Error> {
        let r = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'unused' AND expires_at >= $2) AS unused,
                COUNT(*) FILTER (WHERE status = 'redeemed') AS redeemed,
                COUNT(*) FILTER (WHERE status = 'unused' AND expires_at < $2) AS expired
            FROM cdk_codes
            WHERE batch_id = $1
            "#,
        )
            .bind(batch_id)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        Ok(CodeCounts {
            unused: r.try_get("unused")?,
            redeemed: r.try_get("redeemed")?,
            expired: r.try_get("expired")?,
        })
    }
}
