use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use cdk_common::error::Error;
use cdk_common::models::{ClientContext, RedemptionEvent};
use cdk_common::traits::repository_traits::RedemptionEventRepository;

/// Append-only audit trail of successful claims.
#[derive(Clone)]
pub struct PostgresRedemptionEventRepository {
    pool: Pool<Postgres>,
}

impl PostgresRedemptionEventRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn event_from_row(row: &PgRow) -> Result<RedemptionEvent, Error> {
    Ok(RedemptionEvent {
        event_id: row.try_get("event_id")?,
        code: row.try_get("code")?,
        user_id: row.try_get("user_id")?,
        batch_id: row.try_get("batch_id")?,
        redeemed_at: row.try_get("redeemed_at")?,
        client: ClientContext {
            platform: row.try_get("platform")?,
            app_version: row.try_get("app_version")?,
            network_origin: row.try_get("network_origin")?,
        },
    })
}

#[async_trait]
impl RedemptionEventRepository for PostgresRedemptionEventRepository {
    async fn append_event(&self, event: &RedemptionEvent) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO cdk_redemption_events (
                event_id, code, user_id, batch_id, redeemed_at,
                platform, app_version, network_origin
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
            .bind(event.event_id)
            .bind(&event.code)
            .bind(&event.user_id)
            .bind(event.batch_id)
            .bind(event.redeemed_at)
            .bind(&event.client.platform)
            .bind(&event.client.app_version)
            .bind(&event.client.network_origin)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_event_for_code(&self, code: &str) -> Result<Option<RedemptionEvent>, Error> {
        let row = sqlx::query(
            r#"
            SELECT event_id, code, user_id, batch_id, redeemed_at,
                   platform, app_version, network_origin
            FROM cdk_redemption_events
            WHERE code = $1
            "#,
        )
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(event_from_row).transpose()
    }

    async fn list_events_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<RedemptionEvent>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, code, user_id, batch_id, redeemed_at,
                   platform, app_version, network_origin
            FROM cdk_redemption_events
            WHERE user_id = $1
            ORDER BY redeemed_at DESC
            LIMIT $2
            "#,
        )
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            result.push(event_from_row(&row)?);
        }
        Ok(result)
    }
}
