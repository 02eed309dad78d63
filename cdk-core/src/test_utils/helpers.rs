// File: cdk-core/src/test_utils/helpers.rs

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgConnection, Pool, Postgres};

use cdk_common::models::{Caller, Role};

use crate::Error;
use crate::auth::{ApiKeyConfig, ApiKeyEntry, StaticKeyAuthenticator};
use crate::db::Database;
use crate::rate_limit::RateLimitConfig;
use crate::repositories::InMemoryStore;
use crate::services::cdk_service::{CdkService, DEFAULT_REQUEST_DEADLINE};

pub const ISSUER_TOKEN: &str = "test-issuer-token";
pub const ISSUER_ID: &str = "ops-alice";

/// Key config with one issuer and `users` plain redeemers
/// (`user-<n>` / token `token-user-<n>`).
pub fn test_key_config(users: usize) -> ApiKeyConfig {
    let mut keys = vec![ApiKeyEntry {
        token: ISSUER_TOKEN.to_string(),
        user_id: ISSUER_ID.to_string(),
        roles: vec![Role::Issuer, Role::User],
    }];
    for n in 1..=users {
        keys.push(ApiKeyEntry {
            token: user_token(n),
            user_id: format!("user-{n}"),
            roles: vec![Role::User],
        });
    }
    ApiKeyConfig { keys }
}

pub fn user_token(n: usize) -> String {
    format!("token-user-{n}")
}

pub fn issuer() -> Caller {
    Caller::new(ISSUER_ID, vec![Role::Issuer, Role::User])
}

pub fn redeemer(n: usize) -> Caller {
    Caller::new(format!("user-{n}"), vec![Role::User])
}

/// A full service over a fresh in-memory store.
pub fn memory_service(users: usize, rate_limits: RateLimitConfig) -> (CdkService, Arc<InMemoryStore>) {
    let store = InMemoryStore::new_shared();
    let service = CdkService::from_repositories(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(StaticKeyAuthenticator::new(test_key_config(users))),
        rate_limits,
        DEFAULT_REQUEST_DEADLINE,
    );
    (service, store)
}

/// Create the test database if it does not exist yet.
pub async fn ensure_test_database_exists() -> Result<(), Error> {
    let admin_url = std::env::var("DATABASE_ADMIN_URL")
        .unwrap_or_else(|_| "postgres://postgres@localhost/postgres".to_string());

    let mut conn = PgConnection::connect(&admin_url).await?;

    let test_db = "cdk_test";
    let create_db_sql = format!("CREATE DATABASE {test_db};");
    match sqlx::query(&create_db_sql).execute(&mut conn).await {
        Ok(_) => {
            tracing::info!("Created test DB '{test_db}'.");
        }
        Err(e) => {
            // 42P04 => "duplicate_database"
            let duplicate = e
                .as_database_error()
                .and_then(|db_err| db_err.code())
                .is_some_and(|code| code == "42P04");
            if !duplicate {
                return Err(Error::Database(e));
            }
        }
    }

    Ok(())
}

/// Create a connection pool to the test DB.
/// By default looks for `TEST_DATABASE_URL` in env,
/// else uses `postgres://postgres@localhost/cdk_test`.
pub async fn create_test_db_pool() -> Result<Pool<Postgres>, Error> {
    let url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgres://postgres@localhost/cdk_test".to_string());

    let pool = PgPoolOptions::new()
        .max_connections(16)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&url)
        .await?;

    Ok(pool)
}

/// Wipes out test data so each test can start fresh.
pub async fn clean_database(pool: &Pool<Postgres>) -> Result<(), Error> {
    sqlx::query(
        r#"
        TRUNCATE TABLE
            cdk_redemption_events,
            cdk_codes,
            cdk_batches
        CASCADE;
    "#,
    )
        .execute(pool)
        .await?;

    Ok(())
}

/// Returns a migrated, empty test DB handle.
pub async fn setup_test_database() -> Result<Database, Error> {
    ensure_test_database_exists().await?;

    let pool = create_test_db_pool().await?;
    let db = Database::from_pool(pool);
    db.migrate().await?;
    clean_database(db.pool()).await?;

    Ok(db)
}
