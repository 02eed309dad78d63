// File: cdk-core/tests/postgres_repository_tests.rs
//
// Needs a reachable Postgres (TEST_DATABASE_URL / DATABASE_ADMIN_URL).
// Run with `cargo test -p cdk-core -- --ignored`.

use std::sync::Arc;

use chrono::{Duration, DurationRound, Utc};
use futures_util::future::join_all;
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use cdk_core::Error;
use cdk_core::models::{Batch, ClientContext, CodeStatus, RedemptionEvent};
use cdk_core::repositories::{
    BatchRepository, CodeRepository, PostgresBatchRepository, PostgresCodeRepository,
    PostgresRedemptionEventRepository, RedemptionEventRepository,
};
use cdk_core::services::{RedeemService, VerifyService};
use cdk_core::test_utils::helpers::{redeemer, setup_test_database};

// Every test truncates the shared test database.
static DB_LOCK: Mutex<()> = Mutex::const_new(());

fn sample_batch(expires_in: Duration) -> Batch {
    // Postgres keeps microseconds; trim so round-trips compare equal.
    let now = Utc::now()
        .duration_trunc(Duration::microseconds(1))
        .unwrap_or_else(|_| Utc::now());
    let mut metadata = serde_json::Map::new();
    metadata.insert("reward".into(), json!("gems"));
    metadata.insert("amount".into(), json!(500));
    Batch {
        batch_id: Uuid::new_v4(),
        prefix: "SUM".into(),
        requested_count: 3,
        code_length: 8,
        expires_at: now + expires_in,
        category: "summer-event".into(),
        metadata,
        created_by: "ops-alice".into(),
        created_at: now,
    }
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_batch_round_trip() -> Result<(), Error> {
    let _guard = DB_LOCK.lock().await;
    let db = setup_test_database().await?;
    let repo = PostgresBatchRepository::new(db.pool().clone());

    let batch = sample_batch(Duration::days(30));
    repo.create_batch(&batch).await?;

    let loaded = repo.get_batch(batch.batch_id).await?.expect("Batch should exist");
    assert_eq!(loaded, batch);
    assert!(repo.get_batch(Uuid::new_v4()).await?.is_none());
    Ok(())
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_insert_reports_rejected_codes() -> Result<(), Error> {
    let _guard = DB_LOCK.lock().await;
    let db = setup_test_database().await?;
    let batches = PostgresBatchRepository::new(db.pool().clone());
    let codes = PostgresCodeRepository::new(db.pool().clone());

    let first = sample_batch(Duration::days(30));
    batches.create_batch(&first).await?;
    let rejected = codes
        .insert_codes(&first, &["SUMAAAA2".into(), "SUMBBBB3".into()])
        .await?;
    assert!(rejected.is_empty());

    let second = sample_batch(Duration::days(30));
    batches.create_batch(&second).await?;
    let rejected = codes
        .insert_codes(
            &second,
            &["SUMAAAA2".into(), "SUMCCCC4".into(), "SUMCCCC4".into()],
        )
        .await?;
    assert_eq!(rejected, vec!["SUMAAAA2".to_string(), "SUMCCCC4".to_string()]);

    // The existing row is untouched.
    let kept = codes.get_code("SUMAAAA2").await?.expect("Code should exist");
    assert_eq!(kept.batch_id, first.batch_id);
    assert_eq!(kept.status, CodeStatus::Unused);
    assert_eq!(kept.metadata, first.metadata);
    Ok(())
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_claim_is_conditional() -> Result<(), Error> {
    let _guard = DB_LOCK.lock().await;
    let db = setup_test_database().await?;
    let batches = PostgresBatchRepository::new(db.pool().clone());
    let codes = PostgresCodeRepository::new(db.pool().clone());

    let batch = sample_batch(Duration::days(1));
    batches.create_batch(&batch).await?;
    codes.insert_codes(&batch, &["SUMDDDD5".into()]).await?;

    let now = Utc::now();
    let claimed = codes.claim_code("SUMDDDD5", "user-1", now).await?.expect("First claim wins");
    assert_eq!(claimed.status, CodeStatus::Redeemed);
    assert_eq!(claimed.redeemed_by.as_deref(), Some("user-1"));

    assert!(codes.claim_code("SUMDDDD5", "user-2", now).await?.is_none());
    assert!(codes.claim_code("NOSUCH22", "user-2", now).await?.is_none());

    // Past its expiry the conditional write matches nothing.
    let late = batch.expires_at + Duration::seconds(1);
    codes.insert_codes(&batch, &["SUMEEEE6".into()]).await?;
    assert!(codes.claim_code("SUMEEEE6", "user-1", late).await?.is_none());
    // Exactly at the expiry instant it is still claimable.
    assert!(codes.claim_code("SUMEEEE6", "user-1", batch.expires_at).await?.is_some());

    let counts = codes.count_codes_for_batch(batch.batch_id, now).await?;
    assert_eq!(counts.redeemed, 2);
    assert_eq!(counts.unused, 0);
    Ok(())
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_concurrent_claims_single_winner() -> Result<(), Error> {
    let _guard = DB_LOCK.lock().await;
    let db = setup_test_database().await?;
    let batches = PostgresBatchRepository::new(db.pool().clone());
    let codes = Arc::new(PostgresCodeRepository::new(db.pool().clone()));
    let events = Arc::new(PostgresRedemptionEventRepository::new(db.pool().clone()));

    let batch = sample_batch(Duration::days(1));
    batches.create_batch(&batch).await?;
    codes.insert_codes(&batch, &["SUMFFFF7".into()]).await?;

    let redeem = RedeemService::new(codes.clone(), events.clone());
    let callers: Vec<_> = (1..=16).map(redeemer).collect();
    let results = join_all(
        callers
            .iter()
            .map(|caller| redeem.redeem(caller, "SUMFFFF7", ClientContext::default())),
    )
    .await;

    let mut ok = 0;
    let mut used = 0;
    for result in results {
        match result {
            Ok(_) => ok += 1,
            Err(Error::CodeAlreadyUsed(_)) => used += 1,
            Err(other) => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(used, 15);

    let event = events.get_event_for_code("SUMFFFF7").await?.expect("Event should exist");
    let code = codes.get_code("SUMFFFF7").await?.expect("Code should exist");
    assert_eq!(code.redeemed_by.as_deref(), Some(event.user_id.as_str()));
    Ok(())
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_events_are_unique_per_code_and_listed_newest_first() -> Result<(), Error> {
    let _guard = DB_LOCK.lock().await;
    let db = setup_test_database().await?;
    let batches = PostgresBatchRepository::new(db.pool().clone());
    let codes = PostgresCodeRepository::new(db.pool().clone());
    let events = PostgresRedemptionEventRepository::new(db.pool().clone());

    let batch = sample_batch(Duration::days(1));
    batches.create_batch(&batch).await?;
    codes.insert_codes(&batch, &["SUMGGGG8".into(), "SUMHHHH9".into()]).await?;

    let base = Utc::now().duration_trunc(Duration::microseconds(1)).unwrap_or_else(|_| Utc::now());
    for (i, code) in ["SUMGGGG8", "SUMHHHH9"].iter().enumerate() {
        let at = base + Duration::seconds(i as i64);
        codes.claim_code(code, "user-3", at).await?;
        events
            .append_event(&RedemptionEvent {
                event_id: Uuid::new_v4(),
                code: code.to_string(),
                user_id: "user-3".into(),
                batch_id: batch.batch_id,
                redeemed_at: at,
                client: ClientContext {
                    platform: Some("web".into()),
                    app_version: None,
                    network_origin: Some("203.0.113.5".into()),
                },
            })
            .await?;
    }

    let dup = events
        .append_event(&RedemptionEvent {
            event_id: Uuid::new_v4(),
            code: "SUMGGGG8".into(),
            user_id: "user-4".into(),
            batch_id: batch.batch_id,
            redeemed_at: base,
            client: ClientContext::default(),
        })
        .await;
    assert!(matches!(dup, Err(Error::Database(_))));

    let listed = events.list_events_for_user("user-3", 10).await?;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].code, "SUMHHHH9");
    assert_eq!(listed[1].client.network_origin.as_deref(), Some("203.0.113.5"));
    Ok(())
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_verify_reads_postgres_state() -> Result<(), Error> {
    let _guard = DB_LOCK.lock().await;
    let db = setup_test_database().await?;
    let batches = PostgresBatchRepository::new(db.pool().clone());
    let codes = Arc::new(PostgresCodeRepository::new(db.pool().clone()));

    let batch = sample_batch(Duration::days(1));
    batches.create_batch(&batch).await?;
    codes.insert_codes(&batch, &["SUMJJJJ2".into()]).await?;

    let verify = VerifyService::new(codes.clone());
    let outcome = verify.verify("sumjjjj2").await?;
    assert!(outcome.valid);
    assert_eq!(outcome.expires_at, Some(batch.expires_at));

    let counts = codes.count_codes_for_batch(batch.batch_id, Utc::now()).await?;
    assert_eq!(counts.unused, 1);
    let later = codes
        .count_codes_for_batch(batch.batch_id, batch.expires_at + Duration::seconds(1))
        .await?;
    assert_eq!(later.expired, 1);
    Ok(())
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_discard_batch_removes_unused_codes_and_row() -> Result<(), Error> {
    let _guard = DB_LOCK.lock().await;
    let db = setup_test_database().await?;
    let batches = PostgresBatchRepository::new(db.pool().clone());
    let codes = PostgresCodeRepository::new(db.pool().clone());

    let abandoned = sample_batch(Duration::days(30));
    batches.create_batch(&abandoned).await?;
    codes
        .insert_codes(&abandoned, &["SUMDDDD2".into(), "SUMEEEE3".into()])
        .await?;
    assert_eq!(batches.discard_batch(abandoned.batch_id).await?, 2);
    assert!(batches.get_batch(abandoned.batch_id).await?.is_none());
    assert!(codes.get_code("SUMDDDD2").await?.is_none());

    // A redeemed code pins its batch.
    let pinned = sample_batch(Duration::days(30));
    batches.create_batch(&pinned).await?;
    codes
        .insert_codes(&pinned, &["SUMFFFF4".into(), "SUMGGGG5".into()])
        .await?;
    codes.claim_code("SUMFFFF4", "user-1", Utc::now()).await?;
    assert_eq!(batches.discard_batch(pinned.batch_id).await?, 1);
    assert!(batches.get_batch(pinned.batch_id).await?.is_some());
    assert_eq!(
        codes.get_code("SUMFFFF4").await?.map(|c| c.status),
        Some(CodeStatus::Redeemed)
    );
    Ok(())
}
