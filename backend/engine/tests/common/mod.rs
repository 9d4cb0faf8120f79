//! Shared fixtures for integration tests: an in-memory store plus seed
//! helpers for proposals and gateway orders.
#![allow(dead_code)]

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use collab_engine::db;
use collab_engine::models::{PayerRole, TransactionType};

pub const PROMOTER: &str = "brand_1";
pub const INFLUENCER: &str = "inf_1";

pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");
    pool
}

pub async fn seed_proposal(pool: &SqlitePool, id: &str) {
    let mut conn = pool.acquire().await.unwrap();
    db::insert_proposal(&mut conn, id, PROMOTER, INFLUENCER, "INR")
        .await
        .unwrap();
}

pub async fn seed_order(
    pool: &SqlitePool,
    order_id: &str,
    proposal_id: &str,
    payer_role: PayerRole,
    payer_id: &str,
    amount_minor: i64,
) {
    let mut conn = pool.acquire().await.unwrap();
    db::insert_order(
        &mut conn,
        order_id,
        proposal_id,
        payer_role,
        payer_id,
        amount_minor,
        "INR",
    )
    .await
    .unwrap();
}

pub async fn count_transactions(pool: &SqlitePool, proposal_id: &str, tx_type: TransactionType) -> i64 {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM transactions WHERE proposal_id = ?1 AND tx_type = ?2")
            .bind(proposal_id)
            .bind(tx_type)
            .fetch_one(pool)
            .await
            .unwrap();
    count
}
