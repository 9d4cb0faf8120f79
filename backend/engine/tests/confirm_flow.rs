//! Platform-fee confirmation flows: idempotence across both channels,
//! conflict rejection, and consistency detection.

mod common;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use collab_engine::api::{self, ApiState, ConfirmRequest};
use collab_engine::config::Config;
use collab_engine::db;
use collab_engine::engine::{self, ApplyOutcome, FeeConfirmation};
use collab_engine::errors::EngineError;
use collab_engine::models::{OrderStatus, PayerRole, TransactionType};
use collab_engine::signature;
use sqlx::SqlitePool;

use common::{count_transactions, seed_order, seed_proposal, test_pool, INFLUENCER};

const CHECKOUT_SECRET: &str = "checkout_secret";
const WEBHOOK_SECRET: &str = "webhook_secret";

fn api_state(pool: &SqlitePool) -> Arc<ApiState> {
    Arc::new(ApiState {
        pool: pool.clone(),
        config: Config {
            database_url: "sqlite::memory:".to_string(),
            api_port: 0,
            checkout_secret: CHECKOUT_SECRET.to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            invoice_prefix: "INV".to_string(),
        },
    })
}

fn fee_confirmation(order_id: &str, payment_id: &str) -> FeeConfirmation {
    FeeConfirmation {
        proposal_id: "prop_1".to_string(),
        payer_role: PayerRole::Influencer,
        payer_id: INFLUENCER.to_string(),
        order_id: order_id.to_string(),
        payment_id: payment_id.to_string(),
    }
}

/// ₹57.82 order, confirmed twice with a valid signature: both calls succeed,
/// exactly one ledger row, order paid once, fee flag set.
#[tokio::test]
async fn duplicate_client_confirmation_is_a_noop() {
    let pool = test_pool().await;
    seed_proposal(&pool, "prop_1").await;
    seed_order(&pool, "order_1", "prop_1", PayerRole::Influencer, INFLUENCER, 5782).await;

    // The client adapter verifies this before applying.
    let sig = signature::checkout_signature(CHECKOUT_SECRET, "order_1", "pay_1");
    assert!(signature::verify_checkout(CHECKOUT_SECRET, "order_1", "pay_1", &sig));

    let conf = fee_confirmation("order_1", "pay_1");
    let first = engine::confirm_platform_fee(&pool, &conf).await.unwrap();
    assert_eq!(first, ApplyOutcome::Applied);

    let second = engine::confirm_platform_fee(&pool, &conf).await.unwrap();
    assert_eq!(second, ApplyOutcome::AlreadyApplied);

    assert_eq!(count_transactions(&pool, "prop_1", TransactionType::PlatformFee).await, 1);

    let mut conn = pool.acquire().await.unwrap();
    let order = db::get_order(&mut conn, "order_1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.payment_id.as_deref(), Some("pay_1"));

    let proposal = db::get_proposal(&mut conn, "prop_1").await.unwrap().unwrap();
    assert!(proposal.fee_paid_influencer);
    assert!(!proposal.fee_paid_promoter);
}

/// Client path then webhook path for the same (order, payment) pair end in
/// the same single-ledger-row state as either path alone.
#[tokio::test]
async fn cross_channel_confirmation_is_idempotent() {
    let pool = test_pool().await;
    seed_proposal(&pool, "prop_1").await;
    seed_order(&pool, "order_1", "prop_1", PayerRole::Influencer, INFLUENCER, 5782).await;

    let client = fee_confirmation("order_1", "pay_1");
    assert_eq!(
        engine::confirm_platform_fee(&pool, &client).await.unwrap(),
        ApplyOutcome::Applied
    );

    // The webhook adapter reconstructs the confirmation from the order row.
    let mut conn = pool.acquire().await.unwrap();
    let order = db::get_order(&mut conn, "order_1").await.unwrap().unwrap();
    drop(conn);
    let webhook = FeeConfirmation {
        proposal_id: order.proposal_id,
        payer_role: order.payer_role,
        payer_id: order.payer_id,
        order_id: "order_1".to_string(),
        payment_id: "pay_1".to_string(),
    };
    assert_eq!(
        engine::confirm_platform_fee(&pool, &webhook).await.unwrap(),
        ApplyOutcome::AlreadyApplied
    );

    assert_eq!(count_transactions(&pool, "prop_1", TransactionType::PlatformFee).await, 1);
}

/// An order settled with `pay_1` rejects a confirmation naming `pay_2` and
/// leaves state unchanged.
#[tokio::test]
async fn differing_payment_id_is_a_conflict() {
    let pool = test_pool().await;
    seed_proposal(&pool, "prop_1").await;
    seed_order(&pool, "order_1", "prop_1", PayerRole::Influencer, INFLUENCER, 5782).await;

    engine::confirm_platform_fee(&pool, &fee_confirmation("order_1", "pay_1"))
        .await
        .unwrap();

    let err = engine::confirm_platform_fee(&pool, &fee_confirmation("order_1", "pay_2"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PaymentIdConflict { .. }));

    let mut conn = pool.acquire().await.unwrap();
    let order = db::get_order(&mut conn, "order_1").await.unwrap().unwrap();
    assert_eq!(order.payment_id.as_deref(), Some("pay_1"));
    drop(conn);
    assert_eq!(count_transactions(&pool, "prop_1", TransactionType::PlatformFee).await, 1);
}

/// Corrupted fixture: an order marked paid with no matching ledger row must
/// fail loudly instead of silently creating a second transaction.
#[tokio::test]
async fn paid_order_without_ledger_row_is_inconsistent() {
    let pool = test_pool().await;
    seed_proposal(&pool, "prop_1").await;
    seed_order(&pool, "order_1", "prop_1", PayerRole::Influencer, INFLUENCER, 5782).await;

    sqlx::query("UPDATE payment_orders SET status = 'paid', payment_id = 'pay_1' WHERE order_id = 'order_1'")
        .execute(&pool)
        .await
        .unwrap();

    let err = engine::confirm_platform_fee(&pool, &fee_confirmation("order_1", "pay_1"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InconsistentState(_)));
    assert_eq!(count_transactions(&pool, "prop_1", TransactionType::PlatformFee).await, 0);
}

#[tokio::test]
async fn unknown_order_is_rejected() {
    let pool = test_pool().await;
    seed_proposal(&pool, "prop_1").await;

    let err = engine::confirm_platform_fee(&pool, &fee_confirmation("order_missing", "pay_1"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::OrderNotFound));
}

/// A confirmation naming the wrong proposal or role does not learn that the
/// order exists.
#[tokio::test]
async fn mismatched_proposal_binding_is_rejected_as_unknown() {
    let pool = test_pool().await;
    seed_proposal(&pool, "prop_1").await;
    seed_proposal(&pool, "prop_2").await;
    seed_order(&pool, "order_1", "prop_1", PayerRole::Influencer, INFLUENCER, 5782).await;

    let mut conf = fee_confirmation("order_1", "pay_1");
    conf.proposal_id = "prop_2".to_string();
    let err = engine::confirm_platform_fee(&pool, &conf).await.unwrap_err();
    assert!(matches!(err, EngineError::OrderNotFound));
}

/// Each side's fee is deduplicated independently; the fee flag is true iff
/// exactly one platform-fee row exists for that proposal/role pair.
#[tokio::test]
async fn fee_flags_track_the_ledger_per_role() {
    let pool = test_pool().await;
    seed_proposal(&pool, "prop_1").await;
    seed_order(&pool, "order_inf", "prop_1", PayerRole::Influencer, INFLUENCER, 5782).await;
    seed_order(&pool, "order_pro", "prop_1", PayerRole::Promoter, common::PROMOTER, 5782).await;

    engine::confirm_platform_fee(&pool, &fee_confirmation("order_inf", "pay_inf"))
        .await
        .unwrap();
    let promoter_conf = FeeConfirmation {
        proposal_id: "prop_1".to_string(),
        payer_role: PayerRole::Promoter,
        payer_id: common::PROMOTER.to_string(),
        order_id: "order_pro".to_string(),
        payment_id: "pay_pro".to_string(),
    };
    engine::confirm_platform_fee(&pool, &promoter_conf).await.unwrap();
    // Duplicates on both sides change nothing.
    engine::confirm_platform_fee(&pool, &fee_confirmation("order_inf", "pay_inf"))
        .await
        .unwrap();
    engine::confirm_platform_fee(&pool, &promoter_conf).await.unwrap();

    let mut conn = pool.acquire().await.unwrap();
    let proposal = db::get_proposal(&mut conn, "prop_1").await.unwrap().unwrap();
    assert!(proposal.fee_paid_influencer);
    assert!(proposal.fee_paid_promoter);
    drop(conn);

    for role in ["influencer", "promoter"] {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM transactions
             WHERE proposal_id = 'prop_1' AND tx_type = 'platform_fee' AND payer_role = ?1",
        )
        .bind(role)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1, "exactly one fee row for {role}");
    }
}

/// A failed order cannot be flipped to paid by a late confirmation.
#[tokio::test]
async fn failed_order_rejects_confirmation() {
    let pool = test_pool().await;
    seed_proposal(&pool, "prop_1").await;
    seed_order(&pool, "order_1", "prop_1", PayerRole::Influencer, INFLUENCER, 5782).await;

    sqlx::query("UPDATE payment_orders SET status = 'failed' WHERE order_id = 'order_1'")
        .execute(&pool)
        .await
        .unwrap();

    let err = engine::confirm_platform_fee(&pool, &fee_confirmation("order_1", "pay_1"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

/// A successful apply leaves an audit trail entry for the fee payment.
#[tokio::test]
async fn fee_apply_writes_history() {
    let pool = test_pool().await;
    seed_proposal(&pool, "prop_1").await;
    seed_order(&pool, "order_1", "prop_1", PayerRole::Influencer, INFLUENCER, 5782).await;

    engine::confirm_platform_fee(&pool, &fee_confirmation("order_1", "pay_1"))
        .await
        .unwrap();

    let entries = db::history_for_proposal(&pool, "prop_1").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].change_type, "platform_fee_paid");
    assert_eq!(entries[0].actor_id, INFLUENCER);
}

/// The webhook body shape the gateway delivers parses into the adapter's
/// event type.
#[test]
fn webhook_event_parses() {
    let body = serde_json::json!({
        "event": "payment.captured",
        "id": "evt_1",
        "payload": { "payment": { "entity": { "id": "pay_1", "order_id": "order_1" } } }
    });
    let event: collab_engine::api::WebhookEvent =
        serde_json::from_value(body).unwrap();
    assert_eq!(event.event, "payment.captured");
    assert_eq!(event.id, "evt_1");
    assert_eq!(event.payload.payment.entity.id, "pay_1");
    assert_eq!(event.payload.payment.entity.order_id, "order_1");
}

fn captured_event(event_id: &str, payment_id: &str, order_id: &str) -> String {
    serde_json::json!({
        "event": "payment.captured",
        "id": event_id,
        "payload": { "payment": { "entity": { "id": payment_id, "order_id": order_id } } }
    })
    .to_string()
}

fn signed_headers(body: &str) -> HeaderMap {
    let sig = signature::webhook_signature(WEBHOOK_SECRET, body.as_bytes());
    let mut headers = HeaderMap::new();
    headers.insert("x-webhook-signature", HeaderValue::from_str(&sig).unwrap());
    headers
}

/// First delivery applies the fee and answers `{"success": true}`; the
/// gateway's redelivery of the same event answers `{"ignored": true}` with
/// no second ledger row.
#[tokio::test]
async fn webhook_delivery_applies_and_redelivery_is_ignored() {
    let pool = test_pool().await;
    seed_proposal(&pool, "prop_1").await;
    seed_order(&pool, "order_1", "prop_1", PayerRole::Influencer, INFLUENCER, 5782).await;
    let state = api_state(&pool);

    let body = captured_event("evt_1", "pay_1", "order_1");
    let resp = api::gateway_webhook(
        State(state.clone()),
        signed_headers(&body),
        Bytes::from(body.clone()),
    )
    .await
    .unwrap();
    assert_eq!(resp.0.success, Some(true));
    assert_eq!(resp.0.ignored, None);

    let resp = api::gateway_webhook(State(state), signed_headers(&body), Bytes::from(body))
        .await
        .unwrap();
    assert_eq!(resp.0.success, None);
    assert_eq!(resp.0.ignored, Some(true));

    assert_eq!(count_transactions(&pool, "prop_1", TransactionType::PlatformFee).await, 1);
    let mut conn = pool.acquire().await.unwrap();
    let order = db::get_order(&mut conn, "order_1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.payment_id.as_deref(), Some("pay_1"));
}

/// A capture event naming a different payment id than the one the order
/// settled with is swallowed with `{"ignored": true}` — a retry cannot fix
/// it — and leaves the settled state untouched.
#[tokio::test]
async fn webhook_with_conflicting_payment_id_is_ignored() {
    let pool = test_pool().await;
    seed_proposal(&pool, "prop_1").await;
    seed_order(&pool, "order_1", "prop_1", PayerRole::Influencer, INFLUENCER, 5782).await;
    let state = api_state(&pool);

    let first = captured_event("evt_1", "pay_1", "order_1");
    api::gateway_webhook(
        State(state.clone()),
        signed_headers(&first),
        Bytes::from(first),
    )
    .await
    .unwrap();

    let conflicting = captured_event("evt_2", "pay_2", "order_1");
    let resp = api::gateway_webhook(
        State(state),
        signed_headers(&conflicting),
        Bytes::from(conflicting),
    )
    .await
    .unwrap();
    assert_eq!(resp.0.ignored, Some(true));

    let mut conn = pool.acquire().await.unwrap();
    let order = db::get_order(&mut conn, "order_1").await.unwrap().unwrap();
    assert_eq!(order.payment_id.as_deref(), Some("pay_1"));
    drop(conn);
    assert_eq!(count_transactions(&pool, "prop_1", TransactionType::PlatformFee).await, 1);
}

/// Deliveries for orders this side never created answer `{"ignored": true}`
/// rather than an error status the gateway would retry.
#[tokio::test]
async fn webhook_for_unknown_order_is_ignored() {
    let pool = test_pool().await;
    let state = api_state(&pool);

    let body = captured_event("evt_1", "pay_1", "order_ghost");
    let resp = api::gateway_webhook(State(state), signed_headers(&body), Bytes::from(body))
        .await
        .unwrap();
    assert_eq!(resp.0.ignored, Some(true));
}

/// Only `payment.captured` is acted on; other event types are acknowledged
/// and dropped.
#[tokio::test]
async fn webhook_non_capture_event_is_ignored() {
    let pool = test_pool().await;
    seed_proposal(&pool, "prop_1").await;
    seed_order(&pool, "order_1", "prop_1", PayerRole::Influencer, INFLUENCER, 5782).await;
    let state = api_state(&pool);

    let body = serde_json::json!({
        "event": "payment.failed",
        "id": "evt_1",
        "payload": { "payment": { "entity": { "id": "pay_1", "order_id": "order_1" } } }
    })
    .to_string();
    let resp = api::gateway_webhook(State(state), signed_headers(&body), Bytes::from(body))
        .await
        .unwrap();
    assert_eq!(resp.0.ignored, Some(true));
    assert_eq!(count_transactions(&pool, "prop_1", TransactionType::PlatformFee).await, 0);
}

/// A body that does not match its signature is rejected before any parsing
/// or state change.
#[tokio::test]
async fn webhook_with_tampered_signature_is_rejected() {
    let pool = test_pool().await;
    seed_proposal(&pool, "prop_1").await;
    seed_order(&pool, "order_1", "prop_1", PayerRole::Influencer, INFLUENCER, 5782).await;
    let state = api_state(&pool);

    let signed = captured_event("evt_1", "pay_1", "order_1");
    let tampered = captured_event("evt_1", "pay_2", "order_1");
    let err = api::gateway_webhook(
        State(state.clone()),
        signed_headers(&signed),
        Bytes::from(tampered),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::InvalidSignature));

    // No signature header at all fails the same way.
    let body = captured_event("evt_2", "pay_1", "order_1");
    let err = api::gateway_webhook(State(state), HeaderMap::new(), Bytes::from(body))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidSignature));

    assert_eq!(count_transactions(&pool, "prop_1", TransactionType::PlatformFee).await, 0);
}

/// The client confirmation path rejects a bad signature without touching the
/// order.
#[tokio::test]
async fn client_confirmation_with_bad_signature_is_rejected() {
    let pool = test_pool().await;
    seed_proposal(&pool, "prop_1").await;
    seed_order(&pool, "order_1", "prop_1", PayerRole::Influencer, INFLUENCER, 5782).await;
    let state = api_state(&pool);

    let err = api::confirm_payment(
        State(state),
        axum::Json(ConfirmRequest {
            user_id: INFLUENCER.to_string(),
            proposal_id: "prop_1".to_string(),
            payer_role: PayerRole::Influencer,
            gateway_order_id: "order_1".to_string(),
            gateway_payment_id: "pay_1".to_string(),
            signature: "0".repeat(64),
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::InvalidSignature));

    let mut conn = pool.acquire().await.unwrap();
    let order = db::get_order(&mut conn, "order_1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Created);
    drop(conn);
    assert_eq!(count_transactions(&pool, "prop_1", TransactionType::PlatformFee).await, 0);
}

/// Checkout orders must carry a positive amount.
#[tokio::test]
async fn order_with_non_positive_amount_is_rejected() {
    let pool = test_pool().await;
    seed_proposal(&pool, "prop_1").await;

    for amount in [0, -5782] {
        let err = engine::record_order(
            &pool,
            "order_1",
            "prop_1",
            PayerRole::Influencer,
            INFLUENCER,
            amount,
            "INR",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    let mut conn = pool.acquire().await.unwrap();
    assert!(db::get_order(&mut conn, "order_1").await.unwrap().is_none());
}
