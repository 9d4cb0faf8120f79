//! Idempotent platform-fee apply — the convergence point for both
//! confirmation channels.
//!
//! The client confirmation call and the gateway webhook both describe the
//! same real-world payment and may arrive duplicated, concurrently, in any
//! order.  This routine applies them exactly once: a single database
//! transaction covers the order flip, the ledger insert and the proposal fee
//! flag, with the unique ledger index arbitrating races.  For a fixed
//! `(order_id, payment_id)` pair the observable end state after any number
//! of invocations is identical to a single successful application.

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db::{self, NewTransaction};
use crate::errors::{EngineError, Result};
use crate::history::{self, Change};
use crate::models::{OrderStatus, PayerRole, TransactionType};

/// A verified confirmation, ready to apply.  Signature checks happen at the
/// entry points, before this type is constructed.
#[derive(Debug, Clone)]
pub struct FeeConfirmation {
    pub proposal_id: String,
    pub payer_role: PayerRole,
    pub payer_id: String,
    pub order_id: String,
    pub payment_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// First application; all effects were written.
    Applied,
    /// Duplicate of an already-applied confirmation; nothing was written.
    AlreadyApplied,
}

/// Apply a platform-fee confirmation.
///
/// Callers own retry policy; this routine never retries and every failure
/// leaves the store untouched.
pub async fn confirm_platform_fee(
    pool: &SqlitePool,
    conf: &FeeConfirmation,
) -> Result<ApplyOutcome> {
    let mut tx = pool.begin().await?;

    let order = db::get_order(&mut tx, &conf.order_id)
        .await?
        .ok_or(EngineError::OrderNotFound)?;

    // A confirmation naming the wrong proposal or role does not get to learn
    // that the order exists.
    if order.proposal_id != conf.proposal_id || order.payer_role != conf.payer_role {
        return Err(EngineError::OrderNotFound);
    }

    match order.status {
        OrderStatus::Paid => {
            if order.payment_id.as_deref() != Some(conf.payment_id.as_str()) {
                // Already settled by a different payment; accepting this one
                // would double-count.
                return Err(EngineError::PaymentIdConflict {
                    order_id: conf.order_id.clone(),
                });
            }
            // Duplicate of an already-applied confirmation.  The ledger row
            // is the witness; its absence means the order and the ledger
            // disagree, which is never silently repaired.
            if db::platform_fee_exists(&mut tx, &order.proposal_id, order.payer_role).await? {
                info!(
                    order_id = %conf.order_id,
                    payment_id = %conf.payment_id,
                    "duplicate fee confirmation, no-op"
                );
                Ok(ApplyOutcome::AlreadyApplied)
            } else {
                Err(EngineError::InconsistentState(format!(
                    "order {} is paid but no platform-fee transaction exists",
                    conf.order_id
                )))
            }
        }
        OrderStatus::Failed => Err(EngineError::InvalidTransition {
            from: "failed".to_string(),
            to: "paid".to_string(),
        }),
        OrderStatus::Created => {
            // The ledger insert is the commit point: under a race exactly
            // one caller wins the unique index.
            let inserted = db::insert_transaction(
                &mut tx,
                &NewTransaction {
                    proposal_id: &order.proposal_id,
                    tx_type: TransactionType::PlatformFee,
                    payer_role: order.payer_role,
                    payer_id: &order.payer_id,
                    payee_id: None,
                    amount_minor: order.amount_minor,
                    currency: &order.currency,
                    order_id: Some(&order.order_id),
                    payment_id: Some(&conf.payment_id),
                    method: Some("gateway"),
                    reference: None,
                    proof_url: None,
                },
            )
            .await?;

            if !inserted {
                // Lost the race: a concurrent confirmation committed first.
                let fresh = db::get_order(&mut tx, &conf.order_id)
                    .await?
                    .ok_or(EngineError::OrderNotFound)?;
                return match (fresh.status, fresh.payment_id.as_deref()) {
                    (OrderStatus::Paid, Some(pid)) if pid == conf.payment_id => {
                        Ok(ApplyOutcome::AlreadyApplied)
                    }
                    (OrderStatus::Paid, _) => Err(EngineError::PaymentIdConflict {
                        order_id: conf.order_id.clone(),
                    }),
                    _ => Err(EngineError::InconsistentState(format!(
                        "platform-fee transaction exists but order {} is not paid",
                        conf.order_id
                    ))),
                };
            }

            db::mark_order_paid(&mut tx, &order.order_id, &conf.payment_id).await?;
            db::set_fee_paid(&mut tx, &order.proposal_id, order.payer_role).await?;
            tx.commit().await?;

            info!(
                order_id = %conf.order_id,
                payment_id = %conf.payment_id,
                proposal_id = %order.proposal_id,
                role = order.payer_role.as_str(),
                "platform fee applied"
            );

            history::append(
                pool,
                &order.proposal_id,
                &order.payer_id,
                order.payer_role.as_str(),
                &[Change {
                    change_type: "platform_fee_paid",
                    old_value: Some("unpaid".to_string()),
                    new_value: Some("paid".to_string()),
                    note: Some(format!(
                        "order {} payment {}",
                        conf.order_id, conf.payment_id
                    )),
                }],
            )
            .await;

            Ok(ApplyOutcome::Applied)
        }
    }
}

/// Record a gateway order in `created` state, performed when checkout is
/// initiated.  The outbound gateway call itself lives outside the engine.
pub async fn record_order(
    pool: &SqlitePool,
    order_id: &str,
    proposal_id: &str,
    payer_role: PayerRole,
    payer_id: &str,
    amount_minor: i64,
    currency: &str,
) -> Result<()> {
    if amount_minor <= 0 {
        return Err(EngineError::Validation("amount must be positive".into()));
    }
    let mut tx = pool.begin().await?;
    let proposal = db::get_proposal(&mut tx, proposal_id)
        .await?
        .ok_or(EngineError::ProposalNotFound)?;
    if proposal.fee_paid(payer_role) {
        warn!(
            proposal_id,
            role = payer_role.as_str(),
            "fee already paid, new checkout order recorded anyway"
        );
    }
    db::insert_order(
        &mut tx,
        order_id,
        proposal_id,
        payer_role,
        payer_id,
        amount_minor,
        currency,
    )
    .await?;
    tx.commit().await?;
    Ok(())
}
