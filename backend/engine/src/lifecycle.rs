//! Proposal lifecycle state machine.
//!
//! Three correlated status axes move together: negotiation, payment, work.
//! The transition tables below are the single source of truth for what is
//! allowed; every store-backed operation validates against them inside one
//! database transaction and fails with `InvalidTransition` (naming the
//! current and requested states) without partial writes.
//!
//! ```text
//! proposal: created ──► discussing ──► changes_requested
//!               │            │                │
//!               │            ├──► agreed ◄────┘
//!               └────────────┴──► cancelled
//! payment:  not_started ──► pending_advance ──► advance_paid ──► fully_paid
//!               └──────────► pending_escrow ─────────────────────────┘
//! work:     in_progress ──► submitted ──► approved
//!               ▲               │
//!               └─ revision_requested ◄┘      (any non-approved ──► disputed)
//! ```

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use crate::db::{self, NewTransaction};
use crate::engine::ApplyOutcome;
use crate::errors::{EngineError, Result};
use crate::history::{self, Change};
use crate::invoice;
use crate::models::{
    PaymentStatus, PayerRole, Proposal, ProposalStatus, ScheduleItemStatus, ScheduleItemType,
    WorkStatus,
};

// ─────────────────────────────────────────────────────────
// Transition tables
// ─────────────────────────────────────────────────────────

pub fn proposal_transition_allowed(from: ProposalStatus, to: ProposalStatus) -> bool {
    use ProposalStatus::*;
    matches!(
        (from, to),
        (Created, Discussing)
            | (Created, Agreed)
            | (Discussing, Agreed)
            | (ChangesRequested, Agreed)
            | (Discussing, ChangesRequested)
            | (Created, Cancelled)
            | (Discussing, Cancelled)
            | (ChangesRequested, Cancelled)
    )
}

pub fn payment_transition_allowed(from: PaymentStatus, to: PaymentStatus) -> bool {
    use PaymentStatus::*;
    matches!(
        (from, to),
        (NotStarted, PendingAdvance)
            | (NotStarted, PendingEscrow)
            | (PendingAdvance, AdvancePaid)
            | (AdvancePaid, FullyPaid)
            | (PendingEscrow, FullyPaid)
    )
}

pub fn work_transition_allowed(from: WorkStatus, to: WorkStatus) -> bool {
    use WorkStatus::*;
    matches!(
        (from, to),
        (InProgress, Submitted)
            | (Submitted, Approved)
            | (Submitted, RevisionRequested)
            | (RevisionRequested, InProgress)
            | (InProgress, Disputed)
            | (Submitted, Disputed)
            | (RevisionRequested, Disputed)
    )
}

fn invalid(from: &str, to: &str) -> EngineError {
    EngineError::InvalidTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}

/// A disputed proposal accepts no further status-changing calls from either
/// party.
fn guard_not_disputed(proposal: &Proposal) -> Result<()> {
    if proposal.work_status == WorkStatus::Disputed {
        return Err(invalid("disputed", "any"));
    }
    Ok(())
}

fn require_reason(reason: &str, what: &str) -> Result<()> {
    if reason.trim().is_empty() {
        return Err(EngineError::Validation(format!("{what} requires a reason")));
    }
    Ok(())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

// ─────────────────────────────────────────────────────────
// Negotiation operations
// ─────────────────────────────────────────────────────────

pub struct FinalizeTerms {
    pub actor_id: String,
    pub amount_minor: i64,
    /// Advance share of the amount.  `None` means full escrow: the entire
    /// amount is a single `remaining` schedule item.
    pub advance_minor: Option<i64>,
    pub deliverables: Vec<String>,
}

/// Promoter finalizes terms: `created -> discussing`, writes the payment
/// schedule and the declared deliverables, and opens the payment axis.
pub async fn finalize_terms(
    pool: &SqlitePool,
    proposal_id: &str,
    req: &FinalizeTerms,
) -> Result<Proposal> {
    if req.amount_minor <= 0 {
        return Err(EngineError::Validation("amount must be positive".into()));
    }
    if let Some(advance) = req.advance_minor {
        if advance <= 0 || advance >= req.amount_minor {
            return Err(EngineError::Validation(
                "advance must be positive and smaller than the total amount".into(),
            ));
        }
    }
    let deliverables: Vec<&str> = req
        .deliverables
        .iter()
        .map(|d| d.trim())
        .filter(|d| !d.is_empty())
        .collect();
    if deliverables.is_empty() {
        return Err(EngineError::Validation(
            "at least one deliverable is required".into(),
        ));
    }

    let mut tx = pool.begin().await?;
    let proposal = db::get_proposal(&mut tx, proposal_id)
        .await?
        .ok_or(EngineError::ProposalNotFound)?;
    guard_not_disputed(&proposal)?;

    if !proposal_transition_allowed(proposal.proposal_status, ProposalStatus::Discussing) {
        return Err(invalid(proposal.proposal_status.as_str(), "discussing"));
    }
    let payment_target = if req.advance_minor.is_some() {
        PaymentStatus::PendingAdvance
    } else {
        PaymentStatus::PendingEscrow
    };
    if !payment_transition_allowed(proposal.payment_status, payment_target) {
        return Err(invalid(
            proposal.payment_status.as_str(),
            payment_target.as_str(),
        ));
    }

    db::set_proposal_amount(&mut tx, proposal_id, req.amount_minor).await?;
    db::set_proposal_status(&mut tx, proposal_id, ProposalStatus::Discussing).await?;
    db::set_payment_status(&mut tx, proposal_id, payment_target).await?;

    match req.advance_minor {
        Some(advance) => {
            db::insert_schedule_item(&mut tx, proposal_id, ScheduleItemType::Advance, advance)
                .await?;
            db::insert_schedule_item(
                &mut tx,
                proposal_id,
                ScheduleItemType::Remaining,
                req.amount_minor - advance,
            )
            .await?;
        }
        None => {
            db::insert_schedule_item(
                &mut tx,
                proposal_id,
                ScheduleItemType::Remaining,
                req.amount_minor,
            )
            .await?;
        }
    }
    for (i, title) in deliverables.iter().enumerate() {
        db::insert_deliverable(&mut tx, proposal_id, i as i64 + 1, title).await?;
    }
    tx.commit().await?;

    history::append(
        pool,
        proposal_id,
        &req.actor_id,
        PayerRole::Promoter.as_str(),
        &[
            Change::status(
                "proposal_status",
                proposal.proposal_status.as_str(),
                "discussing",
            ),
            Change::status(
                "payment_status",
                proposal.payment_status.as_str(),
                payment_target.as_str(),
            ),
            Change::noted("terms_finalized", format!("amount {}", req.amount_minor)),
        ],
    )
    .await;

    reload(pool, proposal_id).await
}

/// Influencer accepts: `created / discussing / changes_requested -> agreed`.
/// Unlocks payment progression.
pub async fn accept_proposal(pool: &SqlitePool, proposal_id: &str, actor_id: &str) -> Result<Proposal> {
    transition_proposal_status(
        pool,
        proposal_id,
        actor_id,
        PayerRole::Influencer,
        ProposalStatus::Agreed,
        None,
    )
    .await
}

/// Influencer asks for different terms: `discussing -> changes_requested`.
pub async fn request_changes(
    pool: &SqlitePool,
    proposal_id: &str,
    actor_id: &str,
    reason: &str,
) -> Result<Proposal> {
    require_reason(reason, "requesting changes")?;
    transition_proposal_status(
        pool,
        proposal_id,
        actor_id,
        PayerRole::Influencer,
        ProposalStatus::ChangesRequested,
        Some(reason),
    )
    .await
}

/// Either party declines before agreement, with an optional reason.
pub async fn cancel_proposal(
    pool: &SqlitePool,
    proposal_id: &str,
    actor_id: &str,
    actor_role: PayerRole,
    reason: Option<&str>,
) -> Result<Proposal> {
    let mut tx = pool.begin().await?;
    let proposal = db::get_proposal(&mut tx, proposal_id)
        .await?
        .ok_or(EngineError::ProposalNotFound)?;
    guard_not_disputed(&proposal)?;

    if !proposal_transition_allowed(proposal.proposal_status, ProposalStatus::Cancelled) {
        return Err(invalid(proposal.proposal_status.as_str(), "cancelled"));
    }
    db::set_proposal_status(&mut tx, proposal_id, ProposalStatus::Cancelled).await?;
    db::set_cancel_reason(&mut tx, proposal_id, non_empty(reason)).await?;
    tx.commit().await?;

    history::append(
        pool,
        proposal_id,
        actor_id,
        actor_role.as_str(),
        &[Change {
            change_type: "proposal_status",
            old_value: Some(proposal.proposal_status.as_str().to_string()),
            new_value: Some("cancelled".to_string()),
            note: non_empty(reason).map(String::from),
        }],
    )
    .await;

    reload(pool, proposal_id).await
}

async fn transition_proposal_status(
    pool: &SqlitePool,
    proposal_id: &str,
    actor_id: &str,
    actor_role: PayerRole,
    target: ProposalStatus,
    note: Option<&str>,
) -> Result<Proposal> {
    let mut tx = pool.begin().await?;
    let proposal = db::get_proposal(&mut tx, proposal_id)
        .await?
        .ok_or(EngineError::ProposalNotFound)?;
    guard_not_disputed(&proposal)?;

    if !proposal_transition_allowed(proposal.proposal_status, target) {
        return Err(invalid(proposal.proposal_status.as_str(), target.as_str()));
    }
    db::set_proposal_status(&mut tx, proposal_id, target).await?;
    tx.commit().await?;

    history::append(
        pool,
        proposal_id,
        actor_id,
        actor_role.as_str(),
        &[Change {
            change_type: "proposal_status",
            old_value: Some(proposal.proposal_status.as_str().to_string()),
            new_value: Some(target.as_str().to_string()),
            note: note.map(String::from),
        }],
    )
    .await;

    reload(pool, proposal_id).await
}

// ─────────────────────────────────────────────────────────
// Payment schedule
// ─────────────────────────────────────────────────────────

pub struct MarkPaid {
    pub actor_id: String,
    pub method: Option<String>,
    pub reference: Option<String>,
    pub proof_url: Option<String>,
}

/// Mark a schedule item paid, gated by the ledger insert.
///
/// `advance` flips `payment_status -> advance_paid` and starts the work axis;
/// `remaining` flips `payment_status -> fully_paid` and approves submitted
/// work.  Both generate the matching invoice in the same transaction.
/// A repeat call on an already-paid item only merges non-empty proof fields:
/// no second ledger row, no re-fired status flips, no second invoice.
pub async fn mark_schedule_paid(
    pool: &SqlitePool,
    proposal_id: &str,
    item_type: ScheduleItemType,
    req: &MarkPaid,
    default_invoice_prefix: &str,
) -> Result<ApplyOutcome> {
    let mut tx = pool.begin().await?;
    let proposal = db::get_proposal(&mut tx, proposal_id)
        .await?
        .ok_or(EngineError::ProposalNotFound)?;
    guard_not_disputed(&proposal)?;

    if proposal.proposal_status != ProposalStatus::Agreed {
        return Err(invalid(proposal.proposal_status.as_str(), "agreed"));
    }

    let item = db::get_schedule_item(&mut tx, proposal_id, item_type)
        .await?
        .ok_or_else(|| {
            EngineError::Validation(format!("no {} payment scheduled", item_type.as_str()))
        })?;

    if item.status == ScheduleItemStatus::Paid {
        db::merge_schedule_proof(
            &mut tx,
            proposal_id,
            item_type,
            non_empty(req.method.as_deref()),
            non_empty(req.reference.as_deref()),
            non_empty(req.proof_url.as_deref()),
        )
        .await?;
        tx.commit().await?;
        info!(
            proposal_id,
            item = item_type.as_str(),
            "schedule item already paid, merged proof"
        );
        return Ok(ApplyOutcome::AlreadyApplied);
    }

    let (payment_target, work_target) = match item_type {
        ScheduleItemType::Advance => {
            if proposal.payment_status != PaymentStatus::PendingAdvance {
                return Err(invalid(proposal.payment_status.as_str(), "advance_paid"));
            }
            (PaymentStatus::AdvancePaid, WorkStatus::InProgress)
        }
        ScheduleItemType::Remaining => {
            // Remaining settles only after the work was submitted and any
            // scheduled advance has been paid.
            if proposal.work_status != WorkStatus::Submitted {
                return Err(invalid(proposal.work_status.as_str(), "approved"));
            }
            let advance = db::get_schedule_item(&mut tx, proposal_id, ScheduleItemType::Advance)
                .await?;
            if let Some(adv) = advance {
                if adv.status != ScheduleItemStatus::Paid {
                    return Err(invalid(proposal.payment_status.as_str(), "fully_paid"));
                }
            }
            if !payment_transition_allowed(proposal.payment_status, PaymentStatus::FullyPaid) {
                return Err(invalid(proposal.payment_status.as_str(), "fully_paid"));
            }
            (PaymentStatus::FullyPaid, WorkStatus::Approved)
        }
    };

    // Ledger insert is the commit point; the unique `(proposal, type)` index
    // arbitrates concurrent duplicates.
    let inserted = db::insert_transaction(
        &mut tx,
        &NewTransaction {
            proposal_id,
            tx_type: item_type.transaction_type(),
            payer_role: PayerRole::Promoter,
            payer_id: &proposal.promoter_id,
            payee_id: Some(proposal.counterparty(PayerRole::Promoter)),
            amount_minor: item.amount_minor,
            currency: &proposal.currency,
            order_id: None,
            payment_id: None,
            method: non_empty(req.method.as_deref()),
            reference: non_empty(req.reference.as_deref()),
            proof_url: non_empty(req.proof_url.as_deref()),
        },
    )
    .await?;
    if !inserted {
        return Err(EngineError::InconsistentState(format!(
            "schedule item {} of proposal {} is unpaid but a ledger row exists",
            item_type.as_str(),
            proposal_id
        )));
    }

    let paid_at = Utc::now().timestamp();
    db::mark_schedule_item_paid(
        &mut tx,
        proposal_id,
        item_type,
        non_empty(req.method.as_deref()),
        non_empty(req.reference.as_deref()),
        non_empty(req.proof_url.as_deref()),
        paid_at,
    )
    .await?;
    db::set_payment_status(&mut tx, proposal_id, payment_target).await?;
    db::set_work_status(&mut tx, proposal_id, work_target).await?;
    invoice::ensure_invoice(
        &mut tx,
        &proposal,
        item_type.invoice_type(),
        item.amount_minor,
        paid_at,
        default_invoice_prefix,
    )
    .await?;
    tx.commit().await?;

    info!(
        proposal_id,
        item = item_type.as_str(),
        amount_minor = item.amount_minor,
        "schedule payment applied"
    );

    history::append(
        pool,
        proposal_id,
        &req.actor_id,
        PayerRole::Promoter.as_str(),
        &[
            Change::status(
                "payment_status",
                proposal.payment_status.as_str(),
                payment_target.as_str(),
            ),
            Change::status(
                "work_status",
                proposal.work_status.as_str(),
                work_target.as_str(),
            ),
            Change::noted(
                "schedule_item_paid",
                format!("{} {}", item_type.as_str(), item.amount_minor),
            ),
        ],
    )
    .await;

    Ok(ApplyOutcome::Applied)
}

// ─────────────────────────────────────────────────────────
// Work / deliverables
// ─────────────────────────────────────────────────────────

pub struct DeliverableUpdate {
    pub position: i64,
    pub completed: bool,
}

/// Influencer updates deliverable completion.  Partial completion only moves
/// `completion_pct`; full completion submits the work.  A proposal in
/// `revision_requested` returns to `in_progress` implicitly.
pub async fn update_deliverables(
    pool: &SqlitePool,
    proposal_id: &str,
    actor_id: &str,
    updates: &[DeliverableUpdate],
) -> Result<Proposal> {
    let mut tx = pool.begin().await?;
    let proposal = db::get_proposal(&mut tx, proposal_id)
        .await?
        .ok_or(EngineError::ProposalNotFound)?;
    guard_not_disputed(&proposal)?;

    if proposal.proposal_status != ProposalStatus::Agreed {
        return Err(invalid(proposal.proposal_status.as_str(), "agreed"));
    }
    match proposal.work_status {
        WorkStatus::InProgress | WorkStatus::RevisionRequested => {}
        other => return Err(invalid(other.as_str(), "in_progress")),
    }

    let known = db::deliverables_for_proposal(&mut tx, proposal_id).await?;
    if known.is_empty() {
        return Err(EngineError::Validation(
            "proposal has no declared deliverables".into(),
        ));
    }
    for update in updates {
        if !known.iter().any(|d| d.position == update.position) {
            return Err(EngineError::Validation(format!(
                "unknown deliverable position {}",
                update.position
            )));
        }
        db::set_deliverable_completed(&mut tx, proposal_id, update.position, update.completed)
            .await?;
    }

    let current = db::deliverables_for_proposal(&mut tx, proposal_id).await?;
    let done = current.iter().filter(|d| d.completed).count();
    let pct = (done * 100 / current.len()) as i64;
    db::set_completion_pct(&mut tx, proposal_id, pct).await?;

    let all_done = done == current.len();
    let work_target = if all_done {
        WorkStatus::Submitted
    } else {
        WorkStatus::InProgress
    };
    if work_target != proposal.work_status {
        db::set_work_status(&mut tx, proposal_id, work_target).await?;
    }
    tx.commit().await?;

    let mut changes = vec![Change::noted(
        "deliverables_updated",
        format!("completion {pct}%"),
    )];
    if work_target != proposal.work_status {
        changes.push(Change::status(
            "work_status",
            proposal.work_status.as_str(),
            work_target.as_str(),
        ));
    }
    history::append(
        pool,
        proposal_id,
        actor_id,
        PayerRole::Influencer.as_str(),
        &changes,
    )
    .await;

    reload(pool, proposal_id).await
}

/// Promoter sends submitted work back: `submitted -> revision_requested`.
pub async fn request_revision(
    pool: &SqlitePool,
    proposal_id: &str,
    actor_id: &str,
    reason: &str,
) -> Result<Proposal> {
    require_reason(reason, "requesting a revision")?;

    let mut tx = pool.begin().await?;
    let proposal = db::get_proposal(&mut tx, proposal_id)
        .await?
        .ok_or(EngineError::ProposalNotFound)?;
    guard_not_disputed(&proposal)?;

    if !work_transition_allowed(proposal.work_status, WorkStatus::RevisionRequested) {
        return Err(invalid(proposal.work_status.as_str(), "revision_requested"));
    }
    db::set_work_status(&mut tx, proposal_id, WorkStatus::RevisionRequested).await?;
    tx.commit().await?;

    history::append(
        pool,
        proposal_id,
        actor_id,
        PayerRole::Promoter.as_str(),
        &[Change {
            change_type: "work_status",
            old_value: Some(proposal.work_status.as_str().to_string()),
            new_value: Some("revision_requested".to_string()),
            note: Some(reason.to_string()),
        }],
    )
    .await;

    reload(pool, proposal_id).await
}

/// Either party escalates: any non-approved work state `-> disputed`.
/// Terminal — no further status-changing calls are accepted.
pub async fn raise_dispute(
    pool: &SqlitePool,
    proposal_id: &str,
    actor_id: &str,
    actor_role: PayerRole,
    reason: &str,
) -> Result<Proposal> {
    require_reason(reason, "raising a dispute")?;

    let mut tx = pool.begin().await?;
    let proposal = db::get_proposal(&mut tx, proposal_id)
        .await?
        .ok_or(EngineError::ProposalNotFound)?;
    guard_not_disputed(&proposal)?;

    if proposal.proposal_status != ProposalStatus::Agreed {
        return Err(invalid(proposal.proposal_status.as_str(), "agreed"));
    }
    if !work_transition_allowed(proposal.work_status, WorkStatus::Disputed) {
        return Err(invalid(proposal.work_status.as_str(), "disputed"));
    }
    db::set_work_status(&mut tx, proposal_id, WorkStatus::Disputed).await?;
    tx.commit().await?;

    history::append(
        pool,
        proposal_id,
        actor_id,
        actor_role.as_str(),
        &[Change {
            change_type: "work_status",
            old_value: Some(proposal.work_status.as_str().to_string()),
            new_value: Some("disputed".to_string()),
            note: Some(reason.to_string()),
        }],
    )
    .await;

    reload(pool, proposal_id).await
}

async fn reload(pool: &SqlitePool, proposal_id: &str) -> Result<Proposal> {
    let mut conn = pool.acquire().await?;
    db::get_proposal(&mut conn, proposal_id)
        .await?
        .ok_or(EngineError::ProposalNotFound)
}
