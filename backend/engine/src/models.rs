//! Domain types shared across the engine.
//!
//! A proposal carries three correlated status axes — negotiation, payment and
//! work — plus the fee flags that must stay in lock-step with the transaction
//! ledger.  All enums serialise as `snake_case` strings both in JSON and in
//! the database.

use serde::{Deserialize, Serialize};

/// Which side of the marketplace is paying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PayerRole {
    Influencer,
    Promoter,
}

impl PayerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Influencer => "influencer",
            Self::Promoter => "promoter",
        }
    }
}

/// Lifecycle of a gateway payment order.  Forward-only:
/// `created -> paid` or `created -> failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Paid,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Paid => "paid",
            Self::Failed => "failed",
        }
    }
}

/// Ledger row kinds.  `(proposal, type, payer role)` is the dedup key for
/// platform fees; `(proposal, type)` for schedule payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TransactionType {
    PlatformFee,
    Advance,
    Remaining,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlatformFee => "platform_fee",
            Self::Advance => "advance",
            Self::Remaining => "remaining",
        }
    }
}

/// Negotiation axis of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ProposalStatus {
    Created,
    Discussing,
    ChangesRequested,
    Agreed,
    Cancelled,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Discussing => "discussing",
            Self::ChangesRequested => "changes_requested",
            Self::Agreed => "agreed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Payment axis of a proposal.  Unlocked by `proposal_status = agreed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PaymentStatus {
    NotStarted,
    PendingAdvance,
    PendingEscrow,
    AdvancePaid,
    FullyPaid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::PendingAdvance => "pending_advance",
            Self::PendingEscrow => "pending_escrow",
            Self::AdvancePaid => "advance_paid",
            Self::FullyPaid => "fully_paid",
        }
    }
}

/// Work axis of a proposal.  `disputed` is terminal for both parties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum WorkStatus {
    InProgress,
    Submitted,
    RevisionRequested,
    Approved,
    Disputed,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Submitted => "submitted",
            Self::RevisionRequested => "revision_requested",
            Self::Approved => "approved",
            Self::Disputed => "disputed",
        }
    }
}

/// One scheduled payment within a proposal's payment plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ScheduleItemType {
    Advance,
    Remaining,
}

impl ScheduleItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Advance => "advance",
            Self::Remaining => "remaining",
        }
    }

    /// The ledger row kind inserted when this item is marked paid.
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            Self::Advance => TransactionType::Advance,
            Self::Remaining => TransactionType::Remaining,
        }
    }

    /// The invoice generated when this item is marked paid.
    pub fn invoice_type(&self) -> InvoiceType {
        match self {
            Self::Advance => InvoiceType::Advance,
            Self::Remaining => InvoiceType::Final,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ScheduleItemStatus {
    Unpaid,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum InvoiceType {
    Advance,
    Final,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Advance => "advance",
            Self::Final => "final",
        }
    }
}

// ─────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────

/// A gateway payment order as stored in / read from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PaymentOrder {
    pub order_id: String,
    pub proposal_id: String,
    pub payer_role: PayerRole,
    pub payer_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// An append-only ledger row.  Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransactionRecord {
    pub id: i64,
    pub proposal_id: String,
    pub tx_type: TransactionType,
    pub payer_role: PayerRole,
    pub payer_id: String,
    pub payee_id: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub method: Option<String>,
    pub reference: Option<String>,
    pub proof_url: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Proposal {
    pub id: String,
    pub promoter_id: String,
    pub influencer_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub proposal_status: ProposalStatus,
    pub payment_status: PaymentStatus,
    pub work_status: WorkStatus,
    pub fee_paid_influencer: bool,
    pub fee_paid_promoter: bool,
    pub completion_pct: i64,
    pub cancel_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Proposal {
    pub fn fee_paid(&self, role: PayerRole) -> bool {
        match role {
            PayerRole::Influencer => self.fee_paid_influencer,
            PayerRole::Promoter => self.fee_paid_promoter,
        }
    }

    /// Counterparty of the given payer, used as the ledger `payee_id`.
    pub fn counterparty(&self, role: PayerRole) -> &str {
        match role {
            PayerRole::Influencer => &self.promoter_id,
            PayerRole::Promoter => &self.influencer_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduleItem {
    pub proposal_id: String,
    pub item_type: ScheduleItemType,
    pub amount_minor: i64,
    pub status: ScheduleItemStatus,
    pub method: Option<String>,
    pub reference: Option<String>,
    pub proof_url: Option<String>,
    pub paid_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Deliverable {
    pub proposal_id: String,
    pub position: i64,
    pub title: String,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invoice {
    pub proposal_id: String,
    pub invoice_type: InvoiceType,
    pub number: String,
    pub amount_minor: i64,
    pub currency: String,
    pub issued_by: String,
    pub issued_to: String,
    pub paid_at: i64,
    pub created_at: i64,
}

/// One audit-trail entry.  Pure output; never read for control flow.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HistoryEntry {
    pub id: i64,
    pub proposal_id: String,
    pub actor_id: String,
    pub actor_role: String,
    pub change_type: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub note: Option<String>,
    pub created_at: i64,
}
