//! Database layer — migrations, queries, and in-transaction write helpers.
//!
//! Reads take the pool; mutations that participate in an atomic apply take a
//! `&mut SqliteConnection` so the caller controls the transaction boundary.
//! All lifecycle mutation goes through `engine` / `lifecycle`; nothing else
//! in the system writes these tables directly.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::errors::Result;
use crate::models::{
    Deliverable, HistoryEntry, Invoice, OrderStatus, PaymentOrder, PaymentStatus, PayerRole,
    Proposal, ProposalStatus, ScheduleItem, ScheduleItemStatus, ScheduleItemType,
    TransactionRecord, TransactionType, WorkStatus,
};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    // Make sure the file is created if it doesn't exist yet.
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Payment orders
// ─────────────────────────────────────────────────────────

/// Record a gateway order in `created` state.  Performed at checkout time,
/// before any confirmation can arrive.
pub async fn insert_order(
    conn: &mut SqliteConnection,
    order_id: &str,
    proposal_id: &str,
    payer_role: PayerRole,
    payer_id: &str,
    amount_minor: i64,
    currency: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO payment_orders
            (order_id, proposal_id, payer_role, payer_id, amount_minor, currency, status)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'created')
        "#,
    )
    .bind(order_id)
    .bind(proposal_id)
    .bind(payer_role)
    .bind(payer_id)
    .bind(amount_minor)
    .bind(currency)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_order(conn: &mut SqliteConnection, order_id: &str) -> Result<Option<PaymentOrder>> {
    let row = sqlx::query_as::<_, PaymentOrder>(
        r#"
        SELECT order_id, proposal_id, payer_role, payer_id, amount_minor, currency,
               status, payment_id, created_at, updated_at
        FROM   payment_orders
        WHERE  order_id = ?1
        "#,
    )
    .bind(order_id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

/// Flip an order `created -> paid` and pin the gateway payment id.
pub async fn mark_order_paid(
    conn: &mut SqliteConnection,
    order_id: &str,
    payment_id: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE payment_orders
        SET    status = ?1, payment_id = ?2, updated_at = unixepoch()
        WHERE  order_id = ?3
        "#,
    )
    .bind(OrderStatus::Paid)
    .bind(payment_id)
    .bind(order_id)
    .execute(conn)
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Transaction ledger
// ─────────────────────────────────────────────────────────

/// Parameters for one ledger insert.
pub struct NewTransaction<'a> {
    pub proposal_id: &'a str,
    pub tx_type: TransactionType,
    pub payer_role: PayerRole,
    pub payer_id: &'a str,
    pub payee_id: Option<&'a str>,
    pub amount_minor: i64,
    pub currency: &'a str,
    pub order_id: Option<&'a str>,
    pub payment_id: Option<&'a str>,
    pub method: Option<&'a str>,
    pub reference: Option<&'a str>,
    pub proof_url: Option<&'a str>,
}

/// Append a ledger row.  Returns `false` when the dedup key already exists —
/// under a race exactly one caller sees `true` and every other caller falls
/// into the duplicate path.
pub async fn insert_transaction(
    conn: &mut SqliteConnection,
    tx: &NewTransaction<'_>,
) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        INSERT INTO transactions
            (proposal_id, tx_type, payer_role, payer_id, payee_id, amount_minor,
             currency, order_id, payment_id, method, reference, proof_url)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(tx.proposal_id)
    .bind(tx.tx_type)
    .bind(tx.payer_role)
    .bind(tx.payer_id)
    .bind(tx.payee_id)
    .bind(tx.amount_minor)
    .bind(tx.currency)
    .bind(tx.order_id)
    .bind(tx.payment_id)
    .bind(tx.method)
    .bind(tx.reference)
    .bind(tx.proof_url)
    .execute(conn)
    .await?
    .rows_affected();
    Ok(rows > 0)
}

/// Whether a platform-fee ledger row exists for the given proposal and role.
pub async fn platform_fee_exists(
    conn: &mut SqliteConnection,
    proposal_id: &str,
    payer_role: PayerRole,
) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT 1 FROM transactions
        WHERE  proposal_id = ?1 AND tx_type = 'platform_fee' AND payer_role = ?2
        "#,
    )
    .bind(proposal_id)
    .bind(payer_role)
    .fetch_optional(conn)
    .await?;
    Ok(row.is_some())
}

/// All ledger rows for a proposal, oldest first.
pub async fn transactions_for_proposal(
    pool: &SqlitePool,
    proposal_id: &str,
) -> Result<Vec<TransactionRecord>> {
    let rows = sqlx::query_as::<_, TransactionRecord>(
        r#"
        SELECT id, proposal_id, tx_type, payer_role, payer_id, payee_id, amount_minor,
               currency, order_id, payment_id, method, reference, proof_url, created_at
        FROM   transactions
        WHERE  proposal_id = ?1
        ORDER  BY id ASC
        "#,
    )
    .bind(proposal_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Proposals
// ─────────────────────────────────────────────────────────

/// Create a proposal shell at negotiation time.  The negotiation UI owns
/// everything else about proposal creation; the engine only needs the row.
pub async fn insert_proposal(
    conn: &mut SqliteConnection,
    id: &str,
    promoter_id: &str,
    influencer_id: &str,
    currency: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO proposals (id, promoter_id, influencer_id, currency)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(id)
    .bind(promoter_id)
    .bind(influencer_id)
    .bind(currency)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_proposal(
    conn: &mut SqliteConnection,
    proposal_id: &str,
) -> Result<Option<Proposal>> {
    let row = sqlx::query_as::<_, Proposal>(
        r#"
        SELECT id, promoter_id, influencer_id, amount_minor, currency,
               proposal_status, payment_status, work_status,
               fee_paid_influencer, fee_paid_promoter, completion_pct,
               cancel_reason, created_at, updated_at
        FROM   proposals
        WHERE  id = ?1
        "#,
    )
    .bind(proposal_id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn set_proposal_status(
    conn: &mut SqliteConnection,
    proposal_id: &str,
    status: ProposalStatus,
) -> Result<()> {
    sqlx::query("UPDATE proposals SET proposal_status = ?1, updated_at = unixepoch() WHERE id = ?2")
        .bind(status)
        .bind(proposal_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_payment_status(
    conn: &mut SqliteConnection,
    proposal_id: &str,
    status: PaymentStatus,
) -> Result<()> {
    sqlx::query("UPDATE proposals SET payment_status = ?1, updated_at = unixepoch() WHERE id = ?2")
        .bind(status)
        .bind(proposal_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_work_status(
    conn: &mut SqliteConnection,
    proposal_id: &str,
    status: WorkStatus,
) -> Result<()> {
    sqlx::query("UPDATE proposals SET work_status = ?1, updated_at = unixepoch() WHERE id = ?2")
        .bind(status)
        .bind(proposal_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_proposal_amount(
    conn: &mut SqliteConnection,
    proposal_id: &str,
    amount_minor: i64,
) -> Result<()> {
    sqlx::query("UPDATE proposals SET amount_minor = ?1, updated_at = unixepoch() WHERE id = ?2")
        .bind(amount_minor)
        .bind(proposal_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_cancel_reason(
    conn: &mut SqliteConnection,
    proposal_id: &str,
    reason: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE proposals SET cancel_reason = ?1, updated_at = unixepoch() WHERE id = ?2")
        .bind(reason)
        .bind(proposal_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Set `fee_paid_<role>` true.  Only ever called in the same transaction
/// that inserted the matching platform-fee ledger row.
pub async fn set_fee_paid(
    conn: &mut SqliteConnection,
    proposal_id: &str,
    role: PayerRole,
) -> Result<()> {
    let sql = match role {
        PayerRole::Influencer => {
            "UPDATE proposals SET fee_paid_influencer = 1, updated_at = unixepoch() WHERE id = ?1"
        }
        PayerRole::Promoter => {
            "UPDATE proposals SET fee_paid_promoter = 1, updated_at = unixepoch() WHERE id = ?1"
        }
    };
    sqlx::query(sql).bind(proposal_id).execute(conn).await?;
    Ok(())
}

pub async fn set_completion_pct(
    conn: &mut SqliteConnection,
    proposal_id: &str,
    pct: i64,
) -> Result<()> {
    sqlx::query("UPDATE proposals SET completion_pct = ?1, updated_at = unixepoch() WHERE id = ?2")
        .bind(pct)
        .bind(proposal_id)
        .execute(conn)
        .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Payment schedule
// ─────────────────────────────────────────────────────────

pub async fn insert_schedule_item(
    conn: &mut SqliteConnection,
    proposal_id: &str,
    item_type: ScheduleItemType,
    amount_minor: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO schedule_items (proposal_id, item_type, amount_minor, status)
        VALUES (?1, ?2, ?3, 'unpaid')
        "#,
    )
    .bind(proposal_id)
    .bind(item_type)
    .bind(amount_minor)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_schedule_item(
    conn: &mut SqliteConnection,
    proposal_id: &str,
    item_type: ScheduleItemType,
) -> Result<Option<ScheduleItem>> {
    let row = sqlx::query_as::<_, ScheduleItem>(
        r#"
        SELECT proposal_id, item_type, amount_minor, status, method, reference,
               proof_url, paid_at
        FROM   schedule_items
        WHERE  proposal_id = ?1 AND item_type = ?2
        "#,
    )
    .bind(proposal_id)
    .bind(item_type)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn schedule_for_proposal(
    conn: &mut SqliteConnection,
    proposal_id: &str,
) -> Result<Vec<ScheduleItem>> {
    let rows = sqlx::query_as::<_, ScheduleItem>(
        r#"
        SELECT proposal_id, item_type, amount_minor, status, method, reference,
               proof_url, paid_at
        FROM   schedule_items
        WHERE  proposal_id = ?1
        ORDER  BY item_type ASC
        "#,
    )
    .bind(proposal_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn mark_schedule_item_paid(
    conn: &mut SqliteConnection,
    proposal_id: &str,
    item_type: ScheduleItemType,
    method: Option<&str>,
    reference: Option<&str>,
    proof_url: Option<&str>,
    paid_at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE schedule_items
        SET    status = ?1, method = ?2, reference = ?3, proof_url = ?4, paid_at = ?5
        WHERE  proposal_id = ?6 AND item_type = ?7
        "#,
    )
    .bind(ScheduleItemStatus::Paid)
    .bind(method)
    .bind(reference)
    .bind(proof_url)
    .bind(paid_at)
    .bind(proposal_id)
    .bind(item_type)
    .execute(conn)
    .await?;
    Ok(())
}

/// Merge non-empty proof fields into an already-paid item.  `COALESCE` keeps
/// whatever was recorded first when the repeat call omits a field.
pub async fn merge_schedule_proof(
    conn: &mut SqliteConnection,
    proposal_id: &str,
    item_type: ScheduleItemType,
    method: Option<&str>,
    reference: Option<&str>,
    proof_url: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE schedule_items
        SET    method    = COALESCE(?1, method),
               reference = COALESCE(?2, reference),
               proof_url = COALESCE(?3, proof_url)
        WHERE  proposal_id = ?4 AND item_type = ?5
        "#,
    )
    .bind(method)
    .bind(reference)
    .bind(proof_url)
    .bind(proposal_id)
    .bind(item_type)
    .execute(conn)
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Deliverables
// ─────────────────────────────────────────────────────────

pub async fn insert_deliverable(
    conn: &mut SqliteConnection,
    proposal_id: &str,
    position: i64,
    title: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO deliverables (proposal_id, position, title) VALUES (?1, ?2, ?3)",
    )
    .bind(proposal_id)
    .bind(position)
    .bind(title)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn deliverables_for_proposal(
    conn: &mut SqliteConnection,
    proposal_id: &str,
) -> Result<Vec<Deliverable>> {
    let rows = sqlx::query_as::<_, Deliverable>(
        r#"
        SELECT proposal_id, position, title, completed
        FROM   deliverables
        WHERE  proposal_id = ?1
        ORDER  BY position ASC
        "#,
    )
    .bind(proposal_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn set_deliverable_completed(
    conn: &mut SqliteConnection,
    proposal_id: &str,
    position: i64,
    completed: bool,
) -> Result<()> {
    sqlx::query(
        "UPDATE deliverables SET completed = ?1 WHERE proposal_id = ?2 AND position = ?3",
    )
    .bind(completed)
    .bind(proposal_id)
    .bind(position)
    .execute(conn)
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Invoices
// ─────────────────────────────────────────────────────────

/// Insert an invoice unless one already exists at `(proposal, type)`.
/// Returns `false` on the idempotent no-op.
pub async fn insert_invoice(conn: &mut SqliteConnection, inv: &Invoice) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        INSERT INTO invoices
            (proposal_id, invoice_type, number, amount_minor, currency,
             issued_by, issued_to, paid_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(&inv.proposal_id)
    .bind(inv.invoice_type)
    .bind(&inv.number)
    .bind(inv.amount_minor)
    .bind(&inv.currency)
    .bind(&inv.issued_by)
    .bind(&inv.issued_to)
    .bind(inv.paid_at)
    .execute(conn)
    .await?
    .rows_affected();
    Ok(rows > 0)
}

pub async fn invoices_for_proposal(pool: &SqlitePool, proposal_id: &str) -> Result<Vec<Invoice>> {
    let rows = sqlx::query_as::<_, Invoice>(
        r#"
        SELECT proposal_id, invoice_type, number, amount_minor, currency,
               issued_by, issued_to, paid_at, created_at
        FROM   invoices
        WHERE  proposal_id = ?1
        ORDER  BY created_at ASC
        "#,
    )
    .bind(proposal_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Invoice-number prefix from the user's profile, if configured.
pub async fn invoice_prefix_for_user(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Option<String>> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT invoice_prefix FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(conn)
            .await?;
    Ok(row.and_then(|(v,)| v))
}

// ─────────────────────────────────────────────────────────
// History
// ─────────────────────────────────────────────────────────

pub async fn insert_history(
    conn: &mut SqliteConnection,
    proposal_id: &str,
    actor_id: &str,
    actor_role: &str,
    change_type: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    note: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO history
            (proposal_id, actor_id, actor_role, change_type, old_value, new_value, note)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(proposal_id)
    .bind(actor_id)
    .bind(actor_role)
    .bind(change_type)
    .bind(old_value)
    .bind(new_value)
    .bind(note)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn history_for_proposal(
    pool: &SqlitePool,
    proposal_id: &str,
) -> Result<Vec<HistoryEntry>> {
    let rows = sqlx::query_as::<_, HistoryEntry>(
        r#"
        SELECT id, proposal_id, actor_id, actor_role, change_type,
               old_value, new_value, note, created_at
        FROM   history
        WHERE  proposal_id = ?1
        ORDER  BY id ASC
        "#,
    )
    .bind(proposal_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
