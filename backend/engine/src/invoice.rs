//! Invoice generation for completed payments.
//!
//! The invoice number is a pure function of (prefix, paid date, proposal id,
//! type), so two processes racing to generate the same invoice compute the
//! same number and the `(proposal, type)` key check in [`ensure_invoice`] is
//! sufficient for correctness.

use chrono::DateTime;
use sha2::{Digest, Sha256};
use sqlx::SqliteConnection;

use crate::db;
use crate::errors::Result;
use crate::models::{Invoice, InvoiceType, Proposal};

/// Deterministic invoice number, e.g. `RIYA-20260829-9F2C1A-ADV`.
pub fn invoice_number(
    prefix: &str,
    paid_at_unix: i64,
    proposal_id: &str,
    kind: InvoiceType,
) -> String {
    let date = DateTime::from_timestamp(paid_at_unix, 0)
        .map(|dt| dt.format("%Y%m%d").to_string())
        .unwrap_or_else(|| "00000000".to_string());

    // Short stable tag so long proposal ids don't bloat the number.
    let digest = Sha256::digest(proposal_id.as_bytes());
    let tag = hex::encode_upper(&digest[..3]);

    let suffix = match kind {
        InvoiceType::Advance => "ADV",
        InvoiceType::Final => "FIN",
    };
    format!("{prefix}-{date}-{tag}-{suffix}")
}

/// Create the invoice for a completed payment unless one already exists at
/// `(proposal, type)`.  Runs inside the caller's payment transaction.
/// Returns `false` on the idempotent no-op.
#[allow(clippy::too_many_arguments)]
pub async fn ensure_invoice(
    conn: &mut SqliteConnection,
    proposal: &Proposal,
    kind: InvoiceType,
    amount_minor: i64,
    paid_at_unix: i64,
    default_prefix: &str,
) -> Result<bool> {
    // The influencer invoices the promoter; the prefix comes from their
    // profile, falling back to the configured default.
    let prefix = db::invoice_prefix_for_user(conn, &proposal.influencer_id)
        .await?
        .unwrap_or_else(|| default_prefix.to_string());

    let invoice = Invoice {
        proposal_id: proposal.id.clone(),
        invoice_type: kind,
        number: invoice_number(&prefix, paid_at_unix, &proposal.id, kind),
        amount_minor,
        currency: proposal.currency.clone(),
        issued_by: proposal.influencer_id.clone(),
        issued_to: proposal.promoter_id.clone(),
        paid_at: paid_at_unix,
        created_at: 0, // assigned by the database default
    };

    db::insert_invoice(conn, &invoice).await
}
