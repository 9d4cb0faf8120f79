//! Axum REST API handlers.
//!
//! The two confirmation entry points — the client call and the gateway
//! webhook — are thin adapters over [`crate::engine::confirm_platform_fee`];
//! everything interesting happens there.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{error, warn};

use crate::config::Config;
use crate::db;
use crate::engine::{self, ApplyOutcome, FeeConfirmation};
use crate::errors::{EngineError, Result};
use crate::lifecycle::{self, DeliverableUpdate, FinalizeTerms, MarkPaid};
use crate::models::{
    Deliverable, HistoryEntry, Invoice, PayerRole, Proposal, ScheduleItem, ScheduleItemType,
    TransactionRecord,
};
use crate::signature;

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
    pub config: Config,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/payments/orders", post(create_order))
        .route("/payments/confirm", post(confirm_payment))
        .route("/webhooks/gateway", post(gateway_webhook))
        .route("/proposals", post(create_proposal))
        .route("/proposals/:id", get(get_proposal))
        .route("/proposals/:id/finalize", post(finalize_terms))
        .route("/proposals/:id/accept", post(accept_proposal))
        .route("/proposals/:id/request-changes", post(request_changes))
        .route("/proposals/:id/cancel", post(cancel_proposal))
        .route("/proposals/:id/schedule/:item/paid", post(mark_schedule_paid))
        .route("/proposals/:id/deliverables", post(update_deliverables))
        .route("/proposals/:id/revision", post(request_revision))
        .route("/proposals/:id/dispute", post(raise_dispute))
        .route("/proposals/:id/transactions", get(get_transactions))
        .route("/proposals/:id/invoices", get(get_invoices))
        .route("/proposals/:id/history", get(get_history))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<bool>,
}

impl WebhookResponse {
    fn success() -> Self {
        Self {
            success: Some(true),
            ignored: None,
        }
    }

    fn ignored() -> Self {
        Self {
            success: None,
            ignored: Some(true),
        }
    }
}

#[derive(Serialize)]
pub struct ProposalResponse {
    pub proposal: Proposal,
    pub schedule: Vec<ScheduleItem>,
    pub deliverables: Vec<Deliverable>,
}

#[derive(Serialize)]
pub struct TransactionsResponse {
    pub proposal_id: String,
    pub count: usize,
    pub transactions: Vec<TransactionRecord>,
}

#[derive(Serialize)]
pub struct InvoicesResponse {
    pub proposal_id: String,
    pub count: usize,
    pub invoices: Vec<Invoice>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub proposal_id: String,
    pub count: usize,
    pub entries: Vec<HistoryEntry>,
}

// ─────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─────────────────────────────────────────────────────────
// Payments
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub gateway_order_id: String,
    pub proposal_id: String,
    pub payer_role: PayerRole,
    pub payer_id: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// `POST /payments/orders`
///
/// Records a gateway order in `created` state.  The outbound call that
/// created the order on the gateway side lives in a thin wrapper outside
/// the engine.
pub async fn create_order(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<SuccessResponse>> {
    engine::record_order(
        &state.pool,
        &req.gateway_order_id,
        &req.proposal_id,
        req.payer_role,
        &req.payer_id,
        req.amount_minor,
        &req.currency,
    )
    .await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub user_id: String,
    pub proposal_id: String,
    pub payer_role: PayerRole,
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

/// `POST /payments/confirm` — the synchronous client confirmation path.
///
/// Duplicates return `{"success": true}` exactly like the first call; the
/// idempotency guarantee is what makes client-side retries safe.
pub async fn confirm_payment(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<SuccessResponse>> {
    if !signature::verify_checkout(
        &state.config.checkout_secret,
        &req.gateway_order_id,
        &req.gateway_payment_id,
        &req.signature,
    ) {
        return Err(EngineError::InvalidSignature);
    }

    engine::confirm_platform_fee(
        &state.pool,
        &FeeConfirmation {
            proposal_id: req.proposal_id,
            payer_role: req.payer_role,
            payer_id: req.user_id,
            order_id: req.gateway_order_id,
            payment_id: req.gateway_payment_id,
        },
    )
    .await?;

    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub id: String,
    pub payload: WebhookPayload,
}

#[derive(Deserialize)]
pub struct WebhookPayload {
    pub payment: WebhookPayment,
}

#[derive(Deserialize)]
pub struct WebhookPayment {
    pub entity: WebhookPaymentEntity,
}

#[derive(Deserialize)]
pub struct WebhookPaymentEntity {
    pub id: String,
    pub order_id: String,
}

/// `POST /webhooks/gateway` — the asynchronous gateway callback path.
///
/// Anything that is really "already handled" answers `{"ignored": true}`
/// with a 200; an error status here would make the gateway retry forever.
pub async fn gateway_webhook(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>> {
    let supplied = headers
        .get("x-webhook-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !signature::verify_webhook(&state.config.webhook_secret, &body, supplied) {
        return Err(EngineError::InvalidSignature);
    }

    let event: WebhookEvent = serde_json::from_slice(&body)?;
    if event.event != "payment.captured" {
        return Ok(Json(WebhookResponse::ignored()));
    }

    let entity = &event.payload.payment.entity;
    let mut conn = state.pool.acquire().await?;
    let Some(order) = db::get_order(&mut conn, &entity.order_id).await? else {
        warn!(
            event_id = %event.id,
            order_id = %entity.order_id,
            "webhook for unknown order, ignoring"
        );
        return Ok(Json(WebhookResponse::ignored()));
    };
    drop(conn);

    let conf = FeeConfirmation {
        proposal_id: order.proposal_id.clone(),
        payer_role: order.payer_role,
        payer_id: order.payer_id.clone(),
        order_id: entity.order_id.clone(),
        payment_id: entity.id.clone(),
    };
    match engine::confirm_platform_fee(&state.pool, &conf).await {
        Ok(ApplyOutcome::Applied) => Ok(Json(WebhookResponse::success())),
        Ok(ApplyOutcome::AlreadyApplied) => Ok(Json(WebhookResponse::ignored())),
        // Settled-by-another-payment and ledger disagreements are operator
        // problems, not gateway problems; retrying the delivery cannot fix
        // them.
        Err(e @ (EngineError::PaymentIdConflict { .. } | EngineError::InconsistentState(_))) => {
            error!(event_id = %event.id, "webhook confirmation failed: {e}");
            Ok(Json(WebhookResponse::ignored()))
        }
        Err(e) => Err(e),
    }
}

// ─────────────────────────────────────────────────────────
// Proposal lifecycle
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProposalRequest {
    pub proposal_id: String,
    pub promoter_id: String,
    pub influencer_id: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "INR".to_string()
}

/// `POST /proposals` — records the proposal shell the negotiation UI created.
pub async fn create_proposal(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateProposalRequest>,
) -> Result<Json<SuccessResponse>> {
    let mut conn = state.pool.acquire().await?;
    db::insert_proposal(
        &mut conn,
        &req.proposal_id,
        &req.promoter_id,
        &req.influencer_id,
        &req.currency,
    )
    .await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// `GET /proposals/:id`
pub async fn get_proposal(
    State(state): State<Arc<ApiState>>,
    Path(proposal_id): Path<String>,
) -> Result<Json<ProposalResponse>> {
    let mut conn = state.pool.acquire().await?;
    let proposal = db::get_proposal(&mut conn, &proposal_id)
        .await?
        .ok_or(EngineError::ProposalNotFound)?;
    let schedule = db::schedule_for_proposal(&mut conn, &proposal_id).await?;
    let deliverables = db::deliverables_for_proposal(&mut conn, &proposal_id).await?;
    Ok(Json(ProposalResponse {
        proposal,
        schedule,
        deliverables,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub user_id: String,
    pub amount_minor: i64,
    pub advance_minor: Option<i64>,
    #[serde(default)]
    pub deliverables: Vec<String>,
}

/// `POST /proposals/:id/finalize`
pub async fn finalize_terms(
    State(state): State<Arc<ApiState>>,
    Path(proposal_id): Path<String>,
    Json(req): Json<FinalizeRequest>,
) -> Result<Json<Proposal>> {
    let proposal = lifecycle::finalize_terms(
        &state.pool,
        &proposal_id,
        &FinalizeTerms {
            actor_id: req.user_id,
            amount_minor: req.amount_minor,
            advance_minor: req.advance_minor,
            deliverables: req.deliverables,
        },
    )
    .await?;
    Ok(Json(proposal))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorRequest {
    pub user_id: String,
}

/// `POST /proposals/:id/accept`
pub async fn accept_proposal(
    State(state): State<Arc<ApiState>>,
    Path(proposal_id): Path<String>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<Proposal>> {
    let proposal = lifecycle::accept_proposal(&state.pool, &proposal_id, &req.user_id).await?;
    Ok(Json(proposal))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonRequest {
    pub user_id: String,
    pub reason: String,
}

/// `POST /proposals/:id/request-changes`
pub async fn request_changes(
    State(state): State<Arc<ApiState>>,
    Path(proposal_id): Path<String>,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<Proposal>> {
    let proposal =
        lifecycle::request_changes(&state.pool, &proposal_id, &req.user_id, &req.reason).await?;
    Ok(Json(proposal))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub user_id: String,
    pub role: PayerRole,
    pub reason: Option<String>,
}

/// `POST /proposals/:id/cancel`
pub async fn cancel_proposal(
    State(state): State<Arc<ApiState>>,
    Path(proposal_id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<Proposal>> {
    let proposal = lifecycle::cancel_proposal(
        &state.pool,
        &proposal_id,
        &req.user_id,
        req.role,
        req.reason.as_deref(),
    )
    .await?;
    Ok(Json(proposal))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkPaidRequest {
    pub user_id: String,
    pub method: Option<String>,
    pub reference: Option<String>,
    pub proof_url: Option<String>,
}

/// `POST /proposals/:id/schedule/:item/paid`
pub async fn mark_schedule_paid(
    State(state): State<Arc<ApiState>>,
    Path((proposal_id, item)): Path<(String, String)>,
    Json(req): Json<MarkPaidRequest>,
) -> Result<Json<SuccessResponse>> {
    let item_type = match item.as_str() {
        "advance" => ScheduleItemType::Advance,
        "remaining" => ScheduleItemType::Remaining,
        other => {
            return Err(EngineError::Validation(format!(
                "unknown schedule item '{other}'"
            )))
        }
    };
    lifecycle::mark_schedule_paid(
        &state.pool,
        &proposal_id,
        item_type,
        &MarkPaid {
            actor_id: req.user_id,
            method: req.method,
            reference: req.reference,
            proof_url: req.proof_url,
        },
        &state.config.invoice_prefix,
    )
    .await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverablesRequest {
    pub user_id: String,
    pub updates: Vec<DeliverableUpdateBody>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverableUpdateBody {
    pub position: i64,
    pub completed: bool,
}

/// `POST /proposals/:id/deliverables`
pub async fn update_deliverables(
    State(state): State<Arc<ApiState>>,
    Path(proposal_id): Path<String>,
    Json(req): Json<DeliverablesRequest>,
) -> Result<Json<Proposal>> {
    let updates: Vec<DeliverableUpdate> = req
        .updates
        .iter()
        .map(|u| DeliverableUpdate {
            position: u.position,
            completed: u.completed,
        })
        .collect();
    let proposal =
        lifecycle::update_deliverables(&state.pool, &proposal_id, &req.user_id, &updates).await?;
    Ok(Json(proposal))
}

/// `POST /proposals/:id/revision`
pub async fn request_revision(
    State(state): State<Arc<ApiState>>,
    Path(proposal_id): Path<String>,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<Proposal>> {
    let proposal =
        lifecycle::request_revision(&state.pool, &proposal_id, &req.user_id, &req.reason).await?;
    Ok(Json(proposal))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisputeRequest {
    pub user_id: String,
    pub role: PayerRole,
    pub reason: String,
}

/// `POST /proposals/:id/dispute`
pub async fn raise_dispute(
    State(state): State<Arc<ApiState>>,
    Path(proposal_id): Path<String>,
    Json(req): Json<DisputeRequest>,
) -> Result<Json<Proposal>> {
    let proposal = lifecycle::raise_dispute(
        &state.pool,
        &proposal_id,
        &req.user_id,
        req.role,
        &req.reason,
    )
    .await?;
    Ok(Json(proposal))
}

// ─────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────

/// `GET /proposals/:id/transactions`
pub async fn get_transactions(
    State(state): State<Arc<ApiState>>,
    Path(proposal_id): Path<String>,
) -> Result<Json<TransactionsResponse>> {
    let transactions = db::transactions_for_proposal(&state.pool, &proposal_id).await?;
    Ok(Json(TransactionsResponse {
        count: transactions.len(),
        proposal_id,
        transactions,
    }))
}

/// `GET /proposals/:id/invoices`
pub async fn get_invoices(
    State(state): State<Arc<ApiState>>,
    Path(proposal_id): Path<String>,
) -> Result<Json<InvoicesResponse>> {
    let invoices = db::invoices_for_proposal(&state.pool, &proposal_id).await?;
    Ok(Json(InvoicesResponse {
        count: invoices.len(),
        proposal_id,
        invoices,
    }))
}

/// `GET /proposals/:id/history`
pub async fn get_history(
    State(state): State<Arc<ApiState>>,
    Path(proposal_id): Path<String>,
) -> Result<Json<HistoryResponse>> {
    let entries = db::history_for_proposal(&state.pool, &proposal_id).await?;
    Ok(Json(HistoryResponse {
        count: entries.len(),
        proposal_id,
        entries,
    }))
}
