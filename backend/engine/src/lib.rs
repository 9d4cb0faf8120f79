//! Payment confirmation and proposal lifecycle engine for the collab
//! marketplace.
//!
//! Untrusted, possibly-duplicated, possibly-out-of-order payment signals —
//! a direct client confirmation and an asynchronous gateway webhook, both
//! describing the same real-world payment — are applied to a shared record
//! exactly once, keeping the proposal's three status axes, the payment
//! ledger, the invoice record and the audit trail mutually consistent.

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod history;
pub mod invoice;
pub mod lifecycle;
pub mod models;
pub mod signature;
