//! Application layer: the payment gateway orchestration engine.
//!
//! `PaymentOrchestrator` binds the gateway a request resolves to, gates it through the
//! validation rules, dispatches to the matching capability, and reconciles the outcome
//! into the transaction ledger. Operations are split by concern:
//!
//! - `dispatcher`: process, authorize, capture, refund and void.
//! - `notifications`: inbound gateway callbacks.
//! - `accounts`: offsite storage of payment accounts.

pub mod accounts;
pub mod binder;
pub mod dispatcher;
pub mod engine;
pub mod notifications;
pub mod receipts;
pub mod validation;
