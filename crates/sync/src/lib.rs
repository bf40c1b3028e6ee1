//! Connector for the external accounting system.
//!
//! Two concerns live here: an OAuth client-credentials token cache (explicit
//! `{token, expiry}` state behind `valid_token()`, refreshed on expiry) and a
//! payment reconciliation probe that classifies invoices as paid, partially
//! paid or unpaid from the remote ledger's payment entries. The workflow core
//! never depends on this crate; hosts wire it in as a collaborator.

pub mod payments;
pub mod token;

use thiserror::Error;

pub use payments::{
    classify, reconcile_invoice, sweep, HttpPaymentFeed, InvoiceBalance, PaymentEntry,
    PaymentFeed, PaymentReconciliation, PaymentStatus, SweepSummary,
};
pub use token::{FetchedToken, OauthTokenSource, TokenCache, TokenSource};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token endpoint returned no usable access token")]
    MissingToken,
    #[error("sync configuration incomplete: missing {0}")]
    IncompleteConfig(&'static str),
    #[error("decode error: {0}")]
    Decode(String),
}
