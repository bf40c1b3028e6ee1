use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{info, warn};

use signoff_core::config::SyncConfig;

use crate::token::{TokenCache, TokenSource};
use crate::SyncError;

#[derive(Clone, Debug, PartialEq)]
pub struct PaymentEntry {
    pub document_type: String,
    pub debit_amount: Decimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentStatus {
    Paid,
    Partial,
    Unpaid,
}

/// Source of remote payment ledger entries for an invoice reference.
#[async_trait::async_trait]
pub trait PaymentFeed: Send + Sync {
    async fn payment_entries(&self, invoice_no: &str) -> Result<Vec<PaymentEntry>, SyncError>;
}

#[derive(Deserialize)]
struct ODataResponse {
    #[serde(default)]
    value: Vec<LedgerEntryDto>,
}

#[derive(Deserialize)]
struct LedgerEntryDto {
    #[serde(rename = "Document_Type", default)]
    document_type: String,
    #[serde(rename = "Debit_Amount", default)]
    debit_amount: f64,
}

/// Queries the accounting tenant's general ledger over OData, authenticating
/// through the token cache.
pub struct HttpPaymentFeed<S> {
    client: reqwest::Client,
    base_url: String,
    tenant_id: String,
    company_id: String,
    tokens: TokenCache<S>,
}

impl<S> HttpPaymentFeed<S>
where
    S: TokenSource,
{
    pub fn from_config(config: &SyncConfig, tokens: TokenCache<S>) -> Result<Self, SyncError> {
        let base_url = config.base_url.clone().ok_or(SyncError::IncompleteConfig("base_url"))?;
        let tenant_id =
            config.tenant_id.clone().ok_or(SyncError::IncompleteConfig("tenant_id"))?;
        let company_id =
            config.company_id.clone().ok_or(SyncError::IncompleteConfig("company_id"))?;

        Ok(Self { client: reqwest::Client::new(), base_url, tenant_id, company_id, tokens })
    }
}

#[async_trait::async_trait]
impl<S> PaymentFeed for HttpPaymentFeed<S>
where
    S: TokenSource,
{
    async fn payment_entries(&self, invoice_no: &str) -> Result<Vec<PaymentEntry>, SyncError> {
        let token = self.tokens.valid_token().await?;
        let url = format!(
            "{}/{}/ODataV4/Company({})/generalLedgerEntries?$filter=External_Document_No eq \
             '{}' and Document_Type eq 'Payment'",
            self.base_url.trim_end_matches('/'),
            self.tenant_id,
            self.company_id,
            invoice_no,
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(token.expose_secret())
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?
            .json::<ODataResponse>()
            .await?;

        response
            .value
            .into_iter()
            .map(|entry| {
                let debit_amount = Decimal::try_from(entry.debit_amount).map_err(|_| {
                    SyncError::Decode(format!(
                        "unrepresentable debit amount {}",
                        entry.debit_amount
                    ))
                })?;
                Ok(PaymentEntry { document_type: entry.document_type, debit_amount })
            })
            .collect()
    }
}

/// An open invoice as the host application knows it.
#[derive(Clone, Debug, PartialEq)]
pub struct InvoiceBalance {
    pub invoice_no: String,
    pub total: Decimal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PaymentReconciliation {
    pub invoice_no: String,
    pub total_paid: Decimal,
    pub status: PaymentStatus,
}

pub fn classify(total_paid: Decimal, invoice_total: Decimal) -> PaymentStatus {
    if invoice_total > Decimal::ZERO && total_paid >= invoice_total {
        PaymentStatus::Paid
    } else if total_paid > Decimal::ZERO && total_paid < invoice_total {
        PaymentStatus::Partial
    } else {
        PaymentStatus::Unpaid
    }
}

/// Sum the remote payment entries against one invoice and classify it. Only
/// positive-debit payment rows count, everything else in the feed is noise.
pub async fn reconcile_invoice(
    feed: &dyn PaymentFeed,
    invoice: &InvoiceBalance,
) -> Result<PaymentReconciliation, SyncError> {
    let entries = feed.payment_entries(&invoice.invoice_no).await?;

    let total_paid: Decimal = entries
        .iter()
        .filter(|entry| entry.document_type == "Payment" && entry.debit_amount > Decimal::ZERO)
        .map(|entry| entry.debit_amount)
        .sum();

    let status = classify(total_paid, invoice.total);
    info!(
        invoice_no = %invoice.invoice_no,
        %total_paid,
        ?status,
        "invoice payment reconciled"
    );

    Ok(PaymentReconciliation { invoice_no: invoice.invoice_no.clone(), total_paid, status })
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SweepSummary {
    pub reconciled: Vec<PaymentReconciliation>,
    pub failed: usize,
}

/// Reconcile a batch of invoices. One invoice failing is logged and skipped;
/// the rest of the batch still runs.
pub async fn sweep(feed: &dyn PaymentFeed, invoices: &[InvoiceBalance]) -> SweepSummary {
    let mut summary = SweepSummary::default();
    for invoice in invoices {
        match reconcile_invoice(feed, invoice).await {
            Ok(reconciliation) => summary.reconciled.push(reconciliation),
            Err(error) => {
                summary.failed += 1;
                warn!(invoice_no = %invoice.invoice_no, %error, "payment reconciliation failed");
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{
        classify, reconcile_invoice, sweep, InvoiceBalance, PaymentEntry, PaymentFeed,
        PaymentStatus,
    };
    use crate::SyncError;

    struct StubFeed {
        entries: Vec<PaymentEntry>,
        fail_for: Option<String>,
    }

    #[async_trait::async_trait]
    impl PaymentFeed for StubFeed {
        async fn payment_entries(
            &self,
            invoice_no: &str,
        ) -> Result<Vec<PaymentEntry>, SyncError> {
            if self.fail_for.as_deref() == Some(invoice_no) {
                return Err(SyncError::Decode("feed unavailable".to_string()));
            }
            Ok(self.entries.clone())
        }
    }

    fn entry(document_type: &str, debit: i64) -> PaymentEntry {
        PaymentEntry {
            document_type: document_type.to_string(),
            debit_amount: Decimal::new(debit, 0),
        }
    }

    fn invoice(invoice_no: &str, total: i64) -> InvoiceBalance {
        InvoiceBalance { invoice_no: invoice_no.to_string(), total: Decimal::new(total, 0) }
    }

    #[test]
    fn classification_boundaries() {
        let total = Decimal::new(1_000, 0);
        assert_eq!(classify(Decimal::new(1_000, 0), total), PaymentStatus::Paid);
        assert_eq!(classify(Decimal::new(1_500, 0), total), PaymentStatus::Paid);
        assert_eq!(classify(Decimal::new(999, 0), total), PaymentStatus::Partial);
        assert_eq!(classify(Decimal::ZERO, total), PaymentStatus::Unpaid);
        assert_eq!(classify(Decimal::new(500, 0), Decimal::ZERO), PaymentStatus::Unpaid);
    }

    #[tokio::test]
    async fn reconcile_sums_only_positive_payment_debits() {
        let feed = StubFeed {
            entries: vec![
                entry("Payment", 400),
                entry("Payment", 300),
                entry("Payment", 0),
                entry("Invoice", 9_999),
            ],
            fail_for: None,
        };

        let result = reconcile_invoice(&feed, &invoice("INV-1", 1_000)).await.expect("reconcile");

        assert_eq!(result.total_paid, Decimal::new(700, 0));
        assert_eq!(result.status, PaymentStatus::Partial);
    }

    #[tokio::test]
    async fn sweep_isolates_per_invoice_failures() {
        let feed = StubFeed {
            entries: vec![entry("Payment", 1_000)],
            fail_for: Some("INV-broken".to_string()),
        };
        let invoices =
            [invoice("INV-1", 1_000), invoice("INV-broken", 500), invoice("INV-2", 2_000)];

        let summary = sweep(&feed, &invoices).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.reconciled.len(), 2);
        assert_eq!(summary.reconciled[0].status, PaymentStatus::Paid);
        assert_eq!(summary.reconciled[1].status, PaymentStatus::Partial);
    }
}
