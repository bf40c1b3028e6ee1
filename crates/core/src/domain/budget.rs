use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::request::DocumentRef;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BudgetId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitmentId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetState {
    Draft,
    Active,
    Closed,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentState {
    Draft,
    Active,
    Confirmed,
    Cancelled,
    Released,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Danger,
    Critical,
}

/// Utilization percentage at which an alert fires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertThreshold {
    pub threshold_pct: Decimal,
    pub severity: AlertSeverity,
}

/// Dimensions a budget is carved along. Documents carry the same shape so the
/// gate can match them to a budget without probing arbitrary fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetScope {
    pub department: Option<String>,
    pub project: Option<String>,
    pub cost_center: Option<String>,
}

impl BudgetScope {
    /// A budget scope matches a document scope when every dimension the
    /// budget pins down agrees with the document.
    pub fn covers(&self, other: &BudgetScope) -> bool {
        let dimension_ok = |own: &Option<String>, theirs: &Option<String>| match own {
            Some(value) => theirs
                .as_deref()
                .is_some_and(|candidate| candidate.trim().eq_ignore_ascii_case(value.trim())),
            None => true,
        };

        dimension_ok(&self.department, &other.department)
            && dimension_ok(&self.project, &other.project)
            && dimension_ok(&self.cost_center, &other.cost_center)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub id: BudgetId,
    pub name: String,
    pub code: String,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub scope: BudgetScope,
    pub total: Decimal,
    pub currency: String,
    pub state: BudgetState,
    pub allow_overbudget: bool,
    pub overbudget_approval_required: bool,
    pub thresholds: Vec<AlertThreshold>,
    pub notification_recipients: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Commitment {
    pub id: CommitmentId,
    pub budget_id: BudgetId,
    pub amount: Decimal,
    pub source: DocumentRef,
    pub state: CommitmentState,
    pub description: Option<String>,
    pub committed_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetAlert {
    pub budget_id: BudgetId,
    pub threshold_pct: Decimal,
    pub severity: AlertSeverity,
    pub utilization_pct: Decimal,
    pub raised_at: DateTime<Utc>,
}
