use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::budget::{
    AlertSeverity, Budget, BudgetAlert, BudgetScope, BudgetState, Commitment, CommitmentId,
    CommitmentState,
};
use crate::domain::request::{DocumentRef, RequestId, RequestKind, WorkflowRequest};
use crate::errors::BudgetError;

/// Result of comparing a requested amount against the ledger position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetCheck {
    pub available: Decimal,
    pub overbudget: bool,
    pub requires_approval: bool,
}

/// What the gate decided for a document. Denial is surfaced as
/// `BudgetError::InsufficientBudget` instead of a variant so callers handle
/// it on the error path like every other failure.
#[derive(Clone, Debug, PartialEq)]
pub enum BudgetDecision {
    /// Committed without incident.
    Cleared { commitment: Commitment },
    /// Committed, but utilization crossed alert thresholds or ran over.
    Alerted { commitment: Commitment, alerts: Vec<BudgetAlert> },
    /// Commit withheld; the returned draft request must be routed through the
    /// approval workflow before the document may retry.
    ApprovalRequired { request: WorkflowRequest },
}

/// Explicit surface a business document implements to pass the budget gate.
/// The gate never probes documents for ad-hoc fields.
pub trait BudgetedDocument {
    fn document_ref(&self) -> DocumentRef;
    fn amount(&self) -> Decimal;
    fn budget_scope(&self) -> BudgetScope;
    fn requester_id(&self) -> String;
}

/// Committed/actual/available tracking for one budget, with
/// overbudget-to-approval escalation.
///
/// `committed` sums active commitments, `actual` sums confirmed ones, and
/// `available = total - committed`; confirming a commitment moves its weight
/// from committed to actual.
#[derive(Clone, Debug)]
pub struct BudgetLedger {
    budget: Budget,
    commitments: Vec<Commitment>,
}

impl BudgetLedger {
    pub fn new(budget: Budget, commitments: Vec<Commitment>) -> Self {
        Self { budget, commitments }
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    pub fn commitments(&self) -> &[Commitment] {
        &self.commitments
    }

    pub fn committed(&self) -> Decimal {
        self.sum_in_state(CommitmentState::Active)
    }

    pub fn actual(&self) -> Decimal {
        self.sum_in_state(CommitmentState::Confirmed)
    }

    pub fn available(&self) -> Decimal {
        self.budget.total - self.committed()
    }

    pub fn utilization_pct(&self) -> Decimal {
        if self.budget.total <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.committed() * Decimal::from(100u32) / self.budget.total
    }

    fn sum_in_state(&self, state: CommitmentState) -> Decimal {
        self.commitments
            .iter()
            .filter(|commitment| commitment.state == state)
            .map(|commitment| commitment.amount)
            .sum()
    }

    pub fn check(&self, amount: Decimal) -> BudgetCheck {
        let available = self.available();
        let overbudget = amount > available;
        let requires_approval = overbudget
            && self.budget.allow_overbudget
            && self.budget.overbudget_approval_required;
        BudgetCheck { available, overbudget, requires_approval }
    }

    /// Run a document through the gate: commit when the budget covers it,
    /// escalate to an approval request when overbudget spending needs
    /// sign-off, reject outright when overbudget spending is disallowed.
    pub fn review(
        &mut self,
        document: &dyn BudgetedDocument,
        now: DateTime<Utc>,
    ) -> Result<BudgetDecision, BudgetError> {
        let amount = document.amount();
        let check = self.check(amount);

        if check.overbudget {
            if !self.budget.allow_overbudget {
                return Err(BudgetError::InsufficientBudget {
                    requested: amount,
                    available: check.available,
                });
            }
            if check.requires_approval {
                return Ok(BudgetDecision::ApprovalRequired {
                    request: self.overbudget_request(document, now),
                });
            }
            // Permitted overrun: record it, but always flag it.
            let before = self.utilization_pct();
            let commitment = self.commit(amount, document.document_ref(), None, now)?;
            let mut alerts = self.crossed_thresholds(before, now);
            alerts.push(BudgetAlert {
                budget_id: self.budget.id.clone(),
                threshold_pct: Decimal::from(100u32),
                severity: AlertSeverity::Critical,
                utilization_pct: self.utilization_pct(),
                raised_at: now,
            });
            return Ok(BudgetDecision::Alerted { commitment, alerts });
        }

        let before = self.utilization_pct();
        let commitment = self.commit(amount, document.document_ref(), None, now)?;
        let alerts = self.crossed_thresholds(before, now);
        if alerts.is_empty() {
            Ok(BudgetDecision::Cleared { commitment })
        } else {
            Ok(BudgetDecision::Alerted { commitment, alerts })
        }
    }

    /// Reserve part of the available amount. The commitment starts active and
    /// weighs against `available` until confirmed, released or cancelled.
    pub fn commit(
        &mut self,
        amount: Decimal,
        source: DocumentRef,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Commitment, BudgetError> {
        if self.budget.state != BudgetState::Active {
            return Err(BudgetError::BudgetInactive(self.budget.id.0.clone()));
        }
        if amount <= Decimal::ZERO {
            return Err(BudgetError::NonPositiveAmount(amount));
        }

        let commitment = Commitment {
            id: CommitmentId(Uuid::new_v4().to_string()),
            budget_id: self.budget.id.clone(),
            amount,
            source,
            state: CommitmentState::Active,
            description,
            committed_at: now,
            released_at: None,
        };
        self.commitments.push(commitment.clone());
        Ok(commitment)
    }

    /// Active → confirmed: the reservation became an actual expense.
    pub fn confirm(&mut self, id: &CommitmentId) -> Result<&Commitment, BudgetError> {
        self.transition(id, "confirm", &[CommitmentState::Active], CommitmentState::Confirmed, None)
    }

    /// Active or confirmed → released: the reservation is given back.
    pub fn release(
        &mut self,
        id: &CommitmentId,
        now: DateTime<Utc>,
    ) -> Result<&Commitment, BudgetError> {
        self.transition(
            id,
            "release",
            &[CommitmentState::Active, CommitmentState::Confirmed],
            CommitmentState::Released,
            Some(now),
        )
    }

    pub fn cancel_commitment(&mut self, id: &CommitmentId) -> Result<&Commitment, BudgetError> {
        self.transition(
            id,
            "cancel",
            &[CommitmentState::Draft, CommitmentState::Active],
            CommitmentState::Cancelled,
            None,
        )
    }

    fn transition(
        &mut self,
        id: &CommitmentId,
        action: &'static str,
        allowed: &[CommitmentState],
        to: CommitmentState,
        released_at: Option<DateTime<Utc>>,
    ) -> Result<&Commitment, BudgetError> {
        let commitment = self
            .commitments
            .iter_mut()
            .find(|commitment| commitment.id == *id)
            .ok_or_else(|| BudgetError::UnknownCommitment(id.0.clone()))?;

        if !allowed.contains(&commitment.state) {
            return Err(BudgetError::InvalidCommitmentState { action, state: commitment.state });
        }
        commitment.state = to;
        if released_at.is_some() {
            commitment.released_at = released_at;
        }
        Ok(commitment)
    }

    fn crossed_thresholds(&self, before_pct: Decimal, now: DateTime<Utc>) -> Vec<BudgetAlert> {
        let after_pct = self.utilization_pct();
        self.budget
            .thresholds
            .iter()
            .filter(|threshold| {
                before_pct < threshold.threshold_pct && after_pct >= threshold.threshold_pct
            })
            .map(|threshold| BudgetAlert {
                budget_id: self.budget.id.clone(),
                threshold_pct: threshold.threshold_pct,
                severity: threshold.severity,
                utilization_pct: after_pct,
                raised_at: now,
            })
            .collect()
    }

    fn overbudget_request(
        &self,
        document: &dyn BudgetedDocument,
        now: DateTime<Utc>,
    ) -> WorkflowRequest {
        let source = document.document_ref();
        let mut request = WorkflowRequest::new(
            RequestId(Uuid::new_v4().to_string()),
            format!("Overbudget approval for {} {}", source.model, source.record_id),
            RequestKind::Overbudget,
            document.requester_id(),
            document.amount(),
            self.budget.currency.clone(),
            now,
        );
        request.department = document.budget_scope().department;
        request.source = Some(source);
        request
    }
}
