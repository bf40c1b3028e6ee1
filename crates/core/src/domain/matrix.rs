use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::approver::ApproverId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatrixId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixState {
    Draft,
    Active,
    Archived,
}

/// How a single level decides it is done.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    Single,
    Any,
    All,
    Multiple,
    Percentage,
    Quorum,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

/// One predicate over the request's free-form `custom_data` document.
/// `field` is a dotted path, e.g. `vendor.country`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomRule {
    pub field: String,
    pub op: RuleOp,
    pub value: Value,
}

impl CustomRule {
    pub fn matches(&self, data: &Value) -> bool {
        let pointer = format!("/{}", self.field.replace('.', "/"));
        let Some(actual) = data.pointer(&pointer) else {
            return false;
        };

        match self.op {
            RuleOp::Eq => json_eq(actual, &self.value),
            RuleOp::Ne => !json_eq(actual, &self.value),
            RuleOp::Gt => json_cmp(actual, &self.value).is_some_and(|ord| ord.is_gt()),
            RuleOp::Gte => json_cmp(actual, &self.value).is_some_and(|ord| ord.is_ge()),
            RuleOp::Lt => json_cmp(actual, &self.value).is_some_and(|ord| ord.is_lt()),
            RuleOp::Lte => json_cmp(actual, &self.value).is_some_and(|ord| ord.is_le()),
            RuleOp::Contains => json_contains(actual, &self.value),
        }
    }
}

fn json_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn json_cmp(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    let l = left.as_f64()?;
    let r = right.as_f64()?;
    l.partial_cmp(&r)
}

fn json_contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(text) => needle.as_str().is_some_and(|fragment| text.contains(fragment)),
        Value::Array(items) => items.iter().any(|item| json_eq(item, needle)),
        _ => false,
    }
}

/// Inclusive amount band. A missing or zero `max` means unbounded above.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AmountRange {
    pub min: Decimal,
    pub max: Option<Decimal>,
}

impl AmountRange {
    pub fn contains(&self, amount: Decimal) -> bool {
        if amount < self.min {
            return false;
        }
        match self.max {
            Some(max) if max > Decimal::ZERO => amount <= max,
            _ => true,
        }
    }

    fn bounded_max(&self) -> Option<Decimal> {
        self.max.filter(|max| *max > Decimal::ZERO)
    }
}

/// Selection predicate deciding which requests a matrix governs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatrixCriteria {
    Amount(AmountRange),
    Department { departments: Vec<String> },
    Category { categories: Vec<String> },
    Custom { rules: Vec<CustomRule> },
    /// Every nested criterion must hold.
    Hybrid { all: Vec<MatrixCriteria> },
}

/// Inputs the resolver matches criteria against.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatrixSelection {
    pub amount: Decimal,
    pub department: Option<String>,
    pub category: Option<String>,
    pub custom_data: Option<Value>,
}

impl MatrixCriteria {
    pub fn matches(&self, selection: &MatrixSelection) -> bool {
        match self {
            Self::Amount(range) => range.contains(selection.amount),
            Self::Department { departments } => selection
                .department
                .as_deref()
                .is_some_and(|department| contains_key(departments, department)),
            Self::Category { categories } => selection
                .category
                .as_deref()
                .is_some_and(|category| contains_key(categories, category)),
            Self::Custom { rules } => match &selection.custom_data {
                Some(data) => rules.iter().all(|rule| rule.matches(data)),
                None => false,
            },
            Self::Hybrid { all } => all.iter().all(|criteria| criteria.matches(selection)),
        }
    }

    /// The tightest configured upper amount bound, used as the specificity
    /// tie-break during resolution.
    pub fn bounded_max_amount(&self) -> Option<Decimal> {
        match self {
            Self::Amount(range) => range.bounded_max(),
            Self::Hybrid { all } => {
                all.iter().filter_map(|criteria| criteria.bounded_max_amount()).min()
            }
            _ => None,
        }
    }
}

fn contains_key(candidates: &[String], value: &str) -> bool {
    candidates.iter().any(|candidate| candidate.trim().eq_ignore_ascii_case(value.trim()))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub sequence: u32,
    pub name: String,
    pub approver_ids: Vec<ApproverId>,
    pub approver_groups: Vec<String>,
    pub policy: CompletionPolicy,
    pub required_approvals: u32,
    /// Percent of level slots that must approve, 0..=100. Only read for the
    /// `Percentage` policy.
    pub approval_percentage: Decimal,
    pub timeout_hours: u32,
    pub auto_approve_on_timeout: bool,
    pub escalation_user_ids: Vec<ApproverId>,
}

impl Level {
    /// Whether the recorded approvals satisfy this level's completion policy.
    /// `total_slots` counts every approval row created for the level,
    /// including delegated ones.
    pub fn is_satisfied(&self, approved: usize, total_slots: usize) -> bool {
        match self.policy {
            CompletionPolicy::Single | CompletionPolicy::Any => approved >= 1,
            CompletionPolicy::All => total_slots > 0 && approved == total_slots,
            CompletionPolicy::Multiple | CompletionPolicy::Quorum => {
                approved as u64 >= u64::from(self.required_approvals)
            }
            CompletionPolicy::Percentage => {
                if total_slots == 0 {
                    return false;
                }
                let approved = Decimal::from(approved as u64);
                let total = Decimal::from(total_slots as u64);
                approved * Decimal::from(100u32) >= self.approval_percentage * total
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum MatrixValidationError {
    #[error("matrix `{0}` defines no approval levels")]
    NoLevels(String),
    #[error("matrix `{matrix}` has duplicate level sequence {sequence}")]
    DuplicateLevelSequence { matrix: String, sequence: u32 },
    #[error("matrix `{matrix}` has a level with sequence 0; sequences start at 1")]
    ZeroLevelSequence { matrix: String },
    #[error("level {sequence} of matrix `{matrix}` requires more approvals than it has approvers")]
    RequiredExceedsApprovers { matrix: String, sequence: u32 },
    #[error("level {sequence} of matrix `{matrix}` has an approval percentage outside 0..=100")]
    InvalidPercentage { matrix: String, sequence: u32 },
    #[error("matrix `{matrix}` has min amount above max amount")]
    InvalidAmountRange { matrix: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub id: MatrixId,
    pub name: String,
    pub sequence: i32,
    pub state: MatrixState,
    pub criteria: MatrixCriteria,
    pub levels: Vec<Level>,
}

impl Matrix {
    pub fn validate(&self) -> Result<(), MatrixValidationError> {
        if self.levels.is_empty() {
            return Err(MatrixValidationError::NoLevels(self.id.0.clone()));
        }

        let mut seen = Vec::with_capacity(self.levels.len());
        for level in &self.levels {
            if level.sequence == 0 {
                return Err(MatrixValidationError::ZeroLevelSequence {
                    matrix: self.id.0.clone(),
                });
            }
            if seen.contains(&level.sequence) {
                return Err(MatrixValidationError::DuplicateLevelSequence {
                    matrix: self.id.0.clone(),
                    sequence: level.sequence,
                });
            }
            seen.push(level.sequence);

            if matches!(level.policy, CompletionPolicy::Multiple | CompletionPolicy::All) {
                let direct_count = level.approver_ids.len() as u64;
                if level.approver_groups.is_empty()
                    && u64::from(level.required_approvals) > direct_count
                {
                    return Err(MatrixValidationError::RequiredExceedsApprovers {
                        matrix: self.id.0.clone(),
                        sequence: level.sequence,
                    });
                }
            }

            if level.approval_percentage < Decimal::ZERO
                || level.approval_percentage > Decimal::from(100u32)
            {
                return Err(MatrixValidationError::InvalidPercentage {
                    matrix: self.id.0.clone(),
                    sequence: level.sequence,
                });
            }
        }

        if let MatrixCriteria::Amount(range) = &self.criteria {
            if let Some(max) = range.bounded_max() {
                if range.min > max {
                    return Err(MatrixValidationError::InvalidAmountRange {
                        matrix: self.id.0.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn level(&self, sequence: u32) -> Option<&Level> {
        self.levels.iter().find(|level| level.sequence == sequence)
    }

    pub fn first_level(&self) -> Option<&Level> {
        self.levels.iter().min_by_key(|level| level.sequence)
    }

    /// Next level strictly after `current` in ascending sequence order.
    pub fn next_level(&self, current: u32) -> Option<&Level> {
        self.levels
            .iter()
            .filter(|level| level.sequence > current)
            .min_by_key(|level| level.sequence)
    }

    pub fn matches(&self, selection: &MatrixSelection) -> bool {
        self.state == MatrixState::Active && self.criteria.matches(selection)
    }
}
