use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApproverId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverStatus {
    Available,
    Busy,
    Away,
    Offline,
    Delegated,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailableDays {
    Weekdays,
    Weekends,
    AllDays,
    /// Lowercase three-letter day keys, e.g. `["mon", "wed", "fri"]`.
    Custom(Vec<String>),
}

/// Recurring window during which an approver accepts work. A record with no
/// window is treated as always on duty (status permitting).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub days: AvailableDays,
}

impl AvailabilityWindow {
    fn covers(&self, at: DateTime<Utc>) -> bool {
        let time = at.time();
        let minute_of_day = |t: NaiveTime| t.hour() * 60 + t.minute();
        if minute_of_day(time) < minute_of_day(self.start)
            || minute_of_day(time) > minute_of_day(self.end)
        {
            return false;
        }

        let weekday = at.weekday().num_days_from_monday();
        match &self.days {
            AvailableDays::Weekdays => weekday < 5,
            AvailableDays::Weekends => weekday >= 5,
            AvailableDays::AllDays => true,
            AvailableDays::Custom(days) => {
                let key = day_key(weekday);
                days.iter().any(|day| day.trim().eq_ignore_ascii_case(key))
            }
        }
    }
}

fn day_key(num_days_from_monday: u32) -> &'static str {
    match num_days_from_monday {
        0 => "mon",
        1 => "tue",
        2 => "wed",
        3 => "thu",
        4 => "fri",
        5 => "sat",
        _ => "sun",
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Approver {
    pub id: ApproverId,
    pub name: String,
    pub groups: Vec<String>,
    /// None = unlimited signing authority.
    pub max_approval_amount: Option<Decimal>,
    pub window: Option<AvailabilityWindow>,
    pub status: ApproverStatus,
    pub auto_delegate: bool,
    pub delegate_to: Option<ApproverId>,
    pub backups: Vec<ApproverId>,
}

impl Approver {
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        if matches!(self.status, ApproverStatus::Offline | ApproverStatus::Delegated) {
            return false;
        }
        match &self.window {
            Some(window) => window.covers(now),
            None => true,
        }
    }

    pub fn can_approve_amount(&self, amount: Decimal) -> bool {
        match self.max_approval_amount {
            Some(cap) => amount <= cap,
            None => true,
        }
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|candidate| candidate.trim().eq_ignore_ascii_case(group.trim()))
    }
}

/// Lookup table over the configured approver population.
#[derive(Clone, Debug, Default)]
pub struct ApproverDirectory {
    by_id: HashMap<String, Approver>,
}

impl ApproverDirectory {
    pub fn new(approvers: Vec<Approver>) -> Self {
        let by_id = approvers.into_iter().map(|approver| (approver.id.0.clone(), approver)).collect();
        Self { by_id }
    }

    pub fn get(&self, id: &ApproverId) -> Option<&Approver> {
        self.by_id.get(&id.0)
    }

    pub fn members_of_group(&self, group: &str) -> Vec<&Approver> {
        let mut members: Vec<&Approver> =
            self.by_id.values().filter(|approver| approver.in_group(group)).collect();
        members.sort_by(|left, right| left.id.0.cmp(&right.id.0));
        members
    }

    /// Direct approvers plus group members, deduplicated, in stable id order.
    pub fn resolve_set<'a>(
        &'a self,
        direct: &[ApproverId],
        groups: &[String],
    ) -> Vec<&'a Approver> {
        let mut selected: Vec<&Approver> = Vec::new();
        for id in direct {
            if let Some(approver) = self.get(id) {
                if !selected.iter().any(|existing| existing.id == approver.id) {
                    selected.push(approver);
                }
            }
        }
        for group in groups {
            for approver in self.members_of_group(group) {
                if !selected.iter().any(|existing| existing.id == approver.id) {
                    selected.push(approver);
                }
            }
        }
        selected.sort_by(|left, right| left.id.0.cmp(&right.id.0));
        selected
    }
}
