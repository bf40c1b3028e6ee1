use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::approver::{Approver, ApproverDirectory, ApproverId};
use crate::domain::matrix::Level;

/// A staffing slot for one approver at a level. `delegate` is filled when the
/// assigned approver was unavailable and auto-delegation found a substitute;
/// the slot still belongs to the original approver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaffedSlot {
    pub approver: ApproverId,
    pub delegate: Option<ApproverId>,
}

/// Resolve the approver set for a level against the directory.
///
/// Approvers whose signing cap is below the request amount are skipped.
/// Unavailable approvers with `auto_delegate` are kept but staffed through
/// their configured delegate or first available backup; delegation is a
/// single hop, a delegate is never re-delegated.
pub fn staff_level(
    directory: &ApproverDirectory,
    level: &Level,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Vec<StaffedSlot> {
    directory
        .resolve_set(&level.approver_ids, &level.approver_groups)
        .into_iter()
        .filter(|approver| approver.can_approve_amount(amount))
        .map(|approver| StaffedSlot {
            approver: approver.id.clone(),
            delegate: substitute_for(directory, approver, now),
        })
        .collect()
}

fn substitute_for(
    directory: &ApproverDirectory,
    approver: &Approver,
    now: DateTime<Utc>,
) -> Option<ApproverId> {
    if approver.is_available_at(now) || !approver.auto_delegate {
        return None;
    }

    if let Some(delegate_id) = &approver.delegate_to {
        if directory.get(delegate_id).is_some_and(|delegate| delegate.is_available_at(now)) {
            return Some(delegate_id.clone());
        }
    }

    approver
        .backups
        .iter()
        .find(|backup_id| {
            directory.get(backup_id).is_some_and(|backup| backup.is_available_at(now))
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::staff_level;
    use crate::domain::approver::{
        Approver, ApproverDirectory, ApproverId, ApproverStatus,
    };
    use crate::domain::matrix::{CompletionPolicy, Level};

    fn approver(id: &str, status: ApproverStatus) -> Approver {
        Approver {
            id: ApproverId(id.to_string()),
            name: id.to_string(),
            groups: Vec::new(),
            max_approval_amount: None,
            window: None,
            status,
            auto_delegate: false,
            delegate_to: None,
            backups: Vec::new(),
        }
    }

    fn level_with(ids: &[&str]) -> Level {
        Level {
            sequence: 1,
            name: "L1".to_string(),
            approver_ids: ids.iter().map(|id| ApproverId(id.to_string())).collect(),
            approver_groups: Vec::new(),
            policy: CompletionPolicy::All,
            required_approvals: 1,
            approval_percentage: Decimal::from(100u32),
            timeout_hours: 0,
            auto_approve_on_timeout: false,
            escalation_user_ids: Vec::new(),
        }
    }

    fn noon() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 3, 12, 0, 0).unwrap()
    }

    #[test]
    fn available_approvers_are_staffed_without_delegation() {
        let directory = ApproverDirectory::new(vec![
            approver("u-a", ApproverStatus::Available),
            approver("u-b", ApproverStatus::Available),
        ]);

        let slots = staff_level(&directory, &level_with(&["u-a", "u-b"]), Decimal::ZERO, noon());

        assert_eq!(slots.len(), 2);
        assert!(slots.iter().all(|slot| slot.delegate.is_none()));
    }

    #[test]
    fn amount_cap_excludes_underpowered_approvers() {
        let mut capped = approver("u-capped", ApproverStatus::Available);
        capped.max_approval_amount = Some(Decimal::new(1_000, 0));
        let directory =
            ApproverDirectory::new(vec![capped, approver("u-senior", ApproverStatus::Available)]);

        let slots = staff_level(
            &directory,
            &level_with(&["u-capped", "u-senior"]),
            Decimal::new(5_000, 0),
            noon(),
        );

        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].approver.0, "u-senior");
    }

    #[test]
    fn unavailable_approver_with_auto_delegate_gets_configured_delegate() {
        let mut offline = approver("u-offline", ApproverStatus::Offline);
        offline.auto_delegate = true;
        offline.delegate_to = Some(ApproverId("u-delegate".to_string()));
        let directory =
            ApproverDirectory::new(vec![offline, approver("u-delegate", ApproverStatus::Available)]);

        let slots = staff_level(&directory, &level_with(&["u-offline"]), Decimal::ZERO, noon());

        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].approver.0, "u-offline");
        assert_eq!(slots[0].delegate.as_ref().map(|id| id.0.as_str()), Some("u-delegate"));
    }

    #[test]
    fn unavailable_delegate_falls_back_to_first_available_backup() {
        let mut offline = approver("u-offline", ApproverStatus::Offline);
        offline.auto_delegate = true;
        offline.delegate_to = Some(ApproverId("u-also-offline".to_string()));
        offline.backups =
            vec![ApproverId("u-busy-backup".to_string()), ApproverId("u-backup".to_string())];
        let directory = ApproverDirectory::new(vec![
            offline,
            approver("u-also-offline", ApproverStatus::Offline),
            approver("u-busy-backup", ApproverStatus::Offline),
            approver("u-backup", ApproverStatus::Available),
        ]);

        let slots = staff_level(&directory, &level_with(&["u-offline"]), Decimal::ZERO, noon());

        assert_eq!(slots[0].delegate.as_ref().map(|id| id.0.as_str()), Some("u-backup"));
    }

    #[test]
    fn unavailable_approver_without_auto_delegate_keeps_the_slot() {
        let directory = ApproverDirectory::new(vec![approver("u-away", ApproverStatus::Offline)]);

        let slots = staff_level(&directory, &level_with(&["u-away"]), Decimal::ZERO, noon());

        assert_eq!(slots.len(), 1);
        assert!(slots[0].delegate.is_none());
    }
}
