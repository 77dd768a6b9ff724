//! Ordered transition steps derived from a [`Reconciliation`].

use crate::reconcile::{
    Account,
    ContractDiff,
    ControllerKind,
    GetterDiff,
    LegacyDiff,
    Reconciliation,
    RoleDiff,
};
use serde::Serialize;
use std::fmt;

/// Placeholder rendered for "no manager".
pub const EMPTY: &str = "∅";

fn manager_label(manager: Option<&Account>) -> String {
    manager.map_or_else(|| EMPTY.to_string(), Account::to_string)
}

/// One imperative operation of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum TransitionStep {
    /// Creating a legacy permission and granting it is a single operation.
    CreatePermission {
        permission: String,
        contract: String,
        manager: String,
        grantee: String,
    },
    GrantPermission {
        permission: String,
        grantee: String,
        contract: String,
    },
    RevokePermission {
        permission: String,
        grantee: String,
        contract: String,
    },
    SetPermissionManager {
        permission: String,
        manager: String,
        contract: String,
    },
    GrantRole {
        role: String,
        grantee: String,
        contract: String,
    },
    RevokeRole {
        role: String,
        grantee: String,
        contract: String,
    },
    SetController {
        kind: ControllerKind,
        account: String,
        contract: String,
    },
}

impl fmt::Display for TransitionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreatePermission {
                permission,
                contract,
                manager,
                grantee,
            } => {
                write!(
                    f,
                    "Create {permission} permission on {contract} with manager {manager} and grant it to {grantee}"
                )
            }
            Self::GrantPermission {
                permission,
                grantee,
                contract,
            } => write!(f, "Grant {permission} to {grantee} on {contract}"),
            Self::RevokePermission {
                permission,
                grantee,
                contract,
            } => write!(f, "Revoke {permission} from {grantee} on {contract}"),
            Self::SetPermissionManager {
                permission,
                manager,
                contract,
            } => write!(f, "Set {permission} manager to {manager} on {contract}"),
            Self::GrantRole {
                role,
                grantee,
                contract,
            } => write!(f, "Grant {role} to {grantee} on {contract}"),
            Self::RevokeRole {
                role,
                grantee,
                contract,
            } => write!(f, "Revoke {role} from {grantee} on {contract}"),
            Self::SetController {
                kind,
                account,
                contract,
            } => {
                let kind = match kind {
                    ControllerKind::Owner => "owner",
                    ControllerKind::Admin => "admin",
                };
                write!(f, "Set {kind} to {account} on {contract}")
            }
        }
    }
}

/// A configuration the plan cannot be built for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "camelCase")]
pub enum PlanIssue {
    /// A legacy permission can only be created together with its first
    /// grant, so a manager-only permission is unreachable.
    ManagerWithoutGrantee {
        permission: String,
        contract: String,
        manager: String,
    },
}

impl fmt::Display for PlanIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ManagerWithoutGrantee {
                permission,
                contract,
                manager,
            } => {
                write!(
                    f,
                    "[ERROR]: {permission} on {contract} cannot get manager {manager}: to create a permission it should be granted to someone"
                )
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractPlan {
    pub contract: String,
    pub steps: Vec<TransitionStep>,
    pub issues: Vec<PlanIssue>,
}

/// Steps of a single legacy permission.
///
/// The first grant of a permission without a manager creates it; a manager
/// change is only emitted for a permission that already exists, since
/// creation already sets the desired manager.
pub fn legacy_steps(contract: &str, diff: &LegacyDiff, plan: &mut ContractPlan) {
    let permission = &diff.name;
    let mut created = diff.current_manager.is_some();

    for grantee in &diff.grantees.to_grant {
        let step = if created {
            TransitionStep::GrantPermission {
                permission: permission.clone(),
                grantee: grantee.to_string(),
                contract: contract.to_string(),
            }
        } else {
            created = true;
            TransitionStep::CreatePermission {
                permission: permission.clone(),
                contract: contract.to_string(),
                manager: manager_label(diff.desired_manager.as_ref()),
                grantee: grantee.to_string(),
            }
        };
        plan.steps.push(step);
    }

    for grantee in &diff.grantees.to_revoke {
        plan.steps.push(TransitionStep::RevokePermission {
            permission: permission.clone(),
            grantee: grantee.to_string(),
            contract: contract.to_string(),
        });
    }

    if diff.current_manager.is_some() && diff.manager_changed() {
        plan.steps.push(TransitionStep::SetPermissionManager {
            permission: permission.clone(),
            manager: manager_label(diff.desired_manager.as_ref()),
            contract: contract.to_string(),
        });
    }

    if let Some(manager) = diff.desired_manager.as_ref().filter(|_| !created) {
        plan.issues.push(PlanIssue::ManagerWithoutGrantee {
            permission: permission.clone(),
            contract: contract.to_string(),
            manager: manager.to_string(),
        });
    }
}

pub fn role_steps(contract: &str, diff: &RoleDiff, plan: &mut ContractPlan) {
    for grantee in &diff.grantees.to_grant {
        plan.steps.push(TransitionStep::GrantRole {
            role: diff.name.clone(),
            grantee: grantee.to_string(),
            contract: contract.to_string(),
        });
    }
    for grantee in &diff.grantees.to_revoke {
        plan.steps.push(TransitionStep::RevokeRole {
            role: diff.name.clone(),
            grantee: grantee.to_string(),
            contract: contract.to_string(),
        });
    }
}

pub fn getter_steps(contract: &str, diff: &GetterDiff, plan: &mut ContractPlan) {
    if diff.is_modified {
        plan.steps.push(TransitionStep::SetController {
            kind: diff.controller_kind(),
            account: diff.expected.to_string(),
            contract: contract.to_string(),
        });
    }
}

fn contract_plans<T>(
    contracts: &[ContractDiff<T>],
    steps: impl Fn(&str, &T, &mut ContractPlan),
) -> Vec<ContractPlan> {
    contracts
        .iter()
        .map(|contract| {
            let mut plan = ContractPlan {
                contract: contract.label.clone(),
                ..Default::default()
            };
            for entry in &contract.entries {
                steps(&contract.label, entry, &mut plan);
            }
            plan
        })
        .collect()
}

/// Reconciliation together with the steps that realize it.
///
/// Contract plans are index-aligned with the reconciliation's contract
/// lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionPlan {
    pub reconciliation: Reconciliation,
    pub legacy: Vec<ContractPlan>,
    pub roles: Vec<ContractPlan>,
    pub ownership: Vec<ContractPlan>,
}

impl TransitionPlan {
    pub fn new(reconciliation: Reconciliation) -> Self {
        let legacy = contract_plans(&reconciliation.legacy, legacy_steps);
        let roles = contract_plans(&reconciliation.roles, role_steps);
        let ownership = contract_plans(&reconciliation.ownership, getter_steps);
        Self {
            reconciliation,
            legacy,
            roles,
            ownership,
        }
    }

    /// Contract plans in report order: legacy, role-based, ownership.
    pub fn contracts(&self) -> impl Iterator<Item = &ContractPlan> {
        self.legacy.iter().chain(&self.roles).chain(&self.ownership)
    }

    /// Every step with its global 1-based number.
    pub fn numbered_steps(&self) -> impl Iterator<Item = (usize, &TransitionStep)> {
        self.contracts()
            .flat_map(|plan| plan.steps.iter())
            .enumerate()
            .map(|(index, step)| (index + 1, step))
    }

    pub fn issues(&self) -> impl Iterator<Item = &PlanIssue> {
        self.contracts().flat_map(|plan| plan.issues.iter())
    }

    pub fn has_issues(&self) -> bool {
        self.issues().next().is_some()
    }

    pub fn step_count(&self) -> usize {
        self.contracts().map(|plan| plan.steps.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::Partition;
    use alloy_primitives::{
        Address,
        B256,
    };

    fn account(label: &str, byte: u8) -> Account {
        Account::Known {
            label: label.to_string(),
            address: Address::repeat_byte(byte),
        }
    }

    fn legacy(
        current_manager: Option<Account>,
        desired_manager: Option<Account>,
        to_grant: Vec<Account>,
        to_revoke: Vec<Account>,
    ) -> LegacyDiff {
        let mut diff = LegacyDiff {
            name: "P".into(),
            permission: B256::ZERO,
            is_modified: false,
            current_manager,
            desired_manager,
            grantees: Partition {
                to_grant,
                to_revoke,
                already_granted: vec![],
            },
            sub_grants: 0,
        };
        diff.is_modified = diff.grantees.has_changes() || diff.manager_changed();
        diff
    }

    fn rendered(plan: &ContractPlan) -> Vec<String> {
        plan.steps.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn first_grant_creates_missing_permission() {
        let diff = legacy(
            None,
            Some(account("Dave", 0xd0)),
            vec![account("Eve", 0xe0), account("Carol", 0xc0)],
            vec![],
        );
        let mut plan = ContractPlan::default();
        legacy_steps("Vault", &diff, &mut plan);
        assert_eq!(
            rendered(&plan),
            vec![
                "Create P permission on Vault with manager Dave and grant it to Eve",
                "Grant P to Carol on Vault",
            ]
        );
        assert!(plan.issues.is_empty());
    }

    #[test]
    fn manager_without_grantee_is_an_issue() {
        let diff = legacy(None, Some(account("Dave", 0xd0)), vec![], vec![]);
        let mut plan = ContractPlan::default();
        legacy_steps("Vault", &diff, &mut plan);
        assert!(plan.steps.is_empty());
        assert_eq!(
            plan.issues,
            vec![PlanIssue::ManagerWithoutGrantee {
                permission: "P".into(),
                contract: "Vault".into(),
                manager: "Dave".into(),
            }]
        );
        assert!(plan.issues[0].to_string().starts_with("[ERROR]: "));
    }

    #[test]
    fn removing_manager_renders_empty_marker() {
        let diff = legacy(Some(account("Alice", 0xa1)), None, vec![], vec![]);
        let mut plan = ContractPlan::default();
        legacy_steps("Vault", &diff, &mut plan);
        assert_eq!(rendered(&plan), vec!["Set P manager to ∅ on Vault"]);
    }

    #[test]
    fn ownership_step_names_controller_kind() {
        let diff = GetterDiff {
            getter: "proxy__getAdmin".into(),
            is_modified: true,
            actual: account("Alice", 0xa1),
            expected: account("Agent", 0xa9),
        };
        let mut plan = ContractPlan::default();
        getter_steps("Locator", &diff, &mut plan);
        assert_eq!(rendered(&plan), vec!["Set admin to Agent on Locator"]);
    }

    #[test]
    fn steps_are_numbered_across_sections() {
        let role = RoleDiff {
            name: "R".into(),
            role: B256::ZERO,
            is_modified: true,
            admin_role: B256::ZERO,
            admin_role_name: None,
            grantees: Partition {
                to_grant: vec![account("Y", 0x02)],
                to_revoke: vec![],
                already_granted: vec![account("X", 0x01)],
            },
        };
        let reconciliation = Reconciliation {
            snapshot_block: 1,
            last_processed_block: 1,
            last_processed_tx_hash: None,
            legacy: vec![ContractDiff {
                label: "Vault".into(),
                address: Address::repeat_byte(0x10),
                entries: vec![legacy(
                    Some(account("Alice", 0xa1)),
                    Some(account("Alice", 0xa1)),
                    vec![account("Eve", 0xe0)],
                    vec![],
                )],
            }],
            roles: vec![ContractDiff {
                label: "Module".into(),
                address: Address::repeat_byte(0x20),
                entries: vec![role],
            }],
            ownership: vec![],
        };

        let plan = TransitionPlan::new(reconciliation);
        let numbered: Vec<_> = plan
            .numbered_steps()
            .map(|(n, step)| format!("{n}. {step}"))
            .collect();
        assert_eq!(
            numbered,
            vec!["1. Grant P to Eve on Vault", "2. Grant R to Y on Module"]
        );
        assert_eq!(plan.step_count(), 2);
        assert!(!plan.has_issues());
    }
}
