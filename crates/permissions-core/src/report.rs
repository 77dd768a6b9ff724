//! Markdown rendering of a [`TransitionPlan`].

use crate::{
    bytes::{
        address_to_hex,
        word_to_hex,
    },
    chain::DEFAULT_ADMIN_ROLE,
    config::TargetConfig,
    plan::{
        ContractPlan,
        EMPTY,
        TransitionPlan,
    },
    reconcile::{
        Account,
        ContractDiff,
        GetterDiff,
        LegacyDiff,
        Modified,
        RoleDiff,
    },
};

const WARNING: &str = "⚠️";
const DEFAULT_OPERATORS_LABEL: &str = "operator(s)";
const LEGACY_COLUMNS: [&str; 4] = ["Permission", "Permission Manager", "Revoked", "Granted"];
const ROLE_COLUMNS: [&str; 4] = ["Role", "Role Admin", "Revoked", "Granted"];
const GETTER_COLUMNS: [&str; 3] = ["Getter", "Actual Value", "Expected Value"];

/// Renders `plan` as the markdown transition document.
pub fn render_markdown(plan: &TransitionPlan, config: &TargetConfig) -> String {
    let renderer = Renderer { config };
    let mut out = vec![
        "## Permissions Transition\n".to_string(),
        renderer.collect_info(plan),
        how_to_read(),
    ];

    let mut step_number = 1;
    out.push("### Legacy Permissions".to_string());
    for (diff, steps) in plan.reconciliation.legacy.iter().zip(&plan.legacy) {
        out.push(renderer.contract_header(diff));
        out.push(renderer.table(&LEGACY_COLUMNS, diff, |d| renderer.legacy_row(d)));
        out.push(String::new());
        push_steps(&mut out, steps, &mut step_number);
    }

    out.push("### Role-Based Permissions".to_string());
    for (diff, steps) in plan.reconciliation.roles.iter().zip(&plan.roles) {
        out.push(renderer.contract_header(diff));
        out.push(renderer.table(&ROLE_COLUMNS, diff, |d| renderer.role_row(d)));
        out.push(String::new());
        push_steps(&mut out, steps, &mut step_number);
    }

    out.push("### Contracts Ownership".to_string());
    for (diff, steps) in plan.reconciliation.ownership.iter().zip(&plan.ownership) {
        out.push(renderer.contract_header(diff));
        out.push(renderer.table(&GETTER_COLUMNS, diff, |d| renderer.getter_row(d)));
        out.push(String::new());
        push_steps(&mut out, steps, &mut step_number);
    }

    out.push(String::new());
    out.join("\n")
}

fn push_steps(out: &mut Vec<String>, plan: &ContractPlan, step_number: &mut usize) {
    if plan.steps.is_empty() && plan.issues.is_empty() {
        return;
    }
    out.push("##### Transition Steps\n".to_string());
    out.push("```".to_string());
    for step in &plan.steps {
        out.push(format!("{step_number}. {step}"));
        *step_number += 1;
    }
    for issue in &plan.issues {
        out.push(issue.to_string());
    }
    out.push("```\n".to_string());
}

fn how_to_read() -> String {
    [
        "How to read this document:",
        "- If an item is prepended with the \"⚠️\" icon, it indicates that the item will be changed. \
         The required updates are described in the corresponding \"Transition Steps\" sections.",
        "- The special symbol \"∅\" indicates that:",
        "  - a permission or role is not granted to any address",
        "  - revocation of the permission or role is not performed",
        "  - no manager is set for the permission",
        "- The notation \"`Old Manager` → `New Manager`\" means the current manager is being changed to a new one.",
        "  - A special case is \"`∅` → `New Manager`\", which means the permission currently has no manager, \
         and the permission should be created before use.\n",
    ]
    .join("\n")
}

fn table_row<S: AsRef<str>>(cells: &[S]) -> String {
    let cells: Vec<&str> = cells.iter().map(AsRef::as_ref).collect();
    format!("| {} |", cells.join(" | "))
}

fn or_empty(cells: Vec<String>) -> String {
    if cells.is_empty() {
        EMPTY.to_string()
    } else {
        cells.join(" ")
    }
}

fn keccak_link(name: &str) -> String {
    format!(
        "https://emn178.github.io/online-tools/keccak_256.html?input={name}&input_type=utf-8&output_type=hex"
    )
}

fn role_name(name: &str, modified: bool) -> String {
    let name = if name == DEFAULT_ADMIN_ROLE || name.starts_with("0x") {
        format!("`{name}`")
    } else {
        format!("[`{name}`]({})", keccak_link(name))
    };
    if modified {
        format!("{WARNING} {name}")
    } else {
        name
    }
}

struct Renderer<'a> {
    config: &'a TargetConfig,
}

impl Renderer<'_> {
    fn collect_info(&self, plan: &TransitionPlan) -> String {
        let reconciliation = &plan.reconciliation;
        let block = reconciliation.snapshot_block;
        let mut lines = vec![format!(
            "> - Data was collected at block [`{block}`]({})",
            self.config.block_url(block)
        )];
        match &reconciliation.last_processed_tx_hash {
            Some(tx_hash) => {
                let last = reconciliation.last_processed_block;
                lines.push(format!(
                    "> - The last permissions change occurred at block [`{last}`]({}), transaction [`{}`]({})\n",
                    self.config.block_url(last),
                    word_to_hex(tx_hash),
                    self.config.tx_url(tx_hash),
                ));
            }
            None => lines.push("> - No permission changes were found up to this block\n".to_string()),
        }
        lines.join("\n")
    }

    fn contract_header<T: Modified>(&self, diff: &ContractDiff<T>) -> String {
        let address = address_to_hex(&diff.address);
        let marker = if diff.is_modified() {
            format!("{WARNING} ")
        } else {
            String::new()
        };
        format!(
            "#### {marker}{} [{address}]({})",
            diff.label,
            self.config.address_url(&diff.address)
        )
    }

    fn table<T, const N: usize>(
        &self,
        columns: &[&str; N],
        diff: &ContractDiff<T>,
        row: impl Fn(&T) -> String,
    ) -> String {
        let mut rows = vec![table_row(columns), table_row(&["---"; N])];
        rows.extend(diff.entries.iter().map(row));
        rows.join("\n")
    }

    fn account(&self, account: &Account) -> String {
        match account {
            Account::Known { label, address } => {
                format!("[`{label}`]({})", self.config.address_url(address))
            }
            Account::Unknown { address } => {
                format!("[`{account}`]({})", self.config.address_url(address))
            }
        }
    }

    fn operators_label(&self) -> &str {
        self.config
            .delegated_signing_keys
            .as_ref()
            .map_or(DEFAULT_OPERATORS_LABEL, |keys| keys.operators_label.as_str())
    }

    fn changed_account(&self, account: &Account) -> String {
        format!("{WARNING} {}", self.account(account))
    }

    fn manager(&self, manager: Option<&Account>) -> String {
        manager.map_or_else(|| EMPTY.to_string(), |manager| self.account(manager))
    }

    fn legacy_row(&self, diff: &LegacyDiff) -> String {
        let manager = if diff.manager_changed() {
            format!(
                "{WARNING} {} → {}",
                self.manager(diff.current_manager.as_ref()),
                self.manager(diff.desired_manager.as_ref())
            )
        } else {
            self.manager(diff.current_manager.as_ref())
        };

        let mut granted: Vec<String> = diff
            .grantees
            .to_grant
            .iter()
            .map(|a| self.changed_account(a))
            .collect();
        granted.extend(diff.grantees.already_granted.iter().map(|a| self.account(a)));
        if diff.sub_grants > 0 {
            granted.push(format!("`+{} {}`", diff.sub_grants, self.operators_label()));
        }

        table_row(&[
            role_name(&diff.name, diff.is_modified),
            manager,
            or_empty(
                diff.grantees
                    .to_revoke
                    .iter()
                    .map(|a| self.changed_account(a))
                    .collect(),
            ),
            or_empty(granted),
        ])
    }

    fn role_row(&self, diff: &RoleDiff) -> String {
        let admin = diff
            .admin_role_name
            .clone()
            .unwrap_or_else(|| word_to_hex(&diff.admin_role));

        let mut granted: Vec<String> = diff
            .grantees
            .to_grant
            .iter()
            .map(|a| self.changed_account(a))
            .collect();
        granted.extend(diff.grantees.already_granted.iter().map(|a| self.account(a)));

        table_row(&[
            role_name(&diff.name, diff.is_modified),
            role_name(&admin, false),
            or_empty(
                diff.grantees
                    .to_revoke
                    .iter()
                    .map(|a| self.changed_account(a))
                    .collect(),
            ),
            or_empty(granted),
        ])
    }

    fn getter_row(&self, diff: &GetterDiff) -> String {
        let getter = if diff.is_modified {
            format!("{WARNING} `{}`", diff.getter)
        } else {
            format!("`{}`", diff.getter)
        };
        let expected = if diff.is_modified {
            self.changed_account(&diff.expected)
        } else {
            self.account(&diff.expected)
        };
        table_row(&[getter, self.account(&diff.actual), expected])
    }
}
