//! Diff between a replayed [`Snapshot`] and the [`TargetConfig`].
//!
//! The per-entry diffs are pure functions of the current state, the
//! desired state and the label book. [`reconcile`] drives them for the
//! whole configuration and performs the few contract reads the diff
//! depends on: permission and role identifiers, ownership getters and the
//! parameter check of delegated signing-key sub-grants.

use crate::{
    bytes::{
        canonical_address,
        shorten_address,
    },
    chain::{
        ChainReadError,
        ChainReader,
    },
    config::{
        DelegatedSigningKeys,
        GetterTarget,
        LabelBook,
        LabeledAddress,
        LegacyPermissionTarget,
        RoleTarget,
        TargetConfig,
    },
    snapshot::{
        LegacyPermissionState,
        RoleState,
        Snapshot,
    },
};
use alloy_primitives::{
    Address,
    B256,
};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fmt,
};
use thiserror::Error;
use tracing::{
    debug,
    info,
};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{contract}: {entry} is held by unlabeled address {address}")]
    UnresolvedAddress {
        contract: String,
        entry: String,
        address: Address,
    },
    #[error(
        "{contract}: {permission} sub-grant of {entity} carries {length} params, at most one is allowed"
    )]
    InvalidSubGrantParams {
        contract: String,
        permission: String,
        entity: Address,
        length: u64,
    },
    #[error(transparent)]
    ChainRead(#[from] ChainReadError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Render unlabeled current holders as `Unknown(..)` instead of failing.
    pub allow_unknown_holders: bool,
}

/// An address as shown in a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Account {
    Known {
        label: String,
        #[serde(with = "canonical_address")]
        address: Address,
    },
    Unknown {
        #[serde(with = "canonical_address")]
        address: Address,
    },
}

impl Account {
    pub fn address(&self) -> Address {
        match self {
            Self::Known { address, .. } | Self::Unknown { address } => *address,
        }
    }
}

impl From<&LabeledAddress> for Account {
    fn from(value: &LabeledAddress) -> Self {
        Self::Known {
            label: value.label.clone(),
            address: value.address,
        }
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known { label, .. } => f.write_str(label),
            Self::Unknown { address } => write!(f, "Unknown({})", shorten_address(address)),
        }
    }
}

/// Where an address being resolved was found, for error reporting.
struct HolderContext<'a> {
    contract: &'a str,
    entry: &'a str,
}

fn resolve_holder(
    labels: &LabelBook,
    address: Address,
    context: &HolderContext<'_>,
    options: ReconcileOptions,
) -> Result<Account, ReconcileError> {
    match labels.label(&address) {
        Some(label) => {
            Ok(Account::Known {
                label: label.to_string(),
                address,
            })
        }
        None if options.allow_unknown_holders => Ok(Account::Unknown { address }),
        None => {
            Err(ReconcileError::UnresolvedAddress {
                contract: context.contract.to_string(),
                entry: context.entry.to_string(),
                address,
            })
        }
    }
}

/// Desired-vs-current grantee partitions, by address equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    /// Desired and not currently granted, in desired order.
    pub to_grant: Vec<Account>,
    /// Currently granted and not desired, in current order.
    pub to_revoke: Vec<Account>,
    /// Desired and currently granted, in current order.
    pub already_granted: Vec<Account>,
}

impl Partition {
    pub fn compute(current: &[Account], desired: &[Account]) -> Self {
        let is_desired = |account: &Account| desired.iter().any(|d| d.address() == account.address());
        let is_current = |account: &Account| current.iter().any(|c| c.address() == account.address());

        let (already_granted, to_revoke): (Vec<Account>, Vec<Account>) =
            current.iter().cloned().partition(is_desired);
        let to_grant = desired.iter().filter(|d| !is_current(*d)).cloned().collect();
        Self {
            to_grant,
            to_revoke,
            already_granted,
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.to_grant.is_empty() || !self.to_revoke.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyDiff {
    pub name: String,
    pub permission: B256,
    pub is_modified: bool,
    /// `None` when the permission does not exist yet.
    pub current_manager: Option<Account>,
    pub desired_manager: Option<Account>,
    #[serde(flatten)]
    pub grantees: Partition,
    /// Parameterized sub-grants left out of the comparison.
    pub sub_grants: usize,
}

impl LegacyDiff {
    pub fn manager_changed(&self) -> bool {
        self.current_manager.as_ref().map(Account::address)
            != self.desired_manager.as_ref().map(Account::address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDiff {
    pub name: String,
    pub role: B256,
    pub is_modified: bool,
    pub admin_role: B256,
    /// Name of `admin_role` when it is one of the roles resolved in this run.
    pub admin_role_name: Option<String>,
    #[serde(flatten)]
    pub grantees: Partition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetterDiff {
    pub getter: String,
    pub is_modified: bool,
    pub actual: Account,
    pub expected: Account,
}

/// Kind of controller an ownership getter exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ControllerKind {
    Owner,
    Admin,
}

impl GetterDiff {
    pub fn controller_kind(&self) -> ControllerKind {
        if self.getter.to_lowercase().contains("owner") {
            ControllerKind::Owner
        } else {
            ControllerKind::Admin
        }
    }
}

/// Something that knows whether it needs a transition.
pub trait Modified {
    fn is_modified(&self) -> bool;
}

impl Modified for LegacyDiff {
    fn is_modified(&self) -> bool {
        self.is_modified
    }
}

impl Modified for RoleDiff {
    fn is_modified(&self) -> bool {
        self.is_modified
    }
}

impl Modified for GetterDiff {
    fn is_modified(&self) -> bool {
        self.is_modified
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDiff<T> {
    pub label: String,
    #[serde(with = "canonical_address")]
    pub address: Address,
    pub entries: Vec<T>,
}

impl<T: Modified> ContractDiff<T> {
    pub fn is_modified(&self) -> bool {
        self.entries.iter().any(Modified::is_modified)
    }
}

impl<T: Modified> Modified for ContractDiff<T> {
    fn is_modified(&self) -> bool {
        ContractDiff::is_modified(self)
    }
}

/// Stable modified-first ordering; ties keep configuration order.
pub fn sort_modified_first<T: Modified>(items: &mut [T]) {
    items.sort_by_key(|item| !item.is_modified());
}

/// Legacy contracts listed after the apps within the same modified group.
const TRAILING_LEGACY_CONTRACTS: [&str; 2] = ["ACL", "Agent"];

/// [`sort_modified_first`] for legacy contracts, with the ACL and the Agent
/// moved behind the apps they govern.
pub fn sort_legacy_contracts(contracts: &mut [ContractDiff<LegacyDiff>]) {
    contracts.sort_by_key(|contract| {
        (
            !contract.is_modified(),
            TRAILING_LEGACY_CONTRACTS.contains(&contract.label.as_str()),
        )
    });
}

/// Full diff of one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub snapshot_block: u64,
    pub last_processed_block: u64,
    pub last_processed_tx_hash: Option<B256>,
    pub legacy: Vec<ContractDiff<LegacyDiff>>,
    pub roles: Vec<ContractDiff<RoleDiff>>,
    pub ownership: Vec<ContractDiff<GetterDiff>>,
}

impl Reconciliation {
    pub fn is_modified(&self) -> bool {
        self.legacy.iter().any(ContractDiff::is_modified)
            || self.roles.iter().any(ContractDiff::is_modified)
            || self.ownership.iter().any(ContractDiff::is_modified)
    }
}

/// Whether `(contract, permission)` is the delegated signing-keys pair whose
/// parameterized grants are one-per-operator sub-grants.
fn is_sub_grant_pair(
    delegated: Option<&DelegatedSigningKeys>,
    contract: &Address,
    permission: &str,
) -> bool {
    delegated.is_some_and(|delegated| delegated.matches(contract, permission))
}

/// Diffs one legacy permission.
///
/// With `carve_out_sub_grants` set, grantees carrying a params hash are
/// excluded from the comparison and only counted.
pub fn diff_legacy_permission(
    contract: &LabeledAddress,
    target: &LegacyPermissionTarget,
    permission: B256,
    current: &LegacyPermissionState,
    carve_out_sub_grants: bool,
    labels: &LabelBook,
    options: ReconcileOptions,
) -> Result<LegacyDiff, ReconcileError> {
    let context = HolderContext {
        contract: &contract.label,
        entry: &target.name,
    };

    let mut sub_grants = 0;
    let mut current_holders = Vec::with_capacity(current.granted_to.len());
    for grant in &current.granted_to {
        if carve_out_sub_grants && grant.params_hash.is_some() {
            sub_grants += 1;
            continue;
        }
        current_holders.push(resolve_holder(labels, grant.address, &context, options)?);
    }
    let desired: Vec<Account> = target.granted_to.iter().map(Account::from).collect();

    let current_manager = current
        .manager
        .map(|manager| resolve_holder(labels, manager, &context, options))
        .transpose()?;
    let desired_manager = target.manager.as_ref().map(Account::from);

    let grantees = Partition::compute(&current_holders, &desired);
    let mut diff = LegacyDiff {
        name: target.name.clone(),
        permission,
        is_modified: false,
        current_manager,
        desired_manager,
        grantees,
        sub_grants,
    };
    diff.is_modified = diff.grantees.has_changes() || diff.manager_changed();
    Ok(diff)
}

/// Diffs one role. The admin name is filled in once every role id of the
/// run is known.
pub fn diff_role(
    contract: &LabeledAddress,
    target: &RoleTarget,
    role: B256,
    current: &RoleState,
    labels: &LabelBook,
    options: ReconcileOptions,
) -> Result<RoleDiff, ReconcileError> {
    let context = HolderContext {
        contract: &contract.label,
        entry: &target.name,
    };
    let current_holders = current
        .granted_to
        .iter()
        .map(|address| resolve_holder(labels, *address, &context, options))
        .collect::<Result<Vec<_>, _>>()?;
    let desired: Vec<Account> = target.granted_to.iter().map(Account::from).collect();

    let grantees = Partition::compute(&current_holders, &desired);
    Ok(RoleDiff {
        name: target.name.clone(),
        role,
        is_modified: grantees.has_changes(),
        admin_role: current.role_admin,
        admin_role_name: None,
        grantees,
    })
}

pub fn diff_getter(
    contract: &LabeledAddress,
    target: &GetterTarget,
    actual: Address,
    labels: &LabelBook,
    options: ReconcileOptions,
) -> Result<GetterDiff, ReconcileError> {
    let context = HolderContext {
        contract: &contract.label,
        entry: &target.getter,
    };
    let actual = resolve_holder(labels, actual, &context, options)?;
    Ok(GetterDiff {
        getter: target.getter.clone(),
        is_modified: actual.address() != target.expected.address,
        actual,
        expected: Account::from(&target.expected),
    })
}

/// Role and permission ids resolved through the chain, once per name.
struct RoleIds<'a, R: ?Sized> {
    reader: &'a R,
    block: u64,
    resolved: BTreeMap<String, B256>,
}

impl<'a, R: ChainReader + ?Sized> RoleIds<'a, R> {
    fn new(reader: &'a R, block: u64) -> Self {
        Self {
            reader,
            block,
            resolved: BTreeMap::new(),
        }
    }

    async fn get(&mut self, contract: Address, name: &str) -> Result<B256, ChainReadError> {
        if let Some(id) = self.resolved.get(name) {
            return Ok(*id);
        }
        let id = self.reader.role_id(contract, name, self.block).await?;
        debug!(name, id = %id, "resolved role id");
        self.resolved.insert(name.to_string(), id);
        Ok(id)
    }

    fn name_of(&self, id: &B256) -> Option<&str> {
        self.resolved
            .iter()
            .find(|(_, resolved)| *resolved == id)
            .map(|(name, _)| name.as_str())
    }
}

/// Checks every parameterized grantee of the delegated signing-keys
/// permission carries at most one ACL parameter.
async fn verify_sub_grants<R: ChainReader + ?Sized>(
    reader: &R,
    config: &TargetConfig,
    contract: &LabeledAddress,
    permission_name: &str,
    permission: B256,
    current: &LegacyPermissionState,
    block: u64,
) -> Result<(), ReconcileError> {
    for grant in current.granted_to.iter().filter(|g| g.params_hash.is_some()) {
        let length = reader
            .permission_params_length(config.acl.address, grant.address, contract.address, permission, block)
            .await?;
        if length > 1 {
            return Err(ReconcileError::InvalidSubGrantParams {
                contract: contract.label.clone(),
                permission: permission_name.to_string(),
                entity: grant.address,
                length,
            });
        }
    }
    Ok(())
}

/// Diffs the whole configuration against `snapshot`, reading ids and
/// getters at the snapshot block.
pub async fn reconcile<R: ChainReader + ?Sized>(
    config: &TargetConfig,
    snapshot: &Snapshot,
    reader: &R,
    options: ReconcileOptions,
) -> Result<Reconciliation, ReconcileError> {
    let block = snapshot.snapshot_block;
    let labels = &config.labels;
    let mut role_ids = RoleIds::new(reader, block);

    let mut legacy = Vec::with_capacity(config.legacy.len());
    for target in &config.legacy {
        let contract = &target.contract;
        let mut entries = Vec::with_capacity(target.permissions.len());
        for permission_target in &target.permissions {
            let permission = role_ids.get(contract.address, &permission_target.name).await?;
            let current = snapshot
                .legacy_permission(&contract.address, &permission)
                .cloned()
                .unwrap_or_default();

            let carve_out = is_sub_grant_pair(
                config.delegated_signing_keys.as_ref(),
                &contract.address,
                &permission_target.name,
            );
            if carve_out {
                verify_sub_grants(
                    reader,
                    config,
                    contract,
                    &permission_target.name,
                    permission,
                    &current,
                    block,
                )
                .await?;
            }

            entries.push(diff_legacy_permission(
                contract,
                permission_target,
                permission,
                &current,
                carve_out,
                labels,
                options,
            )?);
        }
        sort_modified_first(&mut entries);
        legacy.push(ContractDiff {
            label: contract.label.clone(),
            address: contract.address,
            entries,
        });
    }

    let mut roles = Vec::with_capacity(config.roles.len());
    for target in &config.roles {
        let contract = &target.contract;
        let mut entries = Vec::with_capacity(target.roles.len());
        for role_target in &target.roles {
            let role = role_ids.get(contract.address, &role_target.name).await?;
            let current = snapshot.role(&contract.address, &role).cloned().unwrap_or_default();
            entries.push(diff_role(contract, role_target, role, &current, labels, options)?);
        }
        sort_modified_first(&mut entries);
        roles.push(ContractDiff {
            label: contract.label.clone(),
            address: contract.address,
            entries,
        });
    }
    for entry in roles.iter_mut().flat_map(|contract| contract.entries.iter_mut()) {
        entry.admin_role_name = role_ids.name_of(&entry.admin_role).map(str::to_string);
    }

    let mut ownership = Vec::with_capacity(config.ownership.len());
    for target in &config.ownership {
        let contract = &target.contract;
        let mut entries = Vec::with_capacity(target.getters.len());
        for getter in &target.getters {
            let actual = reader
                .address_getter(contract.address, &getter.getter, block)
                .await?;
            entries.push(diff_getter(contract, getter, actual, labels, options)?);
        }
        sort_modified_first(&mut entries);
        ownership.push(ContractDiff {
            label: contract.label.clone(),
            address: contract.address,
            entries,
        });
    }

    sort_legacy_contracts(&mut legacy);
    sort_modified_first(&mut roles);
    sort_modified_first(&mut ownership);

    let reconciliation = Reconciliation {
        snapshot_block: block,
        last_processed_block: snapshot.last_processed_block,
        last_processed_tx_hash: snapshot.last_processed_tx_hash,
        legacy,
        roles,
        ownership,
    };
    info!(
        snapshot_block = block,
        modified = reconciliation.is_modified(),
        resolved_ids = role_ids.resolved.len(),
        "reconciled permissions"
    );
    Ok(reconciliation)
}
