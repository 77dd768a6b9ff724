//! Deterministic fold of decoded permission events into a [`Snapshot`].
//!
//! The reducer consumes one globally ordered event sequence. Any ordering
//! violation or impossible transition halts the fold: a skipped or
//! misordered event would silently produce a wrong snapshot, so nothing is
//! repaired locally.

use crate::{
    events::{
        DecodedEvent,
        LogPosition,
        PermissionEvent,
    },
    snapshot::{
        LegacyGrant,
        LegacyPermissionState,
        LegacyPermissions,
        RolePermissions,
        RoleState,
        Snapshot,
    },
};
use alloy_primitives::{
    Address,
    B256,
};
use thiserror::Error;
use tracing::{
    debug,
    error,
    trace,
};

/// Why an event cannot follow the state it was applied to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventChainViolation {
    #[error("params set on permission {permission} of {app} for ungranted entity {entity}")]
    ParamsWithoutGrant {
        entity: Address,
        app: Address,
        permission: B256,
    },
    #[error("role {role} on {contract} granted to {account} a second time")]
    RoleDoubleGrant {
        contract: Address,
        role: B256,
        account: Address,
    },
    #[error("role {role} on {contract} revoked from {account} without being granted")]
    RoleRevokeWithoutGrant {
        contract: Address,
        role: B256,
        account: Address,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReducerError {
    #[error(
        "Out of order event {name} at {position} (tx {transaction_hash}): last processed event was at {previous}"
    )]
    OutOfOrderEvent {
        name: &'static str,
        previous: LogPosition,
        position: LogPosition,
        transaction_hash: B256,
    },
    #[error("Invalid event chain at {position} (tx {transaction_hash}): {violation}")]
    InvalidEventChain {
        position: LogPosition,
        transaction_hash: B256,
        violation: EventChainViolation,
    },
}

/// The two permission models being rebuilt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionsState {
    pub legacy: LegacyPermissions,
    pub role_based: RolePermissions,
}

impl PermissionsState {
    /// Applies one event. Ordering is the caller's concern; see
    /// [`EventReducer::process`].
    pub fn apply(&mut self, event: &DecodedEvent) -> Result<(), EventChainViolation> {
        match &event.event {
            PermissionEvent::PermissionManagerChanged {
                app,
                permission,
                manager,
            } => {
                self.touch_legacy(*app, *permission).manager = *manager;
            }
            PermissionEvent::PermissionSet {
                entity,
                app,
                permission,
                allowed: true,
            } => {
                let state = self.touch_legacy(*app, *permission);
                // The ACL overwrites a live permission without a revoke, which
                // also drops any params attached earlier.
                state.granted_to.retain(|grant| grant.address != *entity);
                state.granted_to.push(LegacyGrant {
                    address: *entity,
                    params_hash: None,
                });
            }
            PermissionEvent::PermissionSet {
                entity,
                app,
                permission,
                allowed: false,
            } => {
                // Revoking an ungranted entity is accepted by the ACL.
                self.touch_legacy(*app, *permission)
                    .granted_to
                    .retain(|grant| grant.address != *entity);
            }
            PermissionEvent::PermissionParamsSet {
                entity,
                app,
                permission,
                params_hash,
            } => {
                let grant = self
                    .legacy
                    .get_mut(app)
                    .and_then(|permissions| permissions.get_mut(permission))
                    .and_then(|state| {
                        state
                            .granted_to
                            .iter_mut()
                            .find(|grant| grant.address == *entity)
                    })
                    .ok_or(EventChainViolation::ParamsWithoutGrant {
                        entity: *entity,
                        app: *app,
                        permission: *permission,
                    })?;
                grant.params_hash = Some(*params_hash);
            }
            PermissionEvent::RoleGranted { role, account, .. } => {
                // Checked before touching so a rejected event leaves no entry.
                if self.holds_role(&event.contract, role, account) {
                    return Err(EventChainViolation::RoleDoubleGrant {
                        contract: event.contract,
                        role: *role,
                        account: *account,
                    });
                }
                self.touch_role(event.contract, *role)
                    .granted_to
                    .push(*account);
            }
            PermissionEvent::RoleRevoked { role, account, .. } => {
                if !self.holds_role(&event.contract, role, account) {
                    return Err(EventChainViolation::RoleRevokeWithoutGrant {
                        contract: event.contract,
                        role: *role,
                        account: *account,
                    });
                }
                self.touch_role(event.contract, *role)
                    .granted_to
                    .retain(|grantee| grantee != account);
            }
            PermissionEvent::RoleAdminChanged {
                role, new_admin, ..
            } => {
                self.touch_role(event.contract, *role).role_admin = *new_admin;
            }
        }
        Ok(())
    }

    fn holds_role(&self, contract: &Address, role: &B256, account: &Address) -> bool {
        self.role_based
            .get(contract)
            .and_then(|roles| roles.get(role))
            .is_some_and(|state| state.is_granted(account))
    }

    fn touch_legacy(&mut self, app: Address, permission: B256) -> &mut LegacyPermissionState {
        self.legacy
            .entry(app)
            .or_default()
            .entry(permission)
            .or_default()
    }

    fn touch_role(&mut self, contract: Address, role: B256) -> &mut RoleState {
        self.role_based
            .entry(contract)
            .or_default()
            .entry(role)
            .or_default()
    }
}

/// Pure form of a single fold step.
pub fn fold(
    mut state: PermissionsState,
    event: &DecodedEvent,
) -> Result<PermissionsState, EventChainViolation> {
    state.apply(event)?;
    Ok(state)
}

/// Order-checking accumulator producing a [`Snapshot`].
#[derive(Debug, Clone)]
pub struct EventReducer {
    state: PermissionsState,
    snapshot_block: u64,
    last_position: Option<LogPosition>,
    last_transaction_hash: Option<B256>,
}

impl EventReducer {
    pub fn new(snapshot_block: u64) -> Self {
        Self {
            state: PermissionsState::default(),
            snapshot_block,
            last_position: None,
            last_transaction_hash: None,
        }
    }

    /// Folds one event. Events must arrive non-decreasing in
    /// `(block, transaction index, log index)`.
    pub fn process(&mut self, event: &DecodedEvent) -> Result<(), ReducerError> {
        if let Some(previous) = self
            .last_position
            .filter(|previous| event.position < *previous)
        {
            error!(
                event = event.event.name(),
                %previous,
                position = %event.position,
                "out of order event, halting replay"
            );
            return Err(ReducerError::OutOfOrderEvent {
                name: event.event.name(),
                previous,
                position: event.position,
                transaction_hash: event.transaction_hash,
            });
        }

        trace!(event = event.event.name(), position = %event.position, "folding event");

        self.state.apply(event).map_err(|violation| {
            error!(%violation, position = %event.position, "invalid event chain, halting replay");
            ReducerError::InvalidEventChain {
                position: event.position,
                transaction_hash: event.transaction_hash,
                violation,
            }
        })?;

        self.last_position = Some(event.position);
        self.last_transaction_hash = Some(event.transaction_hash);
        Ok(())
    }

    pub fn process_all<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a DecodedEvent>,
    ) -> Result<(), ReducerError> {
        events.into_iter().try_for_each(|event| self.process(event))
    }

    /// Copy of the current state; the reducer keeps folding independently.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            snapshot_block: self.snapshot_block,
            last_processed_block: self.last_position.map_or(0, |p| p.block_number),
            last_processed_tx_hash: self.last_transaction_hash,
            legacy: self.state.legacy.clone(),
            role_based: self.state.role_based.clone(),
        }
    }

    pub fn into_snapshot(self) -> Snapshot {
        Snapshot {
            snapshot_block: self.snapshot_block,
            last_processed_block: self.last_position.map_or(0, |p| p.block_number),
            last_processed_tx_hash: self.last_transaction_hash,
            legacy: self.state.legacy,
            role_based: self.state.role_based,
        }
    }
}

/// Replays `events` into a fresh reducer.
pub fn replay<'a>(
    snapshot_block: u64,
    events: impl IntoIterator<Item = &'a DecodedEvent>,
) -> Result<Snapshot, ReducerError> {
    let mut reducer = EventReducer::new(snapshot_block);
    reducer.process_all(events)?;
    let snapshot = reducer.into_snapshot();
    debug!(
        snapshot_block,
        last_processed_block = snapshot.last_processed_block,
        legacy_contracts = snapshot.legacy.len(),
        role_contracts = snapshot.role_based.len(),
        "replayed permission events"
    );
    Ok(snapshot)
}
