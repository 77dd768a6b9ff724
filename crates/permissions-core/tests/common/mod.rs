//! Shared fixtures: a labeled address book, raw log builders and a chain
//! reader answering from fixed tables.

#![allow(dead_code)]

use alloy_primitives::{
    Address,
    B256,
    LogData,
};
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use permissions_core::{
    ChainReadError,
    ChainReader,
    DecodedEvent,
    LogPosition,
    RawLog,
    chain::role_id_from_name,
    decode_log,
    events::{
        ChangePermissionManager,
        RoleGranted,
        RoleRevoked,
        SetPermission,
        SetPermissionParams,
    },
};
use std::collections::HashMap;

pub const ACL: Address = Address::repeat_byte(0x01);
pub const VAULT: Address = Address::repeat_byte(0x02);
pub const MODULE: Address = Address::repeat_byte(0x03);
pub const ALICE: Address = Address::repeat_byte(0xa1);
pub const BOB: Address = Address::repeat_byte(0xb0);
pub const CAROL: Address = Address::repeat_byte(0xc0);
pub const DAVE: Address = Address::repeat_byte(0xd0);
pub const EVE: Address = Address::repeat_byte(0xe0);
pub const X: Address = Address::repeat_byte(0x0a);
pub const Y: Address = Address::repeat_byte(0x0b);

pub fn target_config_json() -> String {
    let labels = [
        ("ACL", ACL),
        ("Vault", VAULT),
        ("Module", MODULE),
        ("Alice", ALICE),
        ("Bob", BOB),
        ("Carol", CAROL),
        ("Dave", DAVE),
        ("Eve", EVE),
        ("X", X),
        ("Y", Y),
    ]
    .iter()
    .map(|(label, address)| format!("\"{label}\": \"{address}\""))
    .collect::<Vec<_>>()
    .join(",\n");

    format!(
        r#"{{
            "genesisBlock": 1,
            "explorerUrl": "https://explorer.test",
            "labels": {{ {labels} }},
            "legacyPermissions": {{
                "Vault": {{ "P": {{ "manager": "Dave", "grantedTo": ["Carol", "Eve"] }} }}
            }},
            "roles": {{ "Module": {{ "R": ["X", "Y"] }} }},
            "ownershipGetters": {{ "Module": {{ "getOwner": "Alice" }} }}
        }}"#
    )
}

/// Builds and decodes a log at `(block, 0, log_index)`.
pub fn event(contract: Address, data: LogData, block: u64, log_index: u64) -> DecodedEvent {
    let (topics, data) = data.split();
    let raw = RawLog {
        address: contract,
        topics,
        data,
        position: LogPosition::new(block, 0, log_index),
        transaction_hash: B256::with_last_byte(u8::try_from(block % 256).unwrap()),
        block_hash: None,
        removed: false,
    };
    decode_log(&raw).unwrap()
}

pub fn set_permission(entity: Address, app: Address, name: &str, allowed: bool) -> LogData {
    SetPermission {
        entity,
        app,
        role: role_id_from_name(name),
        allowed,
    }
    .encode_log_data()
}

pub fn set_params(entity: Address, app: Address, name: &str, params_hash: B256) -> LogData {
    SetPermissionParams {
        entity,
        app,
        role: role_id_from_name(name),
        paramsHash: params_hash,
    }
    .encode_log_data()
}

pub fn change_manager(app: Address, name: &str, manager: Address) -> LogData {
    ChangePermissionManager {
        app,
        role: role_id_from_name(name),
        manager,
    }
    .encode_log_data()
}

pub fn role_granted(name: &str, account: Address) -> LogData {
    RoleGranted {
        role: role_id_from_name(name),
        account,
        sender: ALICE,
    }
    .encode_log_data()
}

pub fn role_revoked(name: &str, account: Address) -> LogData {
    RoleRevoked {
        role: role_id_from_name(name),
        account,
        sender: ALICE,
    }
    .encode_log_data()
}

/// Chain reader backed by fixed getter values; ids are the keccak of the
/// name.
#[derive(Debug, Default)]
pub struct StaticChainReader {
    pub getters: HashMap<(Address, String), Address>,
}

impl StaticChainReader {
    pub fn with_getter(mut self, contract: Address, getter: &str, value: Address) -> Self {
        self.getters.insert((contract, getter.to_string()), value);
        self
    }
}

#[async_trait]
impl ChainReader for StaticChainReader {
    async fn role_id(&self, _contract: Address, name: &str, _block: u64) -> Result<B256, ChainReadError> {
        Ok(role_id_from_name(name))
    }

    async fn address_getter(
        &self,
        contract: Address,
        getter: &str,
        block: u64,
    ) -> Result<Address, ChainReadError> {
        self.getters
            .get(&(contract, getter.to_string()))
            .copied()
            .ok_or_else(|| {
                ChainReadError::Call {
                    contract,
                    method: getter.to_string(),
                    block,
                    message: "execution reverted".to_string(),
                }
            })
    }

    async fn permission_params_length(
        &self,
        _acl: Address,
        _entity: Address,
        _app: Address,
        _permission: B256,
        _block: u64,
    ) -> Result<u64, ChainReadError> {
        Ok(1)
    }
}
