//! Point-in-time permission state of both access-control models.

use crate::bytes::{
    canonical_address,
    canonical_address_opt,
};
use alloy_primitives::{
    Address,
    B256,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::BTreeMap;

/// One grantee of a legacy permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyGrant {
    #[serde(with = "canonical_address")]
    pub address: Address,
    /// Set when the grant is restricted by ACL parameters.
    pub params_hash: Option<B256>,
}

/// State of one `(contract, permission)` pair in the legacy ACL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyPermissionState {
    /// `None` when the permission does not exist.
    #[serde(with = "canonical_address_opt")]
    pub manager: Option<Address>,
    /// Each address appears at most once.
    pub granted_to: Vec<LegacyGrant>,
}

impl LegacyPermissionState {
    pub fn grantee(&self, address: &Address) -> Option<&LegacyGrant> {
        self.granted_to.iter().find(|grant| grant.address == *address)
    }

    pub fn is_granted(&self, address: &Address) -> bool {
        self.grantee(address).is_some()
    }
}

/// State of one `(contract, role)` pair of a role-based contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleState {
    /// Zero for `DEFAULT_ADMIN_ROLE`.
    pub role_admin: B256,
    /// Grant order is kept; duplicates are never present.
    #[serde(with = "canonical_address_list")]
    pub granted_to: Vec<Address>,
}

impl RoleState {
    pub fn is_granted(&self, address: &Address) -> bool {
        self.granted_to.contains(address)
    }
}

pub type LegacyPermissions = BTreeMap<Address, BTreeMap<B256, LegacyPermissionState>>;
pub type RolePermissions = BTreeMap<Address, BTreeMap<B256, RoleState>>;

/// Fully replayed permission state at `snapshot_block`.
///
/// Maps are keyed progressively: a missing contract or permission means no
/// event ever touched it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub snapshot_block: u64,
    pub last_processed_block: u64,
    pub last_processed_tx_hash: Option<B256>,
    #[serde(with = "canonical_keys")]
    pub legacy: LegacyPermissions,
    #[serde(with = "canonical_keys")]
    pub role_based: RolePermissions,
}

impl Snapshot {
    pub fn legacy_permission(
        &self,
        contract: &Address,
        permission: &B256,
    ) -> Option<&LegacyPermissionState> {
        self.legacy.get(contract)?.get(permission)
    }

    pub fn role(&self, contract: &Address, role: &B256) -> Option<&RoleState> {
        self.role_based.get(contract)?.get(role)
    }
}

mod canonical_address_list {
    use crate::bytes::address_to_hex;
    use alloy_primitives::Address;
    use serde::{
        Deserialize,
        Deserializer,
        Serializer,
        de::Error,
        ser::SerializeSeq,
    };
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(list: &[Address], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(list.len()))?;
        for address in list {
            seq.serialize_element(&address_to_hex(address))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Address>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|raw| Address::from_str(&crate::bytes::normalize(raw)).map_err(D::Error::custom))
            .collect()
    }
}

/// Contract-keyed maps serialized with canonical address keys.
mod canonical_keys {
    use crate::bytes::address_to_hex;
    use alloy_primitives::Address;
    use serde::{
        Deserialize,
        Deserializer,
        Serialize,
        Serializer,
        de::Error,
        ser::SerializeMap,
    };
    use std::{
        collections::BTreeMap,
        str::FromStr,
    };

    pub fn serialize<S, V>(map: &BTreeMap<Address, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (address, value) in map {
            out.serialize_entry(&address_to_hex(address), value)?;
        }
        out.end()
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<BTreeMap<Address, V>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        BTreeMap::<String, V>::deserialize(deserializer)?
            .into_iter()
            .map(|(raw, value)| {
                Address::from_str(&crate::bytes::normalize(&raw))
                    .map(|address| (address, value))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}
