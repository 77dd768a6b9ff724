//! Declarative per-network target configuration.
//!
//! The configuration is loaded once, validated eagerly (every label used
//! anywhere must resolve through the label table) and never mutated.

use crate::bytes::{
    self,
    shorten_address,
};
use alloy_primitives::Address;
use serde::{
    Deserialize,
    de::DeserializeOwned,
};
use serde_json::{
    Map,
    Value,
};
use std::{
    collections::BTreeMap,
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
};
use thiserror::Error;

/// Manager label meaning "the permission should have no manager".
pub const NO_MANAGER: &str = "None";

const DEFAULT_ACL_LABEL: &str = "ACL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read target config {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse target config: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("Label \"{label}\" has invalid address \"{value}\"")]
    InvalidAddress { label: String, value: String },
    #[error("Label \"{label}\" referenced by {context} is not found in the config")]
    UnknownLabel { label: String, context: String },
    #[error("Unsupported network \"{0}\"")]
    UnsupportedNetwork(String),
}

/// Networks with a bundled target configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Holesky,
    Hoodi,
}

impl Network {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Holesky => "holesky",
            Self::Hoodi => "hoodi",
        }
    }

    /// `config/<network>.json`, relative to the working directory.
    pub fn default_config_path(self) -> PathBuf {
        PathBuf::from("config").join(format!("{}.json", self.as_str()))
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "holesky" => Ok(Self::Holesky),
            "hoodi" => Ok(Self::Hoodi),
            _ => Err(ConfigError::UnsupportedNetwork(s.to_string())),
        }
    }
}

/// Typed `Label <-> Address` table.
///
/// Several labels may share an address; reverse lookups return the first
/// label declared for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelBook {
    by_label: BTreeMap<String, Address>,
    by_address: BTreeMap<Address, String>,
}

impl LabelBook {
    pub fn new(labels: impl IntoIterator<Item = (String, Address)>) -> Self {
        let mut by_label = BTreeMap::new();
        let mut by_address = BTreeMap::new();
        for (label, address) in labels {
            by_address.entry(address).or_insert_with(|| label.clone());
            by_label.insert(label, address);
        }
        Self {
            by_label,
            by_address,
        }
    }

    pub fn address(&self, label: &str) -> Option<Address> {
        self.by_label.get(label).copied()
    }

    pub fn label(&self, address: &Address) -> Option<&str> {
        self.by_address.get(address).map(String::as_str)
    }

    /// Label of `address`, or `Unknown(0x123456..9abcdef0)`.
    pub fn display(&self, address: &Address) -> String {
        self.label(address).map_or_else(
            || format!("Unknown({})", shorten_address(address)),
            str::to_string,
        )
    }

    pub fn len(&self) -> usize {
        self.by_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }

    fn resolve(&self, label: &str, context: impl FnOnce() -> String) -> Result<LabeledAddress, ConfigError> {
        self.address(label)
            .map(|address| {
                LabeledAddress {
                    label: label.to_string(),
                    address,
                }
            })
            .ok_or_else(|| {
                ConfigError::UnknownLabel {
                    label: label.to_string(),
                    context: context(),
                }
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledAddress {
    pub label: String,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyPermissionTarget {
    pub name: String,
    /// `None` when the config says the permission should have no manager.
    pub manager: Option<LabeledAddress>,
    pub granted_to: Vec<LabeledAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyContractTarget {
    pub contract: LabeledAddress,
    pub permissions: Vec<LegacyPermissionTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleTarget {
    pub name: String,
    pub granted_to: Vec<LabeledAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleContractTarget {
    pub contract: LabeledAddress,
    pub roles: Vec<RoleTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetterTarget {
    pub getter: String,
    pub expected: LabeledAddress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipTarget {
    pub contract: LabeledAddress,
    pub getters: Vec<GetterTarget>,
}

/// The one legacy permission whose parameterized grants are delegated
/// node-operator signing-key registrations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegatedSigningKeys {
    pub contract: LabeledAddress,
    pub permission: String,
    /// Badge text of the collapsed sub-grants, e.g. `Simple DVT Operator(s)`.
    pub operators_label: String,
}

impl DelegatedSigningKeys {
    pub fn matches(&self, contract: &Address, permission: &str) -> bool {
        self.contract.address == *contract && self.permission == permission
    }
}

/// Validated target configuration of one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub genesis_block: u64,
    pub explorer_url: String,
    pub labels: LabelBook,
    /// The legacy ACL contract emitting all legacy permission events.
    pub acl: LabeledAddress,
    pub delegated_signing_keys: Option<DelegatedSigningKeys>,
    pub legacy: Vec<LegacyContractTarget>,
    pub roles: Vec<RoleContractTarget>,
    pub ownership: Vec<OwnershipTarget>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLegacyPermission {
    manager: String,
    #[serde(default)]
    granted_to: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDelegatedSigningKeys {
    contract: String,
    permission: String,
    #[serde(default)]
    operators_label: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTargetConfig {
    genesis_block: u64,
    explorer_url: String,
    #[serde(default)]
    acl_contract: Option<String>,
    #[serde(default)]
    delegated_signing_keys: Option<RawDelegatedSigningKeys>,
    labels: Map<String, Value>,
    #[serde(default)]
    legacy_permissions: Map<String, Value>,
    #[serde(default)]
    roles: Map<String, Value>,
    #[serde(default)]
    ownership_getters: Map<String, Value>,
}

/// Entries of a JSON object in declaration order.
fn declared<T: DeserializeOwned>(map: Map<String, Value>) -> Result<Vec<(String, T)>, ConfigError> {
    map.into_iter()
        .map(|(key, value)| {
            serde_json::from_value(value)
                .map(|value| (key, value))
                .map_err(ConfigError::Parse)
        })
        .collect()
}

impl TargetConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| {
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        contents.parse()
    }

    /// Resolves every label of the raw config, failing on the first one
    /// missing from the label table.
    fn validate(raw: RawTargetConfig) -> Result<Self, ConfigError> {
        let labels = LabelBook::new(
            declared::<String>(raw.labels)?
                .into_iter()
                .map(|(label, value)| {
                    Address::from_str(&bytes::normalize(&value))
                        .map(|address| (label.clone(), address))
                        .map_err(|_| ConfigError::InvalidAddress { label, value })
                })
                .collect::<Result<Vec<_>, _>>()?,
        );

        let acl_label = raw.acl_contract.as_deref().unwrap_or(DEFAULT_ACL_LABEL);
        let acl = labels.resolve(acl_label, || "aclContract".to_string())?;

        let delegated_signing_keys = raw
            .delegated_signing_keys
            .map(|raw| {
                labels
                    .resolve(&raw.contract, || "delegatedSigningKeys".to_string())
                    .map(|contract| {
                        let operators_label = raw
                            .operators_label
                            .unwrap_or_else(|| format!("{} Operator(s)", contract.label));
                        DelegatedSigningKeys {
                            contract,
                            permission: raw.permission,
                            operators_label,
                        }
                    })
            })
            .transpose()?;

        let legacy_contracts: Vec<(String, Map<String, Value>)> = declared(raw.legacy_permissions)?;
        let mut legacy = Vec::with_capacity(legacy_contracts.len());
        for (contract_label, permissions) in legacy_contracts {
            let contract = labels.resolve(&contract_label, || "legacyPermissions".to_string())?;
            let mut targets = Vec::with_capacity(permissions.len());
            for (name, permission) in declared::<RawLegacyPermission>(permissions)? {
                let context = || format!("legacyPermissions.{contract_label}.{name}");
                let manager = if permission.manager == NO_MANAGER {
                    None
                } else {
                    Some(labels.resolve(&permission.manager, context)?)
                };
                let granted_to = permission
                    .granted_to
                    .iter()
                    .map(|label| labels.resolve(label, context))
                    .collect::<Result<_, _>>()?;
                targets.push(LegacyPermissionTarget {
                    name,
                    manager,
                    granted_to,
                });
            }
            legacy.push(LegacyContractTarget {
                contract,
                permissions: targets,
            });
        }

        let role_contracts: Vec<(String, Map<String, Value>)> = declared(raw.roles)?;
        let mut roles = Vec::with_capacity(role_contracts.len());
        for (contract_label, contract_roles) in role_contracts {
            let contract = labels.resolve(&contract_label, || "roles".to_string())?;
            let mut targets = Vec::with_capacity(contract_roles.len());
            for (name, grantees) in declared::<Vec<String>>(contract_roles)? {
                let context = || format!("roles.{contract_label}.{name}");
                let granted_to = grantees
                    .iter()
                    .map(|label| labels.resolve(label, context))
                    .collect::<Result<_, _>>()?;
                targets.push(RoleTarget { name, granted_to });
            }
            roles.push(RoleContractTarget {
                contract,
                roles: targets,
            });
        }

        let owned_contracts: Vec<(String, Map<String, Value>)> = declared(raw.ownership_getters)?;
        let mut ownership = Vec::with_capacity(owned_contracts.len());
        for (contract_label, getters) in owned_contracts {
            let contract = labels.resolve(&contract_label, || "ownershipGetters".to_string())?;
            let getters = declared::<String>(getters)?
                .into_iter()
                .map(|(getter, owner)| {
                    let expected = labels.resolve(&owner, || {
                        format!("ownershipGetters.{contract_label}.{getter}")
                    })?;
                    Ok(GetterTarget { getter, expected })
                })
                .collect::<Result<_, ConfigError>>()?;
            ownership.push(OwnershipTarget { contract, getters });
        }

        Ok(Self {
            genesis_block: raw.genesis_block,
            explorer_url: raw.explorer_url.trim_end_matches('/').to_string(),
            labels,
            acl,
            delegated_signing_keys,
            legacy,
            roles,
            ownership,
        })
    }

    /// Addresses of every role-based contract named by the config.
    pub fn role_contracts(&self) -> Vec<Address> {
        self.roles
            .iter()
            .map(|target| target.contract.address)
            .collect()
    }

    pub fn address_url(&self, address: &Address) -> String {
        format!("{}/address/{}", self.explorer_url, bytes::address_to_hex(address))
    }

    pub fn block_url(&self, block_number: u64) -> String {
        format!("{}/block/{block_number}", self.explorer_url)
    }

    pub fn tx_url(&self, transaction_hash: &alloy_primitives::B256) -> String {
        format!(
            "{}/tx/{}",
            self.explorer_url,
            bytes::word_to_hex(transaction_hash)
        )
    }
}

impl FromStr for TargetConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: RawTargetConfig = serde_json::from_str(s).map_err(ConfigError::Parse)?;
        Self::validate(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const CONFIG: &str = r#"{
        "genesisBlock": 7,
        "explorerUrl": "https://explorer.test/",
        "delegatedSigningKeys": { "contract": "Registry", "permission": "MANAGE_SIGNING_KEYS" },
        "labels": {
            "ACL": "0x1111111111111111111111111111111111111111",
            "Vault": "0x2222222222222222222222222222222222222222",
            "Registry": "0x3333333333333333333333333333333333333333",
            "Alice": "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
            "AliceAlias": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        },
        "legacyPermissions": {
            "Vault": {
                "P": { "manager": "Alice", "grantedTo": ["Alice"] },
                "Q": { "manager": "None" }
            }
        },
        "roles": { "Registry": { "DEFAULT_ADMIN_ROLE": ["Alice"] } },
        "ownershipGetters": { "Vault": { "getOwner": "Alice" } }
    }"#;

    #[test]
    fn loads_and_resolves_labels() {
        let config: TargetConfig = CONFIG.parse().unwrap();
        assert_eq!(config.genesis_block, 7);
        assert_eq!(config.acl.address, address!("0x1111111111111111111111111111111111111111"));
        assert_eq!(config.legacy.len(), 1);

        let vault = &config.legacy[0];
        assert_eq!(vault.contract.label, "Vault");
        let names: Vec<_> = vault.permissions.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["P", "Q"]);
        assert_eq!(vault.permissions[1].manager, None);
        assert!(vault.permissions[1].granted_to.is_empty());

        let keys = config.delegated_signing_keys.as_ref().unwrap();
        assert!(keys.matches(
            &address!("0x3333333333333333333333333333333333333333"),
            "MANAGE_SIGNING_KEYS"
        ));
    }

    #[test]
    fn reverse_lookup_picks_first_label_and_marks_unknown() {
        let config: TargetConfig = CONFIG.parse().unwrap();
        let alice = address!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(config.labels.label(&alice), Some("Alice"));
        assert_eq!(
            config
                .labels
                .display(&address!("0x0123456789abcdef0123456789abcdef01234567")),
            "Unknown(0x012345..01234567)"
        );
    }

    #[test]
    fn declaration_order_is_kept() {
        let config: TargetConfig = r#"{
            "genesisBlock": 1,
            "explorerUrl": "https://explorer.test",
            "labels": {
                "ACL": "0x0101010101010101010101010101010101010101",
                "Zeta": "0x0202020202020202020202020202020202020202",
                "SimpleDVTRepo": "0x0303030303030303030303030303030303030303",
                "SimpleDVT": "0x0303030303030303030303030303030303030303",
                "Alpha": "0x0404040404040404040404040404040404040404"
            },
            "legacyPermissions": {
                "Zeta": {
                    "Z_ROLE": { "manager": "None" },
                    "A_ROLE": { "manager": "None" }
                },
                "Alpha": { "P": { "manager": "None" } }
            },
            "roles": {
                "Zeta": { "Z_ROLE": [], "A_ROLE": [] },
                "Alpha": { "P": [] }
            }
        }"#
        .parse()
        .unwrap();

        let contracts: Vec<_> = config.legacy.iter().map(|t| t.contract.label.as_str()).collect();
        assert_eq!(contracts, vec!["Zeta", "Alpha"]);
        let permissions: Vec<_> = config.legacy[0].permissions.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(permissions, vec!["Z_ROLE", "A_ROLE"]);
        let roles: Vec<_> = config.roles[0].roles.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(roles, vec!["Z_ROLE", "A_ROLE"]);
        assert_eq!(
            config.labels.label(&Address::repeat_byte(0x03)),
            Some("SimpleDVTRepo")
        );
    }

    #[test]
    fn operators_label_defaults_to_contract_label() {
        let config: TargetConfig = CONFIG.parse().unwrap();
        let keys = config.delegated_signing_keys.unwrap();
        assert_eq!(keys.operators_label, "Registry Operator(s)");

        let named = CONFIG.replace(
            r#""permission": "MANAGE_SIGNING_KEYS" }"#,
            r#""permission": "MANAGE_SIGNING_KEYS", "operatorsLabel": "Registry Signers" }"#,
        );
        let config: TargetConfig = named.parse().unwrap();
        assert_eq!(
            config.delegated_signing_keys.unwrap().operators_label,
            "Registry Signers"
        );
    }

    #[test]
    fn unknown_grantee_label_fails_at_load() {
        let broken = CONFIG.replace(r#""grantedTo": ["Alice"]"#, r#""grantedTo": ["Mallory"]"#);
        let err = broken.parse::<TargetConfig>().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownLabel { ref label, ref context }
                if label == "Mallory" && context == "legacyPermissions.Vault.P"
        ));
    }

    #[test]
    fn invalid_label_address_is_rejected() {
        let broken = CONFIG.replace(
            "0x2222222222222222222222222222222222222222",
            "0x2222",
        );
        assert!(matches!(
            broken.parse::<TargetConfig>(),
            Err(ConfigError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn explorer_links_trim_trailing_slash() {
        let config: TargetConfig = CONFIG.parse().unwrap();
        assert_eq!(config.block_url(10), "https://explorer.test/block/10");
        assert_eq!(
            config.address_url(&config.acl.address),
            "https://explorer.test/address/0x1111111111111111111111111111111111111111"
        );
    }

    #[test]
    fn networks_parse_case_insensitively() {
        assert_eq!("Hoodi".parse::<Network>().unwrap(), Network::Hoodi);
        assert_eq!(
            Network::Mainnet.default_config_path(),
            PathBuf::from("config/mainnet.json")
        );
        assert!(matches!(
            "sepolia".parse::<Network>(),
            Err(ConfigError::UnsupportedNetwork(_))
        ));
    }

    #[test]
    fn bundled_configs_are_valid() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config");
        for network in [Network::Mainnet, Network::Holesky, Network::Hoodi] {
            let config = TargetConfig::load(root.join(format!("{network}.json"))).unwrap();
            assert!(!config.labels.is_empty());
            assert!(config.delegated_signing_keys.is_some());
        }
    }
}
