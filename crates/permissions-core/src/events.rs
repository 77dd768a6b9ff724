//! Raw log records and the decoder mapping them onto the six permission
//! events tracked by the reducer.

use crate::bytes::{
    self,
    BytesError,
    canonical_address,
};
use alloy_primitives::{
    Address,
    B256,
    Bytes,
};
use alloy_sol_types::{
    SolEvent,
    sol,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;
use thiserror::Error;

sol! {
    /// Legacy ACL: permission granted (`allowed = true`) or revoked.
    event SetPermission(address indexed entity, address indexed app, bytes32 indexed role, bool allowed);
    /// Legacy ACL: parameters attached to a freshly granted permission.
    event SetPermissionParams(address indexed entity, address indexed app, bytes32 indexed role, bytes32 paramsHash);
    /// Legacy ACL: permission manager changed. A zero manager removes the permission.
    event ChangePermissionManager(address indexed app, bytes32 indexed role, address indexed manager);

    event RoleGranted(bytes32 indexed role, address indexed account, address indexed sender);
    event RoleRevoked(bytes32 indexed role, address indexed account, address indexed sender);
    event RoleAdminChanged(bytes32 indexed role, bytes32 indexed previousAdminRole, bytes32 indexed newAdminRole);
}

/// Topics emitted by the legacy ACL contract.
pub const LEGACY_TOPICS: [B256; 3] = [
    SetPermission::SIGNATURE_HASH,
    SetPermissionParams::SIGNATURE_HASH,
    ChangePermissionManager::SIGNATURE_HASH,
];

/// Topics emitted by every role-based contract.
pub const ROLE_TOPICS: [B256; 3] = [
    RoleGranted::SIGNATURE_HASH,
    RoleRevoked::SIGNATURE_HASH,
    RoleAdminChanged::SIGNATURE_HASH,
];

/// Total order of logs on chain.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct LogPosition {
    pub block_number: u64,
    pub transaction_index: u64,
    pub log_index: u64,
}

impl LogPosition {
    pub const fn new(block_number: u64, transaction_index: u64, log_index: u64) -> Self {
        Self {
            block_number,
            transaction_index,
            log_index,
        }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block {} tx {} log {}",
            self.block_number, self.transaction_index, self.log_index
        )
    }
}

/// A log as returned by the node, already positioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub position: LogPosition,
    pub transaction_hash: B256,
    pub block_hash: Option<B256>,
    pub removed: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unrecognized event topic {topic} at {position}")]
    UnrecognizedTopic { topic: B256, position: LogPosition },
    #[error("Log at {position} has no topics")]
    EmptyTopics { position: LogPosition },
    #[error("{event} at {position} expects {expected} topics, got {got}")]
    MissingTopics {
        event: &'static str,
        position: LogPosition,
        expected: usize,
        got: usize,
    },
    #[error("Invalid data for {event} at {position}")]
    InvalidData {
        event: &'static str,
        position: LogPosition,
        #[source]
        source: BytesError,
    },
    #[error("Log is missing field `{0}`; pending logs cannot be decoded")]
    MissingLogField(&'static str),
}

/// The six tracked permission mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args")]
pub enum PermissionEvent {
    #[serde(rename_all = "camelCase")]
    PermissionSet {
        #[serde(with = "canonical_address")]
        entity: Address,
        #[serde(with = "canonical_address")]
        app: Address,
        permission: B256,
        allowed: bool,
    },
    #[serde(rename_all = "camelCase")]
    PermissionParamsSet {
        #[serde(with = "canonical_address")]
        entity: Address,
        #[serde(with = "canonical_address")]
        app: Address,
        permission: B256,
        params_hash: B256,
    },
    #[serde(rename_all = "camelCase")]
    PermissionManagerChanged {
        #[serde(with = "canonical_address")]
        app: Address,
        permission: B256,
        /// `None` when the raw event carried the zero address.
        #[serde(with = "crate::bytes::canonical_address_opt")]
        manager: Option<Address>,
    },
    #[serde(rename_all = "camelCase")]
    RoleGranted {
        role: B256,
        #[serde(with = "canonical_address")]
        account: Address,
        #[serde(with = "canonical_address")]
        sender: Address,
    },
    #[serde(rename_all = "camelCase")]
    RoleRevoked {
        role: B256,
        #[serde(with = "canonical_address")]
        account: Address,
        #[serde(with = "canonical_address")]
        sender: Address,
    },
    #[serde(rename_all = "camelCase")]
    RoleAdminChanged {
        role: B256,
        previous_admin: B256,
        new_admin: B256,
    },
}

impl PermissionEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PermissionSet { .. } => "PermissionSet",
            Self::PermissionParamsSet { .. } => "PermissionParamsSet",
            Self::PermissionManagerChanged { .. } => "PermissionManagerChanged",
            Self::RoleGranted { .. } => "RoleGranted",
            Self::RoleRevoked { .. } => "RoleRevoked",
            Self::RoleAdminChanged { .. } => "RoleAdminChanged",
        }
    }
}

/// A decoded event together with where it was emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedEvent {
    /// Emitting contract. For role-based events this is the contract whose
    /// roles changed; legacy events name the target in `app` instead.
    #[serde(with = "canonical_address")]
    pub contract: Address,
    #[serde(flatten)]
    pub position: LogPosition,
    pub transaction_hash: B256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<B256>,
    #[serde(flatten)]
    pub event: PermissionEvent,
}

/// Maps a raw log onto one of the six [`PermissionEvent`]s by its first topic.
pub fn decode_log(log: &RawLog) -> Result<DecodedEvent, DecodeError> {
    let position = log.position;
    let signature = *log
        .topics
        .first()
        .ok_or(DecodeError::EmptyTopics { position })?;

    let event = if signature == SetPermission::SIGNATURE_HASH {
        let [entity, app, permission] = indexed::<3>(log, "SetPermission")?;
        PermissionEvent::PermissionSet {
            entity: bytes::word_to_address(&entity),
            app: bytes::word_to_address(&app),
            permission,
            allowed: bytes::word_to_bool(&data_word(log, "SetPermission")?),
        }
    } else if signature == SetPermissionParams::SIGNATURE_HASH {
        let [entity, app, permission] = indexed::<3>(log, "SetPermissionParams")?;
        PermissionEvent::PermissionParamsSet {
            entity: bytes::word_to_address(&entity),
            app: bytes::word_to_address(&app),
            permission,
            params_hash: data_word(log, "SetPermissionParams")?,
        }
    } else if signature == ChangePermissionManager::SIGNATURE_HASH {
        let [app, permission, manager] = indexed::<3>(log, "ChangePermissionManager")?;
        let manager = bytes::word_to_address(&manager);
        PermissionEvent::PermissionManagerChanged {
            app: bytes::word_to_address(&app),
            permission,
            manager: (!manager.is_zero()).then_some(manager),
        }
    } else if signature == RoleGranted::SIGNATURE_HASH {
        let [role, account, sender] = indexed::<3>(log, "RoleGranted")?;
        PermissionEvent::RoleGranted {
            role,
            account: bytes::word_to_address(&account),
            sender: bytes::word_to_address(&sender),
        }
    } else if signature == RoleRevoked::SIGNATURE_HASH {
        let [role, account, sender] = indexed::<3>(log, "RoleRevoked")?;
        PermissionEvent::RoleRevoked {
            role,
            account: bytes::word_to_address(&account),
            sender: bytes::word_to_address(&sender),
        }
    } else if signature == RoleAdminChanged::SIGNATURE_HASH {
        let [role, previous_admin, new_admin] = indexed::<3>(log, "RoleAdminChanged")?;
        PermissionEvent::RoleAdminChanged {
            role,
            previous_admin,
            new_admin,
        }
    } else {
        return Err(DecodeError::UnrecognizedTopic {
            topic: signature,
            position,
        });
    };

    Ok(DecodedEvent {
        contract: log.address,
        position,
        transaction_hash: log.transaction_hash,
        block_hash: log.block_hash,
        event,
    })
}

/// Indexed arguments, i.e. the topics following the signature.
fn indexed<const N: usize>(log: &RawLog, event: &'static str) -> Result<[B256; N], DecodeError> {
    let missing = || DecodeError::MissingTopics {
        event,
        position: log.position,
        expected: N + 1,
        got: log.topics.len(),
    };
    log.topics
        .get(1..=N)
        .ok_or_else(missing)?
        .try_into()
        .map_err(|_| missing())
}

fn data_word(log: &RawLog, event: &'static str) -> Result<B256, DecodeError> {
    bytes::data_word(&log.data, 0).map_err(|source| DecodeError::InvalidData {
        event,
        position: log.position,
        source,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloy_primitives::{
        LogData,
        address,
        b256,
        keccak256,
    };

    pub(crate) fn raw_log(address: Address, data: LogData, position: LogPosition) -> RawLog {
        let (topics, data) = data.split();
        RawLog {
            address,
            topics,
            data,
            position,
            transaction_hash: B256::repeat_byte(0xab),
            block_hash: None,
            removed: false,
        }
    }

    const ACL: Address = address!("0x78780e70eae33e2935814a327f7db6c01136cc62");
    const APP: Address = address!("0x3508a952176b3c15387c97be809eaffb1982176a");
    const ENTITY: Address = address!("0x49b3512c44891bef83f8967d075121bd1b07a01b");

    #[test]
    fn signature_hashes_match_known_topics() {
        let expected = [
            (
                SetPermission::SIGNATURE_HASH,
                b256!("0x759b9a74d5354b5801710a0c1b283cc9f0d32b607ac8ced10c83ac8e75c77d52"),
            ),
            (
                SetPermissionParams::SIGNATURE_HASH,
                b256!("0x8dfee25d92d73b8c9b868f9fa3e215cc1981033f426e53803e3da4f09a2cfc30"),
            ),
            (
                ChangePermissionManager::SIGNATURE_HASH,
                b256!("0xf3addc8b8e25ee11528a61b0e65092cae0666ef0ec0c64cb303993c88d689b4d"),
            ),
            (
                RoleGranted::SIGNATURE_HASH,
                b256!("0x2f8788117e7eff1d82e926ec794901d17c78024a50270940304540a733656f0d"),
            ),
            (
                RoleRevoked::SIGNATURE_HASH,
                b256!("0xf6391f5c32d9c69d2a47ea670b442974b53935d1edc7fd64eb21e047a839171b"),
            ),
            (
                RoleAdminChanged::SIGNATURE_HASH,
                b256!("0xbd79b86ffe0ab8e8776151514217cd7cacd52c909f66475c3af44e129f0b00ff"),
            ),
        ];
        for (actual, expected) in expected {
            assert_eq!(actual, expected);
        }
    }

    #[test]
    fn decodes_set_permission_from_abi_encoded_log() {
        let role = keccak256("STAKING_CONTROL_ROLE");
        let event = SetPermission {
            entity: ENTITY,
            app: APP,
            role,
            allowed: true,
        };
        let log = raw_log(ACL, event.encode_log_data(), LogPosition::new(10, 1, 2));

        let decoded = decode_log(&log).unwrap();
        assert_eq!(decoded.contract, ACL);
        assert_eq!(decoded.position, LogPosition::new(10, 1, 2));
        assert_eq!(
            decoded.event,
            PermissionEvent::PermissionSet {
                entity: ENTITY,
                app: APP,
                permission: role,
                allowed: true,
            }
        );
    }

    #[test]
    fn zero_manager_decodes_to_none() {
        let role = keccak256("APP_MANAGER_ROLE");
        let event = ChangePermissionManager {
            app: APP,
            role,
            manager: Address::ZERO,
        };
        let log = raw_log(ACL, event.encode_log_data(), LogPosition::default());

        let decoded = decode_log(&log).unwrap();
        assert_eq!(
            decoded.event,
            PermissionEvent::PermissionManagerChanged {
                app: APP,
                permission: role,
                manager: None,
            }
        );
    }

    #[test]
    fn decodes_role_admin_change_verbatim() {
        let role = keccak256("PAUSE_ROLE");
        let admin = keccak256("RESUME_ROLE");
        let event = RoleAdminChanged {
            role,
            previousAdminRole: B256::ZERO,
            newAdminRole: admin,
        };
        let log = raw_log(APP, event.encode_log_data(), LogPosition::default());

        match decode_log(&log).unwrap().event {
            PermissionEvent::RoleAdminChanged {
                role: decoded_role,
                previous_admin,
                new_admin,
            } => {
                assert_eq!(decoded_role, role);
                assert_eq!(previous_admin, B256::ZERO);
                assert_eq!(new_admin, admin);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn unknown_topic_is_rejected() {
        let topic = keccak256("Transfer(address,address,uint256)");
        let log = raw_log(
            APP,
            LogData::new_unchecked(vec![topic], Bytes::new()),
            LogPosition::new(1, 0, 0),
        );
        assert_eq!(
            decode_log(&log),
            Err(DecodeError::UnrecognizedTopic {
                topic,
                position: LogPosition::new(1, 0, 0),
            })
        );
    }

    #[test]
    fn truncated_logs_are_rejected() {
        let log = raw_log(
            ACL,
            LogData::new_unchecked(vec![SetPermission::SIGNATURE_HASH], Bytes::new()),
            LogPosition::default(),
        );
        assert!(matches!(
            decode_log(&log),
            Err(DecodeError::MissingTopics {
                expected: 4,
                got: 1,
                ..
            })
        ));

        let event = SetPermission {
            entity: ENTITY,
            app: APP,
            role: B256::ZERO,
            allowed: true,
        };
        let (topics, _) = event.encode_log_data().split();
        let log = raw_log(
            ACL,
            LogData::new_unchecked(topics, Bytes::new()),
            LogPosition::default(),
        );
        assert!(matches!(
            decode_log(&log),
            Err(DecodeError::InvalidData { .. })
        ));
    }

    #[test]
    fn decoded_events_serialize_canonically() {
        let event = DecodedEvent {
            contract: address!("0x0eCc17597D292271836691358B22340b78F3035B"),
            position: LogPosition::new(5, 0, 1),
            transaction_hash: B256::ZERO,
            block_hash: None,
            event: PermissionEvent::RoleGranted {
                role: B256::ZERO,
                account: ENTITY,
                sender: ENTITY,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["contract"], "0x0ecc17597d292271836691358b22340b78f3035b");
        assert_eq!(json["name"], "RoleGranted");
        assert_eq!(json["blockNumber"], 5);

        let back: DecodedEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
