//! Read-only contract calls needed while reconciling.

use alloy_primitives::{
    Address,
    B256,
    keccak256,
};
use async_trait::async_trait;
use thiserror::Error;

/// Name of the OpenZeppelin root role, whose id is the zero hash.
pub const DEFAULT_ADMIN_ROLE: &str = "DEFAULT_ADMIN_ROLE";

#[derive(Debug, Error)]
pub enum ChainReadError {
    #[error("Call {method} on {contract} at block {block} failed: {message}")]
    Call {
        contract: Address,
        method: String,
        block: u64,
        message: String,
    },
    #[error("Call {method} on {contract} returned {len} bytes, expected a 32-byte word")]
    InvalidReturnData {
        contract: Address,
        method: String,
        len: usize,
    },
}

/// Contract state reads pinned to the snapshot block.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Calls the zero-argument `name()` getter that exposes a permission or
    /// role identifier.
    async fn role_id(&self, contract: Address, name: &str, block: u64) -> Result<B256, ChainReadError>;

    /// Reads a single-address getter such as `owner()` or `getAdmin()`.
    async fn address_getter(
        &self,
        contract: Address,
        getter: &str,
        block: u64,
    ) -> Result<Address, ChainReadError>;

    /// `ACL.getPermissionParamsLength(entity, app, permission)`.
    async fn permission_params_length(
        &self,
        acl: Address,
        entity: Address,
        app: Address,
        permission: B256,
        block: u64,
    ) -> Result<u64, ChainReadError>;
}

/// Identifier a role or permission named `name` conventionally has:
/// `keccak256(name)`, or zero for [`DEFAULT_ADMIN_ROLE`].
pub fn role_id_from_name(name: &str) -> B256 {
    if name == DEFAULT_ADMIN_ROLE {
        B256::ZERO
    } else {
        keccak256(name.as_bytes())
    }
}
