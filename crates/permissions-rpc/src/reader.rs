use alloy_eips::BlockId;
use alloy_primitives::{
    Address,
    B256,
    Bytes,
    U256,
    keccak256,
};
use alloy_provider::{
    Provider,
    RootProvider,
};
use alloy_rpc_types::{
    TransactionInput,
    TransactionRequest,
};
use alloy_sol_types::{
    SolCall,
    sol,
};
use async_trait::async_trait;
use permissions_core::{
    ChainReadError,
    ChainReader,
    bytes::word_to_address,
};
use std::sync::Arc;
use tracing::trace;

sol! {
    function getPermissionParamsLength(address entity, address app, bytes32 role) external view returns (uint256);
}

/// Calldata of a zero-argument getter: the 4-byte selector of `getter()`.
pub fn getter_calldata(getter: &str) -> Bytes {
    let hash = keccak256(format!("{getter}()").as_bytes());
    Bytes::copy_from_slice(&hash[..4])
}

/// [`ChainReader`] issuing `eth_call`s pinned to a block.
#[derive(Debug, Clone)]
pub struct RpcChainReader {
    provider: Arc<RootProvider>,
}

impl RpcChainReader {
    pub fn new(provider: Arc<RootProvider>) -> Self {
        Self { provider }
    }

    async fn call_word(
        &self,
        contract: Address,
        method: &str,
        calldata: Bytes,
        block: u64,
    ) -> Result<B256, ChainReadError> {
        let request = TransactionRequest::default()
            .to(contract)
            .input(TransactionInput::new(calldata));
        let output = self
            .provider
            .call(request)
            .block(BlockId::number(block))
            .await
            .map_err(|error| {
                ChainReadError::Call {
                    contract,
                    method: method.to_string(),
                    block,
                    message: error.to_string(),
                }
            })?;
        trace!(%contract, method, block, len = output.len(), "eth_call");
        return_word(contract, method, &output)
    }
}

/// First 32-byte word of a call's return data.
fn return_word(contract: Address, method: &str, output: &[u8]) -> Result<B256, ChainReadError> {
    output
        .get(..32)
        .map(B256::from_slice)
        .ok_or_else(|| {
            ChainReadError::InvalidReturnData {
                contract,
                method: method.to_string(),
                len: output.len(),
            }
        })
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn role_id(&self, contract: Address, name: &str, block: u64) -> Result<B256, ChainReadError> {
        self.call_word(contract, name, getter_calldata(name), block)
            .await
    }

    async fn address_getter(
        &self,
        contract: Address,
        getter: &str,
        block: u64,
    ) -> Result<Address, ChainReadError> {
        let word = self
            .call_word(contract, getter, getter_calldata(getter), block)
            .await?;
        Ok(word_to_address(&word))
    }

    async fn permission_params_length(
        &self,
        acl: Address,
        entity: Address,
        app: Address,
        permission: B256,
        block: u64,
    ) -> Result<u64, ChainReadError> {
        let calldata = getPermissionParamsLengthCall {
            entity,
            app,
            role: permission,
        }
        .abi_encode();
        let word = self
            .call_word(acl, "getPermissionParamsLength", calldata.into(), block)
            .await?;
        Ok(U256::from_be_bytes(word.0).saturating_to::<u64>())
    }
}
