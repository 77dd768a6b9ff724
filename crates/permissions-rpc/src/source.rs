//! `eth_getLogs` access behind a trait so pagination and retries can be
//! tested without a node.

use alloy_primitives::{
    Address,
    B256,
};
use alloy_provider::{
    Provider,
    RootProvider,
};
use alloy_rpc_types::{
    Filter,
    Log,
};
use alloy_transport::TransportError;
use async_trait::async_trait;
use permissions_core::{
    DecodeError,
    LogPosition,
    RawLog,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("RPC request failed")]
    Transport(#[from] TransportError),
    #[error("Node returned an unusable log")]
    InvalidLog(#[from] DecodeError),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Logs of `address` whose first topic is `topic`, in `[from_block, to_block]`.
    async fn get_logs(
        &self,
        address: Address,
        topic: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, SourceError>;

    /// Latest block number of the node.
    async fn head_block(&self) -> Result<u64, SourceError>;
}

/// Positions an RPC log; pending logs lack a position and are rejected.
pub fn raw_log(log: &Log) -> Result<RawLog, DecodeError> {
    let position = LogPosition::new(
        log.block_number
            .ok_or(DecodeError::MissingLogField("blockNumber"))?,
        log.transaction_index
            .ok_or(DecodeError::MissingLogField("transactionIndex"))?,
        log.log_index
            .ok_or(DecodeError::MissingLogField("logIndex"))?,
    );
    let transaction_hash = log
        .transaction_hash
        .ok_or(DecodeError::MissingLogField("transactionHash"))?;

    Ok(RawLog {
        address: log.address(),
        topics: log.topics().to_vec(),
        data: log.data().data.clone(),
        position,
        transaction_hash,
        block_hash: log.block_hash,
        removed: log.removed,
    })
}

/// [`LogSource`] over an alloy provider.
#[derive(Debug, Clone)]
pub struct AlloyLogSource {
    provider: Arc<RootProvider>,
}

impl AlloyLogSource {
    pub fn new(provider: Arc<RootProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl LogSource for AlloyLogSource {
    async fn get_logs(
        &self,
        address: Address,
        topic: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, SourceError> {
        let filter = Filter::new()
            .address(address)
            .event_signature(topic)
            .from_block(from_block)
            .to_block(to_block);
        let logs = self.provider.get_logs(&filter).await?;
        logs.iter()
            .map(|log| raw_log(log).map_err(SourceError::from))
            .collect()
    }

    async fn head_block(&self) -> Result<u64, SourceError> {
        Ok(self.provider.get_block_number().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{
        Bytes,
        LogData,
    };

    fn rpc_log() -> Log {
        Log {
            inner: alloy_primitives::Log {
                address: Address::repeat_byte(0x11),
                data: LogData::new_unchecked(
                    vec![B256::repeat_byte(0x01), B256::repeat_byte(0x02)],
                    Bytes::from(vec![0u8; 32]),
                ),
            },
            block_hash: Some(B256::repeat_byte(0xbb)),
            block_number: Some(120),
            transaction_hash: Some(B256::repeat_byte(0xcc)),
            transaction_index: Some(4),
            log_index: Some(9),
            ..Default::default()
        }
    }

    #[test]
    fn positions_mined_log() {
        let raw = raw_log(&rpc_log()).unwrap();
        assert_eq!(raw.position, LogPosition::new(120, 4, 9));
        assert_eq!(raw.address, Address::repeat_byte(0x11));
        assert_eq!(raw.topics.len(), 2);
        assert_eq!(raw.data.len(), 32);
        assert_eq!(raw.block_hash, Some(B256::repeat_byte(0xbb)));
        assert!(!raw.removed);
    }

    #[test]
    fn pending_log_is_rejected() {
        let mut log = rpc_log();
        log.log_index = None;
        assert_eq!(
            raw_log(&log).unwrap_err(),
            DecodeError::MissingLogField("logIndex")
        );

        let mut log = rpc_log();
        log.transaction_hash = None;
        assert_eq!(
            raw_log(&log).unwrap_err(),
            DecodeError::MissingLogField("transactionHash")
        );
    }
}
