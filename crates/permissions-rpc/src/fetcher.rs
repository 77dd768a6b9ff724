//! Paginated, resumable collection of permission events.
//!
//! Every page fans out one query per `(contract, topic)` pair, merges the
//! answers into one globally ordered sequence and decodes it. The events
//! cache is saved after every page.

use crate::source::{
    LogSource,
    SourceError,
};
use alloy_primitives::{
    Address,
    B256,
};
use futures::future::try_join_all;
use permissions_core::{
    CacheError,
    DecodeError,
    DecodedEvent,
    EventsCache,
    cache::{
        DEFAULT_BLOCKS_PER_REQUEST,
        page_ranges,
    },
    decode_log,
    events::{
        LEGACY_TOPICS,
        ROLE_TOPICS,
    },
};
use std::{
    path::Path,
    time::Duration,
};
use thiserror::Error;
use tracing::{
    debug,
    info,
    warn,
};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(
        "eth_getLogs for {address} topic {topic} in [{from_block}, {to_block}] failed after {attempts} attempts"
    )]
    Source {
        address: Address,
        topic: B256,
        from_block: u64,
        to_block: u64,
        attempts: u32,
        #[source]
        source: SourceError,
    },
    #[error("Failed to read the latest block")]
    Head(#[source] SourceError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetcherConfig {
    pub blocks_per_request: u64,
    /// Attempts per query, the first one included.
    pub max_attempts: u32,
    pub max_backoff: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            blocks_per_request: DEFAULT_BLOCKS_PER_REQUEST,
            max_attempts: 5,
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Fetches the legacy ACL events and the role events of every role-based
/// contract.
#[derive(Debug)]
pub struct LogFetcher<S> {
    source: S,
    config: FetcherConfig,
    queries: Vec<(Address, B256)>,
}

impl<S: LogSource> LogFetcher<S> {
    pub fn new(source: S, config: FetcherConfig, acl: Address, role_contracts: &[Address]) -> Self {
        let mut queries: Vec<(Address, B256)> =
            LEGACY_TOPICS.iter().map(|topic| (acl, *topic)).collect();
        for contract in role_contracts {
            queries.extend(ROLE_TOPICS.iter().map(|topic| (*contract, *topic)));
        }
        Self {
            source,
            config,
            queries,
        }
    }

    async fn get_logs_with_retry(
        &self,
        address: Address,
        topic: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<permissions_core::RawLog>, FetchError> {
        let mut backoff = Duration::from_secs(0);
        let mut attempt = 1;
        loop {
            match self
                .source
                .get_logs(address, topic, from_block, to_block)
                .await
            {
                Ok(logs) => return Ok(logs),
                Err(error) if attempt < self.config.max_attempts => {
                    backoff = ((backoff + Duration::from_secs(1)) * 2).min(self.config.max_backoff);
                    warn!(
                        error = ?error,
                        %address,
                        from_block,
                        to_block,
                        attempt,
                        "eth_getLogs failed, retrying in {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(FetchError::Source {
                        address,
                        topic,
                        from_block,
                        to_block,
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }

    /// Decoded events of `[from_block, to_block]` in chain order.
    pub async fn fetch_page(&self, from_block: u64, to_block: u64) -> Result<Vec<DecodedEvent>, FetchError> {
        let pages = try_join_all(self.queries.iter().map(|(address, topic)| {
            self.get_logs_with_retry(*address, *topic, from_block, to_block)
        }))
        .await?;

        let mut logs: Vec<_> = pages
            .into_iter()
            .flatten()
            .filter(|log| {
                if log.removed {
                    warn!(position = %log.position, tx = %log.transaction_hash, "dropping removed log");
                }
                !log.removed
            })
            .collect();
        logs.sort_by_key(|log| log.position);

        let events = logs
            .iter()
            .map(decode_log)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(from_block, to_block, events = events.len(), "fetched page");
        Ok(events)
    }

    /// Extends `cache` up to `head`, saving it to `path` after each page.
    /// Returns the number of new events.
    pub async fn collect(
        &self,
        cache: &mut EventsCache,
        head: u64,
        path: &Path,
    ) -> Result<usize, FetchError> {
        let resume_from = cache.resume_from();
        let pages = page_ranges(resume_from, head, self.config.blocks_per_request);
        if pages.is_empty() {
            info!(to_block = cache.to_block, head, "events cache is up to date");
            return Ok(0);
        }

        let mut collected = 0;
        for (from_block, to_block) in pages {
            let events = self.fetch_page(from_block, to_block).await?;
            collected += events.len();
            cache.append(to_block, events)?;
            cache.save(path)?;
            info!(
                from_block,
                to_block,
                head,
                total_events = cache.events.len(),
                "collected events page"
            );
        }
        Ok(collected)
    }

    /// Reads the node head and collects up to it.
    pub async fn collect_to_head(&self, cache: &mut EventsCache, path: &Path) -> Result<usize, FetchError> {
        let head = self.source.head_block().await.map_err(FetchError::Head)?;
        self.collect(cache, head, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockLogSource;
    use alloy_primitives::LogData;
    use alloy_sol_types::SolEvent;
    use permissions_core::{
        LogPosition,
        PermissionEvent,
        RawLog,
        events::RoleGranted,
    };

    const ACL: Address = Address::repeat_byte(0x01);
    const MODULE: Address = Address::repeat_byte(0x02);

    fn fast_config(blocks_per_request: u64) -> FetcherConfig {
        FetcherConfig {
            blocks_per_request,
            max_attempts: 3,
            max_backoff: Duration::ZERO,
        }
    }

    fn granted(block: u64, log_index: u64, removed: bool) -> RawLog {
        let (topics, data) = LogData::split(
            RoleGranted {
                role: B256::ZERO,
                account: Address::with_last_byte(u8::try_from(block % 256).unwrap()),
                sender: ACL,
            }
            .encode_log_data(),
        );
        RawLog {
            address: MODULE,
            topics,
            data,
            position: LogPosition::new(block, 0, log_index),
            transaction_hash: B256::repeat_byte(0xab),
            block_hash: None,
            removed,
        }
    }

    #[tokio::test]
    async fn page_is_merged_sorted_and_filtered() {
        let mut source = MockLogSource::new();
        source
            .expect_get_logs()
            .times(6)
            .returning(|address, topic, _, _| {
                if address == MODULE && topic == RoleGranted::SIGNATURE_HASH {
                    Ok(vec![granted(9, 0, false), granted(3, 1, false), granted(5, 0, true)])
                } else {
                    Ok(vec![])
                }
            });

        let fetcher = LogFetcher::new(source, fast_config(10), ACL, &[MODULE]);
        let events = fetcher.fetch_page(0, 10).await.unwrap();
        let blocks: Vec<u64> = events.iter().map(|e| e.position.block_number).collect();
        assert_eq!(blocks, vec![3, 9]);
        assert!(matches!(events[0].event, PermissionEvent::RoleGranted { .. }));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let mut source = MockLogSource::new();
        let mut failures = 2;
        source.expect_get_logs().returning(move |_, _, _, _| {
            if failures > 0 {
                failures -= 1;
                Err(SourceError::InvalidLog(DecodeError::MissingLogField("logIndex")))
            } else {
                Ok(vec![])
            }
        });

        let fetcher = LogFetcher::new(source, fast_config(10), ACL, &[]);
        assert!(fetcher.fetch_page(0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persistent_errors_surface_after_max_attempts() {
        let mut source = MockLogSource::new();
        source
            .expect_get_logs()
            .returning(|_, _, _, _| Err(SourceError::InvalidLog(DecodeError::MissingLogField("blockNumber"))));

        let fetcher = LogFetcher::new(source, fast_config(10), ACL, &[]);
        let err = fetcher.fetch_page(0, 10).await.unwrap_err();
        assert!(matches!(err, FetchError::Source { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn collect_pages_and_persists_each_page() {
        let mut source = MockLogSource::new();
        source
            .expect_get_logs()
            .returning(|address, topic, from, to| {
                assert!(from <= to);
                if address == MODULE && topic == RoleGranted::SIGNATURE_HASH && from <= 15 && 15 <= to {
                    Ok(vec![granted(15, 0, false)])
                } else {
                    Ok(vec![])
                }
            });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hoodi.json");
        let fetcher = LogFetcher::new(source, fast_config(9), ACL, &[MODULE]);

        let mut cache = EventsCache::genesis(1);
        let collected = fetcher.collect(&mut cache, 25, &path).await.unwrap();
        assert_eq!(collected, 1);
        assert_eq!(cache.to_block, 25);

        let saved = EventsCache::load(&path).unwrap();
        assert_eq!(saved, cache);
        assert_eq!(saved.resume_from(), 26);

        let mut cache = saved;
        assert_eq!(fetcher.collect(&mut cache, 25, &path).await.unwrap(), 0);
    }
}
