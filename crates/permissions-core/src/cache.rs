//! Resumable on-disk cache of decoded events.

use crate::events::DecodedEvent;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};
use thiserror::Error;
use tracing::debug;

/// Default page size for `eth_getLogs` queries.
pub const DEFAULT_BLOCKS_PER_REQUEST: u64 = 5_000;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to read events cache {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write events cache {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse events cache {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to serialize events cache")]
    Serialize(#[source] serde_json::Error),
    #[error("Page ending at block {to_block} does not extend cache ending at block {cached_to}")]
    NonContiguous { cached_to: u64, to_block: u64 },
    #[error("Event at block {block} precedes the resume point {resume_from}")]
    EventBeforeResumePoint { block: u64, resume_from: u64 },
}

/// `{ fromBlock, toBlock, events }` as persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsCache {
    pub from_block: u64,
    pub to_block: u64,
    pub events: Vec<DecodedEvent>,
    /// Whether at least one page has been stored. A fresh cache starts at
    /// the genesis block without having fetched it.
    #[serde(skip)]
    persisted: bool,
}

impl EventsCache {
    /// Empty cache starting at the network's genesis block.
    pub fn genesis(genesis_block: u64) -> Self {
        Self {
            from_block: genesis_block,
            to_block: genesis_block,
            events: Vec::new(),
            persisted: false,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| {
            CacheError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let mut cache: Self = serde_json::from_str(&contents).map_err(|source| {
            CacheError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        cache.persisted = true;
        debug!(
            path = %path.display(),
            from_block = cache.from_block,
            to_block = cache.to_block,
            events = cache.events.len(),
            "loaded events cache"
        );
        Ok(cache)
    }

    /// Loads `path` when it exists, otherwise starts at `genesis_block`.
    pub fn load_or_genesis(path: impl AsRef<Path>, genesis_block: u64) -> Result<Self, CacheError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::genesis(genesis_block))
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CacheError> {
        let path = path.as_ref();
        let write_err = |source| {
            CacheError::Write {
                path: path.to_path_buf(),
                source,
            }
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(CacheError::Serialize)?;
        fs::write(path, json).map_err(write_err)
    }

    /// First block that still needs fetching.
    pub fn resume_from(&self) -> u64 {
        if self.persisted {
            self.to_block + 1
        } else {
            self.from_block
        }
    }

    /// Appends one fetched page `[resume_from, to_block]`.
    pub fn append(&mut self, to_block: u64, events: Vec<DecodedEvent>) -> Result<(), CacheError> {
        let resume_from = self.resume_from();
        if to_block.saturating_add(1) < resume_from {
            return Err(CacheError::NonContiguous {
                cached_to: self.to_block,
                to_block,
            });
        }
        if let Some(event) = events
            .iter()
            .find(|event| event.position.block_number < resume_from)
        {
            return Err(CacheError::EventBeforeResumePoint {
                block: event.position.block_number,
                resume_from,
            });
        }
        self.events.extend(events);
        self.to_block = to_block;
        self.persisted = true;
        Ok(())
    }
}

/// Inclusive `[from, to]` windows covering `[from, head]`, each at most
/// `blocks_per_request + 1` blocks wide.
pub fn page_ranges(from: u64, head: u64, blocks_per_request: u64) -> Vec<(u64, u64)> {
    let mut pages = Vec::new();
    let mut from = from;
    while from <= head {
        let to = from.saturating_add(blocks_per_request).min(head);
        pages.push((from, to));
        if to == u64::MAX {
            break;
        }
        from = to + 1;
    }
    pages
}
