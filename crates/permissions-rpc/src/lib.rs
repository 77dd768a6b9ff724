//! RPC-facing collaborators of `permissions-core`: paginated log
//! collection and contract reads over an alloy provider.

#![allow(clippy::missing_errors_doc)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::unreachable)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod fetcher;
pub mod reader;
pub mod source;

use alloy_provider::{
    Provider,
    ProviderBuilder,
    RootProvider,
};
use alloy_transport::TransportError;
use std::sync::Arc;

pub use fetcher::{
    FetchError,
    FetcherConfig,
    LogFetcher,
};
pub use reader::RpcChainReader;
pub use source::{
    AlloyLogSource,
    LogSource,
    SourceError,
};

/// Connects to an execution node over HTTP or WebSocket, depending on the
/// URL scheme.
pub async fn connect_provider(rpc_url: &str) -> Result<Arc<RootProvider>, TransportError> {
    let provider = ProviderBuilder::new().connect(rpc_url).await?;
    Ok(Arc::new(provider.root().clone()))
}
