#![doc = include_str!("../README.md")]
#![allow(clippy::missing_errors_doc)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::unreachable)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![warn(clippy::indexing_slicing)]
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::indexing_slicing))]

pub mod bytes;
pub mod cache;
pub mod chain;
pub mod config;
pub mod events;
pub mod plan;
pub mod reconcile;
pub mod reducer;
pub mod report;
pub mod snapshot;

pub use cache::{
    CacheError,
    EventsCache,
};
pub use chain::{
    ChainReadError,
    ChainReader,
};
pub use config::{
    ConfigError,
    LabelBook,
    Network,
    TargetConfig,
};
pub use events::{
    DecodeError,
    DecodedEvent,
    LogPosition,
    PermissionEvent,
    RawLog,
    decode_log,
};
pub use plan::{
    PlanIssue,
    TransitionPlan,
    TransitionStep,
};
pub use reconcile::{
    ReconcileError,
    ReconcileOptions,
    Reconciliation,
    reconcile,
};
pub use reducer::{
    EventReducer,
    ReducerError,
    replay,
};
pub use report::render_markdown;
pub use snapshot::Snapshot;
