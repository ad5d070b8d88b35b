pub mod client;
pub mod tracker;

pub use client::{ChainClient, RecentBlockhash, RpcChainClient};
pub use tracker::{ChainStateTracker, RefreshOutcome, TrackerHealth};
