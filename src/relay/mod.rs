pub mod builder;
pub mod client;
pub mod pump;
pub mod submitter;

pub use builder::{BundleBuilder, TransactionBundleBuilder};
pub use client::{DryRunRelay, JitoRelayClient, RelayClient};
pub use submitter::{BundleSubmitter, SubmitterConfig};
