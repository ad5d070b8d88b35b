use thiserror::Error;

use crate::models::{Leg, PositionState};

/// Failure talking to the ledger RPC, the relay or the webhook provider API.
/// Always recoverable: callers retry or keep the last known-good value.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} returned rpc error {code}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("unexpected response from {method}: {reason}")]
    Decode { method: String, reason: String },
}

/// Inbound data that does not match the shape we expect from the provider.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedInputError {
    #[error("payload is not an array")]
    NotAnArray,

    #[error("record {index} could not be decoded: {reason}")]
    Record { index: usize, reason: String },

    #[error("invalid base58 {kind} '{value}'")]
    InvalidKey { kind: &'static str, value: String },

    #[error("instruction has {found} accounts, expected at least {expected}")]
    MissingAccounts { expected: usize, found: usize },

    #[error("instruction data too short: {found} bytes, expected {expected}")]
    ShortData { expected: usize, found: usize },
}

/// Raised by the bundle submitter before or while handing a bundle to the relay.
/// No submission record exists when this is returned.
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("bundle has no instructions")]
    EmptyBundle,

    #[error("snapshot at slot {slot} is {age_ms}ms old, freshness window is {window_ms}ms")]
    StaleSnapshot {
        slot: u64,
        age_ms: i64,
        window_ms: i64,
    },

    #[error("no usable chain snapshot")]
    NoUsableSnapshot,

    #[error("failed to build bundle: {0}")]
    Build(String),

    #[error("relay submission failed: {0}")]
    Relay(#[from] UpstreamError),
}

/// Rejected position state machine request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("{event} not allowed from {from}")]
    InvalidTransition {
        from: PositionState,
        event: &'static str,
    },

    #[error("guard failed for {event} in {state}: {reason}")]
    GuardFailed {
        state: PositionState,
        event: &'static str,
        reason: &'static str,
    },

    #[error("asset {0} already has an active position")]
    AlreadyTracked(String),

    #[error("active position limit reached ({active}/{limit})")]
    CapacityReached { active: usize, limit: usize },

    #[error("event slot {event_slot} is {lag} slots behind the tracked slot")]
    OutOfScope { event_slot: u64, lag: u64 },

    #[error("no position tracked for asset {0}")]
    UnknownAsset(String),
}

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("initial chain state refresh failed: {0}")]
    InitialRefresh(#[source] UpstreamError),
}

/// Error taxonomy of the pipeline. Every catch site in the core maps what it
/// handles onto one of these; none of them is process-fatal.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("transient upstream error: {0}")]
    TransientUpstream(#[from] UpstreamError),

    #[error("malformed input: {0}")]
    MalformedInput(#[from] MalformedInputError),

    #[error("bundle {bundle_id} for {leg} rejected: {reason}")]
    SubmissionRejected {
        bundle_id: String,
        leg: Leg,
        reason: String,
    },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl From<TransitionError> for PipelineError {
    fn from(err: TransitionError) -> Self {
        PipelineError::InvariantViolation(err.to_string())
    }
}
