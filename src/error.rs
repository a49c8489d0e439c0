//! Error types for the resharing orchestrator
use std::time::Duration;

use num_bigint::BigUint;

use crate::party::PartyId;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReshareError>;

/// Errors raised by a protocol engine.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine could not start; fatal to the whole run.
    #[error("startup failed: {0}")]
    Startup(String),
    /// An inbound payload could not be decoded
    #[error("malformed message: {0}")]
    Malformed(String),
    /// The cryptographic protocol detected an inconsistency
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// A second terminal event was emitted
    #[error("engine already reported its final result")]
    AlreadyFinished,
    /// The orchestrator side of a channel is gone (run shut down)
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),
}

/// A message could not be handed to one of its recipients.
///
/// Delivery errors are recoverable at the message level; the router records
/// them and carries on with the remaining recipients.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("message {message} from {from}: no engine registered for recipient {to}")]
    UnknownRecipient {
        from: PartyId,
        to: String,
        message: String,
    },
    #[error("message {message} from {from}: rejected by {to}")]
    Rejected {
        from: PartyId,
        to: PartyId,
        message: String,
    },
    #[error("message {message} from {from}: {to} failed to consume it: {source}")]
    Failed {
        from: PartyId,
        to: PartyId,
        message: String,
        #[source]
        source: EngineError,
    },
}

impl DeliveryError {
    /// Sender of the undeliverable message.
    pub fn sender(&self) -> &PartyId {
        match self {
            DeliveryError::UnknownRecipient { from, .. }
            | DeliveryError::Rejected { from, .. }
            | DeliveryError::Failed { from, .. } => from,
        }
    }

    /// Id of the intended recipient.
    pub fn recipient_id(&self) -> &str {
        match self {
            DeliveryError::UnknownRecipient { to, .. } => to,
            DeliveryError::Rejected { to, .. } | DeliveryError::Failed { to, .. } => to.id(),
        }
    }
}

/// Completion bookkeeping errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    #[error("duplicate completion reported for {0}")]
    Duplicate(PartyId),
    #[error("completion reported for {0}, which is not a member of the new committee")]
    Unexpected(PartyId),
    #[error("missing completions for {}", format_parties(.0))]
    Missing(Vec<PartyId>),
}

/// Errors surfaced by a resharing run.
#[derive(thiserror::Error, Debug)]
pub enum ReshareError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid party: {0}")]
    InvalidParty(String),
    #[error("pre-parameter generation failed for {party}: {source}")]
    PreParams {
        party: PartyId,
        #[source]
        source: EngineError,
    },
    #[error("pre-parameter generation for {party} did not finish within {limit:?}")]
    PreParamsTimeout { party: PartyId, limit: Duration },
    #[error("party {party} failed to start: {source}")]
    Startup {
        party: PartyId,
        #[source]
        source: EngineError,
    },
    #[error("party {party} aborted: {source}")]
    Engine {
        party: PartyId,
        #[source]
        source: EngineError,
    },
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("aggregation error: {0}")]
    Aggregation(#[from] AggregationError),
    #[error(
        "run timed out after {elapsed:?}; still waiting for {} ({delivery_failures} delivery failures)",
        format_parties(.outstanding)
    )]
    Timeout {
        elapsed: Duration,
        outstanding: Vec<PartyId>,
        delivery_failures: usize,
    },
    #[error("reconstructed secret {actual:#x} does not match original secret {expected:#x}")]
    Verification { expected: BigUint, actual: BigUint },
    #[error("task error: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for ReshareError {
    fn from(err: tokio::task::JoinError) -> Self {
        ReshareError::Task(err.to_string())
    }
}

fn format_parties(parties: &[PartyId]) -> String {
    let ids: Vec<&str> = parties.iter().map(|p| p.id()).collect();
    format!("[{}]", ids.join(", "))
}
