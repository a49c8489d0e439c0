//! Capability interface for the per-party cryptographic state machine
//!
//! The orchestrator never looks inside an engine. It only needs to:
//!   * build one engine per party through an [`EngineFactory`]
//!   * call [`ProtocolEngine::start`] once
//!   * feed inbound payloads through [`ProtocolEngine::consume`]
//!   * observe outbound messages and the single terminal event emitted
//!     through the party's [`EngineHandle`]

use std::sync::Mutex;

use num_bigint::BigUint;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::EngineError;
use crate::party::PartyId;

/// Which committee a party belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Old,
    New,
}

/// Routing header attached by an engine to every outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routing {
    /// Deliver to every other party of the run
    Broadcast,
    /// Deliver to the listed parties only
    To(Vec<PartyId>),
}

impl Routing {
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Routing::Broadcast)
    }
}

/// An outbound message as produced by an engine, before the sender tag is
/// attached.
#[derive(Debug, Clone)]
pub struct WireMessage {
    pub payload: Vec<u8>,
    pub routing: Routing,
    /// Round/type label; only meaningful to the engine
    pub type_tag: String,
}

impl WireMessage {
    pub fn new(payload: Vec<u8>, routing: Routing, type_tag: impl Into<String>) -> Self {
        Self {
            payload,
            routing,
            type_tag: type_tag.into(),
        }
    }
}

/// Terminal event of an engine.
pub type EngineOutcome<O> = Result<O, EngineError>;

/// Per-party plumbing handed to an engine at construction time.
///
/// Outbound messages go to a private queue drained by the orchestrator's
/// outbound adapter. The terminal event can be emitted exactly once.
pub struct EngineHandle<O> {
    party: PartyId,
    /// Unbounded on purpose: `consume` is synchronous and runs on the router
    /// task, so a send from inside it must never wait for capacity. The
    /// bounded shared stream paces the adapters draining this queue; it does
    /// not cap what an engine may queue here.
    outbound: mpsc::UnboundedSender<WireMessage>,
    completion: Mutex<Option<oneshot::Sender<EngineOutcome<O>>>>,
}

impl<O> EngineHandle<O> {
    pub fn new(
        party: PartyId,
        outbound: mpsc::UnboundedSender<WireMessage>,
        completion: oneshot::Sender<EngineOutcome<O>>,
    ) -> Self {
        Self {
            party,
            outbound,
            completion: Mutex::new(Some(completion)),
        }
    }

    /// The party this handle belongs to.
    pub fn party(&self) -> &PartyId {
        &self.party
    }

    /// Queues an outbound message.
    pub fn send(&self, message: WireMessage) -> Result<(), EngineError> {
        debug!("{} emitting {}", self.party, message.type_tag);
        self.outbound
            .send(message)
            .map_err(|_| EngineError::ChannelClosed("outbound"))
    }

    /// Emits the terminal event.
    ///
    /// # Errors
    /// [`EngineError::AlreadyFinished`] on a second call.
    pub fn finish(&self, outcome: EngineOutcome<O>) -> Result<(), EngineError> {
        let sender = self
            .completion
            .lock()
            .map_err(|_| EngineError::Protocol("completion lock poisoned".into()))?
            .take()
            .ok_or(EngineError::AlreadyFinished)?;
        sender
            .send(outcome)
            .map_err(|_| EngineError::ChannelClosed("completion"))
    }

    pub fn is_finished(&self) -> bool {
        self.completion
            .lock()
            .map(|slot| slot.is_none())
            .unwrap_or(true)
    }
}

/// Opaque per-party protocol state machine.
///
/// Implementations must tolerate `consume` being called while `start` is
/// still running on another thread, and must never be driven by more than
/// one router.
pub trait ProtocolEngine: Send + Sync + 'static {
    /// Final save data published on success.
    type Output: Send + 'static;

    /// Kicks the state machine off. An error here is fatal to the whole run.
    fn start(&self) -> Result<(), EngineError>;

    /// Feeds one inbound message. `Ok(false)` means the message was refused
    /// without the engine failing.
    fn consume(&self, payload: &[u8], from: &PartyId, is_broadcast: bool)
        -> Result<bool, EngineError>;
}

/// Builds engines for one backend; selected once per run.
pub trait EngineFactory: Send + Sync + 'static {
    type Engine: ProtocolEngine;

    /// Parameter bundle an engine needs before it can start (`()` if none).
    type PreParams: Send + 'static;

    /// Generates the parameter bundle for `party`. Runs on a blocking thread
    /// under the configured deadline.
    fn pre_params(&self, party: &PartyId) -> Result<Self::PreParams, EngineError>;

    fn build(
        &self,
        party: &PartyId,
        role: Role,
        pre_params: Self::PreParams,
        handle: EngineHandle<<Self::Engine as ProtocolEngine>::Output>,
    ) -> Result<Self::Engine, EngineError>;

    /// Order of the group the shares live in.
    fn group_order(&self) -> BigUint;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_finishes_once() {
        let party = PartyId::new("p1", "P1", 1).unwrap();
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (done_tx, mut done_rx) = oneshot::channel();
        let handle = EngineHandle::<u32>::new(party, out_tx, done_tx);

        assert!(!handle.is_finished());
        handle.finish(Ok(7)).unwrap();
        assert!(handle.is_finished());
        assert_eq!(handle.finish(Ok(8)), Err(EngineError::AlreadyFinished));
        assert_eq!(done_rx.try_recv().unwrap(), Ok(7));
    }

    #[test]
    fn test_send_never_waits_for_a_reader() {
        let party = PartyId::new("p1", "P1", 1).unwrap();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (done_tx, _done_rx) = oneshot::channel::<EngineOutcome<()>>();
        let handle = EngineHandle::new(party, out_tx, done_tx);

        // Far beyond the shared stream's default capacity, nobody draining.
        for i in 0..1_000u32 {
            let msg = WireMessage::new(i.to_le_bytes().to_vec(), Routing::Broadcast, "burst");
            handle.send(msg).unwrap();
        }
        assert_eq!(out_rx.len(), 1_000);
        assert_eq!(out_rx.try_recv().unwrap().payload, 0u32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_send_after_shutdown() {
        let party = PartyId::new("p1", "P1", 1).unwrap();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (done_tx, _done_rx) = oneshot::channel::<EngineOutcome<()>>();
        let handle = EngineHandle::new(party, out_tx, done_tx);
        drop(out_rx);

        let msg = WireMessage::new(vec![1, 2, 3], Routing::Broadcast, "test");
        assert_eq!(
            handle.send(msg),
            Err(EngineError::ChannelClosed("outbound"))
        );
    }
}
