//! In-process message router
//!
//! One router task drains the shared outbound stream in arrival order and
//! fans every envelope out to its recipients, one after the other. A message
//! is never handed back to its sender. Failed deliveries are reported on the
//! failure channel and never retried.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::messages::MessageEnvelope;
use crate::engine::{ProtocolEngine, Routing};
use crate::error::{DeliveryError, ReshareError, Result};
use crate::party::PartyId;

/// Immutable id -> engine lookup, built once per run.
pub struct RoutingTable<E> {
    parties: Vec<PartyId>,
    engines: HashMap<String, (PartyId, Arc<E>)>,
}

impl<E: ProtocolEngine> RoutingTable<E> {
    pub fn new() -> Self {
        Self {
            parties: Vec::new(),
            engines: HashMap::new(),
        }
    }

    /// Registers the engine of `party`.
    pub fn insert(&mut self, party: PartyId, engine: Arc<E>) -> Result<()> {
        if self.engines.contains_key(party.id()) {
            return Err(ReshareError::InvalidParty(format!(
                "{} registered twice",
                party
            )));
        }
        self.parties.push(party.clone());
        self.engines
            .insert(party.id().to_string(), (party, engine));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&(PartyId, Arc<E>)> {
        self.engines.get(id)
    }

    /// Registered parties in registration order.
    pub fn parties(&self) -> &[PartyId] {
        &self.parties
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }
}

impl<E: ProtocolEngine> Default for RoutingTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters reported by the router when it stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    /// Envelopes taken off the shared stream
    pub envelopes: usize,
    /// Successful `consume` calls
    pub deliveries: usize,
    /// Recipients skipped because they were the sender
    pub self_skips: usize,
    pub failures: usize,
}

pub struct Router<E> {
    table: Arc<RoutingTable<E>>,
    inbox: mpsc::Receiver<MessageEnvelope>,
    failures: mpsc::UnboundedSender<DeliveryError>,
    stats: RouterStats,
}

impl<E: ProtocolEngine> Router<E> {
    pub fn new(
        table: Arc<RoutingTable<E>>,
        inbox: mpsc::Receiver<MessageEnvelope>,
        failures: mpsc::UnboundedSender<DeliveryError>,
    ) -> Self {
        Self {
            table,
            inbox,
            failures,
            stats: RouterStats::default(),
        }
    }

    /// Routes envelopes until the stream closes or `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> RouterStats {
        if *shutdown.borrow() {
            return self.stats;
        }

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Router shutting down");
                        break;
                    }
                }
                next = self.inbox.recv() => match next {
                    Some(envelope) => self.route(&envelope),
                    None => {
                        debug!("Outbound stream closed; router exiting");
                        break;
                    }
                },
            }
        }

        debug!(
            "Router stopped: {} envelopes, {} deliveries, {} failures",
            self.stats.envelopes, self.stats.deliveries, self.stats.failures
        );
        self.stats
    }

    /// Delivers one envelope to every recipient except its sender.
    pub fn route(&mut self, envelope: &MessageEnvelope) {
        self.stats.envelopes += 1;
        let table = Arc::clone(&self.table);

        let recipients: Vec<&str> = match &envelope.routing {
            Routing::Broadcast => table.parties().iter().map(|p| p.id()).collect(),
            Routing::To(parties) => parties.iter().map(|p| p.id()).collect(),
        };

        debug!(
            ">>> {} sending {} [{}] to {} recipient(s)",
            envelope.from,
            envelope.type_tag,
            envelope.short_id(),
            recipients.len()
        );

        for to in recipients {
            if to == envelope.from.id() {
                debug!("Ignoring message from self: {}", envelope.from);
                self.stats.self_skips += 1;
                continue;
            }

            let Some((recipient, engine)) = table.get(to) else {
                self.report(DeliveryError::UnknownRecipient {
                    from: envelope.from.clone(),
                    to: to.to_string(),
                    message: envelope.short_id(),
                });
                continue;
            };

            match engine.consume(&envelope.payload, &envelope.from, envelope.is_broadcast()) {
                Ok(true) => {
                    self.stats.deliveries += 1;
                    debug!(">>> {} updated party {} with message", envelope.from, recipient);
                }
                Ok(false) => self.report(DeliveryError::Rejected {
                    from: envelope.from.clone(),
                    to: recipient.clone(),
                    message: envelope.short_id(),
                }),
                Err(source) => self.report(DeliveryError::Failed {
                    from: envelope.from.clone(),
                    to: recipient.clone(),
                    message: envelope.short_id(),
                    source,
                }),
            }
        }
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    fn report(&mut self, error: DeliveryError) {
        self.stats.failures += 1;
        warn!("{error}");
        // The orchestrator may already be gone when a run is being torn down.
        let _ = self.failures.send(error);
    }
}
