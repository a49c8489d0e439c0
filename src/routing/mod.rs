//! Message routing between the engines of one resharing run
//!
//! ```text
//!  engine A ──► adapter A ──┐
//!  engine B ──► adapter B ──┼──► shared stream ──► Router ──► engine.consume()
//!  engine C ──► adapter C ──┘      (bounded)
//! ```
//!
//! Every engine writes to its own private queue; an adapter tags each message
//! with the sender identity and forwards it onto the shared stream. The
//! router is the only caller of `consume` on any engine.

pub mod messages;
pub mod router;

pub use messages::{MessageEnvelope, MessageId};
pub use router::{Router, RouterStats, RoutingTable};
