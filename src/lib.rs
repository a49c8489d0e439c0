//! In-process secret resharing orchestrator
//!
//! Drives one resharing run: an old committee (typically a single importer
//! holding the whole secret) hands its secret over to a new committee as
//! additive shares. Every party is an opaque protocol engine living in the
//! same process; this crate builds them, routes their messages and collects
//! their results.
//!
//! ## Key Components
//!
//! - **Parties**: [`party::PartyId`], [`party::PeerGroup`] and the committee
//!   parameters
//! - **Engines**: the [`engine::ProtocolEngine`] / [`engine::EngineFactory`]
//!   capability the orchestrator is generic over
//! - **Routing**: one router task fanning envelopes out to their recipients
//! - **Orchestrator**: the run state machine, deadlines and cancellation
//! - **Aggregation**: completion barrier and the modular-sum reconstruction
//!   check
//! - **Backends**: a reference additive engine over secp256k1, ed25519 and
//!   BLS12-381 G1
//!
//! ## Example
//!
//! ```rust,no_run
//! use num_bigint::BigUint;
//! use reshare_orchestrator::{
//!     backend::{ResharingSetup, Secp256k1},
//!     config::RunConfig,
//!     orchestrator::Orchestrator,
//!     party::{PartyId, PeerGroup, ResharingParameters},
//! };
//!
//! # async fn run() -> reshare_orchestrator::Result<()> {
//! let importer = PartyId::new("importer", "Importer", 0)?;
//! let signers = (1..=3)
//!     .map(|i| PartyId::new(format!("signer{i}"), format!("Signer{i}"), i))
//!     .collect::<reshare_orchestrator::Result<Vec<_>>>()?;
//! let params = ResharingParameters::new(
//!     PeerGroup::new(vec![importer])?,
//!     PeerGroup::new(signers)?,
//!     0,
//!     2,
//! )?;
//!
//! let secret = BigUint::from(0xffu32);
//! let setup = ResharingSetup::<Secp256k1>::new(params.clone(), &secret)?;
//! let mut orchestrator = Orchestrator::new(params, RunConfig::default(), setup);
//! let report = orchestrator.run(&secret).await?;
//! assert_eq!(report.results.len(), 3);
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod party;
pub mod routing;
pub mod security;

pub use aggregator::{ProtocolResult, ResultAggregator, SecretShare};
pub use config::{DeliveryPolicy, RunConfig};
pub use engine::{EngineFactory, EngineHandle, ProtocolEngine, Role, Routing, WireMessage};
pub use error::{AggregationError, DeliveryError, EngineError, ReshareError, Result};
pub use orchestrator::{Orchestrator, RunPhase, RunReport};
pub use party::{PartyId, PeerGroup, ResharingParameters};
