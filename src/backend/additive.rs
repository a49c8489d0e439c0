//! Reference additive resharing engine
//!
//! The importer (the single old-committee party) holds the full secret `S`.
//! It splits `S` into one nonzero additive share per new member, broadcasts
//! the commitment `Y = S·G` and sends every member its share directly. Each
//! member then publishes `X_i = x_i·G` to the other members, and completes
//! once it holds every `X_j` and `Σ X_j == Y`.
//!
//! Messages may arrive before `start` or out of order across senders; the
//! engine buffers or records them as needed.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use ark_ec::CurveGroup;
use ark_ff::PrimeField;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::{rngs::StdRng, Rng, SeedableRng};
use blake2::{Blake2b512, Digest};
use num_bigint::BigUint;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::group_order;
use crate::aggregator::SecretShare;
use crate::engine::{EngineFactory, EngineHandle, ProtocolEngine, Role, Routing, WireMessage};
use crate::error::{EngineError, ReshareError, Result};
use crate::party::{PartyId, ResharingParameters};
use crate::security::{constant_time_eq, SensitiveScalar, SensitiveVec};

/// Save data of one party.
#[derive(Clone, Debug)]
pub struct KeyShare<G: CurveGroup> {
    xi: SensitiveScalar<G::ScalarField>,
    share_id: BigUint,
    /// Indices of the old committee
    ks: Vec<BigUint>,
    /// Public points of the old committee's shares
    old_big_xj: Vec<G>,
    /// Public points of the new committee's shares, in index order
    big_xj: Vec<G>,
    public_key: G,
}

impl<G: CurveGroup> KeyShare<G> {
    pub fn xi(&self) -> &SensitiveScalar<G::ScalarField> {
        &self.xi
    }

    pub fn share_id(&self) -> &BigUint {
        &self.share_id
    }

    pub fn ks(&self) -> &[BigUint] {
        &self.ks
    }

    pub fn old_big_xj(&self) -> &[G] {
        &self.old_big_xj
    }

    pub fn big_xj(&self) -> &[G] {
        &self.big_xj
    }

    pub fn public_key(&self) -> G {
        self.public_key
    }
}

impl<G: CurveGroup> SecretShare for KeyShare<G> {
    fn secret_share(&self) -> BigUint {
        self.xi.to_biguint()
    }
}

/// Wire format of the engine; points and scalars are compressed
/// `ark-serialize` bytes.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Zeroize)]
pub enum ReshareMessage {
    /// Importer to everyone: `S·G`
    Commitment { public_key: Vec<u8> },
    /// Importer to one new member: its additive share
    Share { share: Vec<u8> },
    /// New member to the other new members: `x_i·G`
    ShareCommitment { point: Vec<u8> },
}

impl ReshareMessage {
    pub fn type_tag(&self) -> &'static str {
        match self {
            ReshareMessage::Commitment { .. } => "Commitment",
            ReshareMessage::Share { .. } => "Share",
            ReshareMessage::ShareCommitment { .. } => "ShareCommitment",
        }
    }

    pub fn encode(&self) -> std::result::Result<Vec<u8>, EngineError> {
        bincode::serialize(self).map_err(|e| EngineError::Protocol(format!("encoding failed: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, EngineError> {
        bincode::deserialize(bytes).map_err(|e| EngineError::Malformed(e.to_string()))
    }
}

impl fmt::Debug for ReshareMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReshareMessage::Share { .. } => f.write_str("Share([REDACTED])"),
            other => write!(f, "{}", other.type_tag()),
        }
    }
}

/// Decoded inbound message.
enum Inbound<G: CurveGroup> {
    Commitment(G),
    Share(SensitiveScalar<G::ScalarField>),
    ShareCommitment(G),
}

impl<G: CurveGroup> Inbound<G> {
    fn decode(mut message: ReshareMessage) -> std::result::Result<Self, EngineError> {
        let inbound = match &message {
            ReshareMessage::Commitment { public_key } => Inbound::Commitment(read(public_key)?),
            ReshareMessage::Share { share } => Inbound::Share(SensitiveScalar::new(read(share)?)),
            ReshareMessage::ShareCommitment { point } => Inbound::ShareCommitment(read(point)?),
        };
        message.zeroize();
        Ok(inbound)
    }
}

fn write<T: CanonicalSerialize>(value: &T) -> std::result::Result<Vec<u8>, EngineError> {
    let mut bytes = Vec::new();
    value
        .serialize_compressed(&mut bytes)
        .map_err(|e| EngineError::Protocol(format!("serialization failed: {e}")))?;
    Ok(bytes)
}

fn read<T: CanonicalDeserialize>(bytes: &[u8]) -> std::result::Result<T, EngineError> {
    T::deserialize_compressed(bytes).map_err(|e| EngineError::Malformed(e.to_string()))
}

/// Per-party randomness seed.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PreParams {
    seed: [u8; 32],
}

impl PreParams {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { seed }
    }

    fn rng(&self) -> StdRng {
        StdRng::from_seed(self.seed)
    }
}

impl fmt::Debug for PreParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PreParams([REDACTED])")
    }
}

/// Splits `secret` into `n` nonzero shares summing to it.
fn split_nonzero<F: PrimeField, R: Rng + ?Sized>(
    secret: &F,
    n: usize,
    rng: &mut R,
) -> SensitiveVec<SensitiveScalar<F>> {
    loop {
        let mut shares: Vec<SensitiveScalar<F>> = (1..n)
            .map(|_| loop {
                let r = F::rand(rng);
                if !r.is_zero() {
                    break SensitiveScalar::new(r);
                }
            })
            .collect();
        let partial = shares
            .iter()
            .fold(F::zero(), |acc, s| acc + *s.expose_secret());
        let last = *secret - partial;
        if !last.is_zero() {
            shares.push(SensitiveScalar::new(last));
            return SensitiveVec::new(shares);
        }
    }
}

/// Key material and committees of one resharing run; builds the engines.
pub struct ResharingSetup<G: CurveGroup> {
    params: Arc<ResharingParameters>,
    importer: KeyShare<G>,
    seed: Option<[u8; 32]>,
}

impl<G: CurveGroup> ResharingSetup<G> {
    /// Prepares the importer's save data for `secret`.
    ///
    /// The old committee must consist of the importer alone, and the secret
    /// must satisfy `0 < secret < order`.
    pub fn new(params: ResharingParameters, secret: &BigUint) -> Result<Self> {
        let [importer] = params.old_committee().parties() else {
            return Err(ReshareError::Config(format!(
                "additive resharing needs exactly one importer, got {} old parties",
                params.old_party_count()
            )));
        };

        let order = group_order::<G>();
        if secret.bits() == 0 || *secret >= order {
            return Err(ReshareError::Config(
                "secret must be nonzero and smaller than the group order".to_string(),
            ));
        }

        let xi = G::ScalarField::from(secret.clone());
        let public_key = G::generator() * xi;
        let importer = KeyShare {
            xi: SensitiveScalar::new(xi),
            share_id: importer.key().clone(),
            ks: vec![importer.key().clone()],
            old_big_xj: vec![public_key],
            big_xj: vec![public_key],
            public_key,
        };

        Ok(Self {
            params: Arc::new(params),
            importer,
            seed: None,
        })
    }

    /// Derives every party's pre-params from `seed` instead of fresh entropy.
    pub fn with_seed(mut self, seed: [u8; 32]) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn public_key(&self) -> G {
        self.importer.public_key
    }

    pub fn parameters(&self) -> &ResharingParameters {
        &self.params
    }
}

impl<G: CurveGroup> EngineFactory for ResharingSetup<G> {
    type Engine = AdditiveEngine<G>;
    type PreParams = PreParams;

    fn pre_params(&self, party: &PartyId) -> std::result::Result<PreParams, EngineError> {
        let mut seed = [0u8; 32];
        match &self.seed {
            Some(run_seed) => {
                let mut hasher = Blake2b512::new();
                hasher.update(b"reshare-pre-params");
                hasher.update(run_seed);
                hasher.update(party.id().as_bytes());
                hasher.update(party.key().to_bytes_be());
                seed.copy_from_slice(&hasher.finalize()[..32]);
            }
            None => rand::rng().fill_bytes(&mut seed),
        }
        Ok(PreParams { seed })
    }

    fn build(
        &self,
        party: &PartyId,
        role: Role,
        pre_params: PreParams,
        handle: EngineHandle<KeyShare<G>>,
    ) -> std::result::Result<AdditiveEngine<G>, EngineError> {
        let committee = match role {
            Role::Old => self.params.old_committee(),
            Role::New => self.params.new_committee(),
        };
        if committee.get(party.id()) != Some(party) {
            return Err(EngineError::Startup(format!(
                "{} is not a member of the {:?} committee",
                party, role
            )));
        }

        let importer = match role {
            Role::Old => Some(self.importer.clone()),
            Role::New => None,
        };
        Ok(AdditiveEngine {
            party: party.clone(),
            role,
            params: Arc::clone(&self.params),
            handle,
            state: Mutex::new(EngineState {
                started: false,
                finished: false,
                importer,
                pre_params: Some(pre_params),
                seen: HashSet::new(),
                pending: Vec::new(),
                public_key: None,
                xi: None,
                big_xj: HashMap::new(),
            }),
        })
    }

    fn group_order(&self) -> BigUint {
        group_order::<G>()
    }
}

struct EngineState<G: CurveGroup> {
    started: bool,
    finished: bool,
    importer: Option<KeyShare<G>>,
    pre_params: Option<PreParams>,
    /// (sender id, message kind) pairs already accepted
    seen: HashSet<(String, &'static str)>,
    /// Accepted before `start`
    pending: Vec<(PartyId, Inbound<G>)>,
    public_key: Option<G>,
    xi: Option<SensitiveScalar<G::ScalarField>>,
    big_xj: HashMap<String, G>,
}

pub struct AdditiveEngine<G: CurveGroup> {
    party: PartyId,
    role: Role,
    params: Arc<ResharingParameters>,
    handle: EngineHandle<KeyShare<G>>,
    state: Mutex<EngineState<G>>,
}

impl<G: CurveGroup> AdditiveEngine<G> {
    fn lock(&self) -> std::result::Result<MutexGuard<'_, EngineState<G>>, EngineError> {
        self.state
            .lock()
            .map_err(|_| EngineError::Protocol("engine state lock poisoned".into()))
    }

    fn admissible(&self, message: &ReshareMessage, from: &PartyId, is_broadcast: bool) -> bool {
        let from_importer = self.params.old_committee().get(from.id()) == Some(from);
        let from_peer = from.id() != self.party.id()
            && self.params.new_committee().get(from.id()) == Some(from);

        match (self.role, message) {
            (Role::Old, _) => false,
            (Role::New, ReshareMessage::Commitment { .. }) => is_broadcast && from_importer,
            (Role::New, ReshareMessage::Share { .. }) => !is_broadcast && from_importer,
            (Role::New, ReshareMessage::ShareCommitment { .. }) => !is_broadcast && from_peer,
        }
    }

    /// Importer side of `start`.
    fn distribute(&self, state: &mut EngineState<G>) -> std::result::Result<(), EngineError> {
        let mut importer = state.importer.take().ok_or_else(|| {
            EngineError::Startup(format!("{} has no key share to distribute", self.party))
        })?;
        let pre_params = state
            .pre_params
            .take()
            .ok_or_else(|| EngineError::Startup(format!("{} has no pre-params", self.party)))?;

        let members = self.params.new_committee();
        let shares = split_nonzero(importer.xi.expose_secret(), members.len(), &mut pre_params.rng());
        info!("{} splitting secret into {} shares", self.party, shares.len());

        let commitment = ReshareMessage::Commitment {
            public_key: write(&importer.public_key)?,
        };
        self.handle.send(WireMessage::new(
            commitment.encode()?,
            Routing::Broadcast,
            commitment.type_tag(),
        ))?;

        for (member, share) in members.iter().zip(shares.expose_secret()) {
            let mut message = ReshareMessage::Share {
                share: write(share)?,
            };
            let payload = message.encode();
            let tag = message.type_tag();
            message.zeroize();
            self.handle
                .send(WireMessage::new(payload?, Routing::To(vec![member.clone()]), tag))?;
        }

        importer.xi.zeroize();
        state.finished = true;
        self.handle.finish(Ok(importer))
    }

    fn apply(
        &self,
        state: &mut EngineState<G>,
        from: &PartyId,
        inbound: Inbound<G>,
    ) -> std::result::Result<(), EngineError> {
        match inbound {
            Inbound::Commitment(public_key) => {
                debug!("{} recorded public key from {}", self.party, from);
                state.public_key = Some(public_key);
            }
            Inbound::Share(xi) => {
                let point = G::generator() * *xi.expose_secret();
                state.big_xj.insert(self.party.id().to_string(), point);
                state.xi = Some(xi);

                let peers: Vec<PartyId> = self
                    .params
                    .new_committee()
                    .iter()
                    .filter(|p| p.id() != self.party.id())
                    .cloned()
                    .collect();
                if !peers.is_empty() {
                    let message = ReshareMessage::ShareCommitment {
                        point: write(&point)?,
                    };
                    self.handle.send(WireMessage::new(
                        message.encode()?,
                        Routing::To(peers),
                        message.type_tag(),
                    ))?;
                }
            }
            Inbound::ShareCommitment(point) => {
                debug!("{} recorded share commitment of {}", self.party, from);
                state.big_xj.insert(from.id().to_string(), point);
            }
        }
        self.try_build_key_share(state)
    }

    fn try_build_key_share(&self, state: &mut EngineState<G>) -> std::result::Result<(), EngineError> {
        let committee = self.params.new_committee();
        if state.finished || state.big_xj.len() < committee.len() || state.xi.is_none() {
            return Ok(());
        }
        let Some(public_key) = state.public_key else {
            return Ok(());
        };

        let big_xj: Vec<G> = committee
            .iter()
            .filter_map(|p| state.big_xj.get(p.id()).copied())
            .collect();
        let sum = big_xj.iter().fold(G::zero(), |acc, x| acc + x);
        state.finished = true;

        if !constant_time_eq(&sum, &public_key) {
            warn!("{}: share commitments do not add up to the public key", self.party);
            return self.handle.finish(Err(EngineError::Protocol(format!(
                "share commitments of {} parties do not add up to the public key",
                committee.len()
            ))));
        }

        let Some(xi) = state.xi.take() else {
            return Ok(());
        };
        let key_share = KeyShare {
            xi,
            share_id: self.party.key().clone(),
            ks: self
                .params
                .old_committee()
                .iter()
                .map(|p| p.key().clone())
                .collect(),
            old_big_xj: vec![public_key],
            big_xj,
            public_key,
        };
        info!("{} built its key share", self.party);
        self.handle.finish(Ok(key_share))
    }
}

impl<G: CurveGroup> ProtocolEngine for AdditiveEngine<G> {
    type Output = KeyShare<G>;

    fn start(&self) -> std::result::Result<(), EngineError> {
        let mut state = self.lock()?;
        if state.started {
            return Err(EngineError::Startup(format!("{} started twice", self.party)));
        }
        state.started = true;

        match self.role {
            Role::Old => self.distribute(&mut state),
            Role::New => {
                let pending = std::mem::take(&mut state.pending);
                debug!("{} started with {} buffered message(s)", self.party, pending.len());
                for (from, inbound) in pending {
                    self.apply(&mut state, &from, inbound)?;
                }
                Ok(())
            }
        }
    }

    fn consume(
        &self,
        payload: &[u8],
        from: &PartyId,
        is_broadcast: bool,
    ) -> std::result::Result<bool, EngineError> {
        let mut state = self.lock()?;
        if state.finished {
            debug!("{} ignoring message from {} after completion", self.party, from);
            return Ok(false);
        }

        let message = ReshareMessage::decode(payload)?;
        let kind = message.type_tag();
        if !self.admissible(&message, from, is_broadcast) {
            warn!(
                "{} rejecting {} from {} (broadcast: {})",
                self.party, kind, from, is_broadcast
            );
            return Ok(false);
        }
        if state.seen.contains(&(from.id().to_string(), kind)) {
            warn!("{} rejecting duplicate {} from {}", self.party, kind, from);
            return Ok(false);
        }

        let inbound = Inbound::<G>::decode(message)?;
        state.seen.insert((from.id().to_string(), kind));
        if !state.started {
            debug!("{} buffering {} from {} until start", self.party, kind, from);
            state.pending.push((from.clone(), inbound));
            return Ok(true);
        }

        self.apply(&mut state, from, inbound)?;
        Ok(true)
    }
}
