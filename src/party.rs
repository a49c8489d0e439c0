//! Party identities, committees and resharing parameters
//!
//! A [`PartyId`] names one participant and carries its share index (the point
//! at which the party's share polynomial is evaluated). A [`PeerGroup`] is an
//! immutable committee sorted by index. [`ResharingParameters`] ties the old
//! committee (current secret holders) to the new one (future share holders).

use std::collections::HashSet;
use std::fmt;

use num_bigint::{BigInt, BigUint};

use crate::error::{ReshareError, Result};

/// Identity of a single protocol participant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PartyId {
    id: String,
    moniker: String,
    key: BigUint,
}

impl PartyId {
    /// Creates a party identity.
    ///
    /// # Errors
    /// Returns [`ReshareError::InvalidParty`] if the id is empty or the index
    /// is negative.
    pub fn new(
        id: impl Into<String>,
        moniker: impl Into<String>,
        index: impl Into<BigInt>,
    ) -> Result<Self> {
        let id = id.into();
        let moniker = moniker.into();
        let index = index.into();

        if id.is_empty() {
            return Err(ReshareError::InvalidParty(format!(
                "party '{}' has an empty id",
                moniker
            )));
        }
        let key = match index.to_biguint() {
            Some(key) => key,
            None => {
                return Err(ReshareError::InvalidParty(format!(
                    "{} has negative index {}",
                    moniker, index
                )))
            }
        };

        Ok(Self { id, moniker, key })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn moniker(&self) -> &str {
        &self.moniker
    }

    /// Share index of this party.
    pub fn key(&self) -> &BigUint {
        &self.key
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{},{}}}", self.id, self.moniker)
    }
}

/// Sorts party ids by ascending index, breaking ties on the id string.
pub fn sort_party_ids(mut parties: Vec<PartyId>) -> Vec<PartyId> {
    parties.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.id.cmp(&b.id)));
    parties
}

/// An ordered, immutable committee.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerGroup {
    parties: Vec<PartyId>,
}

impl PeerGroup {
    /// Builds a committee, sorting members by index.
    ///
    /// # Errors
    /// Fails when the committee is empty or when two members share an id or
    /// an index.
    pub fn new(parties: Vec<PartyId>) -> Result<Self> {
        if parties.is_empty() {
            return Err(ReshareError::Config(
                "a committee needs at least one member".to_string(),
            ));
        }

        let parties = sort_party_ids(parties);
        let mut ids = HashSet::with_capacity(parties.len());
        for (i, party) in parties.iter().enumerate() {
            if !ids.insert(party.id()) {
                return Err(ReshareError::InvalidParty(format!(
                    "duplicate party id '{}'",
                    party.id()
                )));
            }
            if i > 0 && parties[i - 1].key() == party.key() {
                return Err(ReshareError::InvalidParty(format!(
                    "{} and {} share index {}",
                    parties[i - 1],
                    party,
                    party.key()
                )));
            }
        }

        Ok(Self { parties })
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }

    pub fn parties(&self) -> &[PartyId] {
        &self.parties
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PartyId> {
        self.parties.iter()
    }

    /// Looks a member up by id.
    pub fn get(&self, id: &str) -> Option<&PartyId> {
        self.parties.iter().find(|p| p.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Position of a member in index order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.parties.iter().position(|p| p.id() == id)
    }
}

impl<'a> IntoIterator for &'a PeerGroup {
    type Item = &'a PartyId;
    type IntoIter = std::slice::Iter<'a, PartyId>;

    fn into_iter(self) -> Self::IntoIter {
        self.parties.iter()
    }
}

/// Committee sizes and thresholds for one resharing run.
///
/// A threshold `t` means `t + 1` shares are needed to reconstruct.
#[derive(Clone, Debug)]
pub struct ResharingParameters {
    old: PeerGroup,
    new: PeerGroup,
    old_threshold: usize,
    new_threshold: usize,
}

impl ResharingParameters {
    pub fn new(
        old: PeerGroup,
        new: PeerGroup,
        old_threshold: usize,
        new_threshold: usize,
    ) -> Result<Self> {
        if old_threshold >= old.len() {
            return Err(ReshareError::Config(format!(
                "old threshold {} must be below old committee size {}",
                old_threshold,
                old.len()
            )));
        }
        if new_threshold >= new.len() {
            return Err(ReshareError::Config(format!(
                "new threshold {} must be below new committee size {}",
                new_threshold,
                new.len()
            )));
        }
        if let Some(shared) = old.iter().find(|p| new.contains(p.id())) {
            return Err(ReshareError::Config(format!(
                "{} appears in both committees",
                shared
            )));
        }

        Ok(Self {
            old,
            new,
            old_threshold,
            new_threshold,
        })
    }

    pub fn old_committee(&self) -> &PeerGroup {
        &self.old
    }

    pub fn new_committee(&self) -> &PeerGroup {
        &self.new
    }

    pub fn old_threshold(&self) -> usize {
        self.old_threshold
    }

    pub fn new_threshold(&self) -> usize {
        self.new_threshold
    }

    pub fn old_party_count(&self) -> usize {
        self.old.len()
    }

    pub fn new_party_count(&self) -> usize {
        self.new.len()
    }

    /// Every party of the run, old committee first.
    pub fn all_parties(&self) -> impl Iterator<Item = &PartyId> {
        self.old.iter().chain(self.new.iter())
    }
}
