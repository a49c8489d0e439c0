//! Completion barrier and reconstruction check
//!
//! [`ResultAggregator`] collects exactly one output per member of the new
//! committee. Once complete it releases a [`ProtocolResult`], whose
//! [`ProtocolResult::verify`] sums the shares modulo the group order and
//! compares the sum with the original secret.
//!
//! The check needs the plaintext secret, so it is a self-test for
//! in-process runs, not something a deployment would keep around.

use std::collections::HashMap;

use num_bigint::BigUint;
use tracing::debug;

use crate::error::{AggregationError, ReshareError, Result};
use crate::party::{PartyId, PeerGroup};

/// Access to the secret share carried by a party's final save data.
pub trait SecretShare {
    fn secret_share(&self) -> BigUint;
}

/// Collects per-party results for one run.
pub struct ResultAggregator<O> {
    expected: PeerGroup,
    collected: HashMap<String, O>,
}

impl<O> ResultAggregator<O> {
    pub fn new(expected: PeerGroup) -> Self {
        let capacity = expected.len();
        Self {
            expected,
            collected: HashMap::with_capacity(capacity),
        }
    }

    /// Records the output of `party`.
    ///
    /// # Errors
    /// [`AggregationError::Unexpected`] if `party` is not an expected member,
    /// [`AggregationError::Duplicate`] if it already reported.
    pub fn accept(&mut self, party: &PartyId, output: O) -> std::result::Result<(), AggregationError> {
        match self.expected.get(party.id()) {
            Some(member) if member == party => {}
            _ => return Err(AggregationError::Unexpected(party.clone())),
        }
        if self.collected.contains_key(party.id()) {
            return Err(AggregationError::Duplicate(party.clone()));
        }

        self.collected.insert(party.id().to_string(), output);
        debug!(
            "Collected result from {} ({} / {})",
            party,
            self.collected.len(),
            self.expected.len()
        );
        Ok(())
    }

    pub fn collected(&self) -> usize {
        self.collected.len()
    }

    pub fn expected(&self) -> usize {
        self.expected.len()
    }

    pub fn is_complete(&self) -> bool {
        self.collected.len() == self.expected.len()
    }

    /// Members that have not reported yet, in index order.
    pub fn outstanding(&self) -> Vec<PartyId> {
        self.expected
            .iter()
            .filter(|p| !self.collected.contains_key(p.id()))
            .cloned()
            .collect()
    }

    /// Releases the aggregate once every expected member reported.
    pub fn finish(mut self) -> std::result::Result<ProtocolResult<O>, AggregationError> {
        let outstanding = self.outstanding();
        if !outstanding.is_empty() {
            return Err(AggregationError::Missing(outstanding));
        }

        let mut entries = Vec::with_capacity(self.expected.len());
        for party in self.expected.iter() {
            if let Some(output) = self.collected.remove(party.id()) {
                entries.push((party.clone(), output));
            }
        }
        Ok(ProtocolResult { entries })
    }
}

/// One completed output per new-committee member, in index order.
#[derive(Debug)]
pub struct ProtocolResult<O> {
    entries: Vec<(PartyId, O)>,
}

impl<O> ProtocolResult<O> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&O> {
        self.entries
            .iter()
            .find(|(party, _)| party.id() == id)
            .map(|(_, output)| output)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PartyId, &O)> {
        self.entries.iter().map(|(party, output)| (party, output))
    }

    pub fn parties(&self) -> impl Iterator<Item = &PartyId> {
        self.entries.iter().map(|(party, _)| party)
    }

    pub fn into_entries(self) -> Vec<(PartyId, O)> {
        self.entries
    }
}

impl<O: SecretShare> ProtocolResult<O> {
    /// Sum of all shares reduced modulo `order`.
    pub fn reconstruct(&self, order: &BigUint) -> Result<BigUint> {
        if *order <= BigUint::from(1u32) {
            return Err(ReshareError::Config(format!(
                "group order must be greater than one, got {}",
                order
            )));
        }

        let total = self
            .entries
            .iter()
            .fold(BigUint::default(), |acc, (_, output)| acc + output.secret_share());
        Ok(total % order)
    }

    /// Checks that the shares recompose `secret`.
    ///
    /// # Errors
    /// [`ReshareError::Verification`] on a mismatch.
    pub fn verify(&self, secret: &BigUint, order: &BigUint) -> Result<()> {
        let actual = self.reconstruct(order)?;
        let expected = secret % order;
        if actual != expected {
            return Err(ReshareError::Verification { expected, actual });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Share(u64);

    impl SecretShare for Share {
        fn secret_share(&self) -> BigUint {
            BigUint::from(self.0)
        }
    }

    fn committee() -> PeerGroup {
        PeerGroup::new(
            (1..=3)
                .map(|i| PartyId::new(format!("signer{i}"), format!("Signer{i}"), i).unwrap())
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_duplicate_completion_rejected() {
        let group = committee();
        let first = group.parties()[0].clone();
        let mut agg = ResultAggregator::new(group);

        agg.accept(&first, Share(1)).unwrap();
        assert_eq!(
            agg.accept(&first, Share(2)),
            Err(AggregationError::Duplicate(first.clone()))
        );
        assert_eq!(agg.collected(), 1);
    }

    #[test]
    fn test_unexpected_completion_rejected() {
        let mut agg = ResultAggregator::new(committee());
        let importer = PartyId::new("importer", "Importer", 0).unwrap();
        assert_eq!(
            agg.accept(&importer, Share(1)),
            Err(AggregationError::Unexpected(importer.clone()))
        );

        // Same id, different index: not the member we expect.
        let impostor = PartyId::new("signer1", "Signer1", 42).unwrap();
        assert!(agg.accept(&impostor, Share(1)).is_err());
    }

    #[test]
    fn test_finish_requires_every_member() {
        let group = committee();
        let parties = group.parties().to_vec();
        let mut agg = ResultAggregator::new(group);
        agg.accept(&parties[2], Share(3)).unwrap();

        assert_eq!(agg.outstanding(), parties[..2].to_vec());
        match agg.finish() {
            Err(AggregationError::Missing(missing)) => assert_eq!(missing, parties[..2].to_vec()),
            other => panic!("expected missing completions, got {:?}", other.map(|r| r.len())),
        }
    }

    #[test]
    fn test_reconstruction_mod_order() {
        let group = committee();
        let parties = group.parties().to_vec();
        let mut agg = ResultAggregator::new(group);
        agg.accept(&parties[1], Share(200)).unwrap();
        agg.accept(&parties[0], Share(100)).unwrap();
        agg.accept(&parties[2], Share(12)).unwrap();
        assert!(agg.is_complete());

        let result = agg.finish().unwrap();
        let ids: Vec<&str> = result.parties().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["signer1", "signer2", "signer3"]);

        let order = BigUint::from(97u32);
        assert_eq!(result.reconstruct(&order).unwrap(), BigUint::from(312u32 % 97));
        assert!(result.verify(&BigUint::from(312u32 % 97), &order).is_ok());
        assert!(matches!(
            result.verify(&BigUint::from(0xffu32), &order),
            Err(ReshareError::Verification { .. })
        ));
        assert!(result.reconstruct(&BigUint::from(1u32)).is_err());
    }
}
