//! Concrete engine backends
//!
//! The orchestrator only knows the [`crate::engine`] traits. This module
//! provides the reference additive resharing engine and the curve selection
//! used by the demo binary, the integration tests and the benchmarks.

pub mod additive;

use std::fmt;
use std::str::FromStr;

use ark_ec::CurveGroup;
use ark_ff::PrimeField;
use num_bigint::BigUint;

use crate::error::ReshareError;

pub use additive::{AdditiveEngine, KeyShare, PreParams, ReshareMessage, ResharingSetup};

/// secp256k1 group (ECDSA-style keys)
pub type Secp256k1 = ark_secp256k1::Projective;
/// Edwards25519 group (EdDSA-style keys)
pub type Ed25519 = ark_ed25519::EdwardsProjective;
/// BLS12-381 G1
pub type Bls12381 = ark_bls12_381::G1Projective;

/// Curve selected once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Curve {
    #[default]
    Secp256k1,
    Ed25519,
    Bls12381,
}

impl Curve {
    /// Order of the prime-order subgroup the shares live in.
    pub fn order(&self) -> BigUint {
        match self {
            Curve::Secp256k1 => group_order::<Secp256k1>(),
            Curve::Ed25519 => group_order::<Ed25519>(),
            Curve::Bls12381 => group_order::<Bls12381>(),
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Curve::Secp256k1 => "secp256k1",
            Curve::Ed25519 => "ed25519",
            Curve::Bls12381 => "bls12-381",
        };
        f.write_str(name)
    }
}

impl FromStr for Curve {
    type Err = ReshareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "secp256k1" | "ecdsa" => Ok(Curve::Secp256k1),
            "ed25519" | "eddsa" => Ok(Curve::Ed25519),
            "bls12-381" | "bls12381" | "bls" => Ok(Curve::Bls12381),
            other => Err(ReshareError::Config(format!("unknown curve: {}", other))),
        }
    }
}

/// Scalar field modulus of `G`.
pub fn group_order<G: CurveGroup>() -> BigUint {
    <G::ScalarField as PrimeField>::MODULUS.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curve_orders() {
        let secp = BigUint::parse_bytes(
            b"fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141",
            16,
        )
        .unwrap();
        assert_eq!(Curve::Secp256k1.order(), secp);

        // 2^252 + 27742317777372353535851937790883648493
        let ed = (BigUint::from(1u32) << 252)
            + BigUint::parse_bytes(b"27742317777372353535851937790883648493", 10).unwrap();
        assert_eq!(Curve::Ed25519.order(), ed);

        assert_eq!(Curve::Bls12381.order().bits(), 255);
    }

    #[test]
    fn test_curve_names() {
        assert_eq!("ECDSA".parse::<Curve>().unwrap(), Curve::Secp256k1);
        assert_eq!("ed25519".parse::<Curve>().unwrap(), Curve::Ed25519);
        assert_eq!(Curve::Bls12381.to_string(), "bls12-381");
        assert!("p256".parse::<Curve>().is_err());
    }
}
