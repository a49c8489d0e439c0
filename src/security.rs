//! Protection for secret material held by the reference engines
//!
//! This module provides:
//! - [`SensitiveScalar`], a zeroizing wrapper for secret field elements
//! - [`SensitiveVec`], a zeroizing vector used for freshly split shares
//! - constant-time comparison of serialized group elements

use ark_ff::PrimeField;
use ark_serialize::{
    CanonicalDeserialize, CanonicalSerialize, Compress, Read, SerializationError, Valid, Validate,
    Write,
};
use num_bigint::BigUint;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Secret scalar (a key share or one of the importer's additive splits).
///
/// # Security
/// - Overwritten with zero on drop
/// - Never printed through `Debug`
#[derive(Clone)]
pub struct SensitiveScalar<F: PrimeField> {
    value: F,
}

impl<F: PrimeField> SensitiveScalar<F> {
    pub fn new(value: F) -> Self {
        Self { value }
    }

    /// Reference to the inner value.
    ///
    /// # Security Warning
    /// The caller must ensure this reference is not used to leak the value
    pub fn expose_secret(&self) -> &F {
        &self.value
    }

    /// Canonical integer form of the secret, in `[0, order)`.
    pub fn to_biguint(&self) -> BigUint {
        self.value.into()
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }
}

impl<F: PrimeField> Zeroize for SensitiveScalar<F> {
    fn zeroize(&mut self) {
        // arkworks fields don't expose their limbs; setting to zero is the best we get
        self.value = F::zero();
    }
}

impl<F: PrimeField> ZeroizeOnDrop for SensitiveScalar<F> {}

impl<F: PrimeField> Drop for SensitiveScalar<F> {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl<F: PrimeField> CanonicalSerialize for SensitiveScalar<F> {
    fn serialize_with_mode<W: Write>(
        &self,
        mut writer: W,
        compress: Compress,
    ) -> Result<(), SerializationError> {
        self.value.serialize_with_mode(&mut writer, compress)
    }

    fn serialized_size(&self, compress: Compress) -> usize {
        self.value.serialized_size(compress)
    }
}

impl<F: PrimeField> CanonicalDeserialize for SensitiveScalar<F> {
    fn deserialize_with_mode<R: Read>(
        mut reader: R,
        compress: Compress,
        validate: Validate,
    ) -> Result<Self, SerializationError> {
        let value = F::deserialize_with_mode(&mut reader, compress, validate)?;
        Ok(SensitiveScalar::new(value))
    }
}

impl<F: PrimeField> Valid for SensitiveScalar<F> {
    fn check(&self) -> Result<(), SerializationError> {
        self.value.check()
    }
}

// Prevent debug output from leaking sensitive data
impl<F: PrimeField> std::fmt::Debug for SensitiveScalar<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SensitiveScalar([REDACTED])")
    }
}

/// Vector of secrets zeroized element by element on drop.
pub struct SensitiveVec<T: Zeroize> {
    inner: Vec<T>,
}

impl<T: Zeroize> SensitiveVec<T> {
    pub fn new(inner: Vec<T>) -> Self {
        Self { inner }
    }

    pub fn expose_secret(&self) -> &[T] {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<T: Zeroize> Zeroize for SensitiveVec<T> {
    fn zeroize(&mut self) {
        self.inner.iter_mut().for_each(|item| item.zeroize());
        self.inner.clear();
    }
}

impl<T: Zeroize> ZeroizeOnDrop for SensitiveVec<T> {}

impl<T: Zeroize> Drop for SensitiveVec<T> {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl<T: Zeroize> std::fmt::Debug for SensitiveVec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensitiveVec")
            .field("len", &self.inner.len())
            .field("data", &"[REDACTED]")
            .finish()
    }
}

/// Constant-time equality of two serializable values (group elements,
/// field elements).
///
/// # Security Note
/// Only the final byte comparison is constant-time; arkworks normalization
/// during serialization may not be.
pub fn constant_time_eq<T: CanonicalSerialize>(a: &T, b: &T) -> bool {
    let mut a_bytes = Vec::new();
    let mut b_bytes = Vec::new();

    // If serialization fails, treat as not equal
    if a.serialize_compressed(&mut a_bytes).is_err() {
        return false;
    }
    if b.serialize_compressed(&mut b_bytes).is_err() {
        return false;
    }

    subtle_constant_time_eq(&a_bytes, &b_bytes)
}

fn subtle_constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    // Length is public
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ec::PrimeGroup;
    use ark_secp256k1::{Fr, Projective};
    use ark_std::{UniformRand, Zero};

    #[test]
    fn test_sensitive_scalar_zeroization() {
        let mut rng = ark_std::test_rng();
        let secret = Fr::rand(&mut rng);

        let mut sensitive = SensitiveScalar::new(secret);
        assert_eq!(sensitive.expose_secret(), &secret);

        sensitive.zeroize();
        assert_eq!(sensitive.expose_secret(), &Fr::zero());
        assert!(sensitive.is_zero());
    }

    #[test]
    fn test_sensitive_scalar_to_biguint() {
        let sensitive = SensitiveScalar::new(Fr::from(0xffu64));
        assert_eq!(sensitive.to_biguint(), BigUint::from(0xffu32));
    }

    #[test]
    fn test_sensitive_scalar_debug() {
        let mut rng = ark_std::test_rng();
        let secret = Fr::rand(&mut rng);
        let sensitive = SensitiveScalar::new(secret);

        let debug_str = format!("{:?}", sensitive);
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains(&format!("{:?}", secret)));
    }

    #[test]
    fn test_sensitive_scalar_serialization() {
        let sensitive = SensitiveScalar::new(Fr::from(42u64));
        let mut bytes = Vec::new();
        sensitive.serialize_compressed(&mut bytes).unwrap();

        let restored = SensitiveScalar::<Fr>::deserialize_compressed(&bytes[..]).unwrap();
        assert_eq!(restored.expose_secret(), &Fr::from(42u64));
    }

    #[test]
    fn test_sensitive_vec() {
        let mut vec = SensitiveVec::new(vec![
            SensitiveScalar::new(Fr::from(1u64)),
            SensitiveScalar::new(Fr::from(2u64)),
        ]);
        assert_eq!(vec.len(), 2);

        vec.zeroize();
        assert!(vec.is_empty());
    }

    #[test]
    fn test_constant_time_eq_points() {
        let g = Projective::generator();
        let two_g = g + g;

        assert!(constant_time_eq(&g, &g));
        assert!(constant_time_eq(&(g * Fr::from(2u64)), &two_g));
        assert!(!constant_time_eq(&g, &two_g));
    }

    #[test]
    fn test_subtle_constant_time_eq() {
        assert!(subtle_constant_time_eq(&[1, 2, 3], &[1, 2, 3]));
        assert!(!subtle_constant_time_eq(&[1, 2, 3], &[1, 2, 4]));
        assert!(!subtle_constant_time_eq(&[1, 2], &[1, 2, 3]));
    }
}
