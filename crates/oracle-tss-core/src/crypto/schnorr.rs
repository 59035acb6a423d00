//! Threshold Schnorr over secp256k1

use std::collections::BTreeSet;

use k256::{
    elliptic_curve::{bigint::U256, ops::Reduce},
    ProjectivePoint, Scalar,
};
use sha3::{Digest, Keccak256};

use super::{CryptoPrimitives, MessageHash};
use crate::{Address, Error, Point, Result, SchnorrSig, SecretShare};

/// Schnorr signatures with challenge `e = keccak256(address(K) || m)`
///
/// A partial signature is `s_i = k_i - x_i * e`; the aggregate
/// `S = sum(lambda_i * s_i)` verifies as `keccak256(address(S*G + E*P) || m) == E`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Secp256k1Schnorr;

impl Secp256k1Schnorr {
    /// Create the primitives
    pub fn new() -> Self {
        Self
    }
}

fn keccak256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn address_of(point: &Point) -> Address {
    let uncompressed = point.to_uncompressed();
    let hash = keccak256(&[&uncompressed[1..]]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Address(address)
}

fn challenge(nonce: &Point, message: &MessageHash) -> Scalar {
    let address = address_of(nonce);
    let hash = keccak256(&[&address.0, message]);
    <Scalar as Reduce<U256>>::reduce_bytes(&hash.into())
}

/// Lagrange coefficient at zero for share `index` among `indices`
fn lagrange_coefficient(index: u32, indices: &[u32]) -> Result<Scalar> {
    let i = u64::from(index);
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;

    for &j_idx in indices {
        let j = u64::from(j_idx);
        if j != i {
            numerator *= Scalar::from(j);
            let diff = if j > i {
                Scalar::from(j - i)
            } else {
                -Scalar::from(i - j)
            };
            denominator *= diff;
        }
    }

    let inverse = Option::<Scalar>::from(denominator.invert())
        .ok_or_else(|| Error::Crypto("Degenerate share indices".into()))?;
    Ok(numerator * inverse)
}

impl CryptoPrimitives for Secp256k1Schnorr {
    fn public_key(&self, private_key: &SecretShare) -> Result<Point> {
        Ok(Point(ProjectivePoint::GENERATOR * private_key.scalar()?))
    }

    fn derive_address(&self, public_key: &Point) -> Address {
        address_of(public_key)
    }

    fn partial_sign(
        &self,
        private_key: &SecretShare,
        nonce_share: &SecretShare,
        total_nonce: &Point,
        message: &MessageHash,
    ) -> Result<SchnorrSig> {
        let x_i = private_key.scalar()?;
        let k_i = nonce_share.scalar()?;
        let e = challenge(total_nonce, message);

        Ok(SchnorrSig::new(k_i - x_i * e, e))
    }

    fn verify_partial(
        &self,
        public_key: &Point,
        nonce_public_share: &Point,
        total_nonce: &Point,
        message: &MessageHash,
        signature: &SchnorrSig,
    ) -> bool {
        if challenge(total_nonce, message) != signature.e {
            return false;
        }
        // s_i*G + e*Z_i == K_i
        let lhs = ProjectivePoint::GENERATOR * signature.s + public_key.0 * signature.e;
        lhs == nonce_public_share.0
    }

    fn aggregate(
        &self,
        threshold: usize,
        partials: &[SchnorrSig],
        indices: &[u32],
    ) -> Result<SchnorrSig> {
        if partials.len() != indices.len() {
            return Err(Error::Crypto(format!(
                "{} partial signatures but {} indices",
                partials.len(),
                indices.len()
            )));
        }
        if threshold == 0 || partials.len() < threshold {
            return Err(Error::Crypto(format!(
                "Threshold not met: required {}, got {}",
                threshold,
                partials.len()
            )));
        }
        if indices.contains(&0) {
            return Err(Error::Crypto("Share index 0 is reserved".into()));
        }

        let partials = &partials[..threshold];
        let indices = &indices[..threshold];

        let distinct: BTreeSet<u32> = indices.iter().copied().collect();
        if distinct.len() != indices.len() {
            return Err(Error::Crypto("Duplicate share indices".into()));
        }

        let e = partials[0].e;
        if partials.iter().any(|p| p.e != e) {
            return Err(Error::Crypto(
                "Partial signatures were made over different challenges".into(),
            ));
        }

        let mut s = Scalar::ZERO;
        for (partial, &index) in partials.iter().zip(indices) {
            s += lagrange_coefficient(index, indices)? * partial.s;
        }

        Ok(SchnorrSig::new(s, e))
    }

    fn verify(&self, public_key: &Point, message: &MessageHash, signature: &SchnorrSig) -> bool {
        let r = Point(ProjectivePoint::GENERATOR * signature.s + public_key.0 * signature.e);
        challenge(&r, message) == signature.e
    }
}
