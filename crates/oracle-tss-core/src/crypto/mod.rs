//! Cryptographic primitives consumed by the signing flow
//!
//! The coordinator never touches curve arithmetic directly; everything goes
//! through [`CryptoPrimitives`], so a different threshold Schnorr
//! construction can be swapped in without touching the protocol code.

use crate::{Address, Point, Result, SchnorrSig, SecretShare};

mod schnorr;

pub use schnorr::Secp256k1Schnorr;

/// 32-byte message hash that is actually signed
pub type MessageHash = [u8; 32];

/// Threshold Schnorr operations over a fixed curve
pub trait CryptoPrimitives: Send + Sync {
    /// Public key of a private key
    fn public_key(&self, private_key: &SecretShare) -> Result<Point>;

    /// Wallet address of a public key
    fn derive_address(&self, public_key: &Point) -> Address;

    /// Partial signature of `message` with key share `private_key`, nonce
    /// share `nonce_share` and total nonce point `total_nonce`
    fn partial_sign(
        &self,
        private_key: &SecretShare,
        nonce_share: &SecretShare,
        total_nonce: &Point,
        message: &MessageHash,
    ) -> Result<SchnorrSig>;

    /// Check a partial signature of `message` against the signer's public
    /// key share, its public nonce share and the total nonce point
    fn verify_partial(
        &self,
        public_key: &Point,
        nonce_public_share: &Point,
        total_nonce: &Point,
        message: &MessageHash,
        signature: &SchnorrSig,
    ) -> bool;

    /// Combine partial signatures using the signers' share indices
    fn aggregate(
        &self,
        threshold: usize,
        partials: &[SchnorrSig],
        indices: &[u32],
    ) -> Result<SchnorrSig>;

    /// Verify an aggregate signature under a group public key
    fn verify(&self, public_key: &Point, message: &MessageHash, signature: &SchnorrSig) -> bool;
}
