//! Attribution of partial signatures to their signers

use crate::crypto::{CryptoPrimitives, MessageHash};
use crate::{Address, Error, Party, Result, SharedNonce, Signature};

/// Attribute a partial signature to its claimed owner
///
/// Checks that the owner is the address of the embedded public key, that the
/// owner belongs to `party`, that the challenge is the one of `message` under
/// the total nonce `K`, and that `s*G + e*Z_i` equals the owner's public nonce
/// share `K_i`. Returns the owner on success, `None` otherwise.
pub fn recover_signer(
    crypto: &dyn CryptoPrimitives,
    party: &Party,
    nonce: &SharedNonce,
    message: &MessageHash,
    signature: &Signature,
) -> Option<Address> {
    check_partial(crypto, party, nonce, message, signature).ok()
}

/// Like [`recover_signer`], naming the first check that failed
pub fn check_partial(
    crypto: &dyn CryptoPrimitives,
    party: &Party,
    nonce: &SharedNonce,
    message: &MessageHash,
    signature: &Signature,
) -> Result<Address> {
    let index = check_owner(crypto, party, signature)?;

    let nonce_share = nonce.public_share(index).ok_or_else(|| {
        Error::KeyResolution(format!("Nonce {} has no share {}", nonce.id, index))
    })?;

    if !crypto.verify_partial(
        &signature.pub_key,
        nonce_share,
        &nonce.total,
        message,
        &signature.signature,
    ) {
        return Err(Error::VerificationFailed(format!(
            "Partial signature of {} does not match the result and its nonce share",
            signature.owner
        )));
    }

    Ok(signature.owner)
}

/// Owner/public-key binding and party membership; returns the share index
pub fn check_owner(
    crypto: &dyn CryptoPrimitives,
    party: &Party,
    signature: &Signature,
) -> Result<u32> {
    let derived = crypto.derive_address(&signature.pub_key);
    if derived != signature.owner {
        return Err(Error::OwnerMismatch {
            claimed: signature.owner.to_string(),
            derived: derived.to_string(),
        });
    }

    party
        .index_of(&signature.owner)
        .ok_or_else(|| Error::UnknownSigner(signature.owner.to_string()))
}
