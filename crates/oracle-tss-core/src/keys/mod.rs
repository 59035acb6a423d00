//! Key-share provider: parties and shared nonces

use crate::crypto::MessageHash;
use crate::{NonceId, Party, PartyId, Result, SharedNonce};

pub use ::async_trait::async_trait;

/// Resolves parties and shared nonces by identifier
///
/// Implementations return [`crate::Error::KeyResolution`] for unknown ids.
#[async_trait]
pub trait KeyShareProvider: Send + Sync {
    /// Resolve a party
    async fn resolve_party(&self, party_id: &PartyId) -> Result<Party>;

    /// Resolve a shared nonce; the private share is only present on the
    /// node that owns it
    async fn resolve_nonce(&self, nonce_id: &NonceId) -> Result<SharedNonce>;

    /// Reserve an unused nonce of `party_id` for a new request
    async fn allocate_nonce(&self, party_id: &PartyId) -> Result<NonceId>;

    /// Record that `nonce_id` signs `hash` before any signature is made
    ///
    /// Consuming again with the same hash is an idempotent retry; any other
    /// hash fails with [`crate::Error::NonceReuse`]. A consumed nonce is never
    /// allocated again.
    async fn consume_nonce(&self, nonce_id: &NonceId, hash: &MessageHash) -> Result<()>;
}

/// Devnet key material
pub mod dealer;

/// Durable record of consumed nonces
pub mod journal;

/// In-memory provider
pub mod memory;

pub use dealer::{deal, Deal, DealtNode};
pub use journal::NonceJournal;
pub use memory::MemoryKeyProvider;
