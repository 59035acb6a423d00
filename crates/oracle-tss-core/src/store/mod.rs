//! Request and signature persistence

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::{Request, RequestId, Result, Signature};

pub use ::async_trait::async_trait;

/// Durable, concurrently writable store of requests and signatures
///
/// Signatures are keyed by `(request, owner)`: a second write for the same
/// signer replaces the first, so concurrent inserts converge to one record.
#[async_trait]
pub trait SignatureStore: Send + Sync {
    /// Persist a new request
    async fn insert_request(&self, request: &Request) -> Result<()>;

    /// Load a request
    async fn get_request(&self, id: &RequestId) -> Result<Option<Request>>;

    /// Set the confirmation timestamp if it is not set yet, returning the
    /// stored request
    async fn confirm_request(&self, id: &RequestId, at: DateTime<Utc>) -> Result<Request>;

    /// Insert or replace the signature of `(signature.request, signature.owner)`
    async fn put_signature(&self, signature: Signature) -> Result<()>;

    /// All signatures recorded for a request, oldest first
    async fn signatures(&self, request: &RequestId) -> Result<Vec<Signature>>;

    /// Notifications carrying the request id of every signature write
    fn subscribe(&self) -> broadcast::Receiver<RequestId>;
}

/// In-memory store
pub mod memory;

pub use memory::MemoryStore;
