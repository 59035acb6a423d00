//! In-memory store implementation for testing and single-process nodes

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use super::{async_trait, SignatureStore};
use crate::{Address, Error, Request, RequestId, Result, Signature};

/// In-memory request and signature store
#[derive(Clone)]
pub struct MemoryStore {
    /// Requests by id
    requests: Arc<DashMap<RequestId, Request>>,
    /// Signatures: request_id -> owner -> signature
    signatures: Arc<DashMap<RequestId, HashMap<Address, Signature>>>,
    /// Write notifications
    notify: broadcast::Sender<RequestId>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(256);
        Self {
            requests: Arc::new(DashMap::new()),
            signatures: Arc::new(DashMap::new()),
            notify,
        }
    }

    /// Number of stored requests
    pub fn request_count(&self) -> usize {
        self.requests.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignatureStore for MemoryStore {
    async fn insert_request(&self, request: &Request) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.requests.entry(request.id) {
            Entry::Occupied(existing) if existing.get() != request => Err(Error::Store(format!(
                "Request {} already exists with different content",
                request.id
            ))),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(request.clone());
                Ok(())
            }
        }
    }

    async fn get_request(&self, id: &RequestId) -> Result<Option<Request>> {
        Ok(self.requests.get(id).map(|entry| entry.value().clone()))
    }

    async fn confirm_request(&self, id: &RequestId, at: DateTime<Utc>) -> Result<Request> {
        let mut entry = self
            .requests
            .get_mut(id)
            .ok_or_else(|| Error::RequestNotFound(id.to_string()))?;

        if entry.confirmed_at.is_none() {
            entry.confirmed_at = Some(at);
        }
        Ok(entry.value().clone())
    }

    async fn put_signature(&self, signature: Signature) -> Result<()> {
        let request = signature.request;
        let owner = signature.owner;

        let replaced = self
            .signatures
            .entry(request)
            .or_default()
            .insert(owner, signature)
            .is_some();

        debug!(request = %request, owner = %owner, replaced, "Signature stored");

        let _ = self.notify.send(request);
        Ok(())
    }

    async fn signatures(&self, request: &RequestId) -> Result<Vec<Signature>> {
        let mut signatures: Vec<Signature> = self
            .signatures
            .get(request)
            .map(|entry| entry.values().cloned().collect())
            .unwrap_or_default();
        signatures.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.owner.cmp(&b.owner))
        });
        Ok(signatures)
    }

    fn subscribe(&self) -> broadcast::Receiver<RequestId> {
        self.notify.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InitBlock, RequestData, SchnorrSig};
    use crate::Point;
    use k256::{ProjectivePoint, Scalar};
    use uuid::Uuid;

    fn request() -> Request {
        Request {
            id: Uuid::new_v4(),
            app: "quote".into(),
            method: "get_price".into(),
            owner: Address([1; 20]),
            peer_id: "node-1".into(),
            data: RequestData {
                init: InitBlock {
                    party: "p1".into(),
                    nonce: "n1".into(),
                },
                params: serde_json::Value::Null,
                result: serde_json::json!({ "price": 10 }),
                raw: None,
            },
            n_sign: 2,
            started_at: Utc::now(),
            confirmed_at: None,
        }
    }

    fn signature(request: RequestId, owner: u8, s: u64) -> Signature {
        Signature {
            request,
            owner: Address([owner; 20]),
            pub_key: Point(ProjectivePoint::GENERATOR),
            timestamp: Utc::now(),
            data: serde_json::json!({ "price": 10 }),
            signature: SchnorrSig::new(Scalar::from(s), Scalar::ONE),
            auxiliary: None,
        }
    }

    #[tokio::test]
    async fn test_signature_dedup_by_owner() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();

        store.put_signature(signature(id, 2, 1)).await.unwrap();
        store.put_signature(signature(id, 2, 2)).await.unwrap();
        store.put_signature(signature(id, 3, 3)).await.unwrap();

        let sigs = store.signatures(&id).await.unwrap();
        assert_eq!(sigs.len(), 2);

        let owner_two = sigs.iter().find(|s| s.owner == Address([2; 20])).unwrap();
        assert_eq!(owner_two.signature.s, Scalar::from(2u64));
    }

    #[tokio::test]
    async fn test_confirm_is_set_once() {
        let store = MemoryStore::new();
        let req = request();
        store.insert_request(&req).await.unwrap();

        let first = Utc::now();
        let confirmed = store.confirm_request(&req.id, first).await.unwrap();
        let again = store
            .confirm_request(&req.id, first + chrono::Duration::seconds(5))
            .await
            .unwrap();

        assert_eq!(confirmed.confirmed_at, Some(first));
        assert_eq!(again.confirmed_at, Some(first));
    }

    #[tokio::test]
    async fn test_request_is_immutable() {
        let store = MemoryStore::new();
        let req = request();
        store.insert_request(&req).await.unwrap();
        store.insert_request(&req).await.unwrap();

        let mut changed = req.clone();
        changed.n_sign = 3;
        assert!(store.insert_request(&changed).await.is_err());
        assert_eq!(store.request_count(), 1);
    }

    #[tokio::test]
    async fn test_write_notification() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        let id = Uuid::new_v4();

        store.put_signature(signature(id, 2, 1)).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_confirm_unknown_request() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.confirm_request(&Uuid::new_v4(), Utc::now()).await,
            Err(Error::RequestNotFound(_))
        ));
    }
}
