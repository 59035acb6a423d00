//! In-process transport for local testing

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{async_trait, RpcRegistry, Transport};
use crate::{Error, PeerId, Result};

/// Routes calls to registries of in-process nodes
///
/// Peers can be taken offline or slowed down to simulate partial failure.
#[derive(Clone)]
pub struct MemoryTransport {
    /// Registries by peer
    peers: Arc<DashMap<PeerId, Arc<RpcRegistry>>>,
    /// Artificial latency by peer
    delays: Arc<DashMap<PeerId, Duration>>,
    /// Unreachable peers
    offline: Arc<DashMap<PeerId, ()>>,
    /// Per-call timeout
    timeout: Duration,
}

impl MemoryTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self {
            peers: Arc::new(DashMap::new()),
            delays: Arc::new(DashMap::new()),
            offline: Arc::new(DashMap::new()),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attach a peer's registry
    pub fn attach(&self, peer: impl Into<PeerId>, registry: RpcRegistry) {
        self.peers.insert(peer.into(), Arc::new(registry));
    }

    /// Make a peer unreachable
    pub fn set_offline(&self, peer: impl Into<PeerId>) {
        self.offline.insert(peer.into(), ());
    }

    /// Delay every call to a peer
    pub fn set_delay(&self, peer: impl Into<PeerId>, delay: Duration) {
        self.delays.insert(peer.into(), delay);
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    #[instrument(skip(self, payload))]
    async fn call(&self, peer: &PeerId, method: &str, payload: Value) -> Result<Value> {
        if self.offline.contains_key(peer) {
            return Err(Error::Transport(format!("Peer {} unreachable", peer)));
        }

        let registry = self
            .peers
            .get(peer)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::Transport(format!("Unknown peer: {}", peer)))?;
        let delay = self.delays.get(peer).map(|entry| *entry.value());

        let call = async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            registry.dispatch(method, payload).await
        };

        let response = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| Error::Transport(format!("Call to {} timed out", peer)))??;

        debug!(peer = %peer, method, "RPC call completed");
        Ok(response)
    }
}
