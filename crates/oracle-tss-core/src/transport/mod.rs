//! Peer RPC transport and method registration

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::{Error, PeerId, Result};

pub use ::async_trait::async_trait;

/// Asynchronous remote procedure call to a named peer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Call `method` on `peer` with a JSON payload
    ///
    /// Unreachable peers and timeouts surface as [`Error::Transport`]; a
    /// peer that declines the call surfaces as the peer's own error kind.
    async fn call(&self, peer: &PeerId, method: &str, payload: Value) -> Result<Value>;
}

/// Boxed handler future
pub type HandlerFuture = BoxFuture<'static, Result<Value>>;

/// RPC handler
pub type Handler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Table mapping RPC method names to handlers, built once at startup
#[derive(Clone, Default)]
pub struct RpcRegistry {
    handlers: HashMap<String, Handler>,
}

impl RpcRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for `method`
    pub fn register<F, Fut>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let method = method.into();
        debug!(method = %method, "RPC method registered");
        let boxed: Handler =
            Arc::new(move |payload: Value| -> HandlerFuture { Box::pin(handler(payload)) });
        self.handlers.insert(method, boxed);
    }

    /// Registered method names, sorted
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }

    /// Run the handler registered for `method`
    pub async fn dispatch(&self, method: &str, payload: Value) -> Result<Value> {
        let handler = self
            .handlers
            .get(method)
            .cloned()
            .ok_or_else(|| Error::UnknownMethod(method.to_string()))?;
        handler(payload).await
    }
}

/// In-process loopback transport
pub mod memory;

pub use memory::MemoryTransport;
