//! Threshold signing flow
//!
//! - [`Originator`]: creates requests, signs its own share, fans out
//! - [`Responder`]: validates partner requests and returns partial signatures
//! - [`Collector`]: gathers partials, aggregates and confirms
//! - [`SigningCoordinator`]: composes the three for one node

pub mod attribution;
pub mod collector;
pub mod originator;
pub mod responder;
pub mod session;
pub mod signer;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::app::OracleApp;
use crate::config::{CoordinatorConfig, NetworkParams};
use crate::crypto::CryptoPrimitives;
use crate::keys::KeyShareProvider;
use crate::store::SignatureStore;
use crate::transport::{RpcRegistry, Transport};
use crate::{ConfirmedResult, NodeIdentity, PartyId, RequestDraft, Result};

pub use attribution::{check_owner, check_partial, recover_signer};
pub use collector::{CollectOutcome, Collector};
pub use originator::Originator;
pub use responder::Responder;
pub use session::{SessionState, SigningSession};
pub use signer::ShareSigner;

/// Capacity of the confirmation event channel
const CONFIRMED_CHANNEL_CAPACITY: usize = 64;

/// External services the signing flow depends on
#[derive(Clone)]
pub struct Collaborators {
    pub keys: Arc<dyn KeyShareProvider>,
    pub crypto: Arc<dyn CryptoPrimitives>,
    pub store: Arc<dyn SignatureStore>,
    pub transport: Arc<dyn Transport>,
}

/// One node's signing coordinator for one application
pub struct SigningCoordinator {
    node: Arc<NodeIdentity>,
    app: Arc<dyn OracleApp>,
    originator: Originator,
    responder: Arc<Responder>,
    collector: Collector,
    confirmed: broadcast::Sender<ConfirmedResult>,
}

impl SigningCoordinator {
    pub fn new(
        node: NodeIdentity,
        app: Arc<dyn OracleApp>,
        deps: Collaborators,
        params: NetworkParams,
        config: CoordinatorConfig,
    ) -> Self {
        let node = Arc::new(node);
        let signer = Arc::new(ShareSigner::new(node.clone(), deps.clone()));
        let (confirmed, _) = broadcast::channel(CONFIRMED_CHANNEL_CAPACITY);

        Self {
            originator: Originator::new(node.clone(), app.clone(), deps.clone(), signer.clone()),
            responder: Arc::new(Responder::new(app.clone(), deps.clone(), signer)),
            collector: Collector::new(app.clone(), deps, params, config),
            node,
            app,
            confirmed,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.node
    }

    pub fn app(&self) -> &Arc<dyn OracleApp> {
        &self.app
    }

    pub fn originator(&self) -> &Originator {
        &self.originator
    }

    pub fn responder(&self) -> &Arc<Responder> {
        &self.responder
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// Expose this node's partial signing endpoint on `registry`
    pub fn register(&self, registry: &mut RpcRegistry) {
        self.responder.register(registry);
    }

    /// Results confirmed by this node from now on
    pub fn subscribe_confirmed(&self) -> broadcast::Receiver<ConfirmedResult> {
        self.confirmed.subscribe()
    }

    /// Compute a result with the application and have it threshold-signed
    pub async fn sign(
        &self,
        method: &str,
        party: &PartyId,
        n_sign: usize,
        params: Value,
    ) -> Result<ConfirmedResult> {
        let computed = self.app.compute(method, &params).await?;

        self.sign_draft(RequestDraft {
            app: self.app.name().to_string(),
            method: method.to_string(),
            party: party.clone(),
            n_sign,
            params,
            result: computed.result,
            raw: computed.raw,
        })
        .await
    }

    /// Run the full signing flow for an already computed result
    ///
    /// Returns with `confirmed == false` when no verified aggregate was
    /// reached in time.
    #[instrument(skip(self, draft), fields(app = %draft.app, party = %draft.party))]
    pub async fn sign_draft(&self, draft: RequestDraft) -> Result<ConfirmedResult> {
        let request = self.originator.create_request(draft).await?;
        let result_hash = self.app.canonical_hash(&request, &request.data.result)?;

        self.originator.sign_own_share(&request, &result_hash).await?;
        // partner calls keep running after their handles are dropped
        drop(self.originator.broadcast(&request).await?);

        let outcome = self.collector.collect(&request).await?;
        let result = outcome.to_result();

        if outcome.confirmed() {
            info!(request = %request.id, "Signed result confirmed");
            // no subscribers is fine
            let _ = self.confirmed.send(result.clone());
        }
        Ok(result)
    }
}
