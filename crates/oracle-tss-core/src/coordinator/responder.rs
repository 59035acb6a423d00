//! Inbound partial signature requests

use std::sync::Arc;

use tracing::{info, instrument};

use super::signer::{check_quorum, ShareSigner};
use super::Collaborators;
use crate::app::OracleApp;
use crate::transport::RpcRegistry;
use crate::types::WantSignResponse;
use crate::{want_sign_method, Error, Request, Result};

/// Validates a partner's request and signs this node's share
pub struct Responder {
    app: Arc<dyn OracleApp>,
    deps: Collaborators,
    signer: Arc<ShareSigner>,
}

impl Responder {
    pub(crate) fn new(app: Arc<dyn OracleApp>, deps: Collaborators, signer: Arc<ShareSigner>) -> Self {
        Self { app, deps, signer }
    }

    /// Independently validate `request` and return this node's partial signature
    ///
    /// Nothing is signed unless the application's recomputation agrees with
    /// the claimed result.
    #[instrument(skip(self, request), fields(request = %request.id, from = %request.peer_id))]
    pub async fn handle_want_sign(&self, request: Request) -> Result<WantSignResponse> {
        if request.app != self.app.name() {
            return Err(Error::UnknownMethod(format!(
                "App {} is not served here",
                request.app
            )));
        }

        let party = self.deps.keys.resolve_party(request.party_id()).await?;
        check_quorum(&request, &party)?;
        if party.partner(&request.owner).is_none() {
            return Err(Error::UnknownSigner(format!(
                "Originator {} is not in party {}",
                request.owner, party.id
            )));
        }

        let agreed = self.app.validate_and_compute(&request).await?;
        let claimed_hash = self.app.canonical_hash(&request, &request.data.result)?;
        if self.app.canonical_hash(&request, &agreed)? != claimed_hash {
            return Err(Error::ResultMismatch(format!(
                "Recomputed result of request {} differs from the claimed one",
                request.id
            )));
        }

        let signature = self.signer.sign(&request, &claimed_hash, agreed).await?;

        info!(owner = %signature.owner, "Partial signature issued");
        Ok(WantSignResponse {
            signature,
            auxiliary: None,
        })
    }

    /// Register the `wantSign` handler of this app
    pub fn register(self: &Arc<Self>, registry: &mut RpcRegistry) {
        let responder = self.clone();
        registry.register(want_sign_method(self.app.name()), move |payload| {
            let responder = responder.clone();
            async move {
                let request: Request = serde_json::from_value(payload)
                    .map_err(|e| Error::Deserialization(e.to_string()))?;
                let response = responder.handle_want_sign(request).await?;
                Ok::<_, Error>(serde_json::to_value(response)?)
            }
        });
    }
}
