//! Request origination and fan-out to partners

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::attribution::check_partial;
use super::signer::{check_quorum, ShareSigner};
use super::Collaborators;
use crate::app::OracleApp;
use crate::crypto::MessageHash;
use crate::types::{InitBlock, WantSignResponse};
use crate::{
    want_sign_method, Address, Error, NodeIdentity, Party, Partner, Request, RequestData,
    RequestDraft, Result, SharedNonce, Signature,
};

/// Builds requests, signs this node's share, and asks partners for theirs
pub struct Originator {
    node: Arc<NodeIdentity>,
    app: Arc<dyn OracleApp>,
    deps: Collaborators,
    signer: Arc<ShareSigner>,
}

/// State shared by the tasks of one broadcast
struct Fanout {
    deps: Collaborators,
    app: Arc<dyn OracleApp>,
    request: Request,
    party: Party,
    nonce: SharedNonce,
    result_hash: MessageHash,
    method: String,
    payload: serde_json::Value,
}

impl Originator {
    pub(crate) fn new(
        node: Arc<NodeIdentity>,
        app: Arc<dyn OracleApp>,
        deps: Collaborators,
        signer: Arc<ShareSigner>,
    ) -> Self {
        Self {
            node,
            app,
            deps,
            signer,
        }
    }

    /// Assemble and persist a new request with a freshly allocated nonce
    #[instrument(skip(self, draft), fields(app = %draft.app, method = %draft.method))]
    pub async fn create_request(&self, draft: RequestDraft) -> Result<Request> {
        let party = self.deps.keys.resolve_party(&draft.party).await?;
        let nonce = self.deps.keys.allocate_nonce(&party.id).await?;

        let request = Request {
            id: Uuid::new_v4(),
            app: draft.app,
            method: draft.method,
            owner: self.node.wallet,
            peer_id: self.node.peer.clone(),
            data: RequestData {
                init: InitBlock {
                    party: party.id.clone(),
                    nonce,
                },
                params: draft.params,
                result: draft.result,
                raw: draft.raw,
            },
            n_sign: draft.n_sign,
            started_at: Utc::now(),
            confirmed_at: None,
        };
        check_quorum(&request, &party)?;

        self.deps.store.insert_request(&request).await?;

        info!(
            request = %request.id,
            party = %party.id,
            nonce = %request.nonce_id(),
            n_sign = request.n_sign,
            "Request created"
        );

        Ok(request)
    }

    /// Sign this node's share over `result_hash` and persist it
    #[instrument(skip(self, request, result_hash), fields(request = %request.id))]
    pub async fn sign_own_share(
        &self,
        request: &Request,
        result_hash: &MessageHash,
    ) -> Result<Signature> {
        let signature = self
            .signer
            .sign(request, result_hash, request.data.result.clone())
            .await?;
        self.deps.store.put_signature(signature.clone()).await?;

        debug!(owner = %signature.owner, "Own share stored");
        Ok(signature)
    }

    /// Ask every other partner for a partial signature
    ///
    /// Each partner gets an independent task; a failing or slow partner never
    /// affects the others and is not retried. Accepted responses are
    /// persisted as they arrive. The returned handles yield the accepted
    /// owner per partner and may be dropped without cancelling the calls.
    #[instrument(skip(self, request), fields(request = %request.id))]
    pub async fn broadcast(&self, request: &Request) -> Result<Vec<JoinHandle<Result<Address>>>> {
        let party = self.deps.keys.resolve_party(request.party_id()).await?;
        let nonce = self.deps.keys.resolve_nonce(request.nonce_id()).await?;
        let result_hash = self.app.canonical_hash(request, &request.data.result)?;

        let fanout = Arc::new(Fanout {
            deps: self.deps.clone(),
            app: self.app.clone(),
            request: request.clone(),
            party: party.clone(),
            nonce,
            result_hash,
            method: want_sign_method(&request.app),
            payload: serde_json::to_value(request)?,
        });

        let handles: Vec<_> = party
            .others(&self.node.wallet)
            .cloned()
            .map(|partner| {
                let fanout = fanout.clone();
                tokio::spawn(async move { request_partner_signature(fanout, partner).await })
            })
            .collect();

        debug!(partners = handles.len(), "Request broadcast");
        Ok(handles)
    }
}

async fn request_partner_signature(fanout: Arc<Fanout>, partner: Partner) -> Result<Address> {
    let outcome = call_partner(&fanout, &partner).await;
    match &outcome {
        Ok(owner) => debug!(request = %fanout.request.id, owner = %owner, "Partner signature accepted"),
        Err(e) if e.is_rejection() => warn!(
            request = %fanout.request.id,
            peer = %partner.peer,
            error = %e,
            "Partner declined to sign"
        ),
        Err(e) => warn!(
            request = %fanout.request.id,
            peer = %partner.peer,
            error = %e,
            "Partner signature not obtained"
        ),
    }
    outcome
}

async fn call_partner(fanout: &Fanout, partner: &Partner) -> Result<Address> {
    let response = fanout
        .deps
        .transport
        .call(&partner.peer, &fanout.method, fanout.payload.clone())
        .await?;
    let WantSignResponse {
        mut signature,
        auxiliary,
    } = serde_json::from_value(response).map_err(|e| Error::Deserialization(e.to_string()))?;

    if signature.request != fanout.request.id {
        return Err(Error::VerificationFailed(format!(
            "Response signs request {} instead of {}",
            signature.request, fanout.request.id
        )));
    }
    if signature.owner != partner.wallet {
        return Err(Error::UnknownSigner(format!(
            "{} answered for {}",
            signature.owner, partner.wallet
        )));
    }

    let signed_hash = fanout.app.canonical_hash(&fanout.request, &signature.data)?;
    if signed_hash != fanout.result_hash {
        return Err(Error::VerificationFailed(format!(
            "{} signed a different payload",
            signature.owner
        )));
    }

    let owner = check_partial(
        fanout.deps.crypto.as_ref(),
        &fanout.party,
        &fanout.nonce,
        &fanout.result_hash,
        &signature,
    )?;

    if signature.auxiliary.is_none() {
        signature.auxiliary = auxiliary;
    }
    fanout.deps.store.put_signature(signature).await?;
    Ok(owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::testing::Network;
    use crate::store::SignatureStore;

    #[tokio::test]
    async fn test_create_request_allocates_distinct_nonces() {
        let net = Network::new(3, 2);
        let origin = net.node(0);

        let first = origin.originator().create_request(net.draft(2)).await.unwrap();
        let second = origin.originator().create_request(net.draft(2)).await.unwrap();

        assert_ne!(first.nonce_id(), second.nonce_id());
        assert_eq!(first.owner, origin.identity().wallet);
        assert!(origin.store.get_request(&first.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_request_checks_quorum() {
        let net = Network::new(3, 2);
        let origin = net.node(0);

        let too_many = origin.originator().create_request(net.draft(4)).await;
        let too_few = origin.originator().create_request(net.draft(1)).await;

        assert!(matches!(too_many, Err(Error::InvalidConfig(_))));
        assert!(matches!(too_few, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_unknown_party_is_key_resolution_error() {
        let net = Network::new(3, 2);
        let mut draft = net.draft(2);
        draft.party = "missing".into();

        let result = net.node(0).originator().create_request(draft).await;
        assert!(matches!(result, Err(Error::KeyResolution(_))));
    }

    #[tokio::test]
    async fn test_broadcast_collects_partner_signatures() {
        let net = Network::new(3, 2);
        let origin = net.node(0);
        let request = origin.originator().create_request(net.draft(2)).await.unwrap();

        let handles = origin.originator().broadcast(&request).await.unwrap();
        assert_eq!(handles.len(), 2);
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        let stored = origin.store.signatures(&request.id).await.unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_partner_does_not_block_others() {
        let net = Network::new(3, 2);
        net.transport.set_offline("node-2");
        let origin = net.node(0);
        let request = origin.originator().create_request(net.draft(2)).await.unwrap();

        let results: Vec<Result<Address>> = futures_util::future::join_all(
            origin.originator().broadcast(&request).await.unwrap(),
        )
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(Error::Transport(_)))));
    }
}
