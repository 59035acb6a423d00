//! Quorum collection, aggregation and final verification

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::attribution::check_partial;
use super::session::{SessionState, SigningSession};
use super::Collaborators;
use crate::app::OracleApp;
use crate::config::{CoordinatorConfig, NetworkParams};
use crate::crypto::MessageHash;
use crate::types::ResultSignature;
use crate::{
    Address, ConfirmedResult, Error, Party, Request, RequestId, Result, SchnorrSig,
    SharedNonce, Signature,
};

/// Final outcome of a collection round
#[derive(Debug, Clone)]
pub struct CollectOutcome {
    /// Terminal state
    pub state: SessionState,
    /// Request as stored after the round
    pub request: Request,
    /// Aggregate signature on success; collected partials (or nothing,
    /// depending on configuration) on timeout
    pub signatures: Vec<Signature>,
    /// Number of aggregation attempts made
    pub attempts: usize,
}

impl CollectOutcome {
    /// Whether the aggregate verified
    pub fn confirmed(&self) -> bool {
        self.state == SessionState::Confirmed
    }

    /// External confirmation payload
    pub fn to_result(&self) -> ConfirmedResult {
        ConfirmedResult::new(
            self.confirmed(),
            &self.request,
            self.signatures.iter().map(ResultSignature::from).collect(),
        )
    }
}

/// Contribution admitted toward the quorum
#[derive(Debug, Clone)]
struct Contribution {
    index: u32,
    signature: Signature,
}

/// Polls accumulated partial signatures until a verified aggregate or timeout
pub struct Collector {
    app: Arc<dyn OracleApp>,
    deps: Collaborators,
    params: NetworkParams,
    config: CoordinatorConfig,
}

impl Collector {
    pub(crate) fn new(
        app: Arc<dyn OracleApp>,
        deps: Collaborators,
        params: NetworkParams,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            app,
            deps,
            params,
            config,
        }
    }

    /// Address the final aggregate signature is attributed to
    pub fn group_address(&self) -> Address {
        self.deps.crypto.derive_address(&self.params.group_public_key)
    }

    /// Collect partial signatures of `request` until confirmed or timed out
    #[instrument(skip(self, request), fields(request = %request.id, n_sign = request.n_sign))]
    pub async fn collect(&self, request: &Request) -> Result<CollectOutcome> {
        let party = self.deps.keys.resolve_party(request.party_id()).await?;
        let nonce = self.deps.keys.resolve_nonce(request.nonce_id()).await?;
        let result_hash = self.app.canonical_hash(request, &request.data.result)?;

        let mut changes = self.deps.store.subscribe();
        let mut session = SigningSession::new(request.clone());
        let deadline = Instant::now() + self.config.max_wait();
        let mut contributions: Vec<Contribution>;

        loop {
            contributions = self
                .contributions(request, &party, &nonce, &result_hash)
                .await?;

            if contributions.len() >= request.n_sign {
                session.record_attempt();
                match self.aggregate(&party, &result_hash, &contributions[..request.n_sign]) {
                    Ok(aggregate) => {
                        let (confirmed, signature) = self.finalize(request, aggregate).await?;
                        session.confirm(confirmed);

                        info!(
                            attempts = session.attempts(),
                            signers = contributions.len(),
                            "Request confirmed"
                        );
                        return Ok(session.into_outcome(vec![signature]));
                    }
                    Err(e) => warn!(
                        attempt = session.attempts(),
                        error = %e,
                        "Aggregation attempt failed"
                    ),
                }
            } else {
                debug!(
                    have = contributions.len(),
                    need = request.n_sign,
                    "Waiting for partial signatures"
                );
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = self.config.poll_interval().min(deadline - now);
            wait_for_write(&mut changes, request.id, wait).await;
        }

        session.time_out();
        info!(
            attempts = session.attempts(),
            signers = contributions.len(),
            "Quorum not reached before timeout"
        );

        let exposed = if self.config.expose_partials_on_timeout {
            contributions.into_iter().map(|c| c.signature).collect()
        } else {
            Vec::new()
        };
        Ok(session.into_outcome(exposed))
    }

    /// Distinct signatures that verify as partials of `result_hash`, ordered
    /// by share index
    async fn contributions(
        &self,
        request: &Request,
        party: &Party,
        nonce: &SharedNonce,
        result_hash: &MessageHash,
    ) -> Result<Vec<Contribution>> {
        let mut by_owner: HashMap<Address, Contribution> = HashMap::new();

        for signature in self.deps.store.signatures(&request.id).await? {
            if self.app.canonical_hash(request, &signature.data)? != *result_hash {
                debug!(owner = %signature.owner, "Signature over a different payload");
                continue;
            }
            if let Err(e) = check_partial(
                self.deps.crypto.as_ref(),
                party,
                nonce,
                result_hash,
                &signature,
            ) {
                // the aggregate record of a confirmed request lands here too
                debug!(owner = %signature.owner, error = %e, "Signature not counted");
                continue;
            }
            let index = match party.index_of(&signature.owner) {
                Some(index) => index,
                None => continue,
            };

            // later writes replace earlier ones
            let replace = by_owner
                .get(&signature.owner)
                .map_or(true, |existing| existing.signature.timestamp <= signature.timestamp);
            if replace {
                by_owner.insert(signature.owner, Contribution { index, signature });
            }
        }

        let mut contributions: Vec<Contribution> = by_owner.into_values().collect();
        contributions.sort_by_key(|c| c.index);
        Ok(contributions)
    }

    fn aggregate(
        &self,
        party: &Party,
        result_hash: &MessageHash,
        selected: &[Contribution],
    ) -> Result<SchnorrSig> {
        let partials: Vec<SchnorrSig> = selected.iter().map(|c| c.signature.signature).collect();
        let indices: Vec<u32> = selected.iter().map(|c| c.index).collect();

        let aggregate = self
            .deps
            .crypto
            .aggregate(party.threshold, &partials, &indices)?;

        if !self
            .deps
            .crypto
            .verify(&self.params.group_public_key, result_hash, &aggregate)
        {
            return Err(Error::VerificationFailed(format!(
                "Aggregate of signers {:?} does not verify under the group key",
                indices
            )));
        }
        Ok(aggregate)
    }

    /// Confirm the request and persist the aggregate signature
    async fn finalize(
        &self,
        request: &Request,
        aggregate: SchnorrSig,
    ) -> Result<(Request, Signature)> {
        let now = Utc::now();
        let confirmed = self.deps.store.confirm_request(&request.id, now).await?;

        let signature = Signature {
            request: request.id,
            owner: self.group_address(),
            pub_key: self.params.group_public_key,
            timestamp: now,
            data: request.data.result.clone(),
            signature: aggregate,
            auxiliary: None,
        };
        self.deps.store.put_signature(signature.clone()).await?;
        Ok((confirmed, signature))
    }
}

/// Sleep for `wait`, returning early when a signature of `request` is written
async fn wait_for_write(
    changes: &mut broadcast::Receiver<RequestId>,
    request: RequestId,
    wait: Duration,
) {
    let sleep = tokio::time::sleep(wait);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return,
            written = changes.recv() => match written {
                Ok(id) if id == request => return,
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => return,
                Err(RecvError::Closed) => {
                    (&mut sleep).await;
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::testing::Network;
    use crate::store::SignatureStore;
    use k256::Scalar;

    #[tokio::test]
    async fn test_confirms_with_quorum() {
        let net = Network::new(3, 2);
        let origin = net.node(0);
        let request = origin.originator().create_request(net.draft(2)).await.unwrap();
        let hash = net.hash(&request);

        origin.originator().sign_own_share(&request, &hash).await.unwrap();
        for handle in origin.originator().broadcast(&request).await.unwrap() {
            handle.await.unwrap().unwrap();
        }

        let outcome = origin.collector().collect(&request).await.unwrap();

        assert!(outcome.confirmed());
        assert!(outcome.request.confirmed_at.is_some());
        assert_eq!(outcome.signatures.len(), 1);
        assert_eq!(outcome.signatures[0].owner, origin.collector().group_address());
        assert!(net.crypto().verify(
            &net.deal.group_public_key,
            &hash,
            &outcome.signatures[0].signature
        ));
    }

    #[tokio::test]
    async fn test_times_out_without_quorum() {
        let net = Network::new(3, 2);
        let origin = net.node(0);
        let request = origin.originator().create_request(net.draft(2)).await.unwrap();
        let hash = net.hash(&request);
        origin.originator().sign_own_share(&request, &hash).await.unwrap();

        let outcome = origin.collector().collect(&request).await.unwrap();

        assert_eq!(outcome.state, SessionState::TimedOut);
        assert!(outcome.signatures.is_empty());
        assert_eq!(outcome.attempts, 0);
        assert!(outcome.request.confirmed_at.is_none());
    }

    #[tokio::test]
    async fn test_timeout_can_expose_partials() {
        let net = Network::with_config(
            3,
            2,
            CoordinatorConfig {
                poll_interval_ms: 10,
                max_wait_ms: 50,
                expose_partials_on_timeout: true,
            },
        );
        let origin = net.node(0);
        let request = origin.originator().create_request(net.draft(2)).await.unwrap();
        let hash = net.hash(&request);
        origin.originator().sign_own_share(&request, &hash).await.unwrap();

        let outcome = origin.collector().collect(&request).await.unwrap();

        assert!(!outcome.confirmed());
        assert_eq!(outcome.signatures.len(), 1);
        assert_eq!(outcome.signatures[0].owner, origin.identity().wallet);
    }

    async fn partial_of(net: &Network, node: usize, request: &Request) -> Signature {
        net.node(node)
            .responder()
            .handle_want_sign(request.clone())
            .await
            .unwrap()
            .signature
    }

    #[tokio::test]
    async fn test_tampered_partial_is_not_counted() {
        let net = Network::new(3, 2);
        let origin = net.node(0);
        let request = origin.originator().create_request(net.draft(2)).await.unwrap();
        let hash = net.hash(&request);
        origin.originator().sign_own_share(&request, &hash).await.unwrap();

        let mut tampered = partial_of(&net, 1, &request).await;
        tampered.signature.s += Scalar::ONE;
        origin.store.put_signature(tampered).await.unwrap();

        let outcome = origin.collector().collect(&request).await.unwrap();

        assert!(!outcome.confirmed());
        assert_eq!(outcome.attempts, 0);
    }

    #[tokio::test]
    async fn test_honest_signer_replaces_tampered_one() {
        let net = Network::new(3, 2);
        let origin = net.node(0);
        let request = origin.originator().create_request(net.draft(2)).await.unwrap();
        let hash = net.hash(&request);
        origin.originator().sign_own_share(&request, &hash).await.unwrap();

        let mut tampered = partial_of(&net, 1, &request).await;
        tampered.signature.s += Scalar::ONE;
        origin.store.put_signature(tampered).await.unwrap();
        let honest = partial_of(&net, 2, &request).await;
        origin.store.put_signature(honest).await.unwrap();

        let outcome = origin.collector().collect(&request).await.unwrap();

        assert!(outcome.confirmed());
        assert_eq!(outcome.attempts, 1);
        assert!(net.crypto().verify(
            &net.deal.group_public_key,
            &hash,
            &outcome.signatures[0].signature
        ));
    }

    #[tokio::test]
    async fn test_forged_owner_is_not_counted() {
        let net = Network::new(3, 2);
        let origin = net.node(0);
        let request = origin.originator().create_request(net.draft(2)).await.unwrap();
        let hash = net.hash(&request);
        let own = origin.originator().sign_own_share(&request, &hash).await.unwrap();

        // same share, claimed by another partner
        let mut forged = own.clone();
        forged.owner = net.node(1).identity().wallet;
        origin.store.put_signature(forged).await.unwrap();

        let outcome = origin.collector().collect(&request).await.unwrap();
        assert!(!outcome.confirmed());
        assert_eq!(outcome.attempts, 0);
    }
}
