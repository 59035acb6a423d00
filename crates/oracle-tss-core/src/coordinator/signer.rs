//! Partial signing shared by the originator and the responder

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use super::Collaborators;
use crate::crypto::MessageHash;
use crate::{Error, NodeIdentity, Party, Request, Result, Signature};

/// Signs this node's share of a request, consuming each nonce at most once
///
/// Consumption goes through the key-share provider, so every app served by
/// the node shares one nonce ledger.
pub struct ShareSigner {
    node: Arc<NodeIdentity>,
    deps: Collaborators,
}

impl ShareSigner {
    /// Create a signer for `node`
    pub fn new(node: Arc<NodeIdentity>, deps: Collaborators) -> Self {
        Self { node, deps }
    }

    /// This node's identity
    pub fn node(&self) -> &NodeIdentity {
        &self.node
    }

    /// Partial signature of `request` over `result_hash`, attributed to this node
    pub async fn sign(
        &self,
        request: &Request,
        result_hash: &MessageHash,
        payload: Value,
    ) -> Result<Signature> {
        let party = self.deps.keys.resolve_party(request.party_id()).await?;
        if party.partner(&self.node.wallet).is_none() {
            return Err(Error::KeyResolution(format!(
                "Node {} is not a member of party {}",
                self.node.wallet, party.id
            )));
        }

        let nonce = self.deps.keys.resolve_nonce(request.nonce_id()).await?;
        if nonce.party != party.id {
            return Err(Error::KeyResolution(format!(
                "Nonce {} belongs to party {}, not {}",
                nonce.id, nonce.party, party.id
            )));
        }
        let nonce_share = nonce.private_share.as_ref().ok_or_else(|| {
            Error::KeyResolution(format!("No private share of nonce {}", nonce.id))
        })?;

        self.deps.keys.consume_nonce(&nonce.id, result_hash).await?;

        let signature = self.deps.crypto.partial_sign(
            &self.node.private_key,
            nonce_share,
            &nonce.total,
            result_hash,
        )?;

        debug!(request = %request.id, nonce = %nonce.id, "Partial signature created");

        Ok(Signature {
            request: request.id,
            owner: self.node.wallet,
            pub_key: self.node.public_key,
            timestamp: Utc::now(),
            data: payload,
            signature,
            auxiliary: None,
        })
    }
}

/// Check the quorum size of a request against its party
pub(crate) fn check_quorum(request: &Request, party: &Party) -> Result<()> {
    if request.n_sign < party.threshold || request.n_sign > party.len() {
        return Err(Error::InvalidConfig(format!(
            "nSign {} outside {}..={} for party {}",
            request.n_sign,
            party.threshold,
            party.len(),
            party.id
        )));
    }
    Ok(())
}
