//! Trusted dealer for local networks and tests
//!
//! Produces a group key split into Shamir shares, one identity per node, and
//! a pool of shared nonces. Each nonce is built the way a distributed run
//! would build it: every partner contributes a random polynomial, the public
//! commitments sum to `K`, and each node's nonce share is the sum of all
//! contributions evaluated at its index.

use std::collections::BTreeMap;

use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use tracing::{info, instrument};
use uuid::Uuid;

use super::MemoryKeyProvider;
use crate::crypto::CryptoPrimitives;
use crate::{
    Error, NodeIdentity, Party, Partner, PeerId, Point, Result, SecretShare, SharedNonce,
};

/// Key material dealt to one node
#[derive(Debug, Clone)]
pub struct DealtNode {
    /// Node identity; its private key is the node's group key share
    pub identity: NodeIdentity,
    /// Shared nonces with this node's private share
    pub nonces: Vec<SharedNonce>,
}

/// Output of [`deal`]
#[derive(Debug, Clone)]
pub struct Deal {
    /// Group public key
    pub group_public_key: Point,
    /// Party of all dealt nodes
    pub party: Party,
    /// Per-node key material, ordered by share index
    pub nodes: Vec<DealtNode>,
}

impl Deal {
    /// Nonces node `node` originates with, and those it only co-signs
    ///
    /// Nonce `i` of the pool is allocatable only on node `i % nodes`.
    pub fn nonce_pools(&self, node: usize) -> Result<(Vec<SharedNonce>, Vec<SharedNonce>)> {
        let dealt = self
            .nodes
            .get(node)
            .ok_or_else(|| Error::InvalidConfig(format!("No dealt node {}", node)))?;

        let (own, partner): (Vec<_>, Vec<_>) = dealt
            .nonces
            .iter()
            .enumerate()
            .partition(|(i, _)| i % self.nodes.len() == node);
        Ok((
            own.into_iter().map(|(_, n)| n.clone()).collect(),
            partner.into_iter().map(|(_, n)| n.clone()).collect(),
        ))
    }

    /// In-memory provider holding the party and the nonces of one node
    pub fn provider_for(&self, node: usize) -> Result<MemoryKeyProvider> {
        let provider = MemoryKeyProvider::new();
        self.load_into(node, &provider)?;
        Ok(provider)
    }

    /// Register the party and the nonces of one node with `provider`
    pub fn load_into(&self, node: usize, provider: &MemoryKeyProvider) -> Result<()> {
        let (own, partner) = self.nonce_pools(node)?;

        provider.add_party(self.party.clone())?;
        for nonce in own {
            provider.add_nonce(nonce)?;
        }
        for nonce in partner {
            provider.add_partner_nonce(nonce)?;
        }
        Ok(())
    }
}

/// Generate a random polynomial of degree t-1
fn generate_polynomial(threshold: usize) -> Vec<Scalar> {
    let mut rng = OsRng;
    (0..threshold).map(|_| Scalar::random(&mut rng)).collect()
}

/// Evaluate polynomial at a point
fn evaluate_polynomial(coefficients: &[Scalar], x: u64) -> Scalar {
    let x_scalar = Scalar::from(x);
    let mut result = Scalar::ZERO;
    let mut x_power = Scalar::ONE;

    for coef in coefficients {
        result += *coef * x_power;
        x_power *= x_scalar;
    }

    result
}

/// Deal a `threshold`-of-`peers.len()` key set with `nonce_count` shared nonces
#[instrument(skip(peers, crypto))]
pub fn deal(
    party_id: &str,
    threshold: usize,
    peers: &[PeerId],
    nonce_count: usize,
    crypto: &dyn CryptoPrimitives,
) -> Result<Deal> {
    if threshold == 0 || threshold > peers.len() {
        return Err(Error::InvalidConfig(format!(
            "Threshold {} outside 1..={}",
            threshold,
            peers.len()
        )));
    }

    let indices: Vec<u32> = (1..=peers.len() as u32).collect();

    let key_poly = generate_polynomial(threshold);
    let group_public_key = Point(ProjectivePoint::GENERATOR * key_poly[0]);

    let mut identities = Vec::with_capacity(peers.len());
    let mut partners = Vec::with_capacity(peers.len());
    for (&index, peer) in indices.iter().zip(peers) {
        let private_key =
            SecretShare::from_scalar(&evaluate_polynomial(&key_poly, u64::from(index)));
        let identity = NodeIdentity::from_secret(peer.clone(), private_key, crypto)?;

        partners.push(Partner {
            index,
            wallet: identity.wallet,
            peer: peer.clone(),
        });
        identities.push(identity);
    }

    let party = Party {
        id: party_id.to_string(),
        threshold,
        partners,
    };

    let mut per_node: Vec<Vec<SharedNonce>> = vec![Vec::with_capacity(nonce_count); peers.len()];
    for _ in 0..nonce_count {
        let contributions: Vec<Vec<Scalar>> =
            indices.iter().map(|_| generate_polynomial(threshold)).collect();

        let commitments: BTreeMap<u32, Point> = indices
            .iter()
            .zip(&contributions)
            .map(|(&index, poly)| (index, Point(ProjectivePoint::GENERATOR * poly[0])))
            .collect();
        let total = Point(
            commitments
                .values()
                .fold(ProjectivePoint::IDENTITY, |acc, c| acc + c.0),
        );

        let shares: BTreeMap<u32, Scalar> = indices
            .iter()
            .map(|&index| {
                let share = contributions
                    .iter()
                    .fold(Scalar::ZERO, |acc, poly| {
                        acc + evaluate_polynomial(poly, u64::from(index))
                    });
                (index, share)
            })
            .collect();
        let public_shares: BTreeMap<u32, Point> = shares
            .iter()
            .map(|(&index, share)| (index, Point(ProjectivePoint::GENERATOR * share)))
            .collect();

        let nonce = SharedNonce {
            id: format!("{}:{}", party_id, Uuid::new_v4()),
            party: party_id.to_string(),
            total,
            commitments,
            public_shares,
            private_share: None,
        };

        for (slot, (_, share)) in per_node.iter_mut().zip(&shares) {
            slot.push(SharedNonce {
                private_share: Some(SecretShare::from_scalar(share)),
                ..nonce.clone()
            });
        }
    }

    info!(
        party = party_id,
        threshold,
        parties = peers.len(),
        nonces = nonce_count,
        group_public_key = %group_public_key,
        "Key set dealt"
    );

    Ok(Deal {
        group_public_key,
        party,
        nodes: identities
            .into_iter()
            .zip(per_node)
            .map(|(identity, nonces)| DealtNode { identity, nonces })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Secp256k1Schnorr;

    fn peers(n: usize) -> Vec<PeerId> {
        (1..=n).map(|i| format!("node-{}", i)).collect()
    }

    #[test]
    fn test_deal_shapes() {
        let crypto = Secp256k1Schnorr::new();
        let deal = deal("p1", 3, &peers(5), 4, &crypto).unwrap();

        assert_eq!(deal.party.len(), 5);
        assert_eq!(deal.nodes.len(), 5);
        for (node, partner) in deal.nodes.iter().zip(&deal.party.partners) {
            assert_eq!(node.identity.wallet, partner.wallet);
            assert_eq!(node.nonces.len(), 4);
            assert!(node.nonces.iter().all(|n| n.validate().is_ok()));
        }
    }

    #[test]
    fn test_nonce_shares_match_public_shares() {
        let crypto = Secp256k1Schnorr::new();
        let deal = deal("p1", 2, &peers(3), 1, &crypto).unwrap();

        for (node, partner) in deal.nodes.iter().zip(&deal.party.partners) {
            let nonce = &node.nonces[0];
            let private = nonce.private_share.as_ref().unwrap();
            let expected = crypto.public_key(private).unwrap();
            assert_eq!(nonce.public_share(partner.index), Some(&expected));
        }
    }

    #[tokio::test]
    async fn test_originators_allocate_disjoint_nonces() {
        use crate::keys::KeyShareProvider;

        let crypto = Secp256k1Schnorr::new();
        let deal = deal("p1", 2, &peers(3), 3, &crypto).unwrap();
        let party = "p1".to_string();

        let mut allocated = Vec::new();
        for node in 0..3 {
            let provider = deal.provider_for(node).unwrap();
            allocated.push(provider.allocate_nonce(&party).await.unwrap());
            assert!(provider.allocate_nonce(&party).await.is_err());
        }
        allocated.sort();
        allocated.dedup();
        assert_eq!(allocated.len(), 3);
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let crypto = Secp256k1Schnorr::new();
        assert!(deal("p1", 4, &peers(3), 1, &crypto).is_err());
        assert!(deal("p1", 0, &peers(3), 1, &crypto).is_err());
    }
}
