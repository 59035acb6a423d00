//! Node configuration file

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use oracle_tss_core::config::{CoordinatorConfig, NetworkParams};
use oracle_tss_core::crypto::CryptoPrimitives;
use oracle_tss_core::keys::{Deal, MemoryKeyProvider};
use oracle_tss_core::{NodeIdentity, Party, PeerId, Point, SecretShare, SharedNonce};
use serde::{Deserialize, Serialize};

use crate::app::QuoteConfig;

/// This node's long-term key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityConfig {
    /// Transport identity, as listed in party partner entries
    pub peer: PeerId,
    /// Hex-encoded key share
    pub private_key: SecretShare,
}

/// Everything a node loads at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// HTTP listen address
    pub listen: String,
    pub identity: IdentityConfig,
    /// Key every aggregate must verify against
    pub group_public_key: Point,
    pub parties: Vec<Party>,
    /// Nonces this node may originate requests with
    #[serde(default)]
    pub nonces: Vec<SharedNonce>,
    /// Nonces this node only co-signs with
    #[serde(default)]
    pub partner_nonces: Vec<SharedNonce>,
    /// Base URL by peer
    #[serde(default)]
    pub peers: HashMap<PeerId, String>,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub quote: QuoteConfig,
    /// File recording consumed nonces; without one they are forgotten on exit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce_journal: Option<PathBuf>,
}

impl NodeConfig {
    /// Load and validate a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Reading {}", path.display()))?;
        let config: NodeConfig = serde_json::from_str(&text)
            .with_context(|| format!("Parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).with_context(|| format!("Writing {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        self.coordinator.validate()?;
        if self.parties.is_empty() {
            bail!("No party configured");
        }
        for party in &self.parties {
            if !party.partners.iter().any(|p| p.peer == self.identity.peer) {
                bail!("Peer {} is not a partner of party {}", self.identity.peer, party.id);
            }
            for partner in &party.partners {
                if partner.peer != self.identity.peer && !self.peers.contains_key(&partner.peer) {
                    bail!("No URL for peer {} of party {}", partner.peer, party.id);
                }
            }
        }
        Ok(())
    }

    pub fn identity(&self, crypto: &dyn CryptoPrimitives) -> Result<NodeIdentity> {
        let identity = NodeIdentity::from_secret(
            self.identity.peer.clone(),
            self.identity.private_key.clone(),
            crypto,
        )?;

        for party in &self.parties {
            let listed = party.partners.iter().find(|p| p.peer == identity.peer);
            if listed.map(|p| p.wallet) != Some(identity.wallet) {
                bail!(
                    "Key of {} does not match its wallet in party {}",
                    identity.peer,
                    party.id
                );
            }
        }
        Ok(identity)
    }

    pub fn network(&self) -> NetworkParams {
        NetworkParams {
            group_public_key: self.group_public_key,
        }
    }

    /// Journal next to the configuration file at `path`, unless one is set
    pub fn default_journal(&mut self, path: &Path) {
        if self.nonce_journal.is_none() {
            self.nonce_journal = Some(path.with_extension("spent.jsonl"));
        }
    }

    /// Key-share provider loaded with the configured parties and nonces
    pub fn key_provider(&self) -> Result<MemoryKeyProvider> {
        let provider = match &self.nonce_journal {
            Some(path) => MemoryKeyProvider::with_journal(path)
                .with_context(|| format!("Opening nonce journal {}", path.display()))?,
            None => MemoryKeyProvider::new(),
        };
        for party in &self.parties {
            provider.add_party(party.clone())?;
        }
        for nonce in &self.nonces {
            provider.add_nonce(nonce.clone())?;
        }
        for nonce in &self.partner_nonces {
            provider.add_partner_nonce(nonce.clone())?;
        }
        Ok(provider)
    }

    /// Configuration of dealt node `node`; `urls` lists every node's base URL
    pub fn from_deal(
        deal: &Deal,
        node: usize,
        listen: String,
        urls: &[String],
        quote: QuoteConfig,
    ) -> Result<Self> {
        let (nonces, partner_nonces) = deal.nonce_pools(node)?;
        let identity = &deal.nodes[node].identity;

        let peers = deal
            .party
            .partners
            .iter()
            .zip(urls)
            .filter(|(partner, _)| partner.peer != identity.peer)
            .map(|(partner, url)| (partner.peer.clone(), url.clone()))
            .collect();

        Ok(Self {
            listen,
            identity: IdentityConfig {
                peer: identity.peer.clone(),
                private_key: identity.private_key.clone(),
            },
            group_public_key: deal.group_public_key,
            parties: vec![deal.party.clone()],
            nonces,
            partner_nonces,
            peers,
            coordinator: CoordinatorConfig::default(),
            quote,
            nonce_journal: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_tss_core::crypto::Secp256k1Schnorr;
    use oracle_tss_core::keys::{deal, KeyShareProvider};
    use oracle_tss_core::Error;

    fn dealt(n: usize) -> (Deal, Vec<String>) {
        let crypto = Secp256k1Schnorr::new();
        let peers: Vec<String> = (1..=n).map(|i| format!("node-{}", i)).collect();
        let urls = (1..=n).map(|i| format!("http://127.0.0.1:{}", 8700 + i)).collect();
        (deal("p1", 2, &peers, 2 * n, &crypto).unwrap(), urls)
    }

    #[test]
    fn test_dealt_config_round_trips_through_json() {
        let crypto = Secp256k1Schnorr::new();
        let (deal, urls) = dealt(3);
        let config =
            NodeConfig::from_deal(&deal, 1, "127.0.0.1:8702".into(), &urls, QuoteConfig::default())
                .unwrap();

        let text = serde_json::to_string(&config).unwrap();
        let loaded: NodeConfig = serde_json::from_str(&text).unwrap();

        assert!(loaded.validate().is_ok());
        assert_eq!(loaded.peers.len(), 2);
        assert_eq!(loaded.nonces.len(), 2);
        assert_eq!(loaded.partner_nonces.len(), 4);
        assert_eq!(
            loaded.identity(&crypto).unwrap().wallet,
            deal.nodes[1].identity.wallet
        );
    }

    #[test]
    fn test_journal_defaults_next_to_config() {
        let (deal, urls) = dealt(3);
        let mut config =
            NodeConfig::from_deal(&deal, 0, "127.0.0.1:8701".into(), &urls, QuoteConfig::default())
                .unwrap();

        config.default_journal(Path::new("devnet/node-1.json"));
        assert_eq!(
            config.nonce_journal.as_deref(),
            Some(Path::new("devnet/node-1.spent.jsonl"))
        );

        config.default_journal(Path::new("elsewhere/node-1.json"));
        assert_eq!(
            config.nonce_journal.as_deref(),
            Some(Path::new("devnet/node-1.spent.jsonl"))
        );
    }

    #[tokio::test]
    async fn test_restarted_node_refuses_spent_nonce() {
        let (deal, urls) = dealt(3);
        let mut config =
            NodeConfig::from_deal(&deal, 0, "127.0.0.1:8701".into(), &urls, QuoteConfig::default())
                .unwrap();
        let journal = std::env::temp_dir()
            .join(format!("oracle-node-{}-restart.spent.jsonl", std::process::id()));
        config.nonce_journal = Some(journal.clone());
        let party = "p1".to_string();

        let provider = config.key_provider().unwrap();
        let first = provider.allocate_nonce(&party).await.unwrap();
        provider.consume_nonce(&first, &[7u8; 32]).await.unwrap();
        drop(provider);

        let restarted = config.key_provider().unwrap();
        assert_ne!(restarted.allocate_nonce(&party).await.unwrap(), first);
        assert!(matches!(
            restarted.consume_nonce(&first, &[8u8; 32]).await,
            Err(Error::NonceReuse(_))
        ));
        std::fs::remove_file(journal).unwrap();
    }

    #[test]
    fn test_missing_peer_url_is_rejected() {
        let (deal, urls) = dealt(3);
        let mut config =
            NodeConfig::from_deal(&deal, 0, "127.0.0.1:8701".into(), &urls, QuoteConfig::default())
                .unwrap();
        config.peers.remove("node-3");

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_foreign_key_is_rejected() {
        let crypto = Secp256k1Schnorr::new();
        let (deal, urls) = dealt(3);
        let mut config =
            NodeConfig::from_deal(&deal, 0, "127.0.0.1:8701".into(), &urls, QuoteConfig::default())
                .unwrap();
        config.identity.private_key = deal.nodes[2].identity.private_key.clone();

        assert!(config.identity(&crypto).is_err());
    }
}
