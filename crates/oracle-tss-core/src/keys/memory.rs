//! In-memory key-share provider

use std::path::Path;

use dashmap::{mapref::entry::Entry, DashMap};
use tracing::debug;

use super::{async_trait, KeyShareProvider, NonceJournal};
use crate::crypto::MessageHash;
use crate::{Error, NonceId, Party, PartyId, Result, SharedNonce};

/// Key-share provider backed by maps, loaded once at startup
///
/// Without a journal, consumed nonces are forgotten when the process exits.
#[derive(Default)]
pub struct MemoryKeyProvider {
    parties: DashMap<PartyId, Party>,
    nonces: DashMap<NonceId, SharedNonce>,
    allocated: DashMap<NonceId, ()>,
    /// nonce_id -> hash signed with it
    spent: DashMap<NonceId, MessageHash>,
    journal: Option<NonceJournal>,
}

impl MemoryKeyProvider {
    /// Create an empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider that persists consumed nonces to `path`, restoring
    /// the ones already recorded there
    pub fn with_journal(path: impl AsRef<Path>) -> Result<Self> {
        let (journal, spent) = NonceJournal::open(path)?;
        let provider = Self {
            journal: Some(journal),
            ..Self::default()
        };
        for (nonce_id, hash) in spent {
            provider.allocated.insert(nonce_id.clone(), ());
            provider.spent.insert(nonce_id, hash);
        }
        Ok(provider)
    }

    /// Register a party
    pub fn add_party(&self, party: Party) -> Result<()> {
        if party.threshold == 0 || party.threshold > party.len() {
            return Err(Error::InvalidConfig(format!(
                "Party {} threshold {} outside 1..={}",
                party.id,
                party.threshold,
                party.len()
            )));
        }
        self.parties.insert(party.id.clone(), party);
        Ok(())
    }

    /// Register a shared nonce after checking its commitments
    pub fn add_nonce(&self, nonce: SharedNonce) -> Result<()> {
        nonce.validate()?;
        self.nonces.insert(nonce.id.clone(), nonce);
        Ok(())
    }

    /// Register a nonce this node co-signs with but never originates with
    pub fn add_partner_nonce(&self, nonce: SharedNonce) -> Result<()> {
        nonce.validate()?;
        self.allocated.insert(nonce.id.clone(), ());
        self.nonces.insert(nonce.id.clone(), nonce);
        Ok(())
    }

    /// Number of nonces not yet handed out by [`KeyShareProvider::allocate_nonce`]
    pub fn available_nonces(&self, party_id: &PartyId) -> usize {
        self.nonces
            .iter()
            .filter(|n| n.party == *party_id && n.private_share.is_some())
            .filter(|n| !self.allocated.contains_key(n.key()))
            .count()
    }
}

#[async_trait]
impl KeyShareProvider for MemoryKeyProvider {
    async fn resolve_party(&self, party_id: &PartyId) -> Result<Party> {
        self.parties
            .get(party_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::KeyResolution(format!("Unknown party: {}", party_id)))
    }

    async fn resolve_nonce(&self, nonce_id: &NonceId) -> Result<SharedNonce> {
        self.nonces
            .get(nonce_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::KeyResolution(format!("Unknown nonce: {}", nonce_id)))
    }

    async fn allocate_nonce(&self, party_id: &PartyId) -> Result<NonceId> {
        let mut candidates: Vec<NonceId> = self
            .nonces
            .iter()
            .filter(|n| n.party == *party_id && n.private_share.is_some())
            .map(|n| n.key().clone())
            .collect();
        candidates.sort();

        for nonce_id in candidates {
            // insert is atomic per key, so two allocators never share a nonce
            if self.allocated.insert(nonce_id.clone(), ()).is_none() {
                debug!(party = %party_id, nonce = %nonce_id, "Nonce allocated");
                return Ok(nonce_id);
            }
        }

        Err(Error::KeyResolution(format!(
            "No unused nonce left for party {}",
            party_id
        )))
    }

    async fn consume_nonce(&self, nonce_id: &NonceId, hash: &MessageHash) -> Result<()> {
        match self.spent.entry(nonce_id.clone()) {
            Entry::Occupied(used) if used.get() != hash => Err(Error::NonceReuse(nonce_id.clone())),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                if let Some(journal) = &self.journal {
                    journal.record(nonce_id, hash)?;
                }
                slot.insert(*hash);
                self.allocated.insert(nonce_id.clone(), ());
                Ok(())
            }
        }
    }
}
