//! Append-only record of consumed nonces
//!
//! One JSON line per nonce, written and synced before the nonce signs
//! anything, so a restarted node never signs a second message with it.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::crypto::MessageHash;
use crate::{Error, NonceId, Result};

#[derive(Serialize, Deserialize)]
struct JournalEntry {
    nonce: NonceId,
    hash: String,
}

/// File-backed list of `(nonce, signed hash)` pairs
pub struct NonceJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl NonceJournal {
    /// Open (or create) the journal at `path` and return the entries it holds
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<(NonceId, MessageHash)>)> {
        let path = path.as_ref().to_path_buf();

        let mut spent = Vec::new();
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                for (line_no, line) in text.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let entry: JournalEntry = serde_json::from_str(line).map_err(|e| {
                        Error::Store(format!("{} line {}: {}", path.display(), line_no + 1, e))
                    })?;
                    spent.push((entry.nonce, decode_hash(&entry.hash)?));
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Store(format!("Reading {}: {}", path.display(), e))),
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::Store(format!("Opening {}: {}", path.display(), e)))?;

        info!(path = %path.display(), spent = spent.len(), "Nonce journal opened");
        Ok((
            Self {
                path,
                file: Mutex::new(file),
            },
            spent,
        ))
    }

    /// Durably record that `nonce_id` signs `hash`
    pub fn record(&self, nonce_id: &NonceId, hash: &MessageHash) -> Result<()> {
        let mut line = serde_json::to_string(&JournalEntry {
            nonce: nonce_id.clone(),
            hash: hex::encode(hash),
        })
        .map_err(|e| Error::Serialization(e.to_string()))?;
        line.push('\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| Error::Store("Nonce journal lock poisoned".into()))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| Error::Store(format!("Writing {}: {}", self.path.display(), e)))
    }
}

fn decode_hash(text: &str) -> Result<MessageHash> {
    hex::decode(text)
        .ok()
        .and_then(|bytes| MessageHash::try_from(bytes.as_slice()).ok())
        .ok_or_else(|| Error::Store(format!("Invalid hash in nonce journal: {}", text)))
}
