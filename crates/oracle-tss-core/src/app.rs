//! Application capability consumed by the signing flow
//!
//! An oracle application knows how to produce a result for a new request and
//! how to independently check a result claimed by another node. The signing
//! coordinator composes with any application through [`OracleApp`].

use serde_json::Value;
use sha3::{Digest, Keccak256};

use crate::crypto::MessageHash;
use crate::{Request, Result};

pub use ::async_trait::async_trait;

/// Result produced by the originating node
#[derive(Debug, Clone, PartialEq)]
pub struct Computed {
    /// Value every partner must reproduce
    pub result: Value,
    /// Source-specific raw data kept out of the signed content
    pub raw: Option<Value>,
}

/// Application-specific logic of an oracle
#[async_trait]
pub trait OracleApp: Send + Sync {
    /// Application name, used to namespace RPC methods
    fn name(&self) -> &str;

    /// Compute a fresh result for `method` with `params`
    async fn compute(&self, method: &str, params: &Value) -> Result<Computed>;

    /// Recompute the result of `request` independently
    ///
    /// Returns the payload this node agrees to sign, or
    /// [`crate::Error::ResultMismatch`] when the claimed result diverges
    /// beyond the application's tolerance.
    async fn validate_and_compute(&self, request: &Request) -> Result<Value>;

    /// Hash of the signed content; must depend on result fields only
    fn canonical_hash(&self, _request: &Request, result: &Value) -> Result<MessageHash> {
        Ok(canonical_result_hash(result))
    }
}

/// Keccak-256 of the canonical JSON encoding of `result`
pub fn canonical_result_hash(result: &Value) -> MessageHash {
    let mut encoded = Vec::new();
    write_canonical(result, &mut encoded);
    Keccak256::digest(&encoded).into()
}

/// Compact JSON with object keys in byte order
fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push(b'{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(Value::String(key.clone()).to_string().as_bytes());
                out.push(b':');
                write_canonical(value, out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        scalar => out.extend_from_slice(scalar.to_string().as_bytes()),
    }
}
