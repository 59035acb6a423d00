//! Core types for threshold signing requests

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use k256::{
    elliptic_curve::{
        sec1::{FromEncodedPoint, ToEncodedPoint},
        PrimeField,
    },
    AffinePoint, ProjectivePoint, Scalar,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::CryptoPrimitives;
use crate::{Error, Result};

/// Unique identifier for a signing request
pub type RequestId = Uuid;

/// Identifier of a party resolved by the key-share provider
pub type PartyId = String;

/// Identifier of a shared nonce resolved by the key-share provider
pub type NonceId = String;

/// Transport-level identity of a peer node
pub type PeerId = String;

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
}

macro_rules! serde_via_string {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

/// 20-byte wallet address derived from a public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(strip_hex_prefix(s))
            .map_err(|e| Error::Deserialization(format!("Invalid address hex: {}", e)))?;
        let array: [u8; 20] = bytes
            .try_into()
            .map_err(|_| Error::Deserialization("Address must be 20 bytes".into()))?;
        Ok(Address(array))
    }
}

serde_via_string!(Address);

/// Curve point, serialized as compressed SEC1 hex
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Point(pub ProjectivePoint);

impl Point {
    /// Compressed SEC1 encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_affine().to_encoded_point(true).as_bytes().to_vec()
    }

    /// Uncompressed SEC1 encoding (0x04 || x || y)
    pub fn to_uncompressed(&self) -> Vec<u8> {
        self.0.to_affine().to_encoded_point(false).as_bytes().to_vec()
    }

    /// Parse a SEC1-encoded point
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let encoded = k256::EncodedPoint::from_bytes(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))?;
        let affine_opt = AffinePoint::from_encoded_point(&encoded);
        let affine: AffinePoint = Option::<AffinePoint>::from(affine_opt)
            .ok_or_else(|| Error::Deserialization("Point not on curve".into()))?;
        Ok(Point(ProjectivePoint::from(affine)))
    }
}

impl From<ProjectivePoint> for Point {
    fn from(p: ProjectivePoint) -> Self {
        Point(p)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_bytes()))
    }
}

impl fmt::Debug for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Point({})", self)
    }
}

impl FromStr for Point {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(strip_hex_prefix(s))
            .map_err(|e| Error::Deserialization(format!("Invalid point hex: {}", e)))?;
        Point::from_bytes(&bytes)
    }
}

serde_via_string!(Point);

fn scalar_to_hex(scalar: &Scalar) -> String {
    format!("0x{}", hex::encode(scalar.to_bytes()))
}

fn scalar_from_hex(s: &str) -> Result<Scalar> {
    let digits = strip_hex_prefix(s.trim());
    if digits.is_empty() || digits.len() > 64 {
        return Err(Error::InvalidSignature(format!(
            "Scalar must be 1..=64 hex digits, got {}",
            digits.len()
        )));
    }
    let padded = format!("{:0>64}", digits);
    let bytes = hex::decode(&padded).map_err(|e| Error::InvalidSignature(e.to_string()))?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::InvalidSignature("Invalid scalar length".into()))?;
    Option::<Scalar>::from(Scalar::from_repr(array.into()))
        .ok_or_else(|| Error::InvalidSignature("Scalar out of range".into()))
}

/// Schnorr `(s, e)` pair, serialized as `"0x<s_hex>,0x<e_hex>"`
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SchnorrSig {
    /// Response
    pub s: Scalar,
    /// Challenge
    pub e: Scalar,
}

impl SchnorrSig {
    /// Create a new signature pair
    pub fn new(s: Scalar, e: Scalar) -> Self {
        Self { s, e }
    }
}

impl fmt::Display for SchnorrSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", scalar_to_hex(&self.s), scalar_to_hex(&self.e))
    }
}

impl fmt::Debug for SchnorrSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchnorrSig({})", self)
    }
}

impl FromStr for SchnorrSig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (s_hex, e_hex) = s
            .split_once(',')
            .ok_or_else(|| Error::InvalidSignature("Expected \"s,e\" pair".into()))?;
        Ok(SchnorrSig {
            s: scalar_from_hex(s_hex)?,
            e: scalar_from_hex(e_hex)?,
        })
    }
}

serde_via_string!(SchnorrSig);

/// Secret scalar (long-term key or nonce share), wiped on drop
#[derive(Clone)]
pub struct SecretShare(Zeroizing<[u8; 32]>);

impl SecretShare {
    /// Wrap a scalar
    pub fn from_scalar(scalar: &Scalar) -> Self {
        let mut bytes = Zeroizing::new([0u8; 32]);
        bytes.copy_from_slice(scalar.to_bytes().as_slice());
        SecretShare(bytes)
    }

    /// Recover the scalar
    pub fn scalar(&self) -> Result<Scalar> {
        Option::<Scalar>::from(Scalar::from_repr((*self.0).into()))
            .ok_or_else(|| Error::Crypto("Secret share out of range".into()))
    }

    /// Hex encoding, for key files
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(*self.0))
    }
}

impl fmt::Debug for SecretShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretShare(..)")
    }
}

impl FromStr for SecretShare {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let scalar = scalar_from_hex(s).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Ok(SecretShare::from_scalar(&scalar))
    }
}

impl Serialize for SecretShare {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SecretShare {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Zeroizing::new(String::deserialize(deserializer)?);
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A node eligible to co-sign requests of a party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partner {
    /// 1-based share index used for Lagrange interpolation
    pub index: u32,
    /// Wallet address of the partner's long-term key
    pub wallet: Address,
    /// Transport identity
    pub peer: PeerId,
}

/// Ordered set of partners that share a signing key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    /// Party identifier
    pub id: PartyId,
    /// Minimum number of partial signatures for a valid aggregate
    pub threshold: usize,
    /// Partners ordered by index
    pub partners: Vec<Partner>,
}

impl Party {
    /// Number of partners
    pub fn len(&self) -> usize {
        self.partners.len()
    }

    /// Whether the party has no partners
    pub fn is_empty(&self) -> bool {
        self.partners.is_empty()
    }

    /// Look up a partner by wallet address
    pub fn partner(&self, wallet: &Address) -> Option<&Partner> {
        self.partners.iter().find(|p| p.wallet == *wallet)
    }

    /// Share index of a wallet, if it belongs to the party
    pub fn index_of(&self, wallet: &Address) -> Option<u32> {
        self.partner(wallet).map(|p| p.index)
    }

    /// Partners other than `wallet`
    pub fn others<'a>(&'a self, wallet: &'a Address) -> impl Iterator<Item = &'a Partner> + 'a {
        self.partners.iter().filter(move |p| p.wallet != *wallet)
    }
}

/// Per-request ephemeral commitment shared by a party
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedNonce {
    /// Nonce identifier
    pub id: NonceId,
    /// Party the nonce was generated for
    pub party: PartyId,
    /// Total public commitment `K`
    pub total: Point,
    /// Each partner's contribution to `K`, by share index
    pub commitments: BTreeMap<u32, Point>,
    /// Public nonce share `K_i`, by share index
    pub public_shares: BTreeMap<u32, Point>,
    /// This node's private nonce share `k_i`; absent on non-owning nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_share: Option<SecretShare>,
}

impl SharedNonce {
    /// Public nonce share of a partner
    pub fn public_share(&self, index: u32) -> Option<&Point> {
        self.public_shares.get(&index)
    }

    /// Check that `K` is the sum of the partner commitments
    pub fn validate(&self) -> Result<()> {
        if self.commitments.is_empty() {
            return Err(Error::KeyResolution(format!(
                "Nonce {} has no commitments",
                self.id
            )));
        }
        let sum = self
            .commitments
            .values()
            .fold(ProjectivePoint::IDENTITY, |acc, c| acc + c.0);
        if sum != self.total.0 {
            return Err(Error::KeyResolution(format!(
                "Nonce {} total does not match its commitments",
                self.id
            )));
        }
        Ok(())
    }

    /// Copy without the private share, as published to other nodes
    pub fn public_view(&self) -> SharedNonce {
        SharedNonce {
            private_share: None,
            ..self.clone()
        }
    }
}

/// This node's long-term identity
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    /// Wallet address derived from the public key
    pub wallet: Address,
    /// Transport identity
    pub peer: PeerId,
    /// Long-term public key (this node's key share public point)
    pub public_key: Point,
    /// Long-term private key
    pub private_key: SecretShare,
}

impl NodeIdentity {
    /// Derive public key and wallet address from a private key
    pub fn from_secret(
        peer: impl Into<PeerId>,
        private_key: SecretShare,
        crypto: &dyn CryptoPrimitives,
    ) -> Result<Self> {
        let public_key = crypto.public_key(&private_key)?;
        Ok(Self {
            wallet: crypto.derive_address(&public_key),
            peer: peer.into(),
            public_key,
            private_key,
        })
    }
}

/// Party and nonce referenced by a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitBlock {
    /// Party identifier
    pub party: PartyId,
    /// Nonce identifier
    pub nonce: NonceId,
}

/// Application payload of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestData {
    /// Key material references
    pub init: InitBlock,
    /// Application-defined input
    #[serde(default)]
    pub params: Value,
    /// Value partners must independently reproduce
    pub result: Value,
    /// Source-specific raw data, never hashed or exposed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

/// A signing session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Request identifier
    pub id: RequestId,
    /// Application name
    pub app: String,
    /// Application method
    pub method: String,
    /// Originator wallet address
    pub owner: Address,
    /// Originator peer identity
    pub peer_id: PeerId,
    /// Application payload
    pub data: RequestData,
    /// Required quorum size
    pub n_sign: usize,
    /// Creation time
    pub started_at: DateTime<Utc>,
    /// Confirmation time, set at most once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Request {
    /// Party referenced by the request
    pub fn party_id(&self) -> &PartyId {
        &self.data.init.party
    }

    /// Nonce referenced by the request
    pub fn nonce_id(&self) -> &NonceId {
        &self.data.init.nonce
    }

    /// Whether the request has been confirmed
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }
}

/// Input to request creation; app-specific fields are opaque to the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDraft {
    /// Application name
    pub app: String,
    /// Application method
    pub method: String,
    /// Party that should sign
    pub party: PartyId,
    /// Required quorum size
    pub n_sign: usize,
    /// Application-defined input
    #[serde(default)]
    pub params: Value,
    /// Result to be signed
    pub result: Value,
    /// Source-specific raw data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

/// One partial or aggregate signature contribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    /// Owning request
    pub request: RequestId,
    /// Signer wallet address
    pub owner: Address,
    /// Signer public key
    pub pub_key: Point,
    /// Signing time
    pub timestamp: DateTime<Utc>,
    /// Signed payload
    pub data: Value,
    /// Schnorr pair
    pub signature: SchnorrSig,
    /// Optional auxiliary proof
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<Value>,
}

/// Response payload of the `wantSign` RPC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WantSignResponse {
    /// Partner's partial signature
    pub signature: Signature,
    /// Optional auxiliary data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<Value>,
}

/// Signature entry of a confirmation payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSignature {
    /// Signer wallet address
    pub owner: Address,
    /// Signing time
    pub timestamp: DateTime<Utc>,
    /// Signed result
    pub result: Value,
    /// Schnorr pair
    pub signature: SchnorrSig,
    /// Optional auxiliary data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<Value>,
}

impl From<&Signature> for ResultSignature {
    fn from(sig: &Signature) -> Self {
        Self {
            owner: sig.owner,
            timestamp: sig.timestamp,
            result: sig.data.clone(),
            signature: sig.signature,
            auxiliary: sig.auxiliary.clone(),
        }
    }
}

/// Externally facing outcome of a signing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedResult {
    /// Whether the aggregate verified under the group public key
    pub confirmed: bool,
    /// Request fields, without raw source data
    #[serde(flatten)]
    pub request: Request,
    /// Aggregate signature on success
    pub signatures: Vec<ResultSignature>,
}

impl ConfirmedResult {
    /// Build the payload, stripping raw source data from the request
    pub fn new(confirmed: bool, request: &Request, signatures: Vec<ResultSignature>) -> Self {
        let mut request = request.clone();
        request.data.raw = None;
        Self {
            confirmed,
            request,
            signatures,
        }
    }

    /// Content address of the payload
    pub fn content_id(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(blake3::hash(&bytes).as_bytes()))
    }
}
