//! # Oracle TSS Core
//!
//! Threshold Schnorr signing coordination for decentralized oracle nodes.
//!
//! A node originates a signing request for an application result, signs its
//! own share, fans the request out to its party, and collects partner partial
//! signatures until a quorum can be aggregated into one signature that
//! verifies under the network's group public key.
//!
//! The crate provides:
//! - The data model: [`Request`], [`Signature`], [`Party`], [`SharedNonce`]
//! - Collaborator traits: [`crypto::CryptoPrimitives`],
//!   [`keys::KeyShareProvider`], [`store::SignatureStore`],
//!   [`transport::Transport`]
//! - The signing flow: [`coordinator::Originator`],
//!   [`coordinator::Responder`], [`coordinator::Collector`] and the
//!   [`coordinator::SigningCoordinator`] facade that composes them
//!
//! ## Example
//!
//! ```rust,ignore
//! use oracle_tss_core::{coordinator::SigningCoordinator, RequestDraft};
//!
//! let coordinator = SigningCoordinator::new(node, app, collaborators, params, config);
//! coordinator.register(&mut registry);
//!
//! let outcome = coordinator.sign_draft(draft).await?;
//! assert!(outcome.confirmed);
//! ```

pub mod app;
pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod store;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    Address, ConfirmedResult, NodeIdentity, NonceId, Party, PartyId, Partner, PeerId, Point,
    Request, RequestData, RequestDraft, RequestId, SchnorrSig, SecretShare, SharedNonce,
    Signature,
};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Suffix of the per-application partial signing RPC method
pub const WANT_SIGN: &str = "wantSign";

/// RPC method name for an application's partial signing endpoint
pub fn want_sign_method(app: &str) -> String {
    format!("app-{}-{}", app, WANT_SIGN)
}
