//! Shared harness for multi-node signing scenarios

#![allow(dead_code)]

use std::sync::Arc;

use k256::Scalar;
use serde_json::{json, Value};

use oracle_tss_core::app::{async_trait, Computed, OracleApp};
use oracle_tss_core::config::{CoordinatorConfig, NetworkParams};
use oracle_tss_core::coordinator::{Collaborators, SigningCoordinator};
use oracle_tss_core::crypto::Secp256k1Schnorr;
use oracle_tss_core::keys::{deal, Deal};
use oracle_tss_core::store::MemoryStore;
use oracle_tss_core::transport::{MemoryTransport, RpcRegistry};
use oracle_tss_core::{want_sign_method, Error, Request, RequestDraft, Result};

pub const PARTY: &str = "p1";

/// Fixed-price oracle requiring an exact match
pub struct FixedQuote {
    pub price: f64,
}

#[async_trait]
impl OracleApp for FixedQuote {
    fn name(&self) -> &str {
        "quote"
    }

    async fn compute(&self, _method: &str, params: &Value) -> Result<Computed> {
        Ok(Computed {
            result: json!({ "symbol": params["symbol"], "price": self.price }),
            raw: None,
        })
    }

    async fn validate_and_compute(&self, request: &Request) -> Result<Value> {
        if request.data.result["price"].as_f64() != Some(self.price) {
            return Err(Error::ResultMismatch(format!(
                "Expected price {}",
                self.price
            )));
        }
        Ok(request.data.result.clone())
    }
}

pub struct Node {
    pub coordinator: Arc<SigningCoordinator>,
    pub store: Arc<MemoryStore>,
    pub peer: String,
}

pub struct Cluster {
    pub deal: Deal,
    pub transport: MemoryTransport,
    pub nodes: Vec<Node>,
    pub crypto: Arc<Secp256k1Schnorr>,
}

pub fn fast_config(max_wait_ms: u64) -> CoordinatorConfig {
    CoordinatorConfig {
        poll_interval_ms: 20,
        max_wait_ms,
        expose_partials_on_timeout: false,
    }
}

impl Cluster {
    pub fn new(n: usize, threshold: usize, config: CoordinatorConfig) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("oracle_tss_core=debug")
            .with_test_writer()
            .try_init();

        let crypto = Arc::new(Secp256k1Schnorr::new());
        let peers: Vec<String> = (1..=n).map(|i| format!("node-{}", i)).collect();
        let deal = deal(PARTY, threshold, &peers, n * 4, crypto.as_ref()).unwrap();
        let transport = MemoryTransport::new();
        let params = NetworkParams {
            group_public_key: deal.group_public_key,
        };

        let nodes = peers
            .iter()
            .enumerate()
            .map(|(i, peer)| {
                let store = Arc::new(MemoryStore::new());
                let deps = Collaborators {
                    keys: Arc::new(deal.provider_for(i).unwrap()),
                    crypto: crypto.clone(),
                    store: store.clone(),
                    transport: Arc::new(transport.clone()),
                };
                let coordinator = Arc::new(SigningCoordinator::new(
                    deal.nodes[i].identity.clone(),
                    Arc::new(FixedQuote { price: 100.0 }),
                    deps,
                    params.clone(),
                    config.clone(),
                ));

                let mut registry = RpcRegistry::new();
                coordinator.register(&mut registry);
                transport.attach(peer.clone(), registry);

                Node {
                    coordinator,
                    store,
                    peer: peer.clone(),
                }
            })
            .collect();

        Self {
            deal,
            transport,
            nodes,
            crypto,
        }
    }

    pub fn draft(&self, n_sign: usize) -> RequestDraft {
        RequestDraft {
            app: "quote".into(),
            method: "get_price".into(),
            party: PARTY.into(),
            n_sign,
            params: json!({ "symbol": "BTC" }),
            result: json!({ "symbol": "BTC", "price": 100.0 }),
            raw: Some(json!({ "exchange": "test", "ticks": [99.9, 100.1] })),
        }
    }

    pub fn take_offline(&self, nodes: &[usize]) {
        for &i in nodes {
            self.transport.set_offline(self.nodes[i].peer.clone());
        }
    }

    /// Replace node `i`'s endpoint with one answering through `mutate`
    pub fn corrupt<F>(&self, i: usize, mutate: F)
    where
        F: Fn(&mut Value) + Send + Sync + 'static,
    {
        let responder = self.nodes[i].coordinator.responder().clone();
        let mutate = Arc::new(mutate);
        let mut registry = RpcRegistry::new();
        registry.register(want_sign_method("quote"), move |payload| {
            let responder = responder.clone();
            let mutate = mutate.clone();
            async move {
                let request: Request = serde_json::from_value(payload)?;
                let mut response = serde_json::to_value(responder.handle_want_sign(request).await?)?;
                mutate(&mut response);
                Ok::<Value, Error>(response)
            }
        });
        self.transport.attach(self.nodes[i].peer.clone(), registry);
    }

    /// Replace node `i`'s endpoint with one returning a shifted `s`
    pub fn tamper(&self, i: usize) {
        self.corrupt(i, |response| {
            let encoded = response["signature"]["signature"].as_str().unwrap().to_string();
            let mut sig: oracle_tss_core::SchnorrSig = encoded.parse().unwrap();
            sig.s += Scalar::ONE;
            response["signature"]["signature"] = json!(sig.to_string());
        });
    }
}
