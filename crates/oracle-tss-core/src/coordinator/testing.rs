//! In-process network of coordinators for unit tests

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use super::{Collaborators, Collector, Originator, Responder, SigningCoordinator};
use crate::app::{async_trait, canonical_result_hash, Computed, OracleApp};
use crate::config::{CoordinatorConfig, NetworkParams};
use crate::crypto::{CryptoPrimitives, MessageHash, Secp256k1Schnorr};
use crate::keys::{deal, Deal, KeyShareProvider, MemoryKeyProvider};
use crate::store::MemoryStore;
use crate::transport::{MemoryTransport, RpcRegistry};
use crate::{Error, NodeIdentity, Request, RequestDraft, Result, SharedNonce, Signature};

const NONCES_PER_NODE: usize = 8;

/// Price oracle accepting claims within 1% of its own price
pub(crate) struct TestQuoteApp {
    price: Mutex<f64>,
}

impl TestQuoteApp {
    fn new() -> Self {
        Self {
            price: Mutex::new(100.0),
        }
    }

    pub fn set_price(&self, price: f64) {
        *self.price.lock().unwrap() = price;
    }

    fn price(&self) -> f64 {
        *self.price.lock().unwrap()
    }
}

#[async_trait]
impl OracleApp for TestQuoteApp {
    fn name(&self) -> &str {
        "quote"
    }

    async fn compute(&self, _method: &str, params: &Value) -> Result<Computed> {
        let symbol = params.get("symbol").cloned().unwrap_or_else(|| json!("BTC"));
        Ok(Computed {
            result: json!({ "symbol": symbol, "price": self.price() }),
            raw: Some(json!({ "source": "test" })),
        })
    }

    async fn validate_and_compute(&self, request: &Request) -> Result<Value> {
        let claimed = request.data.result["price"]
            .as_f64()
            .ok_or_else(|| Error::ResultMismatch("Missing price".into()))?;
        let own = self.price();
        if (claimed - own).abs() > own * 0.01 {
            return Err(Error::ResultMismatch(format!(
                "Claimed {} against {}",
                claimed, own
            )));
        }
        Ok(request.data.result.clone())
    }
}

pub(crate) struct TestNode {
    pub coordinator: SigningCoordinator,
    pub keys: Arc<MemoryKeyProvider>,
    pub store: Arc<MemoryStore>,
    pub app: Arc<TestQuoteApp>,
    pub registry: RpcRegistry,
}

impl TestNode {
    pub fn identity(&self) -> &NodeIdentity {
        self.coordinator.identity()
    }

    pub fn originator(&self) -> &Originator {
        self.coordinator.originator()
    }

    pub fn responder(&self) -> &Arc<Responder> {
        self.coordinator.responder()
    }

    pub fn collector(&self) -> &Collector {
        self.coordinator.collector()
    }
}

pub(crate) struct Network {
    pub deal: Deal,
    pub transport: MemoryTransport,
    pub nodes: Vec<TestNode>,
    crypto: Arc<Secp256k1Schnorr>,
}

impl Network {
    /// `n` nodes of party `p1` with threshold `t` and short collection timings
    pub fn new(n: usize, t: usize) -> Self {
        Self::with_config(
            n,
            t,
            CoordinatorConfig {
                poll_interval_ms: 10,
                max_wait_ms: 200,
                expose_partials_on_timeout: false,
            },
        )
    }

    pub fn with_config(n: usize, t: usize, config: CoordinatorConfig) -> Self {
        let crypto = Arc::new(Secp256k1Schnorr::new());
        let peers: Vec<String> = (1..=n).map(|i| format!("node-{}", i)).collect();
        let deal = deal("p1", t, &peers, n * NONCES_PER_NODE, crypto.as_ref()).unwrap();
        let transport = MemoryTransport::new();
        let params = NetworkParams {
            group_public_key: deal.group_public_key,
        };

        let nodes = (0..n)
            .map(|i| {
                let keys = Arc::new(deal.provider_for(i).unwrap());
                let store = Arc::new(MemoryStore::new());
                let app = Arc::new(TestQuoteApp::new());
                let deps = Collaborators {
                    keys: keys.clone(),
                    crypto: crypto.clone(),
                    store: store.clone(),
                    transport: Arc::new(transport.clone()),
                };

                let coordinator = SigningCoordinator::new(
                    deal.nodes[i].identity.clone(),
                    app.clone(),
                    deps,
                    params.clone(),
                    config.clone(),
                );
                let mut registry = RpcRegistry::new();
                coordinator.register(&mut registry);
                transport.attach(peers[i].clone(), registry.clone());

                TestNode {
                    coordinator,
                    keys,
                    store,
                    app,
                    registry,
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

    pub fn node(&self, i: usize) -> &TestNode {
        &self.nodes[i]
    }

    pub fn crypto(&self) -> &dyn CryptoPrimitives {
        self.crypto.as_ref()
    }

    pub fn draft(&self, n_sign: usize) -> RequestDraft {
        RequestDraft {
            app: "quote".into(),
            method: "get_price".into(),
            party: "p1".into(),
            n_sign,
            params: json!({ "symbol": "BTC" }),
            result: json!({ "symbol": "BTC", "price": 100.0 }),
            raw: None,
        }
    }

    pub fn hash(&self, request: &Request) -> MessageHash {
        canonical_result_hash(&request.data.result)
    }

    /// A request originated by node 0 and the partial signature of node `i`
    pub async fn signed_by(&self, i: usize) -> (Request, Signature) {
        let request = self
            .node(0)
            .originator()
            .create_request(self.draft(2))
            .await
            .unwrap();
        let response = self
            .node(i)
            .responder()
            .handle_want_sign(request.clone())
            .await
            .unwrap();
        (request, response.signature)
    }

    pub async fn nonce_of(&self, node: usize, request: &Request) -> SharedNonce {
        self.node(node)
            .keys
            .resolve_nonce(request.nonce_id())
            .await
            .unwrap()
    }
}
