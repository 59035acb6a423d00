//! HTTP surface: peer RPC and the signing entry point

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use oracle_rpc_client::{ErrorBody, SignRequest};
use oracle_tss_core::app::OracleApp;
use oracle_tss_core::coordinator::{Collaborators, SigningCoordinator};
use oracle_tss_core::crypto::{CryptoPrimitives, Secp256k1Schnorr};
use oracle_tss_core::store::MemoryStore;
use oracle_tss_core::transport::{RpcRegistry, Transport};
use oracle_tss_core::{ConfirmedResult, Error};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::app::QuoteApp;
use crate::config::NodeConfig;

/// Shared state of the HTTP handlers
pub struct AppState {
    registry: RpcRegistry,
    coordinators: HashMap<String, Arc<SigningCoordinator>>,
}

impl AppState {
    /// Wire the node's apps, store and key material over `transport`
    pub fn new(config: &NodeConfig, transport: Arc<dyn Transport>) -> anyhow::Result<Self> {
        let crypto: Arc<dyn CryptoPrimitives> = Arc::new(Secp256k1Schnorr::new());
        let identity = config.identity(crypto.as_ref())?;
        let deps = Collaborators {
            keys: Arc::new(config.key_provider()?),
            crypto,
            store: Arc::new(MemoryStore::new()),
            transport,
        };

        let apps: Vec<Arc<dyn OracleApp>> = vec![Arc::new(QuoteApp::new(config.quote.clone()))];

        let mut registry = RpcRegistry::new();
        let mut coordinators = HashMap::new();
        for app in apps {
            let coordinator = Arc::new(SigningCoordinator::new(
                identity.clone(),
                app.clone(),
                deps.clone(),
                config.network(),
                config.coordinator.clone(),
            ));
            coordinator.register(&mut registry);
            coordinators.insert(app.name().to_string(), coordinator);
        }

        info!(
            wallet = %identity.wallet,
            peer = %identity.peer,
            methods = ?registry.methods(),
            "Node state ready"
        );

        Ok(Self {
            registry,
            coordinators,
        })
    }

    pub fn coordinators(&self) -> impl Iterator<Item = &Arc<SigningCoordinator>> {
        self.coordinators.values()
    }
}

/// Error response carrying the error kind
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::ResultMismatch(_) | Error::NonceReuse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::InvalidConfig(_) | Error::Deserialization(_) => StatusCode::BAD_REQUEST,
            Error::UnknownMethod(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/rpc/:method", post(rpc))
        .route("/v1/apps/:app/sign", post(sign))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "oracle-node",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Dispatch a peer call to the registration table
async fn rpc(
    State(state): State<Arc<AppState>>,
    Path(method): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    match state.registry.dispatch(&method, payload).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            warn!(method = %method, error = %e, "RPC call failed");
            Err(e.into())
        }
    }
}

/// Originate a signing request for `app`
async fn sign(
    State(state): State<Arc<AppState>>,
    Path(app): Path<String>,
    Json(request): Json<SignRequest>,
) -> Result<Json<ConfirmedResult>, ApiError> {
    let coordinator = state
        .coordinators
        .get(&app)
        .ok_or_else(|| Error::UnknownMethod(format!("App {} is not served here", app)))?;

    let result = coordinator
        .sign(&request.method, &request.party, request.n_sign, request.params)
        .await?;
    Ok(Json(result))
}
