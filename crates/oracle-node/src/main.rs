//! Oracle Node
//!
//! Command-line entry point:
//! - `serve`: run a node from its configuration file
//! - `deal`: write configuration files for a local devnet
//! - `sign`: ask a running node for a threshold-signed result

mod app;
mod config;
mod server;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use oracle_rpc_client::{HttpTransport, NodeClient, SignRequest};
use oracle_tss_core::crypto::Secp256k1Schnorr;
use oracle_tss_core::keys::deal;
use tracing::{info, warn, Level};

use crate::app::{QuoteConfig, DEFAULT_TOLERANCE};
use crate::config::NodeConfig;
use crate::server::{router, AppState};

/// Oracle Node - threshold-signed oracle results
#[derive(Parser)]
#[command(name = "oracle-node")]
#[command(about = "Oracle node with threshold Schnorr signing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node
    Serve {
        /// Node configuration file
        #[arg(short, long, env = "ORACLE_CONFIG")]
        config: PathBuf,

        /// Listen address, overriding the configuration
        #[arg(short, long, env = "ORACLE_LISTEN")]
        listen: Option<String>,
    },

    /// Deal a devnet key set and write one configuration per node
    Deal {
        /// Number of nodes
        #[arg(short, long, default_value = "3")]
        n: usize,

        /// Threshold (t-of-n)
        #[arg(short, long, default_value = "2")]
        t: usize,

        /// Party identifier
        #[arg(long, default_value = "p1")]
        party: String,

        /// Shared nonces per node
        #[arg(long, default_value = "64")]
        nonces: usize,

        /// Port of the first node; the others follow
        #[arg(long, default_value = "8700")]
        base_port: u16,

        /// Quoted prices, as SYMBOL=PRICE
        #[arg(long, value_parser = parse_price, default_value = "BTC=65000")]
        price: Vec<(String, f64)>,

        /// Output directory
        #[arg(short, long, default_value = "./devnet")]
        out: PathBuf,
    },

    /// Request a signed result from a running node
    Sign {
        /// Node URL
        #[arg(short, long, default_value = "http://127.0.0.1:8700")]
        url: String,

        /// Application name
        #[arg(long, default_value = "quote")]
        app: String,

        /// Application method
        #[arg(short, long, default_value = "get_price")]
        method: String,

        /// Party identifier
        #[arg(long, default_value = "p1")]
        party: String,

        /// Number of signatures to aggregate
        #[arg(long, default_value = "2")]
        n_sign: usize,

        /// Method parameters (JSON)
        #[arg(long, default_value = r#"{"symbol":"BTC"}"#)]
        params: String,
    },
}

fn parse_price(s: &str) -> std::result::Result<(String, f64), String> {
    let (symbol, price) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected SYMBOL=PRICE, got {}", s))?;
    let price = price
        .parse()
        .map_err(|e| format!("Invalid price {}: {}", price, e))?;
    Ok((symbol.to_string(), price))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => run_serve(config, listen).await,
        Commands::Deal {
            n,
            t,
            party,
            nonces,
            base_port,
            price,
            out,
        } => run_deal(n, t, &party, nonces, base_port, price, &out),
        Commands::Sign {
            url,
            app,
            method,
            party,
            n_sign,
            params,
        } => run_sign(&url, &app, method, party, n_sign, &params).await,
    }
}

async fn run_serve(path: PathBuf, listen: Option<String>) -> Result<()> {
    let mut config = NodeConfig::load(&path)?;
    config.default_journal(&path);
    let listen = listen.unwrap_or_else(|| config.listen.clone());

    info!(
        listen = %listen,
        peer = %config.identity.peer,
        parties = config.parties.len(),
        nonces = config.nonces.len(),
        "Starting oracle node"
    );

    let transport = Arc::new(HttpTransport::new(config.peers.clone()));
    let state = Arc::new(AppState::new(&config, transport)?);

    for coordinator in state.coordinators() {
        let mut events = coordinator.subscribe_confirmed();
        let app = coordinator.app().name().to_string();
        tokio::spawn(async move {
            while let Ok(result) = events.recv().await {
                match result.content_id() {
                    Ok(cid) => info!(app = %app, request = %result.request.id, cid = %cid, "Result signed"),
                    Err(e) => warn!(app = %app, error = %e, "Content id unavailable"),
                }
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!(address = %listen, "Listening");

    axum::serve(listener, router(state)).await?;

    Ok(())
}

fn run_deal(
    n: usize,
    t: usize,
    party: &str,
    nonces: usize,
    base_port: u16,
    prices: Vec<(String, f64)>,
    out: &Path,
) -> Result<()> {
    let crypto = Secp256k1Schnorr::new();
    let peers: Vec<String> = (1..=n).map(|i| format!("node-{}", i)).collect();
    let ports: Vec<u16> = (0..n)
        .map(|i| {
            u16::try_from(i)
                .ok()
                .and_then(|i| base_port.checked_add(i))
                .context("Port out of range")
        })
        .collect::<Result<_>>()?;
    let urls: Vec<String> = ports
        .iter()
        .map(|port| format!("http://127.0.0.1:{}", port))
        .collect();

    let dealt = deal(party, t, &peers, n * nonces, &crypto)?;
    let quote = QuoteConfig {
        prices: prices.into_iter().collect::<BTreeMap<_, _>>(),
        tolerance: DEFAULT_TOLERANCE,
    };

    std::fs::create_dir_all(out)?;
    for (i, port) in ports.iter().enumerate() {
        let config = NodeConfig::from_deal(
            &dealt,
            i,
            format!("127.0.0.1:{}", port),
            &urls,
            quote.clone(),
        )?;
        let path = out.join(format!("{}.json", peers[i]));
        config.save(&path)?;
        info!(path = %path.display(), wallet = %dealt.nodes[i].identity.wallet, "Node configuration written");
    }

    println!("Group public key: {}", dealt.group_public_key);
    Ok(())
}

async fn run_sign(
    url: &str,
    app: &str,
    method: String,
    party: String,
    n_sign: usize,
    params: &str,
) -> Result<()> {
    let params = serde_json::from_str(params).context("Parsing --params")?;
    let request = SignRequest {
        method,
        party,
        n_sign,
        params,
    };

    let result = NodeClient::new(url).sign(app, &request).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.confirmed {
        warn!(request = %result.request.id, "Result was not confirmed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("BTC=65000.5").unwrap(), ("BTC".to_string(), 65000.5));
        assert!(parse_price("BTC").is_err());
        assert!(parse_price("BTC=x").is_err());
    }

    #[test]
    fn test_cli_parses_env_free_defaults() {
        let cli = Cli::try_parse_from(["oracle-node", "deal", "-n", "5", "-t", "3"]).unwrap();
        match cli.command {
            Commands::Deal { n, t, price, .. } => {
                assert_eq!((n, t), (5, 3));
                assert_eq!(price, vec![("BTC".to_string(), 65000.0)]);
            }
            _ => panic!("expected deal"),
        }
    }
}
