//! s3gate - an S3 gateway that verifies every request before it reaches
//! storage.
//!
//! The binary serves an in-memory object store behind the full
//! verification pipeline: SigV4 (header and presigned), aws-chunked
//! signature chains, payload checksums, and ACLs.
//!
//! # Usage
//!
//! ```text
//! S3GATE_USERS=AKIDEXAMPLE:secret:alice:admin s3gate-server
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GATEWAY_LISTEN` | `0.0.0.0:7070` | Bind address |
//! | `S3GATE_REGION` | `us-east-1` | Region accepted in credential scopes |
//! | `S3GATE_DOMAIN` | `s3.localhost` | Virtual hosting domain |
//! | `S3GATE_USERS` | *(unset)* | `ak:sk:canonical_id[:admin]`, comma separated |
//! | `S3GATE_ROOT_ACCESS_KEY` / `S3GATE_ROOT_SECRET_KEY` | *(unset)* | Root credential |
//! | `S3GATE_HEALTH_PATH` | *(unset)* | Unauthenticated health probe path |
//! | `S3GATE_LOG_FORMAT` | `text` | `json` for structured logs |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |
//!
//! The remaining `S3GATE_*` limits are documented on `GatewayConfig`.

#![allow(clippy::result_large_err)]

mod memory;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use s3gate_auth::{Credential, Principal, Role, StaticIdentityService};
use s3gate_core::GatewayConfig;
use s3gate_http::metrics::InMemoryMetrics;
use s3gate_http::{GatewayService, Pipeline, S3Handler};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::memory::{MemoryHandler, MemoryStore};

/// Server version reported at startup.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(())
}

/// Parse `ak:sk:canonical_id[:admin]` entries separated by commas.
fn parse_users(spec: &str) -> Result<Vec<Credential>> {
    spec.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let fields: Vec<&str> = entry.split(':').collect();
            let (access_key, secret_key, canonical_id, role) = match fields.as_slice() {
                [ak, sk, id] => (*ak, *sk, *id, Role::User),
                [ak, sk, id, "admin"] => (*ak, *sk, *id, Role::Admin),
                _ => bail!("invalid S3GATE_USERS entry for key {:?}", fields.first()),
            };
            if access_key.is_empty() || secret_key.is_empty() || canonical_id.is_empty() {
                bail!("empty field in S3GATE_USERS entry for key {access_key:?}");
            }
            Ok(Credential::new(
                access_key,
                secret_key,
                Principal::user(canonical_id, canonical_id).with_role(role),
            ))
        })
        .collect()
}

/// Run the accept loop, serving connections until a shutdown signal is received.
async fn serve<H: S3Handler>(listener: TcpListener, service: GatewayService<H>) -> Result<()> {
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    let http = HttpConnBuilder::new(TokioExecutor::new());

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal, draining connections");
    };

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };

                let svc = service.clone();
                let conn = http.serve_connection(TokioIo::new(stream), svc);
                let conn = graceful.watch(conn.into_owned());

                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        error!(peer_addr = %peer_addr, error = %e, "connection error");
                    }
                });
            }

            () = &mut shutdown => {
                info!("shutting down gracefully");
                break;
            }
        }
    }

    graceful.shutdown().await;
    info!("all connections drained, exiting");

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::from_env().context("invalid gateway configuration")?;
    let json = std::env::var("S3GATE_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    init_tracing(&config.log_level, json)?;

    let users = match std::env::var("S3GATE_USERS") {
        Ok(spec) => parse_users(&spec)?,
        Err(_) => Vec::new(),
    };
    if users.is_empty() && config.root_access_key.is_none() {
        warn!("no credentials configured; only anonymous requests can succeed");
    }

    info!(
        gateway_listen = %config.gateway_listen,
        region = %config.region,
        domain = %config.domain,
        virtual_hosting = config.virtual_hosting,
        read_only = config.read_only,
        users = users.len(),
        version = VERSION,
        "starting s3gate",
    );

    let addr: SocketAddr = config
        .gateway_listen
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.gateway_listen))?;

    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::new(
        Arc::new(config),
        Arc::new(StaticIdentityService::new(users)),
        store.clone(),
    )
    .with_metrics(Arc::new(InMemoryMetrics::new()));
    let service = GatewayService::new(Arc::new(pipeline), Arc::new(MemoryHandler::new(store)));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(%addr, "listening for connections");

    serve(listener, service).await
}
