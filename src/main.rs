//! Direct Connect Bridge - standalone binary
//!
//! Runs discovery against the configured remote directory, keeps the
//! in-memory host in sync, and serves the push listener.

use std::sync::Arc;

use tokio::time::{self, Duration};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use direct_connect_bridge::api::{self, auth_middleware::BearerGate, ApiState};
use direct_connect_bridge::config::Config;
use direct_connect_bridge::host::MemoryHost;
use direct_connect_bridge::remote::RemoteClient;
use direct_connect_bridge::sync::{AccessoryRegistry, DiscoverySyncer, Reconciler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "direct_connect_bridge=info,tower_http=debug".into()),
        )
        .init();

    tracing::info!("Starting DirectConnectBridge...");

    // Load configuration
    let config = Config::load()?;
    tracing::info!("Configuration loaded");

    let client = Arc::new(RemoteClient::new(&config.remote, &config.auth)?);

    if config.auth.enabled {
        match client.fetch_token().await {
            Ok(()) => tracing::info!("[RemoteApi] Access token acquired"),
            Err(e) => {
                tracing::warn!("[RemoteApi] Initial token request failed (non-fatal): {}", e)
            }
        }
    }

    let host = Arc::new(MemoryHost::new());
    let registry = Arc::new(AccessoryRegistry::new());
    let reconciler = Arc::new(Reconciler::new(
        client.clone(),
        host,
        registry.clone(),
        config.bridge.set_acknowledgement,
    ));

    match reconciler.restore_cached().await {
        Ok(count) => tracing::info!("[Discovery] Restored {} cached accessories", count),
        Err(e) => tracing::warn!("[Discovery] Cache restore failed (non-fatal): {}", e),
    }

    if client.is_configured() {
        time::sleep(Duration::from_secs(config.sync.initial_delay_secs)).await;
        if let Err(e) = reconciler.run_cycle().await {
            tracing::warn!("[Discovery] Initial discovery failed (non-fatal): {}", e);
        }

        if let Some(syncer) = DiscoverySyncer::new(reconciler.clone(), &config.sync) {
            let syncer = Arc::new(syncer);
            tokio::spawn(async move {
                syncer.start().await;
            });
        }
    } else {
        tracing::error!("[Discovery] Remote API URL invalid, discovery disabled");
    }

    if !config.listener.enabled {
        tracing::info!("[DirectConnect] Listener disabled");
        tokio::signal::ctrl_c().await?;
        return Ok(());
    }

    let gate = config
        .listener
        .require_auth
        .then(|| Arc::new(BearerGate::new(&config.auth, &config.listener)));

    let state = ApiState::new(registry, client.display_name());
    let app = api::routes(state, gate)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    // Start server
    let addr = format!("{}:{}", config.listener.host, config.listener.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("[DirectConnect] Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
