use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::{get, post}, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

mod bus;
mod classifier;
mod config;
mod dispatcher;
mod error;
mod handlers;
mod kv;
mod logging;
mod ml_scorer;
mod models;
mod provider;
mod quota;
mod registry;
mod rpc;
mod server;
mod webhook;

use crate::bus::{
    QUEUE_KOL_MANAGEMENT, QUEUE_SERVICE_COMMANDS, QUEUE_SUBSCRIPTION_COMMANDS,
};
use crate::config::Config;
use crate::logging::setup_logging;
use crate::rpc::RpcBusHandler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if dotenv::from_filename(".env").is_err() {
        dotenv::dotenv().ok();
    }

    let config = Config::from_env()?;
    setup_logging(&config.logging)?;

    info!(service = %config.service_name, version = %config.version, environment = %config.environment, "starting copy-trade broker");

    let state = server::AppState::new(config).await?;

    spawn_bus_consumers(&state);
    spawn_provider_sync(&state);

    let app = create_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.server.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Starts one background task per durable inbound queue. Outbound-only
/// queues (`kol_trade_detected`, `copy_trade_requests`, `copy_trade_completed`,
/// `client_notifications`, `service_status`, `dead_letter`) are consumed by
/// downstream services, not this one.
///
/// A consumer task that exhausts its reconnect budget takes the whole
/// process down rather than leaving the HTTP server up with a permanently
/// dead command/RPC consumer.
fn spawn_bus_consumers(state: &server::AppState) {
    let rpc_handler: Arc<dyn bus::BusHandler> =
        Arc::new(RpcBusHandler::new(state.rpc.clone(), state.bus.clone()));

    for queue in [&QUEUE_SUBSCRIPTION_COMMANDS, &QUEUE_KOL_MANAGEMENT, &QUEUE_SERVICE_COMMANDS] {
        let bus = state.bus.clone();
        let handler = rpc_handler.clone();
        let queue_name = queue.name;
        let queue_exchange = queue.exchange;
        let queue_pattern = queue.pattern;
        tokio::spawn(async move {
            let binding = bus::QueueBinding {
                name: queue_name,
                exchange: queue_exchange,
                pattern: queue_pattern,
            };
            if let Err(err) = bus.consume(&binding, vec![handler]).await {
                error!(queue = queue_name, error = %err, "command queue consumer exhausted reconnect attempts, shutting down");
                std::process::exit(1);
            }
        });
    }

    let bus = state.bus.clone();
    let handler = rpc_handler.clone();
    let rpc_queue_name = state.config.rpc.queue_name.clone();
    tokio::spawn(async move {
        if let Err(err) = bus
            .consume_direct("rpc_query", &rpc_queue_name, vec![handler])
            .await
        {
            error!(queue = %rpc_queue_name, error = %err, "rpc queue consumer exhausted reconnect attempts, shutting down");
            std::process::exit(1);
        }
    });
}

/// Periodically reconciles the active-KOL set against the provider's
/// webhook address list (the Registry's `sync_with_provider`).
fn spawn_provider_sync(state: &server::AppState) {
    let registry = state.registry.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            if let Err(err) = registry.sync_with_provider().await {
                warn!(error = %err, "provider sync failed");
            }
        }
    });
}

fn create_router(state: server::AppState) -> Router {
    Router::new()
        .route("/", get(handlers::health::liveness))
        .route("/health", get(handlers::health::health_check))
        .route("/helius-webhook", post(handlers::webhook::handle_webhook))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(TraceLayer::new_for_http())
}
