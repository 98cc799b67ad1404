use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::audit::{AuditPublisher, AuditReceiver, ReceiverConfig};
use crate::auth::AuthLayer;
use crate::backend::elastic::{self, ElasticClient};
use crate::broker::nats::NatsBroker;
use crate::config::Config;
use crate::search::{SearchExecutor, SearchService};

mod api;
mod audit;
mod auth;
mod backend;
mod broker;
mod config;
mod search;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(
    name = "hq-hub",
    version,
    about = "HOSTQUERY search service and audit receiver"
)]
struct Args {
    /// Path to config file
    #[arg(long, default_value = "hq-hub.toml")]
    config: PathBuf,

    /// Server bind address (overrides config and HQ_BIND)
    #[arg(long)]
    bind: Option<String>,

    /// Which parts of the service to run
    #[arg(long, value_enum, default_value_t = Role::All)]
    role: Role,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    /// HTTP API and audit receiver in one process
    All,
    /// HTTP API only
    Api,
    /// Audit receiver only
    Receiver,
}

impl Role {
    fn serves_api(self) -> bool {
        matches!(self, Role::All | Role::Api)
    }

    fn runs_receiver(self) -> bool {
        matches!(self, Role::All | Role::Receiver)
    }
}

// =============================================================================
// App State
// =============================================================================

struct AppState {
    search: SearchService,
    publisher: AuditPublisher,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "hq_hub=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };
    config.apply_env();
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let search_client = match ElasticClient::new(&config.search) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!("Failed to build search client: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = search_client.ping().await {
        tracing::warn!("Search backend not reachable yet: {}", e);
    }
    let supervisor = tokio::spawn(elastic::supervise(
        search_client.clone(),
        config.search.health_interval(),
    ));

    let broker = Arc::new(NatsBroker::new(config.broker.url.clone()));

    let receiver = if args.role.runs_receiver() {
        if let Err(e) = search_client
            .ensure_index(&config.search.audit_index, &audit::index_mappings())
            .await
        {
            tracing::warn!(
                "Could not ensure audit index '{}': {}",
                config.search.audit_index,
                e
            );
        }
        let receiver = Arc::new(AuditReceiver::new(
            broker.clone(),
            search_client.clone(),
            ReceiverConfig::from_config(&config),
        ));
        let mut states = receiver.subscribe();
        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                tracing::info!("Audit receiver is {:?}", state);
            }
        });
        let runner = receiver.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        Some((receiver, handle))
    } else {
        None
    };

    if args.role.serves_api() {
        serve(&config, search_client.clone(), broker.clone()).await;
    } else {
        tracing::info!("Receiver-only mode, press Ctrl-C to stop");
        shutdown_signal().await;
    }

    if let Some((receiver, handle)) = receiver {
        receiver.stop();
        if let Err(e) = handle.await {
            tracing::error!("Audit receiver task failed: {}", e);
        }
        tracing::info!("Audit receiver finished in state {:?}", receiver.state());
    }
    supervisor.abort();
    tracing::info!("Shutdown complete");
}

async fn serve(config: &Config, search_client: Arc<ElasticClient>, broker: Arc<NatsBroker>) {
    let executor = SearchExecutor::new(
        search_client,
        config.search.inventory_index.clone(),
        config.search.cache_capacity,
    );
    let state = Arc::new(AppState {
        search: SearchService::new(executor, config.server.default_page_size),
        publisher: AuditPublisher::new(
            broker,
            config.broker.queue.clone(),
            config.broker.publish_timeout(),
        ),
    });

    let auth_layer = Arc::new(AuthLayer::new(&config.auth.users));
    if auth_layer.user_count() == 0 {
        tracing::warn!("No users configured under [[auth.users]]; every API call will be rejected");
    }

    let app = Router::new()
        .route("/api/search", post(api::search))
        .route("/api/convert", post(api::convert))
        .route_layer(middleware::from_fn_with_state(
            auth_layer,
            auth::auth_middleware,
        ))
        .route("/health", get(api::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr: SocketAddr = match config.server.bind.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Invalid bind address '{}': {}", config.server.bind, e);
            return;
        }
    };
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("  HOSTQUERY hub");
    tracing::info!("  API:        http://{}/api/search", addr);
    tracing::info!("  Search:     {} (index '{}')", config.search.url, config.search.inventory_index);
    tracing::info!("  Broker:     {} (queue '{}')", config.broker.url, config.broker.queue);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            return;
        }
    };
    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        tracing::error!("Server error: {}", e);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        // Without a signal handler, park until the process is killed.
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
