//! Boleto Ledger - admin-gated ledger of boleto payment proposals
//!
//! Keeps one table of proposals (payer, beneficiary acceptance and payment
//! flags) keyed by a caller-assigned id. Only the administrator captured at
//! initialization may register or update proposals; updates notify an
//! external endpoint with the new proposal state.

mod config;
mod error;
mod identity;
mod ledger;
mod notify;
mod proposal;
mod routes;
mod state;

use crate::config::{LedgerBackend, LogFormat, Settings};
use crate::identity::CallerIdentity;
use crate::ledger::{LedgerHost, MemoryLedger, PostgresLedger};
use crate::notify::HttpNotifier;
use crate::proposal::{ProposalService, ProposalStore};
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first; the log format depends on it
    let settings = Settings::load()?;
    init_tracing(settings.log_format);

    info!("🚀 Starting Boleto Ledger...");
    info!("📋 Configuration loaded successfully");

    let host = init_ledger_host(&settings).await?;
    info!("✅ Ledger host ready ({})", host.name());

    let notifier = HttpNotifier::new(&settings.notify)?;
    if settings.notify.enabled {
        info!(
            "📣 Update notifications go to {} (timeout {:?})",
            settings.notify.url, settings.notify.timeout
        );
    } else {
        warn!("⚠️  Update notifications are disabled");
    }

    let service = ProposalService::new(ProposalStore::new(host), Arc::new(notifier));

    // Initialization failures are logged; the server keeps running and
    // `init` can be invoked again over the API.
    if let Some(admin) = &settings.ledger.bootstrap_admin {
        let caller = CallerIdentity::new(admin.as_bytes());
        match service.reset(&[], &caller).await {
            Ok(outcome) => info!(
                "✅ Proposal table initialized (admin [{}])",
                outcome.admin_fingerprint
            ),
            Err(e) => error!("❌ Failed to initialize proposal table: {}", e),
        }
    } else {
        info!("No BOOTSTRAP_ADMIN set; invoke `init` to create the proposal table");
    }

    let state = Arc::new(AppState::new(service));
    let app = create_router(state, &settings);

    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   GET  /health      - Liveness check");
    info!("   POST /api/invoke  - init | reset | registrarProposta | consultarProposta");
    info!("   POST /api/query   - consultarProposta");
    info!("   Caller identity is read from the x-caller-metadata header");
    info!("");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,boleto_ledger=debug,tower_http=debug"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .compact(),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .json(),
            )
            .init(),
    }
}

/// Build the configured ledger host
async fn init_ledger_host(settings: &Settings) -> anyhow::Result<Arc<dyn LedgerHost>> {
    match settings.ledger.backend {
        LedgerBackend::Memory => {
            warn!("⚠️  Using the in-memory ledger; proposals are lost on restart");
            Ok(Arc::new(MemoryLedger::new()))
        }
        LedgerBackend::Postgres => {
            let url = settings
                .ledger
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set for the postgres ledger"))?;
            let ledger = PostgresLedger::connect(url, settings.ledger.max_pool_size).await?;
            Ok(Arc::new(ledger))
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
