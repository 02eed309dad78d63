use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum_server::Handle;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use cdk_core::Database;
use cdk_core::auth::{ApiKeyConfig, StaticKeyAuthenticator};
use cdk_core::repositories::{
    InMemoryStore, PostgresBatchRepository, PostgresCodeRepository,
    PostgresRedemptionEventRepository,
};
use cdk_core::services::CdkService;
use cdk_server::config::Args;
use cdk_server::http::{AppState, create_router};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("cdk=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(sub).context("Failed to set global subscriber")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;
    let args = Args::parse();
    info!(
        bind_addr = %args.bind_addr,
        in_memory = args.in_memory,
        deadline_ms = args.request_deadline_ms,
        "cdk-server starting"
    );

    if let Err(e) = run_server(args).await {
        error!("Server error: {:?}", e);
        return Err(e);
    }
    Ok(())
}

async fn run_server(args: Args) -> anyhow::Result<()> {
    let keys = ApiKeyConfig::load(&args.key_file)
        .with_context(|| format!("loading key file {}", args.key_file.display()))?;
    if keys.keys.is_empty() {
        warn!("Key file has no entries; every request will be unauthorized");
    }
    let authenticator = Arc::new(StaticKeyAuthenticator::new(keys));

    let service = if args.in_memory {
        if args.migrate_only {
            anyhow::bail!("--migrate-only has nothing to do with --in-memory");
        }
        warn!("Using the in-memory store; state is lost on exit");
        let store = InMemoryStore::new_shared();
        CdkService::from_repositories(
            store.clone(),
            store.clone(),
            store,
            authenticator,
            args.rate_limits(),
            args.request_deadline(),
        )
    } else {
        let db = Database::new(&args.database_url, args.max_connections, args.request_deadline())
            .await
            .context("connecting to Postgres")?;
        db.migrate().await.context("applying migrations")?;
        if args.migrate_only {
            info!("Migrations complete, exiting (--migrate-only).");
            return Ok(());
        }

        let pool = db.pool().clone();
        CdkService::from_repositories(
            Arc::new(PostgresBatchRepository::new(pool.clone())),
            Arc::new(PostgresCodeRepository::new(pool.clone())),
            Arc::new(PostgresRedemptionEventRepository::new(pool)),
            authenticator,
            args.rate_limits(),
            args.request_deadline(),
        )
    };

    if args.trust_forwarded_for {
        info!("Client addresses taken from X-Forwarded-For");
    }
    let state = AppState::new(Arc::new(service)).trusting_forwarded_for(args.trust_forwarded_for);
    let app = create_router(state);

    let handle = Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, draining connections");
            shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        }
    });

    info!("Listening on http://{}", args.bind_addr);
    axum_server::bind(args.bind_addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("HTTP server failed")?;

    info!("cdk-server shut down.");
    Ok(())
}
