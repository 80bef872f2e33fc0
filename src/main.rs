use api_rest::{AppState, router};
use api_shared::{AuthConfig, AuthVerifier};
use clinic_core::{CoreConfig, Services, connect_and_migrate};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_REST_ADDR: &str = "0.0.0.0:3000";

/// Used when `RUST_LOG` is not set. Covers every workspace crate plus the HTTP trace layer.
const DEFAULT_LOG_FILTER: &str = "clinic_run=info,clinic_core=info,api_shared=info,api_rest=info,tower_http=info";

/// Process-level settings for the server binary, resolved once at startup.
struct ServerConfig {
    rest_addr: SocketAddr,
    core: CoreConfig,
    auth: AuthConfig,
}

impl ServerConfig {
    fn from_env() -> anyhow::Result<Self> {
        let rest_addr = std::env::var("CLINIC_REST_ADDR")
            .unwrap_or_else(|_| DEFAULT_REST_ADDR.into())
            .parse()?;
        Ok(Self {
            rest_addr,
            core: CoreConfig::from_env()?,
            auth: AuthConfig::from_env()?,
        })
    }
}

/// Main entry point for the clinic backend
///
/// Connects to Postgres, applies migrations, loads the Auth0 signing keys and serves the REST
/// API until interrupted.
///
/// # Environment Variables
/// - `RUST_LOG`: log filter (default: `info` for the workspace crates and `tower_http`)
/// - `CLINIC_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `DATABASE_URL`: Postgres connection string (required)
/// - `AUTH0_DOMAIN` and `AUTH0_AUDIENCE`: Auth0 tenant and API audience
/// - `AUTH_DEV_SECRET`: HS256 secret used instead of Auth0 for local development
/// - `STRIPE_WEBHOOK_SECRET`, `HEYFLOW_WEBHOOK_TOKEN`: webhook authentication
///
/// # Errors
/// Returns an error if configuration is missing or invalid, the database or Auth0 is
/// unreachable at startup, or the server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = ServerConfig::from_env()?;
    let core = Arc::new(cfg.core);

    let store = connect_and_migrate(&core).await?;
    let auth = AuthVerifier::from_config(&cfg.auth).await?;
    let services = Services::new(core, Arc::new(store));

    tracing::info!("++ Starting clinic REST on {}", cfg.rest_addr);

    let app = router(AppState::new(services, auth));
    let listener = tokio::net::TcpListener::bind(cfg.rest_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("-- clinic REST stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}
