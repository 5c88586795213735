// Entry point for the bridge-server binary.

use anyhow::{Context, Result};
use bridge_core::adapters::auth_verifier::StaticAuthVerifier;
use bridge_core::adapters::tmux_launcher::TmuxLauncher;
use bridge_core::adapters::tmux_pty::TmuxPtyAdapter;
use bridge_core::config::Config;
use bridge_core::dispatcher::Dispatcher;
use bridge_core::metrics::Metrics;
use bridge_core::server::{build_app, AppState};
use bridge_core::store::postgres::PostgresStore;
use bridge_core::store::Stores;
use bridge_core::worker::Supervisor;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,bridge_core=debug,sqlx=warn".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env().context("failed to load configuration")?);
    tracing::info!(workspace_id = %config.workspace_id, "configuration loaded");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    tracing::info!("database connected");

    let pg = PostgresStore::new(pool.clone());
    let stores = Stores {
        threads: Arc::new(pg.clone()),
        messages: Arc::new(pg.clone()),
        cursors: Arc::new(pg.clone()),
        sessions: Arc::new(pg.clone()),
        triggers: Arc::new(pg.clone()),
        audit: Arc::new(pg),
    };

    let dispatcher = Arc::new(Dispatcher::new(stores.clone(), config.clone()));
    let metrics = Arc::new(Metrics::new());

    // Bearer-token verification against the configured JWKS endpoint is a
    // stated non-goal; operators put this behind a trusted proxy, or swap
    // in a real AuthVerifier once one exists.
    let auth_verifier: Arc<dyn bridge_core::domain::auth::AuthVerifier> = Arc::new(StaticAuthVerifier::new());

    let pty = Arc::new(TmuxPtyAdapter::new());
    let launcher = Arc::new(TmuxLauncher::new(std::env::var("BRIDGE_RUNTIME_COMMAND").unwrap_or_else(|_| "bash".to_string())));
    let callback_sink: Option<Arc<dyn bridge_core::adapters::callback::CallbackSink>> = config
        .callback_url
        .clone()
        .map(|url| Arc::new(bridge_core::adapters::callback::HttpCallbackSink::new(url)) as Arc<dyn bridge_core::adapters::callback::CallbackSink>);

    let supervisor = Arc::new(Supervisor::new(stores, config.clone(), pty, launcher, callback_sink));
    tokio::spawn(supervisor.run());

    let state = AppState { dispatcher, auth_verifier, metrics, pool };
    let app = build_app(state, &config);

    let addr = format!("{}:{}", config.api_host, config.api_port);
    tracing::info!(%addr, "starting bridge-server");
    let listener = tokio::net::TcpListener::bind(&addr).await.context("failed to bind to address")?;

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
