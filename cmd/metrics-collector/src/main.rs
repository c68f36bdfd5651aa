//! # metrics-collector
//!
//! Assembles the collector from compile-time features and runtime settings.

use std::sync::Arc;

use anyhow::Context;
use api_adapters::http::{router, AppState};
use configs::{LogFormat, LogSettings, Settings};
use domains::{ReportSink, SystemClock};
use services::{ReportProcessor, ReportService, Repositories};
use storage_adapters::MemoryStore;
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

type Storage = (Repositories, Arc<dyn ReportSink>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;
    init_tracing(&settings.log)?;

    let (repositories, sink) = match postgres(&settings).await? {
        Some(storage) => storage,
        None => {
            tracing::info!("no database configured, keeping reports in memory");
            let store = Arc::new(MemoryStore::new());
            let sink: Arc<dyn ReportSink> = store.clone();
            (Repositories::from_store(store), sink)
        }
    };

    let processor = ReportProcessor::new(repositories, Arc::new(SystemClock));
    let state = AppState::new(ReportService::new(processor, sink));

    let bind = settings.server.bind;
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(%bind, "metrics collector listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(log: &LogSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log.level))?;
    let registry = tracing_subscriber::registry().with(filter);

    match log.format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init()?,
        LogFormat::Pretty => registry.with(fmt::layer()).try_init()?,
    }
    Ok(())
}

#[cfg(feature = "db-postgres")]
async fn postgres(settings: &Settings) -> anyhow::Result<Option<Storage>> {
    use secrecy::ExposeSecret;
    use storage_adapters::PgStore;

    let Some(url) = &settings.database.url else {
        return Ok(None);
    };

    let store = PgStore::connect(url.expose_secret(), settings.database.max_connections)
        .await
        .context("connecting to PostgreSQL")?;
    store.migrate().await.context("running migrations")?;
    tracing::info!(
        max_connections = settings.database.max_connections,
        "connected to PostgreSQL"
    );

    let store = Arc::new(store);
    let sink: Arc<dyn ReportSink> = store.clone();
    Ok(Some((Repositories::from_store(store), sink)))
}

#[cfg(not(feature = "db-postgres"))]
async fn postgres(settings: &Settings) -> anyhow::Result<Option<Storage>> {
    if settings.database.url.is_some() {
        tracing::warn!("database.url is set but PostgreSQL support is not compiled in");
    }
    Ok(None)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
