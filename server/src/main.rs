use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use miette::{IntoDiagnostic, Result};
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};

use switchyard::accounts::AccountStore;
use switchyard::config::GatewayConfig;
use switchyard::jobs;
use switchyard::keys::ClientKeyStore;
use switchyard::oauth::HttpTokenEndpoint;
use switchyard::proxy::HttpUpstream;
use switchyard::server::Gateway;
use switchyard::sessions::SessionRegistry;
use switchyard::storage;

/// Bound on the shutdown flush; past this the process exits regardless.
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "server=debug,switchyard=debug,info".parse().unwrap()),
        )
        .init();

    let config_path = std::env::var("SWITCHYARD_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("switchyard.yaml"));
    let config = GatewayConfig::load(Some(&config_path)).into_diagnostic()?;
    config.validate().into_diagnostic()?;

    tracing::info!("Upstream: {}", config.upstream.base_url);
    tracing::info!("Data folder: {}", config.storage.data_folder.display());
    tracing::info!("Bind address: {}", config.bind_addr());

    storage::ensure_data_dir(&config.storage.data_folder)
        .await
        .into_diagnostic()?;

    let data = &config.storage.data_folder;
    let accounts = Arc::new(AccountStore::load(data.join("accounts.json")).await);
    let keys = Arc::new(ClientKeyStore::load(data.join("tokens.json")).await);
    let sessions = Arc::new(
        SessionRegistry::load(
            data.join("sessions.json"),
            config.session.enabled,
            config.session.max_concurrent,
            config.session_ttl(),
        )
        .await,
    );

    // One pooled HTTP client for the process: upstream calls and token
    // refreshes share its connections.
    let http_client = reqwest::Client::builder()
        .pool_max_idle_per_host(10)
        .build()
        .into_diagnostic()?;
    let oauth = Arc::new(HttpTokenEndpoint::new(
        http_client.clone(),
        config.oauth.clone(),
    ));
    let upstream = Arc::new(HttpUpstream::new(
        http_client,
        config.upstream.base_url.clone(),
        config.request_timeout(),
    ));

    let config = Arc::new(config);
    let gateway = Gateway::new(
        config.clone(),
        accounts.clone(),
        keys,
        sessions.clone(),
        upstream,
        oauth,
    );

    jobs::spawn_sync_job(
        gateway.clone(),
        Duration::from_secs(config.sync.interval_secs),
    );
    jobs::spawn_session_cleanup(
        sessions,
        Duration::from_secs(config.session.cleanup_interval_secs),
    );
    jobs::spawn_rate_limit_recovery(accounts);
    jobs::spawn_scheduled_refresh(gateway.tokens.clone());

    let mut app = gateway.router().layer(CorsLayer::permissive());

    // Optional admin UI: a built SPA served with index fallback.
    if let Ok(ui_dir) = std::env::var("SWITCHYARD_UI_DIR") {
        tracing::info!("Serving admin UI from {}", ui_dir);
        let index = PathBuf::from(&ui_dir).join("index.html");
        app = app.fallback_service(ServeDir::new(&ui_dir).not_found_service(ServeFile::new(index)));
    }

    let listener = tokio::net::TcpListener::bind(&config.bind_addr())
        .await
        .into_diagnostic()?;
    tracing::info!(
        "Server listening on {}",
        listener.local_addr().into_diagnostic()?
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .into_diagnostic()?;

    // Flush whatever the sync job hasn't gotten to yet.
    if tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, jobs::final_sync(&gateway))
        .await
        .is_err()
    {
        tracing::warn!("final sync did not finish within the shutdown window");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
