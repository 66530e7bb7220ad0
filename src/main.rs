use anyhow::Result;
use axum::Router;
use chrono::Utc;
use std::{io::ErrorKind, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use upload_coordinator::{
    config::AppConfig,
    routes,
    services::{
        blob_backend::FsBlobBackend,
        coordinator::{RetryPolicy, UploadCoordinator, UploadLimits},
        session_store::{self, SessionStore},
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;

    tracing::info!("Starting upload-coordinator with config: {:?}", cfg);

    // --- Build collaborators ---
    let store = session_store::build_store(
        cfg.session_store.clone(),
        &cfg.session_dir,
        &cfg.redis_url,
    )
    .await?;
    let backend = Arc::new(FsBlobBackend::new(&cfg.data_dir)?);

    let coordinator = UploadCoordinator::new(
        store.clone(),
        backend,
        UploadLimits {
            chunk_size: cfg.chunk_size,
            max_file_size: cfg.max_file_size,
        },
        RetryPolicy::default(),
    );

    // --- Retention sweep (optional) ---
    if let Some(ttl_secs) = cfg.session_ttl_secs {
        spawn_session_sweeper(store, ttl_secs);
    }

    // --- Build router ---
    let app: Router = routes::routes::routes(coordinator.limits().chunk_request_body_limit())
        .with_state(coordinator);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically delete sessions older than the configured TTL.
fn spawn_session_sweeper(store: Arc<dyn SessionStore>, ttl_secs: u64) {
    let period = Duration::from_secs((ttl_secs / 4).clamp(60, 3600));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let cutoff = Utc::now() - chrono::Duration::seconds(ttl_secs as i64);
            match store.sweep_expired(cutoff).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!("swept {} expired upload sessions", removed),
                Err(err) => tracing::warn!("session sweep failed: {}", err),
            }
        }
    });
}
