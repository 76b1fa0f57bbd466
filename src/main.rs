//! afftrack server
//!
//! Serves the short-link redirector, the advertiser postback endpoint and
//! the admin API over PostgreSQL and an in-process TTL cache.

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use afftrack_server::cache::{Cache, MemoryCache};
use afftrack_server::config::Config;
use afftrack_server::db;
use afftrack_server::geoip::{DisabledGeoIp, GeoIpLookup, IpApiClient};
use afftrack_server::routes::create_router;
use afftrack_server::security::Signer;
use afftrack_server::state::AppState;
use afftrack_server::store::{PgStore, Store};

const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(environment = config.environment.as_str(), "Starting afftrack server");

    // Durable store
    let db_pool = db::create_pool(&config)
        .await
        .context("Failed to connect to database")?;
    db::run_migrations(&db_pool)
        .await
        .context("Failed to run migrations")?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool));

    // In-memory store with periodic sweep
    let memory_cache = Arc::new(MemoryCache::new());
    let sweeper = memory_cache.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let purged = sweeper.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Expired cache entries removed");
            }
        }
    });
    let cache: Arc<dyn Cache> = memory_cache;

    let geoip: Arc<dyn GeoIpLookup> = if config.geoip_enabled {
        Arc::new(IpApiClient::new(
            config.geoip_url.clone(),
            cache.clone(),
            Signer::new(&config.security.hmac_secret),
        ))
    } else {
        tracing::info!("GeoIP lookups disabled");
        Arc::new(DisabledGeoIp)
    };

    let port = config.port;
    let cors = configure_cors(config.cors_allowed_origins.as_deref());
    let (app_state, _workers) = AppState::new(config, store.clone(), cache, geoip);

    // The cache starts cold; restore minted codes from their enrollments
    let restored = app_state
        .tracking
        .reseed(store.as_ref(), chrono::Utc::now())
        .await
        .context("Failed to restore tracking codes")?;
    tracing::info!(restored, "Tracking codes restored");

    let app = create_router(app_state).layer(
        ServiceBuilder::new()
            .layer(SetResponseHeaderLayer::overriding(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ))
            .layer(cors),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check at http://{}/health", addr);

    // Serve with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn configure_cors(allowed_origins: Option<&str>) -> CorsLayer {
    let allowed_origins = allowed_origins.unwrap_or_default();

    if allowed_origins.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
