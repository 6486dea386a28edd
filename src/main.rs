//! camwatch - Multi-camera stream and detection worker manager
//!
//! Main entry point.

use camwatch::{
    ai_client::GeminiClient,
    config_store::{CameraDirectory, InMemoryConfig, ModelRegistry, PgConfigRepository},
    detection_log_service::{DetectionLogService, DetectionStore, InMemoryDetectionStore},
    frame_source::FfmpegConnector,
    state::{AppConfig, AppState, Collaborators},
    web_api,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Grace period for workers on shutdown
const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camwatch=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting camwatch v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        host = %config.host,
        port = config.port,
        database = config.database_url.is_some(),
        gemini_model = %config.gemini_model,
        fire_key = config.gemini_api_key_fire.is_some(),
        helmet_key = config.gemini_api_key_helmet.is_some(),
        "Configuration loaded"
    );

    // Camera/model lookups and detection store
    let (pool, cameras, models, store) = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await?;
            tracing::info!("Database connected");

            let repo = Arc::new(PgConfigRepository::new(pool.clone()));
            let store: Arc<dyn DetectionStore> = Arc::new(DetectionLogService::new(pool.clone()));
            (
                Some(pool),
                repo.clone() as Arc<dyn CameraDirectory>,
                repo as Arc<dyn ModelRegistry>,
                store,
            )
        }
        None => {
            let mut static_config = InMemoryConfig::new();
            for (camera_id, address) in &config.static_cameras {
                static_config = static_config.with_camera(camera_id, address);
            }
            for (model_id, kind) in &config.static_models {
                static_config = static_config.with_model(model_id, *kind);
            }
            tracing::warn!(
                cameras = config.static_cameras.len(),
                models = config.static_models.len(),
                "DATABASE_URL not set, using static configuration"
            );

            let static_config = Arc::new(static_config);
            let store: Arc<dyn DetectionStore> = Arc::new(InMemoryDetectionStore::new());
            (
                None,
                static_config.clone() as Arc<dyn CameraDirectory>,
                static_config as Arc<dyn ModelRegistry>,
                store,
            )
        }
    };

    let inference = Arc::new(GeminiClient::new(config.gemini_config())?);
    let connector = Arc::new(FfmpegConnector::new(config.ffmpeg_options()));

    let state = AppState::new(
        config.clone(),
        pool,
        Collaborators {
            cameras,
            models,
            connector,
            inference,
            store,
        },
    );
    tracing::info!("Components initialized");

    let cors = match config.cors_origin.parse::<axum::http::HeaderValue>() {
        Ok(origin) if config.cors_origin != "*" => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin))
            .allow_methods(Any)
            .allow_headers(Any),
        _ => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let app = web_api::create_router(state.clone())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.supervisor.shutdown(WORKER_SHUTDOWN_TIMEOUT).await;
    state.registry.release_all().await;
    tracing::info!("camwatch stopped");

    Ok(())
}
