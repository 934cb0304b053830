use anyhow::{Context, Result};
use gymface_core::{CheckinService, Config, FacePipeline};
use gymface_store::SqliteStore;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod engine;
mod http;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gymfaced starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        db_path = %config.db_path.display(),
        threshold = config.match_threshold,
        metric = %config.distance_metric,
        "configuration loaded"
    );

    // Models load before anything listens: a missing model is a startup failure.
    let pipeline = FacePipeline::load(&config.detector_model_path(), &config.recognizer_model_path())
        .context("failed to load face models")?;
    let dimension = pipeline.dimension();
    let engine = engine::spawn_engine(pipeline)?;

    let store = SqliteStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open database at {}", config.db_path.display()))?;
    let service = Arc::new(
        CheckinService::new(
            Arc::new(store),
            dimension,
            config.distance_metric,
            config.match_threshold,
            config.recorder(),
        )
        .await
        .context("failed to load gallery")?,
    );

    if let Some(every) = config.gallery_refresh() {
        spawn_gallery_refresh(service.clone(), every);
    }

    let state = Arc::new(http::AppState {
        service,
        engine,
        timeout: config.request_timeout(),
    });
    let app = http::router(state, config.max_image_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "gymfaced ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("gymfaced shutting down");
        })
        .await?;

    Ok(())
}

/// Reload the gallery every `every`. Failures keep the previous snapshot.
fn spawn_gallery_refresh(service: Arc<CheckinService<SqliteStore>>, every: Duration) {
    tracing::info!(every_secs = every.as_secs(), "periodic gallery refresh enabled");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; the gallery is already fresh.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = service.reload_gallery().await {
                tracing::warn!(error = %e, "periodic gallery reload failed");
            }
        }
    });
}
