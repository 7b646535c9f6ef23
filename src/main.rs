use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use social_post_gen::{
    app_state::AppState,
    config::AppConfig,
    db::{self, store::PgStore},
    pipeline::Pipeline,
    routes,
    services::{ai::WorkersAiClient, queue::JobQueue, storage::R2Client},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing social-post-gen server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("post_jobs_submitted_total", "Post jobs accepted and queued");
    metrics::describe_counter!(
        "carousel_slot_failures_total",
        "Carousel slot generations that failed"
    );
    metrics::describe_counter!(
        "carousel_images_generated_total",
        "Carousel images persisted"
    );
    metrics::describe_gauge!("post_queue_depth", "Jobs waiting in the queue");

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url, config.database_max_connections)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Initializing R2 storage client");
    let r2_client = R2Client::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
        &config.r2_public_base_url,
    )
    .expect("Failed to initialize R2 client");

    tracing::info!("Connecting to Redis job queue");
    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

    tracing::info!("Initializing Cloudflare Workers AI client");
    let settings = config.pipeline_settings();
    let ai_client = Arc::new(
        WorkersAiClient::new(
            &config.cf_account_id,
            &config.cf_api_token,
            config.models(),
            settings.text_timeout.max(settings.image_timeout),
        )
        .expect("Failed to initialize Workers AI client"),
    );

    // Slot regeneration runs in-process, so the server owns a pipeline too.
    let pipeline = Pipeline::new(
        Arc::new(PgStore::new(db_pool.clone())),
        ai_client.clone(),
        ai_client,
        Arc::new(r2_client),
        settings,
    );

    let state = AppState::new(db_pool, queue, pipeline);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/posts", post(routes::posts::submit))
        .route("/api/v1/posts/{job_id}", get(routes::posts::status))
        .route("/api/v1/posts/{job_id}/cancel", post(routes::posts::cancel))
        .route("/api/v1/posts/{job_id}/slots", post(routes::posts::regenerate))
        .with_state(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(2 * 1024 * 1024)); // 2 MB limit

    tracing::info!("Starting social-post-gen on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
