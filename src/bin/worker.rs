use social_post_gen::{
    config::AppConfig,
    db::{self, store::PgStore},
    pipeline::{
        reconcile::{reconcile_stale_jobs, ReconcileSettings},
        JobOutcome, Pipeline,
    },
    services::{
        ai::WorkersAiClient,
        queue::{JobQueue, QueuedJob},
        storage::R2Client,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting post generation worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url, config.database_max_connections)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let r2_client = R2Client::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
        &config.r2_public_base_url,
    )
    .expect("Failed to initialize R2 client");

    let queue = Arc::new(JobQueue::new(&config.redis_url).expect("Failed to initialize job queue"));

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

    let store = Arc::new(PgStore::new(db_pool));
    let pipeline = Pipeline::new(
        store.clone(),
        ai_client.clone(),
        ai_client,
        Arc::new(r2_client),
        settings,
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested, draining in-flight jobs");
            }
            shutdown.cancel();
        }
    });

    let reconciler = tokio::spawn(reconcile_loop(
        store,
        queue.clone(),
        config.reconcile_settings(),
        config.reconcile_interval(),
        shutdown.clone(),
    ));

    let concurrency = config.worker_concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    // Runs are not tied to `shutdown`; a drained job finishes instead of being interrupted.
    let runs = CancellationToken::new();

    tracing::info!(concurrency, "Worker ready, starting job processing loop");

    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = queue.dequeue() => job,
        };

        match job {
            Ok(Some(job)) => {
                let pipeline = pipeline.clone();
                let queue = queue.clone();
                let runs = runs.clone();
                tokio::spawn(async move {
                    process_job(&pipeline, &queue, job, &runs).await;
                    drop(permit);
                });
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No jobs available, sleeping");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(Duration::from_millis(POLL_INTERVAL_MS)) => {}
                }
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Error dequeuing job, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }

    // Every permit back means every spawned run has finished.
    let _ = semaphore.acquire_many(concurrency as u32).await;
    reconciler.abort();
    tracing::info!("Worker stopped");
}

async fn process_job(pipeline: &Pipeline, queue: &JobQueue, job: QueuedJob, runs: &CancellationToken) {
    tracing::info!(job_id = %job.job_id, "Processing post job");

    let outcome = pipeline.run(job.job_id, runs).await;

    if let JobOutcome::Interrupted { error } = &outcome {
        // Left in the processing list; reconciliation requeues it once stale.
        tracing::warn!(job_id = %job.job_id, error = %error, "Job interrupted, leaving it for reconciliation");
        return;
    }

    if let Err(e) = queue.complete(&job).await {
        tracing::error!(job_id = %job.job_id, error = %e, "Failed to remove job from processing list");
    }
}

async fn reconcile_loop(
    store: Arc<PgStore>,
    queue: Arc<JobQueue>,
    settings: ReconcileSettings,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match reconcile_stale_jobs(store.as_ref(), queue.as_ref(), &settings).await {
            Ok(report) => {
                tracing::debug!(
                    requeued = report.requeued.len(),
                    abandoned = report.abandoned.len(),
                    waiting = report.waiting.len(),
                    "Reconciliation tick"
                );
            }
            Err(e) => tracing::error!(error = %e, "Reconciliation pass failed"),
        }
    }
}
