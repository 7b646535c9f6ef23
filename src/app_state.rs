use sqlx::PgPool;
use std::sync::Arc;

use crate::db::store::PgStore;
use crate::pipeline::Pipeline;
use crate::services::queue::JobQueue;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub store: Arc<PgStore>,
    pub queue: Arc<JobQueue>,
    pub pipeline: Pipeline,
}

impl AppState {
    pub fn new(db: PgPool, queue: JobQueue, pipeline: Pipeline) -> Self {
        Self {
            store: Arc::new(PgStore::new(db.clone())),
            db,
            queue: Arc::new(queue),
            pipeline,
        }
    }
}
