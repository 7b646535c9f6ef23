use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::db::store::StoreError;
use crate::models::carousel::{CarouselImage, ImagePrompt, NewCarouselImage, SlotKey, CAROUSEL_SIZE};
use crate::models::job::{
    JobProgress, JobStatus, NewPostJob, PostJob, ProgressStep, ProgressUpdate, StageOneOutput,
};
use crate::models::post::{Concept, Platform, SourceRef};

const JOB_COLUMNS: &str = r#"
    id, status, concept, platform, style, voice, source_refs, reference_image_key,
    caption, hashtags, image_prompts,
    progress_step, images_total, images_completed, failed_images,
    started_at, completed_at, failed_at, last_error,
    attempts, created_at, updated_at
"#;

const IMAGE_COLUMNS: &str = r#"
    id, job_id, carousel_index, slot_index, url, storage_key, prompt, alt_text,
    content_type, created_at
"#;

fn parse_column<T: FromStr>(row: &PgRow, column: &str) -> Result<T, StoreError> {
    let raw: String = row.try_get(column)?;
    T::from_str(&raw).map_err(|_| StoreError::Corrupt(format!("{column} = {raw:?}")))
}

fn map_job(row: &PgRow) -> Result<PostJob, StoreError> {
    let concept: Json<Concept> = row.try_get("concept")?;
    let source_refs: Json<Vec<SourceRef>> = row.try_get("source_refs")?;
    let image_prompts: Option<Json<Vec<ImagePrompt>>> = row.try_get("image_prompts")?;

    Ok(PostJob {
        id: row.try_get("id")?,
        status: parse_column::<JobStatus>(row, "status")?,
        concept: concept.0,
        platform: parse_column::<Platform>(row, "platform")?,
        style: row.try_get("style")?,
        voice: row.try_get("voice")?,
        source_refs: source_refs.0,
        reference_image_key: row.try_get("reference_image_key")?,
        caption: row.try_get("caption")?,
        hashtags: row.try_get("hashtags")?,
        image_prompts: image_prompts.map(|p| p.0),
        progress: JobProgress {
            step: parse_column::<ProgressStep>(row, "progress_step")?,
            images_total: row.try_get("images_total")?,
            images_completed: row.try_get("images_completed")?,
            failed_images: row.try_get("failed_images")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            failed_at: row.try_get("failed_at")?,
            last_error: row.try_get("last_error")?,
        },
        attempts: row.try_get("attempts")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_image(row: &PgRow) -> Result<CarouselImage, sqlx::Error> {
    Ok(CarouselImage {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        carousel_index: row.try_get("carousel_index")?,
        slot_index: row.try_get("slot_index")?,
        url: row.try_get("url")?,
        storage_key: row.try_get("storage_key")?,
        prompt: row.try_get("prompt")?,
        alt_text: row.try_get("alt_text")?,
        content_type: row.try_get("content_type")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Insert a new post job in the queued state
pub async fn create_job(pool: &PgPool, new_job: &NewPostJob) -> Result<PostJob, StoreError> {
    let sql = format!(
        r#"
        INSERT INTO post_jobs (status, concept, platform, style, voice, source_refs, reference_image_key, images_total)
        VALUES ('queued', $1, $2, $3, $4, $5, $6, $7)
        RETURNING {JOB_COLUMNS}
        "#
    );

    let row = sqlx::query(&sql)
        .bind(Json(&new_job.concept))
        .bind(new_job.platform.as_ref())
        .bind(&new_job.style)
        .bind(&new_job.voice)
        .bind(Json(&new_job.source_refs))
        .bind(new_job.reference_image_key.as_deref())
        .bind(CAROUSEL_SIZE)
        .fetch_one(pool)
        .await?;

    map_job(&row)
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<PostJob>, StoreError> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM post_jobs WHERE id = $1");

    let row = sqlx::query(&sql).bind(job_id).fetch_optional(pool).await?;

    row.as_ref().map(map_job).transpose()
}

/// Read only the status column (cancellation checkpoints)
pub async fn get_job_status(pool: &PgPool, job_id: Uuid) -> Result<Option<JobStatus>, StoreError> {
    let row = sqlx::query("SELECT status FROM post_jobs WHERE id = $1")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref()
        .map(|r| parse_column::<JobStatus>(r, "status"))
        .transpose()
}

/// Move a job into caption generation
pub async fn begin_caption(pool: &PgPool, job_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE post_jobs
        SET status = 'generating_caption',
            progress_step = 'generating_caption',
            started_at = COALESCE(started_at, NOW()),
            last_error = NULL,
            updated_at = NOW()
        WHERE id = $1
          AND status IN ('queued', 'generating_caption')
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Store caption, hashtags and prompts; initialize image progress
pub async fn save_stage_one(
    pool: &PgPool,
    job_id: Uuid,
    output: &StageOneOutput,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE post_jobs
        SET caption = $2,
            hashtags = $3,
            image_prompts = $4,
            status = 'generating_images',
            progress_step = 'generating_images',
            images_total = $5,
            images_completed = 0,
            failed_images = '{}',
            updated_at = NOW()
        WHERE id = $1
          AND status = 'generating_caption'
        "#,
    )
    .bind(job_id)
    .bind(&output.caption)
    .bind(&output.hashtags)
    .bind(Json(&output.image_prompts))
    .bind(CAROUSEL_SIZE)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Update the progress step of an active job
pub async fn set_progress_step(
    pool: &PgPool,
    job_id: Uuid,
    step: ProgressStep,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE post_jobs
        SET progress_step = $2,
            updated_at = NOW()
        WHERE id = $1
          AND status IN ('queued', 'generating_caption', 'generating_images')
        "#,
    )
    .bind(job_id)
    .bind(step.as_ref())
    .execute(pool)
    .await?;

    Ok(())
}

/// Atomically count one more persisted image.
///
/// The whole read-increment-finalize happens in a single statement; every
/// expression on the right-hand side sees the pre-update row.
async fn increment_images_completed(
    conn: &mut PgConnection,
    job_id: Uuid,
    slot_index: i32,
) -> Result<ProgressUpdate, StoreError> {
    let row = sqlx::query(
        r#"
        UPDATE post_jobs
        SET images_completed = images_completed + 1,
            failed_images = array_remove(failed_images, $2),
            status = CASE
                WHEN images_completed + 1 >= images_total AND status IN ('generating_images', 'failed')
                THEN 'completed' ELSE status END,
            progress_step = CASE
                WHEN images_completed + 1 >= images_total AND status IN ('generating_images', 'failed')
                THEN 'completed' ELSE progress_step END,
            completed_at = CASE
                WHEN images_completed + 1 >= images_total AND status IN ('generating_images', 'failed')
                THEN NOW() ELSE completed_at END,
            failed_at = CASE
                WHEN images_completed + 1 >= images_total AND status IN ('generating_images', 'failed')
                THEN NULL ELSE failed_at END,
            last_error = CASE
                WHEN images_completed + 1 >= images_total AND status IN ('generating_images', 'failed')
                THEN NULL ELSE last_error END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING images_completed, images_total, status
        "#,
    )
    .bind(job_id)
    .bind(slot_index)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StoreError::NotFound(job_id))?;

    Ok(ProgressUpdate {
        images_completed: row.try_get("images_completed")?,
        images_total: row.try_get("images_total")?,
        status: parse_column::<JobStatus>(&row, "status")?,
    })
}

/// Resolve a job to completed; refuses unless the carousel is full
pub async fn complete_job(pool: &PgPool, job_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE post_jobs
        SET status = 'completed',
            progress_step = 'completed',
            completed_at = COALESCE(completed_at, NOW()),
            failed_images = '{}',
            failed_at = NULL,
            last_error = NULL,
            updated_at = NOW()
        WHERE id = $1
          AND status IN ('generating_images', 'completed')
          AND images_completed >= images_total
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Resolve an active job to failed
pub async fn fail_job(
    pool: &PgPool,
    job_id: Uuid,
    failed_images: &[i32],
    error: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE post_jobs
        SET status = 'failed',
            progress_step = 'failed',
            failed_images = $2,
            last_error = $3,
            failed_at = NOW(),
            updated_at = NOW()
        WHERE id = $1
          AND status IN ('queued', 'generating_caption', 'generating_images')
        "#,
    )
    .bind(job_id)
    .bind(failed_images)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Mark an active job cancelled
pub async fn cancel_job(pool: &PgPool, job_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE post_jobs
        SET status = 'cancelled',
            progress_step = 'cancelled',
            updated_at = NOW()
        WHERE id = $1
          AND status IN ('queued', 'generating_caption', 'generating_images')
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Increment attempt count
pub async fn increment_attempts(pool: &PgPool, job_id: Uuid) -> Result<i32, sqlx::Error> {
    let row = sqlx::query(
        r#"
        UPDATE post_jobs
        SET attempts = attempts + 1,
            updated_at = NOW()
        WHERE id = $1
        RETURNING attempts
        "#,
    )
    .bind(job_id)
    .fetch_one(pool)
    .await?;

    row.try_get("attempts")
}

/// Active jobs that have not been written since `before` (for reconciliation)
pub async fn get_stale_jobs(
    pool: &PgPool,
    before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<PostJob>, StoreError> {
    let sql = format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM post_jobs
        WHERE status IN ('queued', 'generating_caption', 'generating_images')
          AND updated_at < $1
        ORDER BY updated_at ASC
        LIMIT $2
        "#
    );

    let rows = sqlx::query(&sql)
        .bind(before)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    rows.iter().map(map_job).collect()
}

/// Whether a slot already has a persisted image
pub async fn image_exists(pool: &PgPool, key: SlotKey) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM carousel_images
            WHERE job_id = $1 AND carousel_index = $2 AND slot_index = $3
        )
        "#,
    )
    .bind(key.job_id)
    .bind(key.carousel_index)
    .bind(key.slot_index)
    .fetch_one(pool)
    .await
}

/// Insert an image row; a duplicate key is a no-op
async fn insert_image(conn: &mut PgConnection, image: &NewCarouselImage) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO carousel_images
            (job_id, carousel_index, slot_index, url, storage_key, prompt, alt_text, content_type)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (job_id, carousel_index, slot_index) DO NOTHING
        "#,
    )
    .bind(image.key.job_id)
    .bind(image.key.carousel_index)
    .bind(image.key.slot_index)
    .bind(&image.url)
    .bind(&image.storage_key)
    .bind(&image.prompt)
    .bind(&image.alt_text)
    .bind(&image.content_type)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Insert an image row and count it, in one transaction.
///
/// Returns `None` without touching the counter when the slot already had a row.
pub async fn persist_image(
    pool: &PgPool,
    image: &NewCarouselImage,
) -> Result<Option<ProgressUpdate>, StoreError> {
    let mut tx = pool.begin().await?;

    if !insert_image(&mut *tx, image).await? {
        tx.rollback().await?;
        return Ok(None);
    }
    let update = increment_images_completed(&mut *tx, image.key.job_id, image.key.slot_index).await?;

    tx.commit().await?;
    Ok(Some(update))
}

/// All images of a job, in carousel order
pub async fn list_images(pool: &PgPool, job_id: Uuid) -> Result<Vec<CarouselImage>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT {IMAGE_COLUMNS}
        FROM carousel_images
        WHERE job_id = $1
        ORDER BY carousel_index ASC, slot_index ASC
        "#
    );

    let rows = sqlx::query(&sql).bind(job_id).fetch_all(pool).await?;

    rows.iter().map(map_image).collect()
}
