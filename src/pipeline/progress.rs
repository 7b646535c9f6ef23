use crate::db::store::{PostStore, StoreError};
use crate::models::carousel::NewCarouselImage;
use crate::models::job::{JobStatus, ProgressUpdate};

/// Keeps `images_completed` equal to the number of persisted rows.
///
/// A row and its count are only ever written together, through the store's
/// atomic `persist_image`.
pub struct ProgressTracker<'a> {
    store: &'a dyn PostStore,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(store: &'a dyn PostStore) -> Self {
        Self { store }
    }

    /// `None` when the slot already had a row.
    pub async fn persist(
        &self,
        image: &NewCarouselImage,
    ) -> Result<Option<ProgressUpdate>, StoreError> {
        let key = image.key;
        let Some(update) = self.store.persist_image(image).await? else {
            return Ok(None);
        };

        metrics::counter!("carousel_images_generated_total").increment(1);
        tracing::debug!(
            job_id = %key.job_id,
            slot_index = key.slot_index,
            images_completed = update.images_completed,
            images_total = update.images_total,
            "Progress incremented"
        );

        if update.is_full() && update.status == JobStatus::Completed {
            tracing::info!(job_id = %key.job_id, "Carousel full, job finalized as completed");
        }

        Ok(Some(update))
    }
}
