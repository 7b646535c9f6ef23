use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::carousel::{ImagePrompt, SlotKey};
use crate::pipeline::{Pipeline, PipelineError, SlotOutcome};

impl Pipeline {
    /// Second pass over the slots the fan-out left empty.
    ///
    /// Runs one slot at a time with the prompt stage 1 produced for it. Slots
    /// that fill in meanwhile are skipped by `generate_slot`. Returns the number
    /// of slots this sweep persisted.
    pub(crate) async fn recovery_sweep(
        &self,
        job_id: Uuid,
        missing: &[i32],
        prompts: &[ImagePrompt],
        reference: Option<&[u8]>,
        token: &CancellationToken,
    ) -> usize {
        let mut recovered = 0;

        for &slot_index in missing {
            if token.is_cancelled() {
                break;
            }
            let Some(prompt) = prompts.iter().find(|p| p.slot_index == slot_index) else {
                tracing::warn!(job_id = %job_id, slot_index, "No stored prompt for missing slot");
                continue;
            };

            let key = SlotKey::new(job_id, slot_index);
            match self
                .generate_slot(key, &prompt.prompt, &prompt.alt_text, reference, token)
                .await
            {
                Ok(SlotOutcome::Persisted { .. }) => {
                    recovered += 1;
                    metrics::counter!("carousel_slots_recovered_total").increment(1);
                    tracing::info!(job_id = %job_id, slot_index, "Slot recovered");
                }
                Ok(SlotOutcome::AlreadyPresent) => {}
                Ok(SlotOutcome::Cancelled) | Err(PipelineError::Cancelled) => break,
                Err(e) => {
                    metrics::counter!("carousel_slot_failures_total").increment(1);
                    tracing::warn!(job_id = %job_id, slot_index, error = %e, "Slot recovery failed");
                }
            }
        }

        recovered
    }
}
