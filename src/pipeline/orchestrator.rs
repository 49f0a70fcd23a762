//! Batch orchestrator: pulls candidates and runs each through
//! normalize → extract → reconcile.
//!
//! Messages are handled one at a time with a fixed pause between them. A
//! failing message is recorded and the batch moves on; only a failed fetch
//! aborts the run.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::crm::Reconciler;
use crate::error::PipelineError;
use crate::extract::EntityExtractor;
use crate::mail::{MailSource, NormalizedEmail, RawMessage, normalize};
use crate::pipeline::types::{BatchSummary, Disposition, NO_COMPANY_INFO, ProcessingResult};

pub struct PipelineOrchestrator {
    mail: Arc<dyn MailSource>,
    extractor: EntityExtractor,
    reconciler: Arc<Reconciler>,
    batch_size: u32,
    message_delay: Duration,
    /// Held for the duration of a run.
    run_lock: Mutex<()>,
}

impl PipelineOrchestrator {
    pub fn new(
        mail: Arc<dyn MailSource>,
        extractor: EntityExtractor,
        reconciler: Arc<Reconciler>,
        batch_size: u32,
        message_delay: Duration,
    ) -> Self {
        Self {
            mail,
            extractor,
            reconciler,
            batch_size,
            message_delay,
            run_lock: Mutex::new(()),
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Fetch and process one batch.
    ///
    /// Returns `RunInProgress` without touching the mailbox when another run
    /// holds the lock.
    pub async fn run_batch(&self) -> Result<BatchSummary, PipelineError> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| PipelineError::RunInProgress)?;

        let mut summary = BatchSummary::start();
        let run_id = summary.run_id;

        let messages = self
            .mail
            .fetch_candidates(self.batch_size)
            .await
            .map_err(PipelineError::Fetch)?;
        info!(%run_id, count = messages.len(), "Processing candidate emails");

        for (index, raw) in messages.iter().enumerate() {
            if index > 0 && !self.message_delay.is_zero() {
                tokio::time::sleep(self.message_delay).await;
            }

            let result = self.process_message(raw).await;
            if result.disposition == Disposition::MarkProcessed
                && let Err(e) = self.mail.mark_processed(&raw.id).await
            {
                // Left unread; the next run fetches it again.
                warn!(
                    %run_id,
                    message_id = %raw.id,
                    error = %e,
                    "Failed to mark message processed"
                );
            }
            summary.record(result);
        }

        let summary = summary.finish();
        info!(
            %run_id,
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            "Batch complete"
        );
        Ok(summary)
    }

    /// Process one message. Never fails; errors become a `Retry` result.
    pub async fn process_message(&self, raw: &RawMessage) -> ProcessingResult {
        let email = normalize(raw);
        debug!(message_id = %raw.id, subject = %email.subject, "Processing email");

        match self.try_process(&email).await {
            Ok(result) => result,
            Err(e) => {
                error!(message_id = %raw.id, error = %e, "Failed to process email");
                ProcessingResult::failed(&raw.id, e.to_string(), Disposition::Retry)
            }
        }
    }

    async fn try_process(
        &self,
        email: &NormalizedEmail,
    ) -> Result<ProcessingResult, PipelineError> {
        let info = self.extractor.extract(email).await?;
        if !info.has_identity() {
            info!(message_id = %email.message_id, "No company identity in email");
            return Ok(ProcessingResult::failed(
                &email.message_id,
                NO_COMPANY_INFO,
                Disposition::MarkProcessed,
            ));
        }

        let outcome = self.reconciler.reconcile(&info).await?;
        info!(
            message_id = %email.message_id,
            organization_id = outcome.organization.id,
            list_entry_id = outcome.membership.entry().id,
            status = outcome.status(),
            "Reconciled company"
        );
        Ok(ProcessingResult::reconciled(&email.message_id, &outcome))
    }
}
