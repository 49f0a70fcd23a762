//! Per-message results and batch summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crm::ReconcileOutcome;

/// Reason recorded when extraction produced neither a name nor a domain.
pub const NO_COMPANY_INFO: &str = "no company info";

/// What happens to the source message after processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Apply the processed marker; the message will not be fetched again.
    MarkProcessed,
    /// Leave unread so the next run picks it up.
    Retry,
}

/// Outcome of one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub message_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_entry_id: Option<i64>,
    pub already_in_pipeline: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub disposition: Disposition,
}

impl ProcessingResult {
    pub fn failed(
        message_id: impl Into<String>,
        reason: impl Into<String>,
        disposition: Disposition,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            success: false,
            company: None,
            organization_id: None,
            list_entry_id: None,
            already_in_pipeline: false,
            stage: None,
            reason: Some(reason.into()),
            disposition,
        }
    }

    pub fn reconciled(message_id: impl Into<String>, outcome: &ReconcileOutcome) -> Self {
        let entry = outcome.membership.entry();
        Self {
            message_id: message_id.into(),
            success: true,
            company: Some(outcome.organization.name.clone()),
            organization_id: Some(outcome.organization.id),
            list_entry_id: Some(entry.id),
            already_in_pipeline: !outcome.membership.is_added(),
            stage: outcome.stage.clone(),
            reason: None,
            disposition: Disposition::MarkProcessed,
        }
    }
}

/// Aggregate of one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Newly added to the pipeline.
    pub processed: usize,
    /// Already in the pipeline.
    pub skipped: usize,
    pub failed: usize,
    pub details: Vec<ProcessingResult>,
}

impl BatchSummary {
    pub fn start() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            processed: 0,
            skipped: 0,
            failed: 0,
            details: Vec::new(),
        }
    }

    pub fn record(&mut self, result: ProcessingResult) {
        match (result.success, result.already_in_pipeline) {
            (false, _) => self.failed += 1,
            (true, true) => self.skipped += 1,
            (true, false) => self.processed += 1,
        }
        self.details.push(result);
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    pub fn total(&self) -> usize {
        self.details.len()
    }
}
