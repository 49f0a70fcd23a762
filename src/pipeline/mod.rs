//! Email → CRM pipeline.
//!
//! Each run:
//! 1. `MailSource::fetch_candidates()`: unread, unlabeled mail for the alias
//! 2. `normalize()`: headers and plain-text body
//! 3. `EntityExtractor::extract()`: model call with sender-domain fallback
//! 4. `Reconciler::reconcile()`: search, create, add to list, annotate
//! 5. `MailSource::mark_processed()`: unless the result asks for a retry

pub mod orchestrator;
pub mod scheduler;
pub mod types;

pub use orchestrator::PipelineOrchestrator;
pub use scheduler::spawn_scheduler;
pub use types::{BatchSummary, Disposition, ProcessingResult};
