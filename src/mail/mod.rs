//! Mailbox access: the `MailSource` seam, the Gmail adapter, and normalization.

pub mod gmail;
pub mod normalize;
pub mod types;

pub use gmail::{GmailAuth, GmailClient, GmailConfig};
pub use normalize::normalize;
pub use types::{NormalizedEmail, RawMessage};

use async_trait::async_trait;

use crate::error::MailError;

/// Source of candidate messages: pure I/O, no business logic.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Unread messages addressed to the alias that do not carry the
    /// processed marker, at most `max_results`.
    async fn fetch_candidates(&self, max_results: u32) -> Result<Vec<RawMessage>, MailError>;

    /// Attach the processed marker and clear the unread flag. Idempotent.
    async fn mark_processed(&self, message_id: &str) -> Result<(), MailError>;
}
