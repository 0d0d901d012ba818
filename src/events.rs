//! Domain events published after a change has been committed.

use chrono::Utc;

use crate::draft::{DraftStatus, TimeStamp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftEventKind {
    Created,
    Converted { invoice_id: String },
    Edited,
    Submitted,
    Approved,
    Rejected { reason: String },
    Finalized { invoice_id: String },
    Reverted { from: u64 },
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftEvent {
    pub draft_id: String,
    pub draft_number: String,
    /// Version after the change. For `Deleted`, the last version the draft had.
    pub version: u64,
    pub status: DraftStatus,
    pub actor_id: String,
    pub at: TimeStamp<Utc>,
    pub kind: DraftEventKind,
}
