use crate::draft::DraftStatus;
use crate::state_machine::ActionKind;

/// Malformed or incomplete input. Never mutates state.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Draft needs a customer or a business reference")]
    MissingParty,
    #[error("Draft is missing its monetary totals")]
    MissingTotals,
    #[error("Amount '{0}' must not be negative")]
    NegativeAmount(&'static str),
    #[error("Edit contained no changes")]
    EmptyPatch,
    #[error("A rejection reason is required")]
    EmptyReason,
    #[error("Finalize requires an invoice id")]
    EmptyInvoiceId,
    #[error("Version {version} is already the current version")]
    RevertToHead { version: u64 },
    #[error("Page numbers start at 1")]
    InvalidPage,
    #[error("Page limit {limit} is outside 1..={max}")]
    InvalidLimit { limit: usize, max: usize },
    #[error("dateFrom is after dateTo")]
    InvalidDateRange,
}

/// The thing a lookup failed to find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    Draft(String),
    Version { draft_id: String, version: u64 },
    Invoice(String),
}

impl std::fmt::Display for Missing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Missing::Draft(id) => write!(f, "draft {id}"),
            Missing::Version { draft_id, version } => {
                write!(f, "version {version} of draft {draft_id}")
            }
            Missing::Invoice(id) => write!(f, "invoice {id}"),
        }
    }
}

/// Failures raised by a [`crate::store::DraftRepository`].
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("draft {draft_id} expected at version {expected}, store has {found:?}")]
    Conflict {
        draft_id: String,
        expected: u64,
        found: Option<u64>,
    },
    #[error("draft {0} already exists")]
    Duplicate(String),
    #[error("storage backend failed: {0}")]
    Backend(#[from] sled::Error),
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("storage task did not complete: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failures reported by the invoice creation service.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvoiceError {
    #[error("invoice service unavailable: {0}")]
    Unavailable(String),
    #[error("invoice service refused the draft: {0}")]
    Rejected(String),
}

#[derive(thiserror::Error, Debug)]
pub enum DraftError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0} not found")]
    NotFound(Missing),
    #[error("cannot {action} a draft in status {status}")]
    InvalidTransition {
        status: DraftStatus,
        action: ActionKind,
    },
    #[error("draft {draft_id} is at version {found}, caller expected version {expected}")]
    VersionConflict {
        draft_id: String,
        expected: u64,
        found: u64,
    },
    #[error("invoice creation failed for draft {draft_id}, draft left APPROVED: {reason}")]
    DependencyFailure { draft_id: String, reason: String },
    #[error(transparent)]
    Store(StoreError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DraftError {
    /// Only a failed finalize sub-step is safe to retry by calling approve again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DraftError::DependencyFailure { .. })
    }
}

impl From<StoreError> for DraftError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict {
                draft_id,
                expected,
                found: Some(found),
            } => DraftError::VersionConflict {
                draft_id,
                expected,
                found,
            },
            StoreError::Conflict {
                draft_id,
                found: None,
                ..
            } => DraftError::NotFound(Missing::Draft(draft_id)),
            other => DraftError::Store(other),
        }
    }
}
