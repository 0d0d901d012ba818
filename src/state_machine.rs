//! Draft lifecycle transitions
//!
//! ```text
//!  DRAFT ──submit──▶ PENDING_APPROVAL ──approve──▶ APPROVED ──finalize──▶ FINALIZED
//!    ▲  │                   │
//!    │  edit/revert         reject
//!    │                      ▼
//!    └──────edit──────── REJECTED
//! ```
//!
//! [`transition`] is pure: it never touches storage or the invoice service.
//! It returns the next draft and the side effects the caller has to carry out.
//! Version bumps are left to [`crate::ledger::record`] so that an approval and
//! its finalize sub-step can land as a single version entry.
use std::fmt;

use chrono::Utc;

use super::draft::{Actor, Draft, DraftPatch, DraftStatus, TimeStamp};
use super::error::{DraftError, ValidationError};
use super::ledger::{VersionCause, VersionEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Edit(DraftPatch),
    Submit,
    Approve,
    /// Internal sub-step of approve, driven by the gateway once an invoice exists.
    Finalize { invoice_id: String },
    Reject { reason: String },
    Delete,
    Revert(VersionEntry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Edit,
    Submit,
    Approve,
    Finalize,
    Reject,
    Delete,
    Revert,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Edit(_) => ActionKind::Edit,
            Action::Submit => ActionKind::Submit,
            Action::Approve => ActionKind::Approve,
            Action::Finalize { .. } => ActionKind::Finalize,
            Action::Reject { .. } => ActionKind::Reject,
            Action::Delete => ActionKind::Delete,
            Action::Revert(_) => ActionKind::Revert,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Edit => "edit",
            ActionKind::Submit => "submit",
            ActionKind::Approve => "approve",
            ActionKind::Finalize => "finalize",
            ActionKind::Reject => "reject",
            ActionKind::Delete => "delete",
            ActionKind::Revert => "revert",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    /// Commit `next` as a new version entry.
    AppendVersion(VersionCause),
    /// Ask the invoice service for an invoice, then finalize.
    CreateInvoice,
    /// Remove the draft and its whole ledger.
    CascadeDelete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: Draft,
    pub effects: Vec<SideEffect>,
}

impl Transition {
    fn append(next: Draft, cause: VersionCause) -> Self {
        Self {
            next,
            effects: vec![SideEffect::AppendVersion(cause)],
        }
    }

    pub fn version_cause(&self) -> Option<&VersionCause> {
        self.effects.iter().find_map(|effect| match effect {
            SideEffect::AppendVersion(cause) => Some(cause),
            _ => None,
        })
    }

    pub fn requires_invoice(&self) -> bool {
        self.effects.contains(&SideEffect::CreateInvoice)
    }

    pub fn destroys(&self) -> bool {
        self.effects.contains(&SideEffect::CascadeDelete)
    }
}

/// Decide whether `action` is legal for `draft` and compute the outcome.
///
/// Fails with [`DraftError::InvalidTransition`] or [`DraftError::Validation`]
/// only. The input draft is never modified.
pub fn transition(
    draft: &Draft,
    action: Action,
    actor: &Actor,
    now: &TimeStamp<Utc>,
) -> Result<Transition, DraftError> {
    let invalid = |action: &Action| DraftError::InvalidTransition {
        status: draft.status,
        action: action.kind(),
    };

    match (draft.status, action) {
        (DraftStatus::Draft | DraftStatus::Rejected, Action::Edit(patch)) => {
            if patch.is_empty() {
                return Err(ValidationError::EmptyPatch.into());
            }
            let payload = patch.apply_to(&draft.payload);
            payload.validate()?;

            let mut next = draft.clone();
            next.payload = payload;
            next.status = DraftStatus::Draft;
            next.rejection_reason = None;
            Ok(Transition::append(next, VersionCause::Edited))
        }
        (DraftStatus::Draft, Action::Submit) => {
            let mut next = draft.clone();
            next.status = DraftStatus::PendingApproval;
            next.submitted_at = Some(now.clone());
            next.submitted_by = Some(actor.id.clone());
            Ok(Transition::append(next, VersionCause::Submitted))
        }
        (DraftStatus::PendingApproval, Action::Approve) => {
            let mut next = draft.clone();
            next.status = DraftStatus::Approved;
            next.approved_at = Some(now.clone());
            next.approved_by = Some(actor.id.clone());
            Ok(Transition {
                next,
                effects: vec![
                    SideEffect::AppendVersion(VersionCause::Approved),
                    SideEffect::CreateInvoice,
                ],
            })
        }
        // resume a finalize that failed or was deferred
        (DraftStatus::Approved, Action::Approve) => Ok(Transition {
            next: draft.clone(),
            effects: vec![SideEffect::CreateInvoice],
        }),
        (DraftStatus::Approved, Action::Finalize { invoice_id }) => {
            if invoice_id.trim().is_empty() {
                return Err(ValidationError::EmptyInvoiceId.into());
            }
            let mut next = draft.clone();
            next.status = DraftStatus::Finalized;
            next.finalized_at = Some(now.clone());
            next.linked_invoice_id = Some(invoice_id.clone());
            Ok(Transition::append(next, VersionCause::Finalized { invoice_id }))
        }
        (DraftStatus::PendingApproval, Action::Reject { reason }) => {
            let reason = reason.trim();
            if reason.is_empty() {
                return Err(ValidationError::EmptyReason.into());
            }
            let mut next = draft.clone();
            next.status = DraftStatus::Rejected;
            next.rejected_at = Some(now.clone());
            next.rejected_by = Some(actor.id.clone());
            next.rejection_reason = Some(reason.to_string());
            Ok(Transition::append(next, VersionCause::Rejected))
        }
        (DraftStatus::Draft | DraftStatus::Rejected, Action::Delete) => Ok(Transition {
            next: draft.clone(),
            effects: vec![SideEffect::CascadeDelete],
        }),
        (DraftStatus::Draft, Action::Revert(target)) => {
            if target.version_number >= draft.version {
                return Err(ValidationError::RevertToHead {
                    version: target.version_number,
                }
                .into());
            }
            let mut next = draft.clone();
            next.payload = target.payload;
            next.status = DraftStatus::Draft;
            Ok(Transition::append(
                next,
                VersionCause::Reverted {
                    from: target.version_number,
                },
            ))
        }
        (_, action) => Err(invalid(&action)),
    }
}
