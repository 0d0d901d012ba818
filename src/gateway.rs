//! Workflow gateway: the only component that performs I/O.
//!
//! Every mutating call takes the draft's lock, loads the current draft, runs
//! it through [`transition`], carries out the side effects and commits the
//! result with a single conditional store write. Events go out only after the
//! commit succeeds.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast};
use tracing::{info, instrument, warn};

use crate::config::GatewayConfig;
use crate::draft::{Actor, Draft, DraftPatch, DraftPayload, TimeStamp};
use crate::error::{DraftError, Missing};
use crate::events::{DraftEvent, DraftEventKind};
use crate::invoice::{InvoiceOutcome, InvoiceRequest, InvoiceService};
use crate::ledger::{VersionCause, VersionDiff, VersionEntry, VersionLedger, VersionSummary, record};
use crate::query::{DraftFilter, DraftSummary, Page, paginate};
use crate::state_machine::{Action, Transition, transition};
use crate::store::DraftRepository;
use crate::utils::{format_draft_number, new_uuid_to_bech32};

/// Optional overrides when turning an invoice back into a draft.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionOverrides {
    pub notes: Option<String>,
    pub due_date: Option<TimeStamp<Utc>>,
}

/// Exclusive access to one draft for the duration of a mutating call.
///
/// On drop the guard is released first, then the map entry is removed unless
/// another caller still holds or waits on the same mutex.
struct DraftLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    draft_id: String,
    mutex: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DraftLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // one reference in the map, one here
        self.locks.remove_if(&self.draft_id, |_, lock| {
            Arc::ptr_eq(lock, &self.mutex) && Arc::strong_count(lock) == 2
        });
    }
}

pub struct WorkflowGateway {
    store: Arc<dyn DraftRepository>,
    invoices: Arc<dyn InvoiceService>,
    config: GatewayConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
    events: broadcast::Sender<DraftEvent>,
}

impl WorkflowGateway {
    pub fn new(
        store: Arc<dyn DraftRepository>,
        invoices: Arc<dyn InvoiceService>,
        config: GatewayConfig,
    ) -> Result<Self, DraftError> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        Ok(Self {
            store,
            invoices,
            config,
            locks: DashMap::new(),
            events,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Receive every event committed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<DraftEvent> {
        self.events.subscribe()
    }

    /// Wait for exclusive access to `draft_id`. Released when the returned
    /// guard drops, including when the calling future is cancelled.
    async fn lock(&self, draft_id: &str) -> DraftLock<'_> {
        let mutex = self
            .locks
            .entry(draft_id.to_string())
            .or_default()
            .value()
            .clone();
        let mut held = DraftLock {
            locks: &self.locks,
            draft_id: draft_id.to_string(),
            mutex,
            guard: None,
        };
        held.guard = Some(held.mutex.clone().lock_owned().await);
        held
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    fn emit(&self, draft: &Draft, actor: &Actor, kind: DraftEventKind) {
        self.emit_at(draft, actor, kind, draft.updated_at.clone());
    }

    fn emit_at(&self, draft: &Draft, actor: &Actor, kind: DraftEventKind, at: TimeStamp<Utc>) {
        let event = DraftEvent {
            draft_id: draft.id.clone(),
            draft_number: draft.draft_number.clone(),
            version: draft.version,
            status: draft.status,
            actor_id: actor.id.clone(),
            at,
            kind,
        };
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    async fn load(&self, draft_id: &str) -> Result<Draft, DraftError> {
        self.store
            .load(draft_id)
            .await?
            .ok_or_else(|| DraftError::NotFound(Missing::Draft(draft_id.to_string())))
    }

    async fn load_ledger(&self, draft_id: &str) -> Result<VersionLedger, DraftError> {
        self.store
            .ledger(draft_id)
            .await?
            .ok_or_else(|| DraftError::NotFound(Missing::Draft(draft_id.to_string())))
    }

    /// Record `next` as the version after `current` and persist both atomically.
    async fn commit(
        &self,
        current: &Draft,
        mut next: Draft,
        cause: VersionCause,
        actor: &Actor,
        now: TimeStamp<Utc>,
    ) -> Result<Draft, DraftError> {
        let entry = record(&mut next, cause, actor, now)?;
        if let Err(err) = self.store.commit(&next, &entry, current.version).await {
            warn!(draft_id = %current.id, version = current.version, %err, "commit refused");
            return Err(err.into());
        }
        info!(
            draft_id = %next.id,
            version = next.version,
            status = %next.status,
            "draft committed"
        );
        Ok(next)
    }

    /// Commit a transition that only appends a version (edit, submit, reject, revert).
    async fn commit_transition(
        &self,
        current: &Draft,
        outcome: Transition,
        actor: &Actor,
        now: TimeStamp<Utc>,
    ) -> Result<Draft, DraftError> {
        let cause = outcome
            .version_cause()
            .cloned()
            .unwrap_or(VersionCause::Edited);
        self.commit(current, outcome.next, cause, actor, now).await
    }

    async fn open_draft(
        &self,
        payload: DraftPayload,
        cause: VersionCause,
        actor: &Actor,
    ) -> Result<Draft, DraftError> {
        payload.validate()?;

        let id = new_uuid_to_bech32(&self.config.id_prefix)?;
        let sequence = self.store.next_sequence().await?;
        let draft_number = format_draft_number(&self.config.draft_number_prefix, sequence);
        let draft = Draft::open(id, draft_number, payload, actor, TimeStamp::new());
        let entry = VersionEntry::capture(&draft, cause, actor)?;
        self.store.insert(&draft, &entry).await?;

        info!(draft_id = %draft.id, draft_number = %draft.draft_number, "draft created");
        Ok(draft)
    }

    #[instrument(skip_all, fields(actor = %actor.id))]
    pub async fn create(&self, payload: DraftPayload, actor: &Actor) -> Result<Draft, DraftError> {
        let draft = self.open_draft(payload, VersionCause::Created, actor).await?;
        self.emit(&draft, actor, DraftEventKind::Created);
        Ok(draft)
    }

    /// Start a new draft from an existing invoice's contents.
    #[instrument(skip(self, overrides, actor), fields(actor = %actor.id))]
    pub async fn convert_from_invoice(
        &self,
        invoice_id: &str,
        overrides: ConversionOverrides,
        actor: &Actor,
    ) -> Result<Draft, DraftError> {
        let invoice = self
            .invoices
            .fetch_invoice(invoice_id)
            .await
            .map_err(|e| DraftError::DependencyFailure {
                draft_id: String::new(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| DraftError::NotFound(Missing::Invoice(invoice_id.to_string())))?;

        let mut payload = invoice.payload;
        payload.source_invoice_id = Some(invoice.id.clone());
        if let Some(notes) = overrides.notes {
            payload.notes = Some(notes);
        }
        if let Some(due_date) = overrides.due_date {
            payload.due_date = Some(due_date);
        }

        let cause = VersionCause::Converted {
            invoice_id: invoice.id.clone(),
        };
        let draft = self.open_draft(payload, cause, actor).await?;
        self.emit(
            &draft,
            actor,
            DraftEventKind::Converted {
                invoice_id: invoice.id,
            },
        );
        Ok(draft)
    }

    pub async fn get(&self, draft_id: &str) -> Result<Draft, DraftError> {
        self.load(draft_id).await
    }

    pub async fn list(&self, filter: &DraftFilter) -> Result<Page<DraftSummary>, DraftError> {
        let drafts = self.store.list().await?;
        Ok(paginate(
            drafts,
            filter,
            self.config.default_page_limit,
            self.config.max_page_limit,
        )?)
    }

    /// Apply `patch` on top of the latest version.
    pub async fn edit(
        &self,
        draft_id: &str,
        patch: DraftPatch,
        actor: &Actor,
    ) -> Result<Draft, DraftError> {
        self.edit_inner(draft_id, None, patch, actor).await
    }

    /// Apply `patch` only if the draft is still at `base_version`, the version
    /// the caller last saw. Otherwise fail with `VersionConflict`.
    pub async fn edit_from(
        &self,
        draft_id: &str,
        base_version: u64,
        patch: DraftPatch,
        actor: &Actor,
    ) -> Result<Draft, DraftError> {
        self.edit_inner(draft_id, Some(base_version), patch, actor)
            .await
    }

    #[instrument(skip(self, patch, actor), fields(actor = %actor.id))]
    async fn edit_inner(
        &self,
        draft_id: &str,
        base_version: Option<u64>,
        patch: DraftPatch,
        actor: &Actor,
    ) -> Result<Draft, DraftError> {
        let _lock = self.lock(draft_id).await;

        let current = self.load(draft_id).await?;
        if let Some(expected) = base_version {
            if expected != current.version {
                warn!(expected, found = current.version, "stale edit baseline");
                return Err(DraftError::VersionConflict {
                    draft_id: draft_id.to_string(),
                    expected,
                    found: current.version,
                });
            }
        }

        let now = TimeStamp::new();
        let outcome = transition(&current, Action::Edit(patch), actor, &now)?;
        let draft = self.commit_transition(&current, outcome, actor, now).await?;
        self.emit(&draft, actor, DraftEventKind::Edited);
        Ok(draft)
    }

    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn submit(&self, draft_id: &str, actor: &Actor) -> Result<Draft, DraftError> {
        let _lock = self.lock(draft_id).await;

        let current = self.load(draft_id).await?;
        let now = TimeStamp::new();
        let outcome = transition(&current, Action::Submit, actor, &now)?;
        let draft = self.commit_transition(&current, outcome, actor, now).await?;
        self.emit(&draft, actor, DraftEventKind::Submitted);
        Ok(draft)
    }

    /// Approve a pending draft and finalize it into an invoice.
    ///
    /// On success the draft is `FINALIZED` with one new version entry. If the
    /// invoice service fails the approval is still committed, the draft stays
    /// `APPROVED` and the call returns `DependencyFailure`; calling approve
    /// again only retries the invoice. A deferred invoice also leaves the
    /// draft `APPROVED`, returned as success.
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn approve(&self, draft_id: &str, actor: &Actor) -> Result<Draft, DraftError> {
        let _lock = self.lock(draft_id).await;

        let current = self.load(draft_id).await?;
        let now = TimeStamp::new();
        let approval = transition(&current, Action::Approve, actor, &now)?;
        let fresh = approval.version_cause().is_some();
        let approved = approval.next;

        // a fresh approval lands as the next version, a retry already sits at head
        let approval_version = if fresh {
            current.version + 1
        } else {
            current.version
        };
        let request = InvoiceRequest::for_approval(&approved, approval_version);
        let outcome = self.invoices.create_invoice(&request).await;

        match outcome {
            Ok(InvoiceOutcome::Finalized { invoice_id }) => {
                let finalize = transition(
                    &approved,
                    Action::Finalize {
                        invoice_id: invoice_id.clone(),
                    },
                    actor,
                    &now,
                )?;
                let draft = self
                    .commit(
                        &current,
                        finalize.next,
                        VersionCause::Finalized {
                            invoice_id: invoice_id.clone(),
                        },
                        actor,
                        now,
                    )
                    .await?;
                if fresh {
                    self.emit(&draft, actor, DraftEventKind::Approved);
                }
                self.emit(&draft, actor, DraftEventKind::Finalized { invoice_id });
                Ok(draft)
            }
            Ok(InvoiceOutcome::PendingInvoice) => {
                info!(draft_id, "invoice deferred, draft stays approved");
                if !fresh {
                    return Ok(current);
                }
                let draft = self
                    .commit(&current, approved, VersionCause::Approved, actor, now)
                    .await?;
                self.emit(&draft, actor, DraftEventKind::Approved);
                Ok(draft)
            }
            Err(err) => {
                warn!(draft_id, %err, "invoice creation failed");
                if fresh {
                    let draft = self
                        .commit(&current, approved, VersionCause::Approved, actor, now)
                        .await?;
                    self.emit(&draft, actor, DraftEventKind::Approved);
                }
                Err(DraftError::DependencyFailure {
                    draft_id: draft_id.to_string(),
                    reason: err.to_string(),
                })
            }
        }
    }

    #[instrument(skip(self, reason, actor), fields(actor = %actor.id))]
    pub async fn reject(
        &self,
        draft_id: &str,
        reason: &str,
        actor: &Actor,
    ) -> Result<Draft, DraftError> {
        let _lock = self.lock(draft_id).await;

        let current = self.load(draft_id).await?;
        let now = TimeStamp::new();
        let outcome = transition(
            &current,
            Action::Reject {
                reason: reason.to_string(),
            },
            actor,
            &now,
        )?;
        let draft = self.commit_transition(&current, outcome, actor, now).await?;
        let reason = draft.rejection_reason.clone().unwrap_or_default();
        self.emit(&draft, actor, DraftEventKind::Rejected { reason });
        Ok(draft)
    }

    /// Delete a `DRAFT` or `REJECTED` draft together with its version ledger.
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn delete(&self, draft_id: &str, actor: &Actor) -> Result<(), DraftError> {
        let _lock = self.lock(draft_id).await;

        let current = self.load(draft_id).await?;
        let now = TimeStamp::new();
        let outcome = transition(&current, Action::Delete, actor, &now)?;
        if outcome.destroys() {
            self.store.remove(draft_id, current.version).await?;
            info!(draft_id, "draft deleted");
            self.emit_at(&current, actor, DraftEventKind::Deleted, now);
        }
        Ok(())
    }

    pub async fn list_versions(&self, draft_id: &str) -> Result<Vec<VersionSummary>, DraftError> {
        Ok(self.load_ledger(draft_id).await?.summaries())
    }

    pub async fn get_version(
        &self,
        draft_id: &str,
        version_number: u64,
    ) -> Result<VersionEntry, DraftError> {
        self.store
            .version(draft_id, version_number)
            .await?
            .ok_or_else(|| {
                DraftError::NotFound(Missing::Version {
                    draft_id: draft_id.to_string(),
                    version: version_number,
                })
            })
    }

    /// Make the payload of `version_number` the new head. History is never
    /// rewritten: the restored payload is appended as a new version.
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn revert(
        &self,
        draft_id: &str,
        version_number: u64,
        actor: &Actor,
    ) -> Result<Draft, DraftError> {
        let _lock = self.lock(draft_id).await;

        let current = self.load(draft_id).await?;
        let target = self.get_version(draft_id, version_number).await?;
        let now = TimeStamp::new();
        let outcome = transition(&current, Action::Revert(target), actor, &now)?;
        let draft = self.commit_transition(&current, outcome, actor, now).await?;
        self.emit(
            &draft,
            actor,
            DraftEventKind::Reverted {
                from: version_number,
            },
        );
        Ok(draft)
    }

    pub async fn compare_versions(
        &self,
        draft_id: &str,
        v1: u64,
        v2: u64,
    ) -> Result<VersionDiff, DraftError> {
        self.load_ledger(draft_id).await?.diff(v1, v2)
    }
}
