//! Invoice creation service boundary and a simulated implementation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::draft::{Draft, DraftPayload};
use crate::error::InvoiceError;

/// What the finalize sub-step sends to the invoice service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceRequest {
    pub draft_id: String,
    pub draft_number: String,
    /// `{draft_id}@v{n}` where `n` is the version holding the approval, so
    /// the first attempt and every retry of one approval share a key.
    pub idempotency_key: String,
    pub payload: DraftPayload,
}

impl InvoiceRequest {
    /// Request for the approval recorded, or about to be recorded, as
    /// `approval_version` of `draft`.
    pub fn for_approval(draft: &Draft, approval_version: u64) -> Self {
        Self {
            draft_id: draft.id.clone(),
            draft_number: draft.draft_number.clone(),
            idempotency_key: format!("{}@v{}", draft.id, approval_version),
            payload: draft.payload.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceOutcome {
    Finalized { invoice_id: String },
    /// Accepted but not issued yet; the draft stays APPROVED.
    PendingInvoice,
}

/// An existing invoice, as needed to convert it back into a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceRecord {
    pub id: String,
    pub payload: DraftPayload,
}

#[async_trait]
pub trait InvoiceService: Send + Sync {
    async fn create_invoice(&self, request: &InvoiceRequest)
    -> Result<InvoiceOutcome, InvoiceError>;

    async fn fetch_invoice(&self, invoice_id: &str) -> Result<Option<InvoiceRecord>, InvoiceError>;
}

#[derive(Default)]
struct Ledger {
    invoices: HashMap<String, InvoiceRecord>,
    by_key: HashMap<String, String>,
    issued: u64,
    keys_seen: Vec<String>,
    fail_next: usize,
    defer_next: usize,
}

/// In-process invoice service for tests and local runs.
///
/// Issues ids `INV-1`, `INV-2`, ... and can be told to fail or defer the next
/// few requests.
#[derive(Default)]
pub struct SimulatedInvoiceService {
    state: Mutex<Ledger>,
}

impl SimulatedInvoiceService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, Ledger> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` create calls fail with `Unavailable`.
    pub fn fail_next(&self, count: usize) {
        self.state().fail_next = count;
    }

    /// Make the next `count` create calls answer `PendingInvoice`.
    pub fn defer_next(&self, count: usize) {
        self.state().defer_next = count;
    }

    /// Register an invoice that was issued outside the engine.
    pub fn seed_invoice(&self, record: InvoiceRecord) {
        self.state().invoices.insert(record.id.clone(), record);
    }

    pub fn issued_count(&self) -> u64 {
        self.state().issued
    }

    /// Idempotency keys of every create call received, in order.
    pub fn keys_seen(&self) -> Vec<String> {
        self.state().keys_seen.clone()
    }
}

#[async_trait]
impl InvoiceService for SimulatedInvoiceService {
    async fn create_invoice(
        &self,
        request: &InvoiceRequest,
    ) -> Result<InvoiceOutcome, InvoiceError> {
        let mut state = self.state();
        state.keys_seen.push(request.idempotency_key.clone());
        if let Some(invoice_id) = state.by_key.get(&request.idempotency_key) {
            return Ok(InvoiceOutcome::Finalized {
                invoice_id: invoice_id.clone(),
            });
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(InvoiceError::Unavailable("simulated outage".into()));
        }
        if state.defer_next > 0 {
            state.defer_next -= 1;
            return Ok(InvoiceOutcome::PendingInvoice);
        }

        state.issued += 1;
        let invoice_id = format!("INV-{}", state.issued);
        state
            .by_key
            .insert(request.idempotency_key.clone(), invoice_id.clone());
        state.invoices.insert(
            invoice_id.clone(),
            InvoiceRecord {
                id: invoice_id.clone(),
                payload: request.payload.clone(),
            },
        );
        Ok(InvoiceOutcome::Finalized { invoice_id })
    }

    async fn fetch_invoice(&self, invoice_id: &str) -> Result<Option<InvoiceRecord>, InvoiceError> {
        Ok(self.state().invoices.get(invoice_id).cloned())
    }
}
