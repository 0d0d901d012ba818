//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use draft_lifecycle::draft::{Actor, DraftPayload, PartyRef};
use draft_lifecycle::invoice::SimulatedInvoiceService;
use draft_lifecycle::sled_store::SledDraftStore;
use draft_lifecycle::store::InMemoryDraftStore;
use draft_lifecycle::{GatewayConfig, WorkflowGateway};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Opt-in log output: `RUST_LOG=draft_lifecycle=debug cargo test`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn clerk() -> Actor {
    Actor::new("user_clerk").with_role("sales")
}

pub fn manager() -> Actor {
    Actor::new("user_manager").with_role("approver")
}

/// `{customer: "Acme", totalAmount: 100}`
pub fn acme() -> DraftPayload {
    DraftPayload::new()
        .set_customer(PartyRef::new("cust_acme", "Acme"))
        .set_total_amount(100)
}

pub fn memory_gateway() -> (WorkflowGateway, Arc<SimulatedInvoiceService>) {
    init_tracing();
    let invoices = Arc::new(SimulatedInvoiceService::new());
    let gateway = WorkflowGateway::new(
        Arc::new(InMemoryDraftStore::new()),
        invoices.clone(),
        GatewayConfig::default(),
    )
    .expect("default config is valid");
    (gateway, invoices)
}

// Sled takes a file lock per database, so each test gets its own db under a
// temp dir. Keep the TempDir alive for as long as the gateway is used.
pub fn sled_gateway() -> anyhow::Result<(WorkflowGateway, Arc<SimulatedInvoiceService>, TempDir)> {
    init_tracing();
    let temp_dir = tempfile::tempdir()?;
    let db = sled::open(temp_dir.path().join("drafts.db"))?;
    let store = SledDraftStore::new(Arc::new(db))?;
    let invoices = Arc::new(SimulatedInvoiceService::new());
    let gateway = WorkflowGateway::new(Arc::new(store), invoices.clone(), GatewayConfig::default())?;
    Ok((gateway, invoices, temp_dir))
}
