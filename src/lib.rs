//! Invoice draft lifecycle engine.
//!
//! A draft moves `DRAFT -> PENDING_APPROVAL -> APPROVED -> FINALIZED` (or out to
//! `REJECTED` and back through an edit). Every committed change appends an
//! immutable snapshot to the draft's version ledger, which can be listed,
//! compared and reverted to.
//!
//! [`state_machine::transition`] is pure. All I/O goes through
//! [`gateway::WorkflowGateway`], which serialises writers per draft and persists
//! through a [`store::DraftRepository`].

pub mod config;
pub mod draft;
pub mod error;
pub mod events;
pub mod gateway;
pub mod invoice;
pub mod ledger;
pub mod query;
pub mod sled_store;
pub mod state_machine;
pub mod store;
pub mod utils;

pub use config::GatewayConfig;
pub use draft::{Actor, Draft, DraftPatch, DraftPayload, DraftStatus};
pub use error::{DraftError, Missing, StoreError, ValidationError};
pub use gateway::WorkflowGateway;
