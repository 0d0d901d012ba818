//! Backing store boundary for drafts and their version ledgers.
//!
//! The gateway is the only writer. Every write is conditional on the version
//! the caller loaded, so a stale writer gets [`StoreError::Conflict`] instead
//! of overwriting a newer draft.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::draft::Draft;
use crate::error::StoreError;
use crate::ledger::{VersionEntry, VersionLedger};

#[async_trait]
pub trait DraftRepository: Send + Sync {
    /// Monotonic sequence used for human readable draft numbers.
    async fn next_sequence(&self) -> Result<u64, StoreError>;

    /// Store a brand new draft together with its first version entry.
    async fn insert(&self, draft: &Draft, entry: &VersionEntry) -> Result<(), StoreError>;

    async fn load(&self, draft_id: &str) -> Result<Option<Draft>, StoreError>;

    async fn list(&self) -> Result<Vec<Draft>, StoreError>;

    /// Replace the draft and append `entry`, provided the stored draft is still
    /// at `expected_version`. Both land or neither does.
    async fn commit(
        &self,
        draft: &Draft,
        entry: &VersionEntry,
        expected_version: u64,
    ) -> Result<(), StoreError>;

    /// Delete the draft and its whole ledger, provided it is still at `expected_version`.
    async fn remove(&self, draft_id: &str, expected_version: u64) -> Result<(), StoreError>;

    async fn ledger(&self, draft_id: &str) -> Result<Option<VersionLedger>, StoreError>;

    async fn version(
        &self,
        draft_id: &str,
        version_number: u64,
    ) -> Result<Option<VersionEntry>, StoreError>;
}

/// Checks shared by every store before a commit is applied.
pub(crate) fn check_commit(
    stored: Option<u64>,
    draft: &Draft,
    entry: &VersionEntry,
    expected_version: u64,
) -> Result<(), StoreError> {
    if stored != Some(expected_version) {
        return Err(StoreError::Conflict {
            draft_id: draft.id.clone(),
            expected: expected_version,
            found: stored,
        });
    }
    if draft.version != expected_version + 1
        || entry.version_number != draft.version
        || entry.draft_id != draft.id
    {
        return Err(StoreError::Conflict {
            draft_id: draft.id.clone(),
            expected: expected_version + 1,
            found: Some(entry.version_number),
        });
    }
    Ok(())
}

struct Record {
    draft: Draft,
    ledger: VersionLedger,
}

/// Process-local store, for tests and embedding.
pub struct InMemoryDraftStore {
    records: RwLock<HashMap<String, Record>>,
    sequence: AtomicU64,
}

impl InMemoryDraftStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for InMemoryDraftStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DraftRepository for InMemoryDraftStore {
    async fn next_sequence(&self) -> Result<u64, StoreError> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn insert(&self, draft: &Draft, entry: &VersionEntry) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&draft.id) {
            return Err(StoreError::Duplicate(draft.id.clone()));
        }
        let mut ledger = VersionLedger::new(draft.id.clone());
        ledger.append(entry.clone())?;
        records.insert(
            draft.id.clone(),
            Record {
                draft: draft.clone(),
                ledger,
            },
        );
        Ok(())
    }

    async fn load(&self, draft_id: &str) -> Result<Option<Draft>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(draft_id).map(|r| r.draft.clone()))
    }

    async fn list(&self) -> Result<Vec<Draft>, StoreError> {
        let records = self.records.read().await;
        Ok(records.values().map(|r| r.draft.clone()).collect())
    }

    async fn commit(
        &self,
        draft: &Draft,
        entry: &VersionEntry,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let stored = records.get(&draft.id).map(|r| r.draft.version);
        check_commit(stored, draft, entry, expected_version)?;

        let Some(record) = records.get_mut(&draft.id) else {
            return Err(StoreError::Conflict {
                draft_id: draft.id.clone(),
                expected: expected_version,
                found: None,
            });
        };
        record.ledger.append(entry.clone())?;
        record.draft = draft.clone();
        Ok(())
    }

    async fn remove(&self, draft_id: &str, expected_version: u64) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let stored = records.get(draft_id).map(|r| r.draft.version);
        if stored != Some(expected_version) {
            return Err(StoreError::Conflict {
                draft_id: draft_id.to_string(),
                expected: expected_version,
                found: stored,
            });
        }
        records.remove(draft_id);
        Ok(())
    }

    async fn ledger(&self, draft_id: &str) -> Result<Option<VersionLedger>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(draft_id).map(|r| r.ledger.clone()))
    }

    async fn version(
        &self,
        draft_id: &str,
        version_number: u64,
    ) -> Result<Option<VersionEntry>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(draft_id)
            .and_then(|r| r.ledger.get(version_number).cloned()))
    }
}
