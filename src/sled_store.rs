//! Durable [`DraftRepository`] backed by sled.
//!
//! Layout: tree `drafts` maps draft id to the CBOR draft; tree `versions` maps
//! `{draft_id}/{version:020}` to the CBOR version entry, so a prefix scan
//! returns a ledger in ascending order. Every write runs as one transaction
//! across both trees.

use std::sync::Arc;

use async_trait::async_trait;
use sled::transaction::{
    ConflictableTransactionResult, TransactionError, Transactional, abort,
};
use tracing::debug;

use crate::draft::Draft;
use crate::error::StoreError;
use crate::ledger::{VersionEntry, VersionLedger};
use crate::store::{DraftRepository, check_commit};
use crate::utils::to_cbor;

pub struct SledDraftStore {
    instance: Arc<sled::Db>,
    drafts: sled::Tree,
    versions: sled::Tree,
}

impl SledDraftStore {
    pub fn new(instance: Arc<sled::Db>) -> Result<Self, StoreError> {
        let drafts = instance.open_tree("drafts")?;
        let versions = instance.open_tree("versions")?;
        Ok(Self {
            instance,
            drafts,
            versions,
        })
    }

    /// Flush dirty pages to disk.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.instance.flush_async().await?;
        Ok(())
    }
}

fn version_key(draft_id: &str, version_number: u64) -> String {
    format!("{draft_id}/{version_number:020}")
}

fn decode_draft(bytes: &[u8]) -> Result<Draft, StoreError> {
    Ok(minicbor::decode(bytes)?)
}

fn decode_entry(bytes: &[u8]) -> Result<VersionEntry, StoreError> {
    Ok(minicbor::decode(bytes)?)
}

fn flatten(err: TransactionError<StoreError>) -> StoreError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StoreError::Backend(e),
    }
}

#[async_trait]
impl DraftRepository for SledDraftStore {
    async fn next_sequence(&self) -> Result<u64, StoreError> {
        // generate_id starts at 0
        Ok(self.instance.generate_id()? + 1)
    }

    async fn insert(&self, draft: &Draft, entry: &VersionEntry) -> Result<(), StoreError> {
        let draft_cbor = to_cbor(draft)?;
        let entry_cbor = to_cbor(entry)?;
        let entry_key = version_key(&draft.id, entry.version_number);

        (&self.drafts, &self.versions)
            .transaction(
                |(drafts, versions)| -> ConflictableTransactionResult<(), StoreError> {
                    if drafts.get(draft.id.as_bytes())?.is_some() {
                        return abort(StoreError::Duplicate(draft.id.clone()));
                    }
                    drafts.insert(draft.id.as_bytes(), draft_cbor.as_slice())?;
                    versions.insert(entry_key.as_bytes(), entry_cbor.as_slice())?;
                    Ok(())
                },
            )
            .map_err(flatten)?;

        debug!(draft_id = %draft.id, "inserted draft");
        Ok(())
    }

    async fn load(&self, draft_id: &str) -> Result<Option<Draft>, StoreError> {
        self.drafts
            .get(draft_id.as_bytes())?
            .map(|bytes| decode_draft(&bytes))
            .transpose()
    }

    async fn list(&self) -> Result<Vec<Draft>, StoreError> {
        // full scans block, keep them off the async workers
        let drafts = self.drafts.clone();
        tokio::task::spawn_blocking(move || {
            drafts
                .iter()
                .map(|item| {
                    let (_, bytes) = item?;
                    decode_draft(&bytes)
                })
                .collect::<Result<Vec<_>, StoreError>>()
        })
        .await?
    }

    async fn commit(
        &self,
        draft: &Draft,
        entry: &VersionEntry,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let draft_cbor = to_cbor(draft)?;
        let entry_cbor = to_cbor(entry)?;
        let entry_key = version_key(&draft.id, entry.version_number);

        (&self.drafts, &self.versions)
            .transaction(
                |(drafts, versions)| -> ConflictableTransactionResult<(), StoreError> {
                    let stored = match drafts.get(draft.id.as_bytes())? {
                        Some(bytes) => match decode_draft(&bytes) {
                            Ok(current) => Some(current.version),
                            Err(e) => return abort(e),
                        },
                        None => None,
                    };
                    if let Err(e) = check_commit(stored, draft, entry, expected_version) {
                        return abort(e);
                    }
                    drafts.insert(draft.id.as_bytes(), draft_cbor.as_slice())?;
                    versions.insert(entry_key.as_bytes(), entry_cbor.as_slice())?;
                    Ok(())
                },
            )
            .map_err(flatten)?;

        debug!(draft_id = %draft.id, version = draft.version, "committed draft");
        Ok(())
    }

    async fn remove(&self, draft_id: &str, expected_version: u64) -> Result<(), StoreError> {
        (&self.drafts, &self.versions)
            .transaction(
                |(drafts, versions)| -> ConflictableTransactionResult<(), StoreError> {
                    let stored = match drafts.get(draft_id.as_bytes())? {
                        Some(bytes) => match decode_draft(&bytes) {
                            Ok(current) => Some(current.version),
                            Err(e) => return abort(e),
                        },
                        None => None,
                    };
                    if stored != Some(expected_version) {
                        return abort(StoreError::Conflict {
                            draft_id: draft_id.to_string(),
                            expected: expected_version,
                            found: stored,
                        });
                    }
                    drafts.remove(draft_id.as_bytes())?;
                    for version_number in 1..=expected_version {
                        versions.remove(version_key(draft_id, version_number).as_bytes())?;
                    }
                    Ok(())
                },
            )
            .map_err(flatten)?;

        debug!(draft_id, "removed draft and ledger");
        Ok(())
    }

    async fn ledger(&self, draft_id: &str) -> Result<Option<VersionLedger>, StoreError> {
        let versions = self.versions.clone();
        let prefix = format!("{draft_id}/");
        let entries = tokio::task::spawn_blocking(move || {
            versions
                .scan_prefix(prefix)
                .map(|item| {
                    let (_, bytes) = item?;
                    decode_entry(&bytes)
                })
                .collect::<Result<Vec<_>, StoreError>>()
        })
        .await??;

        if entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(VersionLedger::from_entries(draft_id, entries)))
    }

    async fn version(
        &self,
        draft_id: &str,
        version_number: u64,
    ) -> Result<Option<VersionEntry>, StoreError> {
        self.versions
            .get(version_key(draft_id, version_number).as_bytes())?
            .map(|bytes| decode_entry(&bytes))
            .transpose()
    }
}
