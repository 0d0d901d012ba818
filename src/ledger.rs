//! Append-only version history of a draft
use std::collections::BTreeMap;

use chrono::Utc;

use super::draft::{Actor, Draft, DraftPayload, DraftStatus, TimeStamp};
use super::error::{DraftError, Missing, StoreError};
use super::utils::payload_digest;

/// What produced a version entry.
#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub enum VersionCause {
    #[n(0)]
    Created,
    #[n(1)]
    Edited,
    #[n(2)]
    Submitted,
    #[n(3)]
    Approved,
    #[n(4)]
    Rejected,
    #[n(5)]
    Finalized {
        #[n(0)]
        invoice_id: String,
    },
    #[n(6)]
    Reverted {
        #[n(0)]
        from: u64, // the version whose payload was restored
    },
    #[n(7)]
    Converted {
        #[n(0)]
        invoice_id: String,
    },
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct VersionEntry {
    #[n(0)]
    pub draft_id: String,
    #[n(1)]
    pub version_number: u64,
    #[n(2)]
    pub status: DraftStatus,
    #[n(3)]
    pub payload: DraftPayload,
    #[n(4)]
    pub digest: String, // sha256 of the cbor payload
    #[n(5)]
    pub cause: VersionCause,
    #[n(6)]
    pub captured_by: String,
    #[n(7)]
    pub captured_at: TimeStamp<Utc>,
}

impl VersionEntry {
    /// Snapshot the draft exactly as it is now.
    pub fn capture(draft: &Draft, cause: VersionCause, actor: &Actor) -> Result<Self, StoreError> {
        Ok(Self {
            draft_id: draft.id.clone(),
            version_number: draft.version,
            status: draft.status,
            payload: draft.payload.clone(),
            digest: payload_digest(&draft.payload)?,
            cause,
            captured_by: actor.id.clone(),
            captured_at: draft.updated_at.clone(),
        })
    }

    pub fn summary(&self) -> VersionSummary {
        VersionSummary {
            version_number: self.version_number,
            status: self.status,
            cause: self.cause.clone(),
            digest: self.digest.clone(),
            captured_by: self.captured_by.clone(),
            captured_at: self.captured_at.clone(),
        }
    }
}

/// Bump the draft to its next version and snapshot it.
pub fn record(
    draft: &mut Draft,
    cause: VersionCause,
    actor: &Actor,
    now: TimeStamp<Utc>,
) -> Result<VersionEntry, StoreError> {
    draft.version += 1;
    draft.updated_at = now;
    VersionEntry::capture(draft, cause, actor)
}

/// Listing row for a version, without the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSummary {
    pub version_number: u64,
    pub status: DraftStatus,
    pub cause: VersionCause,
    pub digest: String,
    pub captured_by: String,
    pub captured_at: TimeStamp<Utc>,
}

/// All entries of one draft, ascending by version number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionLedger {
    draft_id: String,
    entries: Vec<VersionEntry>,
}

impl VersionLedger {
    pub fn new(draft_id: impl Into<String>) -> Self {
        Self {
            draft_id: draft_id.into(),
            entries: vec![],
        }
    }

    pub fn from_entries(draft_id: impl Into<String>, mut entries: Vec<VersionEntry>) -> Self {
        entries.sort_by_key(|e| e.version_number);
        Self {
            draft_id: draft_id.into(),
            entries,
        }
    }

    pub fn draft_id(&self) -> &str {
        &self.draft_id
    }

    /// Entries must arrive in order: the next one is always `len + 1`.
    pub fn append(&mut self, entry: VersionEntry) -> Result<(), StoreError> {
        let expected = self.entries.len() as u64 + 1;
        if entry.version_number != expected || entry.draft_id != self.draft_id {
            return Err(StoreError::Conflict {
                draft_id: entry.draft_id,
                expected,
                found: Some(entry.version_number),
            });
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn get(&self, version_number: u64) -> Option<&VersionEntry> {
        let index = usize::try_from(version_number.checked_sub(1)?).ok()?;
        self.entries.get(index)
    }

    pub fn list(&self) -> &[VersionEntry] {
        &self.entries
    }

    pub fn head(&self) -> Option<&VersionEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summaries(&self) -> Vec<VersionSummary> {
        self.entries.iter().map(VersionEntry::summary).collect()
    }

    pub fn diff(&self, v1: u64, v2: u64) -> Result<VersionDiff, DraftError> {
        let before = self.require(v1)?;
        let after = self.require(v2)?;
        Ok(VersionDiff::between(before, after))
    }

    fn require(&self, version: u64) -> Result<&VersionEntry, DraftError> {
        self.get(version).ok_or_else(|| {
            DraftError::NotFound(Missing::Version {
                draft_id: self.draft_id.clone(),
                version,
            })
        })
    }

    /// `version == count(entries)` and the head snapshot mirrors the draft.
    pub fn consistent_with(&self, draft: &Draft) -> bool {
        match self.head() {
            Some(head) => {
                draft.version == self.entries.len() as u64
                    && head.version_number == draft.version
                    && head.status == draft.status
                    && head.payload == draft.payload
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: String,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// Field-level difference between two snapshots of the same draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDiff {
    pub draft_id: String,
    pub from_version: u64,
    pub to_version: u64,
    pub changes: Vec<FieldChange>,
}

impl VersionDiff {
    pub fn between(before: &VersionEntry, after: &VersionEntry) -> Self {
        let mut old = BTreeMap::new();
        let mut new = BTreeMap::new();
        old.insert("status".to_string(), before.status.to_string());
        new.insert("status".to_string(), after.status.to_string());
        // identical digests mean identical payloads
        if before.digest != after.digest {
            flatten_payload(&before.payload, &mut old);
            flatten_payload(&after.payload, &mut new);
        }

        let mut fields: Vec<&String> = old.keys().chain(new.keys()).collect();
        fields.sort();
        fields.dedup();

        let changes = fields
            .into_iter()
            .filter_map(|field| {
                let b = old.get(field);
                let a = new.get(field);
                (b != a).then(|| FieldChange {
                    field: field.clone(),
                    before: b.cloned(),
                    after: a.cloned(),
                })
            })
            .collect();

        Self {
            draft_id: after.draft_id.clone(),
            from_version: before.version_number,
            to_version: after.version_number,
            changes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn payload_changes(&self) -> impl Iterator<Item = &FieldChange> {
        self.changes.iter().filter(|c| c.field != "status")
    }

    pub fn status_change(&self) -> Option<&FieldChange> {
        self.changes.iter().find(|c| c.field == "status")
    }
}

fn flatten_payload(payload: &DraftPayload, out: &mut BTreeMap<String, String>) {
    let mut put = |field: &str, value: Option<String>| {
        if let Some(value) = value {
            out.insert(field.to_string(), value);
        }
    };

    put("customer", payload.customer.as_ref().map(ToString::to_string));
    put("business", payload.business.as_ref().map(ToString::to_string));
    for (i, item) in payload.line_items.iter().enumerate() {
        put(&format!("line_items[{i}]"), Some(item.to_string()));
        if item.tax_rate_bps != 0 {
            put(
                &format!("line_items[{i}].tax_rate_bps"),
                Some(item.tax_rate_bps.to_string()),
            );
        }
    }
    if let Some(totals) = &payload.totals {
        put("totals.subtotal", Some(totals.subtotal.to_string()));
        put("totals.tax_amount", Some(totals.tax_amount.to_string()));
        put(
            "totals.discount_amount",
            Some(totals.discount_amount.to_string()),
        );
        put("totals.total_amount", Some(totals.total_amount.to_string()));
    }
    put("notes", payload.notes.clone());
    put("due_date", payload.due_date.as_ref().map(ToString::to_string));
    put("shipping_address", payload.shipping_address.clone());
    put("source_sale_id", payload.source_sale_id.clone());
    put("source_invoice_id", payload.source_invoice_id.clone());
}
