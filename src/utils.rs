//! Identifier generation and content hashing

use bech32::Bech32m;
use uuid7::uuid7;

use crate::draft::DraftPayload;
use crate::error::{DraftError, StoreError};

// construct a unique, time-ordered id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> Result<String, DraftError> {
    let hrp = bech32::Hrp::parse(hrp)
        .map_err(|e| DraftError::Config(format!("invalid id prefix '{hrp}': {e}")))?;
    bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .map_err(|e| DraftError::Config(format!("failed to encode id: {e}")))
}

/// Render a store sequence number as a human readable draft number.
pub fn format_draft_number(prefix: &str, sequence: u64) -> String {
    format!("{prefix}-{sequence:06}")
}

/// CBOR encode a record, mapping the encoder error into the store taxonomy.
pub fn to_cbor<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, StoreError> {
    minicbor::to_vec(value).map_err(|e| StoreError::Encode(e.to_string()))
}

/// sha256 over the CBOR form of a payload. Equal payloads give equal digests.
pub fn payload_digest(payload: &DraftPayload) -> Result<String, StoreError> {
    let cbor = to_cbor(payload)?;
    Ok(sha256::digest(&cbor))
}
