// K-sortable identifiers backed by svix-ksuid.
// 27 base62 characters; lexicographic order matches creation order at one-second resolution.


pub use svix_ksuid::{Ksuid, KsuidLike};

use crate::{Result, StoreError};

pub const ENCODED_LEN: usize = 27;

/// A fresh KSUID string
#[inline]
pub fn ksuid() -> String {
    Ksuid::new(None, None).to_string()
}

/// `"{prefix}_{ksuid}"`, e.g. `doc_2NrWq...`
#[inline]
pub fn prefixed_id(prefix: &str) -> String {
    format!("{}_{}", prefix, ksuid())
}

/// Decode the creation timestamp (Unix seconds) of a possibly prefixed identifier
#[inline]
pub fn ksuid_timestamp(id: &str) -> Result<i64> {
    let raw = id.rsplit_once('_').map_or(id, |(_, raw)| raw);
    if raw.len() != ENCODED_LEN {
        return Err(StoreError::InvalidArgument(format!(
            "KSUID must be {} characters, got {}",
            ENCODED_LEN,
            raw.len()
        )));
    }

    let parsed = Ksuid::from_base62(raw)
        .map_err(|e| StoreError::InvalidArgument(format!("Invalid KSUID '{raw}': {e}")))?;
    Ok(parsed.timestamp_seconds())
}
