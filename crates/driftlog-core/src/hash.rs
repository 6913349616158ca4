//! Content addressing for stored blocks.
//!
//! - The full BLAKE3 hash (64 hex chars) is used as the address.
//! - Address format: `blake3:<lowercase hex>`.
//! - Addresses compare lexicographically as plain strings, which is what the
//!   hash-based tie-break relies on.

use crate::error::{Error, Result};

/// Prefix shared by every content address.
pub const HASH_PREFIX: &str = "blake3:";

/// Compute the content address of a byte block.
#[must_use]
pub fn content_address(bytes: &[u8]) -> String {
    format!("{HASH_PREFIX}{}", blake3::hash(bytes).to_hex())
}

/// Verify that `stored` is the content address of `bytes`.
///
/// # Errors
///
/// Returns [`Error::HashMismatch`] when the addresses differ.
pub fn verify_content_address(stored: &str, bytes: &[u8]) -> Result<()> {
    let computed = content_address(bytes);
    if computed == stored {
        Ok(())
    } else {
        Err(Error::HashMismatch {
            stored: stored.to_owned(),
            computed,
        })
    }
}

/// Short form of an address for log lines.
#[must_use]
pub fn short(hash: &str) -> &str {
    let hex = hash.strip_prefix(HASH_PREFIX).unwrap_or(hash);
    hex.get(..12).unwrap_or(hex)
}
