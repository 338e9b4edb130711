//! Local storage for upstream sessions and synced data.
//!
//! - `TokenStore`: one cached `SessionTokens` record per account, with TTL
//! - `DataCache`: per-account JSON snapshots of deliveries and rounds,
//!   considered stale once a daily sync has been missed

pub mod manager;
pub mod tokens;

pub use manager::{CachedData, DataCache};
pub use tokens::{FileTokenStore, MemoryTokenStore, TokenStore};

/// Encode an account id for use as a file or directory name.
pub(crate) fn file_safe(account_id: &str) -> String {
    let mut out = String::with_capacity(account_id.len());
    for b in account_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}
