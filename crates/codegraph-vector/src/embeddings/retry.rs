//! Shared retry/backoff helper for HTTP embedding providers.

use std::time::{SystemTime, UNIX_EPOCH};

/// A cheap, dependency-free jitter source bounded in `[0, bound_ms)`. Not
/// cryptographically random — retry jitter only needs to desynchronize
/// concurrent callers, not resist prediction.
pub fn jitter_ms(bound_ms: u64) -> u64 {
    if bound_ms == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos as u64) % bound_ms
}
