//! Decides whether a cached export still reflects its source.

use std::time::{SystemTime, UNIX_EPOCH};

/// Filesystems disagree on timestamp precision; differences below this are ignored.
pub const TIMESTAMP_TOLERANCE_MS: i64 = 1000;

/// Returns `true` when the cached export must be regenerated.
///
/// A missing cached timestamp means there is no usable export. An unknown source
/// timestamp always forces regeneration.
pub fn is_stale(source_modified: Option<SystemTime>, cached_modified: Option<SystemTime>) -> bool {
    match (source_modified, cached_modified) {
        (Some(source), Some(cached)) => {
            is_stale_millis(epoch_millis(source), Some(epoch_millis(cached)))
        }
        _ => true,
    }
}

/// Millisecond form of [`is_stale`].
///
/// A negative difference beyond the tolerance also counts as stale: the clock may have
/// been moved backwards after the export was written.
pub fn is_stale_millis(source_ms: i64, cached_ms: Option<i64>) -> bool {
    let Some(cached_ms) = cached_ms else {
        return true;
    };
    let diff = source_ms.saturating_sub(cached_ms);
    diff >= TIMESTAMP_TOLERANCE_MS || diff <= -TIMESTAMP_TOLERANCE_MS
}

/// Milliseconds since the Unix epoch, negative for earlier instants.
pub fn epoch_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_millis())
            .map(|ms| -ms)
            .unwrap_or(i64::MIN),
    }
}
