//! Harvest window computation.

use chrono::{DateTime, Duration, Utc};

use crate::types::{HarvestWindow, RunCheckpoint};

/// Window for a run at `now`.
///
/// Starts at the earlier of the last committed window end and `now - length`,
/// so a missed schedule never leaves a gap. Overlap is resolved by dedup.
pub fn next_window(checkpoint: Option<&RunCheckpoint>, now: DateTime<Utc>, length: Duration) -> HarvestWindow {
    let default_start = now - length;
    let start = match checkpoint {
        Some(checkpoint) => checkpoint.last_window_end.min(default_start),
        None => default_start,
    };
    HarvestWindow::new(start, now)
}
