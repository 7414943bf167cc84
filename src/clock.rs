//! Coarse second-resolution clock shared by tracker timing.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Returns the current coarse time in whole seconds.
///
/// Anchored at the wall clock observed on first use and advanced by a
/// monotonic timer, so stored timestamps compare like epoch seconds but
/// never move backwards within the process.
pub fn coarse_seconds() -> u32 {
    static BASE: OnceLock<(Instant, u64)> = OnceLock::new();

    let (started, epoch) = BASE.get_or_init(|| {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        (Instant::now(), epoch)
    });

    (epoch + started.elapsed().as_secs()) as u32
}
