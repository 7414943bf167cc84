//! DHT pseudo-tracker backend, contract level.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::tracker::types::Dispatch;

/// Reannounce cadence used while the DHT drives peer discovery.
pub(crate) const DHT_ANNOUNCE_INTERVAL: u32 = 20 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DhtState {
    Idle,
    Searching,
    Announcing,
}

/// Announce state for `dht://` trackers.
///
/// The search itself runs in an external DHT router; this backend holds
/// the variant's state machine and the shared DHT activity signal handed
/// out by the connection manager.
#[derive(Debug)]
pub(crate) struct DhtBackend {
    active: Arc<AtomicBool>,
    state: DhtState,
}

impl DhtBackend {
    pub(crate) fn new(active: Arc<AtomicBool>) -> Self {
        Self {
            active,
            state: DhtState::Idle,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Usable only while the DHT itself is active, regardless of the
    /// per-tracker enabled override.
    pub(crate) fn is_usable(&self) -> bool {
        self.is_active()
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.state != DhtState::Idle
    }

    pub(crate) fn start_announce(&mut self) -> Dispatch {
        if !self.is_active() {
            return Dispatch::Failed("DHT server not active".to_string());
        }

        self.state = DhtState::Searching;
        Dispatch::Started
    }

    /// The router located peers and moved on to announcing to them.
    pub(crate) fn begin_announcing(&mut self) {
        assert!(
            self.state == DhtState::Searching,
            "dht announce phase begun while not searching"
        );
        self.state = DhtState::Announcing;
    }

    pub(crate) fn close(&mut self) {
        self.state = DhtState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_flag(active: bool) -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(active))
    }

    #[test]
    fn test_search_lifecycle() {
        let mut backend = DhtBackend::new(active_flag(true));
        assert!(!backend.is_busy());

        assert_eq!(backend.start_announce(), Dispatch::Started);
        assert!(backend.is_busy());

        backend.begin_announcing();
        assert!(backend.is_busy());

        backend.close();
        assert!(!backend.is_busy());
    }

    #[test]
    fn test_announce_fails_while_dht_inactive() {
        let mut backend = DhtBackend::new(active_flag(false));

        let dispatch = backend.start_announce();
        assert!(matches!(dispatch, Dispatch::Failed(_)));
        assert!(!backend.is_busy());
    }

    #[test]
    fn test_activity_decides_usability() {
        let flag = active_flag(true);
        let backend = DhtBackend::new(Arc::clone(&flag));
        assert!(backend.is_usable());

        flag.store(false, Ordering::Relaxed);
        assert!(!backend.is_usable());
    }

    #[test]
    #[should_panic(expected = "not searching")]
    fn test_announce_phase_requires_search() {
        let mut backend = DhtBackend::new(active_flag(true));
        backend.begin_announcing();
    }
}
