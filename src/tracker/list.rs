//! Ordered, group-partitioned tracker collection and its selection policy.

use std::net::SocketAddr;
use std::ops::Range;
use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::clock;
use crate::config::AnnounceConfig;
use crate::net::connection::ConnectionManager;
use crate::tracker::tracker::Tracker;
use crate::tracker::types::{
    Dispatch, EnabledStatus, FLAG_EXTRA_TRACKER, TrackerEvent, TrackerId, TrackerVariant,
};
use crate::{Result, SpindriftError};

/// Callback invoked with freshly announced peers; returns how many were
/// new to the session.
pub type SuccessSlot = Box<dyn FnMut(&Tracker, &[SocketAddr]) -> u32>;
/// Callback invoked when an announce fails.
pub type FailedSlot = Box<dyn FnMut(&Tracker, &str)>;
/// Callback invoked when a scrape completes.
pub type ScrapeSuccessSlot = Box<dyn FnMut(&Tracker)>;
/// Callback invoked when a scrape fails.
pub type ScrapeFailedSlot = Box<dyn FnMut(&Tracker, &str)>;
/// Callback invoked when a tracker becomes effectively enabled or
/// disabled.
pub type EnabledSlot = Box<dyn FnMut(&Tracker)>;

/// Ordered collection of trackers, partitioned into preference groups.
///
/// The sequence is invariantly sorted by group: iteration visits group 0
/// entirely, then group 1, and so on. Not internally synchronised; all
/// operations assume the caller holds the global coordination lock.
pub struct TrackerList {
    trackers: Vec<Tracker>,
    next_id: u32,
    scrape_interval: u32,

    slot_success: Option<SuccessSlot>,
    slot_failed: Option<FailedSlot>,
    slot_scrape_success: Option<ScrapeSuccessSlot>,
    slot_scrape_failed: Option<ScrapeFailedSlot>,
    slot_tracker_enabled: Option<EnabledSlot>,
    slot_tracker_disabled: Option<EnabledSlot>,
}

impl TrackerList {
    /// Creates an empty list with the default announce configuration.
    pub fn new() -> Self {
        Self::with_config(&AnnounceConfig::default())
    }

    /// Creates an empty list with explicit announce tunables.
    pub fn with_config(config: &AnnounceConfig) -> Self {
        Self {
            trackers: Vec::new(),
            next_id: 0,
            scrape_interval: config.scrape_interval,
            slot_success: None,
            slot_failed: None,
            slot_scrape_success: None,
            slot_scrape_failed: None,
            slot_tracker_enabled: None,
            slot_tracker_disabled: None,
        }
    }

    /// Installs the announce-success callback.
    pub fn set_slot_success(
        &mut self,
        slot: impl FnMut(&Tracker, &[SocketAddr]) -> u32 + 'static,
    ) {
        self.slot_success = Some(Box::new(slot));
    }

    /// Installs the announce-failure callback.
    pub fn set_slot_failed(&mut self, slot: impl FnMut(&Tracker, &str) + 'static) {
        self.slot_failed = Some(Box::new(slot));
    }

    /// Installs the scrape-success callback.
    pub fn set_slot_scrape_success(&mut self, slot: impl FnMut(&Tracker) + 'static) {
        self.slot_scrape_success = Some(Box::new(slot));
    }

    /// Installs the scrape-failure callback.
    pub fn set_slot_scrape_failed(&mut self, slot: impl FnMut(&Tracker, &str) + 'static) {
        self.slot_scrape_failed = Some(Box::new(slot));
    }

    /// Installs the tracker-enabled callback.
    pub fn set_slot_tracker_enabled(&mut self, slot: impl FnMut(&Tracker) + 'static) {
        self.slot_tracker_enabled = Some(Box::new(slot));
    }

    /// Installs the tracker-disabled callback.
    pub fn set_slot_tracker_disabled(&mut self, slot: impl FnMut(&Tracker) + 'static) {
        self.slot_tracker_disabled = Some(Box::new(slot));
    }

    /// Number of trackers.
    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    /// Whether the list holds no trackers.
    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Iterates trackers in group order.
    pub fn iter(&self) -> std::slice::Iter<'_, Tracker> {
        self.trackers.iter()
    }

    /// Tracker at `position` in group order.
    pub fn get(&self, position: usize) -> Option<&Tracker> {
        self.trackers.get(position)
    }

    /// Tracker with the given id.
    pub fn tracker(&self, id: TrackerId) -> Option<&Tracker> {
        self.position(id).map(|position| &self.trackers[position])
    }

    /// Mutable tracker with the given id.
    ///
    /// Protocol engines use this to clear the busy flag before reporting
    /// results through the receive entry points.
    pub fn tracker_mut(&mut self, id: TrackerId) -> Option<&mut Tracker> {
        self.position(id)
            .map(|position| &mut self.trackers[position])
    }

    fn position(&self, id: TrackerId) -> Option<usize> {
        self.trackers.iter().position(|tracker| tracker.id == id)
    }

    /// First position of `group`.
    pub fn begin_group(&self, group: u32) -> usize {
        self.trackers
            .partition_point(|tracker| tracker.group < group)
    }

    /// Position one past the last entry of `group`.
    pub fn end_group(&self, group: u32) -> usize {
        self.trackers
            .partition_point(|tracker| tracker.group <= group)
    }

    /// Positions covering `group`.
    pub fn group_range(&self, group: u32) -> Range<usize> {
        self.begin_group(group)..self.end_group(group)
    }

    /// Number of groups; one past the highest group in the list.
    pub fn size_group(&self) -> u32 {
        self.trackers
            .last()
            .map_or(0, |tracker| tracker.group + 1)
    }

    /// Whether any tracker has an exchange in flight.
    pub fn has_active(&self) -> bool {
        self.trackers.iter().any(Tracker::is_busy)
    }

    /// Whether any tracker has a non-scrape exchange in flight.
    pub fn has_active_not_scrape(&self) -> bool {
        self.trackers.iter().any(Tracker::is_busy_not_scrape)
    }

    /// Whether any tracker in `group` has an exchange in flight.
    pub fn has_active_in_group(&self, group: u32) -> bool {
        self.trackers[self.group_range(group)]
            .iter()
            .any(Tracker::is_busy)
    }

    /// Whether any tracker in `group` has a non-scrape exchange in flight.
    pub fn has_active_not_scrape_in_group(&self, group: u32) -> bool {
        self.trackers[self.group_range(group)]
            .iter()
            .any(Tracker::is_busy_not_scrape)
    }

    /// Number of trackers with an exchange in flight.
    pub fn count_active(&self) -> usize {
        self.trackers
            .iter()
            .filter(|tracker| tracker.is_busy())
            .count()
    }

    /// Whether `tracker` is usable under its tri-state and the global
    /// per-protocol enablement.
    pub fn is_usable(&self, cm: &ConnectionManager, tracker: &Tracker) -> bool {
        match tracker.enabled_status() {
            EnabledStatus::On => tracker.is_usable(),
            EnabledStatus::Off => false,
            EnabledStatus::Undefined => {
                cm.protocol_enabled(tracker.variant()) && tracker.is_usable()
            }
        }
    }

    /// Whether any tracker is usable.
    pub fn has_usable(&self, cm: &ConnectionManager) -> bool {
        self.trackers
            .iter()
            .any(|tracker| self.is_usable(cm, tracker))
    }

    /// Number of usable trackers.
    pub fn count_usable(&self, cm: &ConnectionManager) -> usize {
        self.trackers
            .iter()
            .filter(|tracker| self.is_usable(cm, tracker))
            .count()
    }

    /// Closes every tracker whose latest event bit is not set in
    /// `event_bitmap`.
    pub fn close_all_excluding(&mut self, event_bitmap: u32) {
        for tracker in &mut self.trackers {
            if event_bitmap & tracker.latest_event().bit() != 0 {
                continue;
            }
            tracker.close();
        }
    }

    /// Disowns every tracker whose latest event bit is set in
    /// `event_bitmap`.
    pub fn disown_all_including(&mut self, event_bitmap: u32) {
        for tracker in &mut self.trackers {
            if event_bitmap & tracker.latest_event().bit() != 0 {
                tracker.disown();
            }
        }
    }

    /// Removes every tracker.
    pub fn clear(&mut self) {
        self.trackers.clear();
    }

    /// Zeroes the counters of every tracker.
    pub fn clear_stats(&mut self) {
        for tracker in &mut self.trackers {
            tracker.clear_stats();
        }
    }

    /// Inserts `tracker` at the end of `group`, firing the enabled
    /// callback when the tracker is effectively enabled.
    pub fn insert(&mut self, cm: &ConnectionManager, group: u32, mut tracker: Tracker) -> TrackerId {
        let id = TrackerId(self.next_id);
        self.next_id += 1;
        tracker.id = id;
        tracker.group = group;

        let at = self.end_group(group);
        self.trackers.insert(at, tracker);

        if self.is_effectively_enabled(cm, &self.trackers[at]) {
            self.fire_enabled(at);
        }

        id
    }

    /// Parses `url`'s scheme and inserts a tracker of the matching variant
    /// at the end of `group`.
    ///
    /// `dht://` URLs are accepted only while the DHT protocol is globally
    /// enabled. URLs with any other scheme are logged and dropped, or
    /// rejected when `extra_tracker` marks a user-supplied URL. Returns
    /// the new tracker's id, or `None` for a dropped URL.
    ///
    /// # Errors
    /// - `SpindriftError::InvalidArgument` - `extra_tracker` is set and no
    ///   tracker variant matches the URL
    pub fn insert_url(
        &mut self,
        cm: &ConnectionManager,
        group: u32,
        url: &str,
        extra_tracker: bool,
    ) -> Result<Option<TrackerId>> {
        let mut flags = 0;
        if extra_tracker {
            flags |= FLAG_EXTRA_TRACKER;
        }

        let tracker = if url.starts_with("http://") || url.starts_with("https://") {
            Tracker::http(url, flags)
        } else if url.starts_with("udp://") {
            Tracker::udp(url, flags, Arc::clone(cm.resolver()))
        } else if url.starts_with("dht://") && cm.protocol_enabled(TrackerVariant::Dht) {
            Tracker::dht(url, flags, Arc::clone(cm.dht_active()))
        } else {
            tracing::warn!("could not find a matching tracker protocol (url: {url})");

            if extra_tracker {
                return Err(SpindriftError::InvalidArgument {
                    reason: format!("could not find a matching tracker protocol (url: {url})"),
                });
            }
            return Ok(None);
        };

        tracing::info!("added tracker (group: {group} url: {url})");
        Ok(Some(self.insert(cm, group, tracker)))
    }

    /// Id of the tracker announcing to `url`.
    pub fn find_url(&self, url: &str) -> Option<TrackerId> {
        self.trackers
            .iter()
            .find(|tracker| tracker.url() == url)
            .map(Tracker::id)
    }

    /// Position of the first usable tracker at or after `from`.
    pub fn find_usable(&self, cm: &ConnectionManager, from: usize) -> Option<usize> {
        (from..self.trackers.len()).find(|&position| self.is_usable(cm, &self.trackers[position]))
    }

    /// Selects the next tracker to announce to, starting at `from`.
    ///
    /// The first usable, announce-eligible tracker is the candidate. A
    /// candidate with no consecutive failures wins outright. A failing
    /// candidate is compared against the rest of the list: a later failing
    /// tracker with an earlier retry time replaces it and the scan
    /// continues, while the first clean tracker ends the scan, replacing
    /// the candidate only if its own next announce comes sooner than the
    /// candidate's retry.
    pub fn find_next_to_request(&self, cm: &ConnectionManager, from: usize) -> Option<TrackerId> {
        let can_request =
            |tracker: &Tracker| self.is_usable(cm, tracker) && tracker.can_request_state();

        let mut candidate = (from..self.trackers.len())
            .find(|&position| can_request(&self.trackers[position]))?;

        if self.trackers[candidate].failed_counter() != 0 {
            for position in candidate + 1..self.trackers.len() {
                let better = &self.trackers[position];
                if !can_request(better) {
                    continue;
                }

                if better.failed_counter() != 0 {
                    if better.failed_time_next() < self.trackers[candidate].failed_time_next() {
                        candidate = position;
                    }
                } else {
                    if better.success_time_next() < self.trackers[candidate].failed_time_next() {
                        candidate = position;
                    }
                    break;
                }
            }
        }

        let chosen = &self.trackers[candidate];
        tracing::debug!(
            "next tracker to request (group: {} url: {})",
            chosen.group(),
            chosen.url()
        );
        Some(chosen.id())
    }

    /// Swaps `id`'s tracker with the first entry of its group.
    ///
    /// Called after a success so the most reliable tracker of a tier moves
    /// to the front.
    pub fn promote(&mut self, id: TrackerId) {
        if let Some(position) = self.position(id) {
            self.promote_position(position);
        }
    }

    fn promote_position(&mut self, position: usize) -> usize {
        let first = self.begin_group(self.trackers[position].group);
        assert!(
            first <= position,
            "promote could not find the beginning of the group"
        );

        self.trackers.swap(first, position);
        first
    }

    /// Rotates `group` one position left: its first tracker becomes its
    /// last.
    ///
    /// Used after a group's announce round exhausts without success, so
    /// the next attempt begins with a different tracker.
    pub fn cycle_group(&mut self, group: u32) {
        let range = self.group_range(group);
        if range.len() > 1 {
            self.trackers[range].rotate_left(1);
        }
    }

    /// Shuffles each group independently with a cryptographically seeded
    /// generator, diffusing load at session start.
    pub fn randomize_group_entries(&mut self) {
        let mut rng = rand::thread_rng();

        let mut start = 0;
        while start < self.trackers.len() {
            let end = self.end_group(self.trackers[start].group());
            self.trackers[start..end].shuffle(&mut rng);
            start = end;
        }
    }

    /// Dispatches an announce with `new_event` to `id`'s tracker.
    ///
    /// A silent no-op when the tracker is unusable, `new_event` is the
    /// scrape pseudo-event, or a non-scrape exchange is already in flight.
    /// A busy scrape is cancelled in favour of the announce.
    pub fn send_state(&mut self, cm: &ConnectionManager, id: TrackerId, new_event: TrackerEvent) {
        let Some(position) = self.position(id) else {
            return;
        };

        if !self.is_usable(cm, &self.trackers[position]) || new_event == TrackerEvent::Scrape {
            return;
        }

        if self.trackers[position].is_busy() {
            if self.trackers[position].latest_event() != TrackerEvent::Scrape {
                return;
            }
            self.trackers[position].close();
        }

        let tracker = &mut self.trackers[position];
        tracing::info!(
            "sending {new_event} (group: {} url: {})",
            tracker.group(),
            tracker.url()
        );

        let dispatch = tracker.send_state(new_event);
        tracker.inc_request_counter();

        if let Dispatch::Failed(message) = dispatch {
            self.receive_failed(id, &message);
        }
    }

    /// Dispatches a scrape to `id`'s tracker.
    ///
    /// A silent no-op when the tracker is busy, unusable, not
    /// scrape-capable, or was scraped within the courtesy window (ten
    /// minutes by default). The window is the list's policy, not the
    /// tracker's.
    pub fn send_scrape(&mut self, cm: &ConnectionManager, id: TrackerId) {
        let Some(position) = self.position(id) else {
            return;
        };

        {
            let tracker = &self.trackers[position];
            if tracker.is_busy() || !self.is_usable(cm, tracker) {
                return;
            }
            if !tracker.can_scrape() {
                return;
            }
            if tracker.scrape_time_last() + self.scrape_interval > clock::coarse_seconds() {
                return;
            }
        }

        let tracker = &mut self.trackers[position];
        let dispatch = match tracker.send_scrape() {
            Ok(dispatch) => dispatch,
            Err(error) => {
                tracing::warn!("scrape dispatch refused (url: {}): {error}", tracker.url());
                return;
            }
        };
        tracker.inc_request_counter();

        tracing::info!(
            "sending scrape (group: {} url: {})",
            self.trackers[position].group(),
            self.trackers[position].url()
        );

        if let Dispatch::Failed(message) = dispatch {
            self.receive_scrape_failed(id, &message);
        }
    }

    /// Records a successful announce for `id`'s tracker.
    ///
    /// Promotes the tracker to the front of its group, sorts and
    /// deduplicates `peers`, stamps the success time, resets the failure
    /// counter, and reports the peer list through the success callback.
    /// Results for a disowned tracker are dropped.
    ///
    /// # Panics
    /// Panics when the tracker is not in the list or its busy flag is
    /// still set; the protocol engine must clear it before calling back.
    pub fn receive_success(&mut self, id: TrackerId, peers: &mut Vec<SocketAddr>) {
        let Some(position) = self.position(id) else {
            panic!("receive_success called for a tracker that is not in the list");
        };
        assert!(
            !self.trackers[position].is_busy(),
            "receive_success called while the tracker is busy"
        );

        if self.trackers[position].is_disowned() {
            tracing::debug!(
                "dropping announce result for disowned tracker (url: {})",
                self.trackers[position].url()
            );
            return;
        }

        // The tracker earned the front of its group.
        let position = self.promote_position(position);

        peers.sort_unstable();
        peers.dedup();

        let tracker = &mut self.trackers[position];
        tracing::info!("received {} peers (url: {})", peers.len(), tracker.url());

        tracker.success_time_last = clock::coarse_seconds();
        tracker.success_counter += 1;
        tracker.failed_counter = 0;
        tracker.latest_sum_peers = peers.len() as u32;

        let new_peers = match self.slot_success.take() {
            Some(mut slot) => {
                let count = slot(&self.trackers[position], peers);
                self.slot_success = Some(slot);
                count
            }
            None => 0,
        };
        self.trackers[position].latest_new_peers = new_peers;
    }

    /// Records a failed announce for `id`'s tracker and reports it through
    /// the failure callback. Results for a disowned tracker are dropped.
    ///
    /// # Panics
    /// Panics when the tracker is not in the list or its busy flag is
    /// still set.
    pub fn receive_failed(&mut self, id: TrackerId, message: &str) {
        let Some(position) = self.position(id) else {
            panic!("receive_failed called for a tracker that is not in the list");
        };
        assert!(
            !self.trackers[position].is_busy(),
            "receive_failed called while the tracker is busy"
        );

        if self.trackers[position].is_disowned() {
            tracing::debug!(
                "dropping announce failure for disowned tracker (url: {})",
                self.trackers[position].url()
            );
            return;
        }

        let tracker = &mut self.trackers[position];
        tracing::info!(
            "failed to connect to tracker (url: {} message: {message})",
            tracker.url()
        );

        tracker.failed_time_last = clock::coarse_seconds();
        tracker.failed_counter += 1;

        if let Some(mut slot) = self.slot_failed.take() {
            slot(&self.trackers[position], message);
            self.slot_failed = Some(slot);
        }
    }

    /// Records a completed scrape for `id`'s tracker and reports it
    /// through the scrape-success callback, when one is installed. Results
    /// for a disowned tracker are dropped.
    ///
    /// # Panics
    /// Panics when the tracker is not in the list or its busy flag is
    /// still set.
    pub fn receive_scrape_success(&mut self, id: TrackerId) {
        let Some(position) = self.position(id) else {
            panic!("receive_scrape_success called for a tracker that is not in the list");
        };
        assert!(
            !self.trackers[position].is_busy(),
            "receive_scrape_success called while the tracker is busy"
        );

        if self.trackers[position].is_disowned() {
            return;
        }

        let tracker = &mut self.trackers[position];
        tracing::info!("received scrape from tracker (url: {})", tracker.url());

        tracker.scrape_time_last = clock::coarse_seconds();
        tracker.scrape_counter += 1;

        if let Some(mut slot) = self.slot_scrape_success.take() {
            slot(&self.trackers[position]);
            self.slot_scrape_success = Some(slot);
        }
    }

    /// Reports a failed scrape through the scrape-failure callback, when
    /// one is installed. Results for a disowned tracker are dropped.
    ///
    /// # Panics
    /// Panics when the tracker is not in the list or its busy flag is
    /// still set.
    pub fn receive_scrape_failed(&mut self, id: TrackerId, message: &str) {
        let Some(position) = self.position(id) else {
            panic!("receive_scrape_failed called for a tracker that is not in the list");
        };
        assert!(
            !self.trackers[position].is_busy(),
            "receive_scrape_failed called while the tracker is busy"
        );

        if self.trackers[position].is_disowned() {
            return;
        }

        tracing::info!(
            "failed to scrape tracker (url: {} message: {message})",
            self.trackers[position].url()
        );

        if let Some(mut slot) = self.slot_scrape_failed.take() {
            slot(&self.trackers[position], message);
            self.slot_scrape_failed = Some(slot);
        }
    }

    /// Applies a new enabled tri-state to `id`'s tracker and fires the
    /// enabled or disabled callback when the effective state flipped.
    ///
    /// Transitioning to `Off` closes the tracker. So does a transition to
    /// `Undefined` whose protocol is globally disabled, since the tracker
    /// ends up effectively off.
    pub fn set_enabled_status(
        &mut self,
        cm: &ConnectionManager,
        id: TrackerId,
        status: EnabledStatus,
    ) {
        let Some(position) = self.position(id) else {
            return;
        };
        if self.trackers[position].enabled_status() == status {
            return;
        }

        let tracker = &mut self.trackers[position];
        let previous = tracker.enabled_status();
        tracing::info!(
            "enabled status change from {previous:?} to {status:?} (group: {} url: {})",
            tracker.group(),
            tracker.url()
        );
        tracker.enabled_status = status;

        if status == EnabledStatus::Off {
            tracker.close();
        }

        let protocol_on = cm.protocol_enabled(tracker.variant());
        let was_on = previous == EnabledStatus::On
            || (previous == EnabledStatus::Undefined && protocol_on);
        let is_on =
            status == EnabledStatus::On || (status == EnabledStatus::Undefined && protocol_on);

        if was_on && status == EnabledStatus::Undefined && !protocol_on {
            tracker.close();
        }

        if is_on == was_on {
            return;
        }
        if is_on {
            self.fire_enabled(position);
        } else {
            self.fire_disabled(position);
        }
    }

    fn is_effectively_enabled(&self, cm: &ConnectionManager, tracker: &Tracker) -> bool {
        match tracker.enabled_status() {
            EnabledStatus::On => true,
            EnabledStatus::Off => false,
            EnabledStatus::Undefined => cm.protocol_enabled(tracker.variant()),
        }
    }

    fn fire_enabled(&mut self, position: usize) {
        if let Some(mut slot) = self.slot_tracker_enabled.take() {
            slot(&self.trackers[position]);
            self.slot_tracker_enabled = Some(slot);
        }
    }

    fn fire_disabled(&mut self, position: usize) {
        if let Some(mut slot) = self.slot_tracker_disabled.take() {
            slot(&self.trackers[position]);
            self.slot_tracker_disabled = Some(slot);
        }
    }
}

impl Default for TrackerList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::config::SpindriftConfig;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(&SpindriftConfig::default(), None)
    }

    fn insert_tracker(list: &mut TrackerList, cm: &ConnectionManager, group: u32, url: &str) -> TrackerId {
        list.insert_url(cm, group, url, false).unwrap().unwrap()
    }

    fn groups(list: &TrackerList) -> Vec<u32> {
        list.iter().map(Tracker::group).collect()
    }

    #[test]
    fn test_insert_two_urls_same_group() {
        let cm = manager();
        let mut list = TrackerList::new();

        insert_tracker(&mut list, &cm, 0, "http://a/announce");
        insert_tracker(&mut list, &cm, 0, "udp://b:8/announce");

        assert_eq!(list.len(), 2);
        assert_eq!(list.size_group(), 1);
        assert_eq!(list.get(0).unwrap().url(), "http://a/announce");
        assert_eq!(list.get(1).unwrap().url(), "udp://b:8/announce");
        assert_eq!(list.get(1).unwrap().variant(), TrackerVariant::Udp);
    }

    #[test]
    fn test_insert_places_at_group_end() {
        let cm = manager();
        let mut list = TrackerList::new();

        insert_tracker(&mut list, &cm, 0, "http://a/announce");
        insert_tracker(&mut list, &cm, 1, "http://b/announce");
        insert_tracker(&mut list, &cm, 0, "http://c/announce");

        assert_eq!(groups(&list), vec![0, 0, 1]);
        assert_eq!(list.get(1).unwrap().url(), "http://c/announce");
        assert_eq!(list.size_group(), 2);
    }

    #[test]
    fn test_groups_stay_sorted() {
        let cm = manager();
        let mut list = TrackerList::new();

        for (group, url) in [
            (2, "http://a/announce"),
            (0, "http://b/announce"),
            (1, "http://c/announce"),
            (0, "http://d/announce"),
            (2, "http://e/announce"),
        ] {
            insert_tracker(&mut list, &cm, group, url);
        }

        let observed = groups(&list);
        let mut sorted = observed.clone();
        sorted.sort_unstable();
        assert_eq!(observed, sorted);
        assert_eq!(list.size_group(), 3);
    }

    #[test]
    fn test_insert_url_unknown_scheme_dropped() {
        let cm = manager();
        let mut list = TrackerList::new();

        let inserted = list.insert_url(&cm, 0, "gopher://x/announce", false).unwrap();
        assert!(inserted.is_none());
        assert!(list.is_empty());
    }

    #[test]
    fn test_insert_url_unknown_scheme_rejected_for_extra() {
        let cm = manager();
        let mut list = TrackerList::new();

        let result = list.insert_url(&cm, 0, "gopher://x/announce", true);
        assert!(matches!(
            result,
            Err(SpindriftError::InvalidArgument { .. })
        ));
        assert!(list.is_empty());
    }

    #[test]
    fn test_insert_url_dht_gated_on_protocol() {
        let mut cm = manager();
        let mut list = TrackerList::new();

        cm.set_protocol_enabled(TrackerVariant::Dht, false);
        assert!(list.insert_url(&cm, 0, "dht://x", false).unwrap().is_none());

        cm.set_protocol_enabled(TrackerVariant::Dht, true);
        let id = list.insert_url(&cm, 0, "dht://x", false).unwrap().unwrap();
        assert_eq!(list.tracker(id).unwrap().variant(), TrackerVariant::Dht);
    }

    #[test]
    fn test_insert_fires_enabled_callback() {
        let cm = manager();
        let mut list = TrackerList::new();

        let enabled = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&enabled);
        list.set_slot_tracker_enabled(move |tracker| {
            sink.borrow_mut().push(tracker.url().to_string());
        });

        insert_tracker(&mut list, &cm, 0, "http://a/announce");
        assert_eq!(*enabled.borrow(), vec!["http://a/announce".to_string()]);
    }

    #[test]
    fn test_insert_skips_callback_when_protocol_disabled() {
        let mut cm = manager();
        cm.set_protocol_enabled(TrackerVariant::Http, false);
        let mut list = TrackerList::new();

        let fired = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&fired);
        list.set_slot_tracker_enabled(move |_| *sink.borrow_mut() += 1);

        insert_tracker(&mut list, &cm, 0, "http://a/announce");
        assert_eq!(*fired.borrow(), 0);
    }

    #[test]
    fn test_find_url() {
        let cm = manager();
        let mut list = TrackerList::new();

        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");
        insert_tracker(&mut list, &cm, 0, "http://b/announce");

        assert_eq!(list.find_url("http://a/announce"), Some(id));
        assert_eq!(list.find_url("http://missing/announce"), None);
    }

    #[test]
    fn test_find_next_first_clean_candidate_wins() {
        let cm = manager();
        let mut list = TrackerList::new();

        let first = insert_tracker(&mut list, &cm, 0, "http://a/announce");
        insert_tracker(&mut list, &cm, 0, "http://b/announce");

        assert_eq!(list.find_next_to_request(&cm, 0), Some(first));
    }

    #[test]
    fn test_find_next_prefers_sooner_healthy_tracker() {
        let cm = manager();
        let mut list = TrackerList::new();

        let failing = insert_tracker(&mut list, &cm, 0, "http://a/announce");
        let healthy = insert_tracker(&mut list, &cm, 0, "http://b/announce");

        {
            let tracker = list.tracker_mut(failing).unwrap();
            tracker.failed_counter = 3;
            tracker.failed_time_last = 11_900; // next retry at 11_920
        }
        {
            let tracker = list.tracker_mut(healthy).unwrap();
            tracker.success_counter = 1;
            tracker.success_time_last = 10_000; // next announce at 11_800
        }

        assert_eq!(list.find_next_to_request(&cm, 0), Some(healthy));
    }

    #[test]
    fn test_find_next_better_failed_then_stops_at_clean() {
        let cm = manager();
        let mut list = TrackerList::new();

        let a = insert_tracker(&mut list, &cm, 0, "http://a/announce");
        let b = insert_tracker(&mut list, &cm, 0, "http://b/announce");
        let c = insert_tracker(&mut list, &cm, 0, "http://c/announce");

        {
            let tracker = list.tracker_mut(a).unwrap();
            tracker.failed_counter = 3;
            tracker.failed_time_last = 11_980; // next retry at 12_000
        }
        {
            let tracker = list.tracker_mut(b).unwrap();
            tracker.failed_counter = 1;
            tracker.failed_time_last = 11_975; // next retry at 11_980
        }
        {
            // Clean, but its next announce is far later than b's retry.
            let tracker = list.tracker_mut(c).unwrap();
            tracker.success_counter = 1;
            tracker.success_time_last = 100_000;
        }

        assert_eq!(list.find_next_to_request(&cm, 0), Some(b));
    }

    #[test]
    fn test_find_next_never_failed_counts_as_clean() {
        let cm = manager();
        let mut list = TrackerList::new();

        let failing = insert_tracker(&mut list, &cm, 0, "http://a/announce");
        let fresh = insert_tracker(&mut list, &cm, 0, "http://b/announce");

        {
            let tracker = list.tracker_mut(failing).unwrap();
            tracker.failed_counter = 1;
            tracker.failed_time_last = clock::coarse_seconds();
        }

        // A tracker that has never announced has success_time_next zero,
        // beating any pending retry.
        assert_eq!(list.find_next_to_request(&cm, 0), Some(fresh));
    }

    #[test]
    fn test_find_next_skips_unusable() {
        let cm = manager();
        let mut list = TrackerList::new();

        let off = insert_tracker(&mut list, &cm, 0, "http://a/announce");
        let on = insert_tracker(&mut list, &cm, 0, "http://b/announce");
        list.set_enabled_status(&cm, off, EnabledStatus::Off);

        assert_eq!(list.find_next_to_request(&cm, 0), Some(on));
    }

    #[test]
    fn test_find_next_empty_list() {
        let cm = manager();
        let list = TrackerList::new();
        assert_eq!(list.find_next_to_request(&cm, 0), None);
    }

    #[test]
    fn test_forced_on_dht_still_follows_dht_activity() {
        let mut cm = manager();
        let mut list = TrackerList::new();

        let id = list.insert_url(&cm, 0, "dht://x", false).unwrap().unwrap();
        list.set_enabled_status(&cm, id, EnabledStatus::On);
        assert_eq!(list.count_usable(&cm), 1);

        // Forcing the tracker on does not resurrect it once the DHT
        // itself goes inactive.
        cm.set_protocol_enabled(TrackerVariant::Dht, false);
        assert_eq!(list.count_usable(&cm), 0);
        assert_eq!(list.find_next_to_request(&cm, 0), None);

        list.send_state(&cm, id, TrackerEvent::Started);
        assert!(!list.tracker(id).unwrap().is_busy());

        cm.set_protocol_enabled(TrackerVariant::Dht, true);
        assert_eq!(list.count_usable(&cm), 1);
    }

    #[test]
    fn test_promote_swaps_to_group_front() {
        let cm = manager();
        let mut list = TrackerList::new();

        insert_tracker(&mut list, &cm, 0, "http://a/announce");
        insert_tracker(&mut list, &cm, 0, "http://b/announce");
        let last = insert_tracker(&mut list, &cm, 0, "http://c/announce");

        list.promote(last);
        assert_eq!(list.get(0).unwrap().url(), "http://c/announce");
        assert_eq!(list.get(2).unwrap().url(), "http://a/announce");
    }

    #[test]
    fn test_promote_within_own_group_only() {
        let cm = manager();
        let mut list = TrackerList::new();

        insert_tracker(&mut list, &cm, 0, "http://a/announce");
        insert_tracker(&mut list, &cm, 1, "http://b/announce");
        let last = insert_tracker(&mut list, &cm, 1, "http://c/announce");

        list.promote(last);
        assert_eq!(list.get(0).unwrap().url(), "http://a/announce");
        assert_eq!(list.get(1).unwrap().url(), "http://c/announce");
        assert_eq!(list.get(2).unwrap().url(), "http://b/announce");
    }

    #[test]
    fn test_cycle_group_rotates_first_to_last() {
        let cm = manager();
        let mut list = TrackerList::new();

        insert_tracker(&mut list, &cm, 0, "http://a/announce");
        insert_tracker(&mut list, &cm, 0, "http://b/announce");
        insert_tracker(&mut list, &cm, 0, "http://c/announce");
        insert_tracker(&mut list, &cm, 1, "http://d/announce");

        list.cycle_group(0);

        let urls: Vec<_> = list.iter().map(|t| t.url().to_string()).collect();
        assert_eq!(
            urls,
            vec![
                "http://b/announce",
                "http://c/announce",
                "http://a/announce",
                "http://d/announce"
            ]
        );
    }

    #[test]
    fn test_cycle_missing_group_is_noop() {
        let cm = manager();
        let mut list = TrackerList::new();
        insert_tracker(&mut list, &cm, 0, "http://a/announce");

        list.cycle_group(7);
        assert_eq!(list.get(0).unwrap().url(), "http://a/announce");
    }

    #[test]
    fn test_randomize_preserves_group_partitions() {
        let cm = manager();
        let mut list = TrackerList::new();

        for index in 0..5 {
            insert_tracker(&mut list, &cm, 0, &format!("http://g0-{index}/announce"));
        }
        for index in 0..5 {
            insert_tracker(&mut list, &cm, 1, &format!("http://g1-{index}/announce"));
        }

        list.randomize_group_entries();

        assert_eq!(groups(&list), vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 1]);
        let mut group_zero: Vec<_> = list.iter().take(5).map(|t| t.url().to_string()).collect();
        group_zero.sort();
        assert_eq!(
            group_zero,
            (0..5)
                .map(|index| format!("http://g0-{index}/announce"))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_send_state_marks_busy_and_counts() {
        let cm = manager();
        let mut list = TrackerList::new();
        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");

        list.send_state(&cm, id, TrackerEvent::Started);

        let tracker = list.tracker(id).unwrap();
        assert!(tracker.is_busy());
        assert!(tracker.is_busy_not_scrape());
        assert_eq!(tracker.latest_event(), TrackerEvent::Started);
        assert!(list.has_active());
        assert!(list.has_active_in_group(0));
        assert_eq!(list.count_active(), 1);
    }

    #[test]
    fn test_send_state_scrape_event_is_noop() {
        let cm = manager();
        let mut list = TrackerList::new();
        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");

        list.send_state(&cm, id, TrackerEvent::Scrape);
        assert!(!list.tracker(id).unwrap().is_busy());
    }

    #[test]
    fn test_send_state_busy_announce_is_noop() {
        let cm = manager();
        let mut list = TrackerList::new();
        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");

        list.send_state(&cm, id, TrackerEvent::Started);
        list.send_state(&cm, id, TrackerEvent::Completed);

        // The second send was dropped; the original event stands.
        assert_eq!(
            list.tracker(id).unwrap().latest_event(),
            TrackerEvent::Started
        );
    }

    #[test]
    fn test_send_state_cancels_busy_scrape() {
        let cm = manager();
        let mut list = TrackerList::new();
        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");

        list.send_scrape(&cm, id);
        assert!(list.tracker(id).unwrap().is_busy());
        assert!(!list.tracker(id).unwrap().is_busy_not_scrape());

        list.send_state(&cm, id, TrackerEvent::Started);
        let tracker = list.tracker(id).unwrap();
        assert!(tracker.is_busy_not_scrape());
        assert_eq!(tracker.latest_event(), TrackerEvent::Started);
    }

    #[test]
    fn test_send_state_unusable_is_noop() {
        let cm = manager();
        let mut list = TrackerList::new();
        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");

        list.set_enabled_status(&cm, id, EnabledStatus::Off);
        list.send_state(&cm, id, TrackerEvent::Started);
        assert!(!list.tracker(id).unwrap().is_busy());
    }

    #[test]
    fn test_send_scrape_courtesy_window() {
        let cm = manager();
        let mut list = TrackerList::new();
        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");

        let now = clock::coarse_seconds();
        list.tracker_mut(id).unwrap().scrape_time_last = now - 120;
        list.send_scrape(&cm, id);
        assert!(!list.tracker(id).unwrap().is_busy());

        list.tracker_mut(id).unwrap().scrape_time_last = now - 601;
        list.send_scrape(&cm, id);
        let tracker = list.tracker(id).unwrap();
        assert!(tracker.is_busy());
        assert_eq!(tracker.latest_event(), TrackerEvent::Scrape);
    }

    #[test]
    fn test_send_scrape_requires_capability() {
        let mut cm = manager();
        cm.set_protocol_enabled(TrackerVariant::Dht, true);
        let mut list = TrackerList::new();

        let id = list.insert_url(&cm, 0, "dht://x", false).unwrap().unwrap();
        list.send_scrape(&cm, id);
        assert!(!list.tracker(id).unwrap().is_busy());
    }

    #[test]
    fn test_receive_success_promotes_and_resets() {
        let cm = manager();
        let mut list = TrackerList::new();

        insert_tracker(&mut list, &cm, 0, "http://a/announce");
        let second = insert_tracker(&mut list, &cm, 0, "http://b/announce");

        let reported = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&reported);
        list.set_slot_success(move |_, peers| {
            sink.borrow_mut().extend_from_slice(peers);
            1
        });

        list.tracker_mut(second).unwrap().failed_counter = 2;

        let mut peers: Vec<SocketAddr> = vec![
            "10.0.0.2:6881".parse().unwrap(),
            "10.0.0.1:6881".parse().unwrap(),
            "10.0.0.2:6881".parse().unwrap(),
        ];
        list.receive_success(second, &mut peers);

        // Promoted to the front of its group.
        assert_eq!(list.get(0).unwrap().id(), second);

        let tracker = list.tracker(second).unwrap();
        assert_eq!(tracker.failed_counter(), 0);
        assert_eq!(tracker.success_counter(), 1);
        assert!(tracker.success_time_last() > 0);
        assert_eq!(tracker.latest_sum_peers(), 2);
        assert_eq!(tracker.latest_new_peers(), 1);

        // Sorted and deduplicated before the callback saw them.
        assert_eq!(
            *reported.borrow(),
            vec![
                "10.0.0.1:6881".parse::<SocketAddr>().unwrap(),
                "10.0.0.2:6881".parse().unwrap()
            ]
        );
    }

    #[test]
    fn test_receive_failed_counts_and_reports() {
        let cm = manager();
        let mut list = TrackerList::new();
        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");

        let messages = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&messages);
        list.set_slot_failed(move |_, message| sink.borrow_mut().push(message.to_string()));

        list.tracker_mut(id).unwrap().success_counter = 5;
        list.receive_failed(id, "connection refused");

        let tracker = list.tracker(id).unwrap();
        assert_eq!(tracker.failed_counter(), 1);
        assert!(tracker.failed_time_last() > 0);
        assert_eq!(tracker.success_counter(), 5);
        assert_eq!(*messages.borrow(), vec!["connection refused".to_string()]);
    }

    #[test]
    fn test_receive_scrape_success_counts() {
        let cm = manager();
        let mut list = TrackerList::new();
        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");

        let fired = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&fired);
        list.set_slot_scrape_success(move |_| *sink.borrow_mut() += 1);

        list.receive_scrape_success(id);

        let tracker = list.tracker(id).unwrap();
        assert_eq!(tracker.scrape_counter(), 1);
        assert!(tracker.scrape_time_last() > 0);
        assert_eq!(*fired.borrow(), 1);
    }

    #[test]
    fn test_receive_scrape_failed_reports_without_counting() {
        let cm = manager();
        let mut list = TrackerList::new();
        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");

        let messages = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&messages);
        list.set_slot_scrape_failed(move |_, message| sink.borrow_mut().push(message.to_string()));

        list.receive_scrape_failed(id, "timed out");

        assert_eq!(list.tracker(id).unwrap().scrape_counter(), 0);
        assert_eq!(*messages.borrow(), vec!["timed out".to_string()]);
    }

    #[test]
    #[should_panic(expected = "busy")]
    fn test_receive_success_while_busy_is_fatal() {
        let cm = manager();
        let mut list = TrackerList::new();
        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");

        list.send_state(&cm, id, TrackerEvent::Started);
        list.receive_success(id, &mut Vec::new());
    }

    #[test]
    #[should_panic(expected = "not in the list")]
    fn test_receive_failed_unknown_tracker_is_fatal() {
        let cm = manager();
        let mut list = TrackerList::new();
        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");

        list.clear();
        list.receive_failed(id, "late completion");
    }

    #[test]
    fn test_receive_dropped_for_disowned_tracker() {
        let cm = manager();
        let mut list = TrackerList::new();
        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");

        let fired = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&fired);
        list.set_slot_success(move |_, _| {
            *sink.borrow_mut() += 1;
            0
        });

        list.tracker_mut(id).unwrap().disown();
        list.receive_success(id, &mut vec!["10.0.0.1:1".parse().unwrap()]);

        assert_eq!(list.tracker(id).unwrap().success_counter(), 0);
        assert_eq!(*fired.borrow(), 0);
    }

    #[test]
    fn test_close_all_excluding_bitmap() {
        let cm = manager();
        let mut list = TrackerList::new();

        let started = insert_tracker(&mut list, &cm, 0, "http://a/announce");
        let stopped = insert_tracker(&mut list, &cm, 0, "http://b/announce");

        list.send_state(&cm, started, TrackerEvent::Started);
        list.send_state(&cm, stopped, TrackerEvent::Stopped);

        list.close_all_excluding(TrackerEvent::Stopped.bit());

        assert!(!list.tracker(started).unwrap().is_busy());
        assert!(list.tracker(stopped).unwrap().is_busy());
    }

    #[test]
    fn test_disown_all_including_bitmap() {
        let cm = manager();
        let mut list = TrackerList::new();

        let started = insert_tracker(&mut list, &cm, 0, "http://a/announce");
        let completed = insert_tracker(&mut list, &cm, 0, "http://b/announce");

        list.send_state(&cm, started, TrackerEvent::Started);
        list.send_state(&cm, completed, TrackerEvent::Completed);

        list.disown_all_including(TrackerEvent::Started.bit());

        assert!(list.tracker(started).unwrap().is_disowned());
        assert!(!list.tracker(completed).unwrap().is_disowned());
    }

    #[test]
    fn test_enabled_change_fires_callbacks() {
        let cm = manager();
        let mut list = TrackerList::new();
        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");

        let events = Rc::new(RefCell::new(Vec::new()));
        let enabled_sink = Rc::clone(&events);
        list.set_slot_tracker_enabled(move |_| enabled_sink.borrow_mut().push("enabled"));
        let disabled_sink = Rc::clone(&events);
        list.set_slot_tracker_disabled(move |_| disabled_sink.borrow_mut().push("disabled"));

        list.set_enabled_status(&cm, id, EnabledStatus::Off);
        list.set_enabled_status(&cm, id, EnabledStatus::On);
        // Undefined with the protocol enabled: still effectively on.
        list.set_enabled_status(&cm, id, EnabledStatus::Undefined);

        assert_eq!(*events.borrow(), vec!["disabled", "enabled"]);
    }

    #[test]
    fn test_enabled_change_to_off_closes() {
        let cm = manager();
        let mut list = TrackerList::new();
        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");

        list.send_state(&cm, id, TrackerEvent::Started);
        list.set_enabled_status(&cm, id, EnabledStatus::Off);

        assert!(!list.tracker(id).unwrap().is_busy());
    }

    #[test]
    fn test_enabled_change_undefined_with_disabled_protocol_closes() {
        let mut cm = manager();
        let mut list = TrackerList::new();
        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");

        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        list.set_slot_tracker_disabled(move |_| sink.borrow_mut().push("disabled"));

        list.set_enabled_status(&cm, id, EnabledStatus::On);
        list.send_state(&cm, id, TrackerEvent::Started);

        // Protocol disablement makes Undefined effectively off.
        cm.set_protocol_enabled(TrackerVariant::Http, false);
        list.set_enabled_status(&cm, id, EnabledStatus::Undefined);

        assert!(!list.tracker(id).unwrap().is_busy());
        assert_eq!(*events.borrow(), vec!["disabled"]);
    }

    #[test]
    fn test_enabled_change_same_status_is_noop() {
        let cm = manager();
        let mut list = TrackerList::new();
        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");

        let fired = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&fired);
        list.set_slot_tracker_enabled(move |_| *sink.borrow_mut() += 1);

        list.set_enabled_status(&cm, id, EnabledStatus::Undefined);
        assert_eq!(*fired.borrow(), 0);
    }

    #[test]
    fn test_usability_tri_state_resolution() {
        let mut cm = manager();
        let mut list = TrackerList::new();
        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");

        assert_eq!(list.count_usable(&cm), 1);

        cm.set_protocol_enabled(TrackerVariant::Http, false);
        assert_eq!(list.count_usable(&cm), 0);
        assert!(!list.has_usable(&cm));

        // Forced on overrides the protocol disablement.
        list.set_enabled_status(&cm, id, EnabledStatus::On);
        assert_eq!(list.count_usable(&cm), 1);

        list.set_enabled_status(&cm, id, EnabledStatus::Off);
        assert_eq!(list.count_usable(&cm), 0);
    }

    #[test]
    fn test_clear_stats_resets_all_trackers() {
        let cm = manager();
        let mut list = TrackerList::new();
        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");

        list.tracker_mut(id).unwrap().failed_counter = 4;
        list.clear_stats();
        assert_eq!(list.tracker(id).unwrap().failed_counter(), 0);
    }

    #[test]
    fn test_scrape_flow_round_trip() {
        let cm = manager();
        let mut list = TrackerList::new();
        let id = insert_tracker(&mut list, &cm, 0, "http://a/announce");

        list.send_scrape(&cm, id);
        assert!(list.tracker(id).unwrap().is_busy());

        list.tracker_mut(id).unwrap().clear_busy();
        list.receive_scrape_success(id);

        let tracker = list.tracker(id).unwrap();
        assert_eq!(tracker.scrape_counter(), 1);

        // Within the courtesy window now; an immediate rescrape is dropped.
        list.send_scrape(&cm, id);
        assert!(!list.tracker(id).unwrap().is_busy());
    }
}
