//! Per-tracker identity, counters, timing, and variant dispatch.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::clock;
use crate::config::AnnounceConfig;
use crate::net::dns::DnsResolver;
use crate::tracker::dht::{DHT_ANNOUNCE_INTERVAL, DhtBackend};
use crate::tracker::http::HttpBackend;
use crate::tracker::types::{
    Dispatch, EnabledStatus, FLAG_CAN_SCRAPE, FLAG_EXTRA_TRACKER, TrackerEvent, TrackerId,
    TrackerVariant,
};
use crate::tracker::udp::UdpBackend;
use crate::{Result, SpindriftError};

/// Base retry delay in seconds after the first failure.
const FAILED_BACKOFF_BASE: u32 = 5;
/// Number of doublings after which the retry delay stops growing.
const FAILED_BACKOFF_CAP: u32 = 6;

pub(crate) enum Backend {
    Http(HttpBackend),
    Udp(UdpBackend),
    Dht(DhtBackend),
}

/// A single tracker owned by a tracker list.
///
/// Carries the announce and scrape bookkeeping shared by every variant:
/// counters, timestamps, retry backoff, the enabled tri-state, and the
/// request throttle. Variant behaviour lives in the backend selected from
/// the URL scheme at construction.
pub struct Tracker {
    pub(crate) id: TrackerId,
    pub(crate) group: u32,
    url: String,
    flags: u32,
    pub(crate) enabled_status: EnabledStatus,
    disowned: bool,

    normal_interval: u32,
    min_interval: u32,

    pub(crate) latest_event: TrackerEvent,
    pub(crate) latest_new_peers: u32,
    pub(crate) latest_sum_peers: u32,

    pub(crate) success_time_last: u32,
    pub(crate) success_counter: u32,
    pub(crate) failed_time_last: u32,
    pub(crate) failed_counter: u32,
    pub(crate) scrape_time_last: u32,
    pub(crate) scrape_counter: u32,

    pub(crate) scrape_complete: u32,
    pub(crate) scrape_incomplete: u32,
    pub(crate) scrape_downloaded: u32,

    request_time_last: u32,
    request_counter: u32,

    backend: Backend,
}

impl Tracker {
    /// Creates an HTTP tracker for `url`.
    ///
    /// The tracker is scrape-capable when the scrape endpoint derives from
    /// the announce URL.
    pub fn http(url: impl Into<String>, flags: u32) -> Self {
        let url = url.into();
        let backend = HttpBackend::new(&url);
        let flags = if backend.can_scrape() {
            flags | FLAG_CAN_SCRAPE
        } else {
            flags
        };
        Self::with_backend(url, flags, Backend::Http(backend))
    }

    /// Creates a UDP tracker for `url`, resolving its host through
    /// `resolver` when exchanges start.
    pub fn udp(url: impl Into<String>, flags: u32, resolver: Arc<DnsResolver>) -> Self {
        let url = url.into();
        let backend = UdpBackend::new(&url, resolver);
        Self::with_backend(url, flags | FLAG_CAN_SCRAPE, Backend::Udp(backend))
    }

    /// Creates a DHT pseudo-tracker for `url`.
    ///
    /// `dht_active` is the connection manager's shared DHT activity
    /// signal; the tracker is unusable and refuses announces while it is
    /// off.
    pub fn dht(url: impl Into<String>, flags: u32, dht_active: Arc<AtomicBool>) -> Self {
        Self::with_backend(url.into(), flags, Backend::Dht(DhtBackend::new(dht_active)))
    }

    fn with_backend(url: String, flags: u32, backend: Backend) -> Self {
        let announce = AnnounceConfig::default();

        Self {
            id: TrackerId(0),
            group: 0,
            url,
            flags,
            enabled_status: EnabledStatus::Undefined,
            disowned: false,
            normal_interval: announce.normal_interval,
            min_interval: announce.min_interval,
            latest_event: TrackerEvent::None,
            latest_new_peers: 0,
            latest_sum_peers: 0,
            success_time_last: 0,
            success_counter: 0,
            failed_time_last: 0,
            failed_counter: 0,
            scrape_time_last: 0,
            scrape_counter: 0,
            scrape_complete: 0,
            scrape_incomplete: 0,
            scrape_downloaded: 0,
            request_time_last: clock::coarse_seconds(),
            request_counter: 0,
            backend,
        }
    }

    /// Stable identifier within the owning list.
    pub fn id(&self) -> TrackerId {
        self.id
    }

    /// Preference tier this tracker belongs to.
    pub fn group(&self) -> u32 {
        self.group
    }

    /// Announce URL the tracker was created from.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Flag bitset over `FLAG_EXTRA_TRACKER` and `FLAG_CAN_SCRAPE`.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Whether the user added this tracker outside the torrent metadata.
    pub fn is_extra_tracker(&self) -> bool {
        self.flags & FLAG_EXTRA_TRACKER != 0
    }

    /// Protocol variant selected at construction.
    pub fn variant(&self) -> TrackerVariant {
        match &self.backend {
            Backend::Http(_) => TrackerVariant::Http,
            Backend::Udp(_) => TrackerVariant::Udp,
            Backend::Dht(_) => TrackerVariant::Dht,
        }
    }

    /// Per-tracker enabled override.
    pub fn enabled_status(&self) -> EnabledStatus {
        self.enabled_status
    }

    /// Seconds between announces after a success.
    pub fn normal_interval(&self) -> u32 {
        self.normal_interval
    }

    /// Minimum announce interval the tracker requested.
    pub fn min_interval(&self) -> u32 {
        self.min_interval
    }

    /// Overrides the announce interval, as reported by the tracker.
    pub fn set_normal_interval(&mut self, seconds: u32) {
        self.normal_interval = seconds;
    }

    /// Overrides the minimum announce interval, as reported by the tracker.
    pub fn set_min_interval(&mut self, seconds: u32) {
        self.min_interval = seconds;
    }

    /// Event carried by the most recent exchange.
    pub fn latest_event(&self) -> TrackerEvent {
        self.latest_event
    }

    /// Peer count reported by the most recent successful announce.
    pub fn latest_sum_peers(&self) -> u32 {
        self.latest_sum_peers
    }

    /// New-peer count from the most recent successful announce.
    pub fn latest_new_peers(&self) -> u32 {
        self.latest_new_peers
    }

    /// Number of successful announces.
    pub fn success_counter(&self) -> u32 {
        self.success_counter
    }

    /// Coarse time of the last successful announce.
    pub fn success_time_last(&self) -> u32 {
        self.success_time_last
    }

    /// Number of consecutive failed announces.
    pub fn failed_counter(&self) -> u32 {
        self.failed_counter
    }

    /// Coarse time of the last failed announce.
    pub fn failed_time_last(&self) -> u32 {
        self.failed_time_last
    }

    /// Number of completed scrapes.
    pub fn scrape_counter(&self) -> u32 {
        self.scrape_counter
    }

    /// Coarse time of the last completed scrape.
    pub fn scrape_time_last(&self) -> u32 {
        self.scrape_time_last
    }

    /// Seeder count from the last scrape.
    pub fn scrape_complete(&self) -> u32 {
        self.scrape_complete
    }

    /// Leecher count from the last scrape.
    pub fn scrape_incomplete(&self) -> u32 {
        self.scrape_incomplete
    }

    /// Snatch count from the last scrape.
    pub fn scrape_downloaded(&self) -> u32 {
        self.scrape_downloaded
    }

    /// Records swarm statistics delivered by a scrape exchange.
    pub fn set_scrape_stats(&mut self, complete: u32, incomplete: u32, downloaded: u32) {
        self.scrape_complete = complete;
        self.scrape_incomplete = incomplete;
        self.scrape_downloaded = downloaded;
    }

    /// Coarse time of the next legitimate announce after a success, zero
    /// when no announce has succeeded yet.
    pub fn success_time_next(&self) -> u32 {
        if self.success_counter == 0 {
            return 0;
        }
        self.success_time_last + self.normal_interval
    }

    /// Coarse time of the next retry under exponential backoff, zero when
    /// the tracker is not currently failing.
    ///
    /// The delay doubles from 5 seconds per consecutive failure and caps
    /// at 320 seconds.
    pub fn failed_time_next(&self) -> u32 {
        if self.failed_counter == 0 {
            return 0;
        }
        self.failed_time_last
            + (FAILED_BACKOFF_BASE << (self.failed_counter - 1).min(FAILED_BACKOFF_CAP))
    }

    /// Whether an exchange is in flight.
    pub fn is_busy(&self) -> bool {
        match &self.backend {
            Backend::Http(backend) => backend.is_busy(),
            Backend::Udp(backend) => backend.is_busy(),
            Backend::Dht(backend) => backend.is_busy(),
        }
    }

    /// Whether a non-scrape exchange is in flight.
    pub fn is_busy_not_scrape(&self) -> bool {
        match &self.backend {
            Backend::Http(backend) => backend.is_busy_not_scrape(),
            Backend::Udp(backend) => backend.is_busy_not_scrape(),
            Backend::Dht(backend) => backend.is_busy(),
        }
    }

    /// Variant-level usability: the URL is well formed, the tracker has
    /// not been disowned, and for a DHT tracker the DHT is active.
    ///
    /// The owning list combines this with the enabled tri-state and the
    /// global per-protocol enablement. The DHT activity check lives here
    /// so that a tracker forced on still goes unusable when the DHT
    /// itself is off.
    pub fn is_usable(&self) -> bool {
        if self.disowned {
            return false;
        }
        match &self.backend {
            Backend::Udp(backend) => backend.is_usable(),
            Backend::Dht(backend) => backend.is_usable(),
            Backend::Http(_) => true,
        }
    }

    /// Whether the tracker is eligible for a non-scrape announce.
    ///
    /// A busy scrape does not block an announce; the list cancels it.
    pub fn can_request_state(&self) -> bool {
        !(self.is_busy() && self.latest_event != TrackerEvent::Scrape)
    }

    /// Whether the variant supports scrape exchanges.
    pub fn can_scrape(&self) -> bool {
        self.flags & FLAG_CAN_SCRAPE != 0
    }

    /// Scrape endpoint derived from the announce URL, when the variant has
    /// one.
    pub fn scrape_url(&self) -> Option<&str> {
        match &self.backend {
            Backend::Http(backend) => backend.scrape_url(),
            Backend::Udp(_) | Backend::Dht(_) => None,
        }
    }

    /// Tracker address from the last UDP resolution, for the wire engine.
    pub fn resolved_address(&self) -> Option<std::net::SocketAddr> {
        match &self.backend {
            Backend::Udp(backend) => backend.resolved_address(),
            Backend::Http(_) | Backend::Dht(_) => None,
        }
    }

    pub(crate) fn send_state(&mut self, event: TrackerEvent) -> Dispatch {
        self.latest_event = event;

        match &mut self.backend {
            Backend::Http(backend) => backend.start_announce(),
            Backend::Udp(backend) => backend.start_announce(),
            Backend::Dht(backend) => {
                if event == TrackerEvent::Stopped {
                    return Dispatch::Dropped;
                }

                let dispatch = backend.start_announce();
                if dispatch == Dispatch::Started {
                    // The DHT reannounces on its own cadence.
                    self.normal_interval = DHT_ANNOUNCE_INTERVAL;
                    self.min_interval = 0;
                }
                dispatch
            }
        }
    }

    pub(crate) fn send_scrape(&mut self) -> Result<Dispatch> {
        if !self.can_scrape() {
            return Err(SpindriftError::Unsupported {
                reason: format!("tracker variant does not support scrape (url: {})", self.url),
            });
        }

        self.latest_event = TrackerEvent::Scrape;

        let dispatch = match &mut self.backend {
            Backend::Http(backend) => backend.start_scrape(),
            Backend::Udp(backend) => backend.start_scrape(),
            // DHT never sets FLAG_CAN_SCRAPE.
            Backend::Dht(_) => Dispatch::Dropped,
        };
        Ok(dispatch)
    }

    /// Advances a DHT search into its announce phase.
    ///
    /// Called by the DHT router once peer lookup completes and the
    /// announces to the located nodes begin.
    ///
    /// # Panics
    /// Panics for a non-DHT tracker, or when no search is in flight.
    pub fn dht_begin_announcing(&mut self) {
        match &mut self.backend {
            Backend::Dht(backend) => backend.begin_announcing(),
            Backend::Http(_) | Backend::Udp(_) => {
                panic!("dht announce phase begun on a non-dht tracker")
            }
        }
    }

    /// Aborts any in-flight exchange. Counters are left untouched.
    pub fn close(&mut self) {
        match &mut self.backend {
            Backend::Http(backend) => backend.close(),
            Backend::Udp(backend) => backend.close(),
            Backend::Dht(backend) => backend.close(),
        }
    }

    /// Detaches the tracker: any late completion will be dropped by the
    /// owning list. Counters are left untouched.
    pub fn disown(&mut self) {
        self.disowned = true;
        self.close();
    }

    /// Whether the tracker has been disowned.
    pub fn is_disowned(&self) -> bool {
        self.disowned
    }

    /// Drops the in-flight flag.
    ///
    /// Protocol engines call this when an exchange concludes, before
    /// reporting the outcome through the owning list's receive entry
    /// points.
    pub fn clear_busy(&mut self) {
        self.close();
    }

    /// Applies the per-second decay to the request counter, counts this
    /// request, and stamps the request time.
    ///
    /// # Panics
    /// Panics when the counter reaches 10, i.e. more than ten requests
    /// landed within a rolling ten-second window.
    pub fn inc_request_counter(&mut self) {
        let now = clock::coarse_seconds();

        self.request_counter -= self.request_counter.min(now - self.request_time_last);
        self.request_counter += 1;
        self.request_time_last = now;

        assert!(
            self.request_counter < 10,
            "tracker sent more than 10 requests in 10 seconds (url: {})",
            self.url
        );
    }

    /// Zeroes the peer and exchange counters.
    pub fn clear_stats(&mut self) {
        self.latest_new_peers = 0;
        self.latest_sum_peers = 0;
        self.success_counter = 0;
        self.failed_counter = 0;
        self.scrape_counter = 0;
    }

    #[cfg(test)]
    pub(crate) fn rewind_request_time(&mut self, seconds: u32) {
        self.request_time_last -= seconds;
    }
}

/// Derives the scrape endpoint from an announce URL.
///
/// The path segment after the last `/` must be exactly `announce`,
/// optionally followed by a query string; that `/announce` becomes
/// `/scrape` and everything else, the query string included, is
/// preserved.
///
/// # Errors
/// - `SpindriftError::InvalidArgument` - the URL does not end in an
///   `/announce[?…]` segment
pub fn scrape_url_from(url: &str) -> Result<String> {
    let invalid = || SpindriftError::InvalidArgument {
        reason: format!("cannot derive a scrape url from {url}"),
    };

    let slash = url.rfind('/').ok_or_else(invalid)?;
    let tail = &url[slash..];

    if tail != "/announce" && !tail.starts_with("/announce?") {
        return Err(invalid());
    }

    Ok(format!(
        "{}/scrape{}",
        &url[..slash],
        &url[slash + "/announce".len()..]
    ))
}
