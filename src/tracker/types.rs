//! Core types and enumerations shared across the tracker subsystem.

use std::fmt;

/// The tracker was added by the user rather than the torrent metadata.
pub const FLAG_EXTRA_TRACKER: u32 = 1 << 0;
/// The tracker variant supports scrape exchanges.
pub const FLAG_CAN_SCRAPE: u32 = 1 << 1;

/// Tracker protocol variant, selected from the URL scheme at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerVariant {
    /// `http://` and `https://` trackers.
    Http,
    /// `udp://` trackers.
    Udp,
    /// `dht://` pseudo-trackers announcing through the DHT.
    Dht,
}

/// Stable identifier for a tracker within its owning list.
///
/// Assigned at insertion and unaffected by promotion, cycling, or
/// shuffling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackerId(pub(crate) u32);

/// Announce events, with stable integer values used by event bitmaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    /// No event announced yet.
    None = 0,
    /// Download finished.
    Completed = 1,
    /// Download started.
    Started = 2,
    /// Download stopped.
    Stopped = 3,
    /// Scrape exchange rather than an announce.
    Scrape = 4,
}

impl TrackerEvent {
    /// The bitmap bit for this event, as consumed by the list's
    /// close-excluding and disown-including policies.
    pub fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for TrackerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackerEvent::None => "none",
            TrackerEvent::Completed => "completed",
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Scrape => "scrape",
        };
        write!(f, "{name}")
    }
}

/// Per-tracker enabled override.
///
/// `Undefined` defers to the global per-protocol enablement held by the
/// connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnabledStatus {
    /// Forced off.
    Off,
    /// Forced on.
    On,
    /// Defer to the global per-protocol enablement.
    Undefined,
}

impl EnabledStatus {
    /// Deserialises from the persisted integer form; anything but 0 or 1
    /// maps to `Undefined`.
    pub fn from_i64(raw: i64) -> Self {
        match raw {
            0 => EnabledStatus::Off,
            1 => EnabledStatus::On,
            _ => EnabledStatus::Undefined,
        }
    }

    /// Serialises to the persisted integer form: `Off` = 0, `On` = 1,
    /// `Undefined` = 2.
    pub fn to_i64(self) -> i64 {
        match self {
            EnabledStatus::Off => 0,
            EnabledStatus::On => 1,
            EnabledStatus::Undefined => 2,
        }
    }
}

/// In-flight exchange state shared by the HTTP and UDP backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestState {
    Idle,
    Announcing,
    Scraping,
}

/// Outcome of handing an announce or scrape to a tracker backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// The exchange was started; the tracker is now busy.
    Started,
    /// The backend dropped the request without starting an exchange.
    Dropped,
    /// The request failed before any exchange began.
    Failed(String),
}
