//! Tracker coordination: the grouped tracker list, per-tracker state, and
//! the protocol variant backends.
//!
//! A download session owns one [`TrackerList`]. URLs inserted into the
//! list become trackers of the variant matching their scheme; the list
//! picks which tracker to contact next, dispatches announces and scrapes,
//! and folds completions back into per-tracker counters and user
//! callbacks.

mod dht;
mod http;
pub mod list;
#[allow(clippy::module_inception)]
pub mod tracker;
pub mod types;
mod udp;

pub use list::{
    EnabledSlot, FailedSlot, ScrapeFailedSlot, ScrapeSuccessSlot, SuccessSlot, TrackerList,
};
pub use tracker::{Tracker, scrape_url_from};
pub use types::{
    EnabledStatus, FLAG_CAN_SCRAPE, FLAG_EXTRA_TRACKER, TrackerEvent, TrackerId, TrackerVariant,
};
