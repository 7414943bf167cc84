//! Spindrift Core - tracker coordination for BitTorrent downloads

#![deny(missing_docs)]
#![deny(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![warn(clippy::too_many_lines)]
//!
//! This crate provides the tracker coordination core of a BitTorrent
//! client: the ordered, group-partitioned tracker list and its selection
//! policy, per-tracker announce/scrape state with retry backoff, the
//! session-wide network policy, and the synchronous name-resolution
//! service tracker implementations rely on.

pub mod clock;
pub mod config;
pub mod net;
pub mod sync;
pub mod tracker;

// Re-export main types for convenient access
pub use config::SpindriftConfig;
pub use net::{AddressFamily, ConnectionManager, DnsResolver, ResolveError, SocketType};
pub use sync::GlobalLock;
pub use tracker::{
    EnabledStatus, Tracker, TrackerEvent, TrackerId, TrackerList, TrackerVariant,
};

/// Errors surfaced by the tracker coordination core.
///
/// Broken internal invariants (results delivered for busy trackers,
/// request-counter overflow, malformed A records) are panics, not
/// variants; recovered DNS failures are [`ResolveError`] values memoised
/// by the resolver cache.
#[derive(Debug, thiserror::Error)]
pub enum SpindriftError {
    /// A caller-supplied value was rejected
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Human-readable description of the rejected value
        reason: String,
    },

    /// The operation is not supported by this build or tracker variant
    #[error("unsupported: {reason}")]
    Unsupported {
        /// Human-readable description of the missing capability
        reason: String,
    },

    /// URL parsing error
    #[error("URL parsing error")]
    UrlParsing(#[from] url::ParseError),

    /// I/O error
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using SpindriftError as the error type
pub type Result<T> = std::result::Result<T, SpindriftError>;
