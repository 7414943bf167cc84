//! Centralized configuration for the tracker coordination core.
//!
//! All tunable parameters are defined here to avoid hard-coded values
//! scattered throughout the codebase.

use std::time::Duration;

/// Central configuration grouping the tunables of every subsystem.
#[derive(Debug, Clone, Default)]
pub struct SpindriftConfig {
    /// Announce scheduling parameters
    pub announce: AnnounceConfig,
    /// Name-resolution parameters
    pub dns: DnsConfig,
    /// Connection manager defaults
    pub network: NetworkConfig,
}

/// Announce scheduling parameters.
#[derive(Debug, Clone)]
pub struct AnnounceConfig {
    /// Seconds between announces after a success
    pub normal_interval: u32,
    /// Minimum announce interval a tracker may request, seconds
    pub min_interval: u32,
    /// Courtesy window between scrapes of the same tracker, seconds
    pub scrape_interval: u32,
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            normal_interval: 1800, // 30 minutes
            min_interval: 600,     // 10 minutes
            scrape_interval: 600,  // 10 minutes
        }
    }
}

/// Name-resolution parameters.
#[derive(Debug, Clone)]
pub struct DnsConfig {
    /// Read timeout for custom nameserver queries
    pub query_timeout: Duration,
    /// Port used when a custom nameserver does not specify one
    pub default_port: u16,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(5),
            default_port: 53,
        }
    }
}

/// Connection manager defaults.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Maximum number of open sockets (0 = no connections allowed)
    pub max_open_sockets: u32,
    /// Listen queue length for the listener socket
    pub listen_backlog: i32,
    /// Socket send buffer size in bytes (0 = OS default)
    pub send_buffer_size: u32,
    /// Socket receive buffer size in bytes (0 = OS default)
    pub receive_buffer_size: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_open_sockets: 0,
            listen_backlog: 128,
            send_buffer_size: 0,
            receive_buffer_size: 0,
        }
    }
}
