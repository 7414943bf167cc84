//! Global network policy shared by every tracker of a download session.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::SpindriftConfig;
use crate::net::dns::DnsResolver;
use crate::net::listen::Listen;
use crate::sync::GlobalLock;
use crate::tracker::TrackerVariant;
use crate::{Result, SpindriftError};

/// Type-of-service priority favouring low latency.
pub const IPTOS_LOWDELAY: u32 = 0x10;
/// Type-of-service priority favouring throughput.
pub const IPTOS_THROUGHPUT: u32 = 0x08;
/// Type-of-service priority favouring reliability.
pub const IPTOS_RELIABILITY: u32 = 0x04;

/// No encryption negotiated.
pub const ENCRYPTION_NONE: u32 = 0;
/// Accept incoming encrypted handshakes.
pub const ENCRYPTION_ALLOW_INCOMING: u32 = 1 << 0;
/// Attempt outgoing encrypted handshakes.
pub const ENCRYPTION_TRY_OUTGOING: u32 = 1 << 1;
/// Require encryption on every connection.
pub const ENCRYPTION_REQUIRE: u32 = 1 << 2;

const PROTOCOL_HTTP: u32 = 1 << 0;
const PROTOCOL_UDP: u32 = 1 << 1;

/// Callback deciding whether a peer address is acceptable.
///
/// Nonzero means accept; the default filter accepts everything.
pub type FilterSlot = Box<dyn Fn(&SocketAddr) -> u32 + Send>;

/// Global network policy: addresses, limits, protocol enablement, and the
/// name-resolution hook trackers call through.
///
/// One per download session by convention. Not internally synchronised;
/// callers hold the global coordination lock. The resolver is the
/// exception and may be shared freely.
pub struct ConnectionManager {
    size: u32,
    max_size: u32,
    priority: u32,
    send_buffer_size: u32,
    receive_buffer_size: u32,
    encryption_options: u32,
    bind_address: SocketAddr,
    local_address: SocketAddr,
    proxy_address: SocketAddr,
    listen: Listen,
    listen_port: u16,
    listen_backlog: i32,
    enabled_protocols: u32,
    dht_active: Arc<AtomicBool>,
    block_ipv4: bool,
    block_ipv6: bool,
    prefer_ipv6: bool,
    network_active: Arc<AtomicBool>,
    resolver: Arc<DnsResolver>,
    slot_filter: Option<FilterSlot>,
}

impl ConnectionManager {
    /// Creates a manager with every protocol enabled, the network active,
    /// and the system DNS strategy installed.
    ///
    /// `lock`, when provided, is handed to the resolver so blocking system
    /// lookups made on the coordination thread release it.
    pub fn new(config: &SpindriftConfig, lock: Option<Arc<GlobalLock>>) -> Self {
        let network_active = Arc::new(AtomicBool::new(true));
        let resolver = Arc::new(DnsResolver::new(
            config.dns.clone(),
            Arc::clone(&network_active),
            lock,
        ));
        let unspecified = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));

        Self {
            size: 0,
            max_size: config.network.max_open_sockets,
            priority: IPTOS_THROUGHPUT,
            send_buffer_size: config.network.send_buffer_size,
            receive_buffer_size: config.network.receive_buffer_size,
            encryption_options: ENCRYPTION_NONE,
            bind_address: unspecified,
            local_address: unspecified,
            proxy_address: unspecified,
            listen: Listen::new(),
            listen_port: 0,
            listen_backlog: config.network.listen_backlog,
            enabled_protocols: PROTOCOL_HTTP | PROTOCOL_UDP,
            dht_active: Arc::new(AtomicBool::new(true)),
            block_ipv4: false,
            block_ipv6: false,
            prefer_ipv6: false,
            network_active,
            resolver,
            slot_filter: None,
        }
    }

    /// Number of sockets currently open.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Maximum number of open sockets.
    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    /// Sets the maximum number of open sockets.
    pub fn set_max_size(&mut self, max_size: u32) {
        self.max_size = max_size;
    }

    /// Whether a new connection fits under the socket limit.
    pub fn can_connect(&self) -> bool {
        self.size < self.max_size
    }

    /// Counts a newly opened socket.
    pub fn inc_socket_count(&mut self) {
        self.size += 1;
    }

    /// Counts a closed socket.
    pub fn dec_socket_count(&mut self) {
        self.size = self.size.saturating_sub(1);
    }

    /// Type-of-service priority applied to peer sockets.
    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Sets the type-of-service priority.
    pub fn set_priority(&mut self, priority: u32) {
        self.priority = priority;
    }

    /// Socket send buffer size, zero meaning the OS default.
    pub fn send_buffer_size(&self) -> u32 {
        self.send_buffer_size
    }

    /// Sets the socket send buffer size.
    pub fn set_send_buffer_size(&mut self, size: u32) {
        self.send_buffer_size = size;
    }

    /// Socket receive buffer size, zero meaning the OS default.
    pub fn receive_buffer_size(&self) -> u32 {
        self.receive_buffer_size
    }

    /// Sets the socket receive buffer size.
    pub fn set_receive_buffer_size(&mut self, size: u32) {
        self.receive_buffer_size = size;
    }

    /// Currently configured encryption option bits.
    pub fn encryption_options(&self) -> u32 {
        self.encryption_options
    }

    /// Sets the encryption option bits.
    ///
    /// # Errors
    /// - `SpindriftError::Unsupported` - built without the `encryption` feature
    pub fn set_encryption_options(&mut self, options: u32) -> Result<()> {
        if cfg!(feature = "encryption") {
            self.encryption_options = options;
            Ok(())
        } else {
            Err(SpindriftError::Unsupported {
                reason: "built without encryption support".to_string(),
            })
        }
    }

    /// Address outgoing sockets bind to.
    pub fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }

    /// Sets the address outgoing sockets bind to.
    ///
    /// # Errors
    /// - `SpindriftError::InvalidArgument` - `address` is not an IPv4 address
    pub fn set_bind_address(&mut self, address: SocketAddr) -> Result<()> {
        self.bind_address = require_ipv4(address, "bind")?;
        Ok(())
    }

    /// Address reported as the local endpoint.
    pub fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    /// Sets the address reported as the local endpoint.
    ///
    /// # Errors
    /// - `SpindriftError::InvalidArgument` - `address` is not an IPv4 address
    pub fn set_local_address(&mut self, address: SocketAddr) -> Result<()> {
        self.local_address = require_ipv4(address, "local")?;
        Ok(())
    }

    /// Proxy address outgoing connections are routed through.
    pub fn proxy_address(&self) -> SocketAddr {
        self.proxy_address
    }

    /// Sets the proxy address.
    ///
    /// # Errors
    /// - `SpindriftError::InvalidArgument` - `address` is not an IPv4 address
    pub fn set_proxy_address(&mut self, address: SocketAddr) -> Result<()> {
        self.proxy_address = require_ipv4(address, "proxy")?;
        Ok(())
    }

    /// Whether `variant`'s protocol is globally enabled.
    ///
    /// The DHT bit doubles as the DHT activity signal shared with DHT
    /// trackers at construction.
    pub fn protocol_enabled(&self, variant: TrackerVariant) -> bool {
        match variant {
            TrackerVariant::Http => self.enabled_protocols & PROTOCOL_HTTP != 0,
            TrackerVariant::Udp => self.enabled_protocols & PROTOCOL_UDP != 0,
            TrackerVariant::Dht => self.dht_active.load(Ordering::Relaxed),
        }
    }

    /// Enables or disables `variant`'s protocol globally.
    ///
    /// Flipping the DHT bit is observed live by existing DHT trackers;
    /// they become unusable and refuse new announces while it is off.
    pub fn set_protocol_enabled(&mut self, variant: TrackerVariant, enabled: bool) {
        let bit = match variant {
            TrackerVariant::Http => PROTOCOL_HTTP,
            TrackerVariant::Udp => PROTOCOL_UDP,
            TrackerVariant::Dht => {
                self.dht_active.store(enabled, Ordering::Relaxed);
                return;
            }
        };

        if enabled {
            self.enabled_protocols |= bit;
        } else {
            self.enabled_protocols &= !bit;
        }
    }

    /// Shared DHT activity signal, handed to DHT trackers at
    /// construction so deactivation reaches them without a list walk.
    pub fn dht_active(&self) -> &Arc<AtomicBool> {
        &self.dht_active
    }

    /// Whether the network is active; when false, name resolution is
    /// skipped and no exchanges should be started.
    pub fn network_active(&self) -> bool {
        self.network_active.load(Ordering::Relaxed)
    }

    /// Activates or deactivates the network.
    pub fn set_network_active(&mut self, active: bool) {
        self.network_active.store(active, Ordering::Relaxed);
    }

    /// Whether IPv4 peers are blocked.
    pub fn block_ipv4(&self) -> bool {
        self.block_ipv4
    }

    /// Blocks or unblocks IPv4 peers.
    pub fn set_block_ipv4(&mut self, block: bool) {
        self.block_ipv4 = block;
    }

    /// Whether IPv6 peers are blocked.
    pub fn block_ipv6(&self) -> bool {
        self.block_ipv6
    }

    /// Blocks or unblocks IPv6 peers.
    pub fn set_block_ipv6(&mut self, block: bool) {
        self.block_ipv6 = block;
    }

    /// Whether IPv6 addresses are preferred when both families resolve.
    pub fn prefer_ipv6(&self) -> bool {
        self.prefer_ipv6
    }

    /// Prefers or deprioritises IPv6 addresses.
    pub fn set_prefer_ipv6(&mut self, prefer: bool) {
        self.prefer_ipv6 = prefer;
    }

    /// Listen queue length.
    pub fn listen_backlog(&self) -> i32 {
        self.listen_backlog
    }

    /// Sets the listen queue length.
    ///
    /// # Errors
    /// - `SpindriftError::InvalidArgument` - value outside `[1, 65535]`, or
    ///   the listener is already open
    pub fn set_listen_backlog(&mut self, backlog: i32) -> Result<()> {
        if !(1..=i32::from(u16::MAX)).contains(&backlog) {
            return Err(SpindriftError::InvalidArgument {
                reason: format!("listen backlog {backlog} out of bounds"),
            });
        }
        if self.listen.is_open() {
            return Err(SpindriftError::InvalidArgument {
                reason: "listen backlog must be set before the listener opens".to_string(),
            });
        }

        self.listen_backlog = backlog;
        Ok(())
    }

    /// Opens the listener on the first free port in `first..=last`, using
    /// the configured backlog and bind address.
    ///
    /// Returns `false` when no port in the range could be bound.
    pub fn listen_open(&mut self, first: u16, last: u16) -> bool {
        if !self
            .listen
            .open(first, last, self.listen_backlog, self.bind_address)
        {
            return false;
        }

        self.listen_port = self.listen.port();
        true
    }

    /// Closes the listener.
    pub fn listen_close(&mut self) {
        self.listen.close();
        self.listen_port = 0;
    }

    /// Port the listener is bound to, zero when closed.
    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// Installs the peer-address filter.
    pub fn set_filter(&mut self, filter: impl Fn(&SocketAddr) -> u32 + Send + 'static) {
        self.slot_filter = Some(Box::new(filter));
    }

    /// Applies the peer-address filter; nonzero means accept.
    ///
    /// Without an installed filter every address is accepted.
    pub fn filter(&self, address: &SocketAddr) -> u32 {
        match &self.slot_filter {
            Some(filter) => filter(address),
            None => 1,
        }
    }

    /// The name-resolution service trackers call through.
    pub fn resolver(&self) -> &Arc<DnsResolver> {
        &self.resolver
    }

    /// Installs a custom nameserver, or reverts to the system resolver
    /// with `None`.
    ///
    /// # Errors
    /// - `SpindriftError::InvalidArgument` - `address` is not an IPv4 address
    pub fn dns_server_set(&mut self, address: Option<SocketAddr>) -> Result<()> {
        self.resolver.server_set(address)
    }
}

fn require_ipv4(address: SocketAddr, what: &str) -> Result<SocketAddr> {
    if address.is_ipv4() {
        Ok(address)
    } else {
        Err(SpindriftError::InvalidArgument {
            reason: format!("{what} address {address} is not an IPv4 address"),
        })
    }
}
