//! Synchronous hostname resolution with per-host caching.
//!
//! Two mutually exclusive strategies: the OS resolver (`getaddrinfo` via
//! `ToSocketAddrs`) and a direct A-record query against a configured
//! nameserver. Successful and failed lookups are both memoised until
//! [`DnsResolver::cache_clear`], so a broken nameserver is asked once per
//! host instead of being stormed.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::DnsConfig;
use crate::sync::GlobalLock;
use crate::{Result, SpindriftError};

const RR_TYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;

/// Address family requested for a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// Any family; the first address returned wins.
    Any,
    /// IPv4 only.
    Ipv4,
    /// IPv6 only.
    Ipv6,
}

/// Socket type the resolved address will be used with.
///
/// Part of the cache key so stream and datagram lookups are memoised
/// independently, mirroring the `getaddrinfo` hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketType {
    /// TCP-style stream sockets.
    Stream,
    /// UDP-style datagram sockets.
    Datagram,
}

/// Resolution failures, memoised alongside successes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The OS resolver reported an error.
    #[error("lookup failed: {message}")]
    Lookup {
        /// OS error code when one was available, zero otherwise
        code: i32,
        /// Human-readable description of the failure
        message: String,
    },

    /// The lookup succeeded but returned no address of the requested family.
    #[error("no address record for the requested family")]
    NoRecord,

    /// The nameserver answered with a nonzero response code.
    #[error("nameserver returned rcode {rcode}")]
    ServerFailure {
        /// DNS RCODE from the response header
        rcode: u8,
    },

    /// The nameserver response could not be parsed.
    #[error("malformed nameserver response")]
    MalformedResponse,

    /// The custom strategy resolves IPv4 A records only.
    #[error("custom nameserver strategy supports IPv4 only")]
    UnsupportedFamily,

    /// The query socket failed or timed out.
    #[error("nameserver query failed: {message}")]
    Network {
        /// Human-readable description of the socket failure
        message: String,
    },
}

/// Outcome of a lookup, as cached and as handed to resolve callbacks.
pub type ResolveOutcome = std::result::Result<SocketAddr, ResolveError>;

type CacheKey = (String, AddressFamily, SocketType);

/// Synchronous resolver shared by every tracker of a connection manager.
///
/// The resolver holds no reference to tracker state; callers invoke it
/// under the global coordination lock, and the system strategy releases
/// that lock for the duration of the blocking OS call, reacquiring it
/// before touching the cache.
pub struct DnsResolver {
    cache: Mutex<HashMap<CacheKey, ResolveOutcome>>,
    server: Mutex<Option<SocketAddrV4>>,
    enabled: AtomicBool,
    network_active: Arc<AtomicBool>,
    lock: Option<Arc<GlobalLock>>,
    config: DnsConfig,
}

impl DnsResolver {
    /// Creates a resolver using the system strategy.
    ///
    /// `network_active` is shared with the owning connection manager; while
    /// it is false every [`DnsResolver::resolve`] call is skipped. `lock`,
    /// when present, is released around blocking system lookups made on the
    /// coordination thread.
    pub fn new(
        config: DnsConfig,
        network_active: Arc<AtomicBool>,
        lock: Option<Arc<GlobalLock>>,
    ) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            server: Mutex::new(None),
            enabled: AtomicBool::new(true),
            network_active,
            lock,
            config,
        }
    }

    /// Enables or disables the DNS subsystem.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Selects the resolution strategy.
    ///
    /// `Some(address)` installs `address` as the nameserver for the custom
    /// strategy; a zero port defaults to the configured port (53). `None`
    /// reverts to the system strategy.
    ///
    /// # Errors
    /// - `SpindriftError::InvalidArgument` - `address` is not an IPv4 address
    ///
    /// # Panics
    /// Panics if an internal mutex is poisoned.
    pub fn server_set(&self, address: Option<SocketAddr>) -> Result<()> {
        let server = match address {
            None => None,
            Some(SocketAddr::V4(v4)) => {
                let port = if v4.port() == 0 {
                    self.config.default_port
                } else {
                    v4.port()
                };
                Some(SocketAddrV4::new(*v4.ip(), port))
            }
            Some(other) => {
                return Err(SpindriftError::InvalidArgument {
                    reason: format!("custom dns server {other} is not an IPv4 address"),
                });
            }
        };

        match server {
            Some(server) => tracing::info!("custom nameserver set to {server}"),
            None => tracing::info!("reverting to the system resolver"),
        }
        *self.server.lock().expect("dns strategy poisoned") = server;
        Ok(())
    }

    /// Empties the cache.
    ///
    /// # Panics
    /// Panics if an internal mutex is poisoned.
    pub fn cache_clear(&self) {
        tracing::debug!("clearing dns cache");
        self.cache.lock().expect("dns cache poisoned").clear();
    }

    /// Resolves `host`, invoking `callback` synchronously with the outcome.
    ///
    /// Returns `false` without invoking the callback when the DNS subsystem
    /// is disabled or the network is inactive. Otherwise the outcome, taken
    /// from the cache when present and from a live lookup otherwise, is
    /// handed to the callback and `true` is returned. Failures are memoised
    /// exactly like successes, so repeated lookups of a dead host return
    /// immediately with the same error until [`DnsResolver::cache_clear`].
    ///
    /// # Panics
    /// Panics if an internal mutex is poisoned, or on an A record whose
    /// RDLENGTH is not four bytes.
    pub fn resolve(
        &self,
        host: &str,
        family: AddressFamily,
        socket_type: SocketType,
        callback: impl FnOnce(ResolveOutcome),
    ) -> bool {
        if !self.is_on() {
            tracing::debug!("dns resolve skipped for {host}");
            return false;
        }

        let key = (host.to_string(), family, socket_type);
        let cached = self
            .cache
            .lock()
            .expect("dns cache poisoned")
            .get(&key)
            .cloned();
        if let Some(outcome) = cached {
            tracing::debug!("dns cache hit for {host}");
            callback(outcome);
            return true;
        }

        tracing::debug!("querying nameserver for {host}");
        let server = *self.server.lock().expect("dns strategy poisoned");
        let outcome = match server {
            None => self.resolve_host_system(host, family),
            Some(server) => self.resolve_host_custom(host, family, server),
        };

        tracing::debug!(
            "nameserver result for {host}: {}",
            if outcome.is_ok() { "ok" } else { "failed" }
        );
        self.cache
            .lock()
            .expect("dns cache poisoned")
            .insert(key, outcome.clone());
        callback(outcome);
        true
    }

    fn is_on(&self) -> bool {
        self.network_active.load(Ordering::Relaxed) && self.enabled.load(Ordering::Relaxed)
    }

    fn resolve_host_system(&self, host: &str, family: AddressFamily) -> ResolveOutcome {
        let yield_lock = self
            .lock
            .as_deref()
            .filter(|lock| lock.is_coordination_thread());

        if let Some(lock) = yield_lock {
            lock.release();
        }

        // Blocking getaddrinfo. Nothing here touches resolver state until
        // the lock is back.
        let looked_up = (host, 0u16).to_socket_addrs();

        if let Some(lock) = yield_lock {
            lock.acquire();
        }

        let addresses = match looked_up {
            Ok(addresses) => addresses,
            Err(error) => {
                return Err(ResolveError::Lookup {
                    code: error.raw_os_error().unwrap_or(0),
                    message: error.to_string(),
                });
            }
        };

        addresses
            .into_iter()
            .find(|address| family_matches(family, address))
            .ok_or(ResolveError::NoRecord)
    }

    fn resolve_host_custom(
        &self,
        host: &str,
        family: AddressFamily,
        server: SocketAddrV4,
    ) -> ResolveOutcome {
        if family == AddressFamily::Ipv6 {
            // AAAA is not implemented; the custom strategy speaks A records only.
            return Err(ResolveError::UnsupportedFamily);
        }

        let query_id: u16 = rand::random();
        let query = build_a_query(query_id, host)?;

        let network = |error: std::io::Error| ResolveError::Network {
            message: error.to_string(),
        };

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(network)?;
        socket
            .set_read_timeout(Some(self.config.query_timeout))
            .map_err(network)?;
        socket.connect(server).map_err(network)?;
        socket.send(&query).map_err(network)?;

        let mut response = [0u8; 512];
        let length = socket.recv(&mut response).map_err(network)?;

        parse_a_response(query_id, &response[..length])
    }

    #[cfg(test)]
    pub(crate) fn custom_server(&self) -> Option<SocketAddrV4> {
        *self.server.lock().unwrap()
    }
}

fn family_matches(family: AddressFamily, address: &SocketAddr) -> bool {
    match family {
        AddressFamily::Any => true,
        AddressFamily::Ipv4 => address.is_ipv4(),
        AddressFamily::Ipv6 => address.is_ipv6(),
    }
}

/// Encodes an RFC 1035 A query for `host` with recursion desired.
fn build_a_query(id: u16, host: &str) -> std::result::Result<Vec<u8>, ResolveError> {
    let mut packet = Vec::with_capacity(18 + host.len());
    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&0x0100u16.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes());
    packet.extend_from_slice(&[0; 6]);

    for label in host.trim_end_matches('.').split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(ResolveError::Lookup {
                code: 0,
                message: format!("{host} is not encodable as a dns name"),
            });
        }
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);

    packet.extend_from_slice(&RR_TYPE_A.to_be_bytes());
    packet.extend_from_slice(&CLASS_IN.to_be_bytes());
    Ok(packet)
}

/// Parses a nameserver response, returning the first A record.
///
/// # Panics
/// Panics on an A record whose RDLENGTH is not four bytes; the response
/// violates the record format itself rather than merely being truncated.
fn parse_a_response(id: u16, response: &[u8]) -> ResolveOutcome {
    let read_u16 = |at: usize| {
        response
            .get(at..at + 2)
            .map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
            .ok_or(ResolveError::MalformedResponse)
    };

    if read_u16(0)? != id {
        return Err(ResolveError::MalformedResponse);
    }

    let rcode = (read_u16(2)? & 0x000f) as u8;
    if rcode != 0 {
        return Err(ResolveError::ServerFailure { rcode });
    }

    let question_count = read_u16(4)?;
    let answer_count = read_u16(6)?;

    let mut at = 12;
    for _ in 0..question_count {
        at = skip_name(response, at)?;
        at += 4; // qtype + qclass
    }

    for _ in 0..answer_count {
        at = skip_name(response, at)?;
        let rr_type = read_u16(at)?;
        let rdlength = read_u16(at + 8)? as usize;
        let rdata = at + 10;

        if rr_type == RR_TYPE_A {
            assert!(
                rdlength == 4,
                "A record with rdlength {rdlength} in nameserver response"
            );
            let octets = response
                .get(rdata..rdata + 4)
                .ok_or(ResolveError::MalformedResponse)?;
            let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
            return Ok(SocketAddr::V4(SocketAddrV4::new(ip, 0)));
        }

        at = rdata + rdlength;
    }

    Err(ResolveError::NoRecord)
}

/// Advances past an encoded name, treating a compression pointer as
/// terminating it.
fn skip_name(response: &[u8], mut at: usize) -> std::result::Result<usize, ResolveError> {
    loop {
        let length = *response.get(at).ok_or(ResolveError::MalformedResponse)? as usize;
        if length == 0 {
            return Ok(at + 1);
        }
        if length & 0xc0 == 0xc0 {
            return Ok(at + 2);
        }
        at += 1 + length;
    }
}
