//! UDP tracker backend, contract level.

use std::net::SocketAddr;
use std::sync::Arc;

use url::Url;

use crate::net::dns::{AddressFamily, DnsResolver, SocketType};
use crate::tracker::types::{Dispatch, RequestState};

/// Exchange state for `udp://` trackers.
///
/// The tracker host is resolved through the connection manager's resolver
/// hook when an exchange starts; the BEP 15 wire protocol itself is
/// driven by an external engine.
pub(crate) struct UdpBackend {
    resolver: Arc<DnsResolver>,
    endpoint: Option<(String, u16)>,
    resolved: Option<SocketAddr>,
    state: RequestState,
}

impl UdpBackend {
    pub(crate) fn new(url: &str, resolver: Arc<DnsResolver>) -> Self {
        let endpoint = Url::parse(url).ok().and_then(|parsed| {
            let host = parsed.host_str()?.to_string();
            Some((host, parsed.port()?))
        });

        Self {
            resolver,
            endpoint,
            resolved: None,
            state: RequestState::Idle,
        }
    }

    /// The URL carried a parseable host and port.
    pub(crate) fn is_usable(&self) -> bool {
        self.endpoint.is_some()
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.state != RequestState::Idle
    }

    pub(crate) fn is_busy_not_scrape(&self) -> bool {
        self.state == RequestState::Announcing
    }

    /// Tracker address from the last resolution, for the wire engine.
    pub(crate) fn resolved_address(&self) -> Option<SocketAddr> {
        self.resolved
    }

    pub(crate) fn start_announce(&mut self) -> Dispatch {
        match self.resolve_endpoint() {
            Ok(address) => {
                self.resolved = Some(address);
                self.state = RequestState::Announcing;
                Dispatch::Started
            }
            Err(message) => Dispatch::Failed(message),
        }
    }

    pub(crate) fn start_scrape(&mut self) -> Dispatch {
        match self.resolve_endpoint() {
            Ok(address) => {
                self.resolved = Some(address);
                self.state = RequestState::Scraping;
                Dispatch::Started
            }
            Err(message) => Dispatch::Failed(message),
        }
    }

    pub(crate) fn close(&mut self) {
        self.state = RequestState::Idle;
    }

    fn resolve_endpoint(&self) -> Result<SocketAddr, String> {
        let Some((host, port)) = self.endpoint.clone() else {
            return Err("could not parse udp tracker hostname or port".to_string());
        };

        let mut outcome = None;
        let attempted = self.resolver.resolve(
            &host,
            AddressFamily::Ipv4,
            SocketType::Datagram,
            |result| outcome = Some(result),
        );

        if !attempted {
            return Err("name resolution is inactive".to_string());
        }

        match outcome {
            Some(Ok(address)) => Ok(SocketAddr::new(address.ip(), port)),
            Some(Err(error)) => Err(format!("could not resolve hostname {host}: {error}")),
            None => Err("name resolution produced no result".to_string()),
        }
    }
}
