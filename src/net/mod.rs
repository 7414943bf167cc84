//! Global network policy and the name-resolution service.
//!
//! The connection manager holds the session-wide socket and protocol
//! policy; the resolver it owns is the hook tracker implementations call
//! to turn hostnames into addresses.

pub mod connection;
pub mod dns;
pub mod listen;

pub use connection::{ConnectionManager, FilterSlot};
pub use dns::{AddressFamily, DnsResolver, ResolveError, ResolveOutcome, SocketType};
pub use listen::Listen;
