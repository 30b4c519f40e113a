//! Socket layer and ARP/IP transmit path (spec §4.8): the socket
//! polymorphism, the ARP resolution state machine with pending-packet
//! queueing, and raw-socket packet delivery. New module — grounded on
//! `original_source/kern/sock.c` for the domain/type/protocol dispatch
//! table and the common `file_op`-style vtable forwarding read/write to
//! recv/send, and on `brianmayclone-anyos/kernel/src/net/arp.rs` for the
//! ARP wire format.

pub mod arp;
pub mod local;
pub mod raw;
pub mod socket;
pub mod types;

pub use arp::ArpTable;
pub use raw::{send_raw_ipv4, RawFamily, RawFamilyTable};
pub use socket::{PollMask, ShutdownHow, Socket, SocketOps, SocketState};
pub use types::{Ipv4Addr, MacAddr};

use bitflags::bitflags;
use core::fmt;

/// Socket-layer error kinds (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketError {
    AddressInUse,
    ConnectionRefused,
    NotConnected,
    AlreadyConnected,
    WouldBlock,
    Busy,
    InvalidArgument,
    NotSupported,
    BrokenPipe,
    NoBufferSpace,
    HostUnreachable,
    /// A blocking `connect` ended because a signal was delivered to the
    /// caller rather than because the peer accepted (spec §5 "-EINTR when
    /// a signal is pending").
    Interrupted,
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            SocketError::AddressInUse => "address already in use",
            SocketError::ConnectionRefused => "connection refused",
            SocketError::NotConnected => "socket is not connected",
            SocketError::AlreadyConnected => "socket is already connected",
            SocketError::WouldBlock => "resource temporarily unavailable",
            SocketError::Busy => "resource busy",
            SocketError::InvalidArgument => "invalid argument",
            SocketError::NotSupported => "operation not supported",
            SocketError::BrokenPipe => "broken pipe",
            SocketError::NoBufferSpace => "no buffer space available",
            SocketError::HostUnreachable => "no route to host",
            SocketError::Interrupted => "interrupted by a signal",
        };
        write!(f, "{}", msg)
    }
}

impl core::error::Error for SocketError {}

impl From<SocketError> for crate::error::Errno {
    fn from(e: SocketError) -> Self {
        match e {
            SocketError::AddressInUse => crate::error::Errno::AddressInUse,
            SocketError::ConnectionRefused => crate::error::Errno::ConnectionRefused,
            SocketError::NotConnected | SocketError::AlreadyConnected => crate::error::Errno::InvalidArgument,
            SocketError::WouldBlock => crate::error::Errno::WouldBlock,
            SocketError::Busy => crate::error::Errno::Busy,
            SocketError::InvalidArgument => crate::error::Errno::InvalidArgument,
            SocketError::NotSupported => crate::error::Errno::NotSupported,
            SocketError::BrokenPipe => crate::error::Errno::BrokenPipe,
            SocketError::NoBufferSpace => crate::error::Errno::OutOfMemory,
            SocketError::HostUnreachable => crate::error::Errno::NoSuchDevice,
            SocketError::Interrupted => crate::error::Errno::Interrupted,
        }
    }
}

/// `(domain, type, protocol)` selects an implementation module (spec
/// §4.8); only local-stream and raw are specified here, the rest are
/// named for completeness of the dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Local,
    Inet,
    Inet6,
    Packet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Stream,
    Datagram,
    Raw,
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct PollMask: u8 {
        const POLLIN = 0b0001;
        const POLLOUT = 0b0010;
        const POLLHUP = 0b0100;
        const POLLERR = 0b1000;
    }
}

/// The abstract egress network device a raw IPv4 socket's send path needs
/// (spec §4.8 "look up the egress interface by destination, consult ARP
/// for the next-hop MAC, and transmit"). Concrete device drivers (ne2k,
/// ...) are out of scope (spec §1); this is the interface they implement.
pub trait NetworkInterface: Send + Sync {
    fn mac_address(&self) -> MacAddr;
    fn ipv4_address(&self) -> Ipv4Addr;
    fn transmit(&self, frame: &[u8]) -> Result<(), SocketError>;
}
