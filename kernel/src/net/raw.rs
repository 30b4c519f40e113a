//! Raw sockets (spec §4.8): "three families (IPv4, IPv6, packet) each
//! hold a list of open raw sockets. Every inbound packet matching the
//! protocol filter is cloned into each interested socket's per-socket
//! queue and the read wait-queue is signaled. Send paths for raw IPv4
//! frame the user-supplied packet, look up the egress interface by
//! destination, consult ARP for the next-hop MAC, and transmit (queueing
//! if unresolved)." Grounded on `original_source/kern/sock.c`'s
//! domain/type/protocol dispatch for the registration shape and
//! `net::arp::ArpTable` for the next-hop lookup this send path drives.

extern crate alloc;

use alloc::{collections::VecDeque, sync::Arc, vec::Vec};

use super::{
    arp::ArpTable,
    socket::{PollMask, ShutdownHow, Socket, SocketOps, SocketState},
    types::Ipv4Addr,
    NetworkInterface, SocketError,
};
use util::mutex::Mutex;

/// Families spec §4.8 names for the raw dispatch key: "Three families
/// (IPv4, IPv6, packet)".
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RawFamily {
    Inet,
    Inet6,
    Packet,
}

/// One open raw socket's delivery queue (spec §3 socket "opaque
/// per-family payload"). Bounded so a flooding peer can't grow it
/// without limit; a full queue drops the newest packet rather than
/// blocking the delivering interrupt path.
const QUEUE_CAP: usize = 256;

struct RawEndpoint {
    protocol: u16,
    socket: Arc<Socket>,
    queue: Mutex<VecDeque<Vec<u8>>>,
}

/// A family's list of open raw sockets plus, for IPv4, the ARP table its
/// send path consults (spec §4.8: "consult ARP for the next-hop MAC").
pub struct RawFamilyTable {
    family: RawFamily,
    endpoints: Mutex<Vec<Arc<RawEndpoint>>>,
    arp: ArpTable,
}

impl RawFamilyTable {
    pub const fn new(family: RawFamily) -> Self {
        Self {
            family,
            endpoints: Mutex::new(Vec::new()),
            arp: ArpTable::new(),
        }
    }

    pub fn family(&self) -> RawFamily {
        self.family
    }

    /// Opens a new raw socket on this family's table. Takes `self` as an
    /// `Arc` (rather than `&self`) because the socket's op-vtable must
    /// outlive the call and hold a `'static` handle back to the table it
    /// was opened on, the same pattern `Socket`'s own methods use.
    pub fn open(self: &Arc<Self>, protocol: u16) -> Arc<Socket> {
        let ops: Arc<dyn SocketOps> = Arc::new(RawSocketOps {
            table: self.clone(),
        });
        let domain = match self.family {
            RawFamily::Inet => super::Domain::Inet,
            RawFamily::Inet6 => super::Domain::Inet6,
            RawFamily::Packet => super::Domain::Packet,
        };
        let socket = Socket::new(domain, super::SocketType::Raw, protocol, ops);
        socket.set_state(SocketState::Connected);
        let endpoint = Arc::new(RawEndpoint {
            protocol,
            socket: socket.clone(),
            queue: Mutex::new(VecDeque::new()),
        });
        self.endpoints.lock().push(endpoint);
        socket
    }

    /// Delivery path (spec §4.8): clone `packet` into every endpoint whose
    /// protocol filter matches (`0` subscribes to every protocol, mirroring
    /// `SOCK_RAW` with `protocol == 0`), then signal each socket's read
    /// wait-queue. Packet order is preserved identically across every
    /// matching socket (spec §5 "delivered to multiple raw sockets arrive
    /// in the same order on each").
    pub fn deliver(&self, protocol: u16, packet: &[u8]) {
        let endpoints = self.endpoints.lock();
        for endpoint in endpoints.iter() {
            if endpoint.protocol != 0 && endpoint.protocol != protocol {
                continue;
            }
            let mut queue = endpoint.queue.lock();
            if queue.len() >= QUEUE_CAP {
                queue.pop_front();
            }
            queue.push_back(packet.to_vec());
            drop(queue);
            endpoint.socket.read_wq.signal();
        }
    }

    fn find_endpoint(&self, socket: &Socket) -> Option<Arc<RawEndpoint>> {
        self.endpoints
            .lock()
            .iter()
            .find(|e| core::ptr::eq(e.socket.as_ref(), socket))
            .cloned()
    }
}

struct RawSocketOps {
    table: Arc<RawFamilyTable>,
}

impl SocketOps for RawSocketOps {
    fn bind(&self, _sock: &Arc<Socket>, _addr: &[u8]) -> Result<(), SocketError> {
        Err(SocketError::NotSupported)
    }

    fn listen(&self, _sock: &Arc<Socket>, _backlog: usize) -> Result<(), SocketError> {
        Err(SocketError::NotSupported)
    }

    fn accept(&self, _sock: &Arc<Socket>) -> Result<Arc<Socket>, SocketError> {
        Err(SocketError::NotSupported)
    }

    fn connect(&self, _sock: &Arc<Socket>, _addr: &[u8]) -> Result<(), SocketError> {
        Err(SocketError::NotSupported)
    }

    fn send(&self, _sock: &Socket, _buf: &[u8]) -> Result<usize, SocketError> {
        if self.table.family != RawFamily::Inet {
            return Err(SocketError::NotSupported);
        }
        // No egress interface is registered at this layer (spec §1:
        // concrete device drivers are out of scope). `send_raw_ipv4`
        // below is the entry point callers with a concrete
        // `NetworkInterface` use instead.
        Err(SocketError::HostUnreachable)
    }

    fn recv(&self, sock: &Socket, buf: &mut [u8]) -> Result<usize, SocketError> {
        let endpoint = self
            .table
            .find_endpoint(sock)
            .ok_or(SocketError::NotConnected)?;
        let mut queue = endpoint.queue.lock();
        let packet = queue.pop_front().ok_or(SocketError::WouldBlock)?;
        let n = packet.len().min(buf.len());
        buf[..n].copy_from_slice(&packet[..n]);
        Ok(n)
    }

    fn shutdown(&self, _sock: &Socket, _how: ShutdownHow) -> Result<(), SocketError> {
        Ok(())
    }

    fn poll(&self, sock: &Socket) -> PollMask {
        match self.table.find_endpoint(sock) {
            Some(endpoint) if !endpoint.queue.lock().is_empty() => PollMask::POLLIN,
            _ => PollMask::empty(),
        }
    }
}

/// Frames `payload` as a raw IPv4 send (spec §4.8): looks up the egress
/// interface for `dst`, consults ARP for the next-hop MAC and transmits,
/// queueing on the entry if unresolved. Exposed standalone (rather than
/// folded into `RawSocketOps::send`) because the egress-interface lookup
/// is itself an external collaborator (spec §1's device-driver
/// boundary); callers that do have a concrete `NetworkInterface` drive
/// this directly.
pub fn send_raw_ipv4(
    table: &RawFamilyTable,
    iface: &dyn NetworkInterface,
    dst: Ipv4Addr,
    payload: &[u8],
) -> Result<(), SocketError> {
    // Destination MAC is left zeroed; `ArpTable::send` overwrites
    // `frame[0..6]` once it knows (or already knows) the next-hop MAC.
    let frame = super::types::build_ethernet_frame(
        super::types::MacAddr::ZERO,
        iface.mac_address(),
        super::types::ETHERTYPE_IPV4,
        payload,
    );
    table.arp.send(iface, dst, frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::types::MacAddr;

    struct FakeIface;
    impl NetworkInterface for FakeIface {
        fn mac_address(&self) -> MacAddr {
            MacAddr([1, 2, 3, 4, 5, 6])
        }
        fn ipv4_address(&self) -> Ipv4Addr {
            Ipv4Addr::new(192, 0, 2, 10)
        }
        fn transmit(&self, _frame: &[u8]) -> Result<(), SocketError> {
            Ok(())
        }
    }

    #[test]
    fn deliver_matches_zero_protocol_wildcard() {
        let table = Arc::new(RawFamilyTable::new(RawFamily::Packet));
        let sock = table.open(0);
        table.deliver(0x0800, &[1, 2, 3]);
        let mut buf = [0u8; 16];
        let n = sock.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
    }

    #[test]
    fn deliver_skips_non_matching_protocol() {
        let table = Arc::new(RawFamilyTable::new(RawFamily::Packet));
        let sock = table.open(0x0806);
        table.deliver(0x0800, &[9]);
        let mut buf = [0u8; 16];
        assert_eq!(sock.recv(&mut buf), Err(SocketError::WouldBlock));
    }

    #[test]
    fn queue_drops_oldest_when_full() {
        let table = Arc::new(RawFamilyTable::new(RawFamily::Packet));
        let sock = table.open(0);
        for i in 0..QUEUE_CAP + 10 {
            table.deliver(0, &[i as u8]);
        }
        let mut buf = [0u8; 4];
        let n = sock.recv(&mut buf).unwrap();
        assert_eq!(buf[..n][0], 10u8);
    }

    #[test]
    fn send_raw_ipv4_queues_when_unresolved() {
        let table = RawFamilyTable::new(RawFamily::Inet);
        let iface = FakeIface;
        let ret = send_raw_ipv4(&table, &iface, Ipv4Addr::new(192, 0, 2, 1), &[1, 2, 3]);
        assert!(ret.is_ok());
    }
}
