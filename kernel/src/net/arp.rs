//! The ARP resolution state machine (spec §3, §4.8, §8 scenario 4):
//! "for each destination IPv4 address, an entry records state. On send
//! with `state == RESOLVED`, the packet is framed with the cached MAC.
//! On `UNKNOWN`, the packet is enqueued on the entry, state moves to
//! `RESOLVING`, and a broadcast ARP request is emitted." Grounded on
//! `brianmayclone-anyos/kernel/src/net/arp.rs` for the wire-format
//! constants (hardware type 1, protocol 0x0800, opcodes 1/2) and packet
//! layout, re-expressed with a pending-packet queue and wait-queue model
//! instead of anyos's busy-poll `resolve()` loop (REDESIGN per spec
//! §4.8: "packet is enqueued on the entry" requires a queue, not a
//! spin-poll).

use super::types::{build_ethernet_frame, MacAddr, Ipv4Addr, ETHERTYPE_ARP};
use super::{NetworkInterface, SocketError};
use alloc::{collections::BTreeMap, vec::Vec};
use util::mutex::Mutex;

const ARP_HW_ETHERNET: u16 = 1;
const ARP_PROTO_IPV4: u16 = 0x0800;
const ARP_OP_REQUEST: u16 = 1;
const ARP_OP_REPLY: u16 = 2;
const ARP_PACKET_LEN: usize = 28;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ArpState {
    Unknown,
    Resolving,
    Resolved(MacAddr),
}

struct ArpEntry {
    state: ArpState,
    /// Fully Ethernet-framed packets with the destination MAC left zeroed,
    /// patched in and transmitted once resolution completes (spec §3
    /// "a pending-packet list awaiting resolution").
    pending: Vec<Vec<u8>>,
}

/// One resolver per interface: every destination IPv4 address this
/// interface has ever sent to gets exactly one entry (spec §3 invariant:
/// "a RESOLVED entry has no queued packets; a RESOLVING entry's MAC has
/// not been observed from a different source").
pub struct ArpTable {
    entries: Mutex<BTreeMap<u32, ArpEntry>>,
}

impl ArpTable {
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Sends `frame` (already Ethernet-framed with a zeroed destination
    /// MAC) to `dst_ip` over `iface`, resolving first if necessary.
    pub fn send(
        &self,
        iface: &dyn NetworkInterface,
        dst_ip: Ipv4Addr,
        mut frame: Vec<u8>,
    ) -> Result<(), SocketError> {
        if dst_ip == Ipv4Addr::BROADCAST {
            frame[0..6].copy_from_slice(&MacAddr::BROADCAST.0);
            return iface.transmit(&frame);
        }

        let mut entries = self.entries.lock();
        let entry = entries.entry(dst_ip.to_u32()).or_insert(ArpEntry {
            state: ArpState::Unknown,
            pending: Vec::new(),
        });

        match entry.state {
            ArpState::Resolved(mac) => {
                frame[0..6].copy_from_slice(&mac.0);
                drop(entries);
                iface.transmit(&frame)
            }
            ArpState::Resolving => {
                entry.pending.push(frame);
                Ok(())
            }
            ArpState::Unknown => {
                entry.state = ArpState::Resolving;
                entry.pending.push(frame);
                drop(entries);
                self.send_request(iface, dst_ip)
            }
        }
    }

    fn send_request(&self, iface: &dyn NetworkInterface, target_ip: Ipv4Addr) -> Result<(), SocketError> {
        let packet = build_arp_packet(
            ARP_OP_REQUEST,
            iface.mac_address(),
            iface.ipv4_address(),
            MacAddr::ZERO,
            target_ip,
        );
        let frame = build_ethernet_frame(MacAddr::BROADCAST, iface.mac_address(), ETHERTYPE_ARP, &packet);
        iface.transmit(&frame)
    }

    /// Handles an inbound ARP frame: always learns the sender for
    /// requests, applies the spoof guard for replies to an already
    /// resolved entry, and flushes any pending packets once an entry
    /// resolves (spec §8 scenario 4).
    pub fn handle_incoming(&self, iface: &dyn NetworkInterface, data: &[u8]) -> Result<(), SocketError> {
        let Some((op, sender_mac, sender_ip, target_ip)) = parse_arp_packet(data) else {
            return Ok(());
        };

        if op == ARP_OP_REQUEST {
            if target_ip == iface.ipv4_address() {
                let reply = build_arp_packet(ARP_OP_REPLY, iface.mac_address(), iface.ipv4_address(), sender_mac, sender_ip);
                let frame = build_ethernet_frame(sender_mac, iface.mac_address(), ETHERTYPE_ARP, &reply);
                iface.transmit(&frame)?;
            }
            // Learn the requester too; it's often about to be our peer.
            self.resolve_with(iface, sender_ip, sender_mac)?;
        } else if op == ARP_OP_REPLY {
            self.resolve_with(iface, sender_ip, sender_mac)?;
        }
        Ok(())
    }

    fn resolve_with(&self, iface: &dyn NetworkInterface, ip: Ipv4Addr, mac: MacAddr) -> Result<(), SocketError> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(ip.to_u32()).or_insert(ArpEntry {
            state: ArpState::Unknown,
            pending: Vec::new(),
        });

        if let ArpState::Resolved(existing) = entry.state {
            if existing != mac {
                // Spoof guard (spec §4.8, §8 ARP invariant): reject a
                // reply whose claimed MAC differs from an already
                // resolved entry.
                return Err(SocketError::AddressInUse);
            }
            return Ok(());
        }

        entry.state = ArpState::Resolved(mac);
        let pending = core::mem::take(&mut entry.pending);
        drop(entries);

        for mut frame in pending {
            frame[0..6].copy_from_slice(&mac.0);
            iface.transmit(&frame)?;
        }
        Ok(())
    }

    pub fn state_of(&self, ip: Ipv4Addr) -> ArpState {
        self.entries
            .lock()
            .get(&ip.to_u32())
            .map(|e| e.state)
            .unwrap_or(ArpState::Unknown)
    }

    pub fn pending_count(&self, ip: Ipv4Addr) -> usize {
        self.entries.lock().get(&ip.to_u32()).map(|e| e.pending.len()).unwrap_or(0)
    }
}

fn build_arp_packet(op: u16, sender_mac: MacAddr, sender_ip: Ipv4Addr, target_mac: MacAddr, target_ip: Ipv4Addr) -> [u8; ARP_PACKET_LEN] {
    let mut packet = [0u8; ARP_PACKET_LEN];
    packet[0..2].copy_from_slice(&ARP_HW_ETHERNET.to_be_bytes());
    packet[2..4].copy_from_slice(&ARP_PROTO_IPV4.to_be_bytes());
    packet[4] = 6;
    packet[5] = 4;
    packet[6..8].copy_from_slice(&op.to_be_bytes());
    packet[8..14].copy_from_slice(&sender_mac.0);
    packet[14..18].copy_from_slice(&sender_ip.0);
    packet[18..24].copy_from_slice(&target_mac.0);
    packet[24..28].copy_from_slice(&target_ip.0);
    packet
}

fn parse_arp_packet(data: &[u8]) -> Option<(u16, MacAddr, Ipv4Addr, Ipv4Addr)> {
    if data.len() < ARP_PACKET_LEN {
        return None;
    }
    let hw_type = u16::from_be_bytes([data[0], data[1]]);
    let proto = u16::from_be_bytes([data[2], data[3]]);
    if hw_type != ARP_HW_ETHERNET || proto != ARP_PROTO_IPV4 {
        return None;
    }
    let op = u16::from_be_bytes([data[6], data[7]]);
    let sender_mac = MacAddr([data[8], data[9], data[10], data[11], data[12], data[13]]);
    let sender_ip = Ipv4Addr([data[14], data[15], data[16], data[17]]);
    let target_ip = Ipv4Addr([data[24], data[25], data[26], data[27]]);
    Some((op, sender_mac, sender_ip, target_ip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::{sync::Arc, vec::Vec};

    struct FakeInterface {
        mac: MacAddr,
        ip: Ipv4Addr,
        transmitted: Mutex<Vec<Vec<u8>>>,
    }

    impl NetworkInterface for FakeInterface {
        fn mac_address(&self) -> MacAddr {
            self.mac
        }
        fn ipv4_address(&self) -> Ipv4Addr {
            self.ip
        }
        fn transmit(&self, frame: &[u8]) -> Result<(), SocketError> {
            self.transmitted.lock().push(frame.to_vec());
            Ok(())
        }
    }

    #[test]
    fn resolve_then_flush_queued_packet() {
        let iface = Arc::new(FakeInterface {
            mac: MacAddr([0, 1, 2, 3, 4, 5]),
            ip: Ipv4Addr::new(192, 0, 2, 2),
            transmitted: Mutex::new(Vec::new()),
        });
        let table = ArpTable::new();
        let dst = Ipv4Addr::new(192, 0, 2, 1);

        let mut queued_frame = alloc::vec![0u8; 20];
        queued_frame[6..12].copy_from_slice(&iface.mac.0);
        table.send(iface.as_ref(), dst, queued_frame).unwrap();

        assert_eq!(table.state_of(dst), ArpState::Resolving);
        assert_eq!(table.pending_count(dst), 1);
        // One broadcast ARP request should have gone out.
        assert_eq!(iface.transmitted.lock().len(), 1);

        let reply_mac = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let reply = build_arp_packet(ARP_OP_REPLY, reply_mac, dst, iface.mac, iface.ip);
        table.handle_incoming(iface.as_ref(), &reply).unwrap();

        assert_eq!(table.state_of(dst), ArpState::Resolved(reply_mac));
        assert_eq!(table.pending_count(dst), 0);
        let frames = iface.transmitted.lock();
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[1][0..6], &reply_mac.0);
    }

    #[test]
    fn spoofed_reply_to_resolved_entry_is_rejected() {
        let iface = Arc::new(FakeInterface {
            mac: MacAddr([0, 1, 2, 3, 4, 5]),
            ip: Ipv4Addr::new(192, 0, 2, 2),
            transmitted: Mutex::new(Vec::new()),
        });
        let table = ArpTable::new();
        let dst = Ipv4Addr::new(192, 0, 2, 1);
        let real_mac = MacAddr([1, 1, 1, 1, 1, 1]);
        table.resolve_with(iface.as_ref(), dst, real_mac).unwrap();

        let spoofed_mac = MacAddr([2, 2, 2, 2, 2, 2]);
        let err = table.resolve_with(iface.as_ref(), dst, spoofed_mac).unwrap_err();
        assert_eq!(err, SocketError::AddressInUse);
        assert_eq!(table.state_of(dst), ArpState::Resolved(real_mac));
    }
}
