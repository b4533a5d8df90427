//! Address resolution: the neighbour cache and the ARP request/reply traffic
//! that keeps it warm.

use netdev::{EtherType, MacAddress, NetDevice, TransmitError};

use crate::eth::{write_eth_header, ETH_HEADER_LEN};
use crate::types::{ip_at, mac_at, Ipv4Addr};
use crate::wire;
use crate::NetStack;

/// Slots in the cache. Entries are never aged out; once the table is full
/// only the last slot turns over.
pub const ARP_TABLE_SIZE: usize = 10;

pub(crate) const ARP_PACKET_LEN: usize = 28;

// Constants copied verbatim onto the wire, network byte order baked in.
const HTYPE_ETHERNET: [u8; 2] = [0x00, 0x01];
const PTYPE_IPV4: [u8; 2] = [0x08, 0x00];
const HLEN_ETHERNET: u8 = 6;
const PLEN_IPV4: u8 = 4;

const OPCODE_REQUEST: u16 = 1;
const OPCODE_REPLY: u16 = 2;

/// One resolved neighbour.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub mac: MacAddress,
}

/// A small ordered set of (IP, MAC) mappings with most-recently-used
/// promotion.
///
/// `tail` counts the slots known to hold valid entries; the slot at `tail`
/// is additionally the target of the most recent write once the table has
/// filled up. Slots beyond that are indeterminate.
pub struct ArpCache {
    entries: [ArpEntry; ARP_TABLE_SIZE],
    tail: usize,
    cache_full: u32,
}

impl ArpCache {
    pub fn new() -> Self {
        ArpCache {
            entries: [ArpEntry::default(); ARP_TABLE_SIZE],
            tail: 0,
            cache_full: 0,
        }
    }

    /// Insert a mapping, deduplicating on MAC: a neighbour that changed its
    /// address is updated in place rather than duplicated.
    ///
    /// The dedup scan runs through slot `tail` inclusive, so it can see the
    /// most recent write before `tail` has moved past it; re-inserting that
    /// entry updates it in place.
    pub fn insert(&mut self, entry: ArpEntry) {
        for i in 0..=self.tail {
            if self.entries[i].mac == entry.mac {
                self.entries[i] = entry;
                return;
            }
        }

        self.entries[self.tail] = entry;
        if self.tail < ARP_TABLE_SIZE - 1 {
            self.tail += 1;
        } else {
            self.cache_full += 1;
        }
    }

    /// Look `ip` up, promoting a hit one slot toward the front.
    pub fn lookup(&mut self, ip: Ipv4Addr) -> Option<MacAddress> {
        let found = (0..=self.tail).find(|&i| self.entries[i].ip == ip)?;

        let slot = if found > 0 {
            self.entries.swap(found, found - 1);
            found - 1
        } else {
            found
        };
        Some(self.entries[slot].mac)
    }

    /// Number of slots known to hold valid entries.
    pub fn tail(&self) -> usize {
        self.tail
    }

    /// How many inserts have landed on a full table. Once nonzero, only the
    /// last slot is turning over and resolution of new neighbours degrades.
    pub fn cache_full(&self) -> u32 {
        self.cache_full
    }

    /// The backing slots; indices at and beyond [`ArpCache::tail`] may hold
    /// stale data.
    pub fn entries(&self) -> &[ArpEntry] {
        &self.entries
    }
}

impl Default for ArpCache {
    fn default() -> Self {
        ArpCache::new()
    }
}

/// View of the 28-byte ARP packet behind the Ethernet header.
struct ArpPacket<'a> {
    buf: &'a [u8],
}

impl<'a> ArpPacket<'a> {
    fn parse(buf: &'a [u8]) -> Option<Self> {
        (buf.len() >= ARP_PACKET_LEN).then_some(ArpPacket { buf })
    }

    fn opcode(&self) -> u16 {
        wire::read_u16(self.buf, 6)
    }

    fn sender_mac(&self) -> MacAddress {
        mac_at(self.buf, 8)
    }

    fn sender_ip(&self) -> Ipv4Addr {
        ip_at(self.buf, 14)
    }

    fn target_ip(&self) -> Ipv4Addr {
        ip_at(self.buf, 24)
    }
}

fn write_arp_packet(
    buf: &mut [u8],
    opcode: u16,
    sender_mac: MacAddress,
    sender_ip: Ipv4Addr,
    target_mac: MacAddress,
    target_ip: Ipv4Addr,
) {
    buf[0..2].copy_from_slice(&HTYPE_ETHERNET);
    buf[2..4].copy_from_slice(&PTYPE_IPV4);
    buf[4] = HLEN_ETHERNET;
    buf[5] = PLEN_IPV4;
    wire::write_u16(buf, 6, opcode);
    buf[8..14].copy_from_slice(&sender_mac.octets());
    buf[14..18].copy_from_slice(&sender_ip.octets());
    buf[18..24].copy_from_slice(&target_mac.octets());
    buf[24..28].copy_from_slice(&target_ip.octets());
}

impl<D: NetDevice> NetStack<D> {
    /// Inbound ARP traffic: answer requests aimed at our address, learn from
    /// replies.
    pub(crate) fn handle_arp(&mut self, payload: &[u8]) -> Result<(), TransmitError> {
        let Some(arp) = ArpPacket::parse(payload) else {
            return Ok(());
        };

        match arp.opcode() {
            OPCODE_REQUEST => {
                if arp.target_ip() == self.ip {
                    // Answer, but do not learn the requester here; the cache
                    // only fills from replies.
                    self.send_arp_reply(arp.sender_ip(), arp.sender_mac())?;
                }
            }
            OPCODE_REPLY => {
                self.arp.insert(ArpEntry {
                    ip: arp.sender_ip(),
                    mac: arp.sender_mac(),
                });
            }
            _ => {}
        }
        Ok(())
    }

    /// Resolve `ip` to a MAC address. A miss broadcasts an ARP request and
    /// reports `None`; the caller retries once the reply has landed in the
    /// cache.
    pub fn resolve(&mut self, ip: Ipv4Addr) -> Result<Option<MacAddress>, TransmitError> {
        if let Some(mac) = self.arp.lookup(ip) {
            return Ok(Some(mac));
        }
        self.send_arp_request(ip)?;
        Ok(None)
    }

    /// Broadcast a request for `target_ip`.
    pub fn send_arp_request(&mut self, target_ip: Ipv4Addr) -> Result<(), TransmitError> {
        let mut frame = [0u8; ETH_HEADER_LEN + ARP_PACKET_LEN];
        write_eth_header(&mut frame, MacAddress::BROADCAST, self.mac, EtherType::ARP);
        write_arp_packet(
            &mut frame[ETH_HEADER_LEN..],
            OPCODE_REQUEST,
            self.mac,
            self.ip,
            MacAddress::ZERO,
            target_ip,
        );
        self.device.transmit(&frame)
    }

    fn send_arp_reply(
        &mut self,
        target_ip: Ipv4Addr,
        target_mac: MacAddress,
    ) -> Result<(), TransmitError> {
        let mut frame = [0u8; ETH_HEADER_LEN + ARP_PACKET_LEN];
        write_eth_header(&mut frame, target_mac, self.mac, EtherType::ARP);
        write_arp_packet(
            &mut frame[ETH_HEADER_LEN..],
            OPCODE_REPLY,
            self.mac,
            self.ip,
            target_mac,
            target_ip,
        );
        self.device.transmit(&frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(last_ip: u8, last_mac: u8) -> ArpEntry {
        ArpEntry {
            ip: Ipv4Addr([10, 0, 0, last_ip]),
            mac: MacAddress([0x02, 0, 0, 0, 0, last_mac]),
        }
    }

    #[test]
    fn insert_then_lookup() {
        let mut cache = ArpCache::new();
        cache.insert(entry(7, 7));

        assert_eq!(cache.tail(), 1);
        assert_eq!(
            cache.lookup(Ipv4Addr([10, 0, 0, 7])),
            Some(MacAddress([0x02, 0, 0, 0, 0, 7]))
        );
    }

    #[test]
    fn lookup_miss() {
        let mut cache = ArpCache::new();
        cache.insert(entry(7, 7));
        assert_eq!(cache.lookup(Ipv4Addr([10, 0, 0, 8])), None);
    }

    #[test]
    fn insert_same_mac_updates_in_place() {
        let mut cache = ArpCache::new();
        cache.insert(entry(7, 7));
        cache.insert(ArpEntry {
            ip: Ipv4Addr([10, 0, 0, 9]),
            mac: MacAddress([0x02, 0, 0, 0, 0, 7]),
        });

        assert_eq!(cache.tail(), 1);
        assert_eq!(cache.lookup(Ipv4Addr([10, 0, 0, 7])), None);
        assert!(cache.lookup(Ipv4Addr([10, 0, 0, 9])).is_some());
    }

    #[test]
    fn lookup_promotes_one_slot() {
        let mut cache = ArpCache::new();
        cache.insert(entry(1, 1));
        cache.insert(entry(2, 2));
        cache.insert(entry(3, 3));

        // The hit at index 2 moves to index 1 and still resolves correctly.
        assert_eq!(
            cache.lookup(Ipv4Addr([10, 0, 0, 3])),
            Some(MacAddress([0x02, 0, 0, 0, 0, 3]))
        );
        assert_eq!(cache.entries()[1], entry(3, 3));
        assert_eq!(cache.entries()[2], entry(2, 2));

        // A hit already at the front stays there.
        assert_eq!(
            cache.lookup(Ipv4Addr([10, 0, 0, 1])),
            Some(MacAddress([0x02, 0, 0, 0, 0, 1]))
        );
        assert_eq!(cache.entries()[0], entry(1, 1));
    }

    #[test]
    fn full_table_overwrites_last_slot() {
        let mut cache = ArpCache::new();
        for i in 0..ARP_TABLE_SIZE as u8 {
            cache.insert(entry(i, i));
        }
        assert_eq!(cache.tail(), ARP_TABLE_SIZE - 1);
        assert_eq!(cache.cache_full(), 1);

        cache.insert(entry(99, 99));
        assert_eq!(cache.tail(), ARP_TABLE_SIZE - 1);
        assert_eq!(cache.cache_full(), 2);
        assert!(cache.lookup(Ipv4Addr([10, 0, 0, 99])).is_some());
        // The displaced occupant of the last slot is gone.
        assert_eq!(
            cache.lookup(Ipv4Addr([10, 0, 0, ARP_TABLE_SIZE as u8 - 1])),
            None
        );
    }
}
