//! Append-only (key, handler) registries consulted on each inbound unit.
//!
//! Every layer keeps one: EtherType at L2, protocol number at L3, local port
//! at L4. Handlers are closed enum variants, so dispatch is a `match` with no
//! indirect calls, and each table's capacity is part of its type. Entries are
//! registered once at boot and never removed; at these sizes a linear scan is
//! the lookup.

pub(crate) struct Registry<K, H, const N: usize> {
    slots: [Option<(K, H)>; N],
    idx: usize,
}

impl<K: Copy + PartialEq, H: Copy, const N: usize> Registry<K, H, N> {
    pub(crate) fn new() -> Self {
        Registry {
            slots: [None; N],
            idx: 0,
        }
    }

    /// Append a handler. Once the table is full, further additions overwrite
    /// the last slot.
    pub(crate) fn add(&mut self, key: K, handler: H) {
        self.slots[self.idx] = Some((key, handler));
        if self.idx + 1 < N {
            self.idx += 1;
        }
    }

    pub(crate) fn get(&self, key: K) -> Option<H> {
        self.slots
            .iter()
            .flatten()
            .find(|(k, _)| *k == key)
            .map(|(_, handler)| *handler)
    }
}

/// Layer-2 payload handlers, keyed by EtherType.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum EtherHandler {
    Ipv4,
    Arp,
}

/// Layer-3 payload handlers, keyed by IP protocol number.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum IpHandler {
    Udp,
    Icmp,
}

/// Layer-4 payload handlers, keyed by UDP destination port.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum UdpHandler {
    Dhcp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_registered_keys() {
        let mut table: Registry<u16, EtherHandler, 2> = Registry::new();
        table.add(0x0800, EtherHandler::Ipv4);
        table.add(0x0806, EtherHandler::Arp);

        assert_eq!(table.get(0x0800), Some(EtherHandler::Ipv4));
        assert_eq!(table.get(0x0806), Some(EtherHandler::Arp));
        assert_eq!(table.get(0x86dd), None);
    }

    #[test]
    fn empty_table_matches_nothing() {
        let table: Registry<u8, IpHandler, 2> = Registry::new();
        assert_eq!(table.get(0), None);
    }

    #[test]
    fn additions_past_capacity_overwrite_the_last_slot() {
        let mut table: Registry<u8, IpHandler, 2> = Registry::new();
        table.add(1, IpHandler::Icmp);
        table.add(17, IpHandler::Udp);
        table.add(6, IpHandler::Udp);

        // The first slot survives, the last registration wins the second.
        assert_eq!(table.get(1), Some(IpHandler::Icmp));
        assert_eq!(table.get(17), None);
        assert_eq!(table.get(6), Some(IpHandler::Udp));
    }
}
