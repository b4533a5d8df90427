//! IPv4 header handling and the layer-3 dispatch.

use netdev::{NetDevice, TransmitError};

use crate::checksum::checksum;
use crate::dispatch::IpHandler;
use crate::types::{ip_at, Ipv4Addr};
use crate::wire;
use crate::NetStack;

pub(crate) const IPV4_HEADER_LEN: usize = 20;

pub(crate) const IP_PROTO_ICMP: u8 = 1;
pub(crate) const IP_PROTO_UDP: u8 = 0x11;

/// Version 4, five-word header. The stack neither emits nor accepts IP
/// options.
const VERSION_IHL: u8 = 0x45;

/// Starting point of the datagram-identification counter; any nonzero value
/// does.
pub(crate) const IP_ID_SEED: u16 = 420;

/// View of an option-less IPv4 packet.
pub(crate) struct Ipv4Packet<'a> {
    buf: &'a [u8],
}

impl<'a> Ipv4Packet<'a> {
    pub(crate) fn parse(buf: &'a [u8]) -> Option<Self> {
        (buf.len() >= IPV4_HEADER_LEN && buf[0] == VERSION_IHL).then_some(Ipv4Packet { buf })
    }

    pub(crate) fn ttl(&self) -> u8 {
        self.buf[8]
    }

    pub(crate) fn protocol(&self) -> u8 {
        self.buf[9]
    }

    pub(crate) fn src(&self) -> Ipv4Addr {
        ip_at(self.buf, 12)
    }

    pub(crate) fn payload(&self) -> &'a [u8] {
        &self.buf[IPV4_HEADER_LEN..]
    }
}

/// Fill in a 20-byte IPv4 header, checksum included. `total_len` covers the
/// header and everything behind it.
pub(crate) fn write_ipv4_header(
    buf: &mut [u8],
    total_len: u16,
    id: u16,
    ttl: u8,
    protocol: u8,
    src: Ipv4Addr,
    dst: Ipv4Addr,
) {
    buf[0] = VERSION_IHL;
    buf[1] = 0; // DSCP/ECN
    wire::write_u16(buf, 2, total_len);
    wire::write_u16(buf, 4, id);
    wire::write_u16(buf, 6, 0); // flags, fragment offset
    buf[8] = ttl;
    buf[9] = protocol;
    wire::write_u16(buf, 10, 0);
    buf[12..16].copy_from_slice(&src.octets());
    buf[16..20].copy_from_slice(&dst.octets());

    let sum = checksum(&buf[..IPV4_HEADER_LEN]);
    wire::write_u16(buf, 10, sum);
}

impl<D: NetDevice> NetStack<D> {
    /// Demultiplex an IPv4 packet on its protocol number.
    pub(crate) fn handle_ipv4(&mut self, payload: &[u8]) -> Result<(), TransmitError> {
        let Some(ip) = Ipv4Packet::parse(payload) else {
            return Ok(());
        };

        match self.ip_protos.get(ip.protocol()) {
            Some(IpHandler::Udp) => self.handle_udp(&ip),
            Some(IpHandler::Icmp) => self.handle_icmp(&ip),
            None => Ok(()),
        }
    }

    /// Identification for the next outbound datagram; one fresh value per
    /// transmission, serialized big-endian like every other header field.
    pub(crate) fn next_ip_id(&mut self) -> u16 {
        let id = self.ip_id;
        self.ip_id = self.ip_id.wrapping_add(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_options_and_other_versions() {
        let mut buf = [0u8; IPV4_HEADER_LEN];
        buf[0] = 0x46; // IHL 6: carries options
        assert!(Ipv4Packet::parse(&buf).is_none());
        buf[0] = 0x65; // IPv6 version nibble
        assert!(Ipv4Packet::parse(&buf).is_none());
        buf[0] = 0x45;
        assert!(Ipv4Packet::parse(&buf).is_some());
    }

    #[test]
    fn parse_rejects_short_buffer() {
        let buf = [0x45u8; IPV4_HEADER_LEN - 1];
        assert!(Ipv4Packet::parse(&buf).is_none());
    }

    #[test]
    fn written_header_verifies_to_zero() {
        let mut buf = [0u8; IPV4_HEADER_LEN];
        write_ipv4_header(
            &mut buf,
            84,
            IP_ID_SEED,
            64,
            IP_PROTO_ICMP,
            Ipv4Addr([10, 0, 0, 1]),
            Ipv4Addr([10, 0, 0, 2]),
        );
        assert_eq!(checksum(&buf), 0);

        let ip = Ipv4Packet::parse(&buf).unwrap();
        assert_eq!(ip.ttl(), 64);
        assert_eq!(ip.protocol(), IP_PROTO_ICMP);
        assert_eq!(ip.src(), Ipv4Addr([10, 0, 0, 1]));
    }
}
