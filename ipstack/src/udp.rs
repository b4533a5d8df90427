//! UDP datagrams and the local-port dispatch.

use netdev::{NetDevice, TransmitError};

use crate::checksum::udp_checksum;
use crate::dispatch::UdpHandler;
use crate::ipv4::Ipv4Packet;
use crate::types::Ipv4Addr;
use crate::wire;
use crate::NetStack;

pub(crate) const UDP_HEADER_LEN: usize = 8;

pub(crate) struct UdpDatagram<'a> {
    buf: &'a [u8],
}

impl<'a> UdpDatagram<'a> {
    pub(crate) fn parse(buf: &'a [u8]) -> Option<Self> {
        (buf.len() >= UDP_HEADER_LEN).then_some(UdpDatagram { buf })
    }

    pub(crate) fn dst_port(&self) -> u16 {
        wire::read_u16(self.buf, 2)
    }

    pub(crate) fn payload(&self) -> &'a [u8] {
        &self.buf[UDP_HEADER_LEN..]
    }
}

/// Fill in the UDP header at the front of `datagram` (header plus payload)
/// and compute the pseudo-header checksum over all of it.
pub(crate) fn write_udp_header(
    datagram: &mut [u8],
    src_port: u16,
    dst_port: u16,
    src: Ipv4Addr,
    dst: Ipv4Addr,
) {
    let length = datagram.len() as u16;
    wire::write_u16(datagram, 0, src_port);
    wire::write_u16(datagram, 2, dst_port);
    wire::write_u16(datagram, 4, length);
    wire::write_u16(datagram, 6, 0);

    let sum = udp_checksum(src, dst, datagram);
    wire::write_u16(datagram, 6, sum);
}

impl<D: NetDevice> NetStack<D> {
    /// Demultiplex a datagram on its destination port.
    pub(crate) fn handle_udp(&mut self, ip: &Ipv4Packet<'_>) -> Result<(), TransmitError> {
        let Some(udp) = UdpDatagram::parse(ip.payload()) else {
            return Ok(());
        };

        match self.udp_ports.get(udp.dst_port()) {
            Some(UdpHandler::Dhcp) => self.handle_dhcp(udp.payload()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum;

    #[test]
    fn parse_reads_ports_and_payload() {
        let mut buf = [0u8; 12];
        buf[2] = 0x00;
        buf[3] = 0x44; // destination port 68
        let udp = UdpDatagram::parse(&buf).unwrap();
        assert_eq!(udp.dst_port(), 68);
        assert_eq!(udp.payload().len(), 4);

        assert!(UdpDatagram::parse(&buf[..7]).is_none());
    }

    #[test]
    fn written_header_carries_length_and_checksum() {
        let src = Ipv4Addr::UNSPECIFIED;
        let dst = Ipv4Addr::BROADCAST;
        let mut datagram = [0u8; UDP_HEADER_LEN + 6];
        datagram[UDP_HEADER_LEN..].copy_from_slice(b"lease!");
        write_udp_header(&mut datagram, 68, 67, src, dst);

        assert_eq!(wire::read_u16(&datagram, 4), datagram.len() as u16);

        // One's-complement verification: pseudo-header plus datagram with
        // the checksum in place sums to all-ones, so the complement is 0.
        let mut pseudo = [0u8; 12];
        pseudo[0..4].copy_from_slice(&src.octets());
        pseudo[4..8].copy_from_slice(&dst.octets());
        pseudo[9] = 0x11;
        pseudo[10..12].copy_from_slice(&(datagram.len() as u16).to_be_bytes());

        let mut whole = [0u8; 12 + UDP_HEADER_LEN + 6];
        whole[..12].copy_from_slice(&pseudo);
        whole[12..].copy_from_slice(&datagram);
        assert_eq!(checksum(&whole), 0);
    }
}
