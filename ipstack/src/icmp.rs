//! ICMP Echo: answer pings, optionally send them.

use netdev::{EtherType, MacAddress, NetDevice, TransmitError};

use crate::checksum::checksum;
use crate::eth::{write_eth_header, ETH_HEADER_LEN};
use crate::ipv4::{write_ipv4_header, Ipv4Packet, IPV4_HEADER_LEN, IP_PROTO_ICMP};
use crate::types::Ipv4Addr;
use crate::wire;
use crate::NetStack;

const ECHO_REPLY: u8 = 0;
const ECHO_REQUEST: u8 = 8;

/// The 32 bytes of patterned data carried in every echo message we emit.
const ECHO_DATA: [u8; 32] = *b"abcdefghijklmnopqrstuvwabcdefghi";

const ICMP_LEN: usize = 8 + ECHO_DATA.len();
const ECHO_FRAME_LEN: usize = ETH_HEADER_LEN + IPV4_HEADER_LEN + ICMP_LEN;

/// Identifier and starting sequence number for locally originated requests.
const LOCAL_IDENT: u16 = 1;
const LOCAL_SEQ: u16 = 3;

struct IcmpMessage<'a> {
    buf: &'a [u8],
}

impl<'a> IcmpMessage<'a> {
    fn parse(buf: &'a [u8]) -> Option<Self> {
        (buf.len() >= 8).then_some(IcmpMessage { buf })
    }

    fn kind(&self) -> u8 {
        self.buf[0]
    }

    fn ident(&self) -> u16 {
        wire::read_u16(self.buf, 4)
    }

    fn seq(&self) -> u16 {
        wire::read_u16(self.buf, 6)
    }
}

fn write_echo(buf: &mut [u8], kind: u8, ident: u16, seq: u16) {
    buf[0] = kind;
    buf[1] = 0; // code
    wire::write_u16(buf, 2, 0);
    wire::write_u16(buf, 4, ident);
    wire::write_u16(buf, 6, seq);
    buf[8..ICMP_LEN].copy_from_slice(&ECHO_DATA);

    let sum = checksum(&buf[..ICMP_LEN]);
    wire::write_u16(buf, 2, sum);
}

impl<D: NetDevice> NetStack<D> {
    pub(crate) fn handle_icmp(&mut self, ip: &Ipv4Packet<'_>) -> Result<(), TransmitError> {
        let Some(icmp) = IcmpMessage::parse(ip.payload()) else {
            return Ok(());
        };

        if icmp.kind() == ECHO_REQUEST {
            self.send_echo_reply(ip.src(), icmp.ident(), icmp.seq(), ip.ttl())?;
        }
        Ok(())
    }

    fn send_echo_reply(
        &mut self,
        target: Ipv4Addr,
        ident: u16,
        seq: u16,
        request_ttl: u8,
    ) -> Result<(), TransmitError> {
        let Some(dst_mac) = self.resolve_route(target)? else {
            // No link address for the peer yet. Its retry will find the
            // cache warm from the request we just queued.
            return Ok(());
        };

        let mut frame = [0u8; ECHO_FRAME_LEN];
        write_eth_header(&mut frame, dst_mac, self.mac, EtherType::IPV4);
        let id = self.next_ip_id();
        write_ipv4_header(
            &mut frame[ETH_HEADER_LEN..],
            (ECHO_FRAME_LEN - ETH_HEADER_LEN) as u16,
            id,
            request_ttl / 2,
            IP_PROTO_ICMP,
            self.ip,
            target,
        );
        write_echo(
            &mut frame[ETH_HEADER_LEN + IPV4_HEADER_LEN..],
            ECHO_REPLY,
            ident,
            seq,
        );

        self.device.transmit(&frame)
    }

    /// Ping `target` with the fixed local identifier and sequence number.
    pub fn send_echo_request(&mut self, target: Ipv4Addr) -> Result<(), TransmitError> {
        let Some(dst_mac) = self.resolve_route(target)? else {
            return Ok(());
        };

        let mut frame = [0u8; ECHO_FRAME_LEN];
        write_eth_header(&mut frame, dst_mac, self.mac, EtherType::IPV4);
        let id = self.next_ip_id();
        write_ipv4_header(
            &mut frame[ETH_HEADER_LEN..],
            (ECHO_FRAME_LEN - ETH_HEADER_LEN) as u16,
            id,
            0xff,
            IP_PROTO_ICMP,
            self.ip,
            target,
        );
        write_echo(
            &mut frame[ETH_HEADER_LEN + IPV4_HEADER_LEN..],
            ECHO_REQUEST,
            LOCAL_IDENT,
            LOCAL_SEQ,
        );

        self.device.transmit(&frame)
    }

    /// The ARP key for `target`: hosts outside our subnet are reached
    /// through the gateway.
    fn resolve_route(
        &mut self,
        target: Ipv4Addr,
    ) -> Result<Option<MacAddress>, TransmitError> {
        let next_hop = if self.ip.same_subnet(target, self.subnet) {
            target
        } else {
            self.gateway
        };
        self.resolve(next_hop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_writer_verifies_to_zero() {
        let mut buf = [0u8; ICMP_LEN];
        write_echo(&mut buf, ECHO_REPLY, 0x0001, 0x0003);
        assert_eq!(checksum(&buf), 0);
        assert_eq!(buf[0], ECHO_REPLY);
        assert_eq!(&buf[8..], &ECHO_DATA);
    }

    #[test]
    fn parse_needs_a_full_header() {
        assert!(IcmpMessage::parse(&[0u8; 7]).is_none());

        let mut buf = [0u8; 8];
        buf[0] = ECHO_REQUEST;
        buf[4] = 0x12;
        buf[7] = 0x34;
        let icmp = IcmpMessage::parse(&buf).unwrap();
        assert_eq!(icmp.kind(), ECHO_REQUEST);
        assert_eq!(icmp.ident(), 0x1200);
        assert_eq!(icmp.seq(), 0x0034);
    }
}
