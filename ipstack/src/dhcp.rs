//! DHCP client: DISCOVER → OFFER → REQUEST → ACK, nothing past the initial
//! lease.
//!
//! All outbound packets are broadcast at both layers with source 0.0.0.0;
//! retransmission is the caller's loop re-issuing DISCOVER while the lease
//! slot is still empty. There are no timers.

use netdev::{EtherType, MacAddress, NetDevice, TransmitError};

use crate::eth::{write_eth_header, ETH_HEADER_LEN};
use crate::ipv4::{write_ipv4_header, IPV4_HEADER_LEN, IP_PROTO_UDP};
use crate::types::{ip_at, Ipv4Addr};
use crate::udp::{write_udp_header, UDP_HEADER_LEN};
use crate::NetStack;

pub(crate) const CLIENT_PORT: u16 = 68;
const SERVER_PORT: u16 = 67;

/// Marks the start of the option block inside the BOOTP-compatible payload.
const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

const BOOTP_HEADER_LEN: usize = 236;
const OPTIONS_OFFSET: usize = BOOTP_HEADER_LEN + MAGIC_COOKIE.len();

/// Offset of `yiaddr`, the address the server is offering us.
const YIADDR_OFFSET: usize = 16;

// Message types carried in option 53.
const DISCOVER: u8 = 1;
const OFFER: u8 = 2;
const REQUEST: u8 = 3;
const ACK: u8 = 5;

const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_DNS: u8 = 6;
const OPT_NTP: u8 = 42;
const OPT_REQUESTED_IP: u8 = 50;
const OPT_MESSAGE_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_PARAM_REQUEST: u8 = 55;
const OPT_CLIENT_ID: u8 = 61;
const OPT_END: u8 = 255;

/// Both DISCOVER and REQUEST pad their option block out to 32 bytes, so
/// every packet we emit has the same even-length payload.
const OPTION_BLOCK_LEN: usize = 32;
const PAYLOAD_LEN: usize = OPTIONS_OFFSET + OPTION_BLOCK_LEN;
const DATAGRAM_LEN: usize = UDP_HEADER_LEN + PAYLOAD_LEN;
const FRAME_LEN: usize = ETH_HEADER_LEN + IPV4_HEADER_LEN + DATAGRAM_LEN;

/// Transaction-id generator, a linear-congruential scratchpad. Uniqueness
/// among a handful of outstanding transactions is all DHCP needs; the seed
/// comes from whatever entropy the platform has at boot.
pub(crate) struct XidGen {
    seed: u32,
}

impl XidGen {
    pub(crate) fn new(seed: u32) -> Self {
        XidGen { seed }
    }

    pub(crate) fn next(&mut self) -> u32 {
        self.seed = self.seed.wrapping_mul(1_133_769_420).wrapping_add(12_345);
        (self.seed >> 16) & 0x7fff
    }
}

/// Walk the option TLVs for `tag`, expecting a value of `len` bytes.
///
/// An instance whose length byte disagrees with `len` is skipped as if it
/// were not there; callers treat `None` as a zero-initialized value.
fn find_option(payload: &[u8], tag: u8, len: usize) -> Option<&[u8]> {
    let mut offset = OPTIONS_OFFSET;
    while offset + 2 <= payload.len() {
        let t = payload[offset];
        let l = usize::from(payload[offset + 1]);
        if t == tag && l == len {
            return payload.get(offset + 2..offset + 2 + len);
        }
        offset += 2 + l;
    }
    None
}

fn message_type(payload: &[u8]) -> Option<u8> {
    find_option(payload, OPT_MESSAGE_TYPE, 1).map(|value| value[0])
}

fn option_ip(payload: &[u8], tag: u8) -> Option<Ipv4Addr> {
    find_option(payload, tag, 4).map(|value| ip_at(value, 0))
}

/// Fill in the fixed BOOTP header and the magic cookie. Everything not
/// written here (secs, flags, the four address fields, sname, file) stays
/// zero.
fn write_bootp_header(payload: &mut [u8], xid: u32, mac: MacAddress) {
    payload[0] = 1; // BOOTREQUEST
    payload[1] = 1; // Ethernet
    payload[2] = 6; // hardware address length
    payload[3] = 0; // hops
    payload[4..8].copy_from_slice(&xid.to_be_bytes());
    payload[28..34].copy_from_slice(&mac.octets());
    payload[BOOTP_HEADER_LEN..OPTIONS_OFFSET].copy_from_slice(&MAGIC_COOKIE);
}

/// Append the option block. The tail of the 32-byte block past the END tag
/// is the zero padding that keeps the payload length even.
fn write_options(
    payload: &mut [u8],
    message_type: u8,
    mac: MacAddress,
    requested_ip: Ipv4Addr,
    server_id: Option<Ipv4Addr>,
) {
    let mut at = OPTIONS_OFFSET;

    payload[at] = OPT_MESSAGE_TYPE;
    payload[at + 1] = 1;
    payload[at + 2] = message_type;
    at += 3;

    // Client identifier: hardware type byte plus the MAC.
    payload[at] = OPT_CLIENT_ID;
    payload[at + 1] = 7;
    payload[at + 2] = 1;
    payload[at + 3..at + 9].copy_from_slice(&mac.octets());
    at += 9;

    payload[at] = OPT_REQUESTED_IP;
    payload[at + 1] = 4;
    payload[at + 2..at + 6].copy_from_slice(&requested_ip.octets());
    at += 6;

    if let Some(server) = server_id {
        payload[at] = OPT_SERVER_ID;
        payload[at + 1] = 4;
        payload[at + 2..at + 6].copy_from_slice(&server.octets());
        at += 6;
    }

    payload[at..at + 6].copy_from_slice(&[
        OPT_PARAM_REQUEST,
        4,
        OPT_SUBNET_MASK,
        OPT_ROUTER,
        OPT_DNS,
        OPT_NTP,
    ]);
    at += 6;

    payload[at] = OPT_END;
}

impl<D: NetDevice> NetStack<D> {
    /// Inbound traffic on port 68. OFFER moves the machine to REQUEST; a
    /// matching ACK completes the lease.
    pub(crate) fn handle_dhcp(&mut self, payload: &[u8]) -> Result<(), TransmitError> {
        if payload.len() < OPTIONS_OFFSET {
            return Ok(());
        }

        match message_type(payload) {
            Some(OFFER) => self.handle_offer(payload),
            Some(ACK) => {
                self.handle_ack(payload);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Take the offered configuration on trust and ask for it.
    fn handle_offer(&mut self, payload: &[u8]) -> Result<(), TransmitError> {
        self.ip = ip_at(payload, YIADDR_OFFSET);
        self.subnet = option_ip(payload, OPT_SUBNET_MASK).unwrap_or_default();
        self.gateway = option_ip(payload, OPT_ROUTER).unwrap_or_default();
        self.dhcp_server = option_ip(payload, OPT_SERVER_ID).unwrap_or_default();

        self.send_request()
    }

    /// The lease stands only if the ACK confirms every value stored from the
    /// OFFER; anything else leaves `dhcp_ready` clear and the outer loop
    /// starts over with a fresh DISCOVER.
    fn handle_ack(&mut self, payload: &[u8]) {
        let confirmed = ip_at(payload, YIADDR_OFFSET) == self.ip
            && option_ip(payload, OPT_SUBNET_MASK).unwrap_or_default() == self.subnet
            && option_ip(payload, OPT_ROUTER).unwrap_or_default() == self.gateway
            && option_ip(payload, OPT_SERVER_ID).unwrap_or_default() == self.dhcp_server;

        if confirmed {
            self.dhcp_ready = true;
        }
    }

    /// Broadcast a DISCOVER. The caller re-issues this while the lease slot
    /// is still empty.
    pub fn send_discover(&mut self) -> Result<(), TransmitError> {
        self.send_dhcp_message(DISCOVER)
    }

    fn send_request(&mut self) -> Result<(), TransmitError> {
        self.send_dhcp_message(REQUEST)
    }

    fn send_dhcp_message(&mut self, kind: u8) -> Result<(), TransmitError> {
        let mut frame = [0u8; FRAME_LEN];

        write_eth_header(
            &mut frame,
            MacAddress::BROADCAST,
            self.mac,
            EtherType::IPV4,
        );

        let id = self.next_ip_id();
        write_ipv4_header(
            &mut frame[ETH_HEADER_LEN..],
            (FRAME_LEN - ETH_HEADER_LEN) as u16,
            id,
            0xff,
            IP_PROTO_UDP,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::BROADCAST,
        );

        let xid = self.xid.next();
        let datagram = &mut frame[ETH_HEADER_LEN + IPV4_HEADER_LEN..];
        {
            let payload = &mut datagram[UDP_HEADER_LEN..];
            write_bootp_header(payload, xid, self.mac);

            // REQUEST names the offered address and the server that made the
            // offer; DISCOVER leaves both out (option 50 zeroed).
            let requested_ip = if kind == REQUEST {
                self.ip
            } else {
                Ipv4Addr::UNSPECIFIED
            };
            let server_id = (kind == REQUEST).then_some(self.dhcp_server);
            write_options(payload, kind, self.mac, requested_ip, server_id);
        }
        write_udp_header(
            datagram,
            CLIENT_PORT,
            SERVER_PORT,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::BROADCAST,
        );

        self.device.transmit(&frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_with_options(options: &[u8]) -> [u8; PAYLOAD_LEN] {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[BOOTP_HEADER_LEN..OPTIONS_OFFSET].copy_from_slice(&MAGIC_COOKIE);
        payload[OPTIONS_OFFSET..OPTIONS_OFFSET + options.len()].copy_from_slice(options);
        payload
    }

    #[test]
    fn finds_an_option_by_tag_and_length() {
        let payload = payload_with_options(&[53, 1, 2, 54, 4, 10, 0, 0, 1, 255]);

        assert_eq!(message_type(&payload), Some(2));
        assert_eq!(
            option_ip(&payload, OPT_SERVER_ID),
            Some(Ipv4Addr([10, 0, 0, 1]))
        );
        assert_eq!(option_ip(&payload, OPT_ROUTER), None);
    }

    #[test]
    fn wrong_length_instance_counts_as_absent() {
        // Option 54 claims 6 value bytes; the walk must skip it, not
        // truncate it.
        let payload = payload_with_options(&[54, 6, 10, 0, 0, 1, 0, 0, 255]);
        assert_eq!(option_ip(&payload, OPT_SERVER_ID), None);
    }

    #[test]
    fn later_instance_with_the_right_length_is_found() {
        let payload = payload_with_options(&[1, 2, 0, 0, 1, 4, 255, 255, 255, 0, 255]);
        assert_eq!(
            option_ip(&payload, OPT_SUBNET_MASK),
            Some(Ipv4Addr([255, 255, 255, 0]))
        );
    }

    #[test]
    fn truncated_option_is_absent() {
        // Length byte runs past the end of the buffer.
        let mut payload = [0u8; OPTIONS_OFFSET + 4];
        payload[OPTIONS_OFFSET..].copy_from_slice(&[54, 4, 10, 0]);
        assert_eq!(option_ip(&payload, OPT_SERVER_ID), None);
    }

    #[test]
    fn xid_generator_is_deterministic_per_seed() {
        let mut a = XidGen::new(0x1234_5678);
        let mut b = XidGen::new(0x1234_5678);
        let first = a.next();
        assert_eq!(first, b.next());
        assert_ne!(a.next(), first);
        // Values stay within the 15-bit range the generator promises.
        for _ in 0..100 {
            assert!(a.next() <= 0x7fff);
        }
    }

    #[test]
    fn discover_and_request_options_fit_the_block() {
        // DISCOVER: 53(3) + 61(9) + 50(6) + 55(6) + END = 25 bytes,
        // REQUEST adds 54(6) for 31; both leave room in the 32-byte block.
        let mut payload = [0u8; PAYLOAD_LEN];
        write_options(
            &mut payload,
            REQUEST,
            MacAddress([2, 0, 0, 0, 0, 1]),
            Ipv4Addr([10, 0, 0, 42]),
            Some(Ipv4Addr([10, 0, 0, 1])),
        );
        assert_eq!(payload[OPTIONS_OFFSET + 30], OPT_END);
        assert_eq!(payload[OPTIONS_OFFSET + 31], 0);
    }
}
