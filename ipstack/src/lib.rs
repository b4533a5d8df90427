#![cfg_attr(not(test), no_std)]

//! A polled, no-heap IPv4 stack for a small Ethernet device.
//!
//! The stack brings a host from power-on to a DHCP-leased address and then
//! keeps answering ARP and ICMP Echo. Everything is statically sized and
//! single-threaded: one main loop calls [`NetStack::poll`], and a received
//! frame runs the whole dispatch chain (EtherType, then IP protocol, then
//! UDP port) before the call returns. Outbound frames are assembled in
//! stack-allocated buffers by the layer that emits them.

mod arp;
mod checksum;
mod dhcp;
mod dispatch;
mod eth;
mod icmp;
mod ipv4;
mod types;
mod udp;
mod wire;

pub use arp::{ArpCache, ArpEntry, ARP_TABLE_SIZE};
pub use checksum::{checksum, udp_checksum};
pub use netdev::{EtherType, MacAddress, NetDevice, ReceiveError, TransmitError};
pub use types::Ipv4Addr;
pub use wire::{swap16, swap32};

use dispatch::{EtherHandler, IpHandler, Registry, UdpHandler};

/// Largest frame the poll loop accepts from the device.
pub const RX_BUFFER_LEN: usize = 550;

/// Stack-level error: either side of the device seam.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    Receive(ReceiveError),
    Transmit(TransmitError),
}

/// The whole stack as one value: the device, the address configuration, the
/// ARP cache, the per-layer dispatch tables, and the DHCP client state.
///
/// Owning everything by value keeps the stack instantiable; host tests
/// construct one around a scripted device and feed it frames.
pub struct NetStack<D: NetDevice> {
    device: D,
    mac: MacAddress,

    // Address configuration, written by the DHCP handlers.
    ip: Ipv4Addr,
    subnet: Ipv4Addr,
    gateway: Ipv4Addr,
    dhcp_server: Ipv4Addr,
    dhcp_ready: bool,

    arp: ArpCache,

    ether_types: Registry<EtherType, EtherHandler, 2>,
    ip_protos: Registry<u8, IpHandler, 2>,
    udp_ports: Registry<u16, UdpHandler, 2>,

    ip_id: u16,
    xid: dhcp::XidGen,
}

impl<D: NetDevice> NetStack<D> {
    /// Build a stack around `device`. `xid_seed` feeds the DHCP
    /// transaction-id generator; boards pass whatever entropy they have,
    /// tests pass a constant.
    pub fn new(device: D, mac: MacAddress, xid_seed: u32) -> Self {
        let mut stack = NetStack {
            device,
            mac,
            ip: Ipv4Addr::UNSPECIFIED,
            subnet: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
            dhcp_server: Ipv4Addr::UNSPECIFIED,
            dhcp_ready: false,
            arp: ArpCache::new(),
            ether_types: Registry::new(),
            ip_protos: Registry::new(),
            udp_ports: Registry::new(),
            ip_id: ipv4::IP_ID_SEED,
            xid: dhcp::XidGen::new(xid_seed),
        };

        // Boot-order registration; nothing is ever unregistered.
        stack.ether_types.add(EtherType::IPV4, EtherHandler::Ipv4);
        stack.ether_types.add(EtherType::ARP, EtherHandler::Arp);
        stack.ip_protos.add(ipv4::IP_PROTO_UDP, IpHandler::Udp);
        stack.ip_protos.add(ipv4::IP_PROTO_ICMP, IpHandler::Icmp);
        stack.udp_ports.add(dhcp::CLIENT_PORT, UdpHandler::Dhcp);

        stack
    }

    /// Poll the device once. A pending frame is dispatched to completion
    /// before this returns; no frame is not an error.
    pub fn poll(&mut self) -> Result<(), Error> {
        let mut buf = [0u8; RX_BUFFER_LEN + 1];
        let len = self.device.receive(&mut buf).map_err(Error::Receive)?;
        if len > 0 {
            self.handle_frame(&buf[..len]).map_err(Error::Transmit)?;
        }
        Ok(())
    }

    /// Drive lease acquisition: re-broadcast DISCOVER as long as no address
    /// has been offered. Call once per trip around the main loop until
    /// [`NetStack::dhcp_ready`] reports true.
    pub fn maintain_dhcp(&mut self) -> Result<(), TransmitError> {
        if self.ip.is_unspecified() {
            self.send_discover()
        } else {
            Ok(())
        }
    }

    /// Install a static address configuration, bypassing DHCP.
    pub fn configure(&mut self, ip: Ipv4Addr, subnet: Ipv4Addr, gateway: Ipv4Addr) {
        self.ip = ip;
        self.subnet = subnet;
        self.gateway = gateway;
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn subnet_mask(&self) -> Ipv4Addr {
        self.subnet
    }

    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    pub fn dhcp_server(&self) -> Ipv4Addr {
        self.dhcp_server
    }

    /// True once an ACK has confirmed every value stored from the OFFER.
    pub fn dhcp_ready(&self) -> bool {
        self.dhcp_ready
    }

    pub fn arp_cache(&self) -> &ArpCache {
        &self.arp
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}
