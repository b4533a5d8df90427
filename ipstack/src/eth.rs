//! Ethernet II framing and the layer-2 dispatch.

use netdev::{EtherType, MacAddress, NetDevice, TransmitError};

use crate::dispatch::EtherHandler;
use crate::NetStack;

pub(crate) const ETH_HEADER_LEN: usize = 14;

/// Bounds-checked view of an Ethernet II frame. The header is validated
/// here once; sublayers get the narrowed payload slice.
pub(crate) struct EthFrame<'a> {
    buf: &'a [u8],
}

impl<'a> EthFrame<'a> {
    pub(crate) fn parse(buf: &'a [u8]) -> Option<Self> {
        (buf.len() >= ETH_HEADER_LEN).then_some(EthFrame { buf })
    }

    pub(crate) fn ethertype(&self) -> EtherType {
        EtherType::from_be_bytes([self.buf[12], self.buf[13]])
    }

    pub(crate) fn payload(&self) -> &'a [u8] {
        &self.buf[ETH_HEADER_LEN..]
    }
}

/// Fill in the 14-byte Ethernet II header at the front of `frame`.
pub(crate) fn write_eth_header(
    frame: &mut [u8],
    dst: MacAddress,
    src: MacAddress,
    ethertype: EtherType,
) {
    frame[0..6].copy_from_slice(&dst.octets());
    frame[6..12].copy_from_slice(&src.octets());
    frame[12..14].copy_from_slice(&ethertype.to_be_bytes());
}

impl<D: NetDevice> NetStack<D> {
    /// Demultiplex one inbound frame. Frames nothing is registered for are
    /// dropped without comment.
    pub(crate) fn handle_frame(&mut self, frame: &[u8]) -> Result<(), TransmitError> {
        let Some(eth) = EthFrame::parse(frame) else {
            return Ok(());
        };

        match self.ether_types.get(eth.ethertype()) {
            Some(EtherHandler::Ipv4) => self.handle_ipv4(eth.payload()),
            Some(EtherHandler::Arp) => self.handle_arp(eth.payload()),
            None => Ok(()),
        }
    }
}
