#![cfg_attr(not(test), no_std)]

//! Driver for the ENC28J60, an SPI-attached Ethernet MAC+PHY.
//!
//! With the `netdev` feature enabled the driver implements
//! [`netdev::NetDevice`], plugging it into protocol stacks written against
//! that trait.

#[cfg(feature = "netdev")]
mod adapter;
mod driver;
pub mod register;

pub use driver::{Enc28j60, RX_START, RX_STOP, TX_START, TX_STOP};
