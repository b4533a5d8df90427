use embedded_hal::spi::SpiDevice;
use netdev::{NetDevice, ReceiveError, TransmitError};

use crate::driver::{TX_START, TX_STOP};
use crate::Enc28j60;

impl<SPI: SpiDevice> NetDevice for Enc28j60<SPI> {
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, ReceiveError> {
        self.receive(buf).map_err(|_| ReceiveError::DeviceError)
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), TransmitError> {
        // One byte of the transmit region is taken by the control byte.
        if frame.len() > usize::from(TX_STOP - TX_START) {
            return Err(TransmitError::FrameTooLong);
        }
        self.transmit(frame).map_err(|_| TransmitError::DeviceError)
    }
}
