use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{Operation, SpiDevice};

use crate::register::{bits, *};

/// First address of the receive ring.
pub const RX_START: u16 = 0x0000;
/// Last address of the receive ring.
pub const RX_STOP: u16 = 0x0bff;
/// First address of the transmit region.
pub const TX_START: u16 = 0x0c00;
/// Last address of the transmit region.
pub const TX_STOP: u16 = 0x11ff;

/// Frames longer than this are discarded by the MAC.
const MAX_FRAMELEN: u16 = 1500;

/// Buffer-memory commands carry this constant in their address bits.
const BUF_CMD_ADDR: u8 = 0x1a;

/// An ENC28J60 Ethernet MAC+PHY behind an SPI bus.
///
/// Chip select belongs to the [`SpiDevice`] implementation; every command is
/// issued as one bus transaction so chip select frames each of them.
pub struct Enc28j60<SPI: SpiDevice> {
    spi: SPI,

    /// Bank currently selected in `ECON1.BSEL`, mirrored host-side so
    /// consecutive accesses to the same bank skip the switch traffic.
    current_bank: Bank,

    /// Read pointer into the receive ring, carried across `receive` calls.
    next_packet_ptr: u16,

    /// Host-side shadow of the `ERXFCON` receive filter.
    rx_filter: u8,
}

impl<SPI: SpiDevice> Enc28j60<SPI> {
    pub fn new(spi: SPI) -> Self {
        Enc28j60 {
            spi,
            current_bank: Bank::Bank0,
            next_packet_ptr: RX_START,
            rx_filter: 0,
        }
    }

    /// Bring the device from power-on to a receiving state.
    ///
    /// Performs the soft reset, carves the SRAM into the receive ring and the
    /// transmit region, programs the receive filter for unicast-to-us plus
    /// broadcast with valid CRC, configures the MAC and PHY, and enables
    /// reception. `mac` is the station address, most significant octet first.
    pub fn init<D: DelayNs>(&mut self, mac: &[u8; 6], delay: &mut D) -> Result<(), SPI::Error> {
        delay.delay_ms(1);
        self.soft_reset()?;
        delay.delay_ms(2);
        while self.read_control(ESTAT)? & bits::ESTAT_CLKRDY == 0 {}

        self.next_packet_ptr = RX_START;
        self.write_u16(ERXSTL, ERXSTH, RX_START)?;
        self.write_u16(ERXRDPTL, ERXRDPTH, RX_START)?;
        self.write_u16(ERXNDL, ERXNDH, RX_STOP)?;
        self.write_u16(ETXSTL, ETXSTH, TX_START)?;
        self.write_u16(ETXNDL, ETXNDH, TX_STOP)?;
        self.write_u16(ERXWRPTL, ERXWRPTH, RX_START)?;

        self.set_receive_filter(bits::ERXFCON_UCEN | bits::ERXFCON_BCEN | bits::ERXFCON_CRCEN)?;

        // Enable MAC receive with pause-frame handling on both directions.
        self.write_control(
            MACON1,
            bits::MACON1_MARXEN | bits::MACON1_TXPAUS | bits::MACON1_RXPAUS,
        )?;

        // Pad short frames to 60 bytes, append the CRC, check frame lengths.
        self.write_control(
            MACON3,
            bits::MACON3_PADCFG0 | bits::MACON3_TXCRCEN | bits::MACON3_FRMLNEN,
        )?;

        // Inter-packet gaps and maximum frame length.
        self.write_u16(MAIPGL, MAIPGH, 0x0c12)?;
        self.write_control(MABBIPG, 0x12)?;
        self.write_u16(MAMXFLL, MAMXFLH, MAX_FRAMELEN)?;

        self.write_control(MAADR1, mac[0])?;
        self.write_control(MAADR2, mac[1])?;
        self.write_control(MAADR3, mac[2])?;
        self.write_control(MAADR4, mac[3])?;
        self.write_control(MAADR5, mac[4])?;
        self.write_control(MAADR6, mac[5])?;

        // LEDA shows transmit activity, LEDB receive activity, stretched.
        self.write_phy(PHLCON, 0x0122)?;
        // Do not loop transmitted frames back when in half-duplex.
        self.write_phy(PHCON2, 0x0100)?;

        self.bit_set(ECON1, bits::ECON1_RXEN)?;
        self.bit_set(EIE, bits::EIE_INTIE | bits::EIE_PKTIE)?;
        self.bit_clear(EIR, bits::EIR_PKTIF)?;

        Ok(())
    }

    /// Issues a System Soft Reset via SPI.
    ///
    /// The SRC is the only single-byte command and does not address a
    /// register; the caller must give the device time to come back before
    /// polling `ESTAT.CLKRDY`.
    pub fn soft_reset(&mut self) -> Result<(), SPI::Error> {
        self.current_bank = Bank::Bank0;
        self.spi.write(&[0xff])
    }

    /// Silicon revision, useful as a bring-up sanity check.
    pub fn revision(&mut self) -> Result<u8, SPI::Error> {
        self.read_control(EREVID)
    }

    /// Program the `ERXFCON` receive filter and remember the mask. Writing
    /// 0 makes the device promiscuous.
    pub fn set_receive_filter(&mut self, mask: u8) -> Result<(), SPI::Error> {
        self.write_control(ERXFCON, mask)?;
        self.rx_filter = mask;
        Ok(())
    }

    /// The filter mask most recently programmed into the device.
    pub fn receive_filter(&self) -> u8 {
        self.rx_filter
    }

    pub fn read_control(&mut self, reg: ControlRegister) -> Result<u8, SPI::Error> {
        if let Some(bank) = reg.bank()
            && self.current_bank != bank
        {
            self.set_bank(bank)?;
        }

        // MAC and MII registers shift a dummy byte ahead of the data.
        let command = [reg.opcode(Op::RCR), 0, 0];
        let mut response = [0u8; 3];
        let n = if reg.shifts_dummy_byte() { 3 } else { 2 };

        self.spi.transfer(&mut response[..n], &command[..n])?;
        Ok(response[n - 1])
    }

    pub fn write_control(&mut self, reg: ControlRegister, data: u8) -> Result<(), SPI::Error> {
        if let Some(bank) = reg.bank()
            && self.current_bank != bank
        {
            self.set_bank(bank)?;
        }

        self.spi.write(&[reg.opcode(Op::WCR), data])
    }

    /// Set bits of a global ETH register. The bit-field commands are only
    /// ever issued on the globally aliased registers, so no bank switch.
    fn bit_set(&mut self, reg: ControlRegister, mask: u8) -> Result<(), SPI::Error> {
        self.spi.write(&[reg.opcode(Op::BFS), mask])
    }

    /// Clear bits of a global ETH register.
    fn bit_clear(&mut self, reg: ControlRegister, mask: u8) -> Result<(), SPI::Error> {
        self.spi.write(&[reg.opcode(Op::BFC), mask])
    }

    pub fn read_phy(&mut self, reg: PhyRegister) -> Result<u16, SPI::Error> {
        self.write_control(MIREGADR, reg.addr())?;
        self.write_control(MICMD, bits::MICMD_MIIRD)?;

        while self.read_control(MISTAT)? & bits::MISTAT_BUSY != 0 {}

        self.write_control(MICMD, 0)?;
        self.read_u16(MIRDL, MIRDH)
    }

    pub fn write_phy(&mut self, reg: PhyRegister, data: u16) -> Result<(), SPI::Error> {
        self.write_control(MIREGADR, reg.addr())?;
        self.write_u16(MIWRL, MIWRH, data)?;

        while self.read_control(MISTAT)? & bits::MISTAT_BUSY != 0 {}

        Ok(())
    }

    /// Transmit one fully framed Ethernet packet (destination MAC first).
    pub fn transmit(&mut self, frame: &[u8]) -> Result<(), SPI::Error> {
        // Wait out any in-flight transmission. A late collision can wedge
        // the transmit logic (Rev. B4 Silicon Errata point 12); kick it with
        // a transmit-logic reset when the error flag shows up.
        while self.read_control(ECON1)? & bits::ECON1_TXRTS != 0 {
            if self.read_control(EIR)? & bits::EIR_TXERIF != 0 {
                self.bit_set(ECON1, bits::ECON1_TXRST)?;
                self.bit_clear(ECON1, bits::ECON1_TXRST)?;
            }
        }

        self.write_u16(EWRPTL, EWRPTH, TX_START)?;
        // The control byte sits at TX_START, the frame right behind it.
        self.write_u16(ETXNDL, ETXNDH, TX_START + frame.len() as u16)?;

        // Per-packet control byte: override MACON3 with pad + CRC for this
        // frame.
        let mut ops = [
            Operation::Write(&[Op::WBM as u8 | BUF_CMD_ADDR]),
            Operation::Write(&[0xff]),
            Operation::Write(frame),
        ];
        self.spi.transaction(&mut ops)?;

        self.bit_set(ECON1, bits::ECON1_TXRTS)
    }

    /// Receive one pending frame into `buf`. Returns the number of bytes
    /// written, 0 when the ring is empty or the frame was invalid.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize, SPI::Error> {
        if self.read_control(EPKTCNT)? == 0 {
            return Ok(0);
        }

        self.write_u16(ERDPTL, ERDPTH, self.next_packet_ptr)?;

        // Six-byte receive header: next-packet pointer, byte count, status.
        let mut header = [0u8; 6];
        self.mem_read(&mut header)?;
        let next_packet = u16::from_le_bytes([header[0], header[1]]);
        let byte_count = u16::from_le_bytes([header[2], header[3]]);
        let status = u16::from_le_bytes([header[4], header[5]]);

        // The byte count includes the CRC the filter already validated.
        let mut len = usize::from(byte_count.saturating_sub(4));
        len = len.min(buf.len().saturating_sub(1));

        if status & 0x0080 == 0 {
            // Receive-OK clear: drop the frame but still release its slot.
            len = 0;
        } else {
            self.mem_read(&mut buf[..len])?;
        }

        self.write_u16(ERXRDPTL, ERXRDPTH, free_boundary(next_packet))?;
        self.bit_set(ECON2, bits::ECON2_PKTDEC)?;
        self.next_packet_ptr = next_packet;

        Ok(len)
    }

    fn mem_read(&mut self, data: &mut [u8]) -> Result<(), SPI::Error> {
        let mut ops = [
            Operation::Write(&[Op::RBM as u8 | BUF_CMD_ADDR]),
            Operation::Read(data),
        ];
        self.spi.transaction(&mut ops)
    }

    fn read_u16(&mut self, lo: ControlRegister, hi: ControlRegister) -> Result<u16, SPI::Error> {
        let lo = self.read_control(lo)? as u16;
        let hi = self.read_control(hi)? as u16;
        Ok(lo | (hi << 8))
    }

    fn write_u16(
        &mut self,
        lo: ControlRegister,
        hi: ControlRegister,
        val: u16,
    ) -> Result<(), SPI::Error> {
        self.write_control(lo, (val & 0xff) as u8)?;
        self.write_control(hi, (val >> 8) as u8)?;
        Ok(())
    }

    fn set_bank(&mut self, bank: Bank) -> Result<(), SPI::Error> {
        self.spi
            .write(&[ECON1.opcode(Op::BFC), bits::ECON1_BSEL])?;
        self.spi
            .write(&[ECON1.opcode(Op::BFS), (bank as u8) & bits::ECON1_BSEL])?;
        self.current_bank = bank;

        Ok(())
    }
}

/// Receive-ring boundary to hand back to the hardware once a packet has been
/// consumed.
///
/// `ERXRDPT` must hold an odd address (Rev. B4 Silicon Errata point 13), so
/// the boundary is the byte before the next packet, wrapped to the top of the
/// ring when that would fall outside it.
fn free_boundary(next_packet: u16) -> u16 {
    let boundary = next_packet.wrapping_sub(1);
    if (RX_START..=RX_STOP).contains(&boundary) {
        boundary
    } else {
        RX_STOP
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_boundary_is_byte_before_next_packet() {
        assert_eq!(free_boundary(0x0100), 0x00ff);
        assert_eq!(free_boundary(0x0bff), 0x0bfe);
    }

    #[test]
    fn free_boundary_wraps_at_ring_start() {
        // Underflow of the ring base lands on the last ring byte.
        assert_eq!(free_boundary(RX_START), RX_STOP);
    }

    #[test]
    fn free_boundary_clamps_pointers_outside_the_ring() {
        assert_eq!(free_boundary(RX_STOP + 2), RX_STOP);
        assert_eq!(free_boundary(0xffff), RX_STOP);
    }
}
