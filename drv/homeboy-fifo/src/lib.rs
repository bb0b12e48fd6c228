// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Homeboy FIFO backend.
//!
//! An emulator-provided device: a register block mapped straight into the
//! CPU's uncached segment, with a FIFO that transfers by DMA to and from
//! a physical DRAM address the driver hands it. No bus locking, no data
//! window, no timing profiles; writing a length register starts the
//! transfer and the residual left in the register on return says how
//! much didn't move.

#![cfg_attr(not(test), no_std)]

use bitflags::bitflags;
use drv_fifo_api::{FifoDevice, NoDevice};
use ultra::FifoIrq;
use vcell::VolatileCell;

const HB_BASE: u32 = 0xA805_0000;

/// Value the device parks in its key register.
const KEY_MAGIC: u32 = 0x1234;

/// The device's register block. SD-card registers are carried for layout
/// fidelity; this driver only touches the key and the FIFO group.
#[repr(C)]
pub struct HbRegs {
    pub key: VolatileCell<u32>,
    pub sd_dram_addr: VolatileCell<u32>,
    pub sd_write_lba: VolatileCell<u32>,
    pub sd_read_lba: VolatileCell<u32>,
    pub sd_n_blocks: VolatileCell<u32>,
    pub status: VolatileCell<u32>,
    pub dram_save_addr: VolatileCell<u32>,
    pub dram_save_len: VolatileCell<u32>,
    pub dram_save_key: VolatileCell<u32>,
    pub timebase_hi: VolatileCell<u32>,
    pub timebase_lo: VolatileCell<u32>,
    pub fifo_status: VolatileCell<u32>,
    pub fifo_dram_addr: VolatileCell<u32>,
    pub fifo_rd_len: VolatileCell<u32>,
    pub fifo_wr_len: VolatileCell<u32>,
}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct HbFifoStatus: u32 {
        const PWR = 1 << 0;
        const RXF = 1 << 1;
        const TXE = 1 << 2;
    }
}

/// Whether a read would make progress: powered, receive buffer not
/// empty.
pub fn can_read(sta: HbFifoStatus) -> bool {
    sta.contains(HbFifoStatus::PWR) && !sta.contains(HbFifoStatus::RXF)
}

/// Whether a write would make progress: powered, transmit buffer not
/// full.
pub fn can_write(sta: HbFifoStatus) -> bool {
    sta.contains(HbFifoStatus::PWR) && !sta.contains(HbFifoStatus::TXE)
}

pub struct Homeboy {
    regs: &'static HbRegs,
}

impl Default for Homeboy {
    fn default() -> Self {
        Self::new()
    }
}

impl Homeboy {
    pub fn new() -> Self {
        Self {
            regs: unsafe { &*(HB_BASE as *const HbRegs) },
        }
    }

    /// For targets that map the block somewhere nonstandard.
    ///
    /// # Safety
    ///
    /// `regs` must point at a live device register block.
    pub unsafe fn with_regs(regs: &'static HbRegs) -> Self {
        Self { regs }
    }

    fn status(&self) -> HbFifoStatus {
        HbFifoStatus::from_bits_truncate(self.regs.fifo_status.get())
    }
}

impl FifoDevice for Homeboy {
    fn probe(&mut self) -> Result<(), NoDevice> {
        if self.regs.key.get() == KEY_MAGIC {
            Ok(())
        } else {
            Err(NoDevice)
        }
    }

    fn irqs(&mut self) -> FifoIrq {
        let sta = self.status();
        let mut irqs = FifoIrq::empty();

        if !sta.contains(HbFifoStatus::PWR) {
            irqs |= FifoIrq::OFF;
        }
        if can_read(sta) {
            irqs |= FifoIrq::RX;
        }

        irqs
    }

    fn pwr(&mut self) -> bool {
        self.status().contains(HbFifoStatus::PWR)
    }

    fn poll_rx(&mut self) -> bool {
        can_read(self.status())
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        while !can_read(self.status()) {}

        self.regs
            .fifo_dram_addr
            .set(ultra::k0_to_phys(buf.as_ptr() as u32));
        self.regs.fifo_rd_len.set(buf.len() as u32);

        // The length register counts down as the DMA runs; what's left
        // is the residual.
        buf.len() - self.regs.fifo_rd_len.get() as usize
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        while !can_write(self.status()) {}

        self.regs
            .fifo_dram_addr
            .set(ultra::k0_to_phys(buf.as_ptr() as u32));
        self.regs.fifo_wr_len.set(buf.len() as u32);

        buf.len() - self.regs.fifo_wr_len.get() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_requires_power() {
        assert!(!can_read(HbFifoStatus::empty()));
        assert!(!can_write(HbFifoStatus::empty()));
        assert!(!can_read(HbFifoStatus::RXF));
        assert!(!can_write(HbFifoStatus::TXE));
    }

    #[test]
    fn full_and_empty_bits_gate_transfers() {
        assert!(can_read(HbFifoStatus::PWR));
        assert!(!can_read(HbFifoStatus::PWR | HbFifoStatus::RXF));
        assert!(can_read(HbFifoStatus::PWR | HbFifoStatus::TXE));

        assert!(can_write(HbFifoStatus::PWR));
        assert!(!can_write(HbFifoStatus::PWR | HbFifoStatus::TXE));
        assert!(can_write(HbFifoStatus::PWR | HbFifoStatus::RXF));
    }

    #[test]
    fn register_block_layout() {
        assert_eq!(core::mem::size_of::<HbRegs>(), 0x3C);
        assert_eq!(core::mem::offset_of!(HbRegs, fifo_status), 0x2C);
        assert_eq!(core::mem::offset_of!(HbRegs, fifo_dram_addr), 0x30);
        assert_eq!(core::mem::offset_of!(HbRegs, fifo_rd_len), 0x34);
        assert_eq!(core::mem::offset_of!(HbRegs, fifo_wr_len), 0x38);
    }
}
