// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parallel interface (PI) transport.
//!
//! Byte-granular transfers between RAM and a device on the cartridge bus.
//! The PI DMA engine wants the RAM side 8-byte aligned at the start and
//! 2-byte aligned at the end, so a transfer is split into a leading
//! programmed-I/O segment, an aligned DMA segment, and a trailing PIO
//! segment. When the low bit of the device and RAM addresses disagree no
//! DMA alignment exists at all and the whole transfer goes PIO.
//!
//! PIO works in whole 32-bit device words: a write reads the word
//! covering each partially-touched lane, merges the new bytes in, and
//! writes it back; a read peels bytes out of each word. Both wait for the
//! bus to go idle before touching it.
//!
//! The split is computed by [`plan`], which is pure; [`Pi`] executes a
//! plan against a [`PiBus`]. The hardware bus lives in [`CartBus`], which
//! borrows OS services (access semaphore, interrupt control, cache
//! maintenance, DMA-completion event) through [`PiPlatform`].

#![cfg_attr(not(test), no_std)]

use bitflags::bitflags;

const PI_BASE: u32 = 0xA460_0000;
const PI_DRAM_ADDR: u32 = PI_BASE;
const PI_CART_ADDR: u32 = PI_BASE + 0x04;
// Length registers are named from the cartridge's point of view: a "read"
// drains RAM out to the device.
const PI_RD_LEN: u32 = PI_BASE + 0x08;
const PI_WR_LEN: u32 = PI_BASE + 0x0C;
const PI_STATUS: u32 = PI_BASE + 0x10;
const PI_BSD_DOM1_LAT: u32 = PI_BASE + 0x14;
const PI_BSD_DOM1_PWD: u32 = PI_BASE + 0x18;

bitflags! {
    /// PI status register, read side.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct PiStatus: u32 {
        const DMA_BUSY = 1 << 0;
        const IO_BUSY = 1 << 1;
        const ERROR = 1 << 2;
    }
}

/// Write side of the status register: acknowledges the completion
/// interrupt.
const PI_STATUS_CLR_INTR: u32 = 1 << 1;

/// OS services the PI driver borrows from the host program.
pub trait PiPlatform {
    /// Takes the PI access semaphore shared with the host's own I/O.
    fn pi_acquire(&mut self);
    fn pi_release(&mut self);
    fn intr_disable(&mut self) -> u32;
    fn intr_restore(&mut self, sr: u32);
    /// Whether interrupts are currently enabled, which decides between
    /// event-driven and polled DMA completion.
    fn interrupts_enabled(&self) -> bool;
    fn dcache_writeback(&mut self, addr: u32, len: usize);
    fn dcache_inval(&mut self, addr: u32, len: usize);
    /// Routes the next PI completion event to the caller. Must be called
    /// before the DMA is kicked so the edge can't be lost.
    fn dma_wait_arm(&mut self);
    /// Blocks until the armed completion event arrives and unroutes it.
    fn dma_wait(&mut self);
}

/// Raw operations on the cartridge bus.
///
/// Split out from [`Pi`] so transfer composition can be exercised against
/// an in-memory bus.
pub trait PiBus {
    /// 32-bit load from a device address, after waiting for bus idle.
    fn read_raw(&mut self, dev: u32) -> u32;
    /// 32-bit store to a device address, after waiting for bus idle.
    fn write_raw(&mut self, dev: u32, v: u32);
    /// DMA device -> RAM, including cache maintenance and completion
    /// wait.
    fn dma_read(&mut self, dev: u32, ram: usize, len: usize);
    /// DMA RAM -> device, including cache maintenance and completion
    /// wait.
    fn dma_write(&mut self, dev: u32, ram: usize, len: usize);
    fn acquire(&mut self);
    fn release(&mut self);
    fn intr_disable(&mut self) -> u32;
    fn intr_restore(&mut self, sr: u32);
    /// Whether a PIO access or DMA is in flight right now. Used by code
    /// that must not contend with the host's own transfers.
    fn io_busy(&mut self) -> bool;
    /// Current (latency, pulse-width) timing of bus domain 1.
    fn dom1_timing(&mut self) -> (u32, u32);
    fn set_dom1_timing(&mut self, lat: u32, pwd: u32);
}

/// How a transfer breaks down. Segment tuples are
/// `(device address, RAM address, length)`. RAM addresses are kept at
/// pointer width so composition can run hosted in tests.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transfer {
    /// No usable DMA alignment; move everything by PIO.
    Pio { dev: u32, ram: usize, len: usize },
    /// Leading PIO up to 8-byte RAM alignment, DMA down to 2-byte
    /// alignment, trailing PIO for the remainder. Any segment may be
    /// empty.
    Split {
        lead: (u32, usize, usize),
        dma: (u32, usize, usize),
        tail: (u32, usize, usize),
    },
}

/// Splits a transfer per the DMA engine's alignment rules.
pub fn plan(dev: u32, ram: usize, len: usize) -> Transfer {
    if (dev as usize ^ ram) & 1 != 0 {
        return Transfer::Pio { dev, ram, len };
    }

    let ram_end = ram + len;
    let ram_align_start = (ram + 0x7) & !0x7;

    if ram_end <= ram_align_start {
        return Transfer::Pio { dev, ram, len };
    }

    let ram_align_end = ram_end & !0x1;
    let lead = ram_align_start - ram;
    let tail = ram_end - ram_align_end;
    let dma = len - lead - tail;

    Transfer::Split {
        lead: (dev, ram, lead),
        dma: (dev + lead as u32, ram_align_start, dma),
        tail: (dev + (len - tail) as u32, ram_align_end, tail),
    }
}

fn pio_read<B: PiBus>(bus: &mut B, dev: u32, dst: &mut [u8]) {
    if dst.is_empty() {
        return;
    }

    let dev_start = dev & !0x3;
    let dev_end = (dev + dst.len() as u32 + 0x3) & !0x3;
    let mut idx = -((dev - dev_start) as i32);
    let mut dev_p = dev_start;

    while dev_p < dev_end {
        let mut w = bus.read_raw(dev_p);
        for _ in 0..4 {
            if idx >= 0 && (idx as usize) < dst.len() {
                dst[idx as usize] = (w >> 24) as u8;
            }
            w <<= 8;
            idx += 1;
        }
        dev_p += 4;
    }
}

fn pio_write<B: PiBus>(bus: &mut B, dev: u32, src: &[u8]) {
    if src.is_empty() {
        return;
    }

    let dev_start = dev & !0x3;
    let dev_end = (dev + src.len() as u32 + 0x3) & !0x3;
    let mut idx = -((dev - dev_start) as i32);
    let mut dev_p = dev_start;

    while dev_p < dev_end {
        // Rotate the existing word through, substituting the lanes the
        // source covers, so untouched bytes survive the read-modify-write.
        let mut w = bus.read_raw(dev_p);
        for _ in 0..4 {
            let b = if idx >= 0 && (idx as usize) < src.len() {
                src[idx as usize]
            } else {
                (w >> 24) as u8
            };
            w = (w << 8) | u32::from(b);
            idx += 1;
        }
        bus.write_raw(dev_p, w);
        dev_p += 4;
    }
}

/// Transfer engine over some [`PiBus`].
pub struct Pi<B> {
    pub bus: B,
}

impl<B: PiBus> Pi<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Device -> RAM, assuming the caller already holds the PI access
    /// semaphore.
    pub fn read_locked(&mut self, dev: u32, dst: &mut [u8]) {
        match plan(dev, dst.as_ptr() as usize, dst.len()) {
            Transfer::Pio { dev, .. } => pio_read(&mut self.bus, dev, dst),
            Transfer::Split { lead, dma, tail } => {
                let (head, rest) = dst.split_at_mut(lead.2);
                let (mid, rest) = rest.split_at_mut(dma.2);
                pio_read(&mut self.bus, lead.0, head);
                pio_read(&mut self.bus, tail.0, rest);
                if !mid.is_empty() {
                    self.bus.dma_read(dma.0, dma.1, mid.len());
                }
            }
        }
    }

    /// RAM -> device, assuming the caller already holds the PI access
    /// semaphore.
    pub fn write_locked(&mut self, dev: u32, src: &[u8]) {
        match plan(dev, src.as_ptr() as usize, src.len()) {
            Transfer::Pio { dev, .. } => pio_write(&mut self.bus, dev, src),
            Transfer::Split { lead, dma, tail } => {
                let (head, rest) = src.split_at(lead.2);
                let (mid, rest) = rest.split_at(dma.2);
                pio_write(&mut self.bus, lead.0, head);
                pio_write(&mut self.bus, tail.0, rest);
                if !mid.is_empty() {
                    self.bus.dma_write(dma.0, dma.1, mid.len());
                }
            }
        }
    }

    /// Device -> RAM with semaphore acquisition.
    pub fn read(&mut self, dev: u32, dst: &mut [u8]) {
        self.bus.acquire();
        self.read_locked(dev, dst);
        self.bus.release();
    }

    /// RAM -> device with semaphore acquisition.
    pub fn write(&mut self, dev: u32, src: &[u8]) {
        self.bus.acquire();
        self.write_locked(dev, src);
        self.bus.release();
    }
}

/// The hardware cartridge bus.
pub struct CartBus<P> {
    platform: P,
}

impl<P: PiPlatform> CartBus<P> {
    pub fn new(platform: P) -> Self {
        Self { platform }
    }

    fn io_read(addr: u32) -> u32 {
        unsafe { core::ptr::read_volatile(addr as *const u32) }
    }

    fn io_write(addr: u32, v: u32) {
        unsafe { core::ptr::write_volatile(addr as *mut u32, v) }
    }

    pub fn busy() -> bool {
        let status =
            PiStatus::from_bits_truncate(Self::io_read(PI_STATUS));
        status.intersects(PiStatus::DMA_BUSY | PiStatus::IO_BUSY)
    }

    fn wait_idle() {
        while Self::busy() {}
    }

    fn dma(&mut self, dev: u32, ram: usize, len: usize, len_reg: u32) {
        if len == 0 {
            return;
        }

        let armed = self.platform.interrupts_enabled();
        if armed {
            self.platform.dma_wait_arm();
        }

        Self::io_write(PI_DRAM_ADDR, ultra::k0_to_phys(ram as u32));
        Self::io_write(PI_CART_ADDR, ultra::k0_to_phys(dev));
        Self::io_write(len_reg, len as u32 - 1);

        if armed {
            self.platform.dma_wait();
        } else {
            Self::wait_idle();
            Self::io_write(PI_STATUS, PI_STATUS_CLR_INTR);
        }
    }
}

impl<P: PiPlatform> PiBus for CartBus<P> {
    fn read_raw(&mut self, dev: u32) -> u32 {
        Self::wait_idle();
        Self::io_read(dev)
    }

    fn write_raw(&mut self, dev: u32, v: u32) {
        Self::wait_idle();
        Self::io_write(dev, v);
    }

    fn dma_read(&mut self, dev: u32, ram: usize, len: usize) {
        self.platform.dcache_writeback(ram as u32, len);
        self.platform.dcache_inval(ram as u32, len);
        self.dma(dev, ram, len, PI_WR_LEN);
    }

    fn dma_write(&mut self, dev: u32, ram: usize, len: usize) {
        self.platform.dcache_writeback(ram as u32, len);
        self.dma(dev, ram, len, PI_RD_LEN);
    }

    fn acquire(&mut self) {
        self.platform.pi_acquire();
    }

    fn release(&mut self) {
        self.platform.pi_release();
    }

    fn intr_disable(&mut self) -> u32 {
        self.platform.intr_disable()
    }

    fn intr_restore(&mut self, sr: u32) {
        self.platform.intr_restore(sr);
    }

    fn io_busy(&mut self) -> bool {
        Self::busy()
    }

    fn dom1_timing(&mut self) -> (u32, u32) {
        (Self::io_read(PI_BSD_DOM1_LAT), Self::io_read(PI_BSD_DOM1_PWD))
    }

    fn set_dom1_timing(&mut self, lat: u32, pwd: u32) {
        Self::io_write(PI_BSD_DOM1_LAT, lat);
        Self::io_write(PI_BSD_DOM1_PWD, pwd);
    }
}
