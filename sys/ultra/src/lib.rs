// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface between the debug agent and its host program's runtime.
//!
//! The agent lives inside a preemptive multi-threaded console program and
//! borrows that program's scheduler, message queues, caches, and overlay
//! tables rather than owning any of them. This crate names those borrowed
//! facilities: the thread context record, priorities, the event/message
//! model, overlay table entries, and the [`HostOs`] trait the shipping
//! program implements over its OS primitives. Keeping the seam here lets
//! the agent proper build and test on a host machine against a scripted
//! stand-in (see [`fake`], behind the `fake` feature).
//!
//! Threads the agent itself depends on (the agent thread, the video and
//! cartridge I/O threads, the idle thread) are never surfaced through the
//! enumeration calls; stopping or patching those would deadlock the
//! debugger. The same concern gives rise to [`HostOs::exempt_ranges`]: the
//! address ranges of runtime routines the agent calls, which must never
//! receive a breakpoint. Those ranges come from link-time knowledge only
//! the host program has.

#![no_std]

use bitflags::bitflags;
use num_derive::FromPrimitive;

#[cfg(feature = "fake")]
pub mod fake;

/// Thread priority. Matches the host scheduler's numeric scale.
pub type Pri = i32;

/// Highest priority an application thread may use.
pub const PRI_APP_MAX: Pri = 127;
/// Priority of the runtime-monitor band the agent thread runs in.
pub const PRI_RMON: Pri = 250;

/// Start of the directly-mapped kernel segments.
pub const KSEG_BASE: u32 = 0x8000_0000;
/// First address past the directly-mapped kernel segments.
pub const KSEG_END: u32 = 0xC000_0000;

/// Strips the kernel-segment bits off a CPU address, leaving the physical
/// address the hardware DMAs to.
pub fn k0_to_phys(addr: u32) -> u32 {
    addr & 0x1FFF_FFFF
}

/// Opaque handle to a live thread in the host's active queue. The meaning
/// of the payload is the host's business; handles compare equal exactly
/// when they name the same thread.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ThreadRef(pub u32);

/// Saved execution state of a stopped thread.
///
/// Field layout follows the host runtime's context record: 29 general
/// registers ($zero, $k0, and $k1 are not preserved), the multiply unit,
/// the status/cause/faulting-address group, and the 16 even-numbered
/// double-width floating-point registers plus their control word.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ThreadContext {
    pub at: u64,
    pub v0: u64,
    pub v1: u64,
    pub a0: u64,
    pub a1: u64,
    pub a2: u64,
    pub a3: u64,
    pub t0: u64,
    pub t1: u64,
    pub t2: u64,
    pub t3: u64,
    pub t4: u64,
    pub t5: u64,
    pub t6: u64,
    pub t7: u64,
    pub s0: u64,
    pub s1: u64,
    pub s2: u64,
    pub s3: u64,
    pub s4: u64,
    pub s5: u64,
    pub s6: u64,
    pub s7: u64,
    pub t8: u64,
    pub t9: u64,
    pub gp: u64,
    pub sp: u64,
    pub s8: u64,
    pub ra: u64,
    pub lo: u64,
    pub hi: u64,
    pub sr: u32,
    pub pc: u32,
    pub cause: u32,
    pub badvaddr: u32,
    pub fpcsr: u32,
    pub fp: [u64; 16],
}

/// Exception codes as they appear in bits 6..2 of the cause register.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum ExcCode {
    Int = 0,
    Mod = 1,
    TlbL = 2,
    TlbS = 3,
    AdEL = 4,
    AdES = 5,
    Ibe = 6,
    Dbe = 7,
    Sys = 8,
    Bp = 9,
    Ri = 10,
    CpU = 11,
    Ov = 12,
    Tr = 13,
    Fpe = 15,
    Watch = 23,
}

/// Extracts the exception code from a cause register value.
pub fn exc_code(cause: u32) -> Option<ExcCode> {
    num_traits::FromPrimitive::from_u32((cause >> 2) & 0x1F)
}

/// A half-open `[start, end)` address range.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AddressRange {
    pub start: u32,
    pub end: u32,
}

impl AddressRange {
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr < self.end
    }
}

bitflags! {
    /// Edge conditions the serial FIFO can raise.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct FifoIrq: u8 {
        /// The link lost power or was unplugged.
        const OFF = 1 << 0;
        /// Received bytes are waiting.
        const RX = 1 << 1;
    }
}

/// Categories of relocatable code the host program manages.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OverlayCategory {
    GameState,
    Kaleido,
    Actor,
    EffectSs,
}

impl OverlayCategory {
    pub const ALL: [Self; 4] =
        [Self::GameState, Self::Kaleido, Self::Actor, Self::EffectSs];
}

/// One slot of an overlay table, as the host program keeps it.
///
/// `vram_start` of zero marks a slot with no relocatable code behind it;
/// `load_addr` of `None` marks code that is currently paged out.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OverlayEntry {
    pub vram_start: u32,
    pub vram_end: u32,
    pub load_addr: Option<u32>,
    pub name: Option<&'static str>,
}

/// Whether a reported library is fixed or relocatable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LibKind {
    Static,
    Overlay,
}

/// A loadable-code descriptor as reported to the remote debugger.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Library {
    pub kind: LibKind,
    pub name: &'static str,
    pub vram_start: u32,
    pub vram_end: u32,
    pub load_addr: Option<u32>,
}

/// Messages delivered to the agent's queue.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// The FIFO reported a power-off edge.
    FifoOff,
    /// The FIFO has bytes waiting.
    FifoRx,
    /// A thread hit a breakpoint instruction.
    CpuBreak,
    /// A thread faulted.
    Fault,
    /// An overlay was loaded or unloaded; the descriptor rides along.
    /// `None` means "something changed, details unknown".
    Library(Option<Library>),
}

/// Services the agent borrows from the host runtime.
///
/// Enumeration calls never yield exempt threads. Context records may only
/// be written while the owning thread is stopped; the agent upholds that,
/// the host just hands out the storage.
pub trait HostOs {
    /// First non-exempt thread in the active queue.
    fn first_thread(&self) -> Option<ThreadRef>;
    /// Successor of `t` in the active queue, skipping exempt threads.
    fn next_thread(&self, t: ThreadRef) -> Option<ThreadRef>;
    /// The numeric id the thread was created with. May be zero.
    fn thread_id(&self, t: ThreadRef) -> u32;
    fn context(&self, t: ThreadRef) -> &ThreadContext;
    fn context_mut(&mut self, t: ThreadRef) -> &mut ThreadContext;
    fn priority(&self, t: ThreadRef) -> Pri;
    fn set_priority(&mut self, t: ThreadRef, pri: Pri);
    fn start_thread(&mut self, t: ThreadRef);
    fn stop_thread(&mut self, t: ThreadRef);
    /// The thread whose break or fault was most recently delivered.
    fn faulted_thread(&self) -> Option<ThreadRef>;

    fn read8(&self, addr: u32) -> u8;
    fn write8(&mut self, addr: u32, v: u8);
    fn read32(&self, addr: u32) -> u32;
    fn write32(&mut self, addr: u32, v: u32);
    /// Writes the data cache back and invalidates the instruction cache
    /// over `[addr, addr + len)`. Required after patching code.
    fn flush_insn(&mut self, addr: u32, len: usize);

    /// Programs the CPU watch register with a raw bit pattern; zero
    /// disables it.
    fn set_watchlo(&mut self, bits: u32);

    /// Receives the next message for the agent. A blocking receive
    /// suspends until a message arrives; a non-blocking one returns
    /// `None` immediately when the queue is empty.
    fn recv(&mut self, block: bool) -> Option<Event>;
    /// Routes CPU-break and fault events into the agent's queue.
    fn catch_thread_events(&mut self);
    /// Routes the given FIFO edges into the agent's queue. Callers wrap
    /// arming in an interrupt-disabled window to avoid losing an edge
    /// that fires mid-update.
    fn arm_fifo(&mut self, irqs: FifoIrq);
    fn disarm_fifo(&mut self, irqs: FifoIrq);
    /// FIFO edges currently routed to a live recipient.
    fn armed_fifo(&self) -> FifoIrq;
    fn intr_disable(&mut self) -> u32;
    fn intr_restore(&mut self, sr: u32);

    /// Ranges containing runtime routines the agent itself calls,
    /// ordered by start address. Breakpoints inside these are refused.
    fn exempt_ranges(&self) -> &[AddressRange];

    /// The overlay table for one category.
    fn overlays(&self, cat: OverlayCategory) -> &[OverlayEntry];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exc_code_extraction() {
        assert_eq!(exc_code(0), Some(ExcCode::Int));
        assert_eq!(exc_code(9 << 2), Some(ExcCode::Bp));
        assert_eq!(exc_code(23 << 2), Some(ExcCode::Watch));
        // Bits outside the code field don't confuse the extraction.
        assert_eq!(exc_code(0x8000_0000 | (15 << 2)), Some(ExcCode::Fpe));
        // Code 14 is unassigned on this core.
        assert_eq!(exc_code(14 << 2), None);
    }

    #[test]
    fn address_range_is_half_open() {
        let r = AddressRange {
            start: 0x8000_1000,
            end: 0x8000_2000,
        };
        assert!(r.contains(0x8000_1000));
        assert!(r.contains(0x8000_1FFF));
        assert!(!r.contains(0x8000_2000));
        assert!(!r.contains(0x8000_0FFF));
    }

    #[test]
    fn physical_mapping() {
        assert_eq!(k0_to_phys(0x8040_0000), 0x0040_0000);
        assert_eq!(k0_to_phys(0xA805_0000), 0x0805_0000);
    }
}
