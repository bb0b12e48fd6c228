// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scriptable [`HostOs`] stand-in for tests.
//!
//! Provides a handful of fake threads, one window of big-endian RAM, a
//! message queue the test can preload, and recording of everything the
//! agent does to the watch register and thread set. Nothing here suspends;
//! a blocking receive from an empty queue is a test bug and panics.

use crate::{
    AddressRange, Event, FifoIrq, HostOs, OverlayCategory, OverlayEntry,
    Pri, ThreadContext, ThreadRef,
};

pub const RAM_LEN: usize = 0x2000;

#[derive(Clone, Debug)]
pub struct FakeThread {
    pub id: u32,
    pub pri: Pri,
    pub ctx: ThreadContext,
    /// Stop-request nesting depth, like the real scheduler keeps.
    pub stop_count: i32,
}

pub struct FakeHost {
    pub threads: heapless::Vec<FakeThread, 8>,
    pub ram_base: u32,
    pub ram: [u8; RAM_LEN],
    pub queue: heapless::Deque<Event, 16>,
    pub armed: FifoIrq,
    pub watchlo: u32,
    pub watchlo_writes: heapless::Vec<u32, 16>,
    pub flushed: heapless::Vec<(u32, usize), 16>,
    pub catching_thread_events: bool,
    pub faulted: Option<ThreadRef>,
    pub exempt: heapless::Vec<AddressRange, 4>,
    pub gamestate: heapless::Vec<OverlayEntry, 8>,
    pub kaleido: heapless::Vec<OverlayEntry, 8>,
    pub actor: heapless::Vec<OverlayEntry, 8>,
    pub effect: heapless::Vec<OverlayEntry, 8>,
    pub intr_depth: u32,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            threads: heapless::Vec::new(),
            ram_base: 0x8010_0000,
            ram: [0; RAM_LEN],
            queue: heapless::Deque::new(),
            armed: FifoIrq::empty(),
            watchlo: 0,
            watchlo_writes: heapless::Vec::new(),
            flushed: heapless::Vec::new(),
            catching_thread_events: false,
            faulted: None,
            exempt: heapless::Vec::new(),
            gamestate: heapless::Vec::new(),
            kaleido: heapless::Vec::new(),
            actor: heapless::Vec::new(),
            effect: heapless::Vec::new(),
            intr_depth: 0,
        }
    }

    /// Adds a stopped-at-`pc` thread and returns its handle.
    pub fn add_thread(&mut self, id: u32, pc: u32) -> ThreadRef {
        let t = FakeThread {
            id,
            pri: 10,
            ctx: ThreadContext {
                pc,
                ..ThreadContext::default()
            },
            stop_count: 0,
        };
        let r = ThreadRef(self.threads.len() as u32);
        self.threads.push(t).ok().expect("too many fake threads");
        r
    }

    pub fn thread(&self, t: ThreadRef) -> &FakeThread {
        &self.threads[t.0 as usize]
    }

    pub fn thread_mut(&mut self, t: ThreadRef) -> &mut FakeThread {
        &mut self.threads[t.0 as usize]
    }

    pub fn post(&mut self, ev: Event) {
        self.queue.push_back(ev).expect("fake queue overflow");
    }

    /// True when every fake thread has a pending stop request.
    pub fn all_stopped(&self) -> bool {
        self.threads.iter().all(|t| t.stop_count > 0)
    }

    /// True when no fake thread has a pending stop request.
    pub fn all_running(&self) -> bool {
        self.threads.iter().all(|t| t.stop_count <= 0)
    }

    fn ram_index(&self, addr: u32) -> Option<usize> {
        let off = addr.checked_sub(self.ram_base)? as usize;
        if off < RAM_LEN {
            Some(off)
        } else {
            None
        }
    }

    fn table(&self, cat: OverlayCategory) -> &heapless::Vec<OverlayEntry, 8> {
        match cat {
            OverlayCategory::GameState => &self.gamestate,
            OverlayCategory::Kaleido => &self.kaleido,
            OverlayCategory::Actor => &self.actor,
            OverlayCategory::EffectSs => &self.effect,
        }
    }
}

impl HostOs for FakeHost {
    fn first_thread(&self) -> Option<ThreadRef> {
        if self.threads.is_empty() {
            None
        } else {
            Some(ThreadRef(0))
        }
    }

    fn next_thread(&self, t: ThreadRef) -> Option<ThreadRef> {
        let next = t.0 + 1;
        if (next as usize) < self.threads.len() {
            Some(ThreadRef(next))
        } else {
            None
        }
    }

    fn thread_id(&self, t: ThreadRef) -> u32 {
        self.thread(t).id
    }

    fn context(&self, t: ThreadRef) -> &ThreadContext {
        &self.thread(t).ctx
    }

    fn context_mut(&mut self, t: ThreadRef) -> &mut ThreadContext {
        &mut self.thread_mut(t).ctx
    }

    fn priority(&self, t: ThreadRef) -> Pri {
        self.thread(t).pri
    }

    fn set_priority(&mut self, t: ThreadRef, pri: Pri) {
        self.thread_mut(t).pri = pri;
    }

    fn start_thread(&mut self, t: ThreadRef) {
        self.thread_mut(t).stop_count -= 1;
    }

    fn stop_thread(&mut self, t: ThreadRef) {
        self.thread_mut(t).stop_count += 1;
    }

    fn faulted_thread(&self) -> Option<ThreadRef> {
        self.faulted
    }

    fn read8(&self, addr: u32) -> u8 {
        match self.ram_index(addr) {
            Some(i) => self.ram[i],
            None => 0,
        }
    }

    fn write8(&mut self, addr: u32, v: u8) {
        if let Some(i) = self.ram_index(addr) {
            self.ram[i] = v;
        }
    }

    fn read32(&self, addr: u32) -> u32 {
        u32::from_be_bytes([
            self.read8(addr),
            self.read8(addr + 1),
            self.read8(addr + 2),
            self.read8(addr + 3),
        ])
    }

    fn write32(&mut self, addr: u32, v: u32) {
        for (i, b) in v.to_be_bytes().iter().enumerate() {
            self.write8(addr + i as u32, *b);
        }
    }

    fn flush_insn(&mut self, addr: u32, len: usize) {
        let _ = self.flushed.push((addr, len));
    }

    fn set_watchlo(&mut self, bits: u32) {
        self.watchlo = bits;
        let _ = self.watchlo_writes.push(bits);
    }

    fn recv(&mut self, block: bool) -> Option<Event> {
        let ev = self.queue.pop_front();
        if block && ev.is_none() {
            panic!("blocking receive with nothing scripted");
        }
        ev
    }

    fn catch_thread_events(&mut self) {
        self.catching_thread_events = true;
    }

    fn arm_fifo(&mut self, irqs: FifoIrq) {
        self.armed |= irqs;
    }

    fn disarm_fifo(&mut self, irqs: FifoIrq) {
        self.armed &= !irqs;
    }

    fn armed_fifo(&self) -> FifoIrq {
        self.armed
    }

    fn intr_disable(&mut self) -> u32 {
        self.intr_depth += 1;
        self.intr_depth
    }

    fn intr_restore(&mut self, _sr: u32) {
        self.intr_depth -= 1;
    }

    fn exempt_ranges(&self) -> &[AddressRange] {
        &self.exempt
    }

    fn overlays(&self, cat: OverlayCategory) -> &[OverlayEntry] {
        self.table(cat)
    }
}
