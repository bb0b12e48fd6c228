// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Remote debug agent.
//!
//! A debugger-side stub speaking the GDB remote serial protocol over a
//! cartridge or emulator FIFO, embedded in a running console program.
//! The agent runs as one dedicated thread at the runtime-monitor
//! priority and spends its life in [`agent_main`]: wait for an event
//! (received bytes, link power-off, a thread hitting a trap or
//! faulting, an overlay being paged), act on it, wait again.
//!
//! A session begins implicitly: the first packet that survives its
//! checksum stops the world and latches the agent attached. From there
//! the host debugger inspects and mutates threads, memory, and
//! registers, plants breakpoints and a watchpoint, and steps. Detach --
//! explicit, or forced by the link dropping -- unwinds everything the
//! session installed and sets the program running again.
//!
//! The agent never terminates and must never take its host down with
//! it: every error path degrades to "report `E00` and wait for the
//! next packet".

#![cfg_attr(not(test), no_std)]

pub mod io;
pub mod libs;
pub mod regs;
pub mod swbkp;

mod handlers;
mod pkt;
mod step;

use heapless::Vec;
use rsp_wire::{Checksum, RleCoalescer};
use ultra::{
    exc_code, Event, ExcCode, FifoIrq, HostOs, LibKind, Library, Pri,
    ThreadRef,
};

pub use io::IoMux;
pub use pkt::IO_BUFSIZE;

use pkt::PktKind;
use swbkp::{SwBkp, SWBKP_MAX};

// Unix-style signal numbers, which is how the wire protocol spells
// "why did the target stop".
const SIGINT: u8 = 2;
const SIGILL: u8 = 4;
const SIGTRAP: u8 = 5;
const SIGFPE: u8 = 8;
const SIGBUS: u8 = 10;
const SIGSEGV: u8 = 11;

/// Agent activity record, for the trace ring.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Trace {
    None,
    Attach,
    Detach,
    Run,
    Stop,
    /// Dispatched a command; payload is the first byte of its name.
    Packet(u8),
    FrameError,
    CmdError,
    /// Interrupt request (`^C`) from the debugger.
    Break,
    Step {
        pc: u32,
        installed: u8,
    },
    StopReply(u8),
    ThreadEvent,
    LibraryEvent,
    BkpSet(u32),
    BkpClear(u32),
}

tracebuf::tracebuf!(Trace, 32, Trace::None);

macro_rules! trace {
    ($payload:expr) => {
        tracebuf::trace!($crate::__TRACEBUF, $payload)
    };
}
pub(crate) use trace;

/// A command handler failed; the dispatcher answers `E00`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CmdError;

impl From<rsp_wire::ScanError> for CmdError {
    fn from(_: rsp_wire::ScanError) -> Self {
        CmdError
    }
}

impl From<swbkp::BkpError> for CmdError {
    fn from(_: swbkp::BkpError) -> Self {
        CmdError
    }
}

/// The single hardware watchpoint.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Watch {
    pub active: bool,
    pub addr: u32,
    pub len: u32,
    /// 1 = write, 2 = read, 3 = either, tracking the packet encoding.
    pub kind: u32,
}

/// The agent's entire mutable state. One per process, owned by the
/// agent thread.
pub struct Rdb {
    // Receive side: linear buffer, consumed prefix, unread suffix.
    pub(crate) rx_buf: [u8; IO_BUFSIZE],
    pub(crate) rx_size: usize,
    pub(crate) rx_pos: usize,

    // Transmit side: at most one in-flight packet, kept whole for
    // retransmission.
    pub(crate) tx_buf: Vec<u8, IO_BUFSIZE>,

    // View of the current inbound packet's normalized payload.
    pub(crate) ipkt_size: usize,
    pub(crate) ipkt_pos: usize,

    // Outbound packet assembly.
    pub(crate) opkt_kind: PktKind,
    pub(crate) opkt_csum: Checksum,
    pub(crate) opkt_rle: RleCoalescer,

    pub(crate) attached: bool,
    pub(crate) noack: bool,
    pub(crate) running: bool,
    pub(crate) stepping: bool,
    pub(crate) libs_changed: bool,

    /// Thread resumed by `c`/`s`, and the one `?` reports on.
    pub(crate) cthread: Option<ThreadRef>,
    /// Thread register and memory commands operate on.
    pub(crate) gthread: Option<ThreadRef>,

    pub(crate) swbkp: [SwBkp; SWBKP_MAX],

    pub(crate) step_bkp: [SwBkp; 2],
    pub(crate) step_thread: Option<ThreadRef>,
    pub(crate) step_pri: Pri,

    pub(crate) watch: Watch,

    pub(crate) changed_lib: Option<Library>,

    // Walk state for chunked library transfers.
    pub(crate) lib_num: usize,
    pub(crate) lib_pos: [usize; 4],
}

impl Default for Rdb {
    fn default() -> Self {
        Self::new()
    }
}

impl Rdb {
    pub fn new() -> Self {
        Self {
            rx_buf: [0; IO_BUFSIZE],
            rx_size: 0,
            rx_pos: 0,
            tx_buf: Vec::new(),
            ipkt_size: 0,
            ipkt_pos: 0,
            opkt_kind: PktKind::None,
            opkt_csum: Checksum::default(),
            opkt_rle: RleCoalescer::default(),
            attached: false,
            noack: false,
            running: false,
            stepping: false,
            libs_changed: false,
            cthread: None,
            gthread: None,
            swbkp: [SwBkp::default(); SWBKP_MAX],
            step_bkp: [SwBkp::default(); 2],
            step_thread: None,
            step_pri: 0,
            watch: Watch::default(),
            changed_lib: None,
            lib_num: 0,
            lib_pos: [0; 4],
        }
    }

    pub fn attached(&self) -> bool {
        self.attached
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn noack_mode(&self) -> bool {
        self.noack
    }

    // Thread herding ------------------------------------------------

    fn startall<H: HostOs>(&mut self, host: &mut H) {
        let mut t = host.first_thread();
        while let Some(thread) = t {
            let next = host.next_thread(thread);
            host.start_thread(thread);
            t = next;
        }
    }

    fn stopall<H: HostOs>(&mut self, host: &mut H) {
        let mut t = host.first_thread();
        while let Some(thread) = t {
            let next = host.next_thread(thread);
            host.stop_thread(thread);
            t = next;
        }
    }

    fn enable_watch<H: HostOs>(&mut self, host: &mut H) {
        let bits = if self.watch.active {
            (self.watch.addr & 0x1FFF_FFF8) | (self.watch.kind & 3)
        } else {
            0
        };
        host.set_watchlo(bits);
    }

    // Session state -------------------------------------------------

    /// Latches into a live session: stops the world and picks the
    /// first enumerable thread as both selectors.
    pub(crate) fn attach<H: HostOs>(&mut self, host: &mut H) {
        if !self.attached {
            trace!(Trace::Attach);

            self.attached = true;
            self.running = true;

            self.stop(host);

            self.cthread = host.first_thread();
            self.gthread = host.first_thread();
        }
    }

    /// Ends the session: removes everything it installed and lets the
    /// program go.
    pub(crate) fn detach<H: HostOs>(&mut self, host: &mut H) {
        if self.attached {
            trace!(Trace::Detach);

            self.watch = Watch::default();
            host.set_watchlo(0);

            for i in 0..SWBKP_MAX {
                swbkp::clear(host, &mut self.swbkp[i]);
            }
            swbkp::clear(host, &mut self.step_bkp[0]);
            swbkp::clear(host, &mut self.step_bkp[1]);

            self.attached = false;
            self.noack = false;
            self.running = false;
            self.stepping = false;

            self.startall(host);
        }
    }

    /// Resumes the target. Idempotent.
    pub(crate) fn run<H: HostOs>(&mut self, host: &mut H) {
        if !self.running {
            trace!(Trace::Run);

            self.running = true;

            self.enable_watch(host);

            self.startall(host);
        }
    }

    /// Stops the target. Idempotent. Unwinds any step in flight.
    pub(crate) fn stop<H: HostOs>(&mut self, host: &mut H) {
        if self.running {
            trace!(Trace::Stop);

            self.stopall(host);

            host.set_watchlo(0);

            self.running = false;

            if self.stepping {
                if let Some(thread) = self.step_thread {
                    // Give back the priority boost, unless someone else
                    // has already re-prioritized the thread.
                    if host.priority(thread) == ultra::PRI_APP_MAX {
                        host.set_priority(thread, self.step_pri);
                    }
                }

                swbkp::clear(host, &mut self.step_bkp[0]);
                swbkp::clear(host, &mut self.step_bkp[1]);

                self.stepping = false;
            }
        }
    }

    // Stop replies --------------------------------------------------

    /// Sends the `T` stop reply describing why `thread` is stopped.
    pub(crate) fn stop_reply<H: HostOs>(
        &mut self,
        host: &mut H,
        io: &mut IoMux<'_, '_>,
        thread: ThreadRef,
    ) {
        let cause = host.context(thread).cause;
        let id = host.thread_id(thread);
        let pc = regs::get(host.context(thread), regs::REG_PC);

        let mut watch_hit = false;
        let sig = match exc_code(cause) {
            Some(ExcCode::Int) => SIGINT,
            Some(ExcCode::Ri) => SIGILL,
            Some(ExcCode::Fpe) => SIGFPE,
            Some(
                ExcCode::TlbL | ExcCode::TlbS | ExcCode::AdEL | ExcCode::AdES,
            ) => SIGSEGV,
            Some(ExcCode::Ibe | ExcCode::Dbe) => SIGBUS,
            Some(ExcCode::Watch) => {
                if self.watch.active {
                    watch_hit = true;
                }
                SIGTRAP
            }
            _ => SIGTRAP,
        };

        trace!(Trace::StopReply(sig));

        self.pkt_start(io, false);
        self.pkt_putc(io, b'T');
        self.pkt_putx_n(io, u64::from(sig), 2);

        if id != 0 {
            self.pkt_puts(io, b"thread:");
            self.pkt_putx(io, u64::from(id));
            self.pkt_putc(io, b';');
        }

        self.pkt_puts(io, b"25:");
        self.pkt_putx_n(io, pc, 16);
        self.pkt_putc(io, b';');

        if watch_hit {
            if self.watch.kind == 2 {
                self.pkt_putc(io, b'r');
            } else if self.watch.kind == 3 {
                self.pkt_putc(io, b'a');
            }
            self.pkt_puts(io, b"watch:");
            self.pkt_putx(io, u64::from(self.watch.addr));
            self.pkt_putc(io, b';');
        }

        if self.libs_changed {
            self.pkt_puts(io, b"library:");

            if let Some(lib) = self.changed_lib {
                self.pkt_putc(io, if lib.load_addr.is_some() {
                    b'+'
                } else {
                    b'-'
                });

                if lib.kind == LibKind::Overlay {
                    self.pkt_puts(io, b"ovl_");
                }
                self.pkt_puts(io, lib.name.as_bytes());
                self.pkt_puts(io, b".o");

                if let Some(addr) = lib.load_addr {
                    self.pkt_puts(io, b",s,");
                    self.pkt_putx(io, u64::from(addr));
                }
            }

            self.pkt_putc(io, b';');

            self.libs_changed = false;
        }

        let _ = self.pkt_finish(io);
    }

    // Event handling ------------------------------------------------

    /// Drains the FIFO: packet introducers start packets, `^C` breaks
    /// a running target, anything else is line noise.
    fn handle_fifo<H: HostOs>(&mut self, host: &mut H, io: &mut IoMux<'_, '_>) {
        loop {
            match self.rx_getc(io) {
                b'$' => self.handle_pkt(host, io, false),
                b'%' => self.handle_pkt(host, io, true),
                0x03 => {
                    // Only meaningful mid-session; otherwise we have no
                    // idea whose ^C this is.
                    if self.attached && self.running {
                        trace!(Trace::Break);
                        self.stop(host);

                        if let Some(thread) = self.cthread {
                            host.context_mut(thread).cause = 0;
                            self.stop_reply(host, io, thread);
                        }
                    }
                }
                _ => {}
            }

            if !self.rx_buffered() && !io.poll_rx() {
                break;
            }
        }
    }

    /// A thread hit a trap or faulted; it becomes the selected thread
    /// and the debugger hears about it.
    fn thread_event<H: HostOs>(&mut self, host: &mut H, io: &mut IoMux<'_, '_>) {
        trace!(Trace::ThreadEvent);

        if self.running {
            self.stop(host);

            if let Some(thread) = host.faulted_thread() {
                self.cthread = Some(thread);
                self.gthread = Some(thread);
            }

            if let Some(thread) = self.cthread {
                self.stop_reply(host, io, thread);
            }
        }
    }

    /// An overlay was paged in or out. The change is reported on the
    /// next stop reply; a running target is stopped to produce one
    /// promptly.
    fn library_event<H: HostOs>(
        &mut self,
        host: &mut H,
        io: &mut IoMux<'_, '_>,
        lib: Option<Library>,
    ) {
        trace!(Trace::LibraryEvent);

        if self.attached {
            self.libs_changed = true;
            self.changed_lib = lib;

            if self.running {
                self.stop(host);

                if let Some(thread) = self.cthread {
                    host.context_mut(thread).cause = 0;
                    self.stop_reply(host, io, thread);
                }
            }
        }
    }

    /// One turn of the event loop: acts on a single delivered event.
    pub fn process_event<H: HostOs>(
        &mut self,
        host: &mut H,
        io: &mut IoMux<'_, '_>,
        ev: Event,
    ) {
        match ev {
            Event::FifoOff => self.detach(host),
            Event::FifoRx => self.handle_fifo(host, io),
            Event::CpuBreak | Event::Fault => self.thread_event(host, io),
            Event::Library(lib) => self.library_event(host, io, lib),
        }
    }

    /// Blocks (or spins) until there is something to act on.
    ///
    /// Receive readiness always matters; link power only once a
    /// session exists (its loss means detach). Waiting is a sleep
    /// while detached or running so the target gets the machine, and a
    /// spin while stopped at the prompt for snappy turnaround.
    pub fn wait<H: HostOs>(
        &mut self,
        host: &mut H,
        io: &mut IoMux<'_, '_>,
    ) -> Event {
        let mut mask = FifoIrq::RX;
        if self.attached {
            mask |= FifoIrq::OFF;
        }

        if !self.attached || self.running {
            io.sleep(host, mask)
        } else {
            io.spin(host, mask)
        }
    }
}

/// Builds the event a host program posts when an overlay changes state.
/// `idx` is the entry's index in its table.
pub fn library_change(
    cat: ultra::OverlayCategory,
    idx: usize,
    entry: &ultra::OverlayEntry,
) -> Event {
    Event::Library(libs::describe(cat, idx, entry))
}

/// The agent thread body: binds a transport, subscribes to thread
/// events, and services the session forever. The host program creates
/// the thread (at the runtime-monitor priority) and points it here.
pub fn agent_main<'d, H: HostOs>(
    host: &mut H,
    devices: &mut [&'d mut (dyn drv_fifo_api::FifoDevice + 'd)],
) -> ! {
    let mut io = IoMux::new(devices);
    let _ = io.probe();

    let mut rdb = Rdb::new();

    host.set_watchlo(0);
    host.catch_thread_events();

    loop {
        let ev = rdb.wait(host, &mut io);
        rdb.process_event(host, &mut io, ev);
    }
}

/// [`agent_main`] over the canonical backend set: the emulator device
/// first, then the flash cart, first probe wins.
#[cfg(all(feature = "ed64x", feature = "homeboy"))]
pub fn agent_main_standard<H, B>(host: &mut H, bus: B) -> !
where
    H: HostOs,
    B: drv_n64_pi::PiBus,
{
    let mut homeboy = drv_homeboy_fifo::Homeboy::new();
    let mut ed64x = drv_ed64x_fifo::Ed64X::new(bus);

    let mut devices: [&mut dyn drv_fifo_api::FifoDevice; 2] =
        [&mut homeboy, &mut ed64x];

    agent_main(host, &mut devices)
}
