// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command dispatch and handlers.
//!
//! Commands are matched by prefix against an ordered table; the first
//! entry whose name consumes from the payload wins and its handler
//! scans the remainder. A handler that fails for any reason -- scan
//! error, bad address, exhausted table -- reports `E00`; a command no
//! entry matches gets the empty reply the protocol reserves for
//! "not supported".

use static_assertions::const_assert;
use ultra::{HostOs, LibKind, Library, OverlayCategory, ThreadRef};

use crate::io::IoMux;
use crate::libs::{self, MAX_XFER_LIBS};
use crate::pkt::IO_BUFSIZE;
use crate::regs::{self, NUM_REGS};
use crate::swbkp::{self, check_addr, SWBKP_MAX};
use crate::{CmdError, Rdb, Trace, Watch};

// Every library element must fit a chunk inside the transmit buffer, or
// retransmission after a missed ack would resend a torn packet.
const_assert!(MAX_XFER_LIBS * 96 < IO_BUFSIZE);

const TARGET_XML: &[u8] = b"<target version=\"1.0\">\
    <architecture>mips:4300</architecture>\
    </target>";

/// Walks the host's active queue from the front.
pub(crate) fn threads<H: HostOs>(
    host: &H,
) -> impl Iterator<Item = ThreadRef> + '_ {
    core::iter::successors(host.first_thread(), move |&t| host.next_thread(t))
}

pub(crate) fn thread_by_id<H: HostOs>(host: &H, id: u32) -> Option<ThreadRef> {
    threads(host).find(|&t| host.thread_id(t) == id)
}

type Handler<H> =
    fn(&mut Rdb, &mut H, &mut IoMux<'_, '_>) -> Result<(), CmdError>;

pub(crate) struct PktHandler<H: HostOs> {
    pub name: &'static [u8],
    pub run: Handler<H>,
}

/// The dispatch table. Order matters: matching is first-prefix-wins,
/// so the long `q` queries sit above the single-letter commands that
/// would otherwise shadow them.
pub(crate) fn table<H: HostOs>() -> [PktHandler<H>; 25] {
    [
        PktHandler { name: b"qSupported", run: q_supported },
        PktHandler { name: b"QStartNoAckMode", run: q_start_noack },
        PktHandler { name: b"qAttached", run: q_attached },
        PktHandler { name: b"qfThreadInfo", run: qf_thread_info },
        PktHandler { name: b"qsThreadInfo", run: qs_thread_info },
        PktHandler { name: b"qC", run: q_current },
        PktHandler { name: b"H", run: set_thread },
        PktHandler { name: b"T", run: thread_alive },
        PktHandler { name: b"?", run: query_halt },
        PktHandler { name: b"g", run: read_regs },
        PktHandler { name: b"G", run: write_regs },
        PktHandler { name: b"p", run: read_reg },
        PktHandler { name: b"P", run: write_reg },
        PktHandler { name: b"m", run: read_mem },
        PktHandler { name: b"M", run: write_mem },
        PktHandler { name: b"z", run: clear_point },
        PktHandler { name: b"Z", run: set_point },
        PktHandler { name: b"c", run: cont },
        PktHandler { name: b"C", run: cont_sig },
        PktHandler { name: b"s", run: step_one },
        PktHandler { name: b"S", run: step_one_sig },
        PktHandler { name: b"D", run: detach_cmd },
        PktHandler { name: b"k", run: kill_cmd },
        PktHandler {
            name: b"qXfer:features:read:target.xml:",
            run: xfer_features,
        },
        PktHandler {
            name: b"qXfer:libraries:read::",
            run: xfer_libraries,
        },
    ]
}

impl Rdb {
    /// Receives and runs one command packet. The frame introducer has
    /// already been consumed by the byte pump.
    pub(crate) fn handle_pkt<H: HostOs>(
        &mut self,
        host: &mut H,
        io: &mut IoMux<'_, '_>,
        notif: bool,
    ) {
        if self.getpkt(io, notif).is_err() {
            return;
        }

        // A valid packet means a debugger is on the other end; latch
        // into a live session.
        self.attach(host);

        for h in table::<H>() {
            if self.scan_lit(h.name).is_ok() {
                crate::trace!(Trace::Packet(h.name[0]));
                if (h.run)(self, host, io).is_err() {
                    crate::trace!(Trace::CmdError);
                    let _ = self.putpkt(io, false, b"E00");
                }
                return;
            }
        }

        // Unrecognized command: empty reply.
        self.pkt_start(io, false);
        let _ = self.pkt_finish(io);
    }
}

fn q_supported<H: HostOs>(
    rdb: &mut Rdb,
    _host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    let _ = rdb.putpkt(
        io,
        false,
        b"QStartNoAckMode+;qXfer:features:read+;qXfer:libraries:read+",
    );
    Ok(())
}

fn q_start_noack<H: HostOs>(
    rdb: &mut Rdb,
    _host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    rdb.scan_eof()?;

    // The OK itself is still exchanged under the old acknowledgement
    // rules; only what follows goes quiet.
    let _ = rdb.putpkt(io, false, b"OK");
    rdb.noack = true;

    Ok(())
}

fn q_attached<H: HostOs>(
    rdb: &mut Rdb,
    _host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    rdb.scan_eof()?;
    let _ = rdb.putpkt(io, false, b"1");
    Ok(())
}

fn qf_thread_info<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    rdb.scan_eof()?;

    rdb.pkt_start(io, false);
    rdb.pkt_putc(io, b'm');

    let mut first = true;
    let mut t = host.first_thread();
    while let Some(thread) = t {
        if !first {
            rdb.pkt_putc(io, b',');
        }
        first = false;
        rdb.pkt_putx(io, u64::from(host.thread_id(thread)));
        t = host.next_thread(thread);
    }

    let _ = rdb.pkt_finish(io);
    Ok(())
}

fn qs_thread_info<H: HostOs>(
    rdb: &mut Rdb,
    _host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    rdb.scan_eof()?;
    let _ = rdb.putpkt(io, false, b"l");
    Ok(())
}

fn q_current<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    rdb.scan_eof()?;

    let thread = rdb.cthread.ok_or(CmdError)?;
    let id = host.thread_id(thread);

    rdb.pkt_start(io, false);
    rdb.pkt_puts(io, b"QC");
    rdb.pkt_putx(io, u64::from(id));
    let _ = rdb.pkt_finish(io);

    Ok(())
}

fn set_thread<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    let op = rdb.scan_byte()?;
    let id = if rdb.scan_lit(b"-1").is_ok() {
        let first = host.first_thread().ok_or(CmdError)?;
        host.thread_id(first)
    } else {
        rdb.scan_x32(None)?
    };
    rdb.scan_eof()?;

    // Id zero means "whatever is selected now".
    let target = if id != 0 {
        thread_by_id(host, id)
    } else {
        match op {
            b'c' => rdb.cthread,
            b'g' => rdb.gthread,
            _ => None,
        }
    };

    let thread = target.ok_or(CmdError)?;
    match op {
        b'c' => rdb.cthread = Some(thread),
        b'g' => rdb.gthread = Some(thread),
        _ => return Err(CmdError),
    }

    let _ = rdb.putpkt(io, false, b"OK");
    Ok(())
}

fn thread_alive<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    let id = if rdb.scan_lit(b"-1").is_ok() {
        let first = host.first_thread().ok_or(CmdError)?;
        host.thread_id(first)
    } else {
        rdb.scan_x32(None)?
    };
    rdb.scan_eof()?;

    thread_by_id(host, id).ok_or(CmdError)?;
    let _ = rdb.putpkt(io, false, b"OK");
    Ok(())
}

fn query_halt<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    rdb.scan_eof()?;

    let thread = rdb.cthread.ok_or(CmdError)?;
    rdb.stop_reply(host, io, thread);

    Ok(())
}

fn read_regs<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    rdb.scan_eof()?;

    let thread = rdb.gthread.ok_or(CmdError)?;

    rdb.pkt_start(io, false);
    for idx in 0..NUM_REGS {
        let v = regs::get(host.context(thread), idx);
        rdb.pkt_putx_n(io, v, 16);
    }
    let _ = rdb.pkt_finish(io);

    Ok(())
}

fn write_regs<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    let thread = rdb.gthread.ok_or(CmdError)?;

    for idx in 0..NUM_REGS {
        match rdb.scan_x64(Some(16)) {
            Ok(v) => regs::set(host.context_mut(thread), idx, v),
            Err(_) => break,
        }
    }
    rdb.scan_eof()?;

    let _ = rdb.putpkt(io, false, b"OK");
    Ok(())
}

fn read_reg<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    let idx = rdb.scan_x32(None)?;
    rdb.scan_eof()?;

    let thread = rdb.gthread.ok_or(CmdError)?;
    let v = regs::get(host.context(thread), idx);

    rdb.pkt_start(io, false);
    rdb.pkt_putx_n(io, v, 16);
    let _ = rdb.pkt_finish(io);

    Ok(())
}

fn write_reg<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    let idx = rdb.scan_x32(None)?;
    rdb.scan_lit(b"=")?;
    let v = rdb.scan_x64(Some(16))?;
    rdb.scan_eof()?;

    let thread = rdb.gthread.ok_or(CmdError)?;
    regs::set(host.context_mut(thread), idx, v);

    let _ = rdb.putpkt(io, false, b"OK");
    Ok(())
}

fn read_mem<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    let mut addr = rdb.scan_x32(None)?;
    rdb.scan_lit(b",")?;
    let mut length = rdb.scan_x32(None)?;
    rdb.scan_eof()?;

    if !check_addr(addr, 1) {
        return Err(CmdError);
    }

    rdb.pkt_start(io, false);
    while length != 0 {
        // Runs that leave the valid window truncate rather than fail;
        // the short reply tells the debugger where memory ended.
        if !check_addr(addr, 1) {
            break;
        }
        rdb.pkt_putx_n(io, u64::from(host.read8(addr)), 2);
        addr = addr.wrapping_add(1);
        length -= 1;
    }
    let _ = rdb.pkt_finish(io);

    Ok(())
}

fn write_mem<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    let mut addr = rdb.scan_x32(None)?;
    rdb.scan_lit(b",")?;
    let mut length = rdb.scan_x32(None)?;
    rdb.scan_lit(b":")?;

    while length != 0 {
        if !check_addr(addr, 1) {
            return Err(CmdError);
        }
        let b = rdb.scan_x8(Some(2))?;
        host.write8(addr, b);
        addr = addr.wrapping_add(1);
        length -= 1;
    }
    rdb.scan_eof()?;

    let _ = rdb.putpkt(io, false, b"OK");
    Ok(())
}

/// Finds the breakpoint slot for `addr`: a slot already holding it, or
/// failing that the first free one.
fn bkp_slot(rdb: &mut Rdb, addr: u32) -> Option<usize> {
    let mut free = None;
    for i in 0..SWBKP_MAX {
        let b = &rdb.swbkp[i];
        if b.active && b.addr == addr {
            return Some(i);
        }
        if free.is_none() && !b.active {
            free = Some(i);
        }
    }
    free
}

fn clear_point<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    let kind = rdb.scan_byte()?;
    rdb.scan_lit(b",")?;
    let addr = rdb.scan_x32(None)?;
    rdb.scan_lit(b",")?;
    let length = rdb.scan_x32(None)?;
    rdb.scan_eof()?;

    match kind {
        b'0' => {
            if length != 4 {
                return Err(CmdError);
            }
            if let Some(i) = bkp_slot(rdb, addr) {
                swbkp::clear(host, &mut rdb.swbkp[i]);
                crate::trace!(Trace::BkpClear(addr));
            }
        }
        b'2' | b'3' | b'4' => {
            let kind = u32::from(kind - b'1');
            let w = &mut rdb.watch;
            if w.active && w.addr == addr && w.len == length && w.kind == kind
            {
                w.active = false;
            }
        }
        _ => return Err(CmdError),
    }

    let _ = rdb.putpkt(io, false, b"OK");
    Ok(())
}

fn set_point<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    let kind = rdb.scan_byte()?;
    rdb.scan_lit(b",")?;
    let addr = rdb.scan_x32(None)?;
    rdb.scan_lit(b",")?;
    let length = rdb.scan_x32(None)?;
    rdb.scan_eof()?;

    match kind {
        b'0' => {
            if length != 4 {
                return Err(CmdError);
            }
            let i = bkp_slot(rdb, addr).ok_or(CmdError)?;
            swbkp::set(host, &mut rdb.swbkp[i], addr)?;
            crate::trace!(Trace::BkpSet(addr));
        }
        b'2' | b'3' | b'4' => {
            let kind = u32::from(kind - b'1');
            let w = &mut rdb.watch;
            if w.active {
                // One watch register; a different trigger must clear
                // the old one first.
                if w.addr != addr || w.len != length || w.kind != kind {
                    return Err(CmdError);
                }
            } else {
                *w = Watch {
                    active: true,
                    addr,
                    len: length,
                    kind,
                };
            }
        }
        _ => return Err(CmdError),
    }

    let _ = rdb.putpkt(io, false, b"OK");
    Ok(())
}

fn cont<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    _io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    let thread = rdb.cthread.ok_or(CmdError)?;
    let mut addr = host.context(thread).pc;

    if let Ok(a) = rdb.scan_x32(None) {
        addr = a;
    }
    rdb.scan_eof()?;

    host.context_mut(thread).pc = addr;
    rdb.run(host);

    Ok(())
}

fn cont_sig<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    _io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    let thread = rdb.cthread.ok_or(CmdError)?;
    let mut addr = host.context(thread).pc;

    // The signal number is parsed and disregarded; there is nothing to
    // deliver it to.
    let _sig = rdb.scan_x32(None)?;
    if rdb.scan_lit(b";").is_ok() {
        addr = rdb.scan_x32(None)?;
    }
    rdb.scan_eof()?;

    host.context_mut(thread).pc = addr;
    rdb.run(host);

    Ok(())
}

fn step_one<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    let thread = rdb.cthread.ok_or(CmdError)?;
    let mut addr = host.context(thread).pc;

    if let Ok(a) = rdb.scan_x32(None) {
        addr = a;
    }
    rdb.scan_eof()?;

    host.context_mut(thread).pc = addr;
    rdb.step(host, io, thread);

    Ok(())
}

fn step_one_sig<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    let thread = rdb.cthread.ok_or(CmdError)?;
    let mut addr = host.context(thread).pc;

    let _sig = rdb.scan_x32(None)?;
    if rdb.scan_lit(b";").is_ok() {
        addr = rdb.scan_x32(None)?;
    }
    rdb.scan_eof()?;

    host.context_mut(thread).pc = addr;
    rdb.step(host, io, thread);

    Ok(())
}

fn detach_cmd<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    rdb.scan_eof()?;

    let _ = rdb.putpkt(io, false, b"OK");
    rdb.detach(host);

    Ok(())
}

fn kill_cmd<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    _io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    rdb.scan_eof()?;

    // A kill request here just means "hang up"; whoever wants the
    // program actually dead can reach the power switch.
    rdb.detach(host);

    Ok(())
}

fn xfer_features<H: HostOs>(
    rdb: &mut Rdb,
    _host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    let _offset = rdb.scan_x32(None)?;
    rdb.scan_lit(b",")?;
    let _length = rdb.scan_x32(None)?;
    rdb.scan_eof()?;

    rdb.pkt_start(io, false);
    rdb.pkt_putc(io, b'l');
    rdb.pkt_puts(io, TARGET_XML);
    let _ = rdb.pkt_finish(io);

    Ok(())
}

fn xfer_lib(rdb: &mut Rdb, io: &mut IoMux<'_, '_>, lib: &Library) {
    rdb.pkt_puts(io, b"<library name=\"");
    if lib.kind == LibKind::Overlay {
        rdb.pkt_puts(io, b"ovl_");
    }
    rdb.pkt_puts(io, lib.name.as_bytes());
    rdb.pkt_puts(io, b".o\">");

    rdb.pkt_puts(io, b"<section address=\"0x");
    rdb.pkt_putx(io, u64::from(lib.load_addr.unwrap_or(0)));
    rdb.pkt_puts(io, b"\"/>");

    rdb.pkt_puts(io, b"</library>");

    rdb.lib_num += 1;
}

fn xfer_libraries<H: HostOs>(
    rdb: &mut Rdb,
    host: &mut H,
    io: &mut IoMux<'_, '_>,
) -> Result<(), CmdError> {
    let offset = rdb.scan_x32(None)?;
    rdb.scan_lit(b",")?;
    let _length = rdb.scan_x32(None)?;
    rdb.scan_eof()?;

    // A fresh read restarts the walk over every category.
    if offset == 0 {
        rdb.lib_num = 0;
        rdb.lib_pos = [0; 4];
    }

    let mut found: heapless::Vec<Library, MAX_XFER_LIBS> = heapless::Vec::new();
    while !found.is_full() {
        // Categories drain in a fixed order; a call that produces
        // nothing falls through to the next category this round.
        let mut lib = None;
        for (slot, cat) in OverlayCategory::ALL.iter().enumerate() {
            lib = libs::next_lib(host, *cat, &mut rdb.lib_pos[slot]);
            if lib.is_some() {
                break;
            }
        }

        match lib {
            Some(lib) => {
                let _ = found.push(lib);
            }
            None => break,
        }
    }

    let last_chunk = found.len() < MAX_XFER_LIBS;

    rdb.pkt_start(io, false);
    rdb.pkt_putc(io, if last_chunk { b'l' } else { b'm' });

    if rdb.lib_num == 0 {
        rdb.pkt_puts(io, b"<library-list>");
    }

    for lib in &found {
        xfer_lib(rdb, io, lib);
    }

    if last_chunk {
        rdb.pkt_puts(io, b"</library-list>");
    }

    let _ = rdb.pkt_finish(io);

    Ok(())
}
