// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stateful half of the packet codec: buffers, framing, acknowledgement.
//!
//! The receive buffer is linear, not circular. Unread bytes are moved to
//! the front when a packet begins, and the packet payload accumulates in
//! the consumed region at the start of the buffer as bytes are pulled
//! off, so the scanner can work over `rx_buf[..ipkt_size]` without a
//! copy. Escape sequences are normalized in place as they stream past:
//! the two raw bytes collapse into the one decoded byte, and the unread
//! tail slides down to close the gap.
//!
//! The transmit buffer holds exactly one outbound packet from
//! `pkt_start` to `pkt_finish` so a `-` from the host can be answered by
//! retransmitting the same bytes. Packets larger than the buffer degrade
//! gracefully: they flush early and lose only the ability to retransmit.

use crate::io::IoMux;
use crate::{Rdb, Trace};
use rsp_wire::{
    hex_digit, hex_val, must_escape, rle_code, Checksum, RleCoalescer, Run,
    ScanError, ESC, ESC_XOR,
};

/// Receive and transmit buffer capacity, in bytes.
pub const IO_BUFSIZE: usize = 0x600;

/// What kind of outbound packet is being assembled.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PktKind {
    #[default]
    None,
    Normal,
    Notif,
}

/// The host answered a transmission with something other than `+`/`-`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProtoError;

/// An inbound frame failed its checksum.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameError;

impl Rdb {
    // Receive buffer ------------------------------------------------

    /// Moves unread bytes to the front of the buffer, so the next packet
    /// payload builds from index zero.
    fn rx_compact(&mut self) {
        self.rx_buf.copy_within(self.rx_pos..self.rx_size, 0);
        self.rx_size -= self.rx_pos;
        self.rx_pos = 0;
    }

    /// True when a byte can be had without going back to the transport.
    pub(crate) fn rx_buffered(&self) -> bool {
        self.rx_pos != self.rx_size
    }

    /// Next byte, refilling from the FIFO when the buffer runs dry. The
    /// refill appends so the consumed region (the packet under
    /// construction) survives.
    pub(crate) fn rx_getc(&mut self, io: &mut IoMux<'_, '_>) -> u8 {
        if self.rx_pos == self.rx_size {
            if self.rx_size == self.rx_buf.len() {
                // Packet bigger than the buffer; drop what we have and
                // let the checksum sort it out.
                self.rx_size = 0;
                self.rx_pos = 0;
            }
            let n = io.read(&mut self.rx_buf[self.rx_size..]);
            self.rx_size += n;
        }
        let c = self.rx_buf[self.rx_pos];
        self.rx_pos += 1;
        c
    }

    /// Replaces the 2-byte escape sequence just consumed with its
    /// decoded byte, sliding the unread tail down to close the gap.
    fn rx_splice_escape(&mut self, decoded: u8) {
        self.rx_buf.copy_within(self.rx_pos..self.rx_size, self.rx_pos - 1);
        self.rx_buf[self.rx_pos - 2] = decoded;
        self.rx_pos -= 1;
        self.rx_size -= 1;
    }

    // Transmit buffer -----------------------------------------------

    pub(crate) fn tx_flush(&mut self, io: &mut IoMux<'_, '_>) {
        if !self.tx_buf.is_empty() {
            io.write(&self.tx_buf);
            self.tx_buf.clear();
        }
    }

    fn tx_putc(&mut self, io: &mut IoMux<'_, '_>, c: u8) {
        if self.tx_buf.is_full() {
            self.tx_flush(io);
        }
        let _ = self.tx_buf.push(c);
    }

    // Outbound packets ----------------------------------------------

    fn put_raw(&mut self, io: &mut IoMux<'_, '_>, c: u8) {
        self.tx_putc(io, c);
        if self.opkt_kind != PktKind::None {
            self.opkt_csum.add(c);
        }
    }

    fn put_esc(&mut self, io: &mut IoMux<'_, '_>, c: u8) {
        if must_escape(c) {
            self.put_raw(io, ESC);
            self.put_raw(io, c ^ ESC_XOR);
        } else {
            self.put_raw(io, c);
        }
    }

    fn put_run(&mut self, io: &mut IoMux<'_, '_>, run: Run) {
        match run {
            Run::Literal { byte, n } => {
                for _ in 0..n {
                    self.put_esc(io, byte);
                }
            }
            Run::Encoded { byte, n } => {
                self.put_esc(io, byte);
                self.put_raw(io, b'*');
                self.put_raw(io, rle_code(n));
            }
        }
    }

    /// Opens a packet frame. The framing byte goes out unescaped and
    /// outside the checksum.
    pub(crate) fn pkt_start(&mut self, io: &mut IoMux<'_, '_>, notif: bool) {
        // The transmit buffer must hold exactly this packet in case the
        // host asks for a retransmission; push out anything pending.
        self.tx_flush(io);

        if notif {
            self.tx_putc(io, b'%');
            self.opkt_kind = PktKind::Notif;
        } else {
            self.tx_putc(io, b'$');
            self.opkt_kind = PktKind::Normal;
        }
        self.opkt_csum = Checksum::default();
        self.opkt_rle = RleCoalescer::default();
    }

    /// One payload byte, through the run-length coalescer.
    pub(crate) fn pkt_putc(&mut self, io: &mut IoMux<'_, '_>, c: u8) {
        let mut rle = core::mem::take(&mut self.opkt_rle);
        rle.push(c, &mut |run| self.put_run(io, run));
        self.opkt_rle = rle;
    }

    pub(crate) fn pkt_puts(&mut self, io: &mut IoMux<'_, '_>, s: &[u8]) {
        for &c in s {
            self.pkt_putc(io, c);
        }
    }

    /// Hex with leading zeros trimmed, at least one digit.
    pub(crate) fn pkt_putx(&mut self, io: &mut IoMux<'_, '_>, mut v: u64) {
        let mut i = 0;
        while i < 15 && (v >> 60) == 0 {
            v <<= 4;
            i += 1;
        }
        while i < 16 {
            self.pkt_putc(io, hex_digit((v >> 60) as u8));
            v <<= 4;
            i += 1;
        }
    }

    /// Exactly `n` hex digits of `v`.
    pub(crate) fn pkt_putx_n(
        &mut self,
        io: &mut IoMux<'_, '_>,
        v: u64,
        n: usize,
    ) {
        let mut v = v << ((16 - n) * 4);
        for _ in 0..n {
            self.pkt_putc(io, hex_digit((v >> 60) as u8));
            v <<= 4;
        }
    }

    /// Closes the frame, transmits, and (for acknowledged packets)
    /// consumes the host's verdict, retransmitting on `-`.
    pub(crate) fn pkt_finish(
        &mut self,
        io: &mut IoMux<'_, '_>,
    ) -> Result<(), ProtoError> {
        let mut rle = core::mem::take(&mut self.opkt_rle);
        rle.flush(&mut |run| self.put_run(io, run));

        let csum = self.opkt_csum.value();
        self.tx_putc(io, b'#');
        self.tx_putc(io, hex_digit(csum >> 4));
        self.tx_putc(io, hex_digit(csum & 0xF));

        let kind = core::mem::take(&mut self.opkt_kind);

        let result = loop {
            io.write(&self.tx_buf);

            if kind == PktKind::Normal && !self.noack {
                match self.rx_getc(io) {
                    b'+' => break Ok(()),
                    b'-' => continue,
                    _ => break Err(ProtoError),
                }
            } else {
                break Ok(());
            }
        };

        self.tx_buf.clear();
        result
    }

    /// Whole fixed-payload packet in one call.
    pub(crate) fn putpkt(
        &mut self,
        io: &mut IoMux<'_, '_>,
        notif: bool,
        payload: &[u8],
    ) -> Result<(), ProtoError> {
        self.pkt_start(io, notif);
        self.pkt_puts(io, payload);
        self.pkt_finish(io)
    }

    // Inbound packets -----------------------------------------------

    /// Receives one frame body. The caller has already consumed the
    /// `$`/`%` introducer. On success the normalized payload sits in
    /// `rx_buf[..ipkt_size]` ready for the scanner.
    pub(crate) fn getpkt(
        &mut self,
        io: &mut IoMux<'_, '_>,
        notif: bool,
    ) -> Result<(), FrameError> {
        self.rx_compact();

        self.ipkt_size = 0;
        self.ipkt_pos = 0;

        let mut csum = Checksum::default();
        loop {
            let c = self.rx_getc(io);

            if c == b'#' {
                break;
            }

            csum.add(c);

            if c == ESC {
                let e = self.rx_getc(io);
                csum.add(e);
                self.rx_splice_escape(e ^ ESC_XOR);
            }

            self.ipkt_size += 1;
        }

        let hi = hex_val(self.rx_getc(io));
        let lo = hex_val(self.rx_getc(io));
        let good = match (hi, lo) {
            (Some(hi), Some(lo)) => (hi << 4) | lo == csum.value(),
            _ => false,
        };

        if good {
            if !self.noack && !notif {
                self.tx_putc(io, b'+');
                self.tx_flush(io);
            }
            Ok(())
        } else {
            crate::trace!(Trace::FrameError);
            // Notifications are never acknowledged, bad or good; anything
            // else earns a retransmission request.
            if !self.noack && !notif {
                self.tx_putc(io, b'-');
                self.tx_flush(io);
            }
            Err(FrameError)
        }
    }

    // Scanner -------------------------------------------------------

    pub(crate) fn scan_lit(&mut self, lit: &[u8]) -> Result<(), ScanError> {
        rsp_wire::scan_lit(&self.rx_buf[..self.ipkt_size], &mut self.ipkt_pos, lit)
    }

    pub(crate) fn scan_byte(&mut self) -> Result<u8, ScanError> {
        rsp_wire::scan_byte(&self.rx_buf[..self.ipkt_size], &mut self.ipkt_pos)
    }

    pub(crate) fn scan_x8(
        &mut self,
        width: Option<usize>,
    ) -> Result<u8, ScanError> {
        rsp_wire::scan_hex_u8(
            &self.rx_buf[..self.ipkt_size],
            &mut self.ipkt_pos,
            width,
        )
    }

    pub(crate) fn scan_x32(
        &mut self,
        width: Option<usize>,
    ) -> Result<u32, ScanError> {
        rsp_wire::scan_hex_u32(
            &self.rx_buf[..self.ipkt_size],
            &mut self.ipkt_pos,
            width,
        )
    }

    pub(crate) fn scan_x64(
        &mut self,
        width: Option<usize>,
    ) -> Result<u64, ScanError> {
        rsp_wire::scan_hex_u64(
            &self.rx_buf[..self.ipkt_size],
            &mut self.ipkt_pos,
            width,
        )
    }

    pub(crate) fn scan_eof(&self) -> Result<(), ScanError> {
        rsp_wire::scan_eof(&self.rx_buf[..self.ipkt_size], &self.ipkt_pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_fifo_api::fake::LoopFifo;
    use drv_fifo_api::FifoDevice;

    fn run(
        fifo: &mut LoopFifo,
        body: impl FnOnce(&mut Rdb, &mut IoMux<'_, '_>),
    ) -> Vec<u8> {
        let mut rdb = Rdb::new();
        run_with(&mut rdb, fifo, body)
    }

    fn run_with(
        rdb: &mut Rdb,
        fifo: &mut LoopFifo,
        body: impl FnOnce(&mut Rdb, &mut IoMux<'_, '_>),
    ) -> Vec<u8> {
        {
            let mut devs: [&mut dyn FifoDevice; 1] = [fifo];
            let mut mux = IoMux::new(&mut devs);
            mux.probe().unwrap();
            body(rdb, &mut mux);
        }
        fifo.take_tx()[..].to_vec()
    }

    fn framed(payload: &[u8]) -> Vec<u8> {
        let sum = rsp_wire::checksum(payload);
        let mut v = vec![b'$'];
        v.extend_from_slice(payload);
        v.push(b'#');
        v.push(hex_digit(sum >> 4));
        v.push(hex_digit(sum & 0xF));
        v
    }

    #[test]
    fn putx_trims_leading_zeros() {
        let mut fifo = LoopFifo::new();
        let out = run(&mut fifo, |rdb, io| {
            rdb.noack = true;
            rdb.pkt_start(io, false);
            rdb.pkt_putx(io, 0x1234);
            let _ = rdb.pkt_finish(io);
        });
        assert_eq!(out, framed(b"1234"));

        let out = run(&mut fifo, |rdb, io| {
            rdb.noack = true;
            rdb.pkt_start(io, false);
            rdb.pkt_putx(io, 0);
            let _ = rdb.pkt_finish(io);
        });
        assert_eq!(out, framed(b"0"));
    }

    #[test]
    fn putx_n_is_fixed_width() {
        let mut fifo = LoopFifo::new();
        let out = run(&mut fifo, |rdb, io| {
            rdb.noack = true;
            rdb.pkt_start(io, false);
            rdb.pkt_putx_n(io, 0xAB, 4);
            let _ = rdb.pkt_finish(io);
        });
        assert_eq!(out, framed(b"00ab"));
    }

    #[test]
    fn runs_compress_on_the_wire() {
        // A run of 8 can't use its own length code (it collides with
        // '$'), so it goes out as a 6-run plus two literals.
        let mut fifo = LoopFifo::new();
        let out = run(&mut fifo, |rdb, io| {
            rdb.noack = true;
            rdb.pkt_start(io, false);
            for _ in 0..8 {
                rdb.pkt_putc(io, b'a');
            }
            let _ = rdb.pkt_finish(io);
        });
        assert_eq!(out, framed(b"a*\"aa"));
    }

    #[test]
    fn frame_bytes_escape_on_the_wire() {
        let mut fifo = LoopFifo::new();
        let out = run(&mut fifo, |rdb, io| {
            rdb.noack = true;
            rdb.pkt_start(io, false);
            rdb.pkt_putc(io, b'#');
            rdb.pkt_putc(io, b'}');
            let _ = rdb.pkt_finish(io);
        });
        assert_eq!(out, framed(&[b'}', b'#' ^ 0x20, b'}', b'}' ^ 0x20]));
    }

    #[test]
    fn nack_triggers_retransmission_of_identical_bytes() {
        let mut fifo = LoopFifo::new();
        fifo.push_rx(b"-+");
        let out = run(&mut fifo, |rdb, io| {
            rdb.pkt_start(io, false);
            rdb.pkt_puts(io, b"OK");
            assert_eq!(rdb.pkt_finish(io), Ok(()));
        });
        assert_eq!(out, b"$OK#9a$OK#9a");
    }

    #[test]
    fn garbage_ack_is_a_protocol_error() {
        let mut fifo = LoopFifo::new();
        fifo.push_rx(b"?");
        let mut rdb = Rdb::new();
        run_with(&mut rdb, &mut fifo, |rdb, io| {
            rdb.pkt_start(io, false);
            rdb.pkt_puts(io, b"OK");
            assert_eq!(rdb.pkt_finish(io), Err(ProtoError));
        });
    }

    #[test]
    fn notifications_skip_the_ack_exchange() {
        let mut fifo = LoopFifo::new();
        let out = run(&mut fifo, |rdb, io| {
            rdb.pkt_start(io, true);
            rdb.pkt_puts(io, b"Stop");
            assert_eq!(rdb.pkt_finish(io), Ok(()));
        });
        assert_eq!(out[0], b'%');
        assert_eq!(&out[1..5], b"Stop");
    }

    #[test]
    fn inbound_escapes_normalize_in_place() {
        let mut fifo = LoopFifo::new();
        // Payload "ab}]cd": the pair decodes to '}' between b and c.
        let raw = b"ab}]cd";
        let sum = rsp_wire::checksum(raw);
        fifo.push_rx(raw);
        fifo.push_rx(&[b'#', hex_digit(sum >> 4), hex_digit(sum & 0xF)]);

        let mut rdb = Rdb::new();
        let out = run_with(&mut rdb, &mut fifo, |rdb, io| {
            assert_eq!(rdb.getpkt(io, false), Ok(()));
            assert_eq!(rdb.ipkt_size, 5);
            assert!(rdb.scan_lit(b"ab}cd").is_ok());
            assert!(rdb.scan_eof().is_ok());
        });
        // The good frame was acknowledged.
        assert_eq!(out, b"+");
    }

    #[test]
    fn checksum_mismatch_requests_retransmission() {
        let mut fifo = LoopFifo::new();
        fifo.push_rx(b"abc#00");
        let mut rdb = Rdb::new();
        let out = run_with(&mut rdb, &mut fifo, |rdb, io| {
            assert_eq!(rdb.getpkt(io, false), Err(FrameError));
        });
        assert_eq!(out, b"-");
    }

    #[test]
    fn bad_notifications_are_dropped_silently() {
        let mut fifo = LoopFifo::new();
        fifo.push_rx(b"abc#00");
        let mut rdb = Rdb::new();
        let out = run_with(&mut rdb, &mut fifo, |rdb, io| {
            assert_eq!(rdb.getpkt(io, true), Err(FrameError));
        });
        assert!(out.is_empty());
    }
}
