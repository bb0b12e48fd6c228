// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! FIFO multiplexer and event waits.
//!
//! Binds to the first device in the supplied list whose probe succeeds
//! and forwards every FIFO operation there for the life of the process.
//! The conventional order puts the emulator device ahead of the flash
//! cart, so a software environment that answers both probes wins.
//!
//! Two waits are offered. [`IoMux::spin`] busy-polls the FIFO edges and
//! the message queue, for lowest latency while the target is stopped and
//! the agent has the machine mostly to itself. [`IoMux::sleep`] arms the
//! requested FIFO edges as message sources and blocks on the queue, for
//! when the target is running and the agent must stay out of the way.

use drv_fifo_api::{FifoDevice, NoDevice};
use ultra::{Event, FifoIrq, HostOs};

pub struct IoMux<'s, 'd> {
    devs: &'s mut [&'d mut (dyn FifoDevice + 'd)],
    sel: Option<usize>,
}

impl<'s, 'd> IoMux<'s, 'd> {
    /// Wraps a candidate device list. Nothing is probed yet.
    pub fn new(devs: &'s mut [&'d mut (dyn FifoDevice + 'd)]) -> Self {
        Self { devs, sel: None }
    }

    /// Binds to the first present device.
    pub fn probe(&mut self) -> Result<(), NoDevice> {
        for i in 0..self.devs.len() {
            if self.devs[i].probe().is_ok() {
                self.sel = Some(i);
                return Ok(());
            }
        }
        self.sel = None;
        Err(NoDevice)
    }

    fn dev(&mut self) -> Option<&mut (dyn FifoDevice + 'd)> {
        let i = self.sel?;
        Some(&mut *self.devs[i])
    }

    pub fn irqs(&mut self) -> FifoIrq {
        match self.dev() {
            Some(d) => d.irqs(),
            None => FifoIrq::empty(),
        }
    }

    pub fn pwr(&mut self) -> bool {
        match self.dev() {
            Some(d) => d.pwr(),
            None => false,
        }
    }

    pub fn poll_rx(&mut self) -> bool {
        match self.dev() {
            Some(d) => d.poll_rx(),
            None => false,
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        match self.dev() {
            Some(d) => d.read(buf),
            None => 0,
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> usize {
        match self.dev() {
            Some(d) => d.write(buf),
            None => 0,
        }
    }

    /// Busy-waits for the earliest of: a power-off edge, a receive
    /// edge, or a message, considering only the edges in `mask`.
    pub fn spin<H: HostOs>(&mut self, host: &mut H, mask: FifoIrq) -> Event {
        loop {
            if mask.contains(FifoIrq::OFF) && !self.pwr() {
                return Event::FifoOff;
            }
            if mask.contains(FifoIrq::RX) && self.poll_rx() {
                return Event::FifoRx;
            }
            if let Some(ev) = host.recv(false) {
                return ev;
            }
        }
    }

    /// Like [`Self::spin`] but suspends when nothing is immediately
    /// pending: the masked FIFO edges are routed into the agent's queue
    /// (under interrupt-disable, so an edge can't slip between the check
    /// and the arm), then the queue receive blocks.
    pub fn sleep<H: HostOs>(&mut self, host: &mut H, mask: FifoIrq) -> Event {
        if mask.contains(FifoIrq::OFF) && !self.pwr() {
            return Event::FifoOff;
        }
        if mask.contains(FifoIrq::RX) && self.poll_rx() {
            return Event::FifoRx;
        }

        let sr = host.intr_disable();
        host.arm_fifo(mask);

        let ev = loop {
            // The blocking receive is the suspension point; the host's
            // scheduler deals with the interrupt state across it.
            if let Some(ev) = host.recv(true) {
                break ev;
            }
        };

        host.disarm_fifo(mask);
        host.intr_restore(sr);

        ev
    }

    /// FIFO conditions that are both asserted by the device and armed
    /// for delivery. Meant for the host's interrupt dispatcher.
    pub fn irqs_masked<H: HostOs>(&mut self, host: &H) -> FifoIrq {
        self.irqs() & host.armed_fifo()
    }
}
