// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Loopback FIFO for tests: reads come from a script the test queues up,
//! writes accumulate for inspection.

use crate::{FifoDevice, NoDevice};
use ultra::FifoIrq;

pub struct LoopFifo {
    pub rx: heapless::Deque<u8, 4096>,
    pub tx: heapless::Vec<u8, 4096>,
    pub powered: bool,
    pub present: bool,
}

impl Default for LoopFifo {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopFifo {
    pub fn new() -> Self {
        Self {
            rx: heapless::Deque::new(),
            tx: heapless::Vec::new(),
            powered: true,
            present: true,
        }
    }

    /// Queues bytes for the agent to receive.
    pub fn push_rx(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.rx.push_back(b).expect("fake fifo rx overflow");
        }
    }

    /// Takes and clears everything the agent has transmitted so far.
    pub fn take_tx(&mut self) -> heapless::Vec<u8, 4096> {
        core::mem::take(&mut self.tx)
    }
}

impl FifoDevice for LoopFifo {
    fn probe(&mut self) -> Result<(), NoDevice> {
        if self.present {
            Ok(())
        } else {
            Err(NoDevice)
        }
    }

    fn irqs(&mut self) -> FifoIrq {
        let mut irqs = FifoIrq::empty();
        if !self.powered {
            irqs |= FifoIrq::OFF;
        } else if !self.rx.is_empty() {
            irqs |= FifoIrq::RX;
        }
        irqs
    }

    fn pwr(&mut self) -> bool {
        self.powered
    }

    fn poll_rx(&mut self) -> bool {
        self.powered && !self.rx.is_empty()
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        // The real devices block here; a test that reads with nothing
        // scripted has gone off the rails.
        assert!(!self.rx.is_empty(), "fake fifo read with nothing scripted");
        let mut n = 0;
        while n < buf.len() {
            match self.rx.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        for &b in buf {
            self.tx.push(b).expect("fake fifo tx overflow");
        }
        buf.len()
    }
}
