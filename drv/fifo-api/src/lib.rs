// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capability interface for byte-FIFO devices.
//!
//! Several cartridge and emulator devices can carry the debug link; they
//! all reduce to the same capability: probe for presence, report edge
//! conditions, and move bytes. The agent's multiplexer binds to the first
//! device whose probe succeeds and never looks at the rest again.

#![no_std]

use ultra::FifoIrq;

#[cfg(feature = "fake")]
pub mod fake;

/// Probe failure: the device is not present on this console.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NoDevice;

/// One bidirectional byte FIFO.
///
/// `read` blocks until at least one byte is available and returns however
/// many it could take in one device transaction; `write` pushes the whole
/// buffer, blocking on device backpressure, and returns the count
/// actually accepted.
pub trait FifoDevice {
    /// Checks for device presence. Called once, before any other method.
    fn probe(&mut self) -> Result<(), NoDevice>;

    /// Currently-asserted edge conditions. Safe to call from an
    /// interrupt dispatcher; must not block.
    fn irqs(&mut self) -> FifoIrq;

    /// Whether the link partner is powered.
    fn pwr(&mut self) -> bool;

    /// Whether a read would make progress without blocking.
    fn poll_rx(&mut self) -> bool;

    fn read(&mut self, buf: &mut [u8]) -> usize;

    fn write(&mut self, buf: &[u8]) -> usize;
}
