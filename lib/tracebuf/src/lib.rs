// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static trace rings for post-mortem inspection.
//!
//! A debug agent can't very well print its own diagnostics over the link it
//! is busy debugging with, so observability here is a ring of `Copy` event
//! records in a named static. The ring lands in bss, survives the thread
//! that wrote it, and can be read with a symbol-aware memory viewer when
//! something goes wrong.
//!
//! Declare a ring with [`tracebuf!`], giving the payload type, capacity, and
//! an initializer for unused slots:
//!
//! ```
//! use tracebuf::tracebuf;
//!
//! #[derive(Copy, Clone, PartialEq)]
//! enum Trace { None, Attach }
//!
//! tracebuf!(Trace, 32, Trace::None);
//! ```
//!
//! then record events with [`trace!`]:
//!
//! ```
//! use tracebuf::{tracebuf, trace};
//!
//! #[derive(Copy, Clone, PartialEq)]
//! enum Trace { None, Attach }
//!
//! tracebuf!(Trace, 32, Trace::None);
//! trace!(Trace::Attach);
//! ```
//!
//! Consecutive identical payloads collapse into a repeat count on the most
//! recent slot, so a polling loop doesn't wipe out the interesting history
//! around it.

#![cfg_attr(not(test), no_std)]

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// One occupied slot of a [`TraceRing`].
#[derive(Copy, Clone, Debug)]
pub struct TraceEntry<T: Copy + PartialEq> {
    /// How many times the ring has wrapped when this entry was written.
    /// Distinguishes fresh entries from stale ones at the same index.
    pub lap: u16,
    /// Number of consecutive times this payload was recorded.
    pub count: u32,
    pub payload: T,
}

/// Fixed-size ring of trace entries. Instantiate through [`tracebuf!`].
#[derive(Debug)]
pub struct TraceRing<T: Copy + PartialEq, const N: usize> {
    pub next: usize,
    pub lap: u16,
    pub slots: [TraceEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> TraceRing<T, N> {
    pub const fn new(fill: T) -> Self {
        Self {
            next: 0,
            lap: 0,
            slots: [TraceEntry {
                lap: 0,
                count: 0,
                payload: fill,
            }; N],
        }
    }

    /// Records `payload`, coalescing with the previous entry when equal.
    pub fn record(&mut self, payload: T) {
        if self.next > 0 || self.lap > 0 {
            let prev = if self.next == 0 { N - 1 } else { self.next - 1 };
            let slot = &mut self.slots[prev];
            if slot.payload == payload {
                if let Some(count) = slot.count.checked_add(1) {
                    slot.count = count;
                    return;
                }
            }
        }

        self.slots[self.next] = TraceEntry {
            lap: self.lap,
            count: 1,
            payload,
        };
        self.next += 1;
        if self.next == N {
            self.next = 0;
            self.lap = self.lap.wrapping_add(1);
        }
    }
}

/// Single-borrow cell so a `TraceRing` can live in a `static` without
/// `static mut`. Only one writer may hold the ring at a time; a second
/// simultaneous borrow panics rather than aliasing.
pub struct TraceCell<T> {
    taken: AtomicBool,
    ring: UnsafeCell<T>,
}

impl<T> TraceCell<T> {
    pub const fn new(ring: T) -> Self {
        Self {
            taken: AtomicBool::new(false),
            ring: UnsafeCell::new(ring),
        }
    }

    pub fn with<R>(&self, body: impl FnOnce(&mut T) -> R) -> R {
        if self.taken.swap(true, Ordering::Acquire) {
            panic!();
        }
        // The flag above guarantees this is the only live &mut.
        let r = body(unsafe { &mut *self.ring.get() });
        self.taken.store(false, Ordering::Release);
        r
    }
}

unsafe impl<T> Sync for TraceCell<T> where for<'a> &'a mut T: Send {}

/// Declares a static trace ring named `__TRACEBUF` (or `$name`) in the
/// current module.
#[macro_export]
macro_rules! tracebuf {
    ($name:ident, $t:ty, $n:expr, $fill:expr) => {
        #[used]
        static $name: $crate::TraceCell<$crate::TraceRing<$t, $n>> =
            $crate::TraceCell::new($crate::TraceRing::new($fill));
    };
    ($t:ty, $n:expr, $fill:expr) => {
        $crate::tracebuf!(__TRACEBUF, $t, $n, $fill);
    };
}

/// Records an event into a ring declared with [`tracebuf!`].
#[macro_export]
macro_rules! trace {
    ($name:path, $payload:expr) => {{
        let p = $payload;
        $name.with(|ring| ring.record(p));
    }};
    ($payload:expr) => {
        $crate::trace!(__TRACEBUF, $payload);
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_order() {
        let mut ring = TraceRing::<u32, 4>::new(0);
        ring.record(10);
        ring.record(20);
        assert_eq!(ring.slots[0].payload, 10);
        assert_eq!(ring.slots[0].count, 1);
        assert_eq!(ring.slots[1].payload, 20);
        assert_eq!(ring.next, 2);
    }

    #[test]
    fn repeats_coalesce() {
        let mut ring = TraceRing::<u32, 4>::new(0);
        ring.record(7);
        ring.record(7);
        ring.record(7);
        assert_eq!(ring.next, 1);
        assert_eq!(ring.slots[0].count, 3);
    }

    #[test]
    fn wraps_and_bumps_lap() {
        let mut ring = TraceRing::<u32, 2>::new(0);
        ring.record(1);
        ring.record(2);
        ring.record(3);
        assert_eq!(ring.next, 1);
        assert_eq!(ring.lap, 1);
        assert_eq!(ring.slots[0].payload, 3);
        assert_eq!(ring.slots[0].lap, 1);
        // The wrapped slot still coalesces with its predecessor.
        ring.record(3);
        assert_eq!(ring.slots[0].count, 2);
    }

    #[test]
    fn cell_allows_sequential_borrows() {
        static RING: TraceCell<TraceRing<u32, 4>> =
            TraceCell::new(TraceRing::new(0));
        RING.with(|r| r.record(1));
        RING.with(|r| r.record(2));
        RING.with(|r| assert_eq!(r.next, 2));
    }
}
