// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Software breakpoints.
//!
//! A breakpoint substitutes the instruction word at its address with a
//! trap encoding, remembering the original for restoration. Install and
//! clear are careful read-modify-write sequences: clearing puts the old
//! word back only if the trap is still there, so code that was reloaded
//! or patched underneath us is left alone. Every patch is followed by a
//! writeback/invalidate of exactly that word so the CPU fetches what we
//! wrote.
//!
//! Installation refuses addresses outside kernel-segment RAM, unaligned
//! addresses, and anything inside the host's exempt ranges. The exempt
//! ranges cover the runtime routines the agent itself calls; a trap in
//! one of those would re-enter the agent from inside itself.

use ultra::{HostOs, KSEG_BASE, KSEG_END};

/// Capacity of the breakpoint table.
pub const SWBKP_MAX: usize = 16;

/// `teq $zero, $zero`: unconditionally trapping, and otherwise inert.
pub const TRAP_INSN: u32 = 0x0000_0034;

/// Address can't host a breakpoint, or the slot is already taken.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BkpError;

#[derive(Copy, Clone, Debug, Default)]
pub struct SwBkp {
    pub active: bool,
    pub addr: u32,
    pub old_insn: u32,
    pub new_insn: u32,
}

/// Whether `addr` names `size`-aligned kernel-segment memory.
pub fn check_addr(addr: u32, size: u32) -> bool {
    (KSEG_BASE..KSEG_END).contains(&addr) && addr & (size - 1) == 0
}

fn addr_exempt<H: HostOs>(host: &H, addr: u32) -> bool {
    host.exempt_ranges().iter().any(|r| r.contains(addr))
}

/// Installs a breakpoint into `slot`. A slot already holding `addr` is a
/// no-op success; a slot holding some other address is refused.
pub fn set<H: HostOs>(
    host: &mut H,
    slot: &mut SwBkp,
    addr: u32,
) -> Result<(), BkpError> {
    if slot.active {
        return if slot.addr == addr { Ok(()) } else { Err(BkpError) };
    }

    if !check_addr(addr, 4) || addr_exempt(host, addr) {
        return Err(BkpError);
    }

    slot.active = true;
    slot.addr = addr;
    slot.old_insn = host.read32(addr);
    slot.new_insn = TRAP_INSN;

    host.write32(addr, slot.new_insn);
    host.flush_insn(addr, 4);

    Ok(())
}

/// Deactivates `slot`, restoring the original word if the trap is still
/// in place. Clearing an inactive slot is fine.
pub fn clear<H: HostOs>(host: &mut H, slot: &mut SwBkp) {
    if slot.active {
        slot.active = false;

        if host.read32(slot.addr) == slot.new_insn {
            host.write32(slot.addr, slot.old_insn);
            host.flush_insn(slot.addr, 4);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ultra::fake::FakeHost;
    use ultra::AddressRange;

    #[test]
    fn address_checks() {
        assert!(check_addr(0x8000_0000, 4));
        assert!(check_addr(0xBFFF_FFFC, 4));
        assert!(!check_addr(0xC000_0000, 4));
        assert!(!check_addr(0x7FFF_FFFC, 4));
        assert!(!check_addr(0x8000_0002, 4));
        assert!(check_addr(0x8000_0002, 2));
        assert!(check_addr(0x8000_0003, 1));
    }

    #[test]
    fn install_patches_and_flushes() {
        let mut host = FakeHost::new();
        let addr = 0x8010_0000;
        host.write32(addr, 0x2402_0001);

        let mut slot = SwBkp::default();
        assert_eq!(set(&mut host, &mut slot, addr), Ok(()));
        assert_eq!(host.read32(addr), TRAP_INSN);
        assert_eq!(slot.old_insn, 0x2402_0001);
        assert_eq!(host.flushed[..], [(addr, 4)]);

        clear(&mut host, &mut slot);
        assert_eq!(host.read32(addr), 0x2402_0001);
        assert!(!slot.active);
    }

    #[test]
    fn reinstall_same_address_is_idempotent() {
        let mut host = FakeHost::new();
        let addr = 0x8010_0010;
        let mut slot = SwBkp::default();
        set(&mut host, &mut slot, addr).unwrap();
        assert_eq!(set(&mut host, &mut slot, addr), Ok(()));
        assert_eq!(set(&mut host, &mut slot, addr + 4), Err(BkpError));
    }

    #[test]
    fn refuses_bad_addresses() {
        let mut host = FakeHost::new();
        host.exempt
            .push(AddressRange {
                start: 0x8010_0100,
                end: 0x8010_0200,
            })
            .unwrap();

        let mut slot = SwBkp::default();
        // Unaligned.
        assert_eq!(set(&mut host, &mut slot, 0x8010_0002), Err(BkpError));
        // Outside the kernel segments.
        assert_eq!(set(&mut host, &mut slot, 0x0010_0000), Err(BkpError));
        // Exempt.
        assert_eq!(set(&mut host, &mut slot, 0x8010_0100), Err(BkpError));
        assert_eq!(set(&mut host, &mut slot, 0x8010_01FC), Err(BkpError));
        // Just past the exempt range is fair game.
        assert_eq!(set(&mut host, &mut slot, 0x8010_0200), Ok(()));
    }

    #[test]
    fn clear_leaves_self_modified_code_alone() {
        let mut host = FakeHost::new();
        let addr = 0x8010_0020;
        host.write32(addr, 0x1111_1111);

        let mut slot = SwBkp::default();
        set(&mut host, &mut slot, addr).unwrap();
        // The target reloaded this word while we were stopped.
        host.write32(addr, 0x2222_2222);

        clear(&mut host, &mut slot);
        assert_eq!(host.read32(addr), 0x2222_2222);
    }

    #[test]
    fn clearing_inactive_slot_is_a_no_op() {
        let mut host = FakeHost::new();
        let mut slot = SwBkp::default();
        clear(&mut host, &mut slot);
        assert!(host.flushed.is_empty());
    }
}
