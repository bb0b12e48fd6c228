// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Single-step planning.
//!
//! There is no hardware single-step on this core, so a step is staged:
//! decode the instruction at the thread's PC, predict every address
//! execution can reach next, plant temporary breakpoints there, and let
//! the thread run into one of them.
//!
//! A branch has two successors (taken and fall-through past the delay
//! slot); a jump has one. Calls get a breakpoint on the return address
//! too, because the callee may sit in an exempt range where no
//! breakpoint can land -- the extra breakpoint turns that case into a
//! step-over instead of a runaway. If neither candidate accepts a
//! breakpoint the step is refused with a synthetic interrupt stop, which
//! the debugger presents as "couldn't step".
//!
//! While the step is in flight the thread's priority is raised to the
//! application maximum so it reaches the breakpoint promptly; the old
//! priority comes back when the agent stops the world again.

use ultra::{HostOs, ThreadRef, PRI_APP_MAX};
use vr4300_insn::{decode, Insn, Op, Opnd};

use crate::io::IoMux;
use crate::{regs, swbkp, Rdb, Trace};

fn branch_disp(insn: &Insn, slot: usize) -> i32 {
    match insn.opnd[slot] {
        Opnd::Branch(d) => d,
        _ => 0,
    }
}

fn cpu_reg(insn: &Insn, slot: usize) -> u32 {
    match insn.opnd[slot] {
        Opnd::Cpu(r) => u32::from(r),
        _ => 0,
    }
}

fn jump_target(insn: &Insn, pc: u32) -> u32 {
    match insn.opnd[0] {
        Opnd::Jump(t) => (pc & 0xF000_0000) | t,
        _ => pc.wrapping_add(4),
    }
}

/// Candidate PCs after executing the instruction at `pc`. Zero marks an
/// empty slot.
pub(crate) fn step_targets<H: HostOs>(
    host: &H,
    thread: ThreadRef,
    pc: u32,
) -> [u32; 2] {
    let insn = if swbkp::check_addr(pc, 4) {
        decode(host.read32(pc))
    } else {
        None
    };

    let Some(insn) = insn else {
        return [pc.wrapping_add(4), 0];
    };

    let taken = |d: i32| pc.wrapping_add(4).wrapping_add(d as u32);
    let reg = |slot| regs::get(host.context(thread), cpu_reg(&insn, slot)) as u32;

    match insn.op {
        // Coprocessor condition branches carry only the displacement.
        Op::Bc1f | Op::Bc1fl | Op::Bc1t | Op::Bc1tl => {
            [taken(branch_disp(&insn, 0)), pc.wrapping_add(8)]
        }
        // Compare-against-zero branches: one register, then the
        // displacement.
        Op::Bgez
        | Op::Bgezal
        | Op::Bgezall
        | Op::Bgezl
        | Op::Bgtz
        | Op::Bgtzl
        | Op::Blez
        | Op::Blezl
        | Op::Bltz
        | Op::Bltzal
        | Op::Bltzall
        | Op::Bltzl => [taken(branch_disp(&insn, 1)), pc.wrapping_add(8)],
        // Two-register compares: displacement in the third slot.
        Op::Beq | Op::Beql | Op::Bne | Op::Bnel => {
            [taken(branch_disp(&insn, 2)), pc.wrapping_add(8)]
        }
        Op::J => [jump_target(&insn, pc), 0],
        // The return-address breakpoint makes calls steppable even when
        // the destination refuses a breakpoint.
        Op::Jal => [jump_target(&insn, pc), pc.wrapping_add(8)],
        Op::Jalr => [reg(1), pc.wrapping_add(8)],
        Op::Jr => [reg(0), 0],
        _ => [pc.wrapping_add(4), 0],
    }
}

impl Rdb {
    /// Stages a single step of `thread` and resumes the target, or
    /// refuses with a synthetic interrupt stop.
    pub(crate) fn step<H: HostOs>(
        &mut self,
        host: &mut H,
        io: &mut IoMux<'_, '_>,
        thread: ThreadRef,
    ) {
        let pc = host.context(thread).pc;
        let targets = step_targets(host, thread, pc);

        let mut installed = 0;
        for (slot, &addr) in self.step_bkp.iter_mut().zip(targets.iter()) {
            if addr != 0 && swbkp::set(host, slot, addr).is_ok() {
                installed += 1;
            }
        }

        crate::trace!(Trace::Step { pc, installed });

        if installed != 0 {
            self.step_thread = Some(thread);
            self.step_pri = host.priority(thread);
            if self.step_pri < PRI_APP_MAX {
                host.set_priority(thread, PRI_APP_MAX);
            }

            self.stepping = true;
            self.run(host);
        } else {
            // Nowhere to put a breakpoint; report the thread as
            // interrupted where it stands.
            self.cthread = Some(thread);
            self.gthread = Some(thread);

            host.context_mut(thread).cause = 0;
            self.stop_reply(host, io, thread);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ultra::fake::FakeHost;

    fn host_with_insn(pc: u32, word: u32) -> (FakeHost, ThreadRef) {
        let mut host = FakeHost::new();
        let t = host.add_thread(1, pc);
        host.write32(pc, word);
        (host, t)
    }

    const PC: u32 = 0x8010_0100;

    #[test]
    fn straight_line_steps_to_next_word() {
        // addu $v0, $a0, $a1
        let (host, t) =
            host_with_insn(PC, (4 << 21) | (5 << 16) | (2 << 11) | 0x21);
        assert_eq!(step_targets(&host, t, PC), [PC + 4, 0]);
    }

    #[test]
    fn undecodable_word_falls_through() {
        let (host, t) = host_with_insn(PC, 0x13 << 26);
        assert_eq!(step_targets(&host, t, PC), [PC + 4, 0]);
    }

    #[test]
    fn unreadable_pc_falls_through() {
        let mut host = FakeHost::new();
        let t = host.add_thread(1, 0x0000_1000);
        assert_eq!(step_targets(&host, t, 0x0000_1000), [0x0000_1004, 0]);
    }

    #[test]
    fn two_register_branch_has_both_arms() {
        // beq $a0, $zero, +4 words
        let (host, t) = host_with_insn(PC, (0x04 << 26) | (4 << 21) | 4);
        assert_eq!(step_targets(&host, t, PC), [PC + 4 + 16, PC + 8]);
    }

    #[test]
    fn zero_compare_branch_has_both_arms() {
        // bltzl $v1, -2 words
        let (host, t) = host_with_insn(
            PC,
            (0x01 << 26) | (3 << 21) | (0x02 << 16) | 0xFFFE,
        );
        assert_eq!(step_targets(&host, t, PC), [PC + 4 - 8, PC + 8]);
    }

    #[test]
    fn fpu_branch_has_both_arms() {
        // bc1tl +8 words
        let (host, t) =
            host_with_insn(PC, (0x11 << 26) | (0x08 << 21) | (0x03 << 16) | 8);
        assert_eq!(step_targets(&host, t, PC), [PC + 4 + 32, PC + 8]);
    }

    #[test]
    fn jump_composes_with_pc_region() {
        // j (word target of 0x0100200 bytes)
        let (host, t) = host_with_insn(PC, (0x02 << 26) | (0x0100_200 >> 2));
        assert_eq!(step_targets(&host, t, PC), [0x8010_0200, 0]);
    }

    #[test]
    fn call_watches_the_return_address_too() {
        let (host, t) = host_with_insn(PC, (0x03 << 26) | (0x0100_200 >> 2));
        assert_eq!(step_targets(&host, t, PC), [0x8010_0200, PC + 8]);
    }

    #[test]
    fn register_jumps_read_the_register() {
        // jr $ra
        let (mut host, t) = host_with_insn(PC, 0x03E0_0008);
        host.thread_mut(t).ctx.ra = 0xFFFF_FFFF_8022_2224;
        assert_eq!(step_targets(&host, t, PC), [0x8022_2224, 0]);

        // jalr $t9
        let (mut host, t) = host_with_insn(PC, 0x0320_F809);
        host.thread_mut(t).ctx.t9 = 0x8030_0000;
        assert_eq!(step_targets(&host, t, PC), [0x8030_0000, PC + 8]);
    }
}
