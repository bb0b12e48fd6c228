// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Remote-protocol register numbering.
//!
//! The debugger's register file is indexed 0..0x48: the 32 general
//! registers, then the status/multiply/fault group, then the 16 double
//! slots of the FPU and its control word. The host context doesn't
//! preserve $zero, $k0, or $k1, so those indices read as zero and drop
//! writes, as does everything else unmapped.

use ultra::ThreadContext;

/// Total number of register slots in a `g`/`G` packet.
pub const NUM_REGS: u32 = 0x48;

/// Index of the program counter, the one the stop reply always carries.
pub const REG_PC: u32 = 0x25;

pub fn get(ctx: &ThreadContext, idx: u32) -> u64 {
    match idx {
        0x01 => ctx.at,
        0x02 => ctx.v0,
        0x03 => ctx.v1,
        0x04 => ctx.a0,
        0x05 => ctx.a1,
        0x06 => ctx.a2,
        0x07 => ctx.a3,
        0x08 => ctx.t0,
        0x09 => ctx.t1,
        0x0A => ctx.t2,
        0x0B => ctx.t3,
        0x0C => ctx.t4,
        0x0D => ctx.t5,
        0x0E => ctx.t6,
        0x0F => ctx.t7,
        0x10 => ctx.s0,
        0x11 => ctx.s1,
        0x12 => ctx.s2,
        0x13 => ctx.s3,
        0x14 => ctx.s4,
        0x15 => ctx.s5,
        0x16 => ctx.s6,
        0x17 => ctx.s7,
        0x18 => ctx.t8,
        0x19 => ctx.t9,
        0x1C => ctx.gp,
        0x1D => ctx.sp,
        0x1E => ctx.s8,
        0x1F => ctx.ra,
        0x20 => u64::from(ctx.sr),
        0x21 => ctx.lo,
        0x22 => ctx.hi,
        0x23 => u64::from(ctx.badvaddr),
        0x24 => u64::from(ctx.cause),
        0x25 => u64::from(ctx.pc),
        0x26..=0x44 if idx % 2 == 0 => ctx.fp[(idx as usize - 0x26) / 2],
        0x46 => u64::from(ctx.fpcsr),
        _ => 0,
    }
}

pub fn set(ctx: &mut ThreadContext, idx: u32, v: u64) {
    match idx {
        0x01 => ctx.at = v,
        0x02 => ctx.v0 = v,
        0x03 => ctx.v1 = v,
        0x04 => ctx.a0 = v,
        0x05 => ctx.a1 = v,
        0x06 => ctx.a2 = v,
        0x07 => ctx.a3 = v,
        0x08 => ctx.t0 = v,
        0x09 => ctx.t1 = v,
        0x0A => ctx.t2 = v,
        0x0B => ctx.t3 = v,
        0x0C => ctx.t4 = v,
        0x0D => ctx.t5 = v,
        0x0E => ctx.t6 = v,
        0x0F => ctx.t7 = v,
        0x10 => ctx.s0 = v,
        0x11 => ctx.s1 = v,
        0x12 => ctx.s2 = v,
        0x13 => ctx.s3 = v,
        0x14 => ctx.s4 = v,
        0x15 => ctx.s5 = v,
        0x16 => ctx.s6 = v,
        0x17 => ctx.s7 = v,
        0x18 => ctx.t8 = v,
        0x19 => ctx.t9 = v,
        0x1C => ctx.gp = v,
        0x1D => ctx.sp = v,
        0x1E => ctx.s8 = v,
        0x1F => ctx.ra = v,
        0x20 => ctx.sr = v as u32,
        0x21 => ctx.lo = v,
        0x22 => ctx.hi = v,
        0x23 => ctx.badvaddr = v as u32,
        0x24 => ctx.cause = v as u32,
        0x25 => ctx.pc = v as u32,
        0x26..=0x44 if idx % 2 == 0 => {
            ctx.fp[(idx as usize - 0x26) / 2] = v
        }
        0x46 => ctx.fpcsr = v as u32,
        _ => {}
    }
}
