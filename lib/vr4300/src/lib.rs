// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! VR4300 instruction decoder.
//!
//! Decodes a 32-bit instruction word into an opcode and up to three typed
//! operands. The decoder exists to let a debugger predict control flow one
//! instruction ahead, so it covers the full user-visible VR4300 set -- it
//! does not interpret or simulate anything.
//!
//! Dispatch is three-level: the primary opcode in bits 31..26, then the
//! `funct` field for SPECIAL and the COP arithmetic formats, or the `rt`/
//! `rs` field for REGIMM and COP sub-opcodes. Encodings that don't resolve
//! to a known instruction decode to `None`.

#![no_std]

/// Decoded operand.
///
/// Register operands carry the architectural register number. Branch
/// displacements are sign-extended and pre-scaled to bytes, so a taken
/// branch lands at `pc + 4 + displacement`. Jump targets carry the low 28
/// bits of the destination; the caller composes them with the top nibble
/// of the delay-slot PC.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Opnd {
    Null,
    /// General-purpose CPU register.
    Cpu(u8),
    /// System control coprocessor register.
    Cp0(u8),
    /// Floating-point register.
    Cp1(u8),
    /// Floating-point control register.
    Fcr(u8),
    /// Immediate; sign-extended where the instruction calls for it.
    Imm(i32),
    /// PC-relative branch displacement in bytes.
    Branch(i32),
    /// Sign-extended load/store offset.
    Offset(i32),
    /// Cache operation code.
    Cache(u8),
    /// Low 28 bits of a jump target.
    Jump(u32),
}

/// A decoded instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Insn {
    pub op: Op,
    pub opnd: [Opnd; 3],
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum Op {
    // SPECIAL
    Sll, Srl, Sra, Sllv, Srlv, Srav,
    Jr, Jalr,
    Syscall, Break, Sync,
    Mfhi, Mthi, Mflo, Mtlo,
    Dsllv, Dsrlv, Dsrav,
    Mult, Multu, Div, Divu, Dmult, Dmultu, Ddiv, Ddivu,
    Add, Addu, Sub, Subu, And, Or, Xor, Nor, Slt, Sltu,
    Dadd, Daddu, Dsub, Dsubu,
    Tge, Tgeu, Tlt, Tltu, Teq, Tne,
    Dsll, Dsrl, Dsra, Dsll32, Dsrl32, Dsra32,
    // REGIMM
    Bltz, Bgez, Bltzl, Bgezl,
    Tgei, Tgeiu, Tlti, Tltiu, Teqi, Tnei,
    Bltzal, Bgezal, Bltzall, Bgezall,
    // Primary
    J, Jal,
    Beq, Bne, Blez, Bgtz,
    Addi, Addiu, Slti, Sltiu, Andi, Ori, Xori, Lui,
    Beql, Bnel, Blezl, Bgtzl,
    Daddi, Daddiu,
    Ldl, Ldr,
    Lb, Lh, Lwl, Lw, Lbu, Lhu, Lwr, Lwu,
    Sb, Sh, Swl, Sw, Sdl, Sdr, Swr,
    Cache,
    Ll, Lwc1, Lld, Ldc1, Ld,
    Sc, Swc1, Scd, Sdc1, Sd,
    // COP0
    Mfc0, Mtc0,
    Tlbr, Tlbwi, Tlbwr, Tlbp, Eret,
    // COP1 moves and branches
    Mfc1, Dmfc1, Cfc1, Mtc1, Dmtc1, Ctc1,
    Bc1f, Bc1t, Bc1fl, Bc1tl,
    // COP1 single
    AddS, SubS, MulS, DivS, SqrtS, AbsS, MovS, NegS,
    RoundLS, TruncLS, CeilLS, FloorLS,
    RoundWS, TruncWS, CeilWS, FloorWS,
    CvtDS, CvtWS, CvtLS,
    CFS, CUnS, CEqS, CUeqS, COltS, CUltS, COleS, CUleS,
    CSfS, CNgleS, CSeqS, CNglS, CLtS, CNgeS, CLeS, CNgtS,
    // COP1 double
    AddD, SubD, MulD, DivD, SqrtD, AbsD, MovD, NegD,
    RoundLD, TruncLD, CeilLD, FloorLD,
    RoundWD, TruncWD, CeilWD, FloorWD,
    CvtSD, CvtWD, CvtLD,
    CFD, CUnD, CEqD, CUeqD, COltD, CUltD, COleD, CUleD,
    CSfD, CNgleD, CSeqD, CNglD, CLtD, CNgeD, CLeD, CNgtD,
    // COP1 fixed-point
    CvtSW, CvtDW, CvtSL, CvtDL,
}

fn rs(code: u32) -> u8 {
    ((code >> 21) & 0x1F) as u8
}

fn rt(code: u32) -> u8 {
    ((code >> 16) & 0x1F) as u8
}

fn rd(code: u32) -> u8 {
    ((code >> 11) & 0x1F) as u8
}

fn sa(code: u32) -> u8 {
    ((code >> 6) & 0x1F) as u8
}

fn sx_imm(code: u32) -> i32 {
    i32::from(code as u16 as i16)
}

fn insn(op: Op, opnd: [Opnd; 3]) -> Option<Insn> {
    Some(Insn { op, opnd })
}

// One constructor per operand layout, named for the fields it extracts in
// order: s/t/d are CPU registers by field position, o is a scaled branch
// offset, i an immediate, b a base register, c a code field, and a `1`
// suffix moves the register into CP1 space.

fn i_so(op: Op, code: u32) -> Option<Insn> {
    insn(op, [Opnd::Cpu(rs(code)), Opnd::Branch(sx_imm(code) * 4), Opnd::Null])
}

fn i_si(op: Op, code: u32) -> Option<Insn> {
    insn(op, [Opnd::Cpu(rs(code)), Opnd::Imm(sx_imm(code)), Opnd::Null])
}

fn i_o(op: Op, code: u32) -> Option<Insn> {
    insn(op, [Opnd::Branch(sx_imm(code) * 4), Opnd::Null, Opnd::Null])
}

fn i_sto(op: Op, code: u32) -> Option<Insn> {
    insn(
        op,
        [
            Opnd::Cpu(rs(code)),
            Opnd::Cpu(rt(code)),
            Opnd::Branch(sx_imm(code) * 4),
        ],
    )
}

fn i_tsi(op: Op, code: u32) -> Option<Insn> {
    insn(
        op,
        [Opnd::Cpu(rt(code)), Opnd::Cpu(rs(code)), Opnd::Imm(sx_imm(code))],
    )
}

fn i_ti(op: Op, code: u32) -> Option<Insn> {
    insn(
        op,
        [
            Opnd::Cpu(rt(code)),
            Opnd::Imm((code & 0xFFFF) as i32),
            Opnd::Null,
        ],
    )
}

fn i_tob(op: Op, code: u32) -> Option<Insn> {
    insn(
        op,
        [
            Opnd::Cpu(rt(code)),
            Opnd::Offset(sx_imm(code)),
            Opnd::Cpu(rs(code)),
        ],
    )
}

fn i_oob(op: Op, code: u32) -> Option<Insn> {
    insn(
        op,
        [
            Opnd::Cache(rt(code)),
            Opnd::Offset(sx_imm(code)),
            Opnd::Cpu(rs(code)),
        ],
    )
}

fn i_t1ob(op: Op, code: u32) -> Option<Insn> {
    insn(
        op,
        [
            Opnd::Cp1(rt(code)),
            Opnd::Offset(sx_imm(code)),
            Opnd::Cpu(rs(code)),
        ],
    )
}

fn j(op: Op, code: u32) -> Option<Insn> {
    insn(op, [Opnd::Jump((code & 0x3FF_FFFF) << 2), Opnd::Null, Opnd::Null])
}

fn r_dta(op: Op, code: u32) -> Option<Insn> {
    insn(
        op,
        [
            Opnd::Cpu(rd(code)),
            Opnd::Cpu(rt(code)),
            Opnd::Imm(i32::from(sa(code))),
        ],
    )
}

fn r_dts(op: Op, code: u32) -> Option<Insn> {
    insn(
        op,
        [Opnd::Cpu(rd(code)), Opnd::Cpu(rt(code)), Opnd::Cpu(rs(code))],
    )
}

fn r_s(op: Op, code: u32) -> Option<Insn> {
    insn(op, [Opnd::Cpu(rs(code)), Opnd::Null, Opnd::Null])
}

fn r_ds(op: Op, code: u32) -> Option<Insn> {
    insn(op, [Opnd::Cpu(rd(code)), Opnd::Cpu(rs(code)), Opnd::Null])
}

fn r_c(op: Op, code: u32) -> Option<Insn> {
    insn(
        op,
        [Opnd::Imm(((code >> 6) & 0xF_FFFF) as i32), Opnd::Null, Opnd::Null],
    )
}

fn r(op: Op, _code: u32) -> Option<Insn> {
    insn(op, [Opnd::Null, Opnd::Null, Opnd::Null])
}

fn r_d(op: Op, code: u32) -> Option<Insn> {
    insn(op, [Opnd::Cpu(rd(code)), Opnd::Null, Opnd::Null])
}

fn r_st(op: Op, code: u32) -> Option<Insn> {
    insn(op, [Opnd::Cpu(rs(code)), Opnd::Cpu(rt(code)), Opnd::Null])
}

fn r_dst(op: Op, code: u32) -> Option<Insn> {
    insn(
        op,
        [Opnd::Cpu(rd(code)), Opnd::Cpu(rs(code)), Opnd::Cpu(rt(code))],
    )
}

fn r_stc(op: Op, code: u32) -> Option<Insn> {
    insn(
        op,
        [
            Opnd::Cpu(rs(code)),
            Opnd::Cpu(rt(code)),
            Opnd::Imm(((code >> 6) & 0x3FF) as i32),
        ],
    )
}

fn r_td0(op: Op, code: u32) -> Option<Insn> {
    insn(op, [Opnd::Cpu(rt(code)), Opnd::Cp0(rd(code)), Opnd::Null])
}

fn r_d1s1t1(op: Op, code: u32) -> Option<Insn> {
    insn(op, [Opnd::Cp1(sa(code)), Opnd::Cp1(rd(code)), Opnd::Cp1(rt(code))])
}

fn r_d1s1(op: Op, code: u32) -> Option<Insn> {
    insn(op, [Opnd::Cp1(sa(code)), Opnd::Cp1(rd(code)), Opnd::Null])
}

fn r_s1t1(op: Op, code: u32) -> Option<Insn> {
    insn(op, [Opnd::Cp1(rd(code)), Opnd::Cp1(rt(code)), Opnd::Null])
}

fn r_ts1(op: Op, code: u32) -> Option<Insn> {
    insn(op, [Opnd::Cpu(rt(code)), Opnd::Cp1(rd(code)), Opnd::Null])
}

fn r_ts1c(op: Op, code: u32) -> Option<Insn> {
    insn(op, [Opnd::Cpu(rt(code)), Opnd::Fcr(rd(code)), Opnd::Null])
}

fn decode_special(code: u32) -> Option<Insn> {
    match code & 0x3F {
        0x00 => r_dta(Op::Sll, code),
        0x02 => r_dta(Op::Srl, code),
        0x03 => r_dta(Op::Sra, code),
        0x04 => r_dts(Op::Sllv, code),
        0x06 => r_dts(Op::Srlv, code),
        0x07 => r_dts(Op::Srav, code),
        0x08 => r_s(Op::Jr, code),
        0x09 => r_ds(Op::Jalr, code),
        0x0C => r_c(Op::Syscall, code),
        0x0D => r_c(Op::Break, code),
        0x0F => r(Op::Sync, code),
        0x10 => r_d(Op::Mfhi, code),
        0x11 => r_s(Op::Mthi, code),
        0x12 => r_d(Op::Mflo, code),
        0x13 => r_s(Op::Mtlo, code),
        0x14 => r_dts(Op::Dsllv, code),
        0x16 => r_dts(Op::Dsrlv, code),
        0x17 => r_dts(Op::Dsrav, code),
        0x18 => r_st(Op::Mult, code),
        0x19 => r_st(Op::Multu, code),
        0x1A => r_st(Op::Div, code),
        0x1B => r_st(Op::Divu, code),
        0x1C => r_st(Op::Dmult, code),
        0x1D => r_st(Op::Dmultu, code),
        0x1E => r_st(Op::Ddiv, code),
        0x1F => r_st(Op::Ddivu, code),
        0x20 => r_dst(Op::Add, code),
        0x21 => r_dst(Op::Addu, code),
        0x22 => r_dst(Op::Sub, code),
        0x23 => r_dst(Op::Subu, code),
        0x24 => r_dst(Op::And, code),
        0x25 => r_dst(Op::Or, code),
        0x26 => r_dst(Op::Xor, code),
        0x27 => r_dst(Op::Nor, code),
        0x2A => r_dst(Op::Slt, code),
        0x2B => r_dst(Op::Sltu, code),
        0x2C => r_dst(Op::Dadd, code),
        0x2D => r_dst(Op::Daddu, code),
        0x2E => r_dst(Op::Dsub, code),
        0x2F => r_dst(Op::Dsubu, code),
        0x30 => r_stc(Op::Tge, code),
        0x31 => r_stc(Op::Tgeu, code),
        0x32 => r_stc(Op::Tlt, code),
        0x33 => r_stc(Op::Tltu, code),
        0x34 => r_stc(Op::Teq, code),
        0x36 => r_stc(Op::Tne, code),
        0x38 => r_dta(Op::Dsll, code),
        0x3A => r_dta(Op::Dsrl, code),
        0x3B => r_dta(Op::Dsra, code),
        0x3C => r_dta(Op::Dsll32, code),
        0x3E => r_dta(Op::Dsrl32, code),
        0x3F => r_dta(Op::Dsra32, code),
        _ => None,
    }
}

fn decode_regimm(code: u32) -> Option<Insn> {
    match rt(code) {
        0x00 => i_so(Op::Bltz, code),
        0x01 => i_so(Op::Bgez, code),
        0x02 => i_so(Op::Bltzl, code),
        0x03 => i_so(Op::Bgezl, code),
        0x08 => i_si(Op::Tgei, code),
        0x09 => i_si(Op::Tgeiu, code),
        0x0A => i_si(Op::Tlti, code),
        0x0B => i_si(Op::Tltiu, code),
        0x0C => i_si(Op::Teqi, code),
        0x0E => i_si(Op::Tnei, code),
        0x10 => i_so(Op::Bltzal, code),
        0x11 => i_so(Op::Bgezal, code),
        0x12 => i_so(Op::Bltzall, code),
        0x13 => i_so(Op::Bgezall, code),
        _ => None,
    }
}

fn decode_cop0_co(code: u32) -> Option<Insn> {
    match code & 0x3F {
        0x01 => r(Op::Tlbr, code),
        0x02 => r(Op::Tlbwi, code),
        0x06 => r(Op::Tlbwr, code),
        0x08 => r(Op::Tlbp, code),
        0x18 => r(Op::Eret, code),
        _ => None,
    }
}

fn decode_cop0(code: u32) -> Option<Insn> {
    match rs(code) {
        0x00 => r_td0(Op::Mfc0, code),
        0x04 => r_td0(Op::Mtc0, code),
        0x10..=0x1F => decode_cop0_co(code),
        _ => None,
    }
}

fn decode_cop1_bc1(code: u32) -> Option<Insn> {
    match rt(code) {
        0x00 => i_o(Op::Bc1f, code),
        0x01 => i_o(Op::Bc1t, code),
        0x02 => i_o(Op::Bc1fl, code),
        0x03 => i_o(Op::Bc1tl, code),
        _ => None,
    }
}

fn decode_cop1_s(code: u32) -> Option<Insn> {
    match code & 0x3F {
        0x00 => r_d1s1t1(Op::AddS, code),
        0x01 => r_d1s1t1(Op::SubS, code),
        0x02 => r_d1s1t1(Op::MulS, code),
        0x03 => r_d1s1t1(Op::DivS, code),
        0x04 => r_d1s1(Op::SqrtS, code),
        0x05 => r_d1s1(Op::AbsS, code),
        0x06 => r_d1s1(Op::MovS, code),
        0x07 => r_d1s1(Op::NegS, code),
        0x08 => r_d1s1(Op::RoundLS, code),
        0x09 => r_d1s1(Op::TruncLS, code),
        0x0A => r_d1s1(Op::CeilLS, code),
        0x0B => r_d1s1(Op::FloorLS, code),
        0x0C => r_d1s1(Op::RoundWS, code),
        0x0D => r_d1s1(Op::TruncWS, code),
        0x0E => r_d1s1(Op::CeilWS, code),
        0x0F => r_d1s1(Op::FloorWS, code),
        0x21 => r_d1s1(Op::CvtDS, code),
        0x24 => r_d1s1(Op::CvtWS, code),
        0x25 => r_d1s1(Op::CvtLS, code),
        0x30 => r_s1t1(Op::CFS, code),
        0x31 => r_s1t1(Op::CUnS, code),
        0x32 => r_s1t1(Op::CEqS, code),
        0x33 => r_s1t1(Op::CUeqS, code),
        0x34 => r_s1t1(Op::COltS, code),
        0x35 => r_s1t1(Op::CUltS, code),
        0x36 => r_s1t1(Op::COleS, code),
        0x37 => r_s1t1(Op::CUleS, code),
        0x38 => r_s1t1(Op::CSfS, code),
        0x39 => r_s1t1(Op::CNgleS, code),
        0x3A => r_s1t1(Op::CSeqS, code),
        0x3B => r_s1t1(Op::CNglS, code),
        0x3C => r_s1t1(Op::CLtS, code),
        0x3D => r_s1t1(Op::CNgeS, code),
        0x3E => r_s1t1(Op::CLeS, code),
        0x3F => r_s1t1(Op::CNgtS, code),
        _ => None,
    }
}

fn decode_cop1_d(code: u32) -> Option<Insn> {
    match code & 0x3F {
        0x00 => r_d1s1t1(Op::AddD, code),
        0x01 => r_d1s1t1(Op::SubD, code),
        0x02 => r_d1s1t1(Op::MulD, code),
        0x03 => r_d1s1t1(Op::DivD, code),
        0x04 => r_d1s1(Op::SqrtD, code),
        0x05 => r_d1s1(Op::AbsD, code),
        0x06 => r_d1s1(Op::MovD, code),
        0x07 => r_d1s1(Op::NegD, code),
        0x08 => r_d1s1(Op::RoundLD, code),
        0x09 => r_d1s1(Op::TruncLD, code),
        0x0A => r_d1s1(Op::CeilLD, code),
        0x0B => r_d1s1(Op::FloorLD, code),
        0x0C => r_d1s1(Op::RoundWD, code),
        0x0D => r_d1s1(Op::TruncWD, code),
        0x0E => r_d1s1(Op::CeilWD, code),
        0x0F => r_d1s1(Op::FloorWD, code),
        0x20 => r_d1s1(Op::CvtSD, code),
        0x24 => r_d1s1(Op::CvtWD, code),
        0x25 => r_d1s1(Op::CvtLD, code),
        0x30 => r_s1t1(Op::CFD, code),
        0x31 => r_s1t1(Op::CUnD, code),
        0x32 => r_s1t1(Op::CEqD, code),
        0x33 => r_s1t1(Op::CUeqD, code),
        0x34 => r_s1t1(Op::COltD, code),
        0x35 => r_s1t1(Op::CUltD, code),
        0x36 => r_s1t1(Op::COleD, code),
        0x37 => r_s1t1(Op::CUleD, code),
        0x38 => r_s1t1(Op::CSfD, code),
        0x39 => r_s1t1(Op::CNgleD, code),
        0x3A => r_s1t1(Op::CSeqD, code),
        0x3B => r_s1t1(Op::CNglD, code),
        0x3C => r_s1t1(Op::CLtD, code),
        0x3D => r_s1t1(Op::CNgeD, code),
        0x3E => r_s1t1(Op::CLeD, code),
        0x3F => r_s1t1(Op::CNgtD, code),
        _ => None,
    }
}

fn decode_cop1_w(code: u32) -> Option<Insn> {
    match code & 0x3F {
        0x20 => r_d1s1(Op::CvtSW, code),
        0x21 => r_d1s1(Op::CvtDW, code),
        _ => None,
    }
}

fn decode_cop1_l(code: u32) -> Option<Insn> {
    match code & 0x3F {
        0x20 => r_d1s1(Op::CvtSL, code),
        0x21 => r_d1s1(Op::CvtDL, code),
        _ => None,
    }
}

fn decode_cop1(code: u32) -> Option<Insn> {
    match rs(code) {
        0x00 => r_ts1(Op::Mfc1, code),
        0x01 => r_ts1(Op::Dmfc1, code),
        0x02 => r_ts1c(Op::Cfc1, code),
        0x04 => r_ts1(Op::Mtc1, code),
        0x05 => r_ts1(Op::Dmtc1, code),
        0x06 => r_ts1c(Op::Ctc1, code),
        0x08 => decode_cop1_bc1(code),
        0x10 => decode_cop1_s(code),
        0x11 => decode_cop1_d(code),
        0x14 => decode_cop1_w(code),
        0x15 => decode_cop1_l(code),
        _ => None,
    }
}

/// Decodes one instruction word.
pub fn decode(code: u32) -> Option<Insn> {
    match (code >> 26) & 0x3F {
        0x00 => decode_special(code),
        0x01 => decode_regimm(code),
        0x02 => j(Op::J, code),
        0x03 => j(Op::Jal, code),
        0x04 => i_sto(Op::Beq, code),
        0x05 => i_sto(Op::Bne, code),
        0x06 => i_so(Op::Blez, code),
        0x07 => i_so(Op::Bgtz, code),
        0x08 => i_tsi(Op::Addi, code),
        0x09 => i_tsi(Op::Addiu, code),
        0x0A => i_tsi(Op::Slti, code),
        0x0B => i_tsi(Op::Sltiu, code),
        0x0C => i_tsi(Op::Andi, code),
        0x0D => i_tsi(Op::Ori, code),
        0x0E => i_tsi(Op::Xori, code),
        0x0F => i_ti(Op::Lui, code),
        0x10 => decode_cop0(code),
        0x11 => decode_cop1(code),
        0x14 => i_sto(Op::Beql, code),
        0x15 => i_sto(Op::Bnel, code),
        0x16 => i_so(Op::Blezl, code),
        0x17 => i_so(Op::Bgtzl, code),
        0x18 => i_tsi(Op::Daddi, code),
        0x19 => i_tsi(Op::Daddiu, code),
        0x1A => i_tob(Op::Ldl, code),
        0x1B => i_tob(Op::Ldr, code),
        0x20 => i_tob(Op::Lb, code),
        0x21 => i_tob(Op::Lh, code),
        0x22 => i_tob(Op::Lwl, code),
        0x23 => i_tob(Op::Lw, code),
        0x24 => i_tob(Op::Lbu, code),
        0x25 => i_tob(Op::Lhu, code),
        0x26 => i_tob(Op::Lwr, code),
        0x27 => i_tob(Op::Lwu, code),
        0x28 => i_tob(Op::Sb, code),
        0x29 => i_tob(Op::Sh, code),
        0x2A => i_tob(Op::Swl, code),
        0x2B => i_tob(Op::Sw, code),
        0x2C => i_tob(Op::Sdl, code),
        0x2D => i_tob(Op::Sdr, code),
        0x2E => i_tob(Op::Swr, code),
        0x2F => i_oob(Op::Cache, code),
        0x30 => i_tob(Op::Ll, code),
        0x31 => i_t1ob(Op::Lwc1, code),
        0x34 => i_tob(Op::Lld, code),
        0x35 => i_t1ob(Op::Ldc1, code),
        0x37 => i_tob(Op::Ld, code),
        0x38 => i_tob(Op::Sc, code),
        0x39 => i_t1ob(Op::Swc1, code),
        0x3C => i_tob(Op::Scd, code),
        0x3D => i_t1ob(Op::Sdc1, code),
        0x3F => i_tob(Op::Sd, code),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(code: u32) -> Insn {
        decode(code).unwrap_or_else(|| panic!("{code:#010x} did not decode"))
    }

    #[test]
    fn special_shifts_and_alu() {
        // sll $t0, $t1, 4
        let i = dec((9 << 16) | (8 << 11) | (4 << 6));
        assert_eq!(i.op, Op::Sll);
        assert_eq!(i.opnd, [Opnd::Cpu(8), Opnd::Cpu(9), Opnd::Imm(4)]);

        // addu $v0, $a0, $a1
        let i = dec((4 << 21) | (5 << 16) | (2 << 11) | 0x21);
        assert_eq!(i.op, Op::Addu);
        assert_eq!(i.opnd, [Opnd::Cpu(2), Opnd::Cpu(4), Opnd::Cpu(5)]);

        // mult $t2, $t3
        let i = dec((10 << 21) | (11 << 16) | 0x18);
        assert_eq!(i.op, Op::Mult);
        assert_eq!(i.opnd, [Opnd::Cpu(10), Opnd::Cpu(11), Opnd::Null]);

        // mfhi $s0
        let i = dec((16 << 11) | 0x10);
        assert_eq!(i.op, Op::Mfhi);
        assert_eq!(i.opnd, [Opnd::Cpu(16), Opnd::Null, Opnd::Null]);
    }

    #[test]
    fn register_jumps() {
        // jr $ra
        let i = dec(0x03E0_0008);
        assert_eq!(i.op, Op::Jr);
        assert_eq!(i.opnd, [Opnd::Cpu(31), Opnd::Null, Opnd::Null]);

        // jalr $t9 (link in $ra)
        let i = dec(0x0320_F809);
        assert_eq!(i.op, Op::Jalr);
        assert_eq!(i.opnd, [Opnd::Cpu(31), Opnd::Cpu(25), Opnd::Null]);
    }

    #[test]
    fn trap_encodings() {
        // teq $zero, $zero -- the word a software breakpoint plants.
        let i = dec(0x0000_0034);
        assert_eq!(i.op, Op::Teq);
        assert_eq!(i.opnd, [Opnd::Cpu(0), Opnd::Cpu(0), Opnd::Imm(0)]);

        // break 0x1c
        let i = dec((0x1C << 6) | 0x0D);
        assert_eq!(i.op, Op::Break);
        assert_eq!(i.opnd[0], Opnd::Imm(0x1C));
    }

    #[test]
    fn jumps_carry_low_28_bits() {
        // j 0x124 (word target 0x49)
        let i = dec((0x02 << 26) | 0x49);
        assert_eq!(i.op, Op::J);
        assert_eq!(i.opnd[0], Opnd::Jump(0x124));

        // jal with a full-width target
        let i = dec((0x03 << 26) | 0x3FF_FFFF);
        assert_eq!(i.op, Op::Jal);
        assert_eq!(i.opnd[0], Opnd::Jump(0xFFF_FFFC));
    }

    #[test]
    fn branches_prescale_displacement() {
        // beq $a0, $zero, +4 words
        let i = dec((0x04 << 26) | (4 << 21) | 4);
        assert_eq!(i.op, Op::Beq);
        assert_eq!(i.opnd, [Opnd::Cpu(4), Opnd::Cpu(0), Opnd::Branch(16)]);

        // bne with a backward displacement of -1 word
        let i = dec((0x05 << 26) | (8 << 21) | (9 << 16) | 0xFFFF);
        assert_eq!(i.op, Op::Bne);
        assert_eq!(i.opnd[2], Opnd::Branch(-4));

        // blez $s0, +8 words
        let i = dec((0x06 << 26) | (16 << 21) | 8);
        assert_eq!(i.op, Op::Blez);
        assert_eq!(i.opnd, [Opnd::Cpu(16), Opnd::Branch(32), Opnd::Null]);
    }

    #[test]
    fn regimm_branches_and_traps() {
        // bgezal $s1, -2 words
        let i = dec((0x01 << 26) | (17 << 21) | (0x11 << 16) | 0xFFFE);
        assert_eq!(i.op, Op::Bgezal);
        assert_eq!(i.opnd, [Opnd::Cpu(17), Opnd::Branch(-8), Opnd::Null]);

        // bltzl $v1, +1 word
        let i = dec((0x01 << 26) | (3 << 21) | (0x02 << 16) | 1);
        assert_eq!(i.op, Op::Bltzl);

        // teqi $a2, -1
        let i = dec((0x01 << 26) | (6 << 21) | (0x0C << 16) | 0xFFFF);
        assert_eq!(i.op, Op::Teqi);
        assert_eq!(i.opnd, [Opnd::Cpu(6), Opnd::Imm(-1), Opnd::Null]);
    }

    #[test]
    fn immediates_sign_extend_except_lui() {
        // addiu $sp, $sp, -16
        let i = dec(0x27BD_FFF0);
        assert_eq!(i.op, Op::Addiu);
        assert_eq!(i.opnd, [Opnd::Cpu(29), Opnd::Cpu(29), Opnd::Imm(-16)]);

        // lui $at, 0x8000 keeps the raw immediate
        let i = dec(0x3C01_8000);
        assert_eq!(i.op, Op::Lui);
        assert_eq!(i.opnd, [Opnd::Cpu(1), Opnd::Imm(0x8000), Opnd::Null]);
    }

    #[test]
    fn loads_and_stores() {
        // lw $t0, 4($sp)
        let i = dec(0x8FA8_0004);
        assert_eq!(i.op, Op::Lw);
        assert_eq!(i.opnd, [Opnd::Cpu(8), Opnd::Offset(4), Opnd::Cpu(29)]);

        // sd $s0, -8($gp)
        let i = dec((0x3F << 26) | (28 << 21) | (16 << 16) | 0xFFF8);
        assert_eq!(i.op, Op::Sd);
        assert_eq!(i.opnd, [Opnd::Cpu(16), Opnd::Offset(-8), Opnd::Cpu(28)]);

        // ldc1 $f4, 16($a0)
        let i = dec((0x35 << 26) | (4 << 21) | (4 << 16) | 16);
        assert_eq!(i.op, Op::Ldc1);
        assert_eq!(i.opnd, [Opnd::Cp1(4), Opnd::Offset(16), Opnd::Cpu(4)]);

        // cache 0x11, 0($t0)
        let i = dec((0x2F << 26) | (8 << 21) | (0x11 << 16));
        assert_eq!(i.op, Op::Cache);
        assert_eq!(i.opnd, [Opnd::Cache(0x11), Opnd::Offset(0), Opnd::Cpu(8)]);
    }

    #[test]
    fn cop0_moves_and_tlb() {
        // mfc0 $t0, $12 (Status)
        let i = dec((0x10 << 26) | (8 << 16) | (12 << 11));
        assert_eq!(i.op, Op::Mfc0);
        assert_eq!(i.opnd, [Opnd::Cpu(8), Opnd::Cp0(12), Opnd::Null]);

        // eret
        let i = dec((0x10 << 26) | (0x10 << 21) | 0x18);
        assert_eq!(i.op, Op::Eret);

        // tlbwi, with a different CO bit pattern in rs
        let i = dec((0x10 << 26) | (0x13 << 21) | 0x02);
        assert_eq!(i.op, Op::Tlbwi);
    }

    #[test]
    fn cop1_moves_branches_and_arithmetic() {
        // cfc1 $t1, $31
        let i = dec((0x11 << 26) | (0x02 << 21) | (9 << 16) | (31 << 11));
        assert_eq!(i.op, Op::Cfc1);
        assert_eq!(i.opnd, [Opnd::Cpu(9), Opnd::Fcr(31), Opnd::Null]);

        // bc1f +2 words
        let i = dec((0x11 << 26) | (0x08 << 21) | 2);
        assert_eq!(i.op, Op::Bc1f);
        assert_eq!(i.opnd, [Opnd::Branch(8), Opnd::Null, Opnd::Null]);

        // bc1tl -1 word
        let i = dec((0x11 << 26) | (0x08 << 21) | (0x03 << 16) | 0xFFFF);
        assert_eq!(i.op, Op::Bc1tl);
        assert_eq!(i.opnd[0], Opnd::Branch(-4));

        // add.s $f0, $f2, $f4
        let i = dec((0x11 << 26) | (0x10 << 21) | (4 << 16) | (2 << 11));
        assert_eq!(i.op, Op::AddS);
        assert_eq!(i.opnd, [Opnd::Cp1(0), Opnd::Cp1(2), Opnd::Cp1(4)]);

        // cvt.d.s $f6, $f8
        let i = dec((0x11 << 26) | (0x10 << 21) | (8 << 11) | (6 << 6) | 0x21);
        assert_eq!(i.op, Op::CvtDS);
        assert_eq!(i.opnd, [Opnd::Cp1(6), Opnd::Cp1(8), Opnd::Null]);

        // c.lt.d $f10, $f12
        let i = dec((0x11 << 26) | (0x11 << 21) | (12 << 16) | (10 << 11) | 0x3C);
        assert_eq!(i.op, Op::CLtD);
        assert_eq!(i.opnd, [Opnd::Cp1(10), Opnd::Cp1(12), Opnd::Null]);

        // cvt.s.w $f0, $f1
        let i = dec((0x11 << 26) | (0x14 << 21) | (1 << 11) | 0x20);
        assert_eq!(i.op, Op::CvtSW);
    }

    #[test]
    fn unknown_encodings_reject() {
        // COP1X and the MIPS32 SPECIAL2 space don't exist on this core.
        assert_eq!(decode(0x13 << 26), None);
        assert_eq!(decode(0x1C << 26), None);
        // SPECIAL funct 0x01 is a hole.
        assert_eq!(decode(0x0000_0001), None);
        // REGIMM rt 0x04 is a hole.
        assert_eq!(decode((0x01 << 26) | (0x04 << 16)), None);
        // COP0 CO with an unassigned funct.
        assert_eq!(decode((0x10 << 26) | (0x10 << 21) | 0x3F), None);
        // COP1 fmt 0x16 is a hole.
        assert_eq!(decode((0x11 << 26) | (0x16 << 21)), None);
    }

    /// Rebuilding the encoded fields from the decoded operands must
    /// reproduce the original word for the layouts the step planner relies
    /// on.
    #[test]
    fn field_recomposition() {
        // i_sto: beq
        let w = (0x04 << 26) | (4 << 21) | (7 << 16) | 0x0123;
        let i = dec(w);
        let (Opnd::Cpu(s), Opnd::Cpu(t), Opnd::Branch(disp)) =
            (i.opnd[0], i.opnd[1], i.opnd[2])
        else {
            panic!("wrong operand shapes");
        };
        let imm = ((disp / 4) as u32) & 0xFFFF;
        assert_eq!(
            (0x04 << 26) | (u32::from(s) << 21) | (u32::from(t) << 16) | imm,
            w
        );

        // j: target field
        let w = (0x02 << 26) | 0x123_4567;
        let i = dec(w);
        let Opnd::Jump(target) = i.opnd[0] else {
            panic!("wrong operand shape");
        };
        assert_eq!((0x02 << 26) | (target >> 2), w);

        // r_dst: and
        let w = (12 << 21) | (13 << 16) | (14 << 11) | 0x24;
        let i = dec(w);
        let (Opnd::Cpu(d), Opnd::Cpu(s), Opnd::Cpu(t)) =
            (i.opnd[0], i.opnd[1], i.opnd[2])
        else {
            panic!("wrong operand shapes");
        };
        assert_eq!(
            (u32::from(s) << 21) | (u32::from(t) << 16) | (u32::from(d) << 11) | 0x24,
            w
        );
    }
}
