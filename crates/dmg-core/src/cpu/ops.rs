//! Micro-operation tables and executor.
//!
//! Every instruction is a fixed sequence of micro-operations, one per
//! M-cycle, laid out in `OPCODES[opcode][step]` (primary), `CB_OPCODES`
//! (0xCB-prefixed) and `ISR` (interrupt service). A micro-op posts at most
//! one memory request on the CPU lane; the result is latched by the MMU and
//! read back at the start of the next M-cycle. The last micro-op of every
//! instruction posts the next opcode fetch, overlapping it with execution.

use crate::bus::Bus;
use crate::Error;

use super::cpu::{Cpu, Flag, ImeState, R16, R8};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Cond {
    Nz,
    Z,
    Nc,
    C,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Alu {
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Xor,
    Or,
    Cp,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Rot {
    Rlc,
    Rrc,
    Rl,
    Rr,
    Sla,
    Sra,
    Swap,
    Srl,
}

/// One M-cycle worth of work. Variant names carry the instruction family
/// and the step; payloads select registers, conditions or bit numbers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MicroOp {
    /// Table filler past the end of an instruction; never executed.
    Pad,
    /// Undefined opcode: fatal for the session.
    Invalid,
    /// Plain finisher: post the next opcode fetch.
    Fetch,
    /// Internal delay cycle.
    Internal,

    Nop,
    Stop,
    Halt,
    Di,
    Ei,
    PrefixCb,

    /// Post a read of the byte at PC and advance PC.
    ReadImm,
    /// Latch the immediate low byte, post the read of the high byte.
    ImmLsb,
    /// Post a read of the byte addressed by a register pair.
    ReadInd(R16),
    /// Post a read at SP and increment it.
    ReadSpInc,
    /// Internal SP decrement (first cycle of PUSH/RST).
    DecSp,

    LdRrNn1(R16),
    LdRrNn2(R16),
    LdIndR(R16, R8),
    LdHliA,
    LdHldA,
    LdAHli,
    LdAHld,
    /// Store the latched byte into a register and fetch.
    LdRData(R8),
    LdHlN1,
    LdNnA2,
    LdANn2,
    LdNnSp2,
    LdNnSp3,
    LdhNA1,
    LdhAN1,
    LdhCA,
    LdhAC,
    LdRR(R8, R8),
    LdSpHl,
    LdHlSpS1,

    AddSpS1,
    AddSpS2,
    IncR(R8),
    DecR(R8),
    IncRr(R16),
    DecRr(R16),
    IncHl1,
    DecHl1,
    AluR(Alu, R8),
    /// ALU against the latched byte ((HL) or immediate).
    AluData(Alu),
    AddHlRr(R16),
    Daa,
    Cpl,
    Scf,
    Ccf,
    Rlca,
    Rla,
    Rrca,
    Rra,

    JrS1,
    JrCc1(Cond),
    JpNn2,
    JpCc2(Cond),
    JpHl,
    CallNn2,
    CallCc2(Cond),
    CallNn4,
    PushHi(R16),
    PushLo(R16),
    RstJump(u8),
    RetLsb,
    RetMsb,
    RetiFetch,
    RetCc1(Cond),
    PopLo(R16),
    PopHi(R16),

    RotR(Rot, R8),
    RotHl1(Rot),
    BitR(u8, R8),
    BitHl1(u8),
    ResR(u8, R8),
    SetR(u8, R8),
    ResHl1(u8),
    SetHl1(u8),

    Isr0,
    Isr1,
    Isr2,
    Isr3,
    Isr4,
}

pub const INSTR_STEPS: usize = 6;
pub const CB_STEPS: usize = 4;

use MicroOp::*;
use R16::*;
use R8::*;

const fn op1(a: MicroOp) -> [MicroOp; INSTR_STEPS] {
    [a, Pad, Pad, Pad, Pad, Pad]
}

const fn op2(a: MicroOp, b: MicroOp) -> [MicroOp; INSTR_STEPS] {
    [a, b, Pad, Pad, Pad, Pad]
}

const fn op3(a: MicroOp, b: MicroOp, c: MicroOp) -> [MicroOp; INSTR_STEPS] {
    [a, b, c, Pad, Pad, Pad]
}

const fn op4(a: MicroOp, b: MicroOp, c: MicroOp, d: MicroOp) -> [MicroOp; INSTR_STEPS] {
    [a, b, c, d, Pad, Pad]
}

const fn op5(a: MicroOp, b: MicroOp, c: MicroOp, d: MicroOp, e: MicroOp) -> [MicroOp; INSTR_STEPS] {
    [a, b, c, d, e, Pad]
}

const fn op6(
    a: MicroOp,
    b: MicroOp,
    c: MicroOp,
    d: MicroOp,
    e: MicroOp,
    f: MicroOp,
) -> [MicroOp; INSTR_STEPS] {
    [a, b, c, d, e, f]
}

#[rustfmt::skip]
pub const OPCODES: [[MicroOp; INSTR_STEPS]; 256] = [
    /* 00 */ op1(Nop),
    /* 01 */ op3(ReadImm, LdRrNn1(Bc), LdRrNn2(Bc)),
    /* 02 */ op2(LdIndR(Bc, A), Fetch),
    /* 03 */ op2(IncRr(Bc), Fetch),
    /* 04 */ op1(IncR(B)),
    /* 05 */ op1(DecR(B)),
    /* 06 */ op2(ReadImm, LdRData(B)),
    /* 07 */ op1(Rlca),
    /* 08 */ op5(ReadImm, ImmLsb, LdNnSp2, LdNnSp3, Fetch),
    /* 09 */ op2(AddHlRr(Bc), Fetch),
    /* 0A */ op2(ReadInd(Bc), LdRData(A)),
    /* 0B */ op2(DecRr(Bc), Fetch),
    /* 0C */ op1(IncR(C)),
    /* 0D */ op1(DecR(C)),
    /* 0E */ op2(ReadImm, LdRData(C)),
    /* 0F */ op1(Rrca),
    /* 10 */ op1(Stop),
    /* 11 */ op3(ReadImm, LdRrNn1(De), LdRrNn2(De)),
    /* 12 */ op2(LdIndR(De, A), Fetch),
    /* 13 */ op2(IncRr(De), Fetch),
    /* 14 */ op1(IncR(D)),
    /* 15 */ op1(DecR(D)),
    /* 16 */ op2(ReadImm, LdRData(D)),
    /* 17 */ op1(Rla),
    /* 18 */ op3(ReadImm, JrS1, Fetch),
    /* 19 */ op2(AddHlRr(De), Fetch),
    /* 1A */ op2(ReadInd(De), LdRData(A)),
    /* 1B */ op2(DecRr(De), Fetch),
    /* 1C */ op1(IncR(E)),
    /* 1D */ op1(DecR(E)),
    /* 1E */ op2(ReadImm, LdRData(E)),
    /* 1F */ op1(Rra),
    /* 20 */ op3(ReadImm, JrCc1(Cond::Nz), Fetch),
    /* 21 */ op3(ReadImm, LdRrNn1(Hl), LdRrNn2(Hl)),
    /* 22 */ op2(LdHliA, Fetch),
    /* 23 */ op2(IncRr(Hl), Fetch),
    /* 24 */ op1(IncR(H)),
    /* 25 */ op1(DecR(H)),
    /* 26 */ op2(ReadImm, LdRData(H)),
    /* 27 */ op1(Daa),
    /* 28 */ op3(ReadImm, JrCc1(Cond::Z), Fetch),
    /* 29 */ op2(AddHlRr(Hl), Fetch),
    /* 2A */ op2(LdAHli, LdRData(A)),
    /* 2B */ op2(DecRr(Hl), Fetch),
    /* 2C */ op1(IncR(L)),
    /* 2D */ op1(DecR(L)),
    /* 2E */ op2(ReadImm, LdRData(L)),
    /* 2F */ op1(Cpl),
    /* 30 */ op3(ReadImm, JrCc1(Cond::Nc), Fetch),
    /* 31 */ op3(ReadImm, LdRrNn1(Sp), LdRrNn2(Sp)),
    /* 32 */ op2(LdHldA, Fetch),
    /* 33 */ op2(IncRr(Sp), Fetch),
    /* 34 */ op3(ReadInd(Hl), IncHl1, Fetch),
    /* 35 */ op3(ReadInd(Hl), DecHl1, Fetch),
    /* 36 */ op3(ReadImm, LdHlN1, Fetch),
    /* 37 */ op1(Scf),
    /* 38 */ op3(ReadImm, JrCc1(Cond::C), Fetch),
    /* 39 */ op2(AddHlRr(Sp), Fetch),
    /* 3A */ op2(LdAHld, LdRData(A)),
    /* 3B */ op2(DecRr(Sp), Fetch),
    /* 3C */ op1(IncR(A)),
    /* 3D */ op1(DecR(A)),
    /* 3E */ op2(ReadImm, LdRData(A)),
    /* 3F */ op1(Ccf),
    /* 40 */ op1(LdRR(B, B)),
    /* 41 */ op1(LdRR(B, C)),
    /* 42 */ op1(LdRR(B, D)),
    /* 43 */ op1(LdRR(B, E)),
    /* 44 */ op1(LdRR(B, H)),
    /* 45 */ op1(LdRR(B, L)),
    /* 46 */ op2(ReadInd(Hl), LdRData(B)),
    /* 47 */ op1(LdRR(B, A)),
    /* 48 */ op1(LdRR(C, B)),
    /* 49 */ op1(LdRR(C, C)),
    /* 4A */ op1(LdRR(C, D)),
    /* 4B */ op1(LdRR(C, E)),
    /* 4C */ op1(LdRR(C, H)),
    /* 4D */ op1(LdRR(C, L)),
    /* 4E */ op2(ReadInd(Hl), LdRData(C)),
    /* 4F */ op1(LdRR(C, A)),
    /* 50 */ op1(LdRR(D, B)),
    /* 51 */ op1(LdRR(D, C)),
    /* 52 */ op1(LdRR(D, D)),
    /* 53 */ op1(LdRR(D, E)),
    /* 54 */ op1(LdRR(D, H)),
    /* 55 */ op1(LdRR(D, L)),
    /* 56 */ op2(ReadInd(Hl), LdRData(D)),
    /* 57 */ op1(LdRR(D, A)),
    /* 58 */ op1(LdRR(E, B)),
    /* 59 */ op1(LdRR(E, C)),
    /* 5A */ op1(LdRR(E, D)),
    /* 5B */ op1(LdRR(E, E)),
    /* 5C */ op1(LdRR(E, H)),
    /* 5D */ op1(LdRR(E, L)),
    /* 5E */ op2(ReadInd(Hl), LdRData(E)),
    /* 5F */ op1(LdRR(E, A)),
    /* 60 */ op1(LdRR(H, B)),
    /* 61 */ op1(LdRR(H, C)),
    /* 62 */ op1(LdRR(H, D)),
    /* 63 */ op1(LdRR(H, E)),
    /* 64 */ op1(LdRR(H, H)),
    /* 65 */ op1(LdRR(H, L)),
    /* 66 */ op2(ReadInd(Hl), LdRData(H)),
    /* 67 */ op1(LdRR(H, A)),
    /* 68 */ op1(LdRR(L, B)),
    /* 69 */ op1(LdRR(L, C)),
    /* 6A */ op1(LdRR(L, D)),
    /* 6B */ op1(LdRR(L, E)),
    /* 6C */ op1(LdRR(L, H)),
    /* 6D */ op1(LdRR(L, L)),
    /* 6E */ op2(ReadInd(Hl), LdRData(L)),
    /* 6F */ op1(LdRR(L, A)),
    /* 70 */ op2(LdIndR(Hl, B), Fetch),
    /* 71 */ op2(LdIndR(Hl, C), Fetch),
    /* 72 */ op2(LdIndR(Hl, D), Fetch),
    /* 73 */ op2(LdIndR(Hl, E), Fetch),
    /* 74 */ op2(LdIndR(Hl, H), Fetch),
    /* 75 */ op2(LdIndR(Hl, L), Fetch),
    /* 76 */ op1(Halt),
    /* 77 */ op2(LdIndR(Hl, A), Fetch),
    /* 78 */ op1(LdRR(A, B)),
    /* 79 */ op1(LdRR(A, C)),
    /* 7A */ op1(LdRR(A, D)),
    /* 7B */ op1(LdRR(A, E)),
    /* 7C */ op1(LdRR(A, H)),
    /* 7D */ op1(LdRR(A, L)),
    /* 7E */ op2(ReadInd(Hl), LdRData(A)),
    /* 7F */ op1(LdRR(A, A)),
    /* 80 */ op1(AluR(Alu::Add, B)),
    /* 81 */ op1(AluR(Alu::Add, C)),
    /* 82 */ op1(AluR(Alu::Add, D)),
    /* 83 */ op1(AluR(Alu::Add, E)),
    /* 84 */ op1(AluR(Alu::Add, H)),
    /* 85 */ op1(AluR(Alu::Add, L)),
    /* 86 */ op2(ReadInd(Hl), AluData(Alu::Add)),
    /* 87 */ op1(AluR(Alu::Add, A)),
    /* 88 */ op1(AluR(Alu::Adc, B)),
    /* 89 */ op1(AluR(Alu::Adc, C)),
    /* 8A */ op1(AluR(Alu::Adc, D)),
    /* 8B */ op1(AluR(Alu::Adc, E)),
    /* 8C */ op1(AluR(Alu::Adc, H)),
    /* 8D */ op1(AluR(Alu::Adc, L)),
    /* 8E */ op2(ReadInd(Hl), AluData(Alu::Adc)),
    /* 8F */ op1(AluR(Alu::Adc, A)),
    /* 90 */ op1(AluR(Alu::Sub, B)),
    /* 91 */ op1(AluR(Alu::Sub, C)),
    /* 92 */ op1(AluR(Alu::Sub, D)),
    /* 93 */ op1(AluR(Alu::Sub, E)),
    /* 94 */ op1(AluR(Alu::Sub, H)),
    /* 95 */ op1(AluR(Alu::Sub, L)),
    /* 96 */ op2(ReadInd(Hl), AluData(Alu::Sub)),
    /* 97 */ op1(AluR(Alu::Sub, A)),
    /* 98 */ op1(AluR(Alu::Sbc, B)),
    /* 99 */ op1(AluR(Alu::Sbc, C)),
    /* 9A */ op1(AluR(Alu::Sbc, D)),
    /* 9B */ op1(AluR(Alu::Sbc, E)),
    /* 9C */ op1(AluR(Alu::Sbc, H)),
    /* 9D */ op1(AluR(Alu::Sbc, L)),
    /* 9E */ op2(ReadInd(Hl), AluData(Alu::Sbc)),
    /* 9F */ op1(AluR(Alu::Sbc, A)),
    /* A0 */ op1(AluR(Alu::And, B)),
    /* A1 */ op1(AluR(Alu::And, C)),
    /* A2 */ op1(AluR(Alu::And, D)),
    /* A3 */ op1(AluR(Alu::And, E)),
    /* A4 */ op1(AluR(Alu::And, H)),
    /* A5 */ op1(AluR(Alu::And, L)),
    /* A6 */ op2(ReadInd(Hl), AluData(Alu::And)),
    /* A7 */ op1(AluR(Alu::And, A)),
    /* A8 */ op1(AluR(Alu::Xor, B)),
    /* A9 */ op1(AluR(Alu::Xor, C)),
    /* AA */ op1(AluR(Alu::Xor, D)),
    /* AB */ op1(AluR(Alu::Xor, E)),
    /* AC */ op1(AluR(Alu::Xor, H)),
    /* AD */ op1(AluR(Alu::Xor, L)),
    /* AE */ op2(ReadInd(Hl), AluData(Alu::Xor)),
    /* AF */ op1(AluR(Alu::Xor, A)),
    /* B0 */ op1(AluR(Alu::Or, B)),
    /* B1 */ op1(AluR(Alu::Or, C)),
    /* B2 */ op1(AluR(Alu::Or, D)),
    /* B3 */ op1(AluR(Alu::Or, E)),
    /* B4 */ op1(AluR(Alu::Or, H)),
    /* B5 */ op1(AluR(Alu::Or, L)),
    /* B6 */ op2(ReadInd(Hl), AluData(Alu::Or)),
    /* B7 */ op1(AluR(Alu::Or, A)),
    /* B8 */ op1(AluR(Alu::Cp, B)),
    /* B9 */ op1(AluR(Alu::Cp, C)),
    /* BA */ op1(AluR(Alu::Cp, D)),
    /* BB */ op1(AluR(Alu::Cp, E)),
    /* BC */ op1(AluR(Alu::Cp, H)),
    /* BD */ op1(AluR(Alu::Cp, L)),
    /* BE */ op2(ReadInd(Hl), AluData(Alu::Cp)),
    /* BF */ op1(AluR(Alu::Cp, A)),
    /* C0 */ op5(Internal, RetCc1(Cond::Nz), RetLsb, RetMsb, Fetch),
    /* C1 */ op3(ReadSpInc, PopLo(Bc), PopHi(Bc)),
    /* C2 */ op4(ReadImm, ImmLsb, JpCc2(Cond::Nz), Fetch),
    /* C3 */ op4(ReadImm, ImmLsb, JpNn2, Fetch),
    /* C4 */ op6(ReadImm, ImmLsb, CallCc2(Cond::Nz), PushHi(Pc), CallNn4, Fetch),
    /* C5 */ op4(DecSp, PushHi(Bc), PushLo(Bc), Fetch),
    /* C6 */ op2(ReadImm, AluData(Alu::Add)),
    /* C7 */ op4(DecSp, PushHi(Pc), RstJump(0x00), Fetch),
    /* C8 */ op5(Internal, RetCc1(Cond::Z), RetLsb, RetMsb, Fetch),
    /* C9 */ op4(ReadSpInc, RetLsb, RetMsb, Fetch),
    /* CA */ op4(ReadImm, ImmLsb, JpCc2(Cond::Z), Fetch),
    /* CB */ op1(PrefixCb),
    /* CC */ op6(ReadImm, ImmLsb, CallCc2(Cond::Z), PushHi(Pc), CallNn4, Fetch),
    /* CD */ op6(ReadImm, ImmLsb, CallNn2, PushHi(Pc), CallNn4, Fetch),
    /* CE */ op2(ReadImm, AluData(Alu::Adc)),
    /* CF */ op4(DecSp, PushHi(Pc), RstJump(0x08), Fetch),
    /* D0 */ op5(Internal, RetCc1(Cond::Nc), RetLsb, RetMsb, Fetch),
    /* D1 */ op3(ReadSpInc, PopLo(De), PopHi(De)),
    /* D2 */ op4(ReadImm, ImmLsb, JpCc2(Cond::Nc), Fetch),
    /* D3 */ op1(Invalid),
    /* D4 */ op6(ReadImm, ImmLsb, CallCc2(Cond::Nc), PushHi(Pc), CallNn4, Fetch),
    /* D5 */ op4(DecSp, PushHi(De), PushLo(De), Fetch),
    /* D6 */ op2(ReadImm, AluData(Alu::Sub)),
    /* D7 */ op4(DecSp, PushHi(Pc), RstJump(0x10), Fetch),
    /* D8 */ op5(Internal, RetCc1(Cond::C), RetLsb, RetMsb, Fetch),
    /* D9 */ op4(ReadSpInc, RetLsb, RetMsb, RetiFetch),
    /* DA */ op4(ReadImm, ImmLsb, JpCc2(Cond::C), Fetch),
    /* DB */ op1(Invalid),
    /* DC */ op6(ReadImm, ImmLsb, CallCc2(Cond::C), PushHi(Pc), CallNn4, Fetch),
    /* DD */ op1(Invalid),
    /* DE */ op2(ReadImm, AluData(Alu::Sbc)),
    /* DF */ op4(DecSp, PushHi(Pc), RstJump(0x18), Fetch),
    /* E0 */ op3(ReadImm, LdhNA1, Fetch),
    /* E1 */ op3(ReadSpInc, PopLo(Hl), PopHi(Hl)),
    /* E2 */ op2(LdhCA, Fetch),
    /* E3 */ op1(Invalid),
    /* E4 */ op1(Invalid),
    /* E5 */ op4(DecSp, PushHi(Hl), PushLo(Hl), Fetch),
    /* E6 */ op2(ReadImm, AluData(Alu::And)),
    /* E7 */ op4(DecSp, PushHi(Pc), RstJump(0x20), Fetch),
    /* E8 */ op4(ReadImm, AddSpS1, AddSpS2, Fetch),
    /* E9 */ op1(JpHl),
    /* EA */ op4(ReadImm, ImmLsb, LdNnA2, Fetch),
    /* EB */ op1(Invalid),
    /* EC */ op1(Invalid),
    /* ED */ op1(Invalid),
    /* EE */ op2(ReadImm, AluData(Alu::Xor)),
    /* EF */ op4(DecSp, PushHi(Pc), RstJump(0x28), Fetch),
    /* F0 */ op3(ReadImm, LdhAN1, LdRData(A)),
    /* F1 */ op3(ReadSpInc, PopLo(Af), PopHi(Af)),
    /* F2 */ op2(LdhAC, LdRData(A)),
    /* F3 */ op1(Di),
    /* F4 */ op1(Invalid),
    /* F5 */ op4(DecSp, PushHi(Af), PushLo(Af), Fetch),
    /* F6 */ op2(ReadImm, AluData(Alu::Or)),
    /* F7 */ op4(DecSp, PushHi(Pc), RstJump(0x30), Fetch),
    /* F8 */ op3(ReadImm, LdHlSpS1, Fetch),
    /* F9 */ op2(LdSpHl, Fetch),
    /* FA */ op4(ReadImm, ImmLsb, LdANn2, LdRData(A)),
    /* FB */ op1(Ei),
    /* FC */ op1(Invalid),
    /* FD */ op1(Invalid),
    /* FE */ op2(ReadImm, AluData(Alu::Cp)),
    /* FF */ op4(DecSp, PushHi(Pc), RstJump(0x38), Fetch),
];

const fn cb1(a: MicroOp) -> [MicroOp; CB_STEPS] {
    [a, Pad, Pad, Pad]
}

const fn cb2(a: MicroOp, b: MicroOp) -> [MicroOp; CB_STEPS] {
    [a, b, Pad, Pad]
}

const fn cb3(a: MicroOp, b: MicroOp, c: MicroOp) -> [MicroOp; CB_STEPS] {
    [a, b, c, Pad]
}

const fn cb_r8(opcode: u8) -> Option<R8> {
    match opcode & 0x07 {
        0 => Some(B),
        1 => Some(C),
        2 => Some(D),
        3 => Some(E),
        4 => Some(H),
        5 => Some(L),
        6 => None, // (HL)
        _ => Some(A),
    }
}

const fn cb_rot(opcode: u8) -> Rot {
    match (opcode >> 3) & 0x07 {
        0 => Rot::Rlc,
        1 => Rot::Rrc,
        2 => Rot::Rl,
        3 => Rot::Rr,
        4 => Rot::Sla,
        5 => Rot::Sra,
        6 => Rot::Swap,
        _ => Rot::Srl,
    }
}

const fn cb_row(opcode: u8) -> [MicroOp; CB_STEPS] {
    let bit = (opcode >> 3) & 0x07;
    match opcode >> 6 {
        0 => match cb_r8(opcode) {
            Some(r) => cb1(RotR(cb_rot(opcode), r)),
            None => cb3(ReadInd(Hl), RotHl1(cb_rot(opcode)), Fetch),
        },
        1 => match cb_r8(opcode) {
            Some(r) => cb1(BitR(bit, r)),
            None => cb2(ReadInd(Hl), BitHl1(bit)),
        },
        2 => match cb_r8(opcode) {
            Some(r) => cb1(ResR(bit, r)),
            None => cb3(ReadInd(Hl), ResHl1(bit), Fetch),
        },
        _ => match cb_r8(opcode) {
            Some(r) => cb1(SetR(bit, r)),
            None => cb3(ReadInd(Hl), SetHl1(bit), Fetch),
        },
    }
}

pub const CB_OPCODES: [[MicroOp; CB_STEPS]; 256] = {
    let mut table = [[Pad; CB_STEPS]; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = cb_row(i as u8);
        i += 1;
    }
    table
};

pub const ISR: [MicroOp; 5] = [Isr0, Isr1, Isr2, Isr3, Isr4];

fn cond(cpu: &Cpu, c: Cond) -> bool {
    match c {
        Cond::Nz => !cpu.flag(Flag::Z),
        Cond::Z => cpu.flag(Flag::Z),
        Cond::Nc => !cpu.flag(Flag::C),
        Cond::C => cpu.flag(Flag::C),
    }
}

fn alu_add(cpu: &mut Cpu, a: u8, b: u8, carry_in: u8) -> u8 {
    let sum = a as u16 + b as u16 + carry_in as u16;
    let res = sum as u8;
    cpu.set_flag(Flag::Z, res == 0);
    cpu.set_flag(Flag::N, false);
    cpu.set_flag(Flag::H, ((a & 0x0F) + (b & 0x0F) + carry_in) > 0x0F);
    cpu.set_flag(Flag::C, sum > 0xFF);
    res
}

fn alu_sub(cpu: &mut Cpu, a: u8, b: u8, carry_in: u8) -> u8 {
    let res = a.wrapping_sub(b).wrapping_sub(carry_in);
    cpu.set_flag(Flag::Z, res == 0);
    cpu.set_flag(Flag::N, true);
    cpu.set_flag(Flag::H, (a & 0x0F) < ((b & 0x0F) + carry_in));
    cpu.set_flag(Flag::C, (a as u16) < (b as u16 + carry_in as u16));
    res
}

fn alu_apply(cpu: &mut Cpu, op: Alu, value: u8) {
    let a = cpu.r8(R8::A);
    let carry = cpu.flag(Flag::C) as u8;
    match op {
        Alu::Add => {
            let res = alu_add(cpu, a, value, 0);
            cpu.set_r8(R8::A, res);
        }
        Alu::Adc => {
            let res = alu_add(cpu, a, value, carry);
            cpu.set_r8(R8::A, res);
        }
        Alu::Sub => {
            let res = alu_sub(cpu, a, value, 0);
            cpu.set_r8(R8::A, res);
        }
        Alu::Sbc => {
            let res = alu_sub(cpu, a, value, carry);
            cpu.set_r8(R8::A, res);
        }
        Alu::And => {
            let res = a & value;
            cpu.set_r8(R8::A, res);
            cpu.set_flag(Flag::Z, res == 0);
            cpu.set_flag(Flag::N, false);
            cpu.set_flag(Flag::H, true);
            cpu.set_flag(Flag::C, false);
        }
        Alu::Xor => {
            let res = a ^ value;
            cpu.set_r8(R8::A, res);
            cpu.set_flag(Flag::Z, res == 0);
            cpu.set_flag(Flag::N, false);
            cpu.set_flag(Flag::H, false);
            cpu.set_flag(Flag::C, false);
        }
        Alu::Or => {
            let res = a | value;
            cpu.set_r8(R8::A, res);
            cpu.set_flag(Flag::Z, res == 0);
            cpu.set_flag(Flag::N, false);
            cpu.set_flag(Flag::H, false);
            cpu.set_flag(Flag::C, false);
        }
        Alu::Cp => {
            let _ = alu_sub(cpu, a, value, 0);
        }
    }
}

fn rotate(cpu: &Cpu, op: Rot, v: u8) -> (u8, bool) {
    let carry_in = cpu.flag(Flag::C) as u8;
    match op {
        Rot::Rlc => (v.rotate_left(1), v & 0x80 != 0),
        Rot::Rrc => (v.rotate_right(1), v & 0x01 != 0),
        Rot::Rl => ((v << 1) | carry_in, v & 0x80 != 0),
        Rot::Rr => ((v >> 1) | (carry_in << 7), v & 0x01 != 0),
        Rot::Sla => (v << 1, v & 0x80 != 0),
        Rot::Sra => ((v >> 1) | (v & 0x80), v & 0x01 != 0),
        Rot::Swap => (v.rotate_right(4), false),
        Rot::Srl => (v >> 1, v & 0x01 != 0),
    }
}

/// SP + signed immediate; used by both ADD SP,s and LD HL,SP+s.
fn add_sp_signed(cpu: &mut Cpu, sp: u16, s: i8) -> u16 {
    let e = s as i16 as u16;
    cpu.set_flag(Flag::Z, false);
    cpu.set_flag(Flag::N, false);
    cpu.set_flag(Flag::H, ((sp & 0x0F) + (e & 0x0F)) > 0x0F);
    cpu.set_flag(Flag::C, ((sp & 0xFF) + (e & 0xFF)) > 0xFF);
    sp.wrapping_add(e)
}

fn daa(cpu: &mut Cpu) {
    let mut a = cpu.r8(R8::A);
    let mut adjust = 0u8;
    let mut c = cpu.flag(Flag::C);

    if !cpu.flag(Flag::N) {
        if cpu.flag(Flag::H) || (a & 0x0F) > 0x09 {
            adjust |= 0x06;
        }
        if c || a > 0x99 {
            adjust |= 0x60;
            c = true;
        }
        a = a.wrapping_add(adjust);
    } else {
        if cpu.flag(Flag::H) {
            adjust |= 0x06;
        }
        if c {
            adjust |= 0x60;
        }
        a = a.wrapping_sub(adjust);
    }

    cpu.set_r8(R8::A, a);
    cpu.set_flag(Flag::Z, a == 0);
    cpu.set_flag(Flag::H, false);
    cpu.set_flag(Flag::C, c);
}

/// Execute one micro-operation.
pub(super) fn exec(cpu: &mut Cpu, bus: &mut Bus, op: MicroOp) -> Result<(), Error> {
    match op {
        Pad => debug_assert!(
            false,
            "micro-op pointer ran past opcode {:#04x} step {}",
            cpu.opcode, cpu.step
        ),
        Invalid => {
            return Err(Error::InvalidInstruction {
                pc: cpu.pc.wrapping_sub(1),
                opcode: cpu.opcode,
            })
        }
        Fetch => cpu.fetch(bus),
        Internal => {}

        Nop => cpu.fetch(bus),
        // STOP behaves as NOP here; see the notes in DESIGN.md.
        Stop => cpu.fetch(bus),
        Halt => {
            if bus.interrupts.pending_mask() != 0 && cpu.ime != ImeState::Enabled {
                // HALT bug: the CPU does not halt and the following opcode
                // byte is fetched twice.
                cpu.halt_bug = true;
            } else {
                cpu.halted = true;
            }
            cpu.fetch(bus);
        }
        Di => {
            cpu.ime = ImeState::Disabled;
            cpu.fetch(bus);
        }
        Ei => {
            if cpu.ime == ImeState::Disabled {
                cpu.ime = ImeState::Pending;
            }
            cpu.fetch(bus);
        }
        PrefixCb => cpu.fetch_prefixed(bus),

        ReadImm => {
            bus.mmu.cpu_read_request(cpu.pc);
            cpu.pc = cpu.pc.wrapping_add(1);
        }
        ImmLsb => {
            cpu.lsb = bus.mmu.cpu_data();
            bus.mmu.cpu_read_request(cpu.pc);
            cpu.pc = cpu.pc.wrapping_add(1);
        }
        ReadInd(rr) => bus.mmu.cpu_read_request(cpu.r16(rr)),
        ReadSpInc => {
            bus.mmu.cpu_read_request(cpu.sp);
            cpu.sp = cpu.sp.wrapping_add(1);
        }
        DecSp => cpu.sp = cpu.sp.wrapping_sub(1),

        LdRrNn1(rr) => {
            let v = bus.mmu.cpu_data();
            cpu.set_lo(rr, v);
            bus.mmu.cpu_read_request(cpu.pc);
            cpu.pc = cpu.pc.wrapping_add(1);
        }
        LdRrNn2(rr) => {
            let v = bus.mmu.cpu_data();
            cpu.set_hi(rr, v);
            cpu.fetch(bus);
        }
        LdIndR(rr, r) => bus.mmu.cpu_write_request(cpu.r16(rr), cpu.r8(r)),
        LdHliA => {
            bus.mmu.cpu_write_request(cpu.hl, cpu.r8(A));
            cpu.hl = cpu.hl.wrapping_add(1);
        }
        LdHldA => {
            bus.mmu.cpu_write_request(cpu.hl, cpu.r8(A));
            cpu.hl = cpu.hl.wrapping_sub(1);
        }
        LdAHli => {
            bus.mmu.cpu_read_request(cpu.hl);
            cpu.hl = cpu.hl.wrapping_add(1);
        }
        LdAHld => {
            bus.mmu.cpu_read_request(cpu.hl);
            cpu.hl = cpu.hl.wrapping_sub(1);
        }
        LdRData(r) => {
            let v = bus.mmu.cpu_data();
            cpu.set_r8(r, v);
            cpu.fetch(bus);
        }
        LdHlN1 => {
            cpu.u = bus.mmu.cpu_data();
            bus.mmu.cpu_write_request(cpu.hl, cpu.u);
        }
        LdNnA2 => {
            cpu.msb = bus.mmu.cpu_data();
            cpu.uu = u16::from_le_bytes([cpu.lsb, cpu.msb]);
            bus.mmu.cpu_write_request(cpu.uu, cpu.r8(A));
        }
        LdANn2 => {
            cpu.msb = bus.mmu.cpu_data();
            cpu.uu = u16::from_le_bytes([cpu.lsb, cpu.msb]);
            bus.mmu.cpu_read_request(cpu.uu);
        }
        LdNnSp2 => {
            cpu.msb = bus.mmu.cpu_data();
            cpu.uu = u16::from_le_bytes([cpu.lsb, cpu.msb]);
            bus.mmu.cpu_write_request(cpu.uu, cpu.sp as u8);
        }
        LdNnSp3 => bus.mmu.cpu_write_request(cpu.uu.wrapping_add(1), (cpu.sp >> 8) as u8),
        LdhNA1 => {
            cpu.u = bus.mmu.cpu_data();
            bus.mmu.cpu_write_request(0xFF00 | cpu.u as u16, cpu.r8(A));
        }
        LdhAN1 => {
            cpu.u = bus.mmu.cpu_data();
            bus.mmu.cpu_read_request(0xFF00 | cpu.u as u16);
        }
        LdhCA => bus.mmu.cpu_write_request(0xFF00 | cpu.r8(C) as u16, cpu.r8(A)),
        LdhAC => bus.mmu.cpu_read_request(0xFF00 | cpu.r8(C) as u16),
        LdRR(dst, src) => {
            let v = cpu.r8(src);
            cpu.set_r8(dst, v);
            cpu.fetch(bus);
        }
        LdSpHl => cpu.sp = cpu.hl,
        LdHlSpS1 => {
            let s = bus.mmu.cpu_data() as i8;
            cpu.hl = add_sp_signed(cpu, cpu.sp, s);
        }

        AddSpS1 => cpu.u = bus.mmu.cpu_data(),
        AddSpS2 => cpu.sp = add_sp_signed(cpu, cpu.sp, cpu.u as i8),
        IncR(r) => {
            let v = cpu.r8(r);
            let res = v.wrapping_add(1);
            cpu.set_r8(r, res);
            cpu.set_flag(Flag::Z, res == 0);
            cpu.set_flag(Flag::N, false);
            cpu.set_flag(Flag::H, (v & 0x0F) == 0x0F);
            cpu.fetch(bus);
        }
        DecR(r) => {
            let v = cpu.r8(r);
            let res = v.wrapping_sub(1);
            cpu.set_r8(r, res);
            cpu.set_flag(Flag::Z, res == 0);
            cpu.set_flag(Flag::N, true);
            cpu.set_flag(Flag::H, (v & 0x0F) == 0x00);
            cpu.fetch(bus);
        }
        IncRr(rr) => {
            let v = cpu.r16(rr);
            cpu.set_r16(rr, v.wrapping_add(1));
        }
        DecRr(rr) => {
            let v = cpu.r16(rr);
            cpu.set_r16(rr, v.wrapping_sub(1));
        }
        IncHl1 => {
            let v = bus.mmu.cpu_data();
            cpu.u = v.wrapping_add(1);
            cpu.set_flag(Flag::Z, cpu.u == 0);
            cpu.set_flag(Flag::N, false);
            cpu.set_flag(Flag::H, (v & 0x0F) == 0x0F);
            bus.mmu.cpu_write_request(cpu.hl, cpu.u);
        }
        DecHl1 => {
            let v = bus.mmu.cpu_data();
            cpu.u = v.wrapping_sub(1);
            cpu.set_flag(Flag::Z, cpu.u == 0);
            cpu.set_flag(Flag::N, true);
            cpu.set_flag(Flag::H, (v & 0x0F) == 0x00);
            bus.mmu.cpu_write_request(cpu.hl, cpu.u);
        }
        AluR(op, r) => {
            let v = cpu.r8(r);
            alu_apply(cpu, op, v);
            cpu.fetch(bus);
        }
        AluData(op) => {
            let v = bus.mmu.cpu_data();
            alu_apply(cpu, op, v);
            cpu.fetch(bus);
        }
        AddHlRr(rr) => {
            let hl = cpu.hl;
            let v = cpu.r16(rr);
            let sum = hl as u32 + v as u32;
            cpu.set_flag(Flag::N, false);
            cpu.set_flag(Flag::H, ((hl & 0x0FFF) + (v & 0x0FFF)) > 0x0FFF);
            cpu.set_flag(Flag::C, sum > 0xFFFF);
            cpu.hl = sum as u16;
        }
        Daa => {
            daa(cpu);
            cpu.fetch(bus);
        }
        Cpl => {
            let a = cpu.r8(A);
            cpu.set_r8(A, !a);
            cpu.set_flag(Flag::N, true);
            cpu.set_flag(Flag::H, true);
            cpu.fetch(bus);
        }
        Scf => {
            cpu.set_flag(Flag::N, false);
            cpu.set_flag(Flag::H, false);
            cpu.set_flag(Flag::C, true);
            cpu.fetch(bus);
        }
        Ccf => {
            let c = cpu.flag(Flag::C);
            cpu.set_flag(Flag::N, false);
            cpu.set_flag(Flag::H, false);
            cpu.set_flag(Flag::C, !c);
            cpu.fetch(bus);
        }
        Rlca => {
            let (res, c) = rotate(cpu, Rot::Rlc, cpu.r8(A));
            cpu.set_r8(A, res);
            cpu.set_flag(Flag::Z, false);
            cpu.set_flag(Flag::N, false);
            cpu.set_flag(Flag::H, false);
            cpu.set_flag(Flag::C, c);
            cpu.fetch(bus);
        }
        Rla => {
            let (res, c) = rotate(cpu, Rot::Rl, cpu.r8(A));
            cpu.set_r8(A, res);
            cpu.set_flag(Flag::Z, false);
            cpu.set_flag(Flag::N, false);
            cpu.set_flag(Flag::H, false);
            cpu.set_flag(Flag::C, c);
            cpu.fetch(bus);
        }
        Rrca => {
            let (res, c) = rotate(cpu, Rot::Rrc, cpu.r8(A));
            cpu.set_r8(A, res);
            cpu.set_flag(Flag::Z, false);
            cpu.set_flag(Flag::N, false);
            cpu.set_flag(Flag::H, false);
            cpu.set_flag(Flag::C, c);
            cpu.fetch(bus);
        }
        Rra => {
            let (res, c) = rotate(cpu, Rot::Rr, cpu.r8(A));
            cpu.set_r8(A, res);
            cpu.set_flag(Flag::Z, false);
            cpu.set_flag(Flag::N, false);
            cpu.set_flag(Flag::H, false);
            cpu.set_flag(Flag::C, c);
            cpu.fetch(bus);
        }

        JrS1 => {
            let s = bus.mmu.cpu_data() as i8;
            cpu.pc = (cpu.pc as i32 + s as i32) as u16;
        }
        JrCc1(c) => {
            let s = bus.mmu.cpu_data() as i8;
            if cond(cpu, c) {
                cpu.pc = (cpu.pc as i32 + s as i32) as u16;
            } else {
                cpu.fetch(bus);
            }
        }
        JpNn2 => {
            cpu.msb = bus.mmu.cpu_data();
            cpu.pc = u16::from_le_bytes([cpu.lsb, cpu.msb]);
        }
        JpCc2(c) => {
            cpu.msb = bus.mmu.cpu_data();
            if cond(cpu, c) {
                cpu.pc = u16::from_le_bytes([cpu.lsb, cpu.msb]);
            } else {
                cpu.fetch(bus);
            }
        }
        JpHl => {
            cpu.pc = cpu.hl;
            cpu.fetch(bus);
        }
        CallNn2 => {
            cpu.msb = bus.mmu.cpu_data();
            cpu.uu = u16::from_le_bytes([cpu.lsb, cpu.msb]);
            cpu.sp = cpu.sp.wrapping_sub(1);
        }
        CallCc2(c) => {
            cpu.msb = bus.mmu.cpu_data();
            cpu.uu = u16::from_le_bytes([cpu.lsb, cpu.msb]);
            if cond(cpu, c) {
                cpu.sp = cpu.sp.wrapping_sub(1);
            } else {
                cpu.fetch(bus);
            }
        }
        CallNn4 => {
            bus.mmu.cpu_write_request(cpu.sp, cpu.pc as u8);
            cpu.pc = cpu.uu;
        }
        PushHi(rr) => {
            bus.mmu.cpu_write_request(cpu.sp, (cpu.r16(rr) >> 8) as u8);
            cpu.sp = cpu.sp.wrapping_sub(1);
        }
        PushLo(rr) => bus.mmu.cpu_write_request(cpu.sp, cpu.r16(rr) as u8),
        RstJump(target) => {
            bus.mmu.cpu_write_request(cpu.sp, cpu.pc as u8);
            cpu.pc = target as u16;
        }
        RetLsb => {
            cpu.lsb = bus.mmu.cpu_data();
            bus.mmu.cpu_read_request(cpu.sp);
            cpu.sp = cpu.sp.wrapping_add(1);
        }
        RetMsb => {
            cpu.msb = bus.mmu.cpu_data();
            cpu.pc = u16::from_le_bytes([cpu.lsb, cpu.msb]);
        }
        RetiFetch => {
            cpu.ime = ImeState::Enabled;
            cpu.fetch(bus);
        }
        RetCc1(c) => {
            if cond(cpu, c) {
                bus.mmu.cpu_read_request(cpu.sp);
                cpu.sp = cpu.sp.wrapping_add(1);
            } else {
                cpu.fetch(bus);
            }
        }
        PopLo(rr) => {
            let v = bus.mmu.cpu_data();
            cpu.set_lo(rr, v);
            bus.mmu.cpu_read_request(cpu.sp);
            cpu.sp = cpu.sp.wrapping_add(1);
        }
        PopHi(rr) => {
            let v = bus.mmu.cpu_data();
            cpu.set_hi(rr, v);
            cpu.fetch(bus);
        }

        RotR(op, r) => {
            let (res, c) = rotate(cpu, op, cpu.r8(r));
            cpu.set_r8(r, res);
            cpu.set_flag(Flag::Z, res == 0);
            cpu.set_flag(Flag::N, false);
            cpu.set_flag(Flag::H, false);
            cpu.set_flag(Flag::C, c);
            cpu.fetch(bus);
        }
        RotHl1(op) => {
            let v = bus.mmu.cpu_data();
            let (res, c) = rotate(cpu, op, v);
            cpu.u = res;
            cpu.set_flag(Flag::Z, res == 0);
            cpu.set_flag(Flag::N, false);
            cpu.set_flag(Flag::H, false);
            cpu.set_flag(Flag::C, c);
            bus.mmu.cpu_write_request(cpu.hl, cpu.u);
        }
        BitR(bit, r) => {
            let v = cpu.r8(r);
            cpu.set_flag(Flag::Z, v & (1 << bit) == 0);
            cpu.set_flag(Flag::N, false);
            cpu.set_flag(Flag::H, true);
            cpu.fetch(bus);
        }
        BitHl1(bit) => {
            let v = bus.mmu.cpu_data();
            cpu.set_flag(Flag::Z, v & (1 << bit) == 0);
            cpu.set_flag(Flag::N, false);
            cpu.set_flag(Flag::H, true);
            cpu.fetch(bus);
        }
        ResR(bit, r) => {
            let v = cpu.r8(r);
            cpu.set_r8(r, v & !(1 << bit));
            cpu.fetch(bus);
        }
        SetR(bit, r) => {
            let v = cpu.r8(r);
            cpu.set_r8(r, v | (1 << bit));
            cpu.fetch(bus);
        }
        ResHl1(bit) => {
            cpu.u = bus.mmu.cpu_data() & !(1 << bit);
            bus.mmu.cpu_write_request(cpu.hl, cpu.u);
        }
        SetHl1(bit) => {
            cpu.u = bus.mmu.cpu_data() | (1 << bit);
            bus.mmu.cpu_write_request(cpu.hl, cpu.u);
        }

        // Interrupt service: push PC-1 (the prefetch already advanced it),
        // latch IE/IF, resolve the vector, then restart fetching.
        Isr0 => {
            cpu.uu = cpu.pc.wrapping_sub(1);
            cpu.sp = cpu.sp.wrapping_sub(1);
            bus.mmu.cpu_write_request(cpu.sp, (cpu.uu >> 8) as u8);
        }
        Isr1 => cpu.u = bus.interrupts.ie,
        Isr2 => cpu.u2 = bus.interrupts.iflag,
        Isr3 => {
            cpu.sp = cpu.sp.wrapping_sub(1);
            bus.mmu.cpu_write_request(cpu.sp, cpu.uu as u8);
            let pending = cpu.u & cpu.u2 & 0x1F;
            cpu.pc = if pending != 0 {
                let bit = pending.trailing_zeros() as u8;
                bus.interrupts.iflag &= !(1 << bit);
                0x0040 + 8 * bit as u16
            } else {
                // All requests vanished while the ISR was starting.
                0x0000
            };
        }
        Isr4 => {
            cpu.finish_interrupt_service();
            cpu.fetch(bus);
        }
    }
    Ok(())
}
