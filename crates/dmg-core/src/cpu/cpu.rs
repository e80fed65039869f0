use serde::{Deserialize, Serialize};

use crate::bus::Bus;
use crate::interrupt::Interrupts;
use crate::Error;

use super::ops::{self, MicroOp, CB_OPCODES, ISR, OPCODES};

/// 8-bit registers addressable by micro-operations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum R8 {
    A,
    B,
    C,
    D,
    E,
    H,
    L,
}

/// 16-bit register pairs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum R16 {
    Af,
    Bc,
    De,
    Hl,
    Sp,
    Pc,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Flag {
    Z,
    N,
    H,
    C,
}

impl Flag {
    const fn mask(self) -> u16 {
        match self {
            Self::Z => 0x0080,
            Self::N => 0x0040,
            Self::H => 0x0020,
            Self::C => 0x0010,
        }
    }
}

/// Interrupt master enable flip-flop. `EI` requests `Pending`, which
/// becomes `Enabled` one instruction later.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ImeState {
    Disabled,
    Pending,
    Enabled,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
enum InterruptState {
    None,
    Pending,
    Serving,
}

/// Which micro-operation table the instruction pointer indexes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum OpTable {
    Primary,
    Prefixed,
    Isr,
}

const UNKNOWN_TIMING: u8 = u8::MAX;

/// T-cycles between an interrupt being sampled and the service sequence
/// starting, indexed by `[IE & IF][halted][t-phase]`. Slots marked `U` have
/// not been measured on hardware: debug builds stop, release builds fall
/// back to 1 with a diagnostic.
#[rustfmt::skip]
const INTERRUPT_TIMINGS: [[[u8; 4]; 2]; 32] = {
    const U: u8 = UNKNOWN_TIMING;
    const J: u8 = 1; // joypad timing unverified, assumed constant
    [
        /*  0 : none                            */ [[U, U, U, U], [U, U, U, U]],
        /*  1 : VBlank                          */ [[1, 1, U, U], [1, U, U, U]],
        /*  2 : STAT                            */ [[1, 1, 1, 2], [1, 2, 2, 2]],
        /*  3 : STAT + VBlank                   */ [[1, 1, 1, 2], [1, 2, 2, 2]],
        /*  4 : Timer                           */ [[1, 1, U, 2], [U, U, U, 3]],
        /*  5 : Timer + VBlank                  */ [[1, 1, U, 2], [1, U, U, 3]],
        /*  6 : Timer + STAT                    */ [[1, 1, 1, 2], [1, 2, 2, 2]],
        /*  7 : Timer + STAT + VBlank           */ [[1, 1, 1, 2], [1, 2, 2, 2]],
        /*  8 : Serial                          */ [[1, 1, U, 2], [U, U, U, 3]],
        /*  9 : Serial + VBlank                 */ [[1, 1, U, 2], [1, U, U, 3]],
        /* 10 : Serial + STAT                   */ [[1, 1, 1, 2], [1, 2, 2, 2]],
        /* 11 : Serial + STAT + VBlank          */ [[1, 1, 1, 2], [1, 2, 2, 2]],
        /* 12 : Serial + Timer                  */ [[1, 1, U, 2], [U, U, U, 3]],
        /* 13 : Serial + Timer + VBlank         */ [[1, 1, U, 2], [1, U, U, 3]],
        /* 14 : Serial + Timer + STAT           */ [[1, 1, 1, 2], [1, 2, 2, 2]],
        /* 15 : Serial + Timer + STAT + VBlank  */ [[1, 1, 1, 2], [1, 2, 2, 2]],
        /* 16 : Joypad                          */ [[J, J, J, J], [J, J, J, J]],
        /* 17 : Joypad + VBlank                 */ [[J, J, J, J], [J, J, J, J]],
        /* 18 : Joypad + STAT                   */ [[J, J, J, J], [J, J, J, J]],
        /* 19 : Joypad + STAT + VBlank          */ [[J, J, J, J], [J, J, J, J]],
        /* 20 : Joypad + Timer                  */ [[J, J, J, J], [J, J, J, J]],
        /* 21 : Joypad + Timer + VBlank         */ [[J, J, J, J], [J, J, J, J]],
        /* 22 : Joypad + Timer + STAT           */ [[J, J, J, J], [J, J, J, J]],
        /* 23 : Joypad + Timer + STAT + VBlank  */ [[J, J, J, J], [J, J, J, J]],
        /* 24 : Joypad + Serial                 */ [[J, J, J, J], [J, J, J, J]],
        /* 25 : Joypad + Serial + VBlank        */ [[J, J, J, J], [J, J, J, J]],
        /* 26 : Joypad + Serial + STAT          */ [[J, J, J, J], [J, J, J, J]],
        /* 27 : Joypad + Serial + STAT + VBlank */ [[J, J, J, J], [J, J, J, J]],
        /* 28 : Joypad + Serial + Timer         */ [[J, J, J, J], [J, J, J, J]],
        /* 29 : Joypad + Serial + Timer + VBlank*/ [[J, J, J, J], [J, J, J, J]],
        /* 30 : Joypad + Serial + Timer + STAT  */ [[J, J, J, J], [J, J, J, J]],
        /* 31 : all                             */ [[J, J, J, J], [J, J, J, J]],
    ]
};

/// Sharp LR35902 core. One micro-operation executes per M-cycle; pending
/// interrupts are sampled every T-cycle through [`Cpu::check_interrupt`].
#[derive(Clone, Serialize, Deserialize)]
pub struct Cpu {
    pub af: u16,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub pc: u16,
    pub sp: u16,

    pub ime: ImeState,
    pub halted: bool,
    pub halt_bug: bool,

    interrupt_state: InterruptState,
    interrupt_countdown: u8,

    /// An opcode fetch is in flight; resolved at the next micro-op slot.
    pub(crate) fetching: bool,
    pub(crate) fetch_table: OpTable,

    /// Micro-operation pointer: `table[opcode][step]` is the next op.
    pub(crate) table: OpTable,
    pub(crate) opcode: u8,
    pub(crate) step: u8,

    // Micro-op scratchpad, alive across the M-cycles of one instruction.
    pub(crate) u: u8,
    pub(crate) u2: u8,
    pub(crate) lsb: u8,
    pub(crate) msb: u8,
    pub(crate) uu: u16,
}

impl Cpu {
    pub fn new(booting: bool) -> Self {
        let mut cpu = Self {
            af: 0,
            bc: 0,
            de: 0,
            hl: 0,
            pc: 0,
            sp: 0,
            ime: ImeState::Disabled,
            halted: false,
            halt_bug: false,
            interrupt_state: InterruptState::None,
            interrupt_countdown: 0,
            fetching: false,
            fetch_table: OpTable::Primary,
            // Start on a NOP; its only micro-op fetches the first opcode.
            table: OpTable::Primary,
            opcode: 0x00,
            step: 0,
            u: 0,
            u2: 0,
            lsb: 0,
            msb: 0,
            uu: 0,
        };
        if !booting {
            cpu.af = 0x01B0;
            cpu.bc = 0x0013;
            cpu.de = 0x00D8;
            cpu.hl = 0x014D;
            cpu.pc = 0x0100;
            cpu.sp = 0xFFFE;
        }
        cpu
    }

    /// Execute one micro-operation slot (invoked once per M-cycle, at t3).
    pub fn tick(&mut self, bus: &mut Bus) -> Result<(), Error> {
        // Effect of an EI executed the instruction before.
        if self.ime == ImeState::Pending {
            self.ime = ImeState::Enabled;
        }

        if self.interrupt_state == InterruptState::Pending {
            if self.interrupt_countdown > 0 {
                self.interrupt_countdown -= 1;
            }
            // Delivery happens only at an instruction boundary. A pending
            // CB-prefixed fetch is not a boundary: the prefix byte has
            // already been consumed.
            if self.interrupt_countdown == 0 && self.at_instruction_boundary() {
                debug_assert!(self.halted || self.ime == ImeState::Enabled);
                self.halted = false;
                if self.ime == ImeState::Enabled {
                    self.interrupt_state = InterruptState::Serving;
                    self.serve_interrupt();
                } else {
                    self.interrupt_state = InterruptState::None;
                }
            }
        }

        if self.halted {
            return Ok(());
        }

        // HALT bug: the next fetch re-reads the same PC.
        if self.halt_bug {
            self.halt_bug = false;
            self.pc = self.pc.wrapping_sub(1);
        }

        if self.fetching {
            self.fetching = false;
            self.table = self.fetch_table;
            self.opcode = bus.mmu.cpu_data();
            debug_assert_eq!(self.step, 0);
        }

        let op = self.current_op();
        self.step += 1;
        ops::exec(self, bus, op)
    }

    fn at_instruction_boundary(&self) -> bool {
        self.step == 0 && self.fetch_table == OpTable::Primary
    }

    fn current_op(&self) -> MicroOp {
        match self.table {
            OpTable::Primary => OPCODES[self.opcode as usize][self.step as usize],
            OpTable::Prefixed => CB_OPCODES[self.opcode as usize][self.step as usize],
            OpTable::Isr => ISR[self.step as usize],
        }
    }

    /// Sample pending interrupts at T-cycle phase `t`.
    pub fn check_interrupt(&mut self, interrupts: &Interrupts, t: u8) {
        if self.interrupt_state != InterruptState::None {
            return;
        }
        if !(self.halted || self.ime == ImeState::Enabled) {
            return;
        }
        let pending = interrupts.pending_mask();
        if pending == 0 {
            return;
        }

        let mut ticks = INTERRUPT_TIMINGS[pending as usize][self.halted as usize][t as usize];
        if ticks == UNKNOWN_TIMING {
            debug_assert!(
                false,
                "unknown interrupt timing: pending={pending:#07b} halted={} t={t} pc={:#06x} \
                 af={:#06x} bc={:#06x} de={:#06x} hl={:#06x} sp={:#06x}",
                self.halted, self.pc, self.af, self.bc, self.de, self.hl, self.sp
            );
            log::warn!(
                "unknown interrupt timing (pending={pending:#07b}, halted={}, t={t}); assuming 1",
                self.halted
            );
            ticks = 1;
        }

        self.interrupt_state = InterruptState::Pending;
        self.interrupt_countdown = ticks;
    }

    fn serve_interrupt(&mut self) {
        debug_assert!(self.fetching);
        self.fetching = false;
        self.table = OpTable::Isr;
        self.opcode = 0;
        self.step = 0;
    }

    /// Called by the last micro-op of the ISR sequence.
    pub(crate) fn finish_interrupt_service(&mut self) {
        self.ime = ImeState::Disabled;
        self.interrupt_state = InterruptState::None;
    }

    /// Post the next opcode fetch; the read resolves before the next
    /// micro-op slot.
    pub(crate) fn fetch(&mut self, bus: &mut Bus) {
        self.step = 0;
        self.fetching = true;
        self.fetch_table = OpTable::Primary;
        bus.mmu.cpu_read_request(self.pc);
        self.pc = self.pc.wrapping_add(1);
    }

    pub(crate) fn fetch_prefixed(&mut self, bus: &mut Bus) {
        self.step = 0;
        self.fetching = true;
        self.fetch_table = OpTable::Prefixed;
        bus.mmu.cpu_read_request(self.pc);
        self.pc = self.pc.wrapping_add(1);
    }

    // ------- registers -------

    #[inline]
    pub fn r8(&self, r: R8) -> u8 {
        match r {
            R8::A => (self.af >> 8) as u8,
            R8::B => (self.bc >> 8) as u8,
            R8::C => self.bc as u8,
            R8::D => (self.de >> 8) as u8,
            R8::E => self.de as u8,
            R8::H => (self.hl >> 8) as u8,
            R8::L => self.hl as u8,
        }
    }

    #[inline]
    pub fn set_r8(&mut self, r: R8, value: u8) {
        let v = value as u16;
        match r {
            R8::A => self.af = (self.af & 0x00F0) | (v << 8),
            R8::B => self.bc = (self.bc & 0x00FF) | (v << 8),
            R8::C => self.bc = (self.bc & 0xFF00) | v,
            R8::D => self.de = (self.de & 0x00FF) | (v << 8),
            R8::E => self.de = (self.de & 0xFF00) | v,
            R8::H => self.hl = (self.hl & 0x00FF) | (v << 8),
            R8::L => self.hl = (self.hl & 0xFF00) | v,
        }
    }

    #[inline]
    pub fn r16(&self, rr: R16) -> u16 {
        match rr {
            R16::Af => self.af & 0xFFF0,
            R16::Bc => self.bc,
            R16::De => self.de,
            R16::Hl => self.hl,
            R16::Sp => self.sp,
            R16::Pc => self.pc,
        }
    }

    #[inline]
    pub fn set_r16(&mut self, rr: R16, value: u16) {
        match rr {
            // The low nibble of F is hard-wired to zero.
            R16::Af => self.af = value & 0xFFF0,
            R16::Bc => self.bc = value,
            R16::De => self.de = value,
            R16::Hl => self.hl = value,
            R16::Sp => self.sp = value,
            R16::Pc => self.pc = value,
        }
    }

    #[inline]
    pub(crate) fn set_lo(&mut self, rr: R16, value: u8) {
        let cur = self.r16(rr);
        self.set_r16(rr, (cur & 0xFF00) | value as u16);
    }

    #[inline]
    pub(crate) fn set_hi(&mut self, rr: R16, value: u8) {
        let cur = self.r16(rr);
        self.set_r16(rr, (cur & 0x00FF) | ((value as u16) << 8));
    }

    #[inline]
    pub fn flag(&self, flag: Flag) -> bool {
        (self.af & flag.mask()) != 0
    }

    #[inline]
    pub fn set_flag(&mut self, flag: Flag, on: bool) {
        if on {
            self.af |= flag.mask();
        } else {
            self.af &= !flag.mask();
        }
        self.af &= 0xFFF0;
    }
}
