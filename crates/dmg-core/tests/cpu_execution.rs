use dmg_core::cartridge::FlatCartridge;
use dmg_core::cpu::{Flag, R16, R8};
use dmg_core::{Error, GameBoy};

/// Boot a machine (post-boot state, PC=0100) with `program` at 0100.
fn boot(program: &[u8]) -> GameBoy {
    let mut rom = vec![0u8; 0x8000];
    rom[0x100..0x100 + program.len()].copy_from_slice(program);
    GameBoy::new(Box::new(FlatCartridge::from_rom(rom)), None)
}

fn m_cycles(gb: &mut GameBoy, n: u32) {
    for _ in 0..4 * n {
        gb.tick().unwrap();
    }
}

#[test]
fn power_on_state_matches_the_documented_boot_handoff() {
    let gb = boot(&[]);
    assert_eq!(gb.cpu.pc, 0x0100);
    assert_eq!(gb.cpu.r16(R16::Af), 0x01B0);
    assert_eq!(gb.cpu.bc, 0x0013);
    assert_eq!(gb.cpu.de, 0x00D8);
    assert_eq!(gb.cpu.hl, 0x014D);
    assert_eq!(gb.cpu.sp, 0xFFFE);
}

#[test]
fn loads_and_adds_set_flags() {
    // LD A,5; LD B,3; ADD A,B; ADD A,0xFA
    let mut gb = boot(&[0x3E, 0x05, 0x06, 0x03, 0x80, 0xC6, 0xFA]);
    m_cycles(&mut gb, 12);

    assert_eq!(gb.cpu.r8(R8::A), 0x02);
    assert!(gb.cpu.flag(Flag::C));
    assert!(gb.cpu.flag(Flag::H));
    assert!(!gb.cpu.flag(Flag::N));
    assert!(!gb.cpu.flag(Flag::Z));
}

#[test]
fn push_pop_masks_the_flag_low_nibble() {
    // LD BC,0x12FF; PUSH BC; POP AF; PUSH AF; POP DE
    let mut gb = boot(&[0x01, 0xFF, 0x12, 0xC5, 0xF1, 0xF5, 0xD1]);
    m_cycles(&mut gb, 24);

    assert_eq!(gb.cpu.r16(R16::Af), 0x12F0);
    assert_eq!(gb.cpu.de, 0x12F0);
    assert_eq!(gb.cpu.sp, 0xFFFE);
}

#[test]
fn call_and_ret_balance_the_stack() {
    // 0100: CALL 0200; HALT          0200: INC A; RET
    let mut rom = vec![0u8; 0x8000];
    rom[0x100..0x104].copy_from_slice(&[0xCD, 0x00, 0x02, 0x76]);
    rom[0x200] = 0x3C;
    rom[0x201] = 0xC9;
    let mut gb = GameBoy::new(Box::new(FlatCartridge::from_rom(rom)), None);

    m_cycles(&mut gb, 40);

    assert!(gb.cpu.halted);
    assert_eq!(gb.cpu.r8(R8::A), 0x02); // post-boot A=1, one INC
    assert_eq!(gb.cpu.sp, 0xFFFE);
}

#[test]
fn call_pushes_the_return_address() {
    let mut rom = vec![0u8; 0x8000];
    rom[0x100..0x103].copy_from_slice(&[0xCD, 0x00, 0x02]);
    rom[0x200] = 0x76; // HALT
    let mut gb = GameBoy::new(Box::new(FlatCartridge::from_rom(rom)), None);

    m_cycles(&mut gb, 20);

    assert_eq!(gb.cpu.sp, 0xFFFC);
    // Return address 0x0103, high byte first at the higher address.
    assert_eq!(gb.bus.read_direct(0xFFFD), 0x01);
    assert_eq!(gb.bus.read_direct(0xFFFC), 0x03);
}

#[test]
fn daa_adjusts_bcd_addition() {
    // LD A,0x19; ADD A,0x28; DAA  => 19 + 28 = 47 (BCD)
    let mut gb = boot(&[0x3E, 0x19, 0xC6, 0x28, 0x27]);
    m_cycles(&mut gb, 10);

    assert_eq!(gb.cpu.r8(R8::A), 0x47);
    assert!(!gb.cpu.flag(Flag::C));
}

#[test]
fn conditional_jr_takes_and_skips() {
    // XOR A; JR Z,+2 (skip LD A,0x11); LD A,0x22
    // 0100: AF  0101: 28 02  0103: 3E 11  0105: 3E 22
    let mut gb = boot(&[0xAF, 0x28, 0x02, 0x3E, 0x11, 0x3E, 0x22]);
    m_cycles(&mut gb, 12);

    assert_eq!(gb.cpu.r8(R8::A), 0x22);
}

#[test]
fn jp_hl_transfers_control() {
    // LD HL,0x0200; JP (HL)     0200: LD B,0x5A; HALT
    let mut rom = vec![0u8; 0x8000];
    rom[0x100..0x104].copy_from_slice(&[0x21, 0x00, 0x02, 0xE9]);
    rom[0x200..0x203].copy_from_slice(&[0x06, 0x5A, 0x76]);
    let mut gb = GameBoy::new(Box::new(FlatCartridge::from_rom(rom)), None);

    m_cycles(&mut gb, 20);

    assert!(gb.cpu.halted);
    assert_eq!(gb.cpu.r8(R8::B), 0x5A);
}

#[test]
fn cb_ops_cover_registers_and_hl_indirect() {
    // LD B,0x81; RLC B; LD HL,0xC000; LD (HL),0x0F; SLA (HL); RES 1,B
    let mut gb = boot(&[
        0x06, 0x81, 0xCB, 0x00, 0x21, 0x00, 0xC0, 0x36, 0x0F, 0xCB, 0x26, 0xCB, 0x88,
    ]);
    m_cycles(&mut gb, 30);

    // RLC 0x81 = 0x03 (carry out), then RES 1 clears bit 1.
    assert_eq!(gb.cpu.r8(R8::B), 0x01);
    assert_eq!(gb.bus.read_direct(0xC000), 0x1E);
}

#[test]
fn sixteen_bit_arithmetic_flags() {
    // LD SP,0xD000; LD HL,SP+5; ADD SP,-5; ADD HL,SP
    let mut gb = boot(&[0x31, 0x00, 0xD0, 0xF8, 0x05, 0xE8, 0xFB, 0x39]);
    m_cycles(&mut gb, 20);

    assert_eq!(gb.cpu.sp, 0xCFFB);
    assert_eq!(gb.cpu.hl, 0xA000); // 0xD005 + 0xCFFB
    assert!(gb.cpu.flag(Flag::C));
    assert!(gb.cpu.flag(Flag::H));
    assert!(!gb.cpu.flag(Flag::N));
}

#[test]
fn ld_nn_sp_stores_both_bytes() {
    // LD SP,0xBEEF; LD (0xC000),SP
    let mut gb = boot(&[0x31, 0xEF, 0xBE, 0x08, 0x00, 0xC0]);
    m_cycles(&mut gb, 16);

    assert_eq!(gb.bus.read_direct(0xC000), 0xEF);
    assert_eq!(gb.bus.read_direct(0xC001), 0xBE);
}

#[test]
fn ldh_addresses_the_high_page() {
    // LD A,0x77; LDH (0x80),A; LD A,0x00; LDH A,(0x80)
    let mut gb = boot(&[0x3E, 0x77, 0xE0, 0x80, 0x3E, 0x00, 0xF0, 0x80]);
    m_cycles(&mut gb, 16);

    assert_eq!(gb.bus.read_direct(0xFF80), 0x77);
    assert_eq!(gb.cpu.r8(R8::A), 0x77);
}

#[test]
fn hl_indirect_autoincrement_walks_memory() {
    // LD HL,0xC000; LD A,0xAA; LD (HL+),A; LD (HL+),A; LD A,(0xC001)
    let mut gb = boot(&[
        0x21, 0x00, 0xC0, 0x3E, 0xAA, 0x22, 0x22, 0xFA, 0x01, 0xC0,
    ]);
    m_cycles(&mut gb, 20);

    assert_eq!(gb.bus.read_direct(0xC000), 0xAA);
    assert_eq!(gb.bus.read_direct(0xC001), 0xAA);
    assert_eq!(gb.cpu.hl, 0xC002);
    assert_eq!(gb.cpu.r8(R8::A), 0xAA);
}

#[test]
fn undefined_opcode_is_a_session_fatal_error() {
    let mut gb = boot(&[0xD3]);

    let mut fault = None;
    for _ in 0..40 {
        if let Err(e) = gb.tick() {
            fault = Some(e);
            break;
        }
    }

    match fault {
        Some(Error::InvalidInstruction { pc, opcode }) => {
            assert_eq!(opcode, 0xD3);
            assert_eq!(pc, 0x0100);
        }
        other => panic!("expected an invalid-instruction fault, got {other:?}"),
    }
}

#[test]
fn instruction_effects_land_on_exact_m_cycles() {
    // NOP (1 M) then LD A,0x42 (2 M): the machine spends one M-cycle on the
    // internal power-on fetch, so A changes exactly at the end of M-cycle 4.
    let mut gb = boot(&[0x00, 0x3E, 0x42]);

    m_cycles(&mut gb, 3);
    assert_ne!(gb.cpu.r8(R8::A), 0x42);
    m_cycles(&mut gb, 1);
    assert_eq!(gb.cpu.r8(R8::A), 0x42);
}
