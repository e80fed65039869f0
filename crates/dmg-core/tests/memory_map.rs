use dmg_core::bus::Device;
use dmg_core::cartridge::FlatCartridge;
use dmg_core::GameBoy;

fn make_gb() -> GameBoy {
    let rom = vec![0u8; 0x8000];
    GameBoy::new(Box::new(FlatCartridge::from_rom(rom)), None)
}

#[test]
fn wram_and_echo_are_mirrored() {
    let mut gb = make_gb();

    gb.bus.write_direct(0xC000, 0x42);
    assert_eq!(gb.bus.read_direct(0xE000), 0x42);

    gb.bus.write_direct(0xE123, 0x99);
    assert_eq!(gb.bus.read_direct(0xC123), 0x99);

    gb.bus.write_direct(0xD234, 0x77);
    assert_eq!(gb.bus.read_direct(0xF234), 0x77);
}

#[test]
fn not_usable_area_reads_ff_and_drops_writes() {
    let mut gb = make_gb();

    gb.bus.write_direct(0xFEA0, 0x12);
    assert_eq!(gb.bus.read_direct(0xFEA0), 0xFF);
    assert_eq!(gb.bus.read_direct(0xFEFF), 0xFF);
}

#[test]
fn hram_round_trips() {
    let mut gb = make_gb();

    gb.bus.write_direct(0xFF80, 0x11);
    assert_eq!(gb.bus.read_direct(0xFF80), 0x11);

    gb.bus.write_direct(0xFFFE, 0x22);
    assert_eq!(gb.bus.read_direct(0xFFFE), 0x22);
}

#[test]
fn interrupt_registers_apply_masks() {
    let mut gb = make_gb();

    gb.bus.write_direct(0xFF0F, 0xFF);
    assert_eq!(gb.bus.read_direct(0xFF0F), 0xFF);
    gb.bus.write_direct(0xFF0F, 0x00);
    assert_eq!(gb.bus.read_direct(0xFF0F), 0xE0);

    gb.bus.write_direct(0xFFFF, 0xE3);
    assert_eq!(gb.bus.read_direct(0xFFFF), 0xE3);
}

#[test]
fn ly_is_read_only_and_stat_write_covers_enable_bits_only() {
    let mut gb = make_gb();

    let ly = gb.bus.read_direct(0xFF44);
    gb.bus.write_direct(0xFF44, 0xAB);
    assert_eq!(gb.bus.read_direct(0xFF44), ly);

    let mode = gb.bus.read_direct(0xFF41) & 0x07;
    gb.bus.write_direct(0xFF41, 0xFF);
    // Interrupt enables (bits 3-6) latch, bits 0-2 stay PPU-owned, bit 7
    // reads high.
    assert_eq!(gb.bus.read_direct(0xFF41), 0x80 | 0x78 | mode);
}

#[test]
fn boot_lock_is_permanent() {
    let mut gb = make_gb();

    // Without a boot ROM the lock is already set.
    assert_eq!(gb.bus.read_direct(0xFF50), 0xFF);
    assert!(gb.bus.boot_locked());

    // Writing 0 does not unlock.
    gb.bus.write_direct(0xFF50, 0x00);
    assert!(gb.bus.boot_locked());
}

#[test]
fn boot_rom_shadows_the_cartridge_until_locked() {
    let mut rom = vec![0u8; 0x8000];
    rom[0x0000] = 0xAA;
    let mut boot = Box::new([0u8; 0x100]);
    boot[0] = 0x55;

    let mut gb = GameBoy::new(Box::new(FlatCartridge::from_rom(rom)), Some(boot));
    assert_eq!(gb.bus.read_direct(0x0000), 0x55);
    assert!(!gb.bus.boot_locked());

    gb.bus.write_direct(0xFF50, 0x01);
    assert!(gb.bus.boot_locked());
    assert_eq!(gb.bus.read_direct(0x0000), 0xAA);
}

#[test]
fn sound_registers_store_masked_values() {
    let mut gb = make_gb();

    gb.bus.write_direct(0xFF10, 0x15);
    assert_eq!(gb.bus.read_direct(0xFF10), 0x95);

    gb.bus.write_direct(0xFF11, 0x3C);
    assert_eq!(gb.bus.read_direct(0xFF11), 0x3C);

    // Holes in the sound range float high.
    assert_eq!(gb.bus.read_direct(0xFF15), 0xFF);
    assert_eq!(gb.bus.read_direct(0xFF2A), 0xFF);
}

#[test]
fn arbitrated_reads_honor_bus_ownership() {
    let mut gb = make_gb();

    gb.bus.write_direct(0xC050, 0x5A);
    assert_eq!(gb.bus.read_checked(Device::Cpu, 0xC050), 0x5A);

    // Simulate another master holding the external bus.
    gb.bus.ext_bus.acquire(Device::Dma);
    assert_eq!(gb.bus.read_checked(Device::Cpu, 0xC050), 0xFF);
    gb.bus.write_checked(Device::Cpu, 0xC050, 0x00);
    gb.bus.ext_bus.release(Device::Dma);
    assert_eq!(gb.bus.read_direct(0xC050), 0x5A);

    // The holder itself still gets through.
    gb.bus.ext_bus.acquire(Device::Dma);
    assert_eq!(gb.bus.read_checked(Device::Dma, 0xC050), 0x5A);
}
