use dmg_core::bus::Device;
use dmg_core::cartridge::FlatCartridge;
use dmg_core::GameBoy;

fn make_gb() -> GameBoy {
    let mut rom = vec![0u8; 0x8000];
    // Park the CPU immediately so it does not interact with the buses.
    rom[0x100] = 0x76; // HALT
    GameBoy::new(Box::new(FlatCartridge::from_rom(rom)), None)
}

fn ticks(gb: &mut GameBoy, n: u32) {
    for _ in 0..n {
        gb.tick().unwrap();
    }
}

/// Park the CPU and disable the LCD so the PPU releases its buses.
fn quiesce(gb: &mut GameBoy) {
    gb.bus.write_direct(0xFF40, 0x00);
    ticks(gb, 64);
    assert!(gb.cpu.halted);
}

#[test]
fn oam_dma_copies_160_bytes_and_blocks_the_oam_bus() {
    let mut gb = make_gb();
    quiesce(&mut gb);

    for i in 0..0xA0u16 {
        gb.bus.write_direct(0xC000 + i, i as u8 ^ 0x5A);
    }

    gb.bus.write_direct(0xFF46, 0xC0);
    assert_eq!(gb.bus.read_direct(0xFF46), 0xC0);

    // One tick of request pipeline, then the transfer goes active.
    ticks(&mut gb, 1);
    assert!(!gb.bus.dma.is_transferring());
    ticks(&mut gb, 1);
    assert!(gb.bus.dma.is_transferring());
    assert!(gb.bus.oam_bus.is_acquired_by(Device::Dma));

    // While the transfer runs, CPU-side OAM reads float high and writes
    // are dropped.
    assert_eq!(gb.bus.read_checked(Device::Cpu, 0xFE00), 0xFF);
    gb.bus.write_checked(Device::Cpu, 0xFE10, 0x77);

    // 160 copy ticks drain the transfer.
    ticks(&mut gb, 160);
    assert!(!gb.bus.dma.is_transferring());
    assert!(!gb.bus.oam_bus.is_acquired_by(Device::Dma));

    for i in 0..0xA0usize {
        assert_eq!(gb.bus.oam[i], (i as u8) ^ 0x5A, "OAM byte {i}");
    }
    // The dropped CPU write never landed.
    assert_ne!(gb.bus.oam[0x10], 0x77);
}

#[test]
fn dma_source_above_df00_folds_onto_wram() {
    let mut gb = make_gb();
    quiesce(&mut gb);

    gb.bus.write_direct(0xC000, 0xAB);
    gb.bus.write_direct(0xC09F, 0xCD);

    // Echo-region source E0xx reads from C0xx.
    gb.bus.write_direct(0xFF46, 0xE0);
    ticks(&mut gb, 170);

    assert_eq!(gb.bus.oam[0x00], 0xAB);
    assert_eq!(gb.bus.oam[0x9F], 0xCD);
}

#[test]
fn cpu_read_contending_with_dma_sees_the_dma_byte() {
    let mut gb = make_gb();
    quiesce(&mut gb);

    gb.bus.write_direct(0xC000, 0x11);
    gb.bus.write_direct(0xC001, 0x22);
    gb.bus.write_direct(0xD500, 0x99);

    gb.bus.write_direct(0xFF46, 0xC0);
    ticks(&mut gb, 2); // transfer active, first source read posted

    // A CPU read on the same (external) bus is redirected onto the DMA
    // fetch address.
    gb.bus.mmu.cpu_read_request(0xD500);
    gb.bus.flush_cpu_read();
    assert_eq!(gb.bus.mmu.cpu_data(), 0x11);

    // A CPU write on that bus is silently lost.
    gb.bus.mmu.cpu_write_request(0xD500, 0x42);
    gb.bus.flush_cpu_write();
    assert_eq!(gb.bus.read_direct(0xD500), 0x99);

    // HRAM lives on the CPU-internal bus and stays reachable.
    gb.bus.mmu.cpu_write_request(0xFF85, 0x42);
    gb.bus.flush_cpu_write();
    assert_eq!(gb.bus.read_direct(0xFF85), 0x42);
}

#[test]
fn restarting_dma_mid_transfer_retargets_the_cursor() {
    let mut gb = make_gb();
    quiesce(&mut gb);

    for i in 0..0xA0u16 {
        gb.bus.write_direct(0xC000 + i, 0x10);
        gb.bus.write_direct(0xD000 + i, 0x20);
    }

    gb.bus.write_direct(0xFF46, 0xC0);
    ticks(&mut gb, 40);
    assert!(gb.bus.dma.is_transferring());

    gb.bus.write_direct(0xFF46, 0xD0);
    ticks(&mut gb, 170);

    assert!(!gb.bus.dma.is_transferring());
    for i in 0..0xA0usize {
        assert_eq!(gb.bus.oam[i], 0x20, "OAM byte {i}");
    }
}
