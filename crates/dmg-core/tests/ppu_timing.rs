use dmg_core::cartridge::FlatCartridge;
use dmg_core::GameBoy;

fn make_gb() -> GameBoy {
    // NOP-filled ROM; the CPU idles through memory while the PPU runs.
    let rom = vec![0u8; 0x8000];
    GameBoy::new(Box::new(FlatCartridge::from_rom(rom)), None)
}

fn mode(gb: &GameBoy) -> u8 {
    gb.bus.video.stat & 0x03
}

fn ticks(gb: &mut GameBoy, n: u32) {
    for _ in 0..n {
        gb.tick().unwrap();
    }
}

/// Run until LY=0, dot 0, OAM scan: the first dot of a fresh frame.
fn advance_to_frame_start(gb: &mut GameBoy) {
    for _ in 0..200_000 {
        gb.tick().unwrap();
        if gb.bus.video.ly == 0 && gb.bus.ppu.dots() == 0 && mode(gb) == 2 {
            return;
        }
    }
    panic!("PPU never reached a frame start");
}

#[test]
fn scanline_mode_sequence_and_length() {
    let mut gb = make_gb();
    advance_to_frame_start(&mut gb);

    // Dots 0..79: OAM scan.
    for dot in 0..80 {
        assert_eq!(mode(&gb), 2, "dot {dot}");
        gb.tick().unwrap();
    }
    assert_eq!(mode(&gb), 3);

    // Pixel transfer with SCX=0, no window, no sprites: 171 dots
    // (3 dummy dots + 8 discarded pixels + 160 pushed).
    let mut transfer_dots = 0;
    while mode(&gb) == 3 {
        gb.tick().unwrap();
        transfer_dots += 1;
        assert!(transfer_dots < 400, "pixel transfer never ended");
    }
    assert_eq!(transfer_dots, 171);
    assert_eq!(mode(&gb), 0);

    // The rest of the 456-dot line is HBlank; LY increments at dot 454.
    ticks(&mut gb, 453 - 80 - 171);
    assert_eq!(gb.bus.video.ly, 0);
    ticks(&mut gb, 1);
    assert_eq!(gb.bus.video.ly, 1);
    assert_eq!(gb.bus.ppu.dots(), 454);

    ticks(&mut gb, 2);
    assert_eq!(gb.bus.ppu.dots(), 0);
    assert_eq!(mode(&gb), 2);
}

#[test]
fn scx_alignment_stretches_pixel_transfer() {
    let mut gb = make_gb();
    gb.bus.video.scx = 5;
    advance_to_frame_start(&mut gb);

    ticks(&mut gb, 80);
    let mut transfer_dots = 0;
    while mode(&gb) == 3 {
        gb.tick().unwrap();
        transfer_dots += 1;
        assert!(transfer_dots < 400);
    }
    assert_eq!(transfer_dots, 171 + 5);
}

#[test]
fn vblank_begins_at_line_144_and_raises_the_interrupt() {
    let mut gb = make_gb();
    advance_to_frame_start(&mut gb);
    gb.bus.interrupts.iflag = 0;

    ticks(&mut gb, 456 * 144);

    assert_eq!(gb.bus.video.ly, 144);
    assert_eq!(mode(&gb), 1);
    assert_ne!(gb.bus.interrupts.iflag & 0x01, 0);
}

#[test]
fn frame_is_exactly_154_lines_of_456_dots() {
    let mut gb = make_gb();
    advance_to_frame_start(&mut gb);

    ticks(&mut gb, 456 * 154);

    assert_eq!(gb.bus.video.ly, 0);
    assert_eq!(gb.bus.ppu.dots(), 0);
    assert_eq!(mode(&gb), 2);
}

#[test]
fn line_153_reports_ly_zero_after_two_dots() {
    let mut gb = make_gb();
    advance_to_frame_start(&mut gb);

    // Go to the start of line 153.
    ticks(&mut gb, 456 * 153);
    assert_eq!(gb.bus.video.ly, 153);
    assert_eq!(gb.bus.ppu.dots(), 0);
    assert_eq!(mode(&gb), 1);

    // After two dots LY reads 0 while the PPU is still in VBlank.
    ticks(&mut gb, 2);
    assert_eq!(gb.bus.video.ly, 0);
    assert_eq!(mode(&gb), 1);

    // A LYC=0 match raises no STAT interrupt while the comparison is
    // suppressed (dots 2..6).
    gb.bus.video.lyc = 0;
    gb.bus.video.stat |= 0x40;
    gb.bus.interrupts.iflag = 0;
    ticks(&mut gb, 4);
    assert_eq!(gb.bus.interrupts.iflag & 0x02, 0);

    // The comparison comes back at dot 7 and fires on its rising edge.
    ticks(&mut gb, 1);
    assert_ne!(gb.bus.interrupts.iflag & 0x02, 0);

    // Mode switches to HBlank at dot 454 and the next frame starts at 456.
    ticks(&mut gb, 454 - 7);
    assert_eq!(mode(&gb), 0);
    ticks(&mut gb, 2);
    assert_eq!(gb.bus.video.ly, 0);
    assert_eq!(gb.bus.ppu.dots(), 0);
    assert_eq!(mode(&gb), 2);
}

#[test]
fn lyc_interrupt_fires_when_the_line_is_reached() {
    let mut gb = make_gb();
    advance_to_frame_start(&mut gb);

    gb.bus.video.lyc = 5;
    gb.bus.video.stat |= 0x40;

    // Clear any edge history mid line 4.
    while !(gb.bus.video.ly == 4 && gb.bus.ppu.dots() == 10) {
        gb.tick().unwrap();
    }
    gb.bus.interrupts.iflag = 0;

    while gb.bus.video.ly != 5 {
        gb.tick().unwrap();
    }
    ticks(&mut gb, 2);
    assert_ne!(gb.bus.interrupts.iflag & 0x02, 0);
}

#[test]
fn stat_hblank_interrupt_is_edge_triggered() {
    let mut gb = make_gb();
    advance_to_frame_start(&mut gb);
    gb.bus.video.stat |= 0x08; // HBlank interrupt enable

    while mode(&gb) != 0 {
        gb.tick().unwrap();
    }
    assert_ne!(gb.bus.interrupts.iflag & 0x02, 0);

    // The source stays high for the rest of this HBlank: no second edge.
    gb.bus.interrupts.iflag = 0;
    while gb.bus.ppu.dots() < 400 {
        gb.tick().unwrap();
    }
    assert_eq!(gb.bus.interrupts.iflag & 0x02, 0);

    // Next scanline produces a fresh edge.
    while !(mode(&gb) == 0 && gb.bus.video.ly == 1) {
        gb.tick().unwrap();
    }
    assert_ne!(gb.bus.interrupts.iflag & 0x02, 0);
}

#[test]
fn vram_and_oam_are_blocked_from_the_cpu_during_the_right_modes() {
    use dmg_core::bus::Device;

    let mut gb = make_gb();
    advance_to_frame_start(&mut gb);

    gb.bus.vram[0x100] = 0x3C;
    gb.bus.oam[0x04] = 0x77;

    // OAM scan: OAM unreadable, VRAM still open.
    ticks(&mut gb, 40);
    assert_eq!(mode(&gb), 2);
    assert_eq!(gb.bus.read_checked(Device::Cpu, 0xFE04), 0xFF);
    assert_eq!(gb.bus.read_checked(Device::Cpu, 0x8100), 0x3C);

    // Pixel transfer: both buses closed, writes dropped.
    while mode(&gb) != 3 {
        gb.tick().unwrap();
    }
    ticks(&mut gb, 5);
    assert_eq!(gb.bus.read_checked(Device::Cpu, 0x8100), 0xFF);
    assert_eq!(gb.bus.read_checked(Device::Cpu, 0xFE04), 0xFF);
    gb.bus.write_checked(Device::Cpu, 0x8100, 0x00);
    assert_eq!(gb.bus.vram[0x100], 0x3C);

    // HBlank: open again.
    while mode(&gb) != 0 {
        gb.tick().unwrap();
    }
    assert_eq!(gb.bus.read_checked(Device::Cpu, 0x8100), 0x3C);
    assert_eq!(gb.bus.read_checked(Device::Cpu, 0xFE04), 0x77);
}

#[test]
fn disabling_the_lcd_resets_the_ppu() {
    use dmg_core::bus::Device;

    let mut gb = make_gb();
    advance_to_frame_start(&mut gb);
    ticks(&mut gb, 100); // somewhere in pixel transfer

    gb.bus.write_direct(0xFF40, 0x00);
    ticks(&mut gb, 4);

    assert_eq!(gb.bus.video.ly, 0);
    assert_eq!(gb.bus.ppu.dots(), 0);
    assert_eq!(mode(&gb), 0);
    assert!(!gb.bus.vram_bus.is_acquired_by(Device::Ppu));
    assert!(!gb.bus.oam_bus.is_acquired_by(Device::Ppu));

    // Frozen while disabled.
    ticks(&mut gb, 1000);
    assert_eq!(gb.bus.ppu.dots(), 0);

    // Re-enable: the first line skips the OAM scan, STAT stays in HBlank
    // through it, and pixel transfer starts at dot 80.
    gb.bus.write_direct(0xFF40, 0x91);
    ticks(&mut gb, 2);
    assert_eq!(mode(&gb), 0);
    ticks(&mut gb, 79);
    assert_eq!(mode(&gb), 3);
}
