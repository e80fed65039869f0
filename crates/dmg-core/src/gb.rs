use crate::bus::{BootRom, Bus};
use crate::cartridge::Cartridge;
use crate::cpu::Cpu;
use crate::input::Button;
use crate::Error;

/// The whole machine. One [`GameBoy::tick`] is one T-cycle; the CPU runs
/// one micro-operation every fourth tick, everything else is clocked per
/// tick.
pub struct GameBoy {
    pub cpu: Cpu,
    pub bus: Bus,
    /// T-cycle phase within the current M-cycle.
    pub(crate) phase: u8,
}

impl GameBoy {
    /// Build a machine around a cartridge. With a boot ROM the CPU starts
    /// at 0000 with the ROM mapped in; without one, everything comes up in
    /// the documented post-boot state (PC=0100, AF=01B0, ...).
    pub fn new(cart: Box<dyn Cartridge>, boot_rom: Option<Box<BootRom>>) -> Self {
        let booting = boot_rom.is_some();
        Self {
            cpu: Cpu::new(booting),
            bus: Bus::new(cart, boot_rom),
            phase: 0,
        }
    }

    /// Advance the machine by one T-cycle.
    ///
    /// Sub-tick order is fixed: lane flushes (CPU write at t0, DMA read
    /// every cycle, CPU read at t2), then DMA, PPU dot, timers, serial,
    /// interrupt sampling, and finally the CPU micro-op slot at t3.
    pub fn tick(&mut self) -> Result<(), Error> {
        let phase = self.phase;

        if phase == 0 {
            self.bus.flush_cpu_write();
        }
        self.bus.flush_dma_read();

        self.bus.tick_dma();
        self.bus.tick_ppu();
        self.bus.tick_timer();
        self.bus.tick_serial();

        self.cpu.check_interrupt(&self.bus.interrupts, phase);

        if phase == 2 {
            self.bus.flush_cpu_read();
        }

        let result = if phase == 3 {
            self.cpu.tick(&mut self.bus)
        } else {
            Ok(())
        };

        self.phase = (phase + 1) & 3;
        result
    }

    /// Run until the PPU completes the current frame.
    pub fn run_frame(&mut self) -> Result<(), Error> {
        while !self.bus.ppu.frame_ready() {
            self.tick()?;
        }
        self.bus.ppu.clear_frame_ready();
        Ok(())
    }

    /// Swap the cartridge; core state is untouched.
    pub fn set_cartridge(&mut self, cart: Box<dyn Cartridge>) {
        self.bus.cart = cart;
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.bus.set_button(button, pressed);
    }
}
