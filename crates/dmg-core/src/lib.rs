//! Cycle-accurate DMG emulator core.
//!
//! The crate models the CPU, MMU, DMA controller and PPU at single-T-cycle
//! granularity. [`GameBoy::tick`] advances the whole machine by one T-cycle;
//! [`GameBoy::run_frame`] runs until the PPU finishes a frame. Cartridges are
//! provided by the host through the [`cartridge::Cartridge`] trait.

pub mod bus;
pub mod cartridge;
pub mod cpu;
pub mod dma;
pub mod gb;
pub mod input;
pub mod interrupt;
pub mod lcd;
pub mod ppu;
pub mod serial;
pub mod sound;
pub mod state;
pub mod timer;

pub use gb::GameBoy;
pub use state::StateError;

/// Fatal guest-level faults. These poison the running session; the host is
/// expected to tear it down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid instruction {opcode:#04x} at {pc:#06x}")]
    InvalidInstruction { pc: u16, opcode: u8 },
}
