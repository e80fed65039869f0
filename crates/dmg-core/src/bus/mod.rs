#[allow(clippy::module_inception)]
mod bus;
mod lock;
mod mmu;

pub use bus::{
    bus_of, BootRom, Bus, BusKind, BOOT_ROM_SIZE, HRAM_SIZE, OAM_SIZE, VRAM_SIZE, WRAM_BANK_SIZE,
};
pub use lock::{BusLock, Device};
pub use mmu::{Lane, LaneState, Mmu, LANE_CPU, LANE_DMA};
