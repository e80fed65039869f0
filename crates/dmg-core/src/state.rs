//! Deterministic save states.
//!
//! Layout: 7-byte magic, a version byte, then the components in fixed
//! order (CPU, clock phase, MMU lanes, bus acquirers, interrupts, timers,
//! DMA, PPU, I/O register files, memories), bincode-encoded. Enum-typed
//! state (micro-op pointer, PPU tick/fetcher selectors) serializes as
//! variant ordinals, so the format is portable across builds.
//!
//! The cartridge and the LCD sink are host-owned and never serialized; the
//! boot-ROM lock is deliberately not rolled back by a load.

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::bus::{BusLock, Mmu, HRAM_SIZE, OAM_SIZE, VRAM_SIZE, WRAM_BANK_SIZE};
use crate::cpu::Cpu;
use crate::dma::Dma;
use crate::gb::GameBoy;
use crate::input::Joypad;
use crate::interrupt::Interrupts;
use crate::ppu::{Ppu, VideoRegs};
use crate::serial::Serial;
use crate::sound::Sound;
use crate::timer::Timer;

pub const MAGIC: &[u8; 7] = b"DOCBOY\0";
pub const VERSION: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("bad save-state magic")]
    BadMagic,
    #[error("unsupported save-state version {0}")]
    UnsupportedVersion(u8),
    #[error("corrupted save state: {0}")]
    Corrupted(String),
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    cpu: Cpu,
    phase: u8,
    mmu: Mmu,
    ext_bus: BusLock,
    vram_bus: BusLock,
    oam_bus: BusLock,
    cpu_bus: BusLock,
    interrupts: Interrupts,
    timer: Timer,
    dma: Dma,
    ppu: Ppu,
    video: VideoRegs,
    sound: Sound,
    joypad: Joypad,
    serial: Serial,
    #[serde(with = "BigArray")]
    vram: [u8; VRAM_SIZE],
    #[serde(with = "BigArray")]
    wram1: [u8; WRAM_BANK_SIZE],
    #[serde(with = "BigArray")]
    wram2: [u8; WRAM_BANK_SIZE],
    #[serde(with = "BigArray")]
    oam: [u8; OAM_SIZE],
    #[serde(with = "BigArray")]
    hram: [u8; HRAM_SIZE],
}

impl GameBoy {
    pub fn save_state(&self) -> Vec<u8> {
        let snapshot = Snapshot {
            cpu: self.cpu.clone(),
            phase: self.phase,
            mmu: self.bus.mmu,
            ext_bus: self.bus.ext_bus,
            vram_bus: self.bus.vram_bus,
            oam_bus: self.bus.oam_bus,
            cpu_bus: self.bus.cpu_bus,
            interrupts: self.bus.interrupts,
            timer: self.bus.timer,
            dma: self.bus.dma,
            ppu: self.bus.ppu.clone(),
            video: self.bus.video,
            sound: self.bus.sound,
            joypad: self.bus.joypad,
            serial: self.bus.serial,
            vram: *self.bus.vram,
            wram1: *self.bus.wram1,
            wram2: *self.bus.wram2,
            oam: self.bus.oam,
            hram: self.bus.hram,
        };

        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        bincode::serialize_into(&mut out, &snapshot)
            .expect("serializing a snapshot into memory cannot fail");
        out
    }

    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), StateError> {
        let payload = bytes
            .strip_prefix(MAGIC.as_slice())
            .ok_or(StateError::BadMagic)?;
        let (&version, payload) = payload.split_first().ok_or(StateError::BadMagic)?;
        if version != VERSION {
            return Err(StateError::UnsupportedVersion(version));
        }

        let snapshot: Snapshot =
            bincode::deserialize(payload).map_err(|e| StateError::Corrupted(e.to_string()))?;

        self.cpu = snapshot.cpu;
        self.phase = snapshot.phase;
        self.bus.mmu = snapshot.mmu;
        self.bus.ext_bus = snapshot.ext_bus;
        self.bus.vram_bus = snapshot.vram_bus;
        self.bus.oam_bus = snapshot.oam_bus;
        self.bus.cpu_bus = snapshot.cpu_bus;
        self.bus.interrupts = snapshot.interrupts;
        self.bus.timer = snapshot.timer;
        self.bus.dma = snapshot.dma;
        self.bus.ppu = snapshot.ppu;
        self.bus.video = snapshot.video;
        self.bus.sound = snapshot.sound;
        self.bus.joypad = snapshot.joypad;
        self.bus.serial = snapshot.serial;
        *self.bus.vram = snapshot.vram;
        *self.bus.wram1 = snapshot.wram1;
        *self.bus.wram2 = snapshot.wram2;
        self.bus.oam = snapshot.oam;
        self.bus.hram = snapshot.hram;

        Ok(())
    }
}
