mod fifo;
#[allow(clippy::module_inception)]
mod ppu;

pub use ppu::{Ppu, PpuBus};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// LCDC (FF40).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Lcdc: u8 {
        const LCD_ENABLE       = 1 << 7;
        const WIN_TILE_MAP     = 1 << 6;
        const WIN_ENABLE       = 1 << 5;
        const BG_WIN_TILE_DATA = 1 << 4;
        const BG_TILE_MAP      = 1 << 3;
        const OBJ_SIZE         = 1 << 2;
        const OBJ_ENABLE       = 1 << 1;
        const BG_WIN_ENABLE    = 1 << 0;
    }
}

bitflags! {
    /// OAM entry attribute byte.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ObjAttrs: u8 {
        const BG_OVER_OBJ = 1 << 7;
        const Y_FLIP      = 1 << 6;
        const X_FLIP      = 1 << 5;
        const PALETTE     = 1 << 4;
    }
}

// STAT (FF41) bits. The low three bits are PPU-owned.
pub const STAT_LYC_INT: u8 = 1 << 6;
pub const STAT_OAM_INT: u8 = 1 << 5;
pub const STAT_VBLANK_INT: u8 = 1 << 4;
pub const STAT_HBLANK_INT: u8 = 1 << 3;
pub const STAT_LYC_EQ_LY: u8 = 1 << 2;

pub const MODE_HBLANK: u8 = 0;
pub const MODE_VBLANK: u8 = 1;
pub const MODE_OAM_SCAN: u8 = 2;
pub const MODE_PIXEL_TRANSFER: u8 = 3;

pub const DOTS_PER_LINE: u16 = 456;
pub const LINES_PER_FRAME: u8 = 154;

/// Video-side I/O registers (FF40-FF4B). Owned by the bus; the PPU reads
/// them live every dot and writes back LY, STAT mode and the coincidence
/// flag.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct VideoRegs {
    pub lcdc: Lcdc,
    pub stat: u8,
    pub scy: u8,
    pub scx: u8,
    pub ly: u8,
    pub lyc: u8,
    pub dma: u8,
    pub bgp: u8,
    pub obp0: u8,
    pub obp1: u8,
    pub wy: u8,
    pub wx: u8,
}

impl VideoRegs {
    pub fn new(booting: bool) -> Self {
        if booting {
            Self {
                lcdc: Lcdc::empty(),
                stat: 0,
                scy: 0,
                scx: 0,
                ly: 0,
                lyc: 0,
                dma: 0xFF,
                bgp: 0,
                obp0: 0,
                obp1: 0,
                wy: 0,
                wx: 0,
            }
        } else {
            // Post-boot: mid way through the trick line 0, mode VBLANK,
            // LYC=LY set.
            Self {
                lcdc: Lcdc::from_bits_retain(0x91),
                stat: 0x05,
                scy: 0,
                scx: 0,
                ly: 0,
                lyc: 0,
                dma: 0xFF,
                bgp: 0xFC,
                obp0: 0xFF,
                obp1: 0xFF,
                wy: 0,
                wx: 0,
            }
        }
    }

    pub fn write_lcdc(&mut self, value: u8) {
        self.lcdc = Lcdc::from_bits_retain(value);
    }
}
