//! Dot-accurate scanline engine.
//!
//! One [`Ppu::tick`] call is one dot (= one T-cycle). The current state is
//! a [`TickSelector`] variant; the fetcher running below pixel transfer is
//! a second FSM ([`FetcherState`]). Both serialize as plain ordinals.

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::bus::{BusLock, Device, OAM_SIZE, VRAM_SIZE};
use crate::interrupt::{Interrupt, Interrupts};
use crate::lcd::Lcd;

use super::fifo::{FillQueue, Queue};
use super::{
    Lcdc, ObjAttrs, VideoRegs, DOTS_PER_LINE, MODE_HBLANK, MODE_OAM_SCAN, MODE_PIXEL_TRANSFER,
    MODE_VBLANK, STAT_HBLANK_INT, STAT_LYC_EQ_LY, STAT_LYC_INT, STAT_OAM_INT, STAT_VBLANK_INT,
};

const DUMMY_PIXEL: u8 = 0xFF;
const OBJ_COLOR_TRANSPARENT: u8 = 0;
const TILE_WIDTH: u8 = 8;

/// Split borrows of everything video-related the PPU touches during a dot.
pub struct PpuBus<'a> {
    pub vram: &'a [u8; VRAM_SIZE],
    pub oam: &'a [u8; OAM_SIZE],
    pub vram_lock: &'a mut BusLock,
    pub oam_lock: &'a mut BusLock,
    pub video: &'a mut VideoRegs,
    pub interrupts: &'a mut Interrupts,
    pub lcd: &'a mut Lcd,
}

/// Per-dot PPU state. Order matters: the serialized ordinal identifies the
/// state in save files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum TickSelector {
    OamScanEven,
    OamScanOdd,
    OamScanDone,
    OamScanAfterTurnOn,
    PixelTransferDummy0,
    PixelTransferDiscard0,
    PixelTransferDiscard0Wx0Scx7,
    PixelTransfer0,
    PixelTransfer8,
    Hblank,
    Hblank453,
    Hblank454,
    Hblank455,
    HblankLastLine,
    HblankLastLine454,
    HblankLastLine455,
    Vblank,
    Vblank454,
    VblankLastLine,
    VblankLastLine2,
    VblankLastLine7,
    VblankLastLine454,
}

/// Fetcher sub-FSM state, one variant per dot-granular stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum FetcherState {
    BgwinGetTile0,
    BgGetTile0,
    BgGetTile1,
    BgGetTileDataLow0,
    BgGetTileDataLow1,
    BgGetTileDataHigh0,
    WinActivating,
    WinGetTile0,
    WinGetTile1,
    WinGetTileDataLow0,
    WinGetTileDataLow1,
    WinGetTileDataHigh0,
    BgwinGetTileDataHigh1,
    BgwinPush,
    ObjGetTile0,
    ObjGetTile1,
    ObjGetTileDataLow0,
    ObjGetTileDataLow1,
    ObjGetTileDataHigh0,
    ObjGetTileDataHigh1AndMerge,
}

#[derive(Clone, Copy, Default, Serialize, Deserialize)]
struct BgPixel {
    color_index: u8,
}

#[derive(Clone, Copy, Default, Serialize, Deserialize)]
struct ObjPixel {
    color_index: u8,
    attributes: u8,
    number: u8,
    x: u8,
}

#[derive(Clone, Copy, Default, Serialize, Deserialize)]
struct OamScanEntry {
    number: u8,
    y: u8,
    x: u8,
}

/// OAM-scan hits waiting to be fetched at one LX column, at most ten per
/// scanline in total.
#[derive(Clone, Copy, Default, Serialize, Deserialize)]
struct OamHits {
    entries: [OamScanEntry; 10],
    len: u8,
}

impl OamHits {
    #[inline]
    fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn is_not_empty(&self) -> bool {
        self.len > 0
    }

    #[inline]
    fn push(&mut self, entry: OamScanEntry) {
        debug_assert!((self.len as usize) < self.entries.len());
        self.entries[self.len as usize] = entry;
        self.len += 1;
    }

    #[inline]
    fn pull_back(&mut self) -> OamScanEntry {
        debug_assert!(self.len > 0);
        self.len -= 1;
        self.entries[self.len as usize]
    }

    #[inline]
    fn clear(&mut self) {
        self.len = 0;
    }
}

#[derive(Clone, Copy, Default, Serialize, Deserialize)]
struct WindowState {
    /// Latched for the whole frame once WIN_ENABLE && LY == WY held.
    active_for_frame: bool,
    /// Window line counter; 0xFF so the first trigger wraps to 0.
    wly: u8,
    active: bool,
    just_activated: bool,
}

#[derive(Clone, Copy, Default, Serialize, Deserialize)]
struct BgWinPrefetch {
    /// Horizontal fetch position, advancing a tile at a time (mod 256).
    lx: u8,
    tilemap_addr: u16,
    /// Tile bytes cached while a sprite fetch interrupts the BG/window
    /// fetch.
    cached: bool,
    cached_low: u8,
    cached_high: u8,
}

#[derive(Clone, Copy, Default, Serialize, Deserialize)]
struct ObjPrefetch {
    entry: OamScanEntry,
    tile_number: u8,
    attributes: u8,
}

#[derive(Clone, Copy, Default, Serialize, Deserialize)]
struct SliceFetch {
    tile_addr: u16,
    low: u8,
    high: u8,
}

fn tile_row_pixels(low: u8, high: u8, flipped: bool) -> [u8; 8] {
    let mut pixels = [0u8; 8];
    for (i, px) in pixels.iter_mut().enumerate() {
        let bit = if flipped { i } else { 7 - i };
        *px = (((high >> bit) & 1) << 1) | ((low >> bit) & 1);
    }
    pixels
}

fn resolve_color(color_index: u8, palette: u8) -> u8 {
    debug_assert!(color_index < 4);
    (palette >> (2 * color_index)) & 0b11
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Ppu {
    tick_selector: TickSelector,
    fetcher_selector: FetcherState,

    on: bool,
    last_stat_irq: bool,
    /// LYC=LY comparison is forced low around line changes.
    enable_lyc_eq_ly_irq: bool,

    dots: u16,
    /// Pixel-pusher position, X + 8.
    lx: u8,

    // Values the pixel pipeline sees with a 1-T-cycle delay.
    last_bgp: u8,
    last_wx: u8,
    last_lcdc: Lcdc,

    bg_fifo: FillQueue<BgPixel>,
    obj_fifo: Queue<ObjPixel>,

    #[serde(with = "BigArray")]
    oam_entries: [OamHits; 168],
    oam_scan_count: u8,

    /// Last word latched from the OAM bus (Y/X during scan, tile/attrs
    /// during an object fetch).
    oam_register: [u8; 2],
    /// Pending OAM word-read offset.
    oam_read_addr: u8,

    fetching_obj: bool,

    /// SCX % 8 alignment pixels still to drop at the start of the line.
    discard_target: u8,
    discarded: u8,

    win: WindowState,
    bwf: BgWinPrefetch,
    /// Window prefetcher's own tilemap X counter.
    wf_tilemap_x: u8,
    of: ObjPrefetch,
    psf: SliceFetch,

    frame_ready: bool,
}

impl Ppu {
    pub fn new(booting: bool) -> Self {
        Self {
            // Without a boot ROM the PPU comes up near the end of the
            // glitched line 0, matching hardware at PC=0100.
            tick_selector: if booting {
                TickSelector::OamScanEven
            } else {
                TickSelector::VblankLastLine7
            },
            fetcher_selector: FetcherState::BgGetTile0,
            on: true,
            last_stat_irq: false,
            enable_lyc_eq_ly_irq: true,
            dots: if booting { 0 } else { 395 },
            lx: 0,
            last_bgp: if booting { 0 } else { 0xFC },
            last_wx: 0,
            last_lcdc: if booting {
                Lcdc::empty()
            } else {
                Lcdc::from_bits_retain(0x91)
            },
            bg_fifo: FillQueue::new(),
            obj_fifo: Queue::new(),
            oam_entries: [OamHits::default(); 168],
            oam_scan_count: 0,
            oam_register: [0; 2],
            oam_read_addr: 0,
            fetching_obj: false,
            discard_target: 0,
            discarded: 0,
            win: WindowState {
                active_for_frame: false,
                wly: u8::MAX,
                active: false,
                just_activated: false,
            },
            bwf: BgWinPrefetch::default(),
            wf_tilemap_x: 0,
            of: ObjPrefetch::default(),
            psf: SliceFetch::default(),
            frame_ready: false,
        }
    }

    #[inline]
    pub fn frame_ready(&self) -> bool {
        self.frame_ready
    }

    pub fn clear_frame_ready(&mut self) {
        self.frame_ready = false;
    }

    #[inline]
    pub fn dots(&self) -> u16 {
        self.dots
    }

    #[inline]
    pub fn lx(&self) -> u8 {
        self.lx
    }

    /// Advance by one dot.
    pub fn tick(&mut self, ctx: &mut PpuBus) {
        if self.on {
            if !ctx.video.lcdc.contains(Lcdc::LCD_ENABLE) {
                self.turn_off(ctx);
                return;
            }
        } else if ctx.video.lcdc.contains(Lcdc::LCD_ENABLE) {
            self.turn_on(ctx);
        } else {
            return;
        }

        match self.tick_selector {
            TickSelector::OamScanEven => self.oam_scan_even(ctx),
            TickSelector::OamScanOdd => self.oam_scan_odd(ctx),
            TickSelector::OamScanDone => self.oam_scan_done(ctx),
            TickSelector::OamScanAfterTurnOn => self.oam_scan_after_turn_on(ctx),
            TickSelector::PixelTransferDummy0 => self.pixel_transfer_dummy0(ctx),
            TickSelector::PixelTransferDiscard0 => self.pixel_transfer_discard0(ctx),
            TickSelector::PixelTransferDiscard0Wx0Scx7 => {
                self.pixel_transfer_discard0_wx0_scx7(ctx)
            }
            TickSelector::PixelTransfer0 => self.pixel_transfer_0(ctx),
            TickSelector::PixelTransfer8 => self.pixel_transfer_8(ctx),
            TickSelector::Hblank => self.hblank(ctx),
            TickSelector::Hblank453 => self.hblank_453(ctx),
            TickSelector::Hblank454 => self.hblank_454(ctx),
            TickSelector::Hblank455 => self.hblank_455(ctx),
            TickSelector::HblankLastLine => self.hblank_last_line(ctx),
            TickSelector::HblankLastLine454 => self.hblank_last_line_454(ctx),
            TickSelector::HblankLastLine455 => self.hblank_last_line_455(ctx),
            TickSelector::Vblank => self.vblank(ctx),
            TickSelector::Vblank454 => self.vblank_454(ctx),
            TickSelector::VblankLastLine => self.vblank_last_line(ctx),
            TickSelector::VblankLastLine2 => self.vblank_last_line_2(ctx),
            TickSelector::VblankLastLine7 => self.vblank_last_line_7(ctx),
            TickSelector::VblankLastLine454 => self.vblank_last_line_454(ctx),
        }

        // The pixel pipeline sees BGP, WX and LCDC with a 1-T-cycle delay:
        // keep the previous values around for the mixer and the window
        // activation check.
        self.last_bgp = ctx.video.bgp;
        self.last_wx = ctx.video.wx;
        self.last_lcdc = ctx.video.lcdc;

        self.tick_stat(ctx);
        self.tick_window(ctx);

        debug_assert!(self.dots < DOTS_PER_LINE);
    }

    // ------- helpers -------

    fn turn_on(&mut self, ctx: &mut PpuBus) {
        debug_assert!(!self.on);
        debug_assert_eq!(ctx.video.ly, 0);
        self.on = true;

        // The coincidence flag is updated right away, without an IRQ.
        let lyc_eq_ly = self.is_lyc_eq_ly(ctx.video);
        ctx.video.stat = (ctx.video.stat & !STAT_LYC_EQ_LY)
            | if lyc_eq_ly { STAT_LYC_EQ_LY } else { 0 };
    }

    fn turn_off(&mut self, ctx: &mut PpuBus) {
        debug_assert!(self.on);
        self.on = false;
        self.dots = 0;
        ctx.video.ly = 0;
        ctx.lcd.reset_cursor();

        for hits in self.oam_entries.iter_mut() {
            hits.clear();
        }
        self.reset_fetcher();

        // The first line after re-enable skips the OAM scan entirely and
        // reports HBLANK while doing so.
        self.tick_selector = TickSelector::OamScanAfterTurnOn;
        self.update_mode(ctx.video, MODE_HBLANK);

        ctx.vram_lock.release(Device::Ppu);
        ctx.oam_lock.release(Device::Ppu);
    }

    fn is_lyc_eq_ly(&self, video: &VideoRegs) -> bool {
        video.lyc == video.ly && self.enable_lyc_eq_ly_irq
    }

    fn tick_stat(&mut self, ctx: &mut PpuBus) {
        // The STAT line is re-evaluated every dot; the interrupt fires only
        // on its rising edge. OAM mode is the exception, sampled solely at
        // mode transitions (see update_stat_irq_for_oam_mode).
        let lyc_eq_ly = self.is_lyc_eq_ly(ctx.video);
        let stat = ctx.video.stat;
        let mode = stat & 0b11;

        let lyc_irq = stat & STAT_LYC_INT != 0 && lyc_eq_ly;
        let hblank_irq = stat & STAT_HBLANK_INT != 0 && mode == MODE_HBLANK;
        let vblank_irq =
            (stat & STAT_VBLANK_INT != 0 || stat & STAT_OAM_INT != 0) && mode == MODE_VBLANK;

        self.update_stat_irq(ctx.interrupts, lyc_irq || hblank_irq || vblank_irq);

        ctx.video.stat =
            (ctx.video.stat & !STAT_LYC_EQ_LY) | if lyc_eq_ly { STAT_LYC_EQ_LY } else { 0 };
    }

    fn update_stat_irq(&mut self, interrupts: &mut Interrupts, irq: bool) {
        if irq && !self.last_stat_irq {
            interrupts.raise(Interrupt::Stat);
        }
        self.last_stat_irq = irq;
    }

    fn update_stat_irq_for_oam_mode(&mut self, ctx: &mut PpuBus) {
        // A pending LYC=LY level keeps the line high through the transition.
        let lyc_irq = ctx.video.stat & STAT_LYC_INT != 0 && self.is_lyc_eq_ly(ctx.video);
        let irq = ctx.video.stat & STAT_OAM_INT != 0 || lyc_irq;
        self.update_stat_irq(ctx.interrupts, irq);
    }

    fn tick_window(&mut self, ctx: &PpuBus) {
        // Once WIN_ENABLE && LY == WY has held at any dot, the window stays
        // armed for the rest of the frame; WX is re-checked per pixel.
        self.win.active_for_frame |=
            ctx.video.lcdc.contains(Lcdc::WIN_ENABLE) && ctx.video.ly == ctx.video.wy;
    }

    fn update_mode(&self, video: &mut VideoRegs, mode: u8) {
        debug_assert!(mode <= 0b11);
        video.stat = (video.stat & 0b1111_1100) | mode;
    }

    // ------- OAM scan -------

    fn oam_scan_even(&mut self, ctx: &mut PpuBus) {
        debug_assert!(self.dots % 2 == 0);
        debug_assert!(self.oam_scan_count < 10);

        // The PPU cannot see OAM while a DMA transfer holds the bus: the
        // latched word simply keeps its previous value.
        if !ctx.oam_lock.is_acquired_by(Device::Dma) {
            self.flush_oam_word(ctx.oam);
        }

        self.tick_selector = TickSelector::OamScanOdd;
        self.dots += 1;
    }

    fn oam_scan_odd(&mut self, ctx: &mut PpuBus) {
        debug_assert!(self.dots % 2 == 1);
        debug_assert!(self.oam_scan_count < 10);

        let obj_height: i32 = if ctx.video.lcdc.contains(Lcdc::OBJ_SIZE) {
            16
        } else {
            8
        };

        let ly = ctx.video.ly as i32;
        let entry_y = self.oam_register[0];
        let obj_y = entry_y as i32 - 16;

        if obj_y <= ly && ly < obj_y + obj_height {
            let entry_x = self.oam_register[1];
            if entry_x < 168 {
                self.oam_entries[entry_x as usize].push(OamScanEntry {
                    number: (self.dots / 2) as u8,
                    y: entry_y,
                    x: entry_x,
                });
            }
            self.oam_scan_count += 1;
        }

        self.dots += 1;

        self.handle_oam_scan_bus_oddities(ctx);

        if self.dots == 80 {
            self.enter_pixel_transfer(ctx);
        } else if self.oam_scan_count == 10 {
            // Scanline quota reached: idle until dot 80.
            self.tick_selector = TickSelector::OamScanDone;
        } else {
            // Post the read for the next entry so the word is ready at the
            // next even dot.
            self.oam_read_addr = (4 * (self.dots / 2)) as u8;
            self.tick_selector = TickSelector::OamScanEven;
        }
    }

    fn oam_scan_done(&mut self, ctx: &mut PpuBus) {
        debug_assert_eq!(self.oam_scan_count, 10);
        self.dots += 1;
        self.handle_oam_scan_bus_oddities(ctx);
        if self.dots == 80 {
            self.enter_pixel_transfer(ctx);
        }
    }

    fn oam_scan_after_turn_on(&mut self, ctx: &mut PpuBus) {
        debug_assert!(!ctx.oam_lock.is_acquired_by(Device::Ppu));
        self.dots += 1;
        if self.dots == 80 {
            self.enter_pixel_transfer(ctx);
        }
    }

    fn flush_oam_word(&mut self, oam: &[u8; OAM_SIZE]) {
        let addr = self.oam_read_addr as usize;
        self.oam_register = [oam[addr], oam[addr + 1]];
    }

    fn handle_oam_scan_bus_oddities(&mut self, ctx: &mut PpuBus) {
        if self.dots == 76 {
            // The OAM bus is released (writes land) for exactly this cycle.
            ctx.oam_lock.release(Device::Ppu);
        } else if self.dots == 78 {
            // Re-acquired here, together with VRAM one cycle before STAT
            // reports pixel transfer.
            ctx.oam_lock.acquire(Device::Ppu);
            ctx.vram_lock.acquire(Device::Ppu);
        }
    }

    fn enter_oam_scan(&mut self, ctx: &mut PpuBus) {
        self.oam_scan_count = 0;
        self.tick_selector = TickSelector::OamScanEven;
        self.update_mode(ctx.video, MODE_OAM_SCAN);

        debug_assert!(!ctx.vram_lock.is_acquired_by(Device::Ppu));
        ctx.oam_lock.acquire(Device::Ppu);

        // Read request for the first OAM entry.
        self.oam_read_addr = 0;
    }

    // ------- pixel transfer -------

    fn enter_pixel_transfer(&mut self, ctx: &mut PpuBus) {
        debug_assert_eq!(self.dots, 80);
        debug_assert!(ctx.video.ly < 144);

        self.reset_fetcher();
        self.tick_selector = TickSelector::PixelTransferDummy0;
        self.update_mode(ctx.video, MODE_PIXEL_TRANSFER);

        ctx.vram_lock.acquire(Device::Ppu);
        ctx.oam_lock.acquire(Device::Ppu);
    }

    fn pixel_transfer_dummy0(&mut self, ctx: &mut PpuBus) {
        debug_assert_eq!(self.lx, 0);
        debug_assert!(!self.win.active);

        self.dots += 1;
        if self.dots == 83 {
            // The first tile fetch only exists to make the SCX % 8
            // alignment possible; its pixels never reach the LCD.
            self.bg_fifo.fill(&[BgPixel {
                color_index: DUMMY_PIXEL,
            }; 8]);

            // SCX is sampled here, not at the start of pixel transfer.
            self.discard_target = ctx.video.scx % 8;

            if self.discard_target > 0 {
                self.discarded = 0;

                // With SCX % 8 > 0 the window can activate before any BG
                // pixel is popped.
                self.check_window_activation(ctx);

                // WX=0 with SCX=7 shifts the window by 6, not 7; a single
                // dummy refill compensates.
                self.tick_selector = if self.win.active && self.discard_target == 7 {
                    TickSelector::PixelTransferDiscard0Wx0Scx7
                } else {
                    TickSelector::PixelTransferDiscard0
                };
            } else {
                self.tick_selector = TickSelector::PixelTransfer0;
            }
        }
    }

    fn pixel_transfer_discard0(&mut self, ctx: &mut PpuBus) {
        debug_assert_eq!(self.lx, 0);
        debug_assert!(self.discarded < self.discard_target);

        // The first SCX % 8 pixels are dropped without advancing LX, which
        // is what keeps OBJ aligned with the scrolled BG.
        if self.is_bg_fifo_ready_to_pop(ctx.video) {
            self.bg_fifo.pop_front();
            self.discarded += 1;
            if self.discarded == self.discard_target {
                self.tick_selector = TickSelector::PixelTransfer0;
            }
        }

        self.tick_fetcher(ctx);
        self.dots += 1;
    }

    fn pixel_transfer_discard0_wx0_scx7(&mut self, ctx: &mut PpuBus) {
        debug_assert_eq!(self.discard_target, 7);
        debug_assert!(self.win.active);

        self.pixel_transfer_discard0(ctx);

        if self.discarded == 1 {
            self.bg_fifo.push_back(BgPixel {
                color_index: DUMMY_PIXEL,
            });
            self.tick_selector = TickSelector::PixelTransferDiscard0;
        }
    }

    fn pixel_transfer_0(&mut self, ctx: &mut PpuBus) {
        debug_assert!(self.lx < 8);

        let mut inc_lx = false;

        // For LX in [0, 8) pixels are popped but never shown.
        if self.is_bg_fifo_ready_to_pop(ctx.video) {
            self.bg_fifo.pop_front();
            if self.obj_fifo.is_not_empty() {
                self.obj_fifo.pop_front();
            }

            inc_lx = true;
            if self.lx + 1 == 8 {
                self.tick_selector = TickSelector::PixelTransfer8;
            }
            self.check_window_activation(ctx);
        }

        self.tick_fetcher(ctx);

        if inc_lx {
            self.increase_lx();
        }
        self.dots += 1;
    }

    fn pixel_transfer_8(&mut self, ctx: &mut PpuBus) {
        debug_assert!(self.lx >= 8);

        let mut inc_lx = false;

        if self.is_bg_fifo_ready_to_pop(ctx.video) {
            const NO_COLOR: u8 = 4;
            let mut color = NO_COLOR;

            let bg_pixel = self.bg_fifo.pop_front();

            // OBJ_ENABLE and BG_WIN_ENABLE act with a 1-T-cycle delay,
            // except at the very first visible pixel.
            let lcdc = if self.lx == 8 {
                ctx.video.lcdc
            } else {
                self.last_lcdc
            };

            if self.obj_fifo.is_not_empty() {
                let obj_pixel = self.obj_fifo.pop_front();
                let attrs = ObjAttrs::from_bits_retain(obj_pixel.attributes);

                if lcdc.contains(Lcdc::OBJ_ENABLE)
                    && obj_pixel.color_index != OBJ_COLOR_TRANSPARENT
                    && (!attrs.contains(ObjAttrs::BG_OVER_OBJ) || bg_pixel.color_index == 0)
                {
                    let palette = if attrs.contains(ObjAttrs::PALETTE) {
                        ctx.video.obp1
                    } else {
                        ctx.video.obp0
                    };
                    color = resolve_color(obj_pixel.color_index, palette);
                }
            }

            if color == NO_COLOR {
                // For one T-cycle after a BGP write the PPU sees the old
                // and the new value ORed together.
                let bgp = ctx.video.bgp | self.last_bgp;
                color = if lcdc.contains(Lcdc::BG_WIN_ENABLE) {
                    resolve_color(bg_pixel.color_index, bgp)
                } else {
                    0
                };
            }

            ctx.lcd.push_pixel(color);

            inc_lx = true;
            if self.lx + 1 == 168 {
                self.increase_lx();
                self.dots += 1;
                self.enter_hblank(ctx);
                return;
            }

            self.check_window_activation(ctx);
        }

        self.tick_fetcher(ctx);

        if inc_lx {
            self.increase_lx();
        }
        self.dots += 1;
    }

    fn increase_lx(&mut self) {
        // Hits never served at this column are dropped.
        self.oam_entries[self.lx as usize].clear();
        self.lx += 1;
    }

    fn is_bg_fifo_ready_to_pop(&self, video: &VideoRegs) -> bool {
        self.bg_fifo.is_not_empty()
            && !self.fetching_obj
            && (self.oam_entries[self.lx as usize].is_empty()
                || !video.lcdc.contains(Lcdc::OBJ_ENABLE))
    }

    fn is_obj_ready_to_be_fetched(&self, video: &VideoRegs) -> bool {
        self.oam_entries[self.lx as usize].is_not_empty()
            && video.lcdc.contains(Lcdc::OBJ_ENABLE)
    }

    fn check_window_activation(&mut self, ctx: &PpuBus) {
        // A window that was switched on exactly one dot late (LX == WX + 1)
        // still triggers.
        if self.win.active_for_frame
            && !self.win.active
            && ctx.video.lcdc.contains(Lcdc::WIN_ENABLE)
            && (self.lx == self.last_wx
                || (self.lx == self.last_wx.wrapping_add(1)
                    && !self.last_lcdc.contains(Lcdc::WIN_ENABLE)))
        {
            self.setup_fetcher_for_window();
        }
    }

    fn setup_fetcher_for_window(&mut self) {
        debug_assert!(!self.win.active);

        self.win.active = true;
        self.win.just_activated = true;
        self.win.wly = self.win.wly.wrapping_add(1);

        self.wf_tilemap_x = 0;
        self.bg_fifo.clear();
        self.fetcher_selector = FetcherState::WinActivating;
    }

    // ------- hblank -------

    fn enter_hblank(&mut self, ctx: &mut PpuBus) {
        debug_assert_eq!(self.lx, 168);
        self.tick_selector = if ctx.video.ly == 143 {
            TickSelector::HblankLastLine
        } else {
            TickSelector::Hblank
        };
        self.update_mode(ctx.video, MODE_HBLANK);

        ctx.vram_lock.release(Device::Ppu);
        ctx.oam_lock.release(Device::Ppu);
    }

    fn hblank(&mut self, ctx: &mut PpuBus) {
        self.dots += 1;
        if self.dots == 453 {
            self.update_stat_irq_for_oam_mode(ctx);
            self.tick_selector = TickSelector::Hblank453;
        }
    }

    fn hblank_453(&mut self, ctx: &mut PpuBus) {
        debug_assert_eq!(self.dots, 453);
        self.dots += 1;

        ctx.video.ly += 1;
        // LYC=LY is gated off for dot 454.
        self.enable_lyc_eq_ly_irq = false;

        self.tick_selector = TickSelector::Hblank454;
        ctx.oam_lock.acquire(Device::Ppu);
    }

    fn hblank_454(&mut self, _ctx: &mut PpuBus) {
        debug_assert_eq!(self.dots, 454);
        self.dots += 1;
        self.enable_lyc_eq_ly_irq = true;
        self.tick_selector = TickSelector::Hblank455;
    }

    fn hblank_455(&mut self, ctx: &mut PpuBus) {
        debug_assert_eq!(self.dots, 455);
        self.dots = 0;
        self.enter_oam_scan(ctx);
    }

    fn hblank_last_line(&mut self, ctx: &mut PpuBus) {
        debug_assert_eq!(ctx.video.ly, 143);
        self.dots += 1;
        if self.dots == 454 {
            ctx.video.ly += 1;
            self.enable_lyc_eq_ly_irq = false;
            self.tick_selector = TickSelector::HblankLastLine454;
        }
    }

    fn hblank_last_line_454(&mut self, ctx: &mut PpuBus) {
        debug_assert_eq!(self.dots, 454);
        self.dots += 1;
        self.enable_lyc_eq_ly_irq = true;
        self.tick_selector = TickSelector::HblankLastLine455;

        // STAT reports VBLANK one dot before the line ends.
        self.update_mode(ctx.video, MODE_VBLANK);
    }

    fn hblank_last_line_455(&mut self, ctx: &mut PpuBus) {
        debug_assert_eq!(self.dots, 455);
        self.dots = 0;
        self.enter_vblank(ctx);
    }

    // ------- vblank -------

    fn enter_vblank(&mut self, ctx: &mut PpuBus) {
        self.tick_selector = TickSelector::Vblank;
        debug_assert_eq!(ctx.video.stat & 0b11, MODE_VBLANK);

        ctx.interrupts.raise(Interrupt::VBlank);
        self.frame_ready = true;

        debug_assert!(!ctx.vram_lock.is_acquired_by(Device::Ppu));
        debug_assert!(!ctx.oam_lock.is_acquired_by(Device::Ppu));
    }

    fn vblank(&mut self, ctx: &mut PpuBus) {
        debug_assert!(ctx.video.ly >= 144 && ctx.video.ly < 154);
        self.dots += 1;
        if self.dots == 454 {
            ctx.video.ly += 1;
            self.enable_lyc_eq_ly_irq = false;
            self.tick_selector = TickSelector::Vblank454;
        }
    }

    fn vblank_454(&mut self, ctx: &mut PpuBus) {
        self.dots += 1;
        if self.dots == 455 {
            self.enable_lyc_eq_ly_irq = true;
        } else if self.dots == 456 {
            self.dots = 0;
            self.tick_selector = if ctx.video.ly == 153 {
                TickSelector::VblankLastLine
            } else {
                TickSelector::Vblank
            };
        }
    }

    fn vblank_last_line(&mut self, ctx: &mut PpuBus) {
        debug_assert_eq!(ctx.video.ly, 153);
        self.dots += 1;
        if self.dots == 2 {
            // LY reads back 0 for the rest of the line, but LYC=LY stays
            // masked for a few dots.
            ctx.video.ly = 0;
            self.enable_lyc_eq_ly_irq = false;
            self.tick_selector = TickSelector::VblankLastLine2;
        }
    }

    fn vblank_last_line_2(&mut self, ctx: &mut PpuBus) {
        debug_assert_eq!(ctx.video.ly, 0);
        self.dots += 1;
        if self.dots == 7 {
            self.enable_lyc_eq_ly_irq = true;
            self.tick_selector = TickSelector::VblankLastLine7;
        }
    }

    fn vblank_last_line_7(&mut self, ctx: &mut PpuBus) {
        debug_assert_eq!(ctx.video.ly, 0);
        self.dots += 1;
        if self.dots == 454 {
            self.update_mode(ctx.video, MODE_HBLANK);
            self.tick_selector = TickSelector::VblankLastLine454;
        }
    }

    fn vblank_last_line_454(&mut self, ctx: &mut PpuBus) {
        self.dots += 1;
        if self.dots == 456 {
            self.dots = 0;
            self.enter_new_frame(ctx);
        }
    }

    fn enter_new_frame(&mut self, ctx: &mut PpuBus) {
        // WLY wraps to 0 on the first trigger of the new frame.
        self.win.wly = u8::MAX;
        self.win.active_for_frame = false;

        self.enter_oam_scan(ctx);
        self.update_stat_irq_for_oam_mode(ctx);
    }

    // ------- fetcher -------

    fn tick_fetcher(&mut self, ctx: &mut PpuBus) {
        match self.fetcher_selector {
            FetcherState::BgwinGetTile0 => self.bgwin_get_tile0(ctx),
            FetcherState::BgGetTile0 => self.bg_get_tile0(ctx),
            FetcherState::BgGetTile1 => self.bg_get_tile1(ctx),
            FetcherState::BgGetTileDataLow0 => self.bg_get_tile_data_low0(ctx),
            FetcherState::BgGetTileDataLow1 => self.bg_get_tile_data_low1(ctx),
            FetcherState::BgGetTileDataHigh0 => self.bg_get_tile_data_high0(ctx),
            FetcherState::WinActivating => self.win_activating(ctx),
            FetcherState::WinGetTile0 => self.win_get_tile0(ctx),
            FetcherState::WinGetTile1 => self.win_get_tile1(ctx),
            FetcherState::WinGetTileDataLow0 => self.win_get_tile_data_low0(ctx),
            FetcherState::WinGetTileDataLow1 => self.win_get_tile_data_low1(ctx),
            FetcherState::WinGetTileDataHigh0 => self.win_get_tile_data_high0(ctx),
            FetcherState::BgwinGetTileDataHigh1 => self.bgwin_get_tile_data_high1(ctx),
            FetcherState::BgwinPush => self.bgwin_push(ctx),
            FetcherState::ObjGetTile0 => self.obj_get_tile0(ctx),
            FetcherState::ObjGetTile1 => self.obj_get_tile1(ctx),
            FetcherState::ObjGetTileDataLow0 => self.obj_get_tile_data_low0(ctx),
            FetcherState::ObjGetTileDataLow1 => self.obj_get_tile_data_low1(ctx),
            FetcherState::ObjGetTileDataHigh0 => self.obj_get_tile_data_high0(ctx),
            FetcherState::ObjGetTileDataHigh1AndMerge => {
                self.obj_get_tile_data_high1_and_merge(ctx)
            }
        }
    }

    fn reset_fetcher(&mut self) {
        self.lx = 0;
        self.bg_fifo.clear();
        self.obj_fifo.clear();
        self.fetching_obj = false;
        self.win.active = false;
        self.win.just_activated = false;
        self.bwf.lx = 0;
        self.bwf.cached = false;
        self.wf_tilemap_x = 0;
        self.fetcher_selector = FetcherState::BgwinGetTile0;
    }

    fn bgwin_get_tile0(&mut self, ctx: &mut PpuBus) {
        debug_assert!(!self.fetching_obj);

        if self.win.active {
            if ctx.video.lcdc.contains(Lcdc::WIN_ENABLE) {
                self.win_get_tile0(ctx);
                return;
            }
            // Window switched off mid-streak: fall back to BG fetching.
            self.win.active = false;
        }

        self.bg_get_tile0(ctx);
    }

    fn bg_get_tile0(&mut self, ctx: &mut PpuBus) {
        // Only the tilemap cell address is fixed here; the tile data
        // address is recomputed at the actual VRAM reads, so late SCY or
        // tile-data-select writes desync the bitplanes realistically.
        self.setup_bg_tilemap_addr(ctx.video);
        self.fetcher_selector = FetcherState::BgGetTile1;
    }

    fn bg_get_tile1(&mut self, _ctx: &mut PpuBus) {
        self.fetcher_selector = FetcherState::BgGetTileDataLow0;
    }

    fn bg_get_tile_data_low0(&mut self, ctx: &mut PpuBus) {
        self.setup_bg_tile_data_addr(ctx);
        self.psf.low = ctx.vram[self.psf.tile_addr as usize];
        self.fetcher_selector = FetcherState::BgGetTileDataLow1;
    }

    fn bg_get_tile_data_low1(&mut self, _ctx: &mut PpuBus) {
        self.fetcher_selector = FetcherState::BgGetTileDataHigh0;
    }

    fn bg_get_tile_data_high0(&mut self, ctx: &mut PpuBus) {
        self.setup_bg_tile_data_addr(ctx);
        self.psf.high = ctx.vram[self.psf.tile_addr as usize + 1];
        self.fetcher_selector = FetcherState::BgwinGetTileDataHigh1;
    }

    fn win_activating(&mut self, _ctx: &mut PpuBus) {
        debug_assert!(self.win.active && self.win.just_activated);
        // The activation dot is wasted; the first window tile then pushes
        // straight from GetTileDataHigh1, so a window trigger still costs
        // six dots in total.
        self.fetcher_selector = FetcherState::WinGetTile0;
    }

    fn win_get_tile0(&mut self, ctx: &mut PpuBus) {
        debug_assert!(self.win.active_for_frame && self.win.active);

        if !ctx.video.lcdc.contains(Lcdc::WIN_ENABLE) {
            self.bg_get_tile0(ctx);
        } else {
            self.setup_win_tilemap_addr(ctx.video);
            self.fetcher_selector = FetcherState::WinGetTile1;
        }

        if self.win.just_activated {
            // The window activation rewinds the BG prefetcher by one tile.
            self.bwf.lx = self.bwf.lx.wrapping_sub(TILE_WIDTH);
        }
    }

    fn win_get_tile1(&mut self, ctx: &mut PpuBus) {
        if !ctx.video.lcdc.contains(Lcdc::WIN_ENABLE) {
            self.bg_get_tile1(ctx);
            return;
        }
        self.fetcher_selector = FetcherState::WinGetTileDataLow0;
    }

    fn win_get_tile_data_low0(&mut self, ctx: &mut PpuBus) {
        if !ctx.video.lcdc.contains(Lcdc::WIN_ENABLE) {
            self.bg_get_tile_data_low0(ctx);
            return;
        }
        self.setup_win_tile_data_addr(ctx);
        self.psf.low = ctx.vram[self.psf.tile_addr as usize];
        self.fetcher_selector = FetcherState::WinGetTileDataLow1;
    }

    fn win_get_tile_data_low1(&mut self, ctx: &mut PpuBus) {
        if !ctx.video.lcdc.contains(Lcdc::WIN_ENABLE) {
            self.bg_get_tile_data_low1(ctx);
            return;
        }
        self.fetcher_selector = FetcherState::WinGetTileDataHigh0;
    }

    fn win_get_tile_data_high0(&mut self, ctx: &mut PpuBus) {
        if !ctx.video.lcdc.contains(Lcdc::WIN_ENABLE) {
            self.bg_get_tile_data_high0(ctx);
            return;
        }
        self.setup_win_tile_data_addr(ctx);
        self.psf.high = ctx.vram[self.psf.tile_addr as usize + 1];
        self.fetcher_selector = FetcherState::BgwinGetTileDataHigh1;
    }

    fn bgwin_get_tile_data_high1(&mut self, ctx: &mut PpuBus) {
        debug_assert!(!self.fetching_obj);

        // The BG tile counter advances here and only here; a window or
        // sprite abort before this step repeats the same tile.
        self.bwf.lx = self.bwf.lx.wrapping_add(TILE_WIDTH);

        if self.is_obj_ready_to_be_fetched(ctx.video) && self.bg_fifo.is_not_empty() {
            // Keep the fetched tile for after the sprite; the first obj
            // prefetcher dot overlaps this one.
            self.cache_bgwin_fetch();
            self.fetching_obj = true;
            self.of.entry = self.oam_entries[self.lx as usize].pull_back();
            self.obj_get_tile0(ctx);
            return;
        }

        if self.win.just_activated {
            // First fetch of a window streak pushes immediately.
            debug_assert!(self.bg_fifo.is_empty());
            self.bgwin_push(ctx);
            self.win.just_activated = false;
        } else {
            self.fetcher_selector = FetcherState::BgwinPush;
        }
    }

    fn bgwin_push(&mut self, ctx: &mut PpuBus) {
        debug_assert!(!self.fetching_obj);

        let can_push = self.bg_fifo.is_empty();
        if can_push {
            // Armed-window glitch: a push landing exactly at LX == WX emits
            // a single 00 pixel and postpones the tile by one dot.
            if self.win.active_for_frame && self.lx == self.last_wx && self.lx > 8 {
                self.bg_fifo.push_back(BgPixel { color_index: 0 });
                return;
            }

            let pixels = tile_row_pixels(self.psf.low, self.psf.high, false);
            let mut row = [BgPixel::default(); 8];
            for (dst, px) in row.iter_mut().zip(pixels) {
                dst.color_index = px;
            }
            self.bg_fifo.fill(&row);

            self.fetcher_selector = FetcherState::BgwinGetTile0;

            // Sprite fetches are ignored right after a window tile push.
            if self.win.active {
                return;
            }
        }

        if self.is_obj_ready_to_be_fetched(ctx.video) {
            if !can_push {
                self.cache_bgwin_fetch();
            }
            self.fetching_obj = true;
            self.of.entry = self.oam_entries[self.lx as usize].pull_back();
            self.obj_get_tile0(ctx);
        }
    }

    fn obj_get_tile0(&mut self, _ctx: &mut PpuBus) {
        debug_assert!(self.fetching_obj);
        // Post the OAM word read for the entry's tile number + attributes.
        self.oam_read_addr = 4 * self.of.entry.number + 2;
        self.fetcher_selector = FetcherState::ObjGetTile1;
    }

    fn obj_get_tile1(&mut self, ctx: &mut PpuBus) {
        debug_assert!(self.fetching_obj);
        // No DMA guard here: a running transfer can corrupt what the
        // prefetcher sees, just like on hardware.
        self.flush_oam_word(ctx.oam);
        self.of.tile_number = self.oam_register[0];
        self.of.attributes = self.oam_register[1];
        self.fetcher_selector = FetcherState::ObjGetTileDataLow0;
    }

    fn obj_get_tile_data_low0(&mut self, _ctx: &mut PpuBus) {
        debug_assert!(self.fetching_obj);
        self.fetcher_selector = FetcherState::ObjGetTileDataLow1;
    }

    fn obj_get_tile_data_low1(&mut self, ctx: &mut PpuBus) {
        debug_assert!(self.fetching_obj);
        // The tile data address is recomputed at both VRAM reads, so an
        // OBJ_SIZE change in between desyncs the bitplanes.
        self.setup_obj_tile_data_addr(ctx.video);
        self.psf.low = ctx.vram[self.psf.tile_addr as usize];
        self.fetcher_selector = FetcherState::ObjGetTileDataHigh0;
    }

    fn obj_get_tile_data_high0(&mut self, _ctx: &mut PpuBus) {
        debug_assert!(self.fetching_obj);
        self.fetcher_selector = FetcherState::ObjGetTileDataHigh1AndMerge;
    }

    fn obj_get_tile_data_high1_and_merge(&mut self, ctx: &mut PpuBus) {
        debug_assert!(self.fetching_obj);
        debug_assert_eq!(self.of.entry.x, self.lx);

        self.setup_obj_tile_data_addr(ctx.video);
        self.psf.high = ctx.vram[self.psf.tile_addr as usize + 1];

        let attrs = ObjAttrs::from_bits_retain(self.of.attributes);
        let colors = tile_row_pixels(self.psf.low, self.psf.high, attrs.contains(ObjAttrs::X_FLIP));

        // Sprite-to-sprite priority: the lower X wins; on equal X the lower
        // OAM number wins. Slots past the current FIFO size are appended.
        let fifo_size = self.obj_fifo.len();
        for (i, color_index) in colors.into_iter().enumerate() {
            let pixel = ObjPixel {
                color_index,
                attributes: self.of.attributes,
                number: self.of.entry.number,
                x: self.lx,
            };
            if (i as u8) < fifo_size {
                let current = self.obj_fifo.get(i as u8);
                let new_opaque = pixel.color_index != OBJ_COLOR_TRANSPARENT;
                let cur_opaque = current.color_index != OBJ_COLOR_TRANSPARENT;
                let wins_priority = pixel.x < current.x
                    || (pixel.x == current.x && pixel.number < current.number);
                if (new_opaque && !cur_opaque) || (new_opaque && cur_opaque && wins_priority) {
                    self.obj_fifo.set(i as u8, pixel);
                }
            } else {
                self.obj_fifo.push_back(pixel);
            }
        }
        debug_assert!(self.obj_fifo.is_full());

        if self.is_obj_ready_to_be_fetched(ctx.video) {
            // More hits on this column: fetch the next sprite.
            self.of.entry = self.oam_entries[self.lx as usize].pull_back();
            self.fetcher_selector = FetcherState::ObjGetTile0;
        } else {
            self.fetching_obj = false;
            if self.bwf.cached {
                self.restore_bgwin_fetch();
                self.fetcher_selector = FetcherState::BgwinPush;
            } else {
                self.fetcher_selector = FetcherState::BgwinGetTile0;
            }
        }
    }

    // ------- fetcher address helpers -------

    fn setup_bg_tilemap_addr(&mut self, video: &VideoRegs) {
        let tilemap_x = ((self.bwf.lx as u16 + video.scx as u16) / 8) % 32;
        let tilemap_y = ((video.ly as u16 + video.scy as u16) / 8) % 32;
        let base: u16 = if video.lcdc.contains(Lcdc::BG_TILE_MAP) {
            0x1C00
        } else {
            0x1800
        };
        self.bwf.tilemap_addr = base + 32 * tilemap_y + tilemap_x;
    }

    fn setup_bg_tile_data_addr(&mut self, ctx: &PpuBus) {
        let tile_number = ctx.vram[self.bwf.tilemap_addr as usize];
        let tile_addr = if ctx.video.lcdc.contains(Lcdc::BG_WIN_TILE_DATA) {
            16 * tile_number as u16
        } else {
            (0x1000i32 + 16 * (tile_number as i8) as i32) as u16
        };
        let tile_y = ctx.video.ly.wrapping_add(ctx.video.scy) % 8;
        self.psf.tile_addr = tile_addr + 2 * tile_y as u16;
    }

    fn setup_win_tilemap_addr(&mut self, video: &VideoRegs) {
        // The window prefetcher tracks its own tilemap X.
        let tilemap_x = self.wf_tilemap_x as u16;
        self.wf_tilemap_x = self.wf_tilemap_x.wrapping_add(1);
        let tilemap_y = (self.win.wly / 8) as u16;
        let base: u16 = if video.lcdc.contains(Lcdc::WIN_TILE_MAP) {
            0x1C00
        } else {
            0x1800
        };
        self.bwf.tilemap_addr = base + 32 * tilemap_y + tilemap_x;
    }

    fn setup_win_tile_data_addr(&mut self, ctx: &PpuBus) {
        let tile_number = ctx.vram[self.bwf.tilemap_addr as usize];
        let tile_addr = if ctx.video.lcdc.contains(Lcdc::BG_WIN_TILE_DATA) {
            16 * tile_number as u16
        } else {
            (0x1000i32 + 16 * (tile_number as i8) as i32) as u16
        };
        let tile_y = self.win.wly % 8;
        self.psf.tile_addr = tile_addr + 2 * tile_y as u16;
    }

    fn setup_obj_tile_data_addr(&mut self, video: &VideoRegs) {
        let double_height = video.lcdc.contains(Lcdc::OBJ_SIZE);
        let height_mask: u8 = if double_height { 0xF } else { 0x7 };
        let attrs = ObjAttrs::from_bits_retain(self.of.attributes);

        let obj_y = self.of.entry.y.wrapping_sub(16);
        let mut tile_y = video.ly.wrapping_sub(obj_y) & height_mask;
        if attrs.contains(ObjAttrs::Y_FLIP) {
            tile_y ^= height_mask;
        }

        // The last bit of the tile number is ignored for 8x16 objects.
        let tile_number = if double_height {
            self.of.tile_number & 0xFE
        } else {
            self.of.tile_number
        };

        self.psf.tile_addr = 16 * tile_number as u16 + 2 * tile_y as u16;
    }

    fn cache_bgwin_fetch(&mut self) {
        debug_assert!(!self.bwf.cached);
        self.bwf.cached_low = self.psf.low;
        self.bwf.cached_high = self.psf.high;
        self.bwf.cached = true;
    }

    fn restore_bgwin_fetch(&mut self) {
        debug_assert!(self.bwf.cached);
        self.psf.low = self.bwf.cached_low;
        self.psf.high = self.bwf.cached_high;
        self.bwf.cached = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_row_decoding_matches_bitplane_layout() {
        // low = 0b1100_0001, high = 0b1010_0011
        let pixels = tile_row_pixels(0xC1, 0xA3, false);
        assert_eq!(pixels, [3, 1, 3, 0, 0, 0, 2, 3]);

        let flipped = tile_row_pixels(0xC1, 0xA3, true);
        assert_eq!(flipped, [3, 2, 0, 0, 0, 3, 1, 3]);
    }

    #[test]
    fn palette_lookup_maps_color_indices() {
        // BGP = 11 10 01 00
        let bgp = 0b1110_0100;
        assert_eq!(resolve_color(0, bgp), 0);
        assert_eq!(resolve_color(1, bgp), 1);
        assert_eq!(resolve_color(2, bgp), 2);
        assert_eq!(resolve_color(3, bgp), 3);

        // Inverted palette.
        let inv = 0b0001_1011;
        assert_eq!(resolve_color(0, inv), 3);
        assert_eq!(resolve_color(3, inv), 0);
    }

    #[test]
    fn oam_hits_pull_from_the_back() {
        let mut hits = OamHits::default();
        hits.push(OamScanEntry { number: 1, y: 0, x: 0 });
        hits.push(OamScanEntry { number: 5, y: 0, x: 0 });
        assert_eq!(hits.pull_back().number, 5);
        assert_eq!(hits.pull_back().number, 1);
        assert!(hits.is_empty());
    }
}
