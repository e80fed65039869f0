//! OAM DMA controller state.
//!
//! Writing FF46 arms a two-stage request; two ticks later the transfer goes
//! active, the controller acquires the OAM bus and copies one byte per
//! T-cycle through the MMU's DMA lane (160 bytes total). The copy loop
//! itself lives in [`crate::bus::Bus::tick_dma`], which owns the lane and
//! the OAM memory.

use serde::{Deserialize, Serialize};

/// DMA request delay stage. A fresh FF46 write is downgraded once per tick;
/// when the countdown runs out the transfer activates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    None,
    Pending1,
    Pending0,
}

#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct Dma {
    pub request: Request,
    pub source_high: u8,
    pub active: bool,
    pub cursor: u8,
}

impl Dma {
    pub fn new() -> Self {
        Self {
            request: Request::None,
            source_high: 0,
            active: false,
            cursor: 0,
        }
    }

    pub fn start_transfer(&mut self, source_high: u8) {
        self.request = Request::Pending1;
        // The source cannot exceed 0xDF00: bit 13 is dropped for E000+
        // sources, folding echo RAM onto WRAM.
        self.source_high = if source_high >= 0xE0 {
            source_high & !0x20
        } else {
            source_high
        };
    }

    #[inline]
    pub fn source(&self) -> u16 {
        (self.source_high as u16) << 8
    }

    #[inline]
    pub fn is_transferring(&self) -> bool {
        self.active
    }

    /// Advance the request pipeline by one tick. Returns true on the tick
    /// the transfer activates.
    pub fn tick_request(&mut self) -> bool {
        match self.request {
            Request::None => false,
            Request::Pending1 => {
                self.request = Request::Pending0;
                false
            }
            Request::Pending0 => {
                self.request = Request::None;
                self.active = true;
                self.cursor = 0;
                true
            }
        }
    }
}

impl Default for Dma {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activates_on_the_second_tick_after_the_request() {
        let mut dma = Dma::new();
        dma.start_transfer(0xC0);
        assert!(!dma.tick_request());
        assert!(!dma.active);
        assert!(dma.tick_request());
        assert!(dma.active);
        assert_eq!(dma.cursor, 0);
    }

    #[test]
    fn echo_sources_fold_onto_wram() {
        let mut dma = Dma::new();
        dma.start_transfer(0xE3);
        assert_eq!(dma.source(), 0xC300);

        dma.start_transfer(0xFF);
        assert_eq!(dma.source(), 0xDF00);

        dma.start_transfer(0xDF);
        assert_eq!(dma.source(), 0xDF00);
    }
}
