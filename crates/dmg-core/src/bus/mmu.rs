//! Request/flush lanes between the bus masters and the memory system.
//!
//! A master posts at most one read or write per lane and the MMU resolves it
//! on a later flush slot: CPU writes and DMA reads flush at t0, CPU reads at
//! t2. The flushed byte stays latched in the lane until the next request.

use super::bus::bus_of;
use serde::{Deserialize, Serialize};

pub const LANE_CPU: usize = 0;
pub const LANE_DMA: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaneState {
    Idle,
    Read,
    Write,
}

#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct Lane {
    pub state: LaneState,
    pub address: u16,
    pub data: u8,
}

impl Default for Lane {
    fn default() -> Self {
        Self {
            state: LaneState::Idle,
            address: 0,
            data: 0,
        }
    }
}

#[derive(Clone, Copy, Default, Serialize, Deserialize)]
pub struct Mmu {
    pub lanes: [Lane; 2],
}

impl Mmu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cpu_read_request(&mut self, addr: u16) {
        let dma = self.lanes[LANE_DMA];
        let cpu = &mut self.lanes[LANE_CPU];
        debug_assert!(cpu.state == LaneState::Idle);

        cpu.state = LaneState::Read;
        // When CPU and DMA target the same physical bus on the same tick,
        // the CPU observes whatever byte the DMA is fetching.
        cpu.address = if dma.state == LaneState::Read && bus_of(addr) == bus_of(dma.address) {
            dma.address
        } else {
            addr
        };
    }

    pub fn cpu_write_request(&mut self, addr: u16, value: u8) {
        let dma = self.lanes[LANE_DMA];
        // A CPU write contending with a DMA read of the same bus is lost.
        if dma.state == LaneState::Read && bus_of(addr) == bus_of(dma.address) {
            return;
        }

        let cpu = &mut self.lanes[LANE_CPU];
        debug_assert!(cpu.state == LaneState::Idle);
        cpu.state = LaneState::Write;
        cpu.address = addr;
        cpu.data = value;
    }

    pub fn dma_read_request(&mut self, addr: u16) {
        let dma = &mut self.lanes[LANE_DMA];
        debug_assert!(dma.state == LaneState::Idle);
        dma.state = LaneState::Read;
        dma.address = addr;
    }

    /// Latched result of the most recent CPU lane flush.
    #[inline]
    pub fn cpu_data(&self) -> u8 {
        self.lanes[LANE_CPU].data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_read_is_redirected_onto_a_contending_dma_read() {
        let mut mmu = Mmu::new();
        mmu.dma_read_request(0xC100);
        mmu.cpu_read_request(0xC200); // same external bus
        assert_eq!(mmu.lanes[LANE_CPU].address, 0xC100);
    }

    #[test]
    fn cpu_read_of_a_different_bus_is_untouched() {
        let mut mmu = Mmu::new();
        mmu.dma_read_request(0xC100);
        mmu.cpu_read_request(0x8200); // VRAM bus
        assert_eq!(mmu.lanes[LANE_CPU].address, 0x8200);
    }

    #[test]
    fn cpu_write_contending_with_dma_is_dropped() {
        let mut mmu = Mmu::new();
        mmu.dma_read_request(0xC100);
        mmu.cpu_write_request(0xD000, 0x42);
        assert_eq!(mmu.lanes[LANE_CPU].state, LaneState::Idle);

        mmu.cpu_write_request(0xFF80, 0x42); // CPU-internal bus, no conflict
        assert_eq!(mmu.lanes[LANE_CPU].state, LaneState::Write);
    }
}
