//! Scheduler Facade
//!
//! Wires the grid, allocator, PDCCH gating, fair share and DCI assembly
//! into per-slot passes: order the UEs, turn buffered bytes into an RB
//! demand, gate on PDCCH room, place the grant and claim its control
//! region, then read the slot back into per-UE totals.

use crate::allocator::SlotAllocator;
use crate::amc::AmcModel;
use crate::dci::{DciAssembler, DciInfo};
use crate::fair_share::{self, BeamFairShareCalculator, UeSchedulingInfo};
use crate::grid::{Allocation, GridConfig, PrachConfig, ResourceGrid};
use crate::pdcch::{PdcchSearchSpaceAllocator, SearchSpaceConfig};
use crate::SchedulerError;
use common::{Direction, Rnti, SlotTime, SYMBOLS_PER_SLOT};
use std::collections::BTreeMap;
use tracing::{debug, error, info, trace};

/// Uplink transport block header margin in bytes
const UL_HEADER_MARGIN: u32 = 8;

/// Downlink transport block header margin in bytes
const DL_HEADER_MARGIN: u32 = 7;

/// Narrowband deployments cap each TBS at this many bytes per slot
const NARROWBAND_TBS_CAP: u32 = 625;

/// Header margin used together with the narrowband TBS cap
const NARROWBAND_MARGIN: u32 = 4;

#[derive(Debug, Clone)]
pub struct MacSchedulerConfig {
    /// Pipe-separated TDD pattern, e.g. "DL|S|UL|UL|DL|DL|S|UL|UL|UL"
    pub pattern: String,
    pub numerology: u8,
    /// Rolling window length, multiple of 160 ms
    pub window_ms: u64,
    /// Narrowband BWPs plus the two wide ones
    pub bwp_count: u8,
    /// Width of each narrowband BWP in RBs
    pub narrow_bwp_rb: u16,
    /// CORESET depth of the narrowband BWPs
    pub coreset_symbols: u8,
    /// Narrowband deployment mode: chunked grants and capped TBS
    pub use_5mhz: bool,
}

impl Default for MacSchedulerConfig {
    fn default() -> Self {
        Self {
            pattern: "DL|S|UL|UL|DL|DL|S|UL|UL|UL".to_string(),
            numerology: 1,
            window_ms: 9600,
            bwp_count: 6,
            narrow_bwp_rb: 51,
            coreset_symbols: 2,
            use_5mhz: false,
        }
    }
}

/// The MAC scheduler: one instance per cell
pub struct MacScheduler {
    grid: ResourceGrid,
    allocator: SlotAllocator,
    pdcch: PdcchSearchSpaceAllocator,
    fair_share: BeamFairShareCalculator,
    assembler: DciAssembler,
    amc: AmcModel,
    coreset_symbols: u8,
    use_5mhz: bool,
}

impl MacScheduler {
    pub fn new(config: MacSchedulerConfig) -> Result<Self, SchedulerError> {
        let pattern = config.pattern.parse()?;
        let narrow_count = config.bwp_count.saturating_sub(2) as u16;
        let grid_config = GridConfig {
            pattern,
            numerology: config.numerology,
            window_ms: config.window_ms,
            bwp_count: config.bwp_count,
            carrier_rb: config.narrow_bwp_rb * narrow_count,
        };
        let mut grid = ResourceGrid::new(grid_config)?;
        for bwp in 0..config.bwp_count {
            let coreset = if grid.bwps().is_wide(bwp) {
                1
            } else {
                config.coreset_symbols
            };
            grid.configure_bwp(bwp, config.narrow_bwp_rb, coreset)?;
        }
        let allocator = SlotAllocator::new(&grid, config.use_5mhz);
        info!(
            "MAC scheduler ready: {} BWPs, {} RB carrier, numerology {}",
            config.bwp_count,
            grid.carrier_rb(),
            config.numerology
        );
        Ok(Self {
            grid,
            allocator,
            pdcch: PdcchSearchSpaceAllocator::new(),
            fair_share: BeamFairShareCalculator::new(),
            assembler: DciAssembler::new(),
            amc: AmcModel,
            coreset_symbols: config.coreset_symbols,
            use_5mhz: config.use_5mhz,
        })
    }

    /// Uplink scheduling pass over one slot. Returns the per-beam symbol
    /// shares. Advances the round-robin pointer past each granted UE.
    pub fn run_uplink_pass(
        &mut self,
        slot: &SlotTime,
        ues: &mut [UeSchedulingInfo],
    ) -> Result<Vec<(u16, u32)>, SchedulerError> {
        self.run_pass(slot, Direction::Uplink, ues)
    }

    /// Downlink scheduling pass over one slot. The round-robin pointer is
    /// deliberately left where the uplink passes put it.
    pub fn run_downlink_pass(
        &mut self,
        slot: &SlotTime,
        ues: &mut [UeSchedulingInfo],
    ) -> Result<Vec<(u16, u32)>, SchedulerError> {
        self.run_pass(slot, Direction::Downlink, ues)
    }

    fn run_pass(
        &mut self,
        slot: &SlotTime,
        direction: Direction,
        ues: &mut [UeSchedulingInfo],
    ) -> Result<Vec<(u16, u32)>, SchedulerError> {
        let slot_index = slot.normalize();
        if !self.grid.kind_at(slot_index).supports(direction) {
            trace!("Slot {} carries no {:?} data", slot_index, direction);
            return Ok(Vec::new());
        }
        self.allocator.reset_free_resources(&self.grid, slot, direction);

        let sym_avail = match direction {
            Direction::Uplink => (SYMBOLS_PER_SLOT - 1) as u32,
            Direction::Downlink => (SYMBOLS_PER_SLOT - self.coreset_symbols as usize) as u32,
        };
        let mut beam_demand: BTreeMap<u16, u32> = BTreeMap::new();
        for ue in ues.iter() {
            *beam_demand.entry(ue.beam).or_insert(0) += ue.buffered_bytes;
        }
        let demand: Vec<(u16, u32)> = beam_demand.into_iter().collect();
        let shares = self.fair_share.sym_per_beam(sym_avail, &demand);

        for &(beam, _) in &shares {
            let members: Vec<usize> = ues
                .iter()
                .enumerate()
                .filter(|(_, ue)| ue.beam == beam)
                .map(|(i, _)| i)
                .collect();
            for idx in self.fair_share.ordered_indices(ues, &members) {
                if ues[idx].buffered_bytes == 0 {
                    continue;
                }
                if direction == Direction::Uplink && ues[idx].msg3_pending {
                    trace!("RNTI {} awaits its Msg3 occasion, skipping", ues[idx].rnti);
                    continue;
                }
                if fair_share::is_satisfied(&mut ues[idx]) {
                    trace!("RNTI {} already satisfied", ues[idx].rnti);
                    continue;
                }
                let rnti = ues[idx].rnti;
                let bwp = ues[idx].bwp;
                let mcs = ues[idx].mcs.first().copied().unwrap_or(0);
                let num_rb = self.rb_demand(mcs, ues[idx].buffered_bytes, direction);
                if !self.pdcch.pdcch_available(&self.grid, rnti, bwp, slot)? {
                    debug!("No PDCCH for RNTI {} in BWP {} at {}", rnti, bwp, slot);
                    continue;
                }
                let placed = self.allocator.schedule_data(
                    &mut self.grid,
                    bwp,
                    rnti,
                    num_rb,
                    direction,
                    false,
                    slot,
                )?;
                if let Some(allocation) = placed {
                    if allocation.num_rb > 0 && allocation.num_symbols > 0 {
                        if direction == Direction::Uplink {
                            self.fair_share.advance(rnti);
                        }
                        if !self.pdcch.mark_viable_pdcch(&mut self.grid, rnti, bwp, slot)? {
                            error!(
                                "No PDCCH region left for RNTI {} after its grant at {}",
                                rnti, slot
                            );
                        }
                    }
                }
            }
        }

        for ue in ues.iter_mut() {
            let (elements, symbols) = self.grid.granted_elements(ue.rnti, slot);
            ue.assigned_rb = elements;
            ue.assigned_symbols = symbols;
        }
        Ok(shares)
    }

    /// Place a deferred Msg3 grant for a UE that just completed random
    /// access. The allocation lands on the RACH response occasion.
    pub fn schedule_msg3(
        &mut self,
        rnti: Rnti,
        bwp: u8,
        buffered_bytes: u32,
        mcs: u8,
        slot: &SlotTime,
    ) -> Result<Option<Allocation>, SchedulerError> {
        let num_rb = self.rb_demand(mcs, buffered_bytes, Direction::Uplink);
        self.allocator
            .schedule_data(&mut self.grid, bwp, rnti, num_rb, Direction::Uplink, true, slot)
    }

    /// Emit the DCIs for every grant committed in this slot, over all BWPs
    pub fn assemble_dci(
        &mut self,
        slot: &SlotTime,
        direction: Direction,
        ues: &mut [UeSchedulingInfo],
    ) -> Result<Vec<DciInfo>, SchedulerError> {
        let mut dcis = Vec::new();
        for bwp in 0..self.grid.bwps().bwp_count() {
            dcis.extend(
                self.assembler
                    .assemble(&mut self.grid, &self.amc, bwp, slot, direction, ues)?,
            );
        }
        Ok(dcis)
    }

    /// Retire the finished window half when the slot crosses a half-window
    /// boundary. Call once per slot tick.
    pub fn maybe_roll(&mut self, slot: &SlotTime) {
        let half = self.grid.window_slots() / 2;
        let index = slot.normalize();
        if index > 0 && index % half == 0 {
            self.grid.roll_window(slot);
        }
    }

    /// Account the partially elapsed half at the end of a run
    pub fn finish(&mut self, slot: &SlotTime) {
        self.grid.collect_final_usage(slot);
    }

    pub fn register_ue(&mut self, rnti: Rnti, device: u64) {
        self.grid.register_ue(rnti, device);
    }

    pub fn create_search_space(
        &mut self,
        rnti: Rnti,
        config: SearchSpaceConfig,
    ) -> Result<(), SchedulerError> {
        self.pdcch.create_search_space(rnti, config)
    }

    pub fn reserve_prach(&mut self, config: PrachConfig) -> Result<(), SchedulerError> {
        self.grid.reserve_prach(config)
    }

    pub fn update_prach_usage(&mut self, slot_index: u64, occasion: u8) {
        self.grid.update_prach_usage(slot_index, occasion);
    }

    pub fn grid(&self) -> &ResourceGrid {
        &self.grid
    }

    pub fn round_robin_pointer(&self) -> u16 {
        self.fair_share.start_ue()
    }

    /// RB demand covering the buffered bytes plus the header margin, bounded
    /// the way each direction allows
    fn rb_demand(&self, mcs: u8, buffered_bytes: u32, direction: Direction) -> u32 {
        let narrow = self.grid.narrow_bwp_rb() as u32;
        let (margin, max_rb) = match direction {
            Direction::Uplink => (UL_HEADER_MARGIN, narrow * 13),
            Direction::Downlink => (DL_HEADER_MARGIN, narrow * 12),
        };
        if self.use_5mhz {
            self.amc
                .rb_for_bytes(mcs, buffered_bytes, NARROWBAND_MARGIN, max_rb, Some(NARROWBAND_TBS_CAP))
        } else {
            self.amc.rb_for_bytes(mcs, buffered_bytes, margin, max_rb, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MacSchedulerConfig {
        MacSchedulerConfig {
            pattern: "DL|S|UL|UL|DL|DL|S|UL|UL|UL".to_string(),
            numerology: 0,
            window_ms: 160,
            bwp_count: 4,
            narrow_bwp_rb: 51,
            coreset_symbols: 2,
            use_5mhz: false,
        }
    }

    fn ue(rnti: u16, bwp: u8, buffered: u32) -> UeSchedulingInfo {
        UeSchedulingInfo::new(Rnti::new(rnti), 0, bwp, buffered, vec![10])
    }

    #[test]
    fn test_carrier_layout_from_config() {
        let config = MacSchedulerConfig {
            numerology: 1,
            window_ms: 320,
            bwp_count: 6,
            ..test_config()
        };
        let scheduler = MacScheduler::new(config).unwrap();
        let bwps = scheduler.grid().bwps();
        assert_eq!(scheduler.grid().carrier_rb(), 204);
        assert_eq!(bwps.borders(3).unwrap().lower, 153);
        // The two wide BWPs span the whole carrier
        assert_eq!(bwps.borders(4).unwrap().upper, 203);
        assert_eq!(bwps.borders(5).unwrap().lower, 0);
    }

    #[test]
    fn test_default_config_builds_full_scale_cell() {
        // Numerology 1 over a 9600 ms window: 4 narrowband BWPs of 51 RB
        // plus the two carrier-spanning ones
        let scheduler = MacScheduler::new(MacSchedulerConfig::default()).unwrap();
        let grid = scheduler.grid();
        assert_eq!(grid.window_slots(), 19_200);
        assert_eq!(grid.window_rows(), 19_200 * 14);
        assert_eq!(grid.carrier_rb(), 204);
        assert_eq!(grid.bwps().narrowband_count(), 4);
        assert_eq!(grid.bwps().borders(2).unwrap().lower, 102);
        let wide = grid.bwps().borders(5).unwrap();
        assert_eq!((wide.lower, wide.upper), (0, 203));
    }

    #[test]
    fn test_uplink_pass_grants_and_rotates() {
        let mut scheduler = MacScheduler::new(test_config()).unwrap();
        let slot = SlotTime::new(0, 2, 0, 0);
        let mut ues = vec![ue(61, 0, 100), ue(62, 1, 100)];

        let shares = scheduler.run_uplink_pass(&slot, &mut ues).unwrap();
        assert_eq!(shares.iter().map(|&(_, s)| s).sum::<u32>(), 13);

        assert!(ues[0].assigned_rb > 0);
        assert!(ues[1].assigned_rb > 0);
        // Pointer moved past the last granted RNTI
        assert_eq!(scheduler.round_robin_pointer(), 63);
    }

    #[test]
    fn test_msg3_pending_ue_is_skipped_in_uplink() {
        let mut scheduler = MacScheduler::new(test_config()).unwrap();
        let slot = SlotTime::new(0, 2, 0, 0);
        let mut ues = vec![ue(61, 0, 100)];
        ues[0].msg3_pending = true;

        scheduler.run_uplink_pass(&slot, &mut ues).unwrap();
        assert_eq!(ues[0].assigned_rb, 0);
        assert_eq!(scheduler.round_robin_pointer(), 0);
    }

    #[test]
    fn test_downlink_pass_leaves_pointer() {
        let mut scheduler = MacScheduler::new(test_config()).unwrap();
        let slot = SlotTime::new(0, 0, 0, 0);
        let mut ues = vec![ue(61, 0, 50)];

        scheduler.run_downlink_pass(&slot, &mut ues).unwrap();
        assert!(ues[0].assigned_rb > 0);
        assert_eq!(scheduler.round_robin_pointer(), 0);
    }

    #[test]
    fn test_wrong_direction_slot_is_a_no_op() {
        let mut scheduler = MacScheduler::new(test_config()).unwrap();
        // Slot 0 is DL
        let slot = SlotTime::new(0, 0, 0, 0);
        let mut ues = vec![ue(61, 0, 100)];
        let shares = scheduler.run_uplink_pass(&slot, &mut ues).unwrap();
        assert!(shares.is_empty());
        assert_eq!(ues[0].assigned_rb, 0);
    }

    #[test]
    fn test_pass_then_dci_round_trip() {
        let mut scheduler = MacScheduler::new(test_config()).unwrap();
        let slot = SlotTime::new(0, 2, 0, 0);
        let mut ues = vec![ue(61, 0, 100), ue(62, 1, 100)];

        scheduler.run_uplink_pass(&slot, &mut ues).unwrap();
        let dcis = scheduler
            .assemble_dci(&slot, Direction::Uplink, &mut ues)
            .unwrap();
        assert_eq!(dcis.len(), 2);
        let total: u32 = dcis.iter().map(|d| d.num_rb).sum();
        assert_eq!(total, ues[0].assigned_rb + ues[1].assigned_rb);
    }
}
