//! PDCCH Search Space Gating
//!
//! A grant only goes out if a DCI can be placed in a CORESET the UE
//! monitors. Candidate slots are walked backward from the data slot (an
//! uplink grant's DCI lives in an earlier DL-capable slot); each emitted
//! DCI consumes a fixed-size region of CORESET cells.

use crate::grid::{ReservationKind, ResourceCell, ResourceGrid};
use crate::SchedulerError;
use common::{Rnti, SlotTime};
use std::collections::HashMap;
use tracing::{debug, trace};

/// UE-specific search space monitoring configuration, in slots
#[derive(Debug, Clone, Copy)]
pub struct SearchSpaceConfig {
    pub periodicity: u64,
    pub offset: u64,
    pub duration: u64,
}

/// Tracks search spaces and claims PDCCH regions from the grid
#[derive(Debug, Default)]
pub struct PdcchSearchSpaceAllocator {
    search_spaces: HashMap<u16, SearchSpaceConfig>,
}

impl PdcchSearchSpaceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a UE's search space. A UE without one is treated as
    /// monitoring every DL-capable slot.
    pub fn create_search_space(
        &mut self,
        rnti: Rnti,
        config: SearchSpaceConfig,
    ) -> Result<(), SchedulerError> {
        if config.periodicity == 0
            || config.duration == 0
            || config.duration > config.periodicity
            || config.offset >= config.periodicity
        {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "Search space for RNTI {} is inconsistent: periodicity {}, offset {}, duration {}",
                rnti, config.periodicity, config.offset, config.duration
            )));
        }
        debug!(
            "Search space for RNTI {}: periodicity {}, offset {}, duration {}",
            rnti, config.periodicity, config.offset, config.duration
        );
        self.search_spaces.insert(rnti.value(), config);
        Ok(())
    }

    /// Whether the UE monitors the PDCCH at this slot
    pub fn in_search_space(&self, rnti: Rnti, slot_index: u64) -> bool {
        match self.search_spaces.get(&rnti.value()) {
            None => true,
            Some(config) => {
                let phase = (slot_index as i128 - config.offset as i128)
                    .rem_euclid(config.periodicity as i128) as u64;
                phase <= config.duration - 1
            }
        }
    }

    /// Whether a DCI for this grant could still be placed: the UE holds no
    /// grant in the target slot and BWP yet, and some monitored DL-capable
    /// candidate slot has a free PDCCH region.
    pub fn pdcch_available(
        &self,
        grid: &ResourceGrid,
        rnti: Rnti,
        bwp: u8,
        target: &SlotTime,
    ) -> Result<bool, SchedulerError> {
        if grid.is_already_scheduled(rnti, target, bwp)? {
            debug!(
                "RNTI {} already scheduled in BWP {} at {}, no second DCI",
                rnti, bwp, target
            );
            return Ok(false);
        }
        Ok(self.find_candidate(grid, rnti, bwp, target)?.is_some())
    }

    /// Claim the PDCCH region backing a committed grant. Returns false if
    /// no monitored candidate slot has room left.
    pub fn mark_viable_pdcch(
        &mut self,
        grid: &mut ResourceGrid,
        rnti: Rnti,
        bwp: u8,
        target: &SlotTime,
    ) -> Result<bool, SchedulerError> {
        let (slot_index, start_rb) = match self.find_candidate(grid, rnti, bwp, target)? {
            Some(found) => found,
            None => return Ok(false),
        };
        let config = *grid.bwps().get(bwp)?;
        let region_rb = pdcch_region_rb(config.coreset_symbols);
        let base = grid.row_for_slot_index(slot_index);
        for sym in 0..config.coreset_symbols as usize {
            for rb in start_rb..start_rb + region_rb {
                grid.set_cell(
                    base + sym,
                    rb,
                    ResourceCell::Reserved(ReservationKind::CoresetUsed),
                );
            }
        }
        trace!(
            "PDCCH region for RNTI {}: slot {}, RB [{}, {})",
            rnti,
            slot_index,
            start_rb,
            start_rb + region_rb
        );
        Ok(true)
    }

    /// Walk candidate slots backward from the target, at most one pattern
    /// period, and return the nearest monitored DL-capable slot that still
    /// has a free PDCCH region.
    fn find_candidate(
        &self,
        grid: &ResourceGrid,
        rnti: Rnti,
        bwp: u8,
        target: &SlotTime,
    ) -> Result<Option<(u64, u16)>, SchedulerError> {
        let target_index = target.normalize();
        let lower = target_index.saturating_sub(grid.pattern().len() as u64);
        for slot_index in (lower..=target_index).rev() {
            if !grid.kind_at(slot_index).is_downlink_capable() {
                continue;
            }
            if !self.in_search_space(rnti, slot_index) {
                continue;
            }
            if let Some(start_rb) = find_pdcch_region(grid, slot_index, bwp)? {
                return Ok(Some((slot_index, start_rb)));
            }
        }
        trace!(
            "No PDCCH candidate for RNTI {} in BWP {} towards {}",
            rnti,
            bwp,
            target
        );
        Ok(None)
    }
}

/// RBs consumed per DCI, shrinking as the CORESET gets deeper
pub fn pdcch_region_rb(coreset_symbols: u8) -> u16 {
    (6 / coreset_symbols as u16).clamp(1, 6)
}

/// First RB of a fully claimable PDCCH region in this slot and BWP
fn find_pdcch_region(
    grid: &ResourceGrid,
    slot_index: u64,
    bwp: u8,
) -> Result<Option<u16>, SchedulerError> {
    let config = *grid.bwps().get(bwp)?;
    let region_rb = pdcch_region_rb(config.coreset_symbols);
    let base = grid.row_for_slot_index(slot_index);
    let mut run_start = config.borders.lower;
    let mut run_len = 0u16;
    for rb in config.borders.lower..=config.borders.upper {
        let claimable = (0..config.coreset_symbols as usize).all(|sym| {
            grid.cell(base + sym, rb) == ResourceCell::Reserved(ReservationKind::Coreset)
        });
        if claimable {
            if run_len == 0 {
                run_start = rb;
            }
            run_len += 1;
            if run_len == region_rb {
                return Ok(Some(run_start));
            }
        } else {
            run_len = 0;
        }
    }
    Ok(None)
}
