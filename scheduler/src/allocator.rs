//! Slot Allocation
//!
//! Greedy first-fit allocation on the rolling resource window. Narrowband
//! demands are placed by a symbol-major, RB-minor scan that commits the
//! first maximal free run; demands wider than a BWP either spill across
//! symbols (full-width rectangles) or, on the wide BWPs, go through a
//! cross-BWP search over the narrowband free-symbol counters.

use crate::bwp::BwpBorders;
use crate::grid::{Allocation, ResourceGrid};
use crate::SchedulerError;
use common::{Direction, Rnti, SlotTime, SYMBOLS_PER_SLOT};
use tracing::{debug, error, trace};

/// Msg3 slot delay per numerology (TS 38.214 table 6.1.2.1.1-5)
const MSG3_DELTA: [u64; 6] = [2, 3, 4, 6, 24, 48];

/// Extra slots between the UL grant and the Msg3 occasion
const MSG3_GRANT_LEAD: u64 = 10;

/// Contiguous group of narrowband BWPs selected by the wide search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WideCandidate {
    first_bwp: u8,
    last_bwp: u8,
    symbols: u8,
}

/// Per-slot allocator over one resource grid
pub struct SlotAllocator {
    /// Trailing free data symbols per narrowband BWP, range [0, 14].
    /// A first-RB-column proxy, recomputed at each new slot.
    free_symbols: Vec<u8>,
    last_reset: Option<u64>,
    use_5mhz: bool,
}

impl SlotAllocator {
    pub fn new(grid: &ResourceGrid, use_5mhz: bool) -> Self {
        Self {
            free_symbols: vec![13; grid.bwps().narrowband_count() as usize],
            last_reset: None,
            use_5mhz,
        }
    }

    /// Schedule `num_rb` RBs for a UE in one slot and BWP.
    ///
    /// Msg3 grants are deferred to the RACH response occasion: the target
    /// slot is the current one plus the numerology delay plus the grant
    /// lead, advanced to the next uplink-capable slot. Returns `None` when
    /// the demand cannot be placed.
    pub fn schedule_data(
        &mut self,
        grid: &mut ResourceGrid,
        bwp: u8,
        rnti: Rnti,
        num_rb: u32,
        direction: Direction,
        msg3: bool,
        slot: &SlotTime,
    ) -> Result<Option<Allocation>, SchedulerError> {
        if num_rb == 0 {
            return Ok(None);
        }
        let target = if msg3 {
            let mut index =
                slot.normalize() + MSG3_DELTA[slot.numerology() as usize] + MSG3_GRANT_LEAD;
            while !grid.kind_at(index).supports(Direction::Uplink) {
                index += 1;
            }
            SlotTime::from_normalized(index, slot.numerology())
        } else {
            *slot
        };

        let mut allocation = self.schedule_complete_slot(grid, bwp, rnti, num_rb, direction, &target)?;
        if allocation.is_none() {
            allocation = self.schedule_partial_packet(grid, bwp, rnti, num_rb, direction, &target)?;
        }

        if let Some(allocation) = &allocation {
            if msg3 {
                grid.expect_msg3(target.normalize(), rnti);
                debug!("Msg3 grant for RNTI {} deferred to {}", rnti, target);
            } else if !grid.bwps().is_wide(bwp) {
                // The committed symbols eat into the BWP's trailing free
                // region; keep the counter current within the pass
                let coreset = grid.bwps().get(bwp)?.coreset_symbols;
                let (_, last_sym) = data_symbols(direction, coreset);
                let trailing = (last_sym as u8)
                    .saturating_sub(allocation.start_symbol + allocation.num_symbols);
                let free = &mut self.free_symbols[bwp as usize];
                *free = (*free).min(trailing);
            }
        }
        Ok(allocation)
    }

    /// Place the full demand in one slot.
    ///
    /// Demands up to the BWP width look for a contiguous run within one
    /// symbol, committing the first maximal run when blocked. Wider demands
    /// look for consecutive fully-free symbols across the whole BWP (or a
    /// quarter-width chunk in 5 MHz mode). On wide BWPs the demand goes
    /// through the cross-BWP search instead.
    pub fn schedule_complete_slot(
        &mut self,
        grid: &mut ResourceGrid,
        bwp: u8,
        rnti: Rnti,
        num_rb: u32,
        direction: Direction,
        slot: &SlotTime,
    ) -> Result<Option<Allocation>, SchedulerError> {
        let slot_index = slot.normalize();
        if !grid.kind_at(slot_index).supports(direction) {
            trace!(
                "Slot {} ({}) cannot carry {:?} data",
                slot_index,
                grid.kind_at(slot_index),
                direction
            );
            return Ok(None);
        }
        let config = *grid.bwps().get(bwp)?;
        let borders = config.borders;
        let bw = borders.width() as u32;
        let (first_sym, last_sym) = data_symbols(direction, config.coreset_symbols);
        let max_symbols = (last_sym - first_sym) as u32;

        let mut demand = num_rb;
        let mut sch_symbols = 1u32;
        let mut rb_to_schedule = num_rb;
        if num_rb > bw {
            if grid.bwps().is_wide(bwp) {
                if let Some(allocation) =
                    self.schedule_wide(grid, bwp, rnti, num_rb, direction, slot)?
                {
                    return Ok(Some(allocation));
                }
                // Search exhausted; fall through to the plain full-width scan
                rb_to_schedule = bw;
                sch_symbols = num_rb.div_ceil(bw).min(max_symbols);
            } else if self.use_5mhz {
                // Narrow chunk spanning many symbols instead of the full BWP
                let mut rb = (bw / 4).max(1);
                while rb > 1 && (rb - 1) * max_symbols > num_rb {
                    rb -= 1;
                }
                sch_symbols = num_rb.div_ceil(rb).min(max_symbols);
                rb_to_schedule = rb;
            } else {
                rb_to_schedule = bw;
                sch_symbols = num_rb.div_ceil(bw).min(max_symbols);
            }
            demand = sch_symbols * rb_to_schedule;
        }

        let base = grid.row_for_slot(slot);
        let mut full_symbols: u32 = 0;
        for sym in first_sym..last_sym {
            let row = base + sym;
            let mut run_start = borders.lower;
            let mut run_len: u32 = 0;
            for rb in borders.lower..=borders.upper {
                if grid.cell(row, rb).is_free() {
                    if run_len == 0 {
                        run_start = rb;
                    }
                    run_len += 1;
                    if sch_symbols == 1 && run_len == demand {
                        return Ok(Some(self.commit(
                            grid, slot, bwp, borders, rnti, sym, 1, run_start, demand,
                        )));
                    }
                    if sch_symbols > 1
                        && rb_to_schedule < bw
                        && run_len == rb_to_schedule
                        && sym + sch_symbols as usize <= last_sym
                        && rect_free(grid, row + 1, sch_symbols as usize - 1, run_start, rb_to_schedule)
                    {
                        return Ok(Some(self.commit(
                            grid,
                            slot,
                            bwp,
                            borders,
                            rnti,
                            sym,
                            sch_symbols,
                            run_start,
                            rb_to_schedule,
                        )));
                    }
                } else {
                    if run_len > 0 && full_symbols == 0 {
                        // First blocked run: take what fits, extending down
                        // while the same RB range stays free
                        let width = run_len;
                        let mut height = 1usize;
                        while sym + height < last_sym
                            && (height as u32) * width < demand
                            && rect_free(grid, base + sym + height, 1, run_start, width)
                        {
                            height += 1;
                        }
                        return Ok(Some(self.commit(
                            grid,
                            slot,
                            bwp,
                            borders,
                            rnti,
                            sym,
                            height as u32,
                            run_start,
                            width,
                        )));
                    }
                    run_len = 0;
                    full_symbols = 0;
                }
            }
            if sch_symbols > 1 && rb_to_schedule == bw {
                if run_len == bw {
                    full_symbols += 1;
                    if full_symbols == sch_symbols {
                        return Ok(Some(self.commit(
                            grid,
                            slot,
                            bwp,
                            borders,
                            rnti,
                            sym + 1 - sch_symbols as usize,
                            sch_symbols,
                            borders.lower,
                            bw,
                        )));
                    }
                } else {
                    full_symbols = 0;
                }
            }
        }
        trace!(
            "No complete placement for RNTI {} ({} RB) in BWP {} at {}",
            rnti,
            num_rb,
            bwp,
            slot
        );
        Ok(None)
    }

    /// Fallback placement that commits the first non-empty free run it
    /// finds, even when the run is far short of the demand. Guarantees
    /// forward progress for a UE the complete scan could not place.
    ///
    /// When a multi-symbol run is broken by a cell at the BWP's first RB,
    /// the first accumulated symbol is dropped from the commit.
    pub fn schedule_partial_packet(
        &mut self,
        grid: &mut ResourceGrid,
        bwp: u8,
        rnti: Rnti,
        num_rb: u32,
        direction: Direction,
        slot: &SlotTime,
    ) -> Result<Option<Allocation>, SchedulerError> {
        let slot_index = slot.normalize();
        if !grid.kind_at(slot_index).supports(direction) {
            return Ok(None);
        }
        let config = *grid.bwps().get(bwp)?;
        let borders = config.borders;
        let bw = borders.width() as u32;
        let (first_sym, last_sym) = data_symbols(direction, config.coreset_symbols);
        let sch_symbols = if num_rb > bw {
            num_rb.div_ceil(bw).min((last_sym - first_sym) as u32)
        } else {
            1
        };

        let base = grid.row_for_slot(slot);
        if sch_symbols > 1 {
            let mut full_symbols: u32 = 0;
            for sym in first_sym..last_sym {
                let row = base + sym;
                let blocked_at = (borders.lower..=borders.upper)
                    .find(|&rb| !grid.cell(row, rb).is_free());
                match blocked_at {
                    None => {
                        full_symbols += 1;
                        if full_symbols == sch_symbols {
                            return Ok(Some(self.commit(
                                grid,
                                slot,
                                bwp,
                                borders,
                                rnti,
                                sym + 1 - sch_symbols as usize,
                                sch_symbols,
                                borders.lower,
                                bw,
                            )));
                        }
                    }
                    Some(rb) if full_symbols > 0 => {
                        let height = if rb == borders.lower {
                            full_symbols - 1
                        } else {
                            full_symbols
                        };
                        if height == 0 {
                            full_symbols = 0;
                            continue;
                        }
                        return Ok(Some(self.commit(
                            grid,
                            slot,
                            bwp,
                            borders,
                            rnti,
                            sym - height as usize,
                            height,
                            borders.lower,
                            bw,
                        )));
                    }
                    Some(_) => full_symbols = 0,
                }
            }
            if full_symbols > 0 {
                return Ok(Some(self.commit(
                    grid,
                    slot,
                    bwp,
                    borders,
                    rnti,
                    last_sym - full_symbols as usize,
                    full_symbols,
                    borders.lower,
                    bw,
                )));
            }
        } else {
            for sym in first_sym..last_sym {
                let row = base + sym;
                let mut run_start = borders.lower;
                let mut run_len: u32 = 0;
                for rb in borders.lower..=borders.upper {
                    if grid.cell(row, rb).is_free() {
                        if run_len == 0 {
                            run_start = rb;
                        }
                        run_len += 1;
                        if run_len == num_rb || rb == borders.upper {
                            return Ok(Some(self.commit(
                                grid, slot, bwp, borders, rnti, sym, 1, run_start, run_len,
                            )));
                        }
                    } else if run_len > 0 {
                        return Ok(Some(self.commit(
                            grid, slot, bwp, borders, rnti, sym, 1, run_start, run_len,
                        )));
                    }
                }
            }
        }
        trace!("No partial placement for RNTI {} in BWP {} at {}", rnti, bwp, slot);
        Ok(None)
    }

    /// Cross-BWP placement for the two wide BWPs: pick the contiguous group
    /// of narrowband BWPs whose shared trailing free symbols give the
    /// largest RB x symbol area, trimmed down to the demand.
    fn schedule_wide(
        &mut self,
        grid: &mut ResourceGrid,
        bwp: u8,
        rnti: Rnti,
        num_rb: u32,
        direction: Direction,
        slot: &SlotTime,
    ) -> Result<Option<Allocation>, SchedulerError> {
        self.reset_free_resources(grid, slot, direction);
        let considered: Vec<u8> = (0..grid.bwps().narrowband_count()).collect();
        let candidate = match self.find_optimal_scheduling(grid, &considered, num_rb) {
            Some(c) => c,
            None => {
                trace!("Wide search found no free area for RNTI {} at {}", rnti, slot);
                return Ok(None);
            }
        };

        let lower = grid.bwps().borders(candidate.first_bwp)?.lower;
        let upper = grid.bwps().borders(candidate.last_bwp)?.upper;
        let width = (upper - lower + 1) as u32;
        let coreset = grid.bwps().get(bwp)?.coreset_symbols;
        let (_, last_sym) = data_symbols(direction, coreset);
        // The group's trailing free region starts right below its occupied part
        let free = self.free_symbols[candidate.first_bwp as usize] as usize;
        let start_sym = last_sym - free;

        let allocation = self.commit(
            grid,
            slot,
            bwp,
            BwpBorders { lower, upper },
            rnti,
            start_sym,
            candidate.symbols as u32,
            lower,
            width,
        );
        for b in candidate.first_bwp..=candidate.last_bwp {
            let f = &mut self.free_symbols[b as usize];
            *f = f.saturating_sub(candidate.symbols);
        }
        Ok(Some(allocation))
    }

    /// Recursive area search over the narrowband free-symbol counters.
    ///
    /// Partitions around the BWP with the most trailing free symbols,
    /// absorbs right neighbors with an equal count, trims excess symbols
    /// against the demand, and keeps the best of the group and the two
    /// remaining partitions.
    fn find_optimal_scheduling(
        &self,
        grid: &ResourceGrid,
        bwps: &[u8],
        num_rb: u32,
    ) -> Option<WideCandidate> {
        if bwps.is_empty() {
            return None;
        }
        let pos = (0..bwps.len())
            .max_by_key(|&i| self.free_symbols[bwps[i] as usize])
            .unwrap_or(0);
        let free = self.free_symbols[bwps[pos] as usize];
        if free == 0 {
            return None;
        }
        let mut end = pos;
        while end + 1 < bwps.len() && self.free_symbols[bwps[end + 1] as usize] == free {
            end += 1;
        }

        let width = (end - pos + 1) as u32 * grid.narrow_bwp_rb() as u32;
        let mut symbols = free as u32;
        while symbols > 1 && width * (symbols - 1) >= num_rb {
            symbols -= 1;
        }
        let candidate = WideCandidate {
            first_bwp: bwps[pos],
            last_bwp: bwps[end],
            symbols: symbols as u8,
        };
        let covered = (width * symbols).min(num_rb);

        let best_side = [
            self.find_optimal_scheduling(grid, &bwps[..pos], num_rb),
            self.find_optimal_scheduling(grid, &bwps[end + 1..], num_rb),
        ]
        .into_iter()
        .flatten()
        .max_by_key(|c| self.candidate_area(grid, c, num_rb));

        match best_side {
            Some(side) if self.candidate_area(grid, &side, num_rb) > covered => Some(side),
            _ => Some(candidate),
        }
    }

    fn candidate_area(&self, grid: &ResourceGrid, candidate: &WideCandidate, num_rb: u32) -> u32 {
        let width =
            (candidate.last_bwp - candidate.first_bwp + 1) as u32 * grid.narrow_bwp_rb() as u32;
        (width * candidate.symbols as u32).min(num_rb)
    }

    /// Recompute the trailing free-symbol counters for a new slot.
    ///
    /// The counter walks each narrowband BWP's first RB column upward from
    /// the last data symbol; it is a proxy, not a full-row check.
    pub fn reset_free_resources(
        &mut self,
        grid: &ResourceGrid,
        slot: &SlotTime,
        direction: Direction,
    ) {
        let slot_index = slot.normalize();
        if self.last_reset == Some(slot_index) {
            return;
        }
        self.last_reset = Some(slot_index);
        let base = grid.row_for_slot(slot);
        for bwp in 0..grid.bwps().narrowband_count() {
            let (coreset, lower) = match grid.bwps().get(bwp) {
                Ok(c) => (c.coreset_symbols, c.borders.lower),
                Err(_) => continue,
            };
            let (first_sym, last_sym) = data_symbols(direction, coreset);
            let mut free = 0u8;
            for sym in (first_sym..last_sym).rev() {
                if !grid.cell(base + sym, lower).is_free() {
                    break;
                }
                free += 1;
            }
            self.free_symbols[bwp as usize] = free;
        }
        trace!("Free symbols at {}: {:?}", slot, self.free_symbols);
    }

    /// Trailing free data symbols currently tracked for a narrowband BWP
    pub fn free_symbols(&self, bwp: u8) -> u8 {
        self.free_symbols
            .get(bwp as usize)
            .copied()
            .unwrap_or(0)
    }

    #[allow(clippy::too_many_arguments)]
    fn commit(
        &self,
        grid: &mut ResourceGrid,
        slot: &SlotTime,
        bwp: u8,
        borders: BwpBorders,
        rnti: Rnti,
        start_symbol: usize,
        num_symbols: u32,
        start_rb: u16,
        num_rb: u32,
    ) -> Allocation {
        let allocation = Allocation {
            slot: *slot,
            bwp,
            start_symbol: start_symbol as u8,
            num_symbols: num_symbols as u8,
            start_rb,
            num_rb: num_rb as u16,
            rbg_mask: create_rbg_mask(borders, start_rb, num_rb as u16),
        };
        grid.mark_resources(&allocation, rnti);
        allocation
    }
}

/// Usable data symbol range for a direction: downlink data starts after the
/// CORESET, uplink data stops before the trailing PUCCH symbol.
fn data_symbols(direction: Direction, coreset_symbols: u8) -> (usize, usize) {
    match direction {
        Direction::Downlink => (coreset_symbols as usize, SYMBOLS_PER_SLOT),
        Direction::Uplink => (0, SYMBOLS_PER_SLOT - 1),
    }
}

/// Whether `height` rows starting at `row` are fully free over an RB range
fn rect_free(grid: &ResourceGrid, row: usize, height: usize, start_rb: u16, width: u32) -> bool {
    if row + height > grid.window_rows() {
        return false;
    }
    for r in row..row + height {
        for rb in start_rb..start_rb + width as u16 {
            if !grid.cell(r, rb).is_free() {
                return false;
            }
        }
    }
    true
}

/// Per-RB bitmap of the grant within its BWP.
///
/// A grant outside its BWP borders is a scheduling-logic defect; the mask
/// is clamped to the borders after logging.
pub fn create_rbg_mask(borders: BwpBorders, start_rb: u16, num_rb: u16) -> Vec<u8> {
    let in_range = start_rb >= borders.lower && start_rb + num_rb <= borders.upper + 1;
    if !in_range {
        error!(
            "RBG mask for RB [{}, {}) escapes BWP borders [{}, {}]",
            start_rb,
            start_rb + num_rb,
            borders.lower,
            borders.upper
        );
        debug_assert!(in_range, "RBG mask escapes BWP borders");
    }
    let mut mask = vec![0u8; borders.width() as usize];
    for rb in start_rb..start_rb + num_rb {
        if borders.contains(rb) {
            mask[(rb - borders.lower) as usize] = 1;
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridConfig, ResourceCell};

    fn test_grid() -> ResourceGrid {
        let config = GridConfig {
            pattern: "DL|S|UL|UL|DL|DL|S|UL|UL|UL".parse().unwrap(),
            numerology: 0,
            window_ms: 160,
            bwp_count: 4,
            carrier_rb: 102,
        };
        let mut grid = ResourceGrid::new(config).unwrap();
        grid.configure_bwp(0, 51, 2).unwrap();
        grid.configure_bwp(1, 51, 2).unwrap();
        grid.configure_bwp(2, 51, 1).unwrap();
        grid.configure_bwp(3, 51, 1).unwrap();
        grid
    }

    // Slot 2 of the pattern is UL and carries no PBCH
    fn ul_slot() -> SlotTime {
        SlotTime::new(0, 2, 0, 0)
    }

    #[test]
    fn test_single_symbol_run() {
        let mut grid = test_grid();
        let mut allocator = SlotAllocator::new(&grid, false);
        let alloc = allocator
            .schedule_data(&mut grid, 0, Rnti::new(61), 20, Direction::Uplink, false, &ul_slot())
            .unwrap()
            .unwrap();
        assert_eq!(alloc.start_symbol, 0);
        assert_eq!(alloc.num_symbols, 1);
        assert_eq!(alloc.start_rb, 0);
        assert_eq!(alloc.num_rb, 20);
        assert_eq!(alloc.rbg_mask.iter().map(|&b| b as u32).sum::<u32>(), 20);

        let row = grid.row_for_slot(&ul_slot());
        assert_eq!(grid.cell(row, 0), ResourceCell::Allocated(Rnti::new(61)));
        assert_eq!(grid.cell(row, 19), ResourceCell::Allocated(Rnti::new(61)));
        assert_eq!(grid.cell(row, 20), ResourceCell::Free);
    }

    #[test]
    fn test_blocked_run_commits_first_maximal_run() {
        let mut grid = test_grid();
        let slot = ul_slot();
        let row = grid.row_for_slot(&slot);
        // Block RB 10 in the first two data symbols of BWP 0
        grid.set_cell(row, 10, ResourceCell::Allocated(Rnti::new(99)));
        grid.set_cell(row + 1, 10, ResourceCell::Allocated(Rnti::new(99)));

        let mut allocator = SlotAllocator::new(&grid, false);
        let alloc = allocator
            .schedule_data(&mut grid, 0, Rnti::new(61), 30, Direction::Uplink, false, &slot)
            .unwrap()
            .unwrap();
        // First run is RB 0..10 of symbol 0, extended down while short of
        // the demand and the range below stays free
        assert_eq!(alloc.start_symbol, 0);
        assert_eq!(alloc.start_rb, 0);
        assert_eq!(alloc.num_rb, 10);
        assert_eq!(alloc.num_symbols, 3);
    }

    #[test]
    fn test_demand_wider_than_bwp_spills_across_symbols() {
        let mut grid = test_grid();
        let mut allocator = SlotAllocator::new(&grid, false);
        let alloc = allocator
            .schedule_data(&mut grid, 0, Rnti::new(61), 120, Direction::Uplink, false, &ul_slot())
            .unwrap()
            .unwrap();
        // ceil(120 / 51) = 3 fully-free symbols across the whole BWP
        assert_eq!(alloc.num_symbols, 3);
        assert_eq!(alloc.num_rb, 51);
        assert_eq!(alloc.start_symbol, 0);
        assert_eq!(alloc.start_rb, 0);
    }

    #[test]
    fn test_partial_drops_first_symbol_when_blocked_at_rb_zero() {
        let mut grid = test_grid();
        let slot = ul_slot();
        let row = grid.row_for_slot(&slot);
        // Symbols 0..2 fully free, symbol 2 blocked at the BWP's first RB.
        // The complete scan cannot place 3 full symbols before the blocker
        // resets it, and no later triple exists either.
        for sym in 2..13 {
            grid.set_cell(row + sym, 0, ResourceCell::Allocated(Rnti::new(99)));
        }
        let mut allocator = SlotAllocator::new(&grid, false);
        let alloc = allocator
            .schedule_partial_packet(&mut grid, 0, Rnti::new(61), 130, Direction::Uplink, &slot)
            .unwrap()
            .unwrap();
        // Two symbols accumulated, one dropped by the first-RB rule
        assert_eq!(alloc.num_symbols, 1);
        assert_eq!(alloc.start_symbol, 1);
        assert_eq!(alloc.num_rb, 51);
    }

    #[test]
    fn test_wide_allocation_spans_bwps() {
        let mut grid = test_grid();
        let mut allocator = SlotAllocator::new(&grid, false);
        let slot = ul_slot();
        let alloc = allocator
            .schedule_data(&mut grid, 2, Rnti::new(61), 150, Direction::Uplink, false, &slot)
            .unwrap()
            .unwrap();
        // Both narrowband BWPs show 13 trailing free symbols, so the group
        // spans the carrier; 2 symbols x 102 RB cover the 150 RB demand
        assert_eq!(alloc.start_rb, 0);
        assert_eq!(alloc.num_rb, 102);
        assert_eq!(alloc.num_symbols, 2);
        assert_eq!(alloc.start_symbol, 0);
        assert_eq!(allocator.free_symbols(0), 11);
        assert_eq!(allocator.free_symbols(1), 11);
    }

    #[test]
    fn test_narrow_allocation_lowers_free_symbols() {
        let mut grid = test_grid();
        let mut allocator = SlotAllocator::new(&grid, false);
        let slot = ul_slot();
        allocator.reset_free_resources(&grid, &slot, Direction::Uplink);

        // 204 RB spill across 4 full-width symbols of BWP 1
        allocator
            .schedule_data(&mut grid, 1, Rnti::new(61), 204, Direction::Uplink, false, &slot)
            .unwrap()
            .unwrap();
        assert_eq!(allocator.free_symbols(1), 9);
        assert_eq!(allocator.free_symbols(0), 13);
    }

    #[test]
    fn test_wide_search_sees_same_pass_grants() {
        let mut grid = test_grid();
        let mut allocator = SlotAllocator::new(&grid, false);
        let slot = ul_slot();
        allocator.reset_free_resources(&grid, &slot, Direction::Uplink);

        allocator
            .schedule_data(&mut grid, 1, Rnti::new(61), 204, Direction::Uplink, false, &slot)
            .unwrap()
            .unwrap();

        // BWP 1 lost its top 4 symbols, so the wide search must settle on
        // BWP 0 alone instead of spanning the carrier over occupied cells
        let wide = allocator
            .schedule_data(&mut grid, 2, Rnti::new(62), 1000, Direction::Uplink, false, &slot)
            .unwrap()
            .unwrap();
        assert_eq!(wide.start_rb, 0);
        assert_eq!(wide.num_rb, 51);

        let row = grid.row_for_slot(&slot);
        for sym in 0..4 {
            for rb in 51..102 {
                assert_eq!(grid.cell(row + sym, rb), ResourceCell::Allocated(Rnti::new(61)));
            }
        }
    }

    #[test]
    fn test_wide_falls_back_to_plain_scan_when_search_exhausted() {
        let mut grid = test_grid();
        let slot = ul_slot();
        let row = grid.row_for_slot(&slot);
        // Both narrowband first-RB columns blocked: the cross-BWP search
        // sees zero trailing free symbols everywhere
        for sym in 0..13 {
            grid.set_cell(row + sym, 0, ResourceCell::Allocated(Rnti::new(99)));
            grid.set_cell(row + sym, 51, ResourceCell::Allocated(Rnti::new(99)));
        }
        let mut allocator = SlotAllocator::new(&grid, false);
        let alloc = allocator
            .schedule_data(&mut grid, 2, Rnti::new(61), 150, Direction::Uplink, false, &slot)
            .unwrap()
            .unwrap();
        // The plain scan still finds the run between the blocked columns,
        // extended down towards the rounded two-symbol full-width demand
        assert_eq!(alloc.start_rb, 1);
        assert_eq!(alloc.num_rb, 50);
        assert_eq!(alloc.num_symbols, 5);
    }

    #[test]
    fn test_wide_partial_fallback_commits_tail_run() {
        let mut grid = test_grid();
        let slot = ul_slot();
        let row = grid.row_for_slot(&slot);
        // Fill the whole uplink data region except RB 92..102 of symbol 0
        for sym in 0..13 {
            for rb in 0..102 {
                if sym == 0 && rb >= 92 {
                    continue;
                }
                if grid.cell(row + sym, rb).is_free() {
                    grid.set_cell(row + sym, rb, ResourceCell::Allocated(Rnti::new(99)));
                }
            }
        }
        let mut allocator = SlotAllocator::new(&grid, false);
        let alloc = allocator
            .schedule_data(&mut grid, 2, Rnti::new(61), 80, Direction::Uplink, false, &slot)
            .unwrap()
            .unwrap();
        assert_eq!(alloc.start_symbol, 0);
        assert_eq!(alloc.num_symbols, 1);
        assert_eq!(alloc.start_rb, 92);
        assert_eq!(alloc.num_rb, 10);
    }

    #[test]
    fn test_wide_search_prefers_larger_area() {
        let mut grid = test_grid();
        let slot = ul_slot();
        let row = grid.row_for_slot(&slot);
        // Occupy the first 5 data symbols of BWP 1's first RB column so its
        // trailing free count drops to 8
        for sym in 0..5 {
            grid.set_cell(row + sym, 51, ResourceCell::Allocated(Rnti::new(99)));
        }
        let mut allocator = SlotAllocator::new(&grid, false);
        allocator.reset_free_resources(&grid, &slot, Direction::Uplink);
        assert_eq!(allocator.free_symbols(0), 13);
        assert_eq!(allocator.free_symbols(1), 8);

        // A demand needing the full depth lands on BWP 0 alone, trimmed to
        // the fewest symbols still covering it
        let candidate = allocator
            .find_optimal_scheduling(&grid, &[0, 1], 600)
            .unwrap();
        assert_eq!(candidate.first_bwp, 0);
        assert_eq!(candidate.last_bwp, 0);
        assert_eq!(candidate.symbols, 12);
    }

    #[test]
    fn test_msg3_grant_is_deferred() {
        let mut grid = test_grid();
        let mut allocator = SlotAllocator::new(&grid, false);
        let slot = SlotTime::new(0, 0, 0, 0);
        let alloc = allocator
            .schedule_data(&mut grid, 0, Rnti::new(70), 10, Direction::Uplink, true, &slot)
            .unwrap()
            .unwrap();
        // Delta 2 + lead 10 = slot 12, advanced to the next UL-capable
        // slot of the pattern (slot 12 is UL already)
        assert_eq!(alloc.slot.normalize(), 12);
        assert!(grid.is_msg3_grant(12, Rnti::new(70)));
    }

    #[test]
    fn test_exhausted_bwp_yields_none() {
        let mut grid = test_grid();
        let slot = ul_slot();
        let row = grid.row_for_slot(&slot);
        for sym in 0..14 {
            for rb in 0..51 {
                if grid.cell(row + sym, rb).is_free() {
                    grid.set_cell(row + sym, rb, ResourceCell::Allocated(Rnti::new(99)));
                }
            }
        }
        let mut allocator = SlotAllocator::new(&grid, false);
        let alloc = allocator
            .schedule_data(&mut grid, 0, Rnti::new(61), 10, Direction::Uplink, false, &slot)
            .unwrap();
        assert!(alloc.is_none());
    }

    #[test]
    fn test_rbg_mask_popcount() {
        let borders = BwpBorders {
            lower: 51,
            upper: 101,
        };
        let mask = create_rbg_mask(borders, 60, 12);
        assert_eq!(mask.len(), 51);
        assert_eq!(mask.iter().map(|&b| b as u32).sum::<u32>(), 12);
        assert_eq!(mask[9], 1);
        assert_eq!(mask[8], 0);
        assert_eq!(mask[21], 0);
    }
}
