//! Rolling Resource Window
//!
//! The grid is a single `Array2` of cells covering `window_ms` of symbol
//! rows across the full carrier. Row `r` is symbol `r % 14` of slot
//! `r / 14`; slots wrap modulo the window length, so the two window halves
//! alternate between live scheduling and settling. Static reservations
//! (PBCH, CORESET, PUCCH, PRACH) are stamped into the whole window up front
//! and restored whenever a half is retired.

use crate::bwp::{BwpBorders, BwpRegistry};
use crate::stats::{PrachUsage, ResourceUsageStats, UeResourceUsage};
use crate::SchedulerError;
use common::{Rnti, SlotKind, SlotTime, TddPattern, MAX_NUMEROLOGY, SYMBOLS_PER_SLOT};
use ndarray::Array2;
use std::collections::HashMap;
use tracing::{debug, error, info, trace};

/// RBs of each narrowband BWP carrying the SSB/PBCH block
pub const PBCH_RB: u16 = 22;

/// First symbol of the PBCH reservation within its slot
pub const PBCH_FIRST_SYMBOL: usize = 2;

/// The rolling window length must be a multiple of this many milliseconds
/// so that frame-periodic reservations stay aligned across wraps.
pub const WINDOW_ALIGNMENT_MS: u64 = 160;

/// Non-UE reservation carried by a grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationKind {
    /// PDCCH control region, still claimable
    Coreset,
    /// PDCCH control region consumed by a scheduled grant
    CoresetUsed,
    /// Broadcast channel block
    Pbch,
    /// Random access occasion
    Prach,
    /// Uplink control symbol
    Pucch,
    /// Msg3 grant retained after DCI emission
    Msg3Used,
}

/// One resource element of the scheduling grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceCell {
    Free,
    Reserved(ReservationKind),
    Allocated(Rnti),
}

impl ResourceCell {
    pub fn is_free(&self) -> bool {
        matches!(self, ResourceCell::Free)
    }

    /// Short token for the telemetry dump
    pub fn code(&self) -> String {
        match self {
            ResourceCell::Free => "-".to_string(),
            ResourceCell::Reserved(ReservationKind::Coreset) => "C".to_string(),
            ResourceCell::Reserved(ReservationKind::CoresetUsed) => "C*".to_string(),
            ResourceCell::Reserved(ReservationKind::Pbch) => "B".to_string(),
            ResourceCell::Reserved(ReservationKind::Prach) => "R".to_string(),
            ResourceCell::Reserved(ReservationKind::Pucch) => "U".to_string(),
            ResourceCell::Reserved(ReservationKind::Msg3Used) => "M".to_string(),
            ResourceCell::Allocated(rnti) => rnti.to_string(),
        }
    }
}

/// A committed rectangular grant within one slot and one BWP.
///
/// `num_rb` counts RBs per scheduled symbol; the grant covers
/// `num_rb * num_symbols` resource elements in total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub slot: SlotTime,
    pub bwp: u8,
    pub start_symbol: u8,
    pub num_symbols: u8,
    pub start_rb: u16,
    pub num_rb: u16,
    pub rbg_mask: Vec<u8>,
}

impl Allocation {
    /// Resource elements covered by this grant
    pub fn total_rb(&self) -> u32 {
        self.num_rb as u32 * self.num_symbols as u32
    }
}

/// PRACH occasion layout (3GPP TS 38.211 table 6.3.3.2 style parameters)
#[derive(Debug, Clone)]
pub struct PrachConfig {
    /// Frame period: occasions occur in frames where `frame % nf_x == nf_y`
    pub nf_x: u64,
    pub nf_y: u64,
    /// Subframes within a matching frame that carry occasions
    pub subframes: Vec<u8>,
    /// First PRACH symbol within the slot
    pub start_symbol: u8,
    /// Frequency-multiplexed occasions per PRACH slot
    pub occasions_per_slot: u8,
    /// Symbols per occasion
    pub duration_symbols: u8,
    /// PRACH slots per matching subframe (1 or 2)
    pub prach_slots_per_subframe: u8,
}

/// Grid construction parameters
#[derive(Debug, Clone)]
pub struct GridConfig {
    pub pattern: TddPattern,
    pub numerology: u8,
    pub window_ms: u64,
    pub bwp_count: u8,
    pub carrier_rb: u16,
}

/// The rolling time/frequency resource window
pub struct ResourceGrid {
    pattern: TddPattern,
    numerology: u8,
    window_slots: u64,
    window_rows: usize,
    carrier_rb: u16,
    narrow_bwp_rb: u16,
    cells: Array2<ResourceCell>,
    bwps: BwpRegistry,
    prach: Option<PrachConfig>,
    /// Slot index -> RNTI expecting a Msg3 grant there
    msg3_slots: HashMap<u64, Rnti>,
    /// RNTI -> stable device identity, for usage reporting
    rnti_map: HashMap<u16, u64>,
    stats: ResourceUsageStats,
    ue_usage: UeResourceUsage,
    prach_usage: PrachUsage,
}

impl ResourceGrid {
    pub fn new(config: GridConfig) -> Result<Self, SchedulerError> {
        if config.window_ms == 0 || config.window_ms % WINDOW_ALIGNMENT_MS != 0 {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "Resource window of {} ms is not a multiple of {} ms",
                config.window_ms, WINDOW_ALIGNMENT_MS
            )));
        }
        if config.numerology > MAX_NUMEROLOGY {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "Numerology {} unsupported",
                config.numerology
            )));
        }
        if config.bwp_count < 3 {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "Need at least one narrowband and two wide BWPs, got {}",
                config.bwp_count
            )));
        }
        let narrow_count = (config.bwp_count - 2) as u16;
        if config.carrier_rb == 0 || config.carrier_rb % narrow_count != 0 {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "Carrier of {} RB does not divide into {} narrowband BWPs",
                config.carrier_rb, narrow_count
            )));
        }

        let slots_per_frame = 10u64 << config.numerology;
        let window_slots = config.window_ms * slots_per_frame / 10;
        let window_rows = (window_slots as usize) * SYMBOLS_PER_SLOT;
        let narrow_bwp_rb = config.carrier_rb / narrow_count;

        info!(
            "Resource window: {} ms, {} slots, {} rows x {} RB ({} BWPs of {} RB)",
            config.window_ms, window_slots, window_rows, config.carrier_rb, narrow_count, narrow_bwp_rb
        );

        let mut grid = Self {
            pattern: config.pattern,
            numerology: config.numerology,
            window_slots,
            window_rows,
            carrier_rb: config.carrier_rb,
            narrow_bwp_rb,
            cells: Array2::from_elem((window_rows, config.carrier_rb as usize), ResourceCell::Free),
            bwps: BwpRegistry::new(config.carrier_rb, config.bwp_count),
            prach: None,
            msg3_slots: HashMap::new(),
            rnti_map: HashMap::new(),
            stats: ResourceUsageStats::default(),
            ue_usage: UeResourceUsage::default(),
            prach_usage: PrachUsage::default(),
        };
        grid.reserve_broadcast();
        Ok(grid)
    }

    /// Stamp the PBCH block: first two slots of every frame, symbols 2..13,
    /// the first RBs of every narrowband BWP.
    fn reserve_broadcast(&mut self) {
        let slots_per_frame = 10u64 << self.numerology;
        let narrow_count = self.carrier_rb / self.narrow_bwp_rb;
        let pbch_rb = PBCH_RB.min(self.narrow_bwp_rb);
        let mut frame_start = 0;
        while frame_start < self.window_slots {
            for slot in frame_start..frame_start + 2 {
                let base = (slot as usize) * SYMBOLS_PER_SLOT;
                for sym in PBCH_FIRST_SYMBOL..SYMBOLS_PER_SLOT {
                    for bwp in 0..narrow_count {
                        let lower = bwp * self.narrow_bwp_rb;
                        for rb in lower..lower + pbch_rb {
                            self.cells[[base + sym, rb as usize]] =
                                ResourceCell::Reserved(ReservationKind::Pbch);
                        }
                    }
                }
            }
            frame_start += slots_per_frame;
        }
    }

    /// Register a BWP and stamp its static control reservations over the
    /// whole window: CORESET symbols in DL-capable slots, the trailing PUCCH
    /// symbol in UL-capable slots.
    pub fn configure_bwp(
        &mut self,
        index: u8,
        width: u16,
        coreset_symbols: u8,
    ) -> Result<BwpBorders, SchedulerError> {
        let borders = self.bwps.register(index, width, coreset_symbols)?;
        if self.bwps.is_wide(index) {
            // Wide BWPs reuse the narrowband control regions
            return Ok(borders);
        }
        for slot in 0..self.window_slots {
            let kind = self.pattern.kind_at(slot);
            let base = (slot as usize) * SYMBOLS_PER_SLOT;
            if kind.is_downlink_capable() {
                for sym in 0..coreset_symbols as usize {
                    for rb in borders.lower..=borders.upper {
                        self.cells[[base + sym, rb as usize]] =
                            ResourceCell::Reserved(ReservationKind::Coreset);
                    }
                }
            }
            if kind.is_uplink_capable() {
                for rb in borders.lower..=borders.upper {
                    self.cells[[base + SYMBOLS_PER_SLOT - 1, rb as usize]] =
                        ResourceCell::Reserved(ReservationKind::Pucch);
                }
            }
        }
        Ok(borders)
    }

    /// Stamp PRACH occasions over the whole window. One-time; BWP 0 must be
    /// configured first since occasions span its RB range.
    pub fn reserve_prach(&mut self, config: PrachConfig) -> Result<(), SchedulerError> {
        if self.prach.is_some() {
            return Err(SchedulerError::InvalidConfiguration(
                "PRACH occasions already reserved".to_string(),
            ));
        }
        let bwp0 = self.bwps.borders(0)?;
        let slots_per_subframe = 1u64 << self.numerology;
        let slots_per_frame = 10 * slots_per_subframe;
        let last_symbol =
            config.start_symbol as usize + (config.occasions_per_slot * config.duration_symbols) as usize;
        if last_symbol > SYMBOLS_PER_SLOT {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "PRACH occasions end at symbol {}, past the slot boundary",
                last_symbol
            )));
        }

        let mut reserved_slots = 0;
        for slot in 0..self.window_slots {
            let frame = slot / slots_per_frame;
            let subframe = ((slot % slots_per_frame) / slots_per_subframe) as u8;
            let slot_in_subframe = slot % slots_per_subframe;
            if frame % config.nf_x != config.nf_y
                || !config.subframes.contains(&subframe)
                || (config.prach_slots_per_subframe != 2 && slot_in_subframe % 2 != 0)
            {
                continue;
            }
            let base = (slot as usize) * SYMBOLS_PER_SLOT;
            for sym in config.start_symbol as usize..last_symbol {
                for rb in bwp0.lower..=bwp0.upper {
                    self.cells[[base + sym, rb as usize]] =
                        ResourceCell::Reserved(ReservationKind::Prach);
                }
            }
            reserved_slots += 1;
        }
        debug!("Reserved PRACH occasions in {} slots of the window", reserved_slots);
        self.prach = Some(config);
        Ok(())
    }

    /// First grid row of a slot
    pub fn row_for_slot(&self, slot: &SlotTime) -> usize {
        self.row_for_slot_index(slot.normalize())
    }

    /// First grid row of an absolute slot index
    pub fn row_for_slot_index(&self, slot_index: u64) -> usize {
        ((slot_index % self.window_slots) as usize) * SYMBOLS_PER_SLOT
    }

    pub fn cell(&self, row: usize, rb: u16) -> ResourceCell {
        self.cells[[row, rb as usize]]
    }

    pub(crate) fn set_cell(&mut self, row: usize, rb: u16, value: ResourceCell) {
        self.cells[[row, rb as usize]] = value;
    }

    /// Claim one cell for a UE. Overwriting anything but a free cell is a
    /// scheduling-logic defect; it is logged and the cell keeps its content.
    pub(crate) fn allocate_cell(&mut self, row: usize, rb: u16, rnti: Rnti) {
        let cell = &mut self.cells[[row, rb as usize]];
        if cell.is_free() {
            *cell = ResourceCell::Allocated(rnti);
        } else {
            error!(
                "Cell at row {} (slot {}, symbol {}) RB {} already holds {:?} while marking RNTI {}",
                row,
                row / SYMBOLS_PER_SLOT,
                row % SYMBOLS_PER_SLOT,
                rb,
                cell,
                rnti
            );
        }
    }

    /// Write a committed grant into the grid
    pub fn mark_resources(&mut self, allocation: &Allocation, rnti: Rnti) {
        let base = self.row_for_slot(&allocation.slot) + allocation.start_symbol as usize;
        for sym in 0..allocation.num_symbols as usize {
            for rb in allocation.start_rb..allocation.start_rb + allocation.num_rb {
                self.allocate_cell(base + sym, rb, rnti);
            }
        }
        trace!(
            "Marked {} RB x {} symbols for RNTI {} at {}",
            allocation.num_rb,
            allocation.num_symbols,
            rnti,
            allocation.slot
        );
    }

    /// Retain a Msg3 grant after its DCI was emitted so later DCI passes do
    /// not pick it up again.
    pub fn mark_msg3_used(&mut self, slot: &SlotTime, rnti: Rnti, bwp: u8) -> Result<(), SchedulerError> {
        let borders = self.bwps.borders(bwp)?;
        let base = self.row_for_slot(slot);
        for sym in 0..SYMBOLS_PER_SLOT {
            for rb in borders.lower..=borders.upper {
                if self.cells[[base + sym, rb as usize]] == ResourceCell::Allocated(rnti) {
                    self.cells[[base + sym, rb as usize]] =
                        ResourceCell::Reserved(ReservationKind::Msg3Used);
                }
            }
        }
        Ok(())
    }

    /// 14-symbol snapshot of one BWP at one slot
    pub fn slot_resources(
        &self,
        bwp: u8,
        slot: &SlotTime,
    ) -> Result<Array2<ResourceCell>, SchedulerError> {
        let borders = self.bwps.borders(bwp)?;
        let base = self.row_for_slot(slot);
        Ok(Array2::from_shape_fn(
            (SYMBOLS_PER_SLOT, borders.width() as usize),
            |(sym, rb)| self.cells[[base + sym, borders.lower as usize + rb]],
        ))
    }

    /// Whether the UE already holds data resources in this slot and BWP
    pub fn is_already_scheduled(
        &self,
        rnti: Rnti,
        slot: &SlotTime,
        bwp: u8,
    ) -> Result<bool, SchedulerError> {
        let borders = self.bwps.borders(bwp)?;
        let base = self.row_for_slot(slot);
        for sym in 0..SYMBOLS_PER_SLOT {
            for rb in borders.lower..=borders.upper {
                if self.cells[[base + sym, rb as usize]] == ResourceCell::Allocated(rnti) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Resource elements and distinct symbols a UE holds in one slot,
    /// across the whole carrier
    pub fn granted_elements(&self, rnti: Rnti, slot: &SlotTime) -> (u32, u8) {
        let base = self.row_for_slot(slot);
        let mut elements = 0u32;
        let mut symbols = 0u8;
        for sym in 0..SYMBOLS_PER_SLOT {
            let mut any = false;
            for rb in 0..self.carrier_rb as usize {
                if self.cells[[base + sym, rb]] == ResourceCell::Allocated(rnti) {
                    elements += 1;
                    any = true;
                }
            }
            if any {
                symbols += 1;
            }
        }
        (elements, symbols)
    }

    /// Record that `rnti` expects its Msg3 grant at this slot
    pub fn expect_msg3(&mut self, slot_index: u64, rnti: Rnti) {
        self.msg3_slots.insert(slot_index % self.window_slots, rnti);
    }

    /// Whether the RNTI holds a pending Msg3 grant at this slot
    pub fn is_msg3_grant(&self, slot_index: u64, rnti: Rnti) -> bool {
        self.msg3_slots.get(&(slot_index % self.window_slots)) == Some(&rnti)
    }

    pub fn clear_msg3(&mut self, slot_index: u64) {
        self.msg3_slots.remove(&(slot_index % self.window_slots));
    }

    /// Register the RNTI -> device identity mapping used for usage reporting
    pub fn register_ue(&mut self, rnti: Rnti, device: u64) {
        self.rnti_map.insert(rnti.value(), device);
        self.ue_usage.reconcile(&self.rnti_map);
    }

    /// Record one use of a PRACH occasion
    pub fn update_prach_usage(&mut self, slot_index: u64, occasion: u8) {
        self.prach_usage.record(slot_index, occasion);
    }

    /// Retire the window half that just finished: fold its cells into the
    /// usage counters, then restore the half to its static reservations.
    /// Must be called at each half-window boundary.
    pub fn roll_window(&mut self, now: &SlotTime) {
        let half = self.window_rows / 2;
        let row_now = self.row_for_slot(now);
        let start = if row_now == 0 { half } else { 0 };
        debug!(
            "Rolling window at {}: retiring rows [{}, {})",
            now,
            start,
            start + half
        );
        self.collect_usage(start, start + half);
        self.reset_rows(start, start + half);
    }

    /// Account the partially elapsed half at the end of a run
    pub fn collect_final_usage(&mut self, now: &SlotTime) {
        let half = self.window_rows / 2;
        let row_now = self.row_for_slot(now);
        let start = if row_now >= half { half } else { 0 };
        self.collect_usage(start, row_now);
    }

    fn collect_usage(&mut self, start: usize, end: usize) {
        self.ue_usage.reconcile(&self.rnti_map);
        for row in start..end {
            let slot = (row / SYMBOLS_PER_SLOT) as u64;
            let uplink = self.pattern.kind_at(slot).is_uplink_capable();
            for rb in 0..self.carrier_rb as usize {
                match self.cells[[row, rb]] {
                    ResourceCell::Free => {
                        if uplink {
                            self.stats.free_ul += 1;
                            self.ue_usage.free += 1;
                        } else {
                            self.stats.free_dl += 1;
                        }
                    }
                    ResourceCell::Reserved(ReservationKind::Coreset) => {
                        self.stats.pdcch_resources += 1
                    }
                    ResourceCell::Reserved(ReservationKind::CoresetUsed) => {
                        self.stats.pdcch_used += 1
                    }
                    ResourceCell::Reserved(ReservationKind::Pbch) => {
                        self.stats.control_resources += 1
                    }
                    ResourceCell::Reserved(ReservationKind::Prach) => {
                        self.stats.prach_resources += 1
                    }
                    ResourceCell::Reserved(ReservationKind::Pucch) => {
                        self.stats.pucch_resources += 1
                    }
                    ResourceCell::Reserved(ReservationKind::Msg3Used) => self.stats.used_ul += 1,
                    ResourceCell::Allocated(rnti) => {
                        if uplink {
                            self.stats.used_ul += 1;
                            match self.rnti_map.get(&rnti.value()) {
                                Some(&device) => self.ue_usage.add_for_device(device, 1),
                                None => self.ue_usage.add_unresolved(rnti.value(), 1),
                            }
                        } else {
                            self.stats.used_dl += 1;
                        }
                    }
                }
            }
        }
    }

    /// Restore a row range to its static state: UE grants and retained Msg3
    /// cells become free, consumed CORESET cells become claimable again.
    fn reset_rows(&mut self, start: usize, end: usize) {
        for row in start..end {
            for rb in 0..self.carrier_rb as usize {
                let cell = &mut self.cells[[row, rb]];
                match *cell {
                    ResourceCell::Allocated(_) | ResourceCell::Reserved(ReservationKind::Msg3Used) => {
                        *cell = ResourceCell::Free
                    }
                    ResourceCell::Reserved(ReservationKind::CoresetUsed) => {
                        *cell = ResourceCell::Reserved(ReservationKind::Coreset)
                    }
                    _ => {}
                }
            }
        }
        let start_slot = start / SYMBOLS_PER_SLOT;
        let end_slot = end / SYMBOLS_PER_SLOT;
        self.msg3_slots
            .retain(|&slot, _| (slot as usize) < start_slot || (slot as usize) >= end_slot);
    }

    /// Used and total PDCCH cells of a narrowband BWP at one slot
    pub fn pdcch_occupancy(&self, slot_index: u64, bwp: u8) -> Result<(u64, u64), SchedulerError> {
        let config = self.bwps.get(bwp)?;
        let base = self.row_for_slot_index(slot_index);
        let mut used = 0;
        let mut total = 0;
        for sym in 0..config.coreset_symbols as usize {
            for rb in config.borders.lower..=config.borders.upper {
                match self.cells[[base + sym, rb as usize]] {
                    ResourceCell::Reserved(ReservationKind::Coreset) => total += 1,
                    ResourceCell::Reserved(ReservationKind::CoresetUsed) => {
                        total += 1;
                        used += 1;
                    }
                    _ => {}
                }
            }
        }
        Ok((used, total))
    }

    pub fn kind_at(&self, slot_index: u64) -> SlotKind {
        self.pattern.kind_at(slot_index)
    }

    pub fn pattern(&self) -> &TddPattern {
        &self.pattern
    }

    pub fn bwps(&self) -> &BwpRegistry {
        &self.bwps
    }

    pub fn numerology(&self) -> u8 {
        self.numerology
    }

    pub fn window_slots(&self) -> u64 {
        self.window_slots
    }

    pub fn window_rows(&self) -> usize {
        self.window_rows
    }

    pub fn carrier_rb(&self) -> u16 {
        self.carrier_rb
    }

    pub fn narrow_bwp_rb(&self) -> u16 {
        self.narrow_bwp_rb
    }

    pub fn usage(&self) -> &ResourceUsageStats {
        &self.stats
    }

    pub fn ue_usage(&self) -> &UeResourceUsage {
        &self.ue_usage
    }

    pub fn prach_usage(&self) -> &PrachUsage {
        &self.prach_usage
    }
}
