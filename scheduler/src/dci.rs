//! DCI Assembly
//!
//! After allocation, a snapshot of the slot is scanned back into downlink
//! control messages: one DCI per rectangular same-RNTI grant.
//! Msg3 grants are retained as used after their DCI goes out so later
//! passes over the slot do not pick them up again.

use crate::amc::AmcModel;
use crate::allocator::create_rbg_mask;
use crate::fair_share::UeSchedulingInfo;
use crate::grid::{ResourceCell, ResourceGrid};
use crate::SchedulerError;
use common::{Direction, Rnti, SlotTime, SYMBOLS_PER_SLOT};
use std::collections::HashSet;
use tracing::{debug, error, trace};

/// Downlink control information for one grant
#[derive(Debug, Clone)]
pub struct DciInfo {
    pub rnti: Rnti,
    pub direction: Direction,
    pub bwp: u8,
    pub start_symbol: u8,
    pub num_symbols: u8,
    pub start_rb: u16,
    /// Total RB x symbol resource elements of the grant
    pub num_rb: u32,
    pub rbg_mask: Vec<u8>,
    pub mcs: Vec<u8>,
    pub tb_size: Vec<u32>,
    pub ndi: Vec<u8>,
    pub rv: Vec<u8>,
}

/// Scans committed grants back out of the grid as DCIs.
///
/// RNTIs already covered by a DCI in the current slot are tracked across
/// BWPs: a second rectangle for the same RNTI is a scheduling-logic defect
/// on narrowband BWPs and is dropped without notice on the wide BWPs.
#[derive(Debug, Default)]
pub struct DciAssembler {
    current_slot: Option<u64>,
    emitted: HashSet<u16>,
}

impl DciAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assemble(
        &mut self,
        grid: &mut ResourceGrid,
        amc: &AmcModel,
        bwp: u8,
        slot: &SlotTime,
        direction: Direction,
        ues: &mut [UeSchedulingInfo],
    ) -> Result<Vec<DciInfo>, SchedulerError> {
        let slot_index = slot.normalize();
        if self.current_slot != Some(slot_index) {
            self.current_slot = Some(slot_index);
            self.emitted.clear();
        }

        let borders = grid.bwps().borders(bwp)?;
        let snapshot = grid.slot_resources(bwp, slot)?;
        let wide = grid.bwps().is_wide(bwp);
        let mut dcis = Vec::new();

        for sym in 0..SYMBOLS_PER_SLOT {
            let mut rel = 0usize;
            while rel < snapshot.ncols() {
                let rnti = match snapshot[[sym, rel]] {
                    ResourceCell::Allocated(rnti) => rnti,
                    _ => {
                        rel += 1;
                        continue;
                    }
                };
                let start_rel = rel;
                while rel < snapshot.ncols()
                    && snapshot[[sym, rel]] == ResourceCell::Allocated(rnti)
                {
                    rel += 1;
                }
                let width = (rel - start_rel) as u16;
                let start_rb = borders.lower + start_rel as u16;
                // Only the rectangle's top row starts a DCI
                if sym > 0 && snapshot[[sym - 1, start_rel]] == ResourceCell::Allocated(rnti) {
                    continue;
                }
                let mut height = 1u8;
                while sym + (height as usize) < SYMBOLS_PER_SLOT
                    && (start_rel..rel).all(|r| {
                        snapshot[[sym + height as usize, r]] == ResourceCell::Allocated(rnti)
                    })
                {
                    height += 1;
                }

                if self.emitted.contains(&rnti.value()) {
                    if wide {
                        trace!(
                            "Dropping extra grant for RNTI {} found on wide BWP {}",
                            rnti,
                            bwp
                        );
                    } else {
                        error!(
                            "RNTI {} holds a second grant in BWP {} at {} (RB {}, symbol {})",
                            rnti, bwp, slot, start_rb, sym
                        );
                        debug_assert!(false, "duplicate RNTI in DCI assembly");
                    }
                    continue;
                }

                let ue = match ues.iter_mut().find(|u| u.rnti == rnti) {
                    Some(ue) => ue,
                    None => {
                        debug!(
                            "Grant for unknown RNTI {} in BWP {} at {}, no DCI",
                            rnti, bwp, slot
                        );
                        continue;
                    }
                };

                let total_rb = width as u32 * height as u32;
                let tb_size: Vec<u32> = ue
                    .mcs
                    .iter()
                    .map(|&mcs| amc.tb_size_bytes(mcs, total_rb))
                    .collect();
                for (granted, tb) in ue.tb_size.iter_mut().zip(&tb_size) {
                    *granted += tb;
                }
                let streams = ue.mcs.len();
                dcis.push(DciInfo {
                    rnti,
                    direction,
                    bwp,
                    start_symbol: sym as u8,
                    num_symbols: height,
                    start_rb,
                    num_rb: total_rb,
                    rbg_mask: create_rbg_mask(borders, start_rb, width),
                    mcs: ue.mcs.clone(),
                    tb_size,
                    ndi: vec![1; streams],
                    rv: vec![0; streams],
                });
                self.emitted.insert(rnti.value());

                if grid.is_msg3_grant(slot_index, rnti) {
                    grid.mark_msg3_used(slot, rnti, bwp)?;
                    grid.clear_msg3(slot_index);
                    debug!("Msg3 grant for RNTI {} retained after DCI at {}", rnti, slot);
                }
            }
        }
        Ok(dcis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Allocation, GridConfig};

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

    fn grant(grid: &mut ResourceGrid, slot: &SlotTime, rnti: u16, start_rb: u16, num_rb: u16) {
        let allocation = Allocation {
            slot: *slot,
            bwp: 0,
            start_symbol: 3,
            num_symbols: 2,
            start_rb,
            num_rb,
            rbg_mask: vec![],
        };
        grid.mark_resources(&allocation, Rnti::new(rnti));
    }

    #[test]
    fn test_dci_matches_grant_rectangle() {
        let mut grid = test_grid();
        let slot = SlotTime::new(0, 2, 0, 0);
        grant(&mut grid, &slot, 61, 10, 8);

        let mut ues = vec![UeSchedulingInfo::new(Rnti::new(61), 0, 0, 100, vec![10])];
        let mut assembler = DciAssembler::new();
        let amc = AmcModel;
        let dcis = assembler
            .assemble(&mut grid, &amc, 0, &slot, Direction::Uplink, &mut ues)
            .unwrap();

        assert_eq!(dcis.len(), 1);
        let dci = &dcis[0];
        assert_eq!(dci.rnti, Rnti::new(61));
        assert_eq!(dci.start_symbol, 3);
        assert_eq!(dci.num_symbols, 2);
        assert_eq!(dci.start_rb, 10);
        assert_eq!(dci.num_rb, 16);
        assert_eq!(dci.tb_size, vec![amc.tb_size_bytes(10, 16)]);
        assert_eq!(ues[0].granted_bytes(), amc.tb_size_bytes(10, 16));
        assert_eq!(dci.rbg_mask.iter().map(|&b| b as u32).sum::<u32>(), 8);
    }

    #[test]
    fn test_msg3_grant_not_emitted_twice() {
        let mut grid = test_grid();
        let slot = SlotTime::new(0, 2, 0, 0);
        grant(&mut grid, &slot, 70, 0, 10);
        grid.expect_msg3(slot.normalize(), Rnti::new(70));

        let mut ues = vec![UeSchedulingInfo::new(Rnti::new(70), 0, 0, 50, vec![4])];
        let amc = AmcModel;
        let dcis = DciAssembler::new()
            .assemble(&mut grid, &amc, 0, &slot, Direction::Uplink, &mut ues)
            .unwrap();
        assert_eq!(dcis.len(), 1);

        // The grant is retained as used; a fresh pass finds nothing
        let again = DciAssembler::new()
            .assemble(&mut grid, &amc, 0, &slot, Direction::Uplink, &mut ues)
            .unwrap();
        assert!(again.is_empty());
        assert!(!grid.is_msg3_grant(slot.normalize(), Rnti::new(70)));
    }

    #[test]
    fn test_wide_bwp_drops_already_emitted_rnti() {
        let mut grid = test_grid();
        let slot = SlotTime::new(0, 2, 0, 0);
        grant(&mut grid, &slot, 61, 10, 8);

        let mut ues = vec![UeSchedulingInfo::new(Rnti::new(61), 0, 0, 100, vec![10])];
        let amc = AmcModel;
        let mut assembler = DciAssembler::new();
        let narrow = assembler
            .assemble(&mut grid, &amc, 0, &slot, Direction::Uplink, &mut ues)
            .unwrap();
        assert_eq!(narrow.len(), 1);

        // The wide BWP spans the same RBs and sees the grant again
        let wide = assembler
            .assemble(&mut grid, &amc, 2, &slot, Direction::Uplink, &mut ues)
            .unwrap();
        assert!(wide.is_empty());
    }

    #[test]
    #[should_panic(expected = "duplicate RNTI")]
    fn test_second_grant_on_narrowband_is_fatal() {
        let mut grid = test_grid();
        let slot = SlotTime::new(0, 2, 0, 0);
        grant(&mut grid, &slot, 61, 10, 8);
        grant(&mut grid, &slot, 61, 30, 4);

        let mut ues = vec![UeSchedulingInfo::new(Rnti::new(61), 0, 0, 100, vec![10])];
        let amc = AmcModel;
        let _ = DciAssembler::new().assemble(
            &mut grid,
            &amc,
            0,
            &slot,
            Direction::Uplink,
            &mut ues,
        );
    }

    #[test]
    fn test_unknown_rnti_is_skipped() {
        let mut grid = test_grid();
        let slot = SlotTime::new(0, 2, 0, 0);
        grant(&mut grid, &slot, 99, 0, 5);
        let mut ues: Vec<UeSchedulingInfo> = Vec::new();
        let amc = AmcModel;
        let dcis = DciAssembler::new()
            .assemble(&mut grid, &amc, 0, &slot, Direction::Uplink, &mut ues)
            .unwrap();
        assert!(dcis.is_empty());
    }
}
