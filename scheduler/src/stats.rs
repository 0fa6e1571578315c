//! Resource Usage Accounting and Telemetry Writers
//!
//! Counters are accumulated when a window half is retired and written out as
//! delimited log files at the end of a run.

use crate::grid::ResourceGrid;
use crate::SchedulerError;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Carrier-wide resource element counters, split by cell type
#[derive(Debug, Default, Clone, Serialize)]
pub struct ResourceUsageStats {
    pub pdcch_resources: u64,
    pub pdcch_used: u64,
    pub pucch_resources: u64,
    pub control_resources: u64,
    pub prach_resources: u64,
    pub free_dl: u64,
    pub free_ul: u64,
    pub used_dl: u64,
    pub used_ul: u64,
}

impl ResourceUsageStats {
    /// Total number of accounted resource elements
    pub fn total(&self) -> u64 {
        self.pdcch_resources
            + self.pdcch_used
            + self.pucch_resources
            + self.control_resources
            + self.prach_resources
            + self.free_dl
            + self.free_ul
            + self.used_dl
            + self.used_ul
    }
}

/// Per-UE uplink resource accounting.
///
/// Cells carry RNTIs, but reporting is keyed by the stable device identity.
/// Counts for RNTIs whose identity is not yet registered are parked in a
/// temporary map and folded in once the mapping shows up.
#[derive(Debug, Default, Clone)]
pub struct UeResourceUsage {
    per_device: HashMap<u64, u64>,
    unresolved: HashMap<u16, u64>,
    /// Unused uplink-capable resource elements
    pub free: u64,
}

impl UeResourceUsage {
    pub fn add_for_device(&mut self, device: u64, count: u64) {
        *self.per_device.entry(device).or_insert(0) += count;
    }

    pub fn add_unresolved(&mut self, rnti: u16, count: u64) {
        *self.unresolved.entry(rnti).or_insert(0) += count;
    }

    /// Fold parked RNTI counts into the per-device map where possible
    pub fn reconcile(&mut self, rnti_map: &HashMap<u16, u64>) {
        let resolved: Vec<u16> = self
            .unresolved
            .keys()
            .copied()
            .filter(|rnti| rnti_map.contains_key(rnti))
            .collect();
        for rnti in resolved {
            let count = self.unresolved.remove(&rnti).unwrap_or(0);
            let device = rnti_map[&rnti];
            self.add_for_device(device, count);
            debug!(
                "Folded {} resource elements of RNTI {} into device {}",
                count, rnti, device
            );
        }
    }

    pub fn per_device(&self) -> &HashMap<u64, u64> {
        &self.per_device
    }

    pub fn unresolved_total(&self) -> u64 {
        self.unresolved.values().sum()
    }
}

/// PRACH occasion usage per slot, with collision detection
#[derive(Debug, Default, Clone)]
pub struct PrachUsage {
    occasions: HashMap<(u64, u8), u32>,
}

impl PrachUsage {
    /// Record one use of a PRACH occasion
    pub fn record(&mut self, slot_index: u64, occasion: u8) {
        let users = self.occasions.entry((slot_index, occasion)).or_insert(0);
        *users += 1;
        if *users > 1 {
            warn!(
                "PRACH collision: occasion {} at slot {} used {} times",
                occasion, slot_index, users
            );
        }
    }

    pub fn used_occasions(&self) -> usize {
        self.occasions.len()
    }

    pub fn collisions(&self) -> usize {
        self.occasions.values().filter(|&&u| u > 1).count()
    }

    fn sorted(&self) -> Vec<(u64, u8, u32)> {
        let mut v: Vec<_> = self
            .occasions
            .iter()
            .map(|(&(slot, occ), &users)| (slot, occ, users))
            .collect();
        v.sort_unstable();
        v
    }
}

/// Delimited telemetry log writers
pub struct SchedulerLogs {
    log_dir: PathBuf,
}

impl SchedulerLogs {
    pub fn new(log_dir: impl Into<PathBuf>) -> Result<Self, SchedulerError> {
        let log_dir = log_dir.into();
        fs::create_dir_all(&log_dir)?;
        Ok(Self { log_dir })
    }

    /// Dump the whole resource window, one symbol row per line
    pub fn write_spectral_usage(&self, grid: &ResourceGrid) -> Result<(), SchedulerError> {
        let path = self.log_dir.join("spectral_usage.log");
        let mut file = File::create(&path)?;
        writeln!(file, "slot\tsymbol\tcells")?;
        for row in 0..grid.window_rows() {
            let slot = row / common::SYMBOLS_PER_SLOT;
            let symbol = row % common::SYMBOLS_PER_SLOT;
            let cells: Vec<String> = (0..grid.carrier_rb())
                .map(|rb| grid.cell(row, rb).code())
                .collect();
            writeln!(file, "{}\t{}\t{}", slot, symbol, cells.join("\t"))?;
        }
        info!("Wrote spectral usage to {}", path.display());
        Ok(())
    }

    /// Per-slot, per-BWP PDCCH occupancy ratios
    pub fn write_pdcch_usage(&self, grid: &ResourceGrid) -> Result<(), SchedulerError> {
        let path = self.log_dir.join("pdcch_usage.log");
        let mut file = File::create(&path)?;
        writeln!(file, "slot\tbwp\tused\ttotal\tratio")?;
        for slot in 0..grid.window_slots() {
            if !grid.kind_at(slot).is_downlink_capable() {
                continue;
            }
            for bwp in 0..grid.bwps().narrowband_count() {
                let (used, total) = grid.pdcch_occupancy(slot, bwp)?;
                if total == 0 {
                    continue;
                }
                writeln!(
                    file,
                    "{}\t{}\t{}\t{}\t{:.3}",
                    slot,
                    bwp,
                    used,
                    total,
                    used as f64 / total as f64
                )?;
            }
        }
        info!("Wrote PDCCH usage to {}", path.display());
        Ok(())
    }

    /// PRACH occasion usage, appended so repeated runs accumulate
    pub fn append_prach_usage(&self, usage: &PrachUsage) -> Result<(), SchedulerError> {
        let path = self.log_dir.join("prach_usage.log");
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        for (slot, occasion, users) in usage.sorted() {
            writeln!(file, "{}\t{}\t{}", slot, occasion, users)?;
        }
        info!(
            "Appended {} PRACH occasions ({} collisions) to {}",
            usage.used_occasions(),
            usage.collisions(),
            path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_counts_fold_on_reconcile() {
        let mut usage = UeResourceUsage::default();
        usage.add_unresolved(61, 40);
        usage.add_unresolved(62, 10);
        assert_eq!(usage.unresolved_total(), 50);

        let mut rnti_map = HashMap::new();
        rnti_map.insert(61u16, 1001u64);
        usage.reconcile(&rnti_map);

        assert_eq!(usage.per_device().get(&1001), Some(&40));
        assert_eq!(usage.unresolved_total(), 10);
    }

    #[test]
    fn test_prach_collision_counting() {
        let mut usage = PrachUsage::default();
        usage.record(100, 0);
        usage.record(100, 1);
        usage.record(100, 1);
        assert_eq!(usage.used_occasions(), 2);
        assert_eq!(usage.collisions(), 1);
    }
}
