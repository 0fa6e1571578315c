//! Beam Fair Share and UE Ordering
//!
//! Splits the symbols available in a slot across beams in proportion to
//! their buffered traffic, and orders UEs round-robin so that grants rotate
//! over RNTIs across slots.

use common::Rnti;
use tracing::trace;

/// A UE below this many granted bytes is never considered satisfied
const SATISFIED_FLOOR: u32 = 10;

/// Per-pass scheduling state of one UE
#[derive(Debug, Clone)]
pub struct UeSchedulingInfo {
    pub rnti: Rnti,
    pub beam: u16,
    /// Active BWP the UE's grants are placed on
    pub bwp: u8,
    pub buffered_bytes: u32,
    /// Per-stream MCS indices
    pub mcs: Vec<u8>,
    /// Per-stream TBS granted so far in this slot, bytes
    pub tb_size: Vec<u32>,
    /// Resource elements granted in this slot (RB x symbols)
    pub assigned_rb: u32,
    pub assigned_symbols: u8,
    /// UE still waiting for its deferred Msg3 occasion
    pub msg3_pending: bool,
}

impl UeSchedulingInfo {
    pub fn new(rnti: Rnti, beam: u16, bwp: u8, buffered_bytes: u32, mcs: Vec<u8>) -> Self {
        let streams = mcs.len();
        Self {
            rnti,
            beam,
            bwp,
            buffered_bytes,
            mcs,
            tb_size: vec![0; streams],
            assigned_rb: 0,
            assigned_symbols: 0,
            msg3_pending: false,
        }
    }

    /// Total bytes granted across streams
    pub fn granted_bytes(&self) -> u32 {
        self.tb_size.iter().sum()
    }
}

/// Fair-share and round-robin bookkeeping across slots
#[derive(Debug, Default)]
pub struct BeamFairShareCalculator {
    /// RNTI the next rotation starts from
    sched_start_ue: u16,
}

impl BeamFairShareCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split `sym_avail` symbols across beams in proportion to their
    /// buffered bytes: floor shares first, then the remainder one symbol at
    /// a time to the beam currently holding the fewest. The returned shares
    /// sum to exactly `sym_avail`.
    pub fn sym_per_beam(&self, sym_avail: u32, beams: &[(u16, u32)]) -> Vec<(u16, u32)> {
        if beams.is_empty() {
            return Vec::new();
        }
        let total: u64 = beams.iter().map(|&(_, buf)| buf as u64).sum();
        let mut shares: Vec<(u16, u32)> = beams
            .iter()
            .map(|&(beam, buf)| {
                let share = if total == 0 {
                    0
                } else {
                    (sym_avail as u64 * buf as u64 / total) as u32
                };
                (beam, share)
            })
            .collect();
        let mut assigned: u32 = shares.iter().map(|&(_, s)| s).sum();
        while assigned < sym_avail {
            // First beam with the minimum share gets the next symbol
            let min = shares
                .iter_mut()
                .min_by_key(|&&mut (_, s)| s)
                .expect("beams is non-empty");
            min.1 += 1;
            assigned += 1;
        }
        trace!("Beam symbol shares: {:?}", shares);
        shares
    }

    /// Visit order over a subset of UEs (indices into `ues`): ascending
    /// RNTI, rotated so the first visited RNTI is the smallest one at or
    /// above the round-robin pointer.
    pub fn ordered_indices(&self, ues: &[UeSchedulingInfo], members: &[usize]) -> Vec<usize> {
        let mut order: Vec<usize> = members.to_vec();
        order.sort_by_key(|&i| ues[i].rnti);
        let pivot = order
            .iter()
            .position(|&i| ues[i].rnti.value() >= self.sched_start_ue)
            .unwrap_or(0);
        order.rotate_left(pivot);
        order
    }

    /// Move the pointer past a UE that just received an uplink grant
    pub fn advance(&mut self, rnti: Rnti) {
        self.sched_start_ue = rnti.value().wrapping_add(1);
    }

    pub fn start_ue(&self) -> u16 {
        self.sched_start_ue
    }
}

/// Whether the UE's grants already cover its buffer.
///
/// Streams are filled in order; once the leading streams cover the buffer,
/// the trailing stream grants are zeroed rather than transmitted.
pub fn is_satisfied(ue: &mut UeSchedulingInfo) -> bool {
    let mut covered = 0u32;
    for i in 0..ue.tb_size.len() {
        if i > 0 && covered >= ue.buffered_bytes {
            ue.tb_size[i] = 0;
        }
        covered += ue.tb_size[i];
    }
    ue.granted_bytes() >= ue.buffered_bytes.max(SATISFIED_FLOOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ue(rnti: u16, buffered: u32) -> UeSchedulingInfo {
        UeSchedulingInfo::new(Rnti::new(rnti), 0, 0, buffered, vec![10])
    }

    #[test]
    fn test_proportional_shares_sum_exactly() {
        let calc = BeamFairShareCalculator::new();
        let shares = calc.sym_per_beam(10, &[(0, 100), (1, 200), (2, 700)]);
        assert_eq!(shares, vec![(0, 1), (1, 2), (2, 7)]);
    }

    #[test]
    fn test_remainder_goes_to_smallest_share() {
        let calc = BeamFairShareCalculator::new();
        let shares = calc.sym_per_beam(10, &[(0, 100), (1, 100), (2, 100)]);
        assert_eq!(shares.iter().map(|&(_, s)| s).sum::<u32>(), 10);
        assert_eq!(shares[0].1, 4);
        assert_eq!(shares[1].1, 3);
        assert_eq!(shares[2].1, 3);
    }

    #[test]
    fn test_zero_demand_still_sums_exactly() {
        let calc = BeamFairShareCalculator::new();
        let shares = calc.sym_per_beam(5, &[(0, 0), (1, 0)]);
        assert_eq!(shares.iter().map(|&(_, s)| s).sum::<u32>(), 5);
    }

    #[test]
    fn test_rotation_starts_at_pointer() {
        let mut calc = BeamFairShareCalculator::new();
        let ues = vec![ue(64, 10), ue(61, 10), ue(63, 10)];

        calc.advance(Rnti::new(61));
        assert_eq!(calc.start_ue(), 62);
        let order = calc.ordered_indices(&ues, &[0, 1, 2]);
        let rntis: Vec<u16> = order.iter().map(|&i| ues[i].rnti.value()).collect();
        assert_eq!(rntis, vec![63, 64, 61]);
    }

    #[test]
    fn test_rotation_wraps_past_largest_rnti() {
        let mut calc = BeamFairShareCalculator::new();
        let ues = vec![ue(64, 10), ue(61, 10), ue(63, 10)];
        calc.advance(Rnti::new(64));
        let order = calc.ordered_indices(&ues, &[0, 1, 2]);
        let rntis: Vec<u16> = order.iter().map(|&i| ues[i].rnti.value()).collect();
        assert_eq!(rntis, vec![61, 63, 64]);
    }

    #[test]
    fn test_trailing_streams_zeroed_once_buffer_covered() {
        let mut info = UeSchedulingInfo::new(Rnti::new(61), 0, 0, 50, vec![10, 10]);
        info.tb_size = vec![60, 40];
        assert!(is_satisfied(&mut info));
        assert_eq!(info.tb_size, vec![60, 0]);
    }

    #[test]
    fn test_small_grants_are_not_satisfied() {
        let mut info = ue(61, 4);
        info.tb_size = vec![6];
        // Buffer covered but below the satisfied floor
        assert!(!is_satisfied(&mut info));
    }
}
