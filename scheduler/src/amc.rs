//! Adaptive Modulation and Coding Model
//!
//! Maps an MCS index to transport block sizes over allocated resource
//! elements, following the 64QAM MCS table (3GPP TS 38.214 table
//! 5.1.3.1-1). Used to turn buffered bytes into an RB demand before
//! allocation and to fill the TBS fields of emitted DCIs.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use tracing::error;

/// Spectral efficiency x1024 per MCS index (R x Qm of the 64QAM table)
const EFFICIENCY_X1024: [u32; 29] = [
    240, 314, 386, 502, 616, 758, 898, 1052, 1204, 1358, 1360, 1512, 1736, 1960, 2212, 2464, 2632,
    2628, 2796, 3102, 3402, 3696, 3996, 4314, 4632, 4932, 5238, 5460, 5688,
];

/// Subcarriers per resource block
const SUBCARRIERS_PER_RB: u32 = 12;

/// Transport block CRC attachment in bytes
const CRC_BYTES: u32 = 3;

/// Modulation order per MCS range
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum Modulation {
    Qpsk = 2,
    Qam16 = 4,
    Qam64 = 6,
}

/// MCS to transport-block-size model
#[derive(Debug, Clone, Copy, Default)]
pub struct AmcModel;

impl AmcModel {
    pub const MAX_MCS: u8 = 28;

    /// Modulation order of an MCS index
    pub fn modulation(&self, mcs: u8) -> Modulation {
        let qm = match mcs {
            0..=9 => 2,
            10..=16 => 4,
            _ => 6,
        };
        Modulation::from_u8(qm).unwrap_or(Modulation::Qpsk)
    }

    /// Transport block size in bytes over `num_rb` RB x symbol resource
    /// elements. Monotone in both arguments.
    pub fn tb_size_bytes(&self, mcs: u8, num_rb: u32) -> u32 {
        if mcs > Self::MAX_MCS {
            error!("MCS {} out of range, clamping to {}", mcs, Self::MAX_MCS);
            debug_assert!(mcs <= Self::MAX_MCS);
        }
        let efficiency = EFFICIENCY_X1024[mcs.min(Self::MAX_MCS) as usize] as u64;
        let bits = efficiency * SUBCARRIERS_PER_RB as u64 * num_rb as u64 / 1024;
        ((bits / 8) as u32).saturating_sub(CRC_BYTES)
    }

    /// Smallest RB count whose TBS covers `bytes` plus the header margin,
    /// bounded by `max_rb`. An optional TBS cap bounds the target instead
    /// when the buffer exceeds it (narrowband deployments).
    pub fn rb_for_bytes(
        &self,
        mcs: u8,
        bytes: u32,
        margin: u32,
        max_rb: u32,
        tbs_cap: Option<u32>,
    ) -> u32 {
        let target = match tbs_cap {
            Some(cap) => (bytes + margin).min(cap),
            None => bytes + margin,
        };
        let mut rb = 1;
        while rb < max_rb && self.tb_size_bytes(mcs, rb) < target {
            rb += 1;
        }
        rb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tb_size_monotone() {
        let amc = AmcModel;
        for mcs in 0..28 {
            assert!(amc.tb_size_bytes(mcs + 1, 50) >= amc.tb_size_bytes(mcs, 50));
        }
        for rb in 1..100 {
            assert!(amc.tb_size_bytes(10, rb + 1) >= amc.tb_size_bytes(10, rb));
        }
    }

    #[test]
    fn test_tb_size_reference_point() {
        let amc = AmcModel;
        // MCS 4: 616/1024 efficiency, 51 RB -> 46 bytes before CRC
        assert_eq!(amc.tb_size_bytes(4, 51), 43);
        assert_eq!(amc.tb_size_bytes(0, 0), 0);
    }

    #[test]
    fn test_rb_demand_covers_buffer() {
        let amc = AmcModel;
        let rb = amc.rb_for_bytes(4, 100, 8, 51 * 13, None);
        assert!(amc.tb_size_bytes(4, rb) >= 108);
        assert!(amc.tb_size_bytes(4, rb - 1) < 108);
    }

    #[test]
    fn test_rb_demand_respects_cap() {
        let amc = AmcModel;
        let capped = amc.rb_for_bytes(10, 100_000, 4, 51 * 13, Some(625));
        assert!(amc.tb_size_bytes(10, capped) >= 625);
        assert!(capped < 51 * 13);
        // Without the cap the demand saturates at max_rb
        assert_eq!(amc.rb_for_bytes(10, 100_000, 4, 51 * 13, None), 51 * 13);
    }

    #[test]
    fn test_modulation_ranges() {
        let amc = AmcModel;
        assert_eq!(amc.modulation(0), Modulation::Qpsk);
        assert_eq!(amc.modulation(10), Modulation::Qam16);
        assert_eq!(amc.modulation(28), Modulation::Qam64);
    }
}
