//! Slot Timing (SFN/SF coordinate)
//!
//! Absolute frame/subframe/slot time coordinate with wraparound-correct
//! slot arithmetic, parameterized by the NR numerology (subcarrier-spacing
//! configuration, 3GPP TS 38.211).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Highest supported numerology index
pub const MAX_NUMEROLOGY: u8 = 5;

/// Number of subframes in a 10 ms frame
pub const SUBFRAMES_PER_FRAME: u64 = 10;

/// OFDM symbols per slot (normal cyclic prefix)
pub const SYMBOLS_PER_SLOT: usize = 14;

/// Absolute frame/subframe/slot time coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotTime {
    frame: u64,
    subframe: u8,
    slot: u8,
    numerology: u8,
}

impl SlotTime {
    /// Create a new slot time.
    ///
    /// Panics if the numerology exceeds [`MAX_NUMEROLOGY`] or the
    /// subframe/slot indices are out of range; these are construction-time
    /// invariants, not runtime data.
    pub fn new(frame: u64, subframe: u8, slot: u8, numerology: u8) -> Self {
        assert!(
            numerology <= MAX_NUMEROLOGY,
            "Numerology {} unsupported",
            numerology
        );
        assert!(subframe < SUBFRAMES_PER_FRAME as u8);
        assert!((slot as u64) < (1u64 << numerology));
        Self {
            frame,
            subframe,
            slot,
            numerology,
        }
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn subframe(&self) -> u8 {
        self.subframe
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn numerology(&self) -> u8 {
        self.numerology
    }

    /// Slots per 1 ms subframe for this numerology
    pub fn slots_per_subframe(&self) -> u64 {
        1u64 << self.numerology
    }

    /// Slots per 10 ms frame for this numerology
    pub fn slots_per_frame(&self) -> u64 {
        SUBFRAMES_PER_FRAME * self.slots_per_subframe()
    }

    /// Absolute slot index since frame 0
    pub fn normalize(&self) -> u64 {
        self.frame * self.slots_per_frame()
            + self.subframe as u64 * self.slots_per_subframe()
            + self.slot as u64
    }

    /// Rebuild a slot time from an absolute slot index
    pub fn from_normalized(index: u64, numerology: u8) -> Self {
        assert!(numerology <= MAX_NUMEROLOGY);
        let per_subframe = 1u64 << numerology;
        let per_frame = SUBFRAMES_PER_FRAME * per_subframe;
        Self {
            frame: index / per_frame,
            subframe: ((index % per_frame) / per_subframe) as u8,
            slot: (index % per_subframe) as u8,
            numerology,
        }
    }

    /// Slot time `n` slots in the future
    pub fn add_slots(&self, n: u64) -> Self {
        Self::from_normalized(self.normalize() + n, self.numerology)
    }

    /// Slot time `n` slots in the past, saturating at frame 0
    pub fn sub_slots(&self, n: u64) -> Self {
        Self::from_normalized(self.normalize().saturating_sub(n), self.numerology)
    }
}

impl PartialOrd for SlotTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SlotTime {
    fn cmp(&self, other: &Self) -> Ordering {
        debug_assert_eq!(
            self.numerology, other.numerology,
            "Numerology does not match"
        );
        (self.frame, self.subframe, self.slot).cmp(&(other.frame, other.subframe, other.slot))
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FrameNum: {} SubFrameNum: {} SlotNum: {}",
            self.frame, self.subframe, self.slot
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_roundtrip() {
        let t = SlotTime::new(3, 7, 1, 1);
        assert_eq!(t.normalize(), 3 * 20 + 7 * 2 + 1);
        assert_eq!(SlotTime::from_normalized(t.normalize(), 1), t);
    }

    #[test]
    fn test_add_wraps_into_next_frame() {
        let t = SlotTime::new(0, 9, 1, 1);
        let next = t.add_slots(1);
        assert_eq!(next, SlotTime::new(1, 0, 0, 1));

        let later = t.add_slots(25);
        assert_eq!(later, SlotTime::new(2, 2, 0, 1));
    }

    #[test]
    fn test_sub_wraps_into_previous_frame() {
        let t = SlotTime::new(2, 0, 0, 2);
        let prev = t.sub_slots(1);
        assert_eq!(prev, SlotTime::new(1, 9, 3, 2));

        // Saturates instead of underflowing
        let origin = SlotTime::new(0, 0, 1, 0);
        assert_eq!(origin.sub_slots(10), SlotTime::new(0, 0, 0, 0));
    }

    #[test]
    fn test_ordering() {
        let a = SlotTime::new(1, 2, 0, 1);
        let b = SlotTime::new(1, 2, 1, 1);
        let c = SlotTime::new(2, 0, 0, 1);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.cmp(&a), Ordering::Equal);
    }

    #[test]
    #[should_panic]
    fn test_rejects_numerology_above_five() {
        SlotTime::new(0, 0, 0, 6);
    }
}
