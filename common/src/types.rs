//! Fundamental Types for the MAC Scheduler
//!
//! Defines identifiers, the TDD slot pattern and transmission direction
//! used throughout the scheduler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Rnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transmission direction of a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Downlink (gNB to UE)
    Downlink,
    /// Uplink (UE to gNB)
    Uplink,
}

/// TDD slot type according to the configured pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotKind {
    /// Downlink slot
    Dl,
    /// Uplink slot
    Ul,
    /// Special slot (DL control + guard + UL control)
    S,
    /// Flexible slot (usable in both directions)
    F,
}

impl SlotKind {
    /// Whether a slot of this kind can carry downlink control/data
    pub fn is_downlink_capable(&self) -> bool {
        matches!(self, SlotKind::Dl | SlotKind::S | SlotKind::F)
    }

    /// Whether a slot of this kind can carry uplink data
    pub fn is_uplink_capable(&self) -> bool {
        matches!(self, SlotKind::Ul | SlotKind::F)
    }

    /// Whether this slot kind matches the requested direction
    pub fn supports(&self, direction: Direction) -> bool {
        match direction {
            Direction::Downlink => self.is_downlink_capable(),
            Direction::Uplink => self.is_uplink_capable(),
        }
    }
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotKind::Dl => "DL",
            SlotKind::Ul => "UL",
            SlotKind::S => "S",
            SlotKind::F => "F",
        };
        write!(f, "{}", s)
    }
}

/// Error raised when parsing a TDD pattern string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("Invalid TDD pattern token: {0}")]
    InvalidToken(String),

    #[error("Empty TDD pattern")]
    Empty,
}

/// Parsed TDD pattern, e.g. "DL|S|UL|UL|DL|DL|S|UL|UL|UL"
///
/// The pattern repeats over the whole simulation; slot kinds are looked up
/// by absolute slot index modulo the pattern length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TddPattern {
    slots: Vec<SlotKind>,
}

impl TddPattern {
    /// Slot kind at an absolute slot index
    pub fn kind_at(&self, slot_index: u64) -> SlotKind {
        self.slots[(slot_index % self.slots.len() as u64) as usize]
    }

    /// Pattern length in slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl FromStr for TddPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(PatternError::Empty);
        }
        let mut slots = Vec::new();
        for token in s.split('|') {
            let kind = match token.trim() {
                "DL" => SlotKind::Dl,
                "UL" => SlotKind::Ul,
                "S" => SlotKind::S,
                "F" => SlotKind::F,
                other => return Err(PatternError::InvalidToken(other.to_string())),
            };
            slots.push(kind);
        }
        Ok(Self { slots })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_parse() {
        let pattern: TddPattern = "DL|S|UL|UL|DL|DL|S|UL|UL|UL".parse().unwrap();
        assert_eq!(pattern.len(), 10);
        assert_eq!(pattern.kind_at(0), SlotKind::Dl);
        assert_eq!(pattern.kind_at(2), SlotKind::Ul);
        // Wraps around the pattern length
        assert_eq!(pattern.kind_at(11), SlotKind::S);
    }

    #[test]
    fn test_pattern_rejects_bad_token() {
        let result = "DL|XX|UL".parse::<TddPattern>();
        assert_eq!(
            result.unwrap_err(),
            PatternError::InvalidToken("XX".to_string())
        );
        assert_eq!("".parse::<TddPattern>().unwrap_err(), PatternError::Empty);
    }

    #[test]
    fn test_slot_kind_capabilities() {
        assert!(SlotKind::Dl.is_downlink_capable());
        assert!(SlotKind::S.is_downlink_capable());
        assert!(SlotKind::F.is_downlink_capable());
        assert!(!SlotKind::Ul.is_downlink_capable());

        assert!(SlotKind::Ul.is_uplink_capable());
        assert!(SlotKind::F.is_uplink_capable());
        assert!(!SlotKind::Dl.is_uplink_capable());
        assert!(!SlotKind::S.is_uplink_capable());
    }
}
