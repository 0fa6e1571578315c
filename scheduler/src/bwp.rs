//! Bandwidth Part Layout
//!
//! The carrier is divided into stacked narrowband BWPs plus two wide BWPs
//! spanning the full carrier. Narrowband BWPs occupy consecutive RB ranges
//! in registration order; the last two indices always map to the wide span.

use crate::SchedulerError;
use std::collections::BTreeMap;
use tracing::debug;

/// Inclusive RB range of a bandwidth part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BwpBorders {
    pub lower: u16,
    pub upper: u16,
}

impl BwpBorders {
    /// Width of the BWP in resource blocks
    pub fn width(&self) -> u16 {
        self.upper - self.lower + 1
    }

    /// Whether an absolute RB index falls inside this BWP
    pub fn contains(&self, rb: u16) -> bool {
        rb >= self.lower && rb <= self.upper
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BwpConfig {
    pub borders: BwpBorders,
    pub coreset_symbols: u8,
}

/// Registry of configured bandwidth parts
#[derive(Debug, Clone)]
pub struct BwpRegistry {
    bwps: BTreeMap<u8, BwpConfig>,
    carrier_rb: u16,
    bwp_count: u8,
    // Next free RB for narrowband registration
    allocated_rb: u16,
}

impl BwpRegistry {
    pub fn new(carrier_rb: u16, bwp_count: u8) -> Self {
        Self {
            bwps: BTreeMap::new(),
            carrier_rb,
            bwp_count,
            allocated_rb: 0,
        }
    }

    /// The last two BWP indices span the whole carrier
    pub fn is_wide(&self, index: u8) -> bool {
        index >= self.bwp_count - 2
    }

    /// Number of narrowband BWPs
    pub fn narrowband_count(&self) -> u8 {
        self.bwp_count - 2
    }

    pub fn bwp_count(&self) -> u8 {
        self.bwp_count
    }

    /// Register a BWP and return its RB borders.
    ///
    /// Narrowband BWPs are stacked left to right in registration order;
    /// wide BWPs always cover the full carrier regardless of `width`.
    pub fn register(
        &mut self,
        index: u8,
        width: u16,
        coreset_symbols: u8,
    ) -> Result<BwpBorders, SchedulerError> {
        if index >= self.bwp_count {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "BWP index {} exceeds configured count {}",
                index, self.bwp_count
            )));
        }
        if coreset_symbols == 0 || coreset_symbols > 3 {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "CORESET duration of {} symbols is not supported",
                coreset_symbols
            )));
        }

        let borders = if self.is_wide(index) {
            BwpBorders {
                lower: 0,
                upper: self.carrier_rb - 1,
            }
        } else {
            if self.allocated_rb + width > self.carrier_rb {
                return Err(SchedulerError::InvalidConfiguration(format!(
                    "BWP {} of {} RB does not fit in the carrier ({} RB already allocated of {})",
                    index, width, self.allocated_rb, self.carrier_rb
                )));
            }
            let b = BwpBorders {
                lower: self.allocated_rb,
                upper: self.allocated_rb + width - 1,
            };
            self.allocated_rb += width;
            b
        };

        debug!(
            "Registered BWP {}: RB [{}, {}], {} CORESET symbols",
            index, borders.lower, borders.upper, coreset_symbols
        );
        self.bwps.insert(
            index,
            BwpConfig {
                borders,
                coreset_symbols,
            },
        );
        Ok(borders)
    }

    pub fn get(&self, index: u8) -> Result<&BwpConfig, SchedulerError> {
        self.bwps
            .get(&index)
            .ok_or(SchedulerError::BwpNotConfigured(index))
    }

    pub fn borders(&self, index: u8) -> Result<BwpBorders, SchedulerError> {
        Ok(self.get(index)?.borders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narrowband_bwps_are_stacked() {
        let mut registry = BwpRegistry::new(204, 6);
        assert_eq!(
            registry.register(0, 51, 2).unwrap(),
            BwpBorders { lower: 0, upper: 50 }
        );
        assert_eq!(
            registry.register(1, 51, 2).unwrap(),
            BwpBorders {
                lower: 51,
                upper: 101
            }
        );
        assert_eq!(
            registry.register(2, 51, 2).unwrap(),
            BwpBorders {
                lower: 102,
                upper: 152
            }
        );
        assert_eq!(
            registry.register(3, 51, 2).unwrap(),
            BwpBorders {
                lower: 153,
                upper: 203
            }
        );
    }

    #[test]
    fn test_wide_bwps_span_the_carrier() {
        let mut registry = BwpRegistry::new(204, 6);
        for i in 0..4 {
            registry.register(i, 51, 2).unwrap();
        }
        let wide = BwpBorders {
            lower: 0,
            upper: 203,
        };
        assert_eq!(registry.register(4, 51, 1).unwrap(), wide);
        assert_eq!(registry.register(5, 51, 1).unwrap(), wide);
        assert!(registry.is_wide(4));
        assert!(!registry.is_wide(3));
    }

    #[test]
    fn test_rejects_overflowing_bwp() {
        let mut registry = BwpRegistry::new(102, 4);
        registry.register(0, 51, 2).unwrap();
        registry.register(1, 51, 2).unwrap();
        assert!(registry.register(0, 51, 2).is_err());
    }
}
