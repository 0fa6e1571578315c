//! 5G NR MAC Scheduler Core
//!
//! Resource-grid based OFDMA scheduler for a TDD NR cell. The grid keeps a
//! rolling time window of symbol rows across the whole carrier; allocation,
//! PDCCH gating and DCI assembly all operate on that single shared matrix.

pub mod allocator;
pub mod amc;
pub mod bwp;
pub mod dci;
pub mod fair_share;
pub mod grid;
pub mod pdcch;
pub mod stats;

mod manager;

pub use allocator::SlotAllocator;
pub use amc::AmcModel;
pub use bwp::{BwpBorders, BwpRegistry};
pub use dci::{DciAssembler, DciInfo};
pub use fair_share::{BeamFairShareCalculator, UeSchedulingInfo};
pub use grid::{Allocation, GridConfig, PrachConfig, ReservationKind, ResourceCell, ResourceGrid};
pub use manager::{MacScheduler, MacSchedulerConfig};
pub use pdcch::{PdcchSearchSpaceAllocator, SearchSpaceConfig};
pub use stats::{ResourceUsageStats, SchedulerLogs, UeResourceUsage};

use thiserror::Error;

/// Scheduler error types
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid TDD pattern: {0}")]
    InvalidPattern(#[from] common::PatternError),

    #[error("BWP {0} is not configured")]
    BwpNotConfigured(u8),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
