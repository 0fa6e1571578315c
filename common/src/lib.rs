//! Common Types for the 5G NR MAC Scheduler
//!
//! This crate provides shared types used across the scheduler workspace.

pub mod slot;
pub mod types;

// Re-export commonly used items
pub use slot::*;
pub use types::*;
