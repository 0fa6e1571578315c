//! TOML Configuration for the Scheduler Simulation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top level simulation configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SimConfig {
    #[serde(default)]
    pub cell: CellConfig,
    #[serde(default)]
    pub traffic: TrafficConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Cell and carrier configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellConfig {
    /// Pipe-separated TDD pattern
    #[serde(default = "default_pattern")]
    pub pattern: String,
    /// Subcarrier-spacing configuration (0-5)
    #[serde(default = "default_numerology")]
    pub numerology: u8,
    /// Rolling resource window in ms, multiple of 160
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Narrowband BWPs plus the two wide ones
    #[serde(default = "default_bwp_count")]
    pub bwp_count: u8,
    /// Width of each narrowband BWP in RBs
    #[serde(default = "default_narrow_bwp_rb")]
    pub narrow_bwp_rb: u16,
    /// CORESET depth of the narrowband BWPs in symbols
    #[serde(default = "default_coreset_symbols")]
    pub coreset_symbols: u8,
    /// Narrowband 5 MHz deployment mode
    #[serde(default)]
    pub use_5mhz: bool,
}

fn default_pattern() -> String {
    "DL|S|UL|UL|DL|DL|S|UL|UL|UL".to_string()
}

fn default_numerology() -> u8 {
    1
}

fn default_window_ms() -> u64 {
    320
}

fn default_bwp_count() -> u8 {
    6
}

fn default_narrow_bwp_rb() -> u16 {
    51
}

fn default_coreset_symbols() -> u8 {
    2
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            pattern: default_pattern(),
            numerology: default_numerology(),
            window_ms: default_window_ms(),
            bwp_count: default_bwp_count(),
            narrow_bwp_rb: default_narrow_bwp_rb(),
            coreset_symbols: default_coreset_symbols(),
            use_5mhz: false,
        }
    }
}

/// Synthetic traffic configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrafficConfig {
    /// Number of attached UEs
    #[serde(default = "default_num_ues")]
    pub num_ues: u16,
    /// First RNTI assigned
    #[serde(default = "default_first_rnti")]
    pub first_rnti: u16,
    /// Mean downlink arrival per slot, bytes
    #[serde(default = "default_mean_dl_bytes")]
    pub mean_dl_bytes: u32,
    /// Mean uplink arrival per slot, bytes
    #[serde(default = "default_mean_ul_bytes")]
    pub mean_ul_bytes: u32,
    /// Simulated time in ms
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    /// A UE performs random access every this many slots (0 disables)
    #[serde(default = "default_rach_period_slots")]
    pub rach_period_slots: u64,
    /// Traffic RNG seed
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_num_ues() -> u16 {
    4
}

fn default_first_rnti() -> u16 {
    61
}

fn default_mean_dl_bytes() -> u32 {
    400
}

fn default_mean_ul_bytes() -> u32 {
    300
}

fn default_duration_ms() -> u64 {
    200
}

fn default_rach_period_slots() -> u64 {
    100
}

fn default_seed() -> u64 {
    1
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            num_ues: default_num_ues(),
            first_rnti: default_first_rnti(),
            mean_dl_bytes: default_mean_dl_bytes(),
            mean_ul_bytes: default_mean_ul_bytes(),
            duration_ms: default_duration_ms(),
            rach_period_slots: default_rach_period_slots(),
            seed: default_seed(),
        }
    }
}

/// Telemetry output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Directory for the telemetry log files
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// Dump the full spectral grid at the end of the run
    #[serde(default)]
    pub spectral_dump: bool,
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            spectral_dump: false,
        }
    }
}

impl SimConfig {
    /// Load a configuration file, or the defaults if the path is absent
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path))?;
        toml::from_str(&text).with_context(|| format!("Failed to parse {}", path))
    }
}
