//! MAC Scheduler Simulation Driver
//!
//! Drives one MAC scheduler instance through a synchronous slot loop with
//! synthetic per-UE traffic, then writes the resource usage telemetry.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use common::{Direction, Rnti, SlotTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scheduler::{
    MacScheduler, MacSchedulerConfig, PrachConfig, SchedulerLogs, SearchSpaceConfig,
    UeSchedulingInfo,
};
use serde::Serialize;
use std::fs;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use config::SimConfig;

/// Msg3 payload assumed for a UE completing random access, bytes
const MSG3_BYTES: u32 = 56;

/// MCS the Msg3 grant is placed with
const MSG3_MCS: u8 = 4;

#[derive(Parser, Debug)]
#[command(name = "mac-sim", about = "NR MAC scheduler simulation")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "sim.toml")]
    config: String,

    /// Log level when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Override the configured simulation duration, ms
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Override the configured traffic seed
    #[arg(long)]
    seed: Option<u64>,
}

/// Simulated UE state outside the scheduler
struct SimUe {
    rnti: Rnti,
    device: u64,
    beam: u16,
    bwp: u8,
    dl_buffer: u32,
    ul_buffer: u32,
    mcs: Vec<u8>,
    /// Slot index of a pending Msg3 grant
    msg3_slot: Option<u64>,
}

/// End-of-run summary written next to the telemetry logs
#[derive(Serialize)]
struct RunSummary {
    slots: u64,
    dl_dcis: u64,
    ul_dcis: u64,
    dl_bytes: u64,
    ul_bytes: u64,
    msg3_grants: u64,
    unresolved_ul_elements: u64,
    usage: scheduler::ResourceUsageStats,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    let mut config = SimConfig::load(&args.config)?;
    if let Some(duration) = args.duration_ms {
        config.traffic.duration_ms = duration;
    }
    if let Some(seed) = args.seed {
        config.traffic.seed = seed;
    }

    info!("=== NR MAC Scheduler Simulation ===");
    info!(
        "Cell: pattern {}, numerology {}, {} BWPs x {} RB, window {} ms",
        config.cell.pattern,
        config.cell.numerology,
        config.cell.bwp_count,
        config.cell.narrow_bwp_rb,
        config.cell.window_ms
    );
    info!(
        "Traffic: {} UEs, {} ms, seed {}",
        config.traffic.num_ues, config.traffic.duration_ms, config.traffic.seed
    );

    let summary = run(&config).context("Simulation failed")?;

    let path = format!("{}/summary.json", config.output.log_dir);
    fs::write(&path, serde_json::to_string_pretty(&summary)?)?;
    info!(
        "Done: {} slots, {} DL DCIs / {} B, {} UL DCIs / {} B, summary at {}",
        summary.slots, summary.dl_dcis, summary.dl_bytes, summary.ul_dcis, summary.ul_bytes, path
    );
    Ok(())
}

fn run(config: &SimConfig) -> Result<RunSummary> {
    let mut scheduler = MacScheduler::new(MacSchedulerConfig {
        pattern: config.cell.pattern.clone(),
        numerology: config.cell.numerology,
        window_ms: config.cell.window_ms,
        bwp_count: config.cell.bwp_count,
        narrow_bwp_rb: config.cell.narrow_bwp_rb,
        coreset_symbols: config.cell.coreset_symbols,
        use_5mhz: config.cell.use_5mhz,
    })?;

    scheduler.reserve_prach(PrachConfig {
        nf_x: 16,
        nf_y: 1,
        subframes: vec![9],
        start_symbol: 0,
        occasions_per_slot: 6,
        duration_symbols: 2,
        prach_slots_per_subframe: 1,
    })?;

    let narrow_count = config.cell.bwp_count.saturating_sub(2);
    let mut ues: Vec<SimUe> = (0..config.traffic.num_ues)
        .map(|i| SimUe {
            rnti: Rnti::new(config.traffic.first_rnti + i),
            device: 1000 + i as u64,
            beam: i % 2,
            bwp: (i % narrow_count as u16) as u8,
            dl_buffer: 0,
            ul_buffer: 0,
            mcs: vec![10],
            msg3_slot: None,
        })
        .collect();
    for (i, ue) in ues.iter().enumerate() {
        scheduler.register_ue(ue.rnti, ue.device);
        // Half the UEs monitor every slot, half only even slots
        if i % 2 == 1 {
            scheduler.create_search_space(
                ue.rnti,
                SearchSpaceConfig {
                    periodicity: 2,
                    offset: 0,
                    duration: 1,
                },
            )?;
        }
    }

    let mut rng = StdRng::seed_from_u64(config.traffic.seed);
    let slots_per_ms = 1u64 << config.cell.numerology;
    let total_slots = config.traffic.duration_ms * slots_per_ms;
    let numerology = config.cell.numerology;

    let mut dl_dcis = 0u64;
    let mut ul_dcis = 0u64;
    let mut dl_bytes = 0u64;
    let mut ul_bytes = 0u64;
    let mut msg3_grants = 0u64;

    let mut last_slot = SlotTime::from_normalized(0, numerology);
    for index in 0..total_slots {
        let slot = SlotTime::from_normalized(index, numerology);
        last_slot = slot;
        scheduler.maybe_roll(&slot);

        for ue in ues.iter_mut() {
            ue.dl_buffer += rng.gen_range(0..=2 * config.traffic.mean_dl_bytes);
            ue.ul_buffer += rng.gen_range(0..=2 * config.traffic.mean_ul_bytes);
        }

        // A random UE re-attaches periodically and gets a deferred Msg3 grant
        if config.traffic.rach_period_slots > 0
            && index > 0
            && index % config.traffic.rach_period_slots == 0
        {
            let idx = rng.gen_range(0..ues.len());
            if ues[idx].msg3_slot.is_none() {
                let rnti = ues[idx].rnti;
                let bwp = ues[idx].bwp;
                match scheduler.schedule_msg3(rnti, bwp, MSG3_BYTES, MSG3_MCS, &slot)? {
                    Some(allocation) => {
                        debug!(
                            "Msg3 for RNTI {} placed at slot {}",
                            rnti,
                            allocation.slot.normalize()
                        );
                        ues[idx].msg3_slot = Some(allocation.slot.normalize());
                        scheduler.update_prach_usage(index, rng.gen_range(0..6));
                        msg3_grants += 1;
                    }
                    None => warn!("No Msg3 occasion free for RNTI {} at {}", rnti, slot),
                }
            }
        }

        let kind = scheduler.grid().kind_at(index);

        if kind.is_downlink_capable() {
            let mut infos: Vec<UeSchedulingInfo> = ues
                .iter()
                .map(|ue| UeSchedulingInfo::new(ue.rnti, ue.beam, ue.bwp, ue.dl_buffer, ue.mcs.clone()))
                .collect();
            scheduler.run_downlink_pass(&slot, &mut infos)?;
            let dcis = scheduler.assemble_dci(&slot, Direction::Downlink, &mut infos)?;
            dl_dcis += dcis.len() as u64;
            for (ue, info) in ues.iter_mut().zip(infos.iter()) {
                let granted = info.granted_bytes();
                ue.dl_buffer = ue.dl_buffer.saturating_sub(granted);
                dl_bytes += granted as u64;
            }
        }

        if kind.is_uplink_capable() {
            let mut infos: Vec<UeSchedulingInfo> = ues
                .iter()
                .map(|ue| {
                    let mut info = UeSchedulingInfo::new(
                        ue.rnti,
                        ue.beam,
                        ue.bwp,
                        ue.ul_buffer,
                        ue.mcs.clone(),
                    );
                    info.msg3_pending = ue.msg3_slot.is_some();
                    info
                })
                .collect();
            scheduler.run_uplink_pass(&slot, &mut infos)?;
            let dcis = scheduler.assemble_dci(&slot, Direction::Uplink, &mut infos)?;
            ul_dcis += dcis.len() as u64;
            for (ue, info) in ues.iter_mut().zip(infos.iter()) {
                let granted = info.granted_bytes();
                ue.ul_buffer = ue.ul_buffer.saturating_sub(granted);
                ul_bytes += granted as u64;
                if ue.msg3_slot == Some(index) {
                    ue.msg3_slot = None;
                }
            }
        }
    }

    scheduler.finish(&last_slot);

    let logs = SchedulerLogs::new(&config.output.log_dir)?;
    logs.write_pdcch_usage(scheduler.grid())?;
    logs.append_prach_usage(scheduler.grid().prach_usage())?;
    if config.output.spectral_dump {
        logs.write_spectral_usage(scheduler.grid())?;
    }

    Ok(RunSummary {
        slots: total_slots,
        dl_dcis,
        ul_dcis,
        dl_bytes,
        ul_bytes,
        msg3_grants,
        unresolved_ul_elements: scheduler.grid().ue_usage().unresolved_total(),
        usage: scheduler.grid().usage().clone(),
    })
}
