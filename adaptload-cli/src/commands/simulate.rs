//! Simulate command - drive a coordinator against simulated units.
//!
//! Units in the immediate partition go through a [`UnitLoader`] and its
//! retry budget; priority and background units load directly; preload units
//! are warmed in the background. Deferred units are left alone, as a page
//! would until they scroll into view.

use std::sync::Arc;
use std::time::Duration;

use adaptload::config::AdaptloadConfig;
use adaptload::coordinator::DeferredIdleScheduler;
use adaptload::loader::{CoordinatorFetcher, UnitLoader};
use adaptload::unit::SimulatedUnitSource;
use adaptload::{
    ContentUnit, LoadCoordinator, LoadPriority, MetricsSnapshot, Partition, UnitId, UnitPayload,
    UnitRegistry,
};
use clap::Args;
use console::style;
use serde::Serialize;
use tracing::info;

use super::common::{field, heading, print_json, DeviceArgs};
use crate::error::CliError;

/// Arguments for the simulate command.
#[derive(Debug, Clone, Args)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// Fastest simulated response, in milliseconds
    #[arg(long, default_value_t = 50)]
    pub min_latency_ms: u64,

    /// Slowest simulated response, in milliseconds
    #[arg(long, default_value_t = 400)]
    pub max_latency_ms: u64,

    /// Probability that a response fails (0.0 - 1.0)
    #[arg(long, default_value_t = 0.1)]
    pub failure_rate: f64,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct UnitOutcome {
    unit: ContentUnit,
    partition: Partition,
    outcome: String,
    bytes: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    tier: String,
    network: String,
    elapsed_ms: u64,
    units: Vec<UnitOutcome>,
    metrics: MetricsSnapshot,
}

/// Run the simulate command.
pub fn run(args: SimulateArgs, config: &AdaptloadConfig) -> Result<(), CliError> {
    if !(0.0..=1.0).contains(&args.failure_rate) {
        return Err(CliError::InvalidArgument(format!(
            "--failure-rate must be between 0 and 1, got {}",
            args.failure_rate
        )));
    }
    if args.min_latency_ms > args.max_latency_ms {
        return Err(CliError::InvalidArgument(
            "--min-latency-ms must not exceed --max-latency-ms".to_string(),
        ));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Runtime(e.to_string()))?;

    let report = runtime.block_on(simulate(&args, config))?;

    if args.json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

async fn simulate(args: &SimulateArgs, config: &AdaptloadConfig) -> Result<SimulationReport, CliError> {
    let caps = args.device.capabilities()?;
    let source = Arc::new(SimulatedUnitSource::new(
        Duration::from_millis(args.min_latency_ms),
        Duration::from_millis(args.max_latency_ms),
        args.failure_rate,
    ));
    let coordinator = LoadCoordinator::builder(UnitRegistry::uniform(source))
        .capabilities(caps.clone())
        .overrides(config.strategy.clone())
        .idle_scheduler(Arc::new(DeferredIdleScheduler::default()))
        .build();

    let strategy = coordinator.strategy();
    let plan = coordinator.plan();
    let mut options = config.loader_options(strategy.retry_strategy);
    options.network = caps.network;

    info!(tier = %caps.tier, units = plan.len(), "Starting simulation");
    let started = tokio::time::Instant::now();

    let mut tasks = Vec::new();
    let mut preloads = Vec::new();
    for (unit, partition) in plan.iter() {
        let id = UnitId::from(unit);
        match partition {
            Partition::Immediate => {
                let fetcher = CoordinatorFetcher::new(Arc::clone(&coordinator), id, LoadPriority::High);
                // The coordinator already records every attempt in the ledger.
                let loader = UnitLoader::<Arc<UnitPayload>>::new(unit.as_str(), Arc::new(fetcher), options);
                tasks.push(tokio::spawn(async move {
                    let result = loader.load().await;
                    let outcome = match &result {
                        Ok(_) => "loaded".to_string(),
                        Err(e) => format!("failed: {}", e),
                    };
                    UnitOutcome {
                        unit,
                        partition,
                        outcome,
                        bytes: result.ok().map(|p| p.body.len()),
                    }
                }));
            }
            Partition::Priority | Partition::Background => {
                let coordinator = Arc::clone(&coordinator);
                let priority = if partition == Partition::Priority {
                    LoadPriority::Normal
                } else {
                    LoadPriority::Low
                };
                tasks.push(tokio::spawn(async move {
                    let (outcome, bytes) = match coordinator.load_component(&id, priority).await {
                        Ok(Some(payload)) => ("loaded".to_string(), Some(payload.body.len())),
                        Ok(None) => ("degraded".to_string(), None),
                        Err(e) => (format!("failed: {}", e), None),
                    };
                    UnitOutcome {
                        unit,
                        partition,
                        outcome,
                        bytes,
                    }
                }));
            }
            Partition::Deferred | Partition::Disabled => {}
        }

        if strategy.preload_components.contains(&unit) {
            preloads.push(coordinator.spawn_preload(UnitId::from(unit)));
        }
    }

    let mut units = Vec::with_capacity(tasks.len());
    for task in futures::future::join_all(tasks).await {
        match task {
            Ok(outcome) => units.push(outcome),
            Err(e) => return Err(CliError::Runtime(e.to_string())),
        }
    }
    futures::future::join_all(preloads).await;
    units.sort_by_key(|u| (u.partition, u.unit));

    let elapsed_ms = started.elapsed().as_millis() as u64;
    info!(elapsed_ms, "Simulation finished");

    Ok(SimulationReport {
        tier: caps.tier.to_string(),
        network: caps.network.to_string(),
        elapsed_ms,
        units,
        metrics: coordinator.metrics(),
    })
}

fn print_report(report: &SimulationReport) {
    heading(&format!("Simulation ({} on {})", report.tier, report.network));
    for outcome in &report.units {
        let label = if outcome.outcome.starts_with("failed") || outcome.outcome == "degraded" {
            style(&outcome.outcome).red().to_string()
        } else {
            style(&outcome.outcome).green().to_string()
        };
        println!("  {:<18} {:<11} {}", outcome.unit.as_str(), outcome.partition.as_str(), label);
    }
    println!();

    let m = &report.metrics;
    heading("Metrics");
    field("Elapsed", format!("{} ms", report.elapsed_ms));
    field("Components loaded", m.components_loaded);
    field("Failed loads", m.failed_loads);
    field("Cache hit rate", format!("{:.0}%", m.cache_hit_rate * 100.0));
    field("Average load time", format!("{:.1} ms", m.average_load_time_ms));
    field("Total load time", format!("{} ms", m.total_load_time_ms));
}
