//! Classify command - sample a device and show its tier.

use adaptload::capability::{classify, TierScores};
use serde_json::json;

use super::common::{field, heading, print_json, DeviceArgs};
use crate::error::CliError;

/// Run the classify command.
pub fn run(device: &DeviceArgs, json: bool) -> Result<(), CliError> {
    let caps = device.capabilities()?;
    let assessment = classify(TierScores::new(
        caps.memory_gb,
        caps.cores,
        caps.downlink_mbps,
        caps.memory_pressure,
    ));

    if json {
        return print_json(&json!({
            "capabilities": caps,
            "assessment": assessment,
        }));
    }

    heading("Device");
    field("Memory", format!("{:.1} GB", caps.memory_gb));
    field("Cores", caps.cores);
    field("Memory pressure", caps.memory_pressure);
    field("Heap", format!("{} / {} MB", caps.used_memory_mb, caps.available_memory_mb));
    println!();

    heading("Network");
    field("Effective type", caps.network);
    field("Downlink", format!("{:.1} Mbps", caps.downlink_mbps));
    field("RTT", format!("{} ms", caps.rtt_ms));
    field("Data saver", caps.save_data);
    println!();

    heading("Tier");
    field("Tier", assessment.tier);
    field("Hardware score", format!("{:.2}", assessment.scores.hardware));
    field("Network score", format!("{:.2}", assessment.scores.network));
    field("Memory score", format!("{:.2}", assessment.scores.memory));
    field("Total", format!("{:.2}", assessment.scores.total()));
    field("Load capacity", format!("{}/10", assessment.load_capacity));
    field("Max concurrent loads", assessment.max_concurrent_loads);
    field("Image quality", format!("{:.2}", assessment.recommended_image_quality));

    Ok(())
}
