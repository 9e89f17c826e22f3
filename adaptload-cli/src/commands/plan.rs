//! Plan command - show which units load when.

use adaptload::config::AdaptloadConfig;
use adaptload::{build_plan, generate, Partition};

use super::common::{field, heading, print_json, DeviceArgs};
use crate::error::CliError;

const PARTITIONS: [Partition; 5] = [
    Partition::Immediate,
    Partition::Priority,
    Partition::Background,
    Partition::Deferred,
    Partition::Disabled,
];

/// Run the plan command.
pub fn run(device: &DeviceArgs, config: &AdaptloadConfig, json: bool) -> Result<(), CliError> {
    let caps = device.capabilities()?;
    let strategy = generate(&caps, &config.strategy);
    let plan = build_plan(&strategy);

    if json {
        return print_json(&plan);
    }

    heading(&format!("Plan for {} ({})", caps.tier, caps.network));
    for partition in PARTITIONS {
        let units = plan.units(partition);
        let listed = if units.is_empty() {
            "-".to_string()
        } else {
            units.iter().map(|u| u.as_str()).collect::<Vec<_>>().join(", ")
        };
        field(partition.as_str(), listed);
    }
    Ok(())
}
