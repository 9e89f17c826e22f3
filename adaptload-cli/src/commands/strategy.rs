//! Strategy command - show the loading strategy for a device.

use adaptload::config::AdaptloadConfig;
use adaptload::{generate, LoadingStrategy};

use super::common::{field, heading, print_json, DeviceArgs};
use crate::error::CliError;

/// Run the strategy command.
pub fn run(device: &DeviceArgs, config: &AdaptloadConfig, json: bool) -> Result<(), CliError> {
    let caps = device.capabilities()?;
    let strategy = generate(&caps, &config.strategy);

    if json {
        return print_json(&strategy);
    }

    println!("Strategy for {}", caps.summary());
    println!();
    print_strategy(&strategy);
    Ok(())
}

fn join<T: std::fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    let joined = items.into_iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        "-".to_string()
    } else {
        joined
    }
}

fn print_strategy(s: &LoadingStrategy) {
    heading("Components");
    field("Critical", join(&s.critical_components));
    field("Deferred", join(&s.deferred_components));
    field("Preload", join(&s.preload_components));
    field("Disabled", join(&s.disabled_components));
    println!();

    heading("Images");
    field("Quality", format!("{:.2}", s.image_quality));
    field("Sizes", join(&s.image_sizes));
    field("Lazy threshold", format!("{} px", s.lazy_load_threshold_px));
    println!();

    heading("Network");
    field("Max concurrent requests", s.max_concurrent_requests);
    field("Timeout", format!("{} ms", s.timeout.as_millis()));
    field("Retry", s.retry_strategy);
    field("Prefetch", s.enable_prefetch);
    field("Preload", s.enable_preload);
    field("Chunk size", format!("{} bytes", s.chunk_size_bytes));
    println!();

    heading("Cache");
    field("Strategy", s.cache_strategy);
    field("TTL", format!("{} s", s.cache_ttl.as_secs()));
    field("Graceful degradation", s.graceful_degradation);
}
