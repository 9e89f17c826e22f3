//! Arguments and helpers shared across commands.

use std::sync::Arc;

use adaptload::capability::{
    sample, CapabilityProvider, ConnectionInfo, FeatureSupport, StaticCapabilityProvider,
    SystemCapabilityProvider,
};
use adaptload::{DeviceCapabilities, NetworkSpeed};
use clap::Args;
use console::style;
use serde::Serialize;

use crate::error::CliError;

/// Device and network description. With no flags the local machine is
/// sampled; any flag switches to a synthetic device.
#[derive(Debug, Clone, Default, Args)]
pub struct DeviceArgs {
    /// Installed memory in GB
    #[arg(long)]
    pub memory_gb: Option<f64>,

    /// Logical CPU cores
    #[arg(long)]
    pub cores: Option<u32>,

    /// Effective connection type (slow-2g, 2g, 3g, 4g, 5g)
    #[arg(long)]
    pub network: Option<String>,

    /// Downlink bandwidth in Mbps
    #[arg(long)]
    pub downlink: Option<f64>,

    /// Round-trip time in milliseconds
    #[arg(long)]
    pub rtt: Option<u32>,

    /// Data saver is on
    #[arg(long)]
    pub save_data: bool,

    /// Heap in use, in MB (requires --heap-limit-mb)
    #[arg(long, requires = "heap_limit_mb")]
    pub heap_used_mb: Option<u64>,

    /// Heap limit in MB
    #[arg(long, requires = "heap_used_mb")]
    pub heap_limit_mb: Option<u64>,

    /// The client cannot decode WebP
    #[arg(long)]
    pub no_webp: bool,
}

impl DeviceArgs {
    fn is_synthetic(&self) -> bool {
        self.memory_gb.is_some()
            || self.cores.is_some()
            || self.network.is_some()
            || self.downlink.is_some()
            || self.rtt.is_some()
            || self.save_data
            || self.heap_used_mb.is_some()
    }

    /// Parsed `--network`.
    pub fn network_speed(&self) -> Result<Option<NetworkSpeed>, CliError> {
        match self.network.as_deref() {
            None => Ok(None),
            Some(raw) => match NetworkSpeed::parse(raw) {
                NetworkSpeed::Unknown => Err(CliError::InvalidArgument(format!(
                    "unknown network type '{}' (expected slow-2g, 2g, 3g, 4g or 5g)",
                    raw
                ))),
                speed => Ok(Some(speed)),
            },
        }
    }

    /// Provider described by these arguments.
    pub fn provider(&self) -> Result<Arc<dyn CapabilityProvider>, CliError> {
        let features = FeatureSupport {
            webp: !self.no_webp,
            service_worker: false,
        };

        if !self.is_synthetic() {
            return Ok(Arc::new(SystemCapabilityProvider::new().with_features(features)));
        }

        let mut provider = StaticCapabilityProvider::new().with_features(features);
        if self.memory_gb.is_some() || self.cores.is_some() {
            provider = provider.with_hardware(self.memory_gb.unwrap_or(4.0), self.cores.unwrap_or(4));
        }
        if let (Some(used), Some(limit)) = (self.heap_used_mb, self.heap_limit_mb) {
            provider = provider.with_heap(used, limit);
        }
        let effective_type = self.network_speed()?;
        if effective_type.is_some() || self.downlink.is_some() || self.rtt.is_some() || self.save_data {
            provider = provider.with_connection(ConnectionInfo {
                effective_type,
                downlink_mbps: self.downlink,
                rtt_ms: self.rtt,
                save_data: Some(self.save_data),
            });
        }
        Ok(Arc::new(provider))
    }

    /// One snapshot from [`provider`](Self::provider).
    pub fn capabilities(&self) -> Result<DeviceCapabilities, CliError> {
        Ok(sample(self.provider()?.as_ref()))
    }
}

/// Pretty-print `value` as JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Section heading.
pub fn heading(title: &str) {
    println!("{}", style(title).bold().cyan());
}

/// Aligned `key: value` line.
pub fn field(key: &str, value: impl std::fmt::Display) {
    println!("  {:<26} {}", format!("{}:", key), value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_device() {
        let args = DeviceArgs {
            memory_gb: Some(2.0),
            cores: Some(2),
            network: Some("3g".to_string()),
            downlink: Some(1.5),
            ..Default::default()
        };
        let caps = args.capabilities().unwrap();
        assert_eq!(caps.memory_gb, 2.0);
        assert_eq!(caps.network, NetworkSpeed::ThreeG);
        assert_eq!(caps.downlink_mbps, 1.5);
        assert!(caps.features.webp);
    }

    #[test]
    fn test_unknown_network_rejected() {
        let args = DeviceArgs {
            network: Some("carrier-pigeon".to_string()),
            ..Default::default()
        };
        assert!(matches!(args.network_speed(), Err(CliError::InvalidArgument(_))));
    }

    #[test]
    fn test_no_webp() {
        let args = DeviceArgs {
            cores: Some(8),
            no_webp: true,
            ..Default::default()
        };
        assert!(!args.capabilities().unwrap().features.webp);
    }
}
