//! Device capability sampling and classification.
//!
//! This module produces [`DeviceCapabilities`], the normalized snapshot every
//! other layer reads. The environment is reached only through the
//! [`CapabilityProvider`] trait so that business logic never branches on
//! which hints happen to be available.
//!
//! # Architecture
//!
//! ```text
//! CapabilityProvider ─────► sample() ─────► DeviceCapabilities ─────► watch channel
//! (hardware, heap,          (fallbacks,      (immutable snapshot)      (many readers)
//!  network, user agent)      tier scoring)
//! ```
//!
//! [`CapabilitySampler`] keeps the snapshot fresh: one interval timer for
//! heap pressure and one listener for network changes, both released on
//! shutdown.

mod provider;
mod sampler;
mod tier;

pub use provider::{
    CapabilityProvider, ConnectionInfo, HardwareHints, HeapUsage, StaticCapabilityProvider,
    SystemCapabilityProvider,
};
pub use sampler::{sample, CapabilitySampler, SamplerConfig, DEFAULT_HEAP_INTERVAL};
pub use tier::{classify, DeviceTier, TierAssessment, TierScores};

use serde::Serialize;

// =============================================================================
// Network
// =============================================================================

/// Effective connection class reported by the network layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum NetworkSpeed {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    #[default]
    FourG,
    #[serde(rename = "5g")]
    FiveG,
    #[serde(rename = "unknown")]
    Unknown,
}

impl NetworkSpeed {
    /// Parse an effective-type string. Unrecognized values map to `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "slow-2g" => NetworkSpeed::Slow2g,
            "2g" => NetworkSpeed::TwoG,
            "3g" => NetworkSpeed::ThreeG,
            "4g" => NetworkSpeed::FourG,
            "5g" => NetworkSpeed::FiveG,
            _ => NetworkSpeed::Unknown,
        }
    }

    /// slow-2g, 2g and 3g count as slow for retry and timeout purposes.
    pub fn is_slow(&self) -> bool {
        matches!(
            self,
            NetworkSpeed::Slow2g | NetworkSpeed::TwoG | NetworkSpeed::ThreeG
        )
    }

    /// slow-2g and 2g: the tightest network clamp applies.
    pub fn is_very_slow(&self) -> bool {
        matches!(self, NetworkSpeed::Slow2g | NetworkSpeed::TwoG)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkSpeed::Slow2g => "slow-2g",
            NetworkSpeed::TwoG => "2g",
            NetworkSpeed::ThreeG => "3g",
            NetworkSpeed::FourG => "4g",
            NetworkSpeed::FiveG => "5g",
            NetworkSpeed::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for NetworkSpeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Memory
// =============================================================================

/// Heap pressure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressure {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl MemoryPressure {
    /// Bucket a used/limit ratio at 0.5 / 0.75 / 0.9.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio > 0.9 {
            MemoryPressure::Critical
        } else if ratio > 0.75 {
            MemoryPressure::High
        } else if ratio > 0.5 {
            MemoryPressure::Medium
        } else {
            MemoryPressure::Low
        }
    }

    /// Estimate pressure from device memory alone (no heap introspection).
    pub fn from_device_memory(memory_gb: f64) -> Self {
        if memory_gb <= 2.0 {
            MemoryPressure::High
        } else if memory_gb <= 4.0 {
            MemoryPressure::Medium
        } else {
            MemoryPressure::Low
        }
    }

    /// Contribution to the tier score.
    pub fn score(&self) -> f64 {
        match self {
            MemoryPressure::Low => 3.0,
            MemoryPressure::Medium => 2.0,
            MemoryPressure::High => 1.0,
            MemoryPressure::Critical => 0.0,
        }
    }

    /// High or critical.
    pub fn is_pressured(&self) -> bool {
        matches!(self, MemoryPressure::High | MemoryPressure::Critical)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryPressure::Low => "low",
            MemoryPressure::Medium => "medium",
            MemoryPressure::High => "high",
            MemoryPressure::Critical => "critical",
        }
    }
}

impl std::fmt::Display for MemoryPressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Optional platform features that change how content is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FeatureSupport {
    /// The client decodes WebP images.
    pub webp: bool,
    /// A service worker can cache responses.
    pub service_worker: bool,
}

/// Loading behaviour switches derived from the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdaptiveFlags {
    pub enable_preloading: bool,
    pub enable_background_loading: bool,
    pub enable_lazy_loading: bool,
    pub enable_image_optimization: bool,
    pub enable_component_splitting: bool,
    pub fallback_timeout_ms: u64,
    pub retry_attempts: u32,
    pub cache_ttl_ms: u64,
}

impl AdaptiveFlags {
    /// Derive flags from tier, network and memory pressure.
    pub fn derive(tier: DeviceTier, network: NetworkSpeed, pressure: MemoryPressure) -> Self {
        let slow_device = tier == DeviceTier::LowEnd;
        let slow_network = network.is_slow();
        let pressured = pressure.is_pressured();

        Self {
            enable_preloading: !slow_device && !slow_network && !pressured,
            enable_background_loading: !slow_device && !pressured,
            enable_lazy_loading: true,
            enable_image_optimization: true,
            enable_component_splitting: !slow_network,
            fallback_timeout_ms: if slow_network {
                15_000
            } else if slow_device {
                10_000
            } else {
                5_000
            },
            retry_attempts: if slow_network { 4 } else { 2 },
            cache_ttl_ms: if slow_network { 600_000 } else { 300_000 },
        }
    }
}

/// Normalized, immutable picture of the device and its connection.
///
/// Every field is always populated; missing environment hints are replaced
/// by documented fallbacks in [`sample`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceCapabilities {
    pub memory_gb: f64,
    pub cores: u32,
    pub tier: DeviceTier,

    pub network: NetworkSpeed,
    pub downlink_mbps: f64,
    pub rtt_ms: u32,
    pub save_data: bool,

    pub memory_pressure: MemoryPressure,
    pub available_memory_mb: u64,
    pub used_memory_mb: u64,

    /// 1 - 10.
    pub load_capacity: u8,
    pub max_concurrent_loads: u32,
    /// 0.1 - 1.0.
    pub recommended_image_quality: f64,
    pub features: FeatureSupport,
    pub flags: AdaptiveFlags,
}

impl DeviceCapabilities {
    /// Fixed mid-range snapshot for contexts with no live environment.
    ///
    /// Used for server-side rendering and as the coordinator's initial value
    /// before the first sample arrives.
    pub fn server_default() -> Self {
        Self {
            memory_gb: 4.0,
            cores: 4,
            tier: DeviceTier::MidRange,
            network: NetworkSpeed::FourG,
            downlink_mbps: 10.0,
            rtt_ms: 50,
            save_data: false,
            memory_pressure: MemoryPressure::Low,
            available_memory_mb: 4000,
            used_memory_mb: 1000,
            load_capacity: 5,
            max_concurrent_loads: 2,
            recommended_image_quality: 0.8,
            features: FeatureSupport {
                webp: true,
                service_worker: false,
            },
            flags: AdaptiveFlags {
                enable_preloading: true,
                enable_background_loading: true,
                enable_lazy_loading: true,
                enable_image_optimization: true,
                enable_component_splitting: true,
                fallback_timeout_ms: 5_000,
                retry_attempts: 2,
                cache_ttl_ms: 300_000,
            },
        }
    }

    /// Short one-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:.0}GB/{} cores, {} {:.1}Mbps {}ms, {} pressure{})",
            self.tier,
            self.memory_gb,
            self.cores,
            self.network,
            self.downlink_mbps,
            self.rtt_ms,
            self.memory_pressure,
            if self.save_data { ", data saver" } else { "" }
        )
    }
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self::server_default()
    }
}
