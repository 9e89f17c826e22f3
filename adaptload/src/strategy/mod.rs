//! Loading strategy: the budgets and unit sets that govern a session.
//!
//! A [`LoadingStrategy`] is a plain value. It is produced by
//! [`generate`] from a capability snapshot and never mutated in place by
//! consumers; a new snapshot produces a new strategy.
//!
//! # Pipeline
//!
//! ```text
//! DeviceTier ──► tier table ──► overrides ──► network clamp ──► memory clamp ──► data-saver clamp
//! ```
//!
//! Clamps only ever tighten: quality, concurrency, chunk size and the width
//! ladder can shrink; timeout and TTL can grow; flags can only switch off.

mod generator;
mod overrides;

pub use generator::{generate, tier_baseline};
pub use overrides::StrategyOverrides;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::unit::ContentUnit;

/// How eagerly resolved units are cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    /// Cache every successful load.
    Aggressive,
    /// Cache registered units only.
    Moderate,
    /// Cache immediate units only.
    Minimal,
}

impl CacheStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStrategy::Aggressive => "aggressive",
            CacheStrategy::Moderate => "moderate",
            CacheStrategy::Minimal => "minimal",
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aggressive" => Ok(CacheStrategy::Aggressive),
            "moderate" => Ok(CacheStrategy::Moderate),
            "minimal" => Ok(CacheStrategy::Minimal),
            other => Err(format!(
                "unknown cache strategy '{}' (expected aggressive, moderate or minimal)",
                other
            )),
        }
    }
}

/// Retry policy for failed unit loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    Exponential,
    Linear,
    Disabled,
}

impl RetryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryStrategy::Exponential => "exponential",
            RetryStrategy::Linear => "linear",
            RetryStrategy::Disabled => "disabled",
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, RetryStrategy::Disabled)
    }
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exponential" => Ok(RetryStrategy::Exponential),
            "linear" => Ok(RetryStrategy::Linear),
            "disabled" | "none" => Ok(RetryStrategy::Disabled),
            other => Err(format!(
                "unknown retry strategy '{}' (expected exponential, linear or disabled)",
                other
            )),
        }
    }
}

/// Resolved thresholds and budgets for one capability snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadingStrategy {
    /// Loaded immediately, in this order.
    pub critical_components: Vec<ContentUnit>,
    /// Loaded only on demand.
    pub deferred_components: Vec<ContentUnit>,
    /// Warmed ahead of need when preloading is enabled.
    pub preload_components: Vec<ContentUnit>,
    /// Never loaded.
    pub disabled_components: BTreeSet<ContentUnit>,

    /// 0.1 - 1.0.
    pub image_quality: f64,
    /// Width ladder in pixels, ascending.
    pub image_sizes: Vec<u32>,
    pub lazy_load_threshold_px: u32,

    pub enable_prefetch: bool,
    pub enable_preload: bool,
    pub max_concurrent_requests: u32,
    pub chunk_size_bytes: u32,

    pub cache_strategy: CacheStrategy,
    #[serde(serialize_with = "serialize_millis")]
    pub cache_ttl: Duration,
    #[serde(serialize_with = "serialize_millis")]
    pub timeout: Duration,
    pub retry_strategy: RetryStrategy,
    pub graceful_degradation: bool,
}

fn serialize_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

impl LoadingStrategy {
    /// Tier-independent starting point.
    pub fn baseline() -> Self {
        Self {
            critical_components: vec![
                ContentUnit::Header,
                ContentUnit::Navigation,
                ContentUnit::MainContent,
            ],
            deferred_components: Vec::new(),
            preload_components: Vec::new(),
            disabled_components: BTreeSet::new(),
            image_quality: 0.8,
            image_sizes: vec![320, 640, 1024, 1920],
            lazy_load_threshold_px: 100,
            enable_prefetch: true,
            enable_preload: true,
            max_concurrent_requests: 4,
            chunk_size_bytes: 64_000,
            cache_strategy: CacheStrategy::Moderate,
            cache_ttl: Duration::from_millis(300_000),
            timeout: Duration::from_millis(5_000),
            retry_strategy: RetryStrategy::Exponential,
            graceful_degradation: true,
        }
    }

    /// Largest width in the ladder.
    pub fn max_image_size(&self) -> Option<u32> {
        self.image_sizes.last().copied()
    }

    /// Smallest width in the ladder.
    pub fn min_image_size(&self) -> Option<u32> {
        self.image_sizes.first().copied()
    }

    pub fn is_disabled(&self, unit: ContentUnit) -> bool {
        self.disabled_components.contains(&unit)
    }

    /// Re-establish the structural invariants after edits: ascending
    /// de-duplicated ladder, unique unit lists, quality and concurrency in
    /// range.
    pub(crate) fn normalize(&mut self) {
        self.image_sizes.retain(|w| *w > 0);
        self.image_sizes.sort_unstable();
        self.image_sizes.dedup();
        dedup_in_order(&mut self.critical_components);
        dedup_in_order(&mut self.deferred_components);
        dedup_in_order(&mut self.preload_components);
        self.image_quality = if self.image_quality.is_nan() {
            0.1
        } else {
            self.image_quality.clamp(0.1, 1.0)
        };
        self.max_concurrent_requests = self.max_concurrent_requests.max(1);
    }
}

impl Default for LoadingStrategy {
    fn default() -> Self {
        Self::baseline()
    }
}

fn dedup_in_order(units: &mut Vec<ContentUnit>) {
    let mut seen = BTreeSet::new();
    units.retain(|unit| seen.insert(*unit));
}
