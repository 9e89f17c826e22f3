//! Caller-supplied strategy overrides.

use std::collections::BTreeSet;
use std::time::Duration;

use super::{CacheStrategy, LoadingStrategy, RetryStrategy};
use crate::unit::ContentUnit;

/// Partial strategy layered over the tier table.
///
/// Every field is optional; `None` keeps the tier value. Overrides are
/// applied before the network, memory and data-saver clamps, so a caller
/// cannot loosen a budget that current conditions require to be tight.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyOverrides {
    pub critical_components: Option<Vec<ContentUnit>>,
    pub deferred_components: Option<Vec<ContentUnit>>,
    pub preload_components: Option<Vec<ContentUnit>>,
    /// Units that must never load. Added to, never replacing, the tier's set.
    pub disabled_units: BTreeSet<ContentUnit>,

    pub image_quality: Option<f64>,
    pub image_sizes: Option<Vec<u32>>,
    pub lazy_load_threshold_px: Option<u32>,
    pub enable_prefetch: Option<bool>,
    pub enable_preload: Option<bool>,
    pub max_concurrent_requests: Option<u32>,
    pub chunk_size_bytes: Option<u32>,
    pub cache_strategy: Option<CacheStrategy>,
    pub cache_ttl: Option<Duration>,
    pub timeout: Option<Duration>,
    pub retry_strategy: Option<RetryStrategy>,
    pub graceful_degradation: Option<bool>,
}

impl StrategyOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when nothing is overridden.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn disable(mut self, unit: ContentUnit) -> Self {
        self.disabled_units.insert(unit);
        self
    }

    pub fn with_image_quality(mut self, quality: f64) -> Self {
        self.image_quality = Some(quality);
        self
    }

    pub fn with_max_concurrent_requests(mut self, max: u32) -> Self {
        self.max_concurrent_requests = Some(max);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_preload(mut self, enabled: bool) -> Self {
        self.enable_preload = Some(enabled);
        self
    }

    pub fn with_graceful_degradation(mut self, enabled: bool) -> Self {
        self.graceful_degradation = Some(enabled);
        self
    }

    pub fn with_cache_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.cache_strategy = Some(strategy);
        self
    }

    pub fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = Some(strategy);
        self
    }

    /// Layer these overrides onto `strategy`.
    pub fn apply(&self, strategy: &mut LoadingStrategy) {
        if let Some(units) = &self.critical_components {
            strategy.critical_components = units.clone();
        }
        if let Some(units) = &self.deferred_components {
            strategy.deferred_components = units.clone();
        }
        if let Some(units) = &self.preload_components {
            strategy.preload_components = units.clone();
        }
        strategy
            .disabled_components
            .extend(self.disabled_units.iter().copied());

        if let Some(v) = self.image_quality {
            strategy.image_quality = v;
        }
        if let Some(sizes) = &self.image_sizes {
            if !sizes.is_empty() {
                strategy.image_sizes = sizes.clone();
            }
        }
        if let Some(v) = self.lazy_load_threshold_px {
            strategy.lazy_load_threshold_px = v;
        }
        if let Some(v) = self.enable_prefetch {
            strategy.enable_prefetch = v;
        }
        if let Some(v) = self.enable_preload {
            strategy.enable_preload = v;
        }
        if let Some(v) = self.max_concurrent_requests {
            strategy.max_concurrent_requests = v;
        }
        if let Some(v) = self.chunk_size_bytes {
            strategy.chunk_size_bytes = v;
        }
        if let Some(v) = self.cache_strategy {
            strategy.cache_strategy = v;
        }
        if let Some(v) = self.cache_ttl {
            strategy.cache_ttl = v;
        }
        if let Some(v) = self.timeout {
            strategy.timeout = v;
        }
        if let Some(v) = self.retry_strategy {
            strategy.retry_strategy = v;
        }
        if let Some(v) = self.graceful_degradation {
            strategy.graceful_degradation = v;
        }
        strategy.normalize();
    }
}
