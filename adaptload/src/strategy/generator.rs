//! Strategy generation.
//!
//! Pure functions from a capability snapshot to a [`LoadingStrategy`]. The
//! tier table picks the starting budgets; the clamps then tighten them for
//! the current network, memory pressure and data-saver preference.

use std::time::Duration;

use tracing::debug;

use super::{CacheStrategy, LoadingStrategy, RetryStrategy, StrategyOverrides};
use crate::capability::{AdaptiveFlags, DeviceCapabilities, DeviceTier, NetworkSpeed};
use crate::unit::ContentUnit;

use ContentUnit::*;

/// Generate the strategy for `caps`, layering `overrides` before the clamps.
///
/// # Example
///
/// ```
/// use adaptload::{generate, DeviceCapabilities, StrategyOverrides};
///
/// let strategy = generate(&DeviceCapabilities::server_default(), &StrategyOverrides::default());
/// assert_eq!(strategy.max_concurrent_requests, 2);
/// ```
pub fn generate(caps: &DeviceCapabilities, overrides: &StrategyOverrides) -> LoadingStrategy {
    let mut strategy = unclamped(caps, overrides);

    clamp_network(&mut strategy, caps.network);
    if caps.memory_pressure.is_pressured() {
        clamp_memory(&mut strategy);
    }
    if caps.save_data {
        clamp_data_saver(&mut strategy);
    }

    debug!(
        tier = %caps.tier,
        network = %caps.network,
        pressure = %caps.memory_pressure,
        save_data = caps.save_data,
        quality = strategy.image_quality,
        concurrency = strategy.max_concurrent_requests,
        timeout_ms = strategy.timeout.as_millis() as u64,
        cache = %strategy.cache_strategy,
        "Generated loading strategy"
    );

    strategy
}

/// Tier table plus overrides, before any clamp.
pub(crate) fn unclamped(caps: &DeviceCapabilities, overrides: &StrategyOverrides) -> LoadingStrategy {
    let mut strategy = tier_baseline(caps.tier, &caps.flags);
    overrides.apply(&mut strategy);
    strategy
}

/// Baseline with the tier's fields substituted.
///
/// `flags` only matters for mid-range, whose prefetch and preload follow
/// `flags.enable_preloading`.
pub fn tier_baseline(tier: DeviceTier, flags: &AdaptiveFlags) -> LoadingStrategy {
    let base = LoadingStrategy::baseline();

    match tier {
        DeviceTier::LowEnd => LoadingStrategy {
            critical_components: vec![Header, MainContent],
            deferred_components: vec![Animations, Modals, Slideshow, Testimonials],
            preload_components: Vec::new(),
            image_quality: 0.6,
            image_sizes: vec![320, 640],
            lazy_load_threshold_px: 50,
            enable_prefetch: false,
            enable_preload: false,
            max_concurrent_requests: 1,
            chunk_size_bytes: 32_000,
            cache_strategy: CacheStrategy::Aggressive,
            cache_ttl: Duration::from_millis(600_000),
            timeout: Duration::from_millis(15_000),
            retry_strategy: RetryStrategy::Linear,
            ..base
        },
        DeviceTier::MidRange => LoadingStrategy {
            critical_components: vec![Header, Navigation, MainContent, Menu],
            deferred_components: vec![Animations, Modals],
            preload_components: vec![Menu],
            image_quality: 0.75,
            image_sizes: vec![320, 640, 1024],
            lazy_load_threshold_px: 75,
            enable_prefetch: flags.enable_preloading,
            enable_preload: flags.enable_preloading,
            max_concurrent_requests: 2,
            chunk_size_bytes: 48_000,
            cache_strategy: CacheStrategy::Moderate,
            timeout: Duration::from_millis(8_000),
            ..base
        },
        DeviceTier::HighEnd => LoadingStrategy {
            critical_components: vec![Header, Navigation, MainContent, Menu, Hero],
            deferred_components: vec![Modals],
            preload_components: vec![Menu, Hero, Testimonials],
            image_quality: 0.85,
            image_sizes: vec![320, 640, 1024, 1920],
            lazy_load_threshold_px: 100,
            max_concurrent_requests: 4,
            chunk_size_bytes: 64_000,
            timeout: Duration::from_millis(6_000),
            ..base
        },
        DeviceTier::Premium => LoadingStrategy {
            critical_components: vec![Header, Navigation, MainContent, Menu, Hero],
            deferred_components: Vec::new(),
            preload_components: vec![Menu, Hero, Testimonials, Slideshow, Animations],
            image_quality: 0.95,
            image_sizes: vec![320, 640, 1024, 1920, 2560],
            lazy_load_threshold_px: 150,
            max_concurrent_requests: 6,
            chunk_size_bytes: 128_000,
            cache_strategy: CacheStrategy::Minimal,
            timeout: Duration::from_millis(4_000),
            ..base
        },
    }
}

// =============================================================================
// Clamps
// =============================================================================

fn clamp_network(strategy: &mut LoadingStrategy, network: NetworkSpeed) {
    if network.is_very_slow() {
        strategy.image_quality = strategy.image_quality.min(0.5);
        cap_ladder(&mut strategy.image_sizes, 640);
        strategy.enable_prefetch = false;
        strategy.enable_preload = false;
        strategy.max_concurrent_requests = strategy.max_concurrent_requests.min(1);
        strategy.chunk_size_bytes = strategy.chunk_size_bytes.min(16_000);
        strategy.timeout = strategy.timeout.max(Duration::from_millis(20_000));
        strategy.cache_ttl = strategy.cache_ttl.max(Duration::from_millis(900_000));
        strategy.cache_strategy = CacheStrategy::Aggressive;
    } else if network == NetworkSpeed::ThreeG {
        strategy.image_quality = strategy.image_quality.min(0.7);
        cap_ladder(&mut strategy.image_sizes, 1024);
        strategy.max_concurrent_requests = strategy.max_concurrent_requests.min(2);
        strategy.chunk_size_bytes = strategy.chunk_size_bytes.min(32_000);
        strategy.timeout = strategy.timeout.max(Duration::from_millis(10_000));
    }
}

/// High or critical memory pressure. Cache TTL is left unchanged here;
/// clamps only ever lengthen it.
fn clamp_memory(strategy: &mut LoadingStrategy) {
    defer_preloads(strategy);
    strategy.enable_prefetch = false;
    strategy.enable_preload = false;
    strategy.max_concurrent_requests = strategy.max_concurrent_requests.min(1);
    strategy.cache_strategy = CacheStrategy::Minimal;
}

fn clamp_data_saver(strategy: &mut LoadingStrategy) {
    strategy.image_quality = strategy.image_quality.min(0.6);
    strategy.image_sizes.truncate(2);
    strategy.enable_prefetch = false;
    defer_preloads(strategy);
    strategy.max_concurrent_requests = strategy.max_concurrent_requests.min(1);
    if strategy.cache_strategy != CacheStrategy::Minimal {
        strategy.cache_strategy = CacheStrategy::Aggressive;
    }
}

/// Drop widths above `limit`, keeping at least the smallest width.
fn cap_ladder(sizes: &mut Vec<u32>, limit: u32) {
    let smallest = sizes.first().copied();
    sizes.retain(|w| *w <= limit);
    if sizes.is_empty() {
        sizes.extend(smallest);
    }
}

fn defer_preloads(strategy: &mut LoadingStrategy) {
    for unit in std::mem::take(&mut strategy.preload_components) {
        if !strategy.deferred_components.contains(&unit) {
            strategy.deferred_components.push(unit);
        }
    }
}
