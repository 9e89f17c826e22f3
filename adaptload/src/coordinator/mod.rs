//! Load coordinator.
//!
//! The coordinator owns the current capability snapshot, the strategy and
//! plan derived from it, a bounded-concurrency gate, a TTL cache of resolved
//! units and the metrics ledger. Consumers ask it two things: whether a unit
//! should load now, and to load (or preload) one.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────── refresh(caps) / adapt_strategy(overrides) ────────────┐
//!                  ▼                                                                   │
//!   Policy { caps, overrides, strategy, plan }                           capability listener
//!                  │
//!   load_component ┼──► disabled? ──► cache ──► FIFO gate ──► registry.resolve ⟂ timeout
//!                  │                    ▲                                 │
//!                  │                    └──────── cache_strategy ◄────────┘
//!   preload_content┴──► dedupe ──► idle scheduler ──► load_component(Low)
//! ```
//!
//! The gate is a [`ConcurrencyGate`] over one `tokio::sync::Semaphore`,
//! which hands out permits in FIFO order. On refresh it is resized to the
//! new `max_concurrent_requests`; loads already holding a permit finish
//! undisturbed and count against the new cap until they do.

mod gate;
mod metrics;
mod scheduler;

pub use gate::{ConcurrencyGate, GatePermit};

pub use metrics::{LoadingMetrics, MetricsSnapshot, PerformanceEntry, PERFORMANCE_BUFFER_CAPACITY};
pub use scheduler::{DeferredIdleScheduler, IdleScheduler, TokioIdleScheduler, DEFAULT_IDLE_DELAY};

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use moka::future::Cache;
use moka::Expiry;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capability::DeviceCapabilities;
use crate::error::LoadError;
use crate::plan::{self, build_plan, ContentLoadingPlan, Partition};
use crate::strategy::{generate, CacheStrategy, LoadingStrategy, StrategyOverrides};
use crate::unit::{UnitId, UnitPayload, UnitRegistry};

/// Default number of cached units.
pub const DEFAULT_CACHE_CAPACITY: u64 = 256;

/// Caller-declared urgency of a load.
///
/// Permits are granted in arrival order regardless of priority; the value
/// is carried into logs and performance entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl LoadPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadPriority::High => "high",
            LoadPriority::Normal => "normal",
            LoadPriority::Low => "low",
        }
    }
}

impl fmt::Display for LoadPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Clone)]
struct CachedUnit {
    payload: Arc<UnitPayload>,
    ttl: Duration,
}

/// Expires each entry after the TTL that was active when it was stored.
struct UnitExpiry;

impl Expiry<UnitId, CachedUnit> for UnitExpiry {
    fn expire_after_create(&self, _key: &UnitId, value: &CachedUnit, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Everything derived from one capability snapshot.
#[derive(Debug, Clone)]
struct Policy {
    caps: DeviceCapabilities,
    overrides: StrategyOverrides,
    strategy: Arc<LoadingStrategy>,
    plan: Arc<ContentLoadingPlan>,
}

impl Policy {
    fn derive(caps: DeviceCapabilities, overrides: StrategyOverrides) -> Self {
        let strategy = generate(&caps, &overrides);
        let plan = build_plan(&strategy);
        Self {
            caps,
            overrides,
            strategy: Arc::new(strategy),
            plan: Arc::new(plan),
        }
    }
}

/// Removes the in-flight marker when a preload ends, however it ends.
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<UnitId, ()>,
    id: UnitId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

/// Device-aware unit loader shared by every consumer of a session.
///
/// # Example
///
/// ```ignore
/// let coordinator = LoadCoordinator::builder(registry)
///     .capabilities(sampler.current())
///     .build();
/// coordinator.spawn_capability_listener(sampler.subscribe(), token.clone());
///
/// if coordinator.should_load(&ContentUnit::Hero.into()) {
///     let hero = coordinator.load_component(&ContentUnit::Hero.into(), LoadPriority::High).await?;
/// }
/// ```
pub struct LoadCoordinator {
    registry: UnitRegistry,
    policy: RwLock<Policy>,
    gate: ConcurrencyGate,
    cache: Cache<UnitId, CachedUnit>,
    preloads: DashMap<UnitId, ()>,
    metrics: Arc<LoadingMetrics>,
    idle: Arc<dyn IdleScheduler>,
    origin: tokio::time::Instant,
}

impl fmt::Debug for LoadCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadCoordinator")
            .field("registry", &self.registry)
            .field("tier", &self.policy.read().caps.tier)
            .field("cached", &self.cache.entry_count())
            .field("preloads_in_flight", &self.preloads.len())
            .finish_non_exhaustive()
    }
}

impl LoadCoordinator {
    /// Start building a coordinator around `registry`.
    pub fn builder(registry: UnitRegistry) -> LoadCoordinatorBuilder {
        LoadCoordinatorBuilder::new(registry)
    }

    /// Current capability snapshot.
    pub fn capabilities(&self) -> DeviceCapabilities {
        self.policy.read().caps.clone()
    }

    /// Current strategy.
    pub fn strategy(&self) -> Arc<LoadingStrategy> {
        Arc::clone(&self.policy.read().strategy)
    }

    /// Current plan.
    pub fn plan(&self) -> Arc<ContentLoadingPlan> {
        Arc::clone(&self.policy.read().plan)
    }

    /// Shared metrics ledger.
    pub fn metrics_ledger(&self) -> Arc<LoadingMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Idle scheduler used for deferred work.
    pub fn idle_scheduler(&self) -> Arc<dyn IdleScheduler> {
        Arc::clone(&self.idle)
    }

    /// Adopt a new capability snapshot.
    pub fn refresh(&self, caps: DeviceCapabilities) {
        let overrides = self.policy.read().overrides.clone();
        self.install(Policy::derive(caps, overrides));
    }

    /// Replace the caller overrides and regenerate the strategy.
    pub fn adapt_strategy(&self, overrides: StrategyOverrides) {
        let caps = self.policy.read().caps.clone();
        self.install(Policy::derive(caps, overrides));
    }

    fn install(&self, policy: Policy) {
        let permits = gate_size(&policy.strategy);
        let mut current = self.policy.write();
        let resized = self.gate.resize(permits);

        debug!(
            tier = %policy.caps.tier,
            network = %policy.caps.network,
            concurrency = permits,
            gate_resized = resized,
            "Installed loading policy"
        );
        *current = policy;
    }

    /// Whether `id` should load eagerly under the current plan.
    pub fn should_load(&self, id: &UnitId) -> bool {
        let policy = self.policy.read();
        match id.registered() {
            Some(unit) => plan::should_load(unit, policy.caps.tier, &policy.plan),
            None => false,
        }
    }

    /// Load a unit.
    ///
    /// Returns `Ok(None)` for disabled units and, when graceful degradation
    /// is on, for failed loads. Every attempt that reaches the source adds
    /// its elapsed time to the ledger.
    pub async fn load_component(
        &self,
        id: &UnitId,
        priority: LoadPriority,
    ) -> Result<Option<Arc<UnitPayload>>, LoadError> {
        let (strategy, plan) = {
            let policy = self.policy.read();
            (Arc::clone(&policy.strategy), Arc::clone(&policy.plan))
        };

        if let Some(unit) = id.registered() {
            if strategy.is_disabled(unit) {
                debug!(unit = %id, "Unit disabled, skipping load");
                return Ok(None);
            }
        }

        if let Some(cached) = self.cache.get(id).await {
            self.metrics.record_cache_hit();
            self.metrics.record_loaded();
            debug!(unit = %id, "Cache hit");
            return Ok(Some(cached.payload));
        }
        self.metrics.record_cache_miss();

        let started = tokio::time::Instant::now();
        let _permit = self.gate.acquire().await?;

        let result = match tokio::time::timeout(strategy.timeout, self.registry.resolve(id)).await {
            Ok(result) => result,
            Err(_) => Err(LoadError::ResolutionTimeout {
                unit: id.to_string(),
                timeout: strategy.timeout,
            }),
        };

        let elapsed = started.elapsed();
        self.metrics.add_load_time(elapsed);

        match result {
            Ok(payload) => {
                self.metrics.record_loaded();
                let payload = Arc::new(payload);
                if should_cache(id, &strategy, &plan) {
                    self.cache
                        .insert(
                            id.clone(),
                            CachedUnit {
                                payload: Arc::clone(&payload),
                                ttl: strategy.cache_ttl,
                            },
                        )
                        .await;
                }
                debug!(
                    unit = %id,
                    priority = %priority,
                    elapsed_ms = elapsed.as_millis() as u64,
                    bytes = payload.body.len(),
                    "Unit loaded"
                );
                Ok(Some(payload))
            }
            Err(e) => {
                self.metrics.record_failure();
                if strategy.graceful_degradation {
                    warn!(unit = %id, priority = %priority, error = %e, "Unit load failed, degrading");
                    Ok(None)
                } else {
                    warn!(unit = %id, priority = %priority, error = %e, "Unit load failed");
                    Err(e)
                }
            }
        }
    }

    /// Warm a unit ahead of need.
    ///
    /// Does nothing when preloading is disabled, the unit is already cached,
    /// or a preload for it is already running. Failures are logged only.
    pub async fn preload_content(&self, id: UnitId) {
        if !self.strategy().enable_preload {
            debug!(unit = %id, "Preload disabled");
            return;
        }
        if self.cache.contains_key(&id) {
            return;
        }

        let _guard = match self.preloads.entry(id.clone()) {
            Entry::Occupied(_) => {
                debug!(unit = %id, "Preload already in flight");
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(());
                InFlightGuard {
                    in_flight: &self.preloads,
                    id: id.clone(),
                }
            }
        };

        self.idle.idle().await;

        if let Err(e) = self.load_component(&id, LoadPriority::Low).await {
            warn!(unit = %id, error = %e, "Preload failed");
        }
    }

    /// Fire-and-forget [`preload_content`](Self::preload_content).
    pub fn spawn_preload(self: &Arc<Self>, id: UnitId) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.preload_content(id).await })
    }

    /// Loads currently holding a concurrency slot.
    pub fn loads_in_flight(&self) -> usize {
        self.gate.in_flight()
    }

    /// Number of preloads currently running.
    pub fn preloads_in_flight(&self) -> usize {
        self.preloads.len()
    }

    /// Whether a resolved copy of `id` is cached.
    pub fn is_cached(&self, id: &UnitId) -> bool {
        self.cache.contains_key(id)
    }

    /// Counters plus memory usage from the current snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        let used = self.policy.read().caps.used_memory_mb;
        self.metrics.snapshot(used)
    }

    /// Milliseconds since the coordinator was built. Performance entries
    /// use this as their time origin.
    pub fn session_millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Record a host-observed timing.
    pub fn report_performance(&self, entry: PerformanceEntry) {
        self.metrics.report(entry);
    }

    /// Follow capability updates until `token` is cancelled or the sender
    /// goes away.
    pub fn spawn_capability_listener(
        self: &Arc<Self>,
        mut rx: watch::Receiver<DeviceCapabilities>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let caps = rx.borrow_and_update().clone();
                        info!(capabilities = %caps.summary(), "Capabilities changed");
                        coordinator.refresh(caps);
                    }
                }
            }
            debug!("Capability listener stopped");
        })
    }
}

fn gate_size(strategy: &LoadingStrategy) -> usize {
    strategy.max_concurrent_requests as usize
}

fn should_cache(id: &UnitId, strategy: &LoadingStrategy, plan: &ContentLoadingPlan) -> bool {
    match strategy.cache_strategy {
        CacheStrategy::Aggressive => true,
        CacheStrategy::Moderate => id.registered().is_some(),
        CacheStrategy::Minimal => id
            .registered()
            .is_some_and(|unit| plan.partition(unit) == Some(Partition::Immediate)),
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`LoadCoordinator`].
pub struct LoadCoordinatorBuilder {
    registry: UnitRegistry,
    caps: DeviceCapabilities,
    overrides: StrategyOverrides,
    idle: Arc<dyn IdleScheduler>,
    metrics: Arc<LoadingMetrics>,
    cache_capacity: u64,
}

impl LoadCoordinatorBuilder {
    fn new(registry: UnitRegistry) -> Self {
        Self {
            registry,
            caps: DeviceCapabilities::server_default(),
            overrides: StrategyOverrides::default(),
            idle: Arc::new(TokioIdleScheduler),
            metrics: Arc::new(LoadingMetrics::new()),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    /// Initial snapshot. Defaults to the server snapshot.
    pub fn capabilities(mut self, caps: DeviceCapabilities) -> Self {
        self.caps = caps;
        self
    }

    /// Initial snapshot taken from a sampler channel.
    pub fn capabilities_from(mut self, rx: &watch::Receiver<DeviceCapabilities>) -> Self {
        self.caps = rx.borrow().clone();
        self
    }

    pub fn overrides(mut self, overrides: StrategyOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn idle_scheduler(mut self, idle: Arc<dyn IdleScheduler>) -> Self {
        self.idle = idle;
        self
    }

    /// Report into an existing ledger instead of a fresh one.
    pub fn metrics(mut self, metrics: Arc<LoadingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn cache_capacity(mut self, capacity: u64) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn build(self) -> Arc<LoadCoordinator> {
        let policy = Policy::derive(self.caps, self.overrides);
        let permits = gate_size(&policy.strategy);
        let cache = Cache::builder()
            .max_capacity(self.cache_capacity)
            .expire_after(UnitExpiry)
            .build();

        info!(
            tier = %policy.caps.tier,
            concurrency = permits,
            cache = %policy.strategy.cache_strategy,
            "Load coordinator ready"
        );

        Arc::new(LoadCoordinator {
            registry: self.registry,
            policy: RwLock::new(policy),
            gate: ConcurrencyGate::new(permits),
            cache,
            preloads: DashMap::new(),
            metrics: self.metrics,
            idle: self.idle,
            origin: tokio::time::Instant::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{AdaptiveFlags, DeviceTier, MemoryPressure, NetworkSpeed};
    use crate::unit::{ContentUnit, StaticUnitSource, UnitFuture, UnitSource};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts resolves and tracks the peak number running at once.
    #[derive(Default)]
    struct CountingSource {
        latency: Duration,
        fail: bool,
        calls: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl CountingSource {
        fn with_latency(latency: Duration) -> Self {
            Self {
                latency,
                ..Default::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl UnitSource for CountingSource {
        fn resolve<'a>(&'a self, id: &'a UnitId) -> UnitFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(self.latency).await;
                self.running.fetch_sub(1, Ordering::SeqCst);
                if self.fail {
                    Err(LoadError::failure(id.as_str(), "boom"))
                } else {
                    Ok(UnitPayload::new(id.clone(), id.to_string()))
                }
            })
        }
    }

    fn caps(tier: DeviceTier, network: NetworkSpeed) -> DeviceCapabilities {
        DeviceCapabilities {
            tier,
            network,
            flags: AdaptiveFlags::derive(tier, network, MemoryPressure::Low),
            ..DeviceCapabilities::server_default()
        }
    }

    fn coordinator(source: Arc<CountingSource>, caps: DeviceCapabilities) -> Arc<LoadCoordinator> {
        LoadCoordinator::builder(UnitRegistry::uniform(source))
            .capabilities(caps)
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_degrades_gracefully() {
        let source = Arc::new(CountingSource::with_latency(Duration::from_secs(60)));
        let coordinator = coordinator(source, caps(DeviceTier::HighEnd, NetworkSpeed::FourG));
        let timeout = coordinator.strategy().timeout;
        assert!(coordinator.strategy().graceful_degradation);

        let start = tokio::time::Instant::now();
        let result = coordinator
            .load_component(&ContentUnit::Hero.into(), LoadPriority::High)
            .await;

        assert_eq!(result, Ok(None));
        assert_eq!(start.elapsed(), timeout);
        let metrics = coordinator.metrics();
        assert_eq!(metrics.failed_loads, 1);
        assert_eq!(metrics.components_loaded, 0);
        assert_eq!(metrics.total_load_time_ms, timeout.as_millis() as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_degradation_is_error() {
        let source = Arc::new(CountingSource::with_latency(Duration::from_secs(60)));
        let coordinator = LoadCoordinator::builder(UnitRegistry::uniform(source))
            .capabilities(caps(DeviceTier::HighEnd, NetworkSpeed::FourG))
            .overrides(StrategyOverrides::new().with_graceful_degradation(false))
            .build();

        let err = coordinator
            .load_component(&ContentUnit::Hero.into(), LoadPriority::High)
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::ResolutionTimeout { .. }));
        assert_eq!(coordinator.metrics().failed_loads, 1);
    }

    #[tokio::test]
    async fn test_failure_counts_once() {
        let source = Arc::new(CountingSource::failing());
        let coordinator = coordinator(source.clone(), caps(DeviceTier::MidRange, NetworkSpeed::FourG));

        let result = coordinator
            .load_component(&ContentUnit::Menu.into(), LoadPriority::Normal)
            .await;
        assert_eq!(result, Ok(None));
        assert_eq!(coordinator.metrics().failed_loads, 1);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_disabled_unit_is_not_resolved() {
        let source = Arc::new(CountingSource::default());
        let coordinator = LoadCoordinator::builder(UnitRegistry::uniform(source.clone()))
            .overrides(StrategyOverrides::new().disable(ContentUnit::Slideshow))
            .build();

        let result = coordinator
            .load_component(&ContentUnit::Slideshow.into(), LoadPriority::Normal)
            .await;
        assert_eq!(result, Ok(None));
        assert_eq!(source.calls(), 0);
        assert!(!coordinator.should_load(&ContentUnit::Slideshow.into()));
    }

    #[tokio::test]
    async fn test_cache_hit_counts_as_load() {
        let source = Arc::new(CountingSource::default());
        let coordinator = coordinator(source.clone(), caps(DeviceTier::MidRange, NetworkSpeed::FourG));
        let id: UnitId = ContentUnit::Header.into();

        let first = coordinator.load_component(&id, LoadPriority::High).await.unwrap();
        let second = coordinator.load_component(&id, LoadPriority::High).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(source.calls(), 1);
        let metrics = coordinator.metrics();
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.cache_misses, 1);
        assert_eq!(metrics.components_loaded, 2);
    }

    #[tokio::test]
    async fn test_cache_policy() {
        let s = LoadingStrategy {
            critical_components: vec![ContentUnit::Header],
            preload_components: vec![ContentUnit::Hero],
            ..LoadingStrategy::baseline()
        };
        let plan = build_plan(&s);
        let header: UnitId = ContentUnit::Header.into();
        let hero: UnitId = ContentUnit::Hero.into();
        let dynamic = UnitId::parse("daily-special");

        let aggressive = LoadingStrategy {
            cache_strategy: CacheStrategy::Aggressive,
            ..s.clone()
        };
        assert!(should_cache(&dynamic, &aggressive, &plan));

        let moderate = LoadingStrategy {
            cache_strategy: CacheStrategy::Moderate,
            ..s.clone()
        };
        assert!(should_cache(&hero, &moderate, &plan));
        assert!(!should_cache(&dynamic, &moderate, &plan));

        let minimal = LoadingStrategy {
            cache_strategy: CacheStrategy::Minimal,
            ..s
        };
        assert!(should_cache(&header, &minimal, &plan));
        assert!(!should_cache(&hero, &minimal, &plan));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded_by_strategy() {
        let source = Arc::new(CountingSource::with_latency(Duration::from_millis(100)));
        // Mid-range: two concurrent requests.
        let coordinator = coordinator(source.clone(), caps(DeviceTier::MidRange, NetworkSpeed::FourG));
        assert_eq!(coordinator.strategy().max_concurrent_requests, 2);

        let loads = ContentUnit::ALL.iter().take(6).map(|unit| {
            let coordinator = Arc::clone(&coordinator);
            let id: UnitId = (*unit).into();
            tokio::spawn(async move { coordinator.load_component(&id, LoadPriority::Normal).await })
        });
        for load in futures::future::join_all(loads).await {
            assert!(load.unwrap().unwrap().is_some());
        }

        assert_eq!(source.peak.load(Ordering::SeqCst), 2);
        assert_eq!(source.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preload_is_deduplicated() {
        let source = Arc::new(CountingSource::with_latency(Duration::from_millis(500)));
        let coordinator = coordinator(source.clone(), caps(DeviceTier::Premium, NetworkSpeed::FourG));
        let id: UnitId = ContentUnit::Testimonials.into();

        let first = coordinator.spawn_preload(id.clone());
        let second = coordinator.spawn_preload(id.clone());
        let third = coordinator.spawn_preload(id.clone());
        first.await.unwrap();
        second.await.unwrap();
        third.await.unwrap();

        assert_eq!(source.calls(), 1);
        assert_eq!(coordinator.preloads_in_flight(), 0);
        assert_eq!(coordinator.metrics().components_loaded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_preloads_count_once_without_cache() {
        let source = Arc::new(CountingSource::with_latency(Duration::from_millis(500)));
        let coordinator = coordinator(source.clone(), caps(DeviceTier::Premium, NetworkSpeed::FourG));
        assert_eq!(coordinator.strategy().cache_strategy, CacheStrategy::Minimal);
        let id: UnitId = ContentUnit::Slideshow.into();

        futures::join!(
            coordinator.preload_content(id.clone()),
            coordinator.preload_content(id.clone()),
        );

        assert!(!coordinator.is_cached(&id));
        assert_eq!(source.calls(), 1);
        let metrics = coordinator.metrics();
        assert_eq!(metrics.components_loaded, 1);
        assert_eq!(metrics.failed_loads, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shrinking_cap_holds_during_in_flight_loads() {
        let source = Arc::new(CountingSource::with_latency(Duration::from_millis(100)));
        let coordinator = coordinator(source.clone(), caps(DeviceTier::Premium, NetworkSpeed::FourG));
        assert_eq!(coordinator.strategy().max_concurrent_requests, 6);
        let started = tokio::time::Instant::now();

        let spawn = |unit: ContentUnit| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.load_component(&unit.into(), LoadPriority::Normal).await })
        };

        let mut loads: Vec<_> = ContentUnit::ALL[..6].iter().map(|u| spawn(*u)).collect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(coordinator.loads_in_flight(), 6);

        coordinator.refresh(caps(DeviceTier::Premium, NetworkSpeed::TwoG));
        assert_eq!(coordinator.strategy().max_concurrent_requests, 1);

        loads.extend(ContentUnit::ALL[6..9].iter().map(|u| spawn(*u)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        // The old loads still hold every slot.
        assert_eq!(source.calls(), 6);

        for load in futures::future::join_all(loads).await {
            assert!(load.unwrap().unwrap().is_some());
        }

        assert_eq!(source.peak.load(Ordering::SeqCst), 6);
        assert_eq!(source.calls(), 9);
        // The three late loads ran one at a time after the first wave.
        assert!(started.elapsed() >= Duration::from_millis(400));
        assert_eq!(coordinator.loads_in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_growing_cap_admits_queued_loads() {
        let source = Arc::new(CountingSource::with_latency(Duration::from_millis(100)));
        let coordinator = coordinator(source.clone(), caps(DeviceTier::Premium, NetworkSpeed::TwoG));
        assert_eq!(coordinator.strategy().max_concurrent_requests, 1);

        let loads: Vec<_> = ContentUnit::ALL[..4]
            .iter()
            .map(|unit| {
                let coordinator = Arc::clone(&coordinator);
                let id: UnitId = (*unit).into();
                tokio::spawn(async move { coordinator.load_component(&id, LoadPriority::Normal).await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(coordinator.loads_in_flight(), 1);

        coordinator.refresh(caps(DeviceTier::Premium, NetworkSpeed::FourG));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(coordinator.loads_in_flight(), 4);

        futures::future::join_all(loads).await;
        assert_eq!(source.peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_preload_skips_when_disabled() {
        let source = Arc::new(CountingSource::default());
        let coordinator = coordinator(source.clone(), caps(DeviceTier::LowEnd, NetworkSpeed::FourG));
        assert!(!coordinator.strategy().enable_preload);

        coordinator.preload_content(ContentUnit::Hero.into()).await;
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_preload_skips_cached_unit() {
        let source = Arc::new(CountingSource::default());
        let coordinator = coordinator(source.clone(), caps(DeviceTier::HighEnd, NetworkSpeed::FourG));
        let id: UnitId = ContentUnit::Menu.into();

        coordinator.preload_content(id.clone()).await;
        assert!(coordinator.is_cached(&id));
        coordinator.preload_content(id).await;
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn test_should_load_follows_plan() {
        let coordinator = LoadCoordinator::builder(UnitRegistry::uniform(Arc::new(StaticUnitSource::new())))
            .capabilities(caps(DeviceTier::LowEnd, NetworkSpeed::FourG))
            .build();

        assert!(coordinator.should_load(&ContentUnit::Header.into()));
        assert!(!coordinator.should_load(&ContentUnit::Navigation.into()));
        assert!(!coordinator.should_load(&UnitId::parse("daily-special")));
    }

    #[test]
    fn test_refresh_regenerates_strategy() {
        let coordinator = LoadCoordinator::builder(UnitRegistry::uniform(Arc::new(StaticUnitSource::new())))
            .capabilities(caps(DeviceTier::Premium, NetworkSpeed::FourG))
            .build();
        assert_eq!(coordinator.strategy().max_concurrent_requests, 6);

        coordinator.refresh(caps(DeviceTier::Premium, NetworkSpeed::TwoG));
        assert_eq!(coordinator.strategy().max_concurrent_requests, 1);
        assert_eq!(coordinator.capabilities().network, NetworkSpeed::TwoG);
    }

    #[test]
    fn test_adapt_strategy_replaces_overrides() {
        let coordinator = LoadCoordinator::builder(UnitRegistry::uniform(Arc::new(StaticUnitSource::new())))
            .capabilities(caps(DeviceTier::HighEnd, NetworkSpeed::FourG))
            .overrides(StrategyOverrides::new().with_image_quality(0.3))
            .build();
        assert_eq!(coordinator.strategy().image_quality, 0.3);

        coordinator.adapt_strategy(StrategyOverrides::new().with_max_concurrent_requests(3));
        assert_eq!(coordinator.strategy().image_quality, 0.85);
        assert_eq!(coordinator.strategy().max_concurrent_requests, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capability_listener_follows_updates() {
        let coordinator = LoadCoordinator::builder(UnitRegistry::uniform(Arc::new(StaticUnitSource::new())))
            .capabilities(caps(DeviceTier::HighEnd, NetworkSpeed::FourG))
            .build();
        let (tx, rx) = watch::channel(caps(DeviceTier::HighEnd, NetworkSpeed::FourG));
        let token = CancellationToken::new();
        let handle = coordinator.spawn_capability_listener(rx, token.clone());

        tx.send_replace(caps(DeviceTier::HighEnd, NetworkSpeed::ThreeG));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(coordinator.capabilities().network, NetworkSpeed::ThreeG);
        assert_eq!(coordinator.strategy().max_concurrent_requests, 2);

        token.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_report_performance_feeds_metrics() {
        let coordinator = LoadCoordinator::builder(UnitRegistry::uniform(Arc::new(StaticUnitSource::new()))).build();
        coordinator.report_performance(PerformanceEntry::new("hero.webp", Duration::from_millis(40), 0));
        let metrics = coordinator.metrics();
        assert_eq!(metrics.network_utilization_ms, 40);
        assert_eq!(metrics.memory_usage_mb, 1000);
    }
}
