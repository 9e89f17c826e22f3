//! Environment abstraction for capability sampling.
//!
//! The `CapabilityProvider` trait is the only place the library touches the
//! host environment. Each hint is optional; [`sample`](super::sample) fills
//! in documented fallbacks so the business logic never sees a partial
//! snapshot.
//!
//! # Implementations
//!
//! - [`SystemCapabilityProvider`]: reads memory and core count from the
//!   operating system via `sysinfo`; network conditions are pushed in by the
//!   host because there is no portable connection-quality API.
//! - [`StaticCapabilityProvider`]: fully deterministic, for tests and
//!   simulations. Every setter fires a change notification.

use parking_lot::{Mutex, RwLock};
use sysinfo::System;
use tokio::sync::watch;

use super::{FeatureSupport, NetworkSpeed};

const BYTES_PER_MB: u64 = 1024 * 1024;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Hardware hints. `None` means the environment does not expose the value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HardwareHints {
    pub memory_gb: Option<f64>,
    pub cores: Option<u32>,
}

/// Heap usage from a heap-introspection API.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeapUsage {
    pub used_mb: u64,
    pub limit_mb: u64,
}

impl HeapUsage {
    /// Used fraction of the limit. A zero limit counts as fully used.
    pub fn ratio(&self) -> f64 {
        if self.limit_mb == 0 {
            return 1.0;
        }
        self.used_mb as f64 / self.limit_mb as f64
    }
}

/// Live connection information. Any field may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConnectionInfo {
    pub effective_type: Option<NetworkSpeed>,
    pub downlink_mbps: Option<f64>,
    pub rtt_ms: Option<u32>,
    pub save_data: Option<bool>,
}

impl ConnectionInfo {
    /// Fully specified connection.
    pub fn new(effective_type: NetworkSpeed, downlink_mbps: f64, rtt_ms: u32, save_data: bool) -> Self {
        Self {
            effective_type: Some(effective_type),
            downlink_mbps: Some(downlink_mbps),
            rtt_ms: Some(rtt_ms),
            save_data: Some(save_data),
        }
    }
}

/// Source of device and network hints.
///
/// Implementations must be cheap to query; the sampler calls them on every
/// refresh tick.
pub trait CapabilityProvider: Send + Sync {
    /// Installed memory and logical core count.
    fn hardware(&self) -> HardwareHints;

    /// Heap usage, if a heap-introspection API exists.
    fn heap(&self) -> Option<HeapUsage>;

    /// Live connection info, if a connection API exists.
    fn connection(&self) -> Option<ConnectionInfo>;

    /// User agent string used for the mobile/desktop fallback heuristic.
    fn user_agent(&self) -> Option<String> {
        None
    }

    /// Optional platform features.
    fn features(&self) -> FeatureSupport;

    /// Change notifications for the connection, if the environment has them.
    ///
    /// The sampler subscribes once per running instance.
    fn network_changes(&self) -> Option<watch::Receiver<()>> {
        None
    }
}

// =============================================================================
// Static provider
// =============================================================================

#[derive(Debug, Clone, Default)]
struct StaticState {
    hardware: HardwareHints,
    heap: Option<HeapUsage>,
    connection: Option<ConnectionInfo>,
    user_agent: Option<String>,
    features: FeatureSupport,
}

/// Deterministic provider with settable hints.
///
/// Starts with nothing exposed, which exercises every fallback:
///
/// ```
/// use adaptload::capability::{sample, StaticCapabilityProvider};
///
/// let provider = StaticCapabilityProvider::new();
/// let caps = sample(&provider);
/// assert_eq!(caps.memory_gb, 4.0);
/// assert_eq!(caps.cores, 4);
/// ```
#[derive(Debug)]
pub struct StaticCapabilityProvider {
    state: RwLock<StaticState>,
    changes: watch::Sender<()>,
}

impl Default for StaticCapabilityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticCapabilityProvider {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(());
        Self {
            state: RwLock::new(StaticState::default()),
            changes,
        }
    }

    pub fn with_hardware(self, memory_gb: f64, cores: u32) -> Self {
        self.state.write().hardware = HardwareHints {
            memory_gb: Some(memory_gb),
            cores: Some(cores),
        };
        self
    }

    pub fn with_heap(self, used_mb: u64, limit_mb: u64) -> Self {
        self.state.write().heap = Some(HeapUsage { used_mb, limit_mb });
        self
    }

    pub fn with_connection(self, connection: ConnectionInfo) -> Self {
        self.state.write().connection = Some(connection);
        self
    }

    pub fn with_user_agent(self, user_agent: impl Into<String>) -> Self {
        self.state.write().user_agent = Some(user_agent.into());
        self
    }

    pub fn with_features(self, features: FeatureSupport) -> Self {
        self.state.write().features = features;
        self
    }

    /// Replace the connection and notify listeners.
    pub fn set_connection(&self, connection: Option<ConnectionInfo>) {
        self.state.write().connection = connection;
        self.changes.send_replace(());
    }

    /// Replace the heap usage. Picked up on the next interval tick.
    pub fn set_heap(&self, heap: Option<HeapUsage>) {
        self.state.write().heap = heap;
    }

    /// Number of live change subscriptions.
    pub fn listener_count(&self) -> usize {
        self.changes.receiver_count()
    }
}

impl CapabilityProvider for StaticCapabilityProvider {
    fn hardware(&self) -> HardwareHints {
        self.state.read().hardware
    }

    fn heap(&self) -> Option<HeapUsage> {
        self.state.read().heap
    }

    fn connection(&self) -> Option<ConnectionInfo> {
        self.state.read().connection
    }

    fn user_agent(&self) -> Option<String> {
        self.state.read().user_agent.clone()
    }

    fn features(&self) -> FeatureSupport {
        self.state.read().features
    }

    fn network_changes(&self) -> Option<watch::Receiver<()>> {
        Some(self.changes.subscribe())
    }
}

// =============================================================================
// System provider
// =============================================================================

/// Provider backed by the operating system.
///
/// Memory and cores come from `sysinfo`. Heap usage is approximated by
/// system memory usage. The connection is whatever the host last reported
/// through [`report_connection`](Self::report_connection); until then the
/// user-agent heuristic applies.
pub struct SystemCapabilityProvider {
    system: Mutex<System>,
    connection: RwLock<Option<ConnectionInfo>>,
    user_agent: Option<String>,
    features: FeatureSupport,
    changes: watch::Sender<()>,
}

impl std::fmt::Debug for SystemCapabilityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemCapabilityProvider")
            .field("connection", &self.connection)
            .field("user_agent", &self.user_agent)
            .field("features", &self.features)
            .finish_non_exhaustive()
    }
}

impl Default for SystemCapabilityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCapabilityProvider {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu();
        let (changes, _) = watch::channel(());

        Self {
            system: Mutex::new(system),
            connection: RwLock::new(None),
            user_agent: None,
            features: FeatureSupport {
                webp: true,
                service_worker: false,
            },
            changes,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_features(mut self, features: FeatureSupport) -> Self {
        self.features = features;
        self
    }

    pub fn with_connection(self, connection: ConnectionInfo) -> Self {
        *self.connection.write() = Some(connection);
        self
    }

    /// Report new connection conditions and notify the sampler.
    pub fn report_connection(&self, connection: ConnectionInfo) {
        *self.connection.write() = Some(connection);
        self.changes.send_replace(());
    }
}

impl CapabilityProvider for SystemCapabilityProvider {
    fn hardware(&self) -> HardwareHints {
        let system = self.system.lock();
        let total = system.total_memory();
        let cores = system.cpus().len();

        HardwareHints {
            memory_gb: (total > 0).then(|| total as f64 / BYTES_PER_GB),
            cores: (cores > 0).then_some(cores as u32),
        }
    }

    fn heap(&self) -> Option<HeapUsage> {
        let mut system = self.system.lock();
        system.refresh_memory();
        let limit = system.total_memory();
        if limit == 0 {
            return None;
        }
        Some(HeapUsage {
            used_mb: system.used_memory() / BYTES_PER_MB,
            limit_mb: limit / BYTES_PER_MB,
        })
    }

    fn connection(&self) -> Option<ConnectionInfo> {
        *self.connection.read()
    }

    fn user_agent(&self) -> Option<String> {
        self.user_agent.clone()
    }

    fn features(&self) -> FeatureSupport {
        self.features
    }

    fn network_changes(&self) -> Option<watch::Receiver<()>> {
        Some(self.changes.subscribe())
    }
}
