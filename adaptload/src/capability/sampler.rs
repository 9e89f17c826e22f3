//! Capability sampling.
//!
//! [`sample`] turns whatever the provider exposes into a complete
//! [`DeviceCapabilities`] snapshot. [`CapabilitySampler`] keeps that snapshot
//! current and broadcasts it through a `watch` channel.
//!
//! # Fallbacks
//!
//! | Missing hint       | Fallback                                               |
//! |--------------------|--------------------------------------------------------|
//! | memory             | 4 GB                                                   |
//! | cores              | 4                                                      |
//! | heap usage         | 30% of device memory, pressure from device memory      |
//! | connection         | user agent: mobile → 3g/5Mbps/100ms, else 4g/10Mbps/50ms |
//! | connection fields  | 4g, 10 Mbps, 50 ms, no data saver                      |

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::provider::{CapabilityProvider, ConnectionInfo};
use super::tier::{classify, TierScores};
use super::{AdaptiveFlags, DeviceCapabilities, MemoryPressure, NetworkSpeed};

/// Default heap re-sampling interval.
pub const DEFAULT_HEAP_INTERVAL: Duration = Duration::from_secs(10);

const FALLBACK_MEMORY_GB: f64 = 4.0;
const FALLBACK_CORES: u32 = 4;
const FALLBACK_USED_FRACTION: f64 = 0.3;

fn mobile_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Mobile|Android|iPhone|iPad").expect("valid regex"))
}

/// Sampler tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerConfig {
    /// How often heap pressure is re-read.
    pub heap_interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            heap_interval: DEFAULT_HEAP_INTERVAL,
        }
    }
}

struct MemoryState {
    pressure: MemoryPressure,
    available_mb: u64,
    used_mb: u64,
}

fn memory_state(provider: &dyn CapabilityProvider, memory_gb: f64) -> MemoryState {
    match provider.heap() {
        Some(heap) => MemoryState {
            pressure: MemoryPressure::from_ratio(heap.ratio()),
            available_mb: heap.limit_mb,
            used_mb: heap.used_mb,
        },
        None => {
            let estimated = (memory_gb * 1024.0).round() as u64;
            MemoryState {
                pressure: MemoryPressure::from_device_memory(memory_gb),
                available_mb: estimated,
                used_mb: (estimated as f64 * FALLBACK_USED_FRACTION).round() as u64,
            }
        }
    }
}

fn network_state(provider: &dyn CapabilityProvider) -> ConnectionInfo {
    match provider.connection() {
        Some(connection) => ConnectionInfo::new(
            connection.effective_type.unwrap_or(NetworkSpeed::FourG),
            connection.downlink_mbps.unwrap_or(10.0),
            connection.rtt_ms.unwrap_or(50),
            connection.save_data.unwrap_or(false),
        ),
        None => {
            let mobile = provider
                .user_agent()
                .map(|ua| mobile_pattern().is_match(&ua))
                .unwrap_or(false);
            if mobile {
                ConnectionInfo::new(NetworkSpeed::ThreeG, 5.0, 100, false)
            } else {
                ConnectionInfo::new(NetworkSpeed::FourG, 10.0, 50, false)
            }
        }
    }
}

/// Build a complete snapshot from a provider.
///
/// Never fails and never leaves a field unset.
pub fn sample(provider: &dyn CapabilityProvider) -> DeviceCapabilities {
    let hardware = provider.hardware();
    let memory_gb = hardware.memory_gb.unwrap_or(FALLBACK_MEMORY_GB);
    let cores = hardware.cores.unwrap_or(FALLBACK_CORES);

    let memory = memory_state(provider, memory_gb);
    let network = network_state(provider);
    // network_state always fills every field
    let speed = network.effective_type.unwrap_or_default();
    let downlink = network.downlink_mbps.unwrap_or(10.0);

    let assessment = classify(TierScores::new(memory_gb, cores, downlink, memory.pressure));

    DeviceCapabilities {
        memory_gb,
        cores,
        tier: assessment.tier,
        network: speed,
        downlink_mbps: downlink,
        rtt_ms: network.rtt_ms.unwrap_or(50),
        save_data: network.save_data.unwrap_or(false),
        memory_pressure: memory.pressure,
        available_memory_mb: memory.available_mb,
        used_memory_mb: memory.used_mb,
        load_capacity: assessment.load_capacity,
        max_concurrent_loads: assessment.max_concurrent_loads,
        recommended_image_quality: assessment.recommended_image_quality,
        features: provider.features(),
        flags: AdaptiveFlags::derive(assessment.tier, speed, memory.pressure),
    }
}

/// Background sampler publishing fresh snapshots.
///
/// Owns exactly one refresh task, which in turn owns one interval timer and
/// at most one network-change subscription. Dropping the sampler or calling
/// [`shutdown`](Self::shutdown) releases all of them.
///
/// # Example
///
/// ```ignore
/// let provider = Arc::new(SystemCapabilityProvider::new());
/// let sampler = CapabilitySampler::start(provider, SamplerConfig::default());
///
/// let mut rx = sampler.subscribe();
/// while rx.changed().await.is_ok() {
///     println!("now {}", rx.borrow().summary());
/// }
/// ```
pub struct CapabilitySampler {
    rx: watch::Receiver<DeviceCapabilities>,
    cancellation: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for CapabilitySampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilitySampler")
            .field("current", &*self.rx.borrow())
            .field("running", &self.is_running())
            .finish()
    }
}

impl CapabilitySampler {
    /// Take an initial sample and spawn the refresh task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(provider: Arc<dyn CapabilityProvider>, config: SamplerConfig) -> Self {
        let initial = sample(provider.as_ref());
        tracing::info!(capabilities = %initial.summary(), "Capability sampler started");

        let (tx, rx) = watch::channel(initial);
        let cancellation = CancellationToken::new();
        let handle = tokio::spawn(refresh_loop(
            provider,
            config,
            tx,
            cancellation.clone(),
        ));

        Self {
            rx,
            cancellation,
            handle: Some(handle),
        }
    }

    /// New receiver for snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<DeviceCapabilities> {
        self.rx.clone()
    }

    /// Latest snapshot.
    pub fn current(&self) -> DeviceCapabilities {
        self.rx.borrow().clone()
    }

    /// Whether the refresh task is still alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the refresh task and wait for it to release its timer and listener.
    pub async fn shutdown(mut self) {
        self.cancellation.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Capability sampler task ended abnormally");
            }
        }
    }
}

impl Drop for CapabilitySampler {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

async fn refresh_loop(
    provider: Arc<dyn CapabilityProvider>,
    config: SamplerConfig,
    tx: watch::Sender<DeviceCapabilities>,
    cancellation: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.heap_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the initial sample is already published.
    interval.tick().await;

    let mut changes = provider.network_changes();

    loop {
        tokio::select! {
            _ = cancellation.cancelled() => break,
            _ = interval.tick() => publish(provider.as_ref(), &tx, "heap"),
            changed = network_changed(&mut changes) => {
                if changed {
                    publish(provider.as_ref(), &tx, "network");
                } else {
                    tracing::debug!("Network change source closed");
                    changes = None;
                }
            }
        }
    }

    tracing::debug!("Capability sampler stopped");
}

async fn network_changed(changes: &mut Option<watch::Receiver<()>>) -> bool {
    match changes {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

fn publish(provider: &dyn CapabilityProvider, tx: &watch::Sender<DeviceCapabilities>, trigger: &str) {
    let next = sample(provider);
    let changed = tx.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        tracing::debug!(
            trigger,
            from = %current.summary(),
            to = %next.summary(),
            "Device capabilities changed"
        );
        *current = next;
        true
    });
    if !changed {
        tracing::trace!(trigger, "Device capabilities unchanged");
    }
}
