//! Per-consumer unit loader with retries and stale-while-revalidate.
//!
//! A [`UnitLoader`] belongs to exactly one consumer. It runs attempts one at
//! a time, publishes a [`LoadingState`] through a watch channel, and tears
//! everything down when disposed: in-flight attempts, backoff sleeps and the
//! progress ticker all hang off one root [`CancellationToken`].
//!
//! ```text
//!            load()                      attempt fails, retries left
//!  Idle ──────────────► Loading ─────────────────────────────► Retrying ──┐
//!                          │  ▲                                   │       │ backoff
//!                          │  └───────────────────────────────────┼───────┘
//!                  success │                     retries exhausted│
//!                          ▼                                      ▼
//!                       Success                   Stale (last good data) | Error
//! ```
//!
//! After [`dispose`](UnitLoader::dispose) no state is ever written again;
//! pending calls return [`LoadError::UnmountedDuringOperation`].

mod backoff;
mod state;

pub use backoff::{Backoff, JITTER, MAX_RETRY_DELAY};
pub use state::{LoadStatus, LoadingState};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::capability::NetworkSpeed;
use crate::coordinator::{LoadCoordinator, LoadPriority, LoadingMetrics};
use crate::error::LoadError;
use crate::strategy::LoadingStrategy;
use crate::unit::{UnitId, UnitPayload};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay between attempts.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);

/// Per-attempt timeout on slow networks.
pub const SLOW_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Per-attempt timeout otherwise.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_millis(8_000);

/// Progress ticker period.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

const SLOW_ESTIMATE: Duration = Duration::from_millis(8_000);
const FAST_ESTIMATE: Duration = Duration::from_millis(3_000);

/// Produces the value a loader manages.
///
/// The token is the attempt's abort signal: it fires on timeout and on
/// dispose. Implemented for any `Fn(CancellationToken) -> Future`.
pub trait UnitFetcher<T>: Send + Sync {
    fn fetch(&self, abort: CancellationToken) -> BoxFuture<'_, Result<T, LoadError>>;
}

impl<T, F, Fut> UnitFetcher<T> for F
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, LoadError>> + Send + 'static,
{
    fn fetch(&self, abort: CancellationToken) -> BoxFuture<'_, Result<T, LoadError>> {
        Box::pin(self(abort))
    }
}

/// Fetches a unit through a [`LoadCoordinator`].
///
/// A degraded load (`Ok(None)` from the coordinator) counts as a failed
/// attempt so that the loader's retry and stale logic applies.
pub struct CoordinatorFetcher {
    coordinator: Arc<LoadCoordinator>,
    id: UnitId,
    priority: LoadPriority,
}

impl CoordinatorFetcher {
    pub fn new(coordinator: Arc<LoadCoordinator>, id: UnitId, priority: LoadPriority) -> Self {
        Self {
            coordinator,
            id,
            priority,
        }
    }
}

impl UnitFetcher<Arc<UnitPayload>> for CoordinatorFetcher {
    fn fetch(&self, abort: CancellationToken) -> BoxFuture<'_, Result<Arc<UnitPayload>, LoadError>> {
        Box::pin(async move {
            tokio::select! {
                _ = abort.cancelled() => Err(LoadError::NetworkAbort),
                result = self.coordinator.load_component(&self.id, self.priority) => match result? {
                    Some(payload) => Ok(payload),
                    None => Err(LoadError::failure(self.id.as_str(), "unit unavailable")),
                },
            }
        })
    }
}

/// Loader tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoaderOptions {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub stale_while_revalidate: bool,
    pub progress_tracking: bool,
    pub network: NetworkSpeed,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            stale_while_revalidate: true,
            progress_tracking: true,
            network: NetworkSpeed::default(),
        }
    }
}

impl LoaderOptions {
    /// Defaults adjusted for a strategy: no retries when retrying is disabled.
    pub fn for_strategy(strategy: &LoadingStrategy, network: NetworkSpeed) -> Self {
        Self {
            max_retries: if strategy.retry_strategy.is_enabled() {
                DEFAULT_MAX_RETRIES
            } else {
                0
            },
            network,
            ..Self::default()
        }
    }

    fn attempt_timeout(&self) -> Duration {
        if self.network.is_slow() {
            SLOW_ATTEMPT_TIMEOUT
        } else {
            ATTEMPT_TIMEOUT
        }
    }

    fn progress_estimate(&self) -> Duration {
        if self.network.is_slow() {
            SLOW_ESTIMATE
        } else {
            FAST_ESTIMATE
        }
    }
}

/// Simulated progress after `elapsed`: linear up to 80% of the estimate,
/// never past 95%.
fn simulated_progress(elapsed: Duration, estimate: Duration) -> f64 {
    (elapsed.as_secs_f64() / estimate.as_secs_f64() * 0.8).min(0.95)
}

/// Stateful loader for one unit and one consumer.
pub struct UnitLoader<T> {
    label: String,
    fetcher: Arc<dyn UnitFetcher<T>>,
    options: LoaderOptions,
    state: watch::Sender<LoadingState<T>>,
    root: CancellationToken,
    serial: Mutex<()>,
    metrics: Option<Arc<LoadingMetrics>>,
}

impl<T> std::fmt::Debug for UnitLoader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitLoader")
            .field("label", &self.label)
            .field("options", &self.options)
            .field("disposed", &self.root.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<T> UnitLoader<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(label: impl Into<String>, fetcher: Arc<dyn UnitFetcher<T>>, options: LoaderOptions) -> Self {
        let (state, _) = watch::channel(LoadingState {
            network: options.network,
            ..LoadingState::default()
        });
        Self {
            label: label.into(),
            fetcher,
            options,
            state,
            root: CancellationToken::new(),
            serial: Mutex::new(()),
            metrics: None,
        }
    }

    /// Report successes and terminal failures into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<LoadingMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Current state.
    pub fn state(&self) -> LoadingState<T> {
        self.state.borrow().clone()
    }

    /// Follow state changes.
    pub fn subscribe(&self) -> watch::Receiver<LoadingState<T>> {
        self.state.subscribe()
    }

    /// Load in the foreground.
    ///
    /// Returns the fresh value, or the last good value when retries are
    /// exhausted and stale-while-revalidate applies.
    pub async fn load(&self) -> Result<T, LoadError> {
        self.execute(false).await
    }

    /// Reset the retry count and load again.
    pub async fn retry(&self) -> Result<T, LoadError> {
        self.update(|s| s.retry_count = 0);
        self.load().await
    }

    /// Refresh while keeping the current data on screen.
    pub async fn background_refresh(&self) -> Result<T, LoadError> {
        self.execute(true).await
    }

    /// Cancel everything and freeze the state.
    pub fn dispose(&self) {
        if !self.root.is_cancelled() {
            debug!(unit = %self.label, "Disposing loader");
            self.root.cancel();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Apply `f` unless disposed.
    fn update(&self, f: impl FnOnce(&mut LoadingState<T>)) {
        if self.root.is_cancelled() {
            return;
        }
        self.state.send_modify(f);
    }

    async fn execute(&self, background: bool) -> Result<T, LoadError> {
        if self.root.is_cancelled() {
            return Err(LoadError::UnmountedDuringOperation);
        }
        let _serial = tokio::select! {
            _ = self.root.cancelled() => return Err(LoadError::UnmountedDuringOperation),
            guard = self.serial.lock() => guard,
        };

        let network = self.options.network;
        let tracking = self.options.progress_tracking && !background;
        let estimate = self.options.progress_estimate();
        let started = Instant::now();

        self.update(|s| {
            s.status = if background {
                LoadStatus::Stale
            } else {
                LoadStatus::Loading
            };
            s.is_background = background;
            s.network = network;
            if tracking {
                s.progress = Some(0.0);
            }
        });

        let attempts = self.run_attempts();
        tokio::pin!(attempts);
        let mut ticker = tokio::time::interval_at(started + PROGRESS_INTERVAL, PROGRESS_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                biased;
                result = &mut attempts => break result,
                _ = ticker.tick(), if tracking => {
                    let progress = simulated_progress(started.elapsed(), estimate);
                    if !self.root.is_cancelled() {
                        self.state.send_if_modified(|s| {
                            let loading = s.status == LoadStatus::Loading;
                            if loading {
                                s.progress = Some(progress);
                            }
                            loading
                        });
                    }
                }
            }
        };

        match result {
            Ok(value) => {
                if let Some(metrics) = &self.metrics {
                    metrics.add_load_time(started.elapsed());
                    metrics.record_loaded();
                }
                self.update(|s| {
                    s.status = LoadStatus::Success;
                    s.progress = Some(1.0);
                    s.retry_count = 0;
                    s.error = None;
                    s.is_background = false;
                    s.data = Some(value.clone());
                    s.last_valid_data = Some(value.clone());
                });
                debug!(unit = %self.label, background, "Load succeeded");
                Ok(value)
            }
            Err(e) if e.is_unmounted() || self.root.is_cancelled() => {
                Err(LoadError::UnmountedDuringOperation)
            }
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure();
                }
                let message = e.to_string();
                let attempts = match &e {
                    LoadError::ExhaustedRetries { attempts, .. } => *attempts,
                    _ => 1,
                };

                let stale = if self.options.stale_while_revalidate {
                    self.state.borrow().last_valid_data.clone()
                } else {
                    None
                };

                match stale {
                    Some(last) => {
                        warn!(unit = %self.label, error = %message, "Load failed, serving stale data");
                        self.update(|s| {
                            s.status = LoadStatus::Stale;
                            s.error = Some(message);
                            s.progress = Some(0.0);
                            s.is_background = false;
                            s.data = Some(last.clone());
                        });
                        Ok(last)
                    }
                    None => {
                        warn!(unit = %self.label, error = %message, attempts, "Load failed");
                        self.update(|s| {
                            s.status = LoadStatus::Error;
                            s.error = Some(message);
                            s.progress = Some(0.0);
                            s.retry_count = attempts;
                            s.is_background = false;
                        });
                        Err(e)
                    }
                }
            }
        }
    }

    /// Attempts in sequence until one succeeds or retries run out.
    async fn run_attempts(&self) -> Result<T, LoadError> {
        let timeout = self.options.attempt_timeout();
        let backoff = Backoff::new(self.options.base_delay, self.options.network.is_slow());
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match self.attempt(timeout).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_unmounted() => return Err(e),
                Err(e) => e,
            };

            if attempt > self.options.max_retries {
                return Err(LoadError::ExhaustedRetries {
                    attempts: attempt,
                    last: error.to_string(),
                });
            }

            let delay = backoff.delay(attempt);
            debug!(
                unit = %self.label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Attempt failed, retrying"
            );
            self.update(|s| {
                s.status = LoadStatus::Retrying;
                s.retry_count = attempt;
                s.error = Some(error.to_string());
            });

            tokio::select! {
                _ = self.root.cancelled() => return Err(LoadError::UnmountedDuringOperation),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One attempt under its own abort token.
    async fn attempt(&self, timeout: Duration) -> Result<T, LoadError> {
        let abort = self.root.child_token();
        // Aborts the attempt however this function exits.
        let _abort_on_exit = abort.clone().drop_guard();
        let fetch = self.fetcher.fetch(abort);

        tokio::select! {
            _ = self.root.cancelled() => Err(LoadError::UnmountedDuringOperation),
            result = tokio::time::timeout(timeout, fetch) => match result {
                Ok(result) => result,
                Err(_) => Err(LoadError::ResolutionTimeout {
                    unit: self.label.clone(),
                    timeout,
                }),
            },
        }
    }
}

impl<T> Drop for UnitLoader<T> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
