//! Adaptive image loading.
//!
//! ```text
//!   Placeholder ──(in view + idle, or priority)──► Loading ──► Loaded
//!                                                     │  ▲
//!                                                     │  └── retry (100ms, 200ms)
//!                                                     ▼
//!                                         Loaded { fallback } | Unavailable
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::probe::ImageProbe;
use super::variants::{build_variants, responsive_sizes, VariantSet};
use super::viewport::{effective_root_margin, ViewportObserver, ViewportOptions};
use crate::coordinator::{LoadCoordinator, LoadPriority, PerformanceEntry};
use crate::error::LoadError;

/// Probes per image before giving up.
pub const IMAGE_ATTEMPTS: u32 = 3;

/// Delay before the first image retry; doubles each time.
pub const IMAGE_RETRY_BASE: Duration = Duration::from_millis(100);

/// What to render for an image right now.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ImageState {
    #[default]
    Placeholder,
    Loading,
    Loaded {
        src: String,
        srcset: String,
        sizes: String,
        /// The configured fallback source is showing.
        fallback: bool,
    },
    Unavailable {
        reason: String,
    },
}

impl ImageState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ImageState::Loaded { .. })
    }
}

/// Per-image settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageOptions {
    pub src: String,
    pub width_ladder: Option<Vec<u32>>,
    pub quality: Option<f64>,
    /// Load immediately instead of waiting for the viewport.
    pub priority: bool,
    pub fallback_src: Option<String>,
    pub viewport: ViewportOptions,
    /// Overrides the tier's `sizes` attribute.
    pub sizes: Option<String>,
}

impl ImageOptions {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            width_ladder: None,
            quality: None,
            priority: false,
            fallback_src: None,
            viewport: ViewportOptions::default(),
            sizes: None,
        }
    }

    pub fn with_width_ladder(mut self, widths: impl Into<Vec<u32>>) -> Self {
        self.width_ladder = Some(widths.into());
        self
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn priority(mut self) -> Self {
        self.priority = true;
        self
    }

    pub fn with_fallback(mut self, src: impl Into<String>) -> Self {
        self.fallback_src = Some(src.into());
        self
    }

    pub fn with_root_margin(mut self, px: u32) -> Self {
        self.viewport.root_margin_px = px;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.viewport.threshold = threshold;
        self
    }

    pub fn with_once(mut self, once: bool) -> Self {
        self.viewport.once = once;
        self
    }

    pub fn with_sizes(mut self, sizes: impl Into<String>) -> Self {
        self.sizes = Some(sizes.into());
        self
    }
}

/// One image bound to a coordinator's current strategy.
pub struct AdaptiveImage {
    coordinator: Arc<LoadCoordinator>,
    probe: Arc<dyn ImageProbe>,
    observer: Arc<dyn ViewportObserver>,
    options: ImageOptions,
    state: watch::Sender<ImageState>,
}

impl AdaptiveImage {
    pub fn new(
        coordinator: Arc<LoadCoordinator>,
        probe: Arc<dyn ImageProbe>,
        observer: Arc<dyn ViewportObserver>,
        options: ImageOptions,
    ) -> Self {
        let (state, _) = watch::channel(ImageState::Placeholder);
        Self {
            coordinator,
            probe,
            observer,
            options,
            state,
        }
    }

    pub fn options(&self) -> &ImageOptions {
        &self.options
    }

    pub fn state(&self) -> ImageState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ImageState> {
        self.state.subscribe()
    }

    /// Variants under the coordinator's current strategy.
    pub fn variants(&self) -> VariantSet {
        let caps = self.coordinator.capabilities();
        let strategy = self.coordinator.strategy();
        build_variants(
            &self.options.src,
            &caps,
            &strategy,
            self.options.quality,
            self.options.width_ladder.as_deref(),
        )
    }

    /// Run the image to a settled state.
    ///
    /// Returns the state reached; if `token` is cancelled first that is
    /// whatever was showing at the time.
    pub async fn load(&self, token: CancellationToken) -> ImageState {
        if !self.options.priority {
            let caps = self.coordinator.capabilities();
            let options = ViewportOptions {
                root_margin_px: effective_root_margin(self.options.viewport.root_margin_px, &caps),
                ..self.options.viewport
            };
            let mut visibility = self.observer.observe(&self.options.src, options);

            tokio::select! {
                _ = token.cancelled() => return self.state(),
                _ = visibility.intersecting() => {}
            }
            let idle = self.coordinator.idle_scheduler();
            tokio::select! {
                _ = token.cancelled() => return self.state(),
                _ = idle.idle() => {}
            }
        }

        self.state.send_replace(ImageState::Loading);

        let caps = self.coordinator.capabilities();
        let strategy = self.coordinator.strategy();
        let variants = build_variants(
            &self.options.src,
            &caps,
            &strategy,
            self.options.quality,
            self.options.width_ladder.as_deref(),
        );
        let target = variants
            .smallest()
            .map(|v| v.url.clone())
            .unwrap_or_else(|| self.options.src.clone());
        let sizes = self
            .options
            .sizes
            .clone()
            .unwrap_or_else(|| responsive_sizes(caps.tier).to_string());

        let mut last_error = None;
        for attempt in 0..IMAGE_ATTEMPTS {
            if attempt > 0 {
                let delay = IMAGE_RETRY_BASE * 2u32.pow(attempt - 1);
                tokio::select! {
                    _ = token.cancelled() => return self.state(),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let result = tokio::select! {
                _ = token.cancelled() => return self.state(),
                result = probe_with_timeout(&*self.probe, &self.coordinator, &target, strategy.timeout) => result,
            };

            match result {
                Ok(bytes) => {
                    debug!(src = %self.options.src, attempt, bytes, "Image loaded");
                    let loaded = ImageState::Loaded {
                        src: target,
                        srcset: variants.srcset(),
                        sizes,
                        fallback: false,
                    };
                    self.state.send_replace(loaded.clone());
                    return loaded;
                }
                Err(e) => {
                    debug!(src = %self.options.src, attempt, error = %e, "Image attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
        let settled = match &self.options.fallback_src {
            Some(fallback) => {
                warn!(src = %self.options.src, fallback = %fallback, reason = %reason, "Image failed, using fallback");
                ImageState::Loaded {
                    src: fallback.clone(),
                    srcset: String::new(),
                    sizes,
                    fallback: true,
                }
            }
            None => {
                warn!(src = %self.options.src, reason = %reason, "Image unavailable");
                ImageState::Unavailable { reason }
            }
        };
        self.state.send_replace(settled.clone());
        settled
    }
}

/// Probe `url` within `timeout` and record the timing.
async fn probe_with_timeout(
    probe: &dyn ImageProbe,
    coordinator: &LoadCoordinator,
    url: &str,
    timeout: Duration,
) -> Result<u64, LoadError> {
    let started_at_ms = coordinator.session_millis();
    let started = tokio::time::Instant::now();

    let result = match tokio::time::timeout(timeout, probe.probe(url)).await {
        Ok(result) => result,
        Err(_) => Err(LoadError::ResolutionTimeout {
            unit: url.to_string(),
            timeout,
        }),
    };

    coordinator.report_performance(PerformanceEntry::new(url, started.elapsed(), started_at_ms));
    result
}

// =============================================================================
// Preloading
// =============================================================================

/// Warms images ahead of need.
pub struct ImagePreloader {
    coordinator: Arc<LoadCoordinator>,
    probe: Arc<dyn ImageProbe>,
}

impl ImagePreloader {
    pub fn new(coordinator: Arc<LoadCoordinator>, probe: Arc<dyn ImageProbe>) -> Self {
        Self { coordinator, probe }
    }

    /// Fetch the smallest variant of `src`.
    ///
    /// Returns `Ok(false)` without fetching when preloading is disabled.
    /// Anything below `High` waits for idle first.
    pub async fn preload(&self, src: &str, priority: LoadPriority) -> Result<bool, LoadError> {
        let strategy = self.coordinator.strategy();
        if !strategy.enable_preload {
            debug!(src, "Image preload disabled");
            return Ok(false);
        }

        if priority != LoadPriority::High {
            self.coordinator.idle_scheduler().idle().await;
        }

        let caps = self.coordinator.capabilities();
        let variants = build_variants(src, &caps, &strategy, None, None);
        let target = variants
            .smallest()
            .map(|v| v.url.clone())
            .unwrap_or_else(|| src.to_string());

        probe_with_timeout(&*self.probe, &self.coordinator, &target, strategy.timeout).await?;
        debug!(src, priority = %priority, "Image preloaded");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{AdaptiveFlags, DeviceCapabilities, DeviceTier, MemoryPressure, NetworkSpeed};
    use crate::image::viewport::{ImmediateViewportObserver, SharedViewportObserver};
    use crate::unit::{StaticUnitSource, UnitRegistry};
    use futures::future::BoxFuture;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Plays back scripted outcomes; succeeds once the script runs out.
    #[derive(Default)]
    struct ScriptedProbe {
        outcomes: Mutex<VecDeque<Result<u64, LoadError>>>,
        latency: Duration,
        urls: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn failing(times: usize) -> Self {
            let outcomes = (0..times).map(|_| Err(LoadError::failure("img", "HTTP 502"))).collect();
            Self {
                outcomes: Mutex::new(outcomes),
                ..Default::default()
            }
        }

        fn slow(latency: Duration) -> Self {
            Self {
                latency,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ImageProbe for ScriptedProbe {
        fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<u64, LoadError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.urls.lock().push(url.to_string());
                tokio::time::sleep(self.latency).await;
                self.outcomes.lock().pop_front().unwrap_or(Ok(2048))
            })
        }
    }

    fn coordinator(tier: DeviceTier) -> Arc<LoadCoordinator> {
        let caps = DeviceCapabilities {
            tier,
            network: NetworkSpeed::FourG,
            flags: AdaptiveFlags::derive(tier, NetworkSpeed::FourG, MemoryPressure::Low),
            ..DeviceCapabilities::server_default()
        };
        LoadCoordinator::builder(UnitRegistry::uniform(Arc::new(StaticUnitSource::new())))
            .capabilities(caps)
            .build()
    }

    fn image(coordinator: Arc<LoadCoordinator>, probe: Arc<ScriptedProbe>, options: ImageOptions) -> AdaptiveImage {
        AdaptiveImage::new(coordinator, probe, Arc::new(ImmediateViewportObserver), options)
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_image_loads_smallest_variant() {
        let coordinator = coordinator(DeviceTier::HighEnd);
        let probe = Arc::new(ScriptedProbe::default());
        let img = image(coordinator.clone(), probe.clone(), ImageOptions::new("/img/hero.jpg").priority());

        let state = img.load(CancellationToken::new()).await;

        let (src, srcset, sizes, fallback) = match state {
            ImageState::Loaded { src, srcset, sizes, fallback } => (src, srcset, sizes, fallback),
            other => panic!("expected loaded, got {:?}", other),
        };
        assert!(!fallback);
        assert!(src.contains("w=320"));
        assert_eq!(probe.urls.lock().as_slice(), &[src.clone()]);
        assert!(srcset.contains("w=1920"));
        assert_eq!(sizes, responsive_sizes(DeviceTier::HighEnd));
        assert_eq!(coordinator.metrics_ledger().recent_entries().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_twice_with_doubling_delay() {
        let coordinator = coordinator(DeviceTier::MidRange);
        let probe = Arc::new(ScriptedProbe::failing(2));
        let img = image(coordinator, probe.clone(), ImageOptions::new("/a.jpg").priority());

        let start = tokio::time::Instant::now();
        let state = img.load(CancellationToken::new()).await;

        assert!(state.is_loaded());
        assert_eq!(probe.calls(), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_uses_fallback() {
        let coordinator = coordinator(DeviceTier::MidRange);
        let probe = Arc::new(ScriptedProbe::failing(5));
        let img = image(
            coordinator,
            probe.clone(),
            ImageOptions::new("/a.jpg").priority().with_fallback("/placeholder.svg"),
        );

        let state = img.load(CancellationToken::new()).await;
        assert_eq!(probe.calls(), 3);
        match state {
            ImageState::Loaded { src, srcset, fallback, .. } => {
                assert!(fallback);
                assert_eq!(src, "/placeholder.svg");
                assert!(srcset.is_empty());
            }
            other => panic!("expected fallback, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_without_fallback_is_unavailable() {
        let coordinator = coordinator(DeviceTier::MidRange);
        let probe = Arc::new(ScriptedProbe::failing(5));
        let img = image(coordinator, probe, ImageOptions::new("/a.jpg").priority());

        let state = img.load(CancellationToken::new()).await;
        match &state {
            ImageState::Unavailable { reason } => assert!(reason.contains("HTTP 502")),
            other => panic!("expected unavailable, got {:?}", other),
        }
        assert_eq!(img.state(), state);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_is_bounded_by_strategy_timeout() {
        let coordinator = coordinator(DeviceTier::HighEnd);
        let timeout = coordinator.strategy().timeout;
        let probe = Arc::new(ScriptedProbe::slow(Duration::from_secs(120)));
        let img = image(coordinator.clone(), probe.clone(), ImageOptions::new("/a.jpg").priority());

        let start = tokio::time::Instant::now();
        let state = img.load(CancellationToken::new()).await;

        assert!(matches!(state, ImageState::Unavailable { .. }));
        assert_eq!(start.elapsed(), timeout * 3 + Duration::from_millis(300));
        assert_eq!(coordinator.metrics().network_utilization_ms, timeout.as_millis() as u64 * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_image_waits_for_viewport() {
        let coordinator = coordinator(DeviceTier::HighEnd);
        let probe = Arc::new(ScriptedProbe::default());
        let observer = SharedViewportObserver::new();
        let img = Arc::new(AdaptiveImage::new(
            coordinator,
            probe.clone(),
            Arc::new(observer.clone()),
            ImageOptions::new("/gallery/1.jpg"),
        ));

        let task = {
            let img = Arc::clone(&img);
            tokio::spawn(async move { img.load(CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(img.state(), ImageState::Placeholder);
        assert_eq!(probe.calls(), 0);
        assert_eq!(observer.observed(), vec!["/gallery/1.jpg".to_string()]);

        observer.report_intersection("/gallery/1.jpg", 0.5);
        let state = task.await.unwrap();
        assert!(state.is_loaded());
        assert_eq!(probe.calls(), 1);
        assert_eq!(observer.watch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_visible_keeps_placeholder() {
        let coordinator = coordinator(DeviceTier::HighEnd);
        let probe = Arc::new(ScriptedProbe::default());
        let observer = SharedViewportObserver::new();
        let img = AdaptiveImage::new(
            coordinator,
            probe.clone(),
            Arc::new(observer.clone()),
            ImageOptions::new("/below-fold.jpg"),
        );

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        assert_eq!(img.load(token).await, ImageState::Placeholder);
        assert_eq!(probe.calls(), 0);
        assert_eq!(observer.watch_count(), 0);
    }

    #[tokio::test]
    async fn test_preload_disabled_on_low_end() {
        let coordinator = coordinator(DeviceTier::LowEnd);
        let probe = Arc::new(ScriptedProbe::default());
        let preloader = ImagePreloader::new(coordinator, probe.clone());

        assert_eq!(preloader.preload("/a.jpg", LoadPriority::High).await, Ok(false));
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_preload_fetches_smallest_variant() {
        let coordinator = coordinator(DeviceTier::Premium);
        let probe = Arc::new(ScriptedProbe::default());
        let preloader = ImagePreloader::new(coordinator, probe.clone());

        assert_eq!(preloader.preload("/a.jpg", LoadPriority::Low).await, Ok(true));
        assert_eq!(probe.calls(), 1);
        assert!(probe.urls.lock()[0].contains("w=320"));
    }
}
