//! Viewport visibility.
//!
//! Images below the fold wait until they come near the viewport. The host
//! owns layout, so it reports intersections into a [`SharedViewportObserver`]
//! and every waiting image holds a [`ViewportSubscription`] on it. Hosts with
//! no intersection support use [`ImmediateViewportObserver`], which treats
//! everything as visible.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use crate::capability::{DeviceCapabilities, NetworkSpeed};

/// Default distance outside the viewport at which loading starts.
pub const DEFAULT_ROOT_MARGIN_PX: u32 = 50;

/// Default visible fraction that counts as intersecting.
pub const DEFAULT_THRESHOLD: f64 = 0.1;

/// Root margin ceiling on constrained connections.
pub const CONSTRAINED_ROOT_MARGIN_PX: u32 = 100;

/// How an image wants to be observed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportOptions {
    pub root_margin_px: u32,
    pub threshold: f64,
    /// Stop observing after the first intersection.
    pub once: bool,
}

impl Default for ViewportOptions {
    fn default() -> Self {
        Self {
            root_margin_px: DEFAULT_ROOT_MARGIN_PX,
            threshold: DEFAULT_THRESHOLD,
            once: true,
        }
    }
}

/// Shrink the look-ahead margin under data-saver or 2G-class networks.
pub fn effective_root_margin(configured: u32, caps: &DeviceCapabilities) -> u32 {
    let constrained = caps.save_data || matches!(caps.network, NetworkSpeed::Slow2g | NetworkSpeed::TwoG);
    if constrained {
        configured.min(CONSTRAINED_ROOT_MARGIN_PX)
    } else {
        configured
    }
}

/// Source of visibility for image targets.
pub trait ViewportObserver: Send + Sync {
    /// Start observing `target`.
    fn observe(&self, target: &str, options: ViewportOptions) -> ViewportSubscription;
}

/// Live visibility of one target. Dropping it stops observation.
pub struct ViewportSubscription {
    rx: watch::Receiver<bool>,
    _registration: Option<Registration>,
}

impl ViewportSubscription {
    fn new(rx: watch::Receiver<bool>, registration: Option<Registration>) -> Self {
        Self {
            rx,
            _registration: registration,
        }
    }

    /// Whether the target is intersecting right now.
    pub fn is_intersecting(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the target intersects.
    ///
    /// Returns immediately if it already does. If the observer goes away
    /// first this never completes; race it with a cancellation token.
    pub async fn intersecting(&mut self) {
        if self.rx.wait_for(|visible| *visible).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl fmt::Debug for ViewportSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewportSubscription")
            .field("intersecting", &self.is_intersecting())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Immediate
// =============================================================================

/// Everything is always in view.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateViewportObserver;

impl ViewportObserver for ImmediateViewportObserver {
    fn observe(&self, _target: &str, _options: ViewportOptions) -> ViewportSubscription {
        let (_tx, rx) = watch::channel(true);
        ViewportSubscription::new(rx, None)
    }
}

// =============================================================================
// Shared
// =============================================================================

struct Watch {
    target: String,
    options: ViewportOptions,
    tx: watch::Sender<bool>,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    watches: Mutex<HashMap<u64, Watch>>,
}

/// Unregisters a watch when its subscription is dropped.
struct Registration {
    registry: Weak<Registry>,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.watches.lock().remove(&self.id);
        }
    }
}

/// One observer shared by every image on a page.
///
/// The host calls [`report_intersection`](Self::report_intersection) with
/// the visible ratio of a target whenever it changes.
#[derive(Clone, Default)]
pub struct SharedViewportObserver {
    registry: Arc<Registry>,
}

impl SharedViewportObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a visibility change for `target`.
    ///
    /// A ratio above zero that meets a watch's threshold marks it
    /// intersecting; `once` watches are then dropped from the registry.
    pub fn report_intersection(&self, target: &str, ratio: f64) {
        let mut watches = self.registry.watches.lock();
        let mut finished = Vec::new();

        for (id, watch) in watches.iter().filter(|(_, w)| w.target == target) {
            let visible = ratio > 0.0 && ratio >= watch.options.threshold;
            watch.tx.send_if_modified(|current| {
                let changed = *current != visible;
                *current = visible;
                changed
            });
            if visible && watch.options.once {
                finished.push(*id);
            }
        }

        for id in finished {
            watches.remove(&id);
        }
        trace!(element = target, ratio, "Intersection reported");
    }

    /// Targets still being observed, sorted and deduplicated.
    pub fn observed(&self) -> Vec<String> {
        let mut targets: Vec<String> = self
            .registry
            .watches
            .lock()
            .values()
            .map(|w| w.target.clone())
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }

    /// Number of live watches.
    pub fn watch_count(&self) -> usize {
        self.registry.watches.lock().len()
    }
}

impl ViewportObserver for SharedViewportObserver {
    fn observe(&self, target: &str, options: ViewportOptions) -> ViewportSubscription {
        let (tx, rx) = watch::channel(false);
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.watches.lock().insert(
            id,
            Watch {
                target: target.to_string(),
                options,
                tx,
            },
        );

        ViewportSubscription::new(
            rx,
            Some(Registration {
                registry: Arc::downgrade(&self.registry),
                id,
            }),
        )
    }
}

impl fmt::Debug for SharedViewportObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedViewportObserver")
            .field("watches", &self.watch_count())
            .finish()
    }
}
