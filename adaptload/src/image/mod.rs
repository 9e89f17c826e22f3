//! Adaptive images.
//!
//! Images follow the same strategy as every other unit: the ladder of
//! widths, the quality and the per-request timeout all come from the
//! coordinator. Below-the-fold images additionally wait for the viewport.

mod pipeline;
mod probe;
mod variants;
mod viewport;

pub use pipeline::{AdaptiveImage, ImageOptions, ImagePreloader, ImageState, IMAGE_ATTEMPTS, IMAGE_RETRY_BASE};
pub use probe::{HttpImageProbe, ImageProbe};
pub use variants::{build_variants, optimized_url, responsive_sizes, ImageFormat, ImageVariant, VariantSet};
pub use viewport::{
    effective_root_margin, ImmediateViewportObserver, SharedViewportObserver, ViewportObserver,
    ViewportOptions, ViewportSubscription, CONSTRAINED_ROOT_MARGIN_PX, DEFAULT_ROOT_MARGIN_PX,
    DEFAULT_THRESHOLD,
};
