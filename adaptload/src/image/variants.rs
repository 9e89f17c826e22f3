//! Responsive image variants.
//!
//! Expands one source image into a width × format grid sized by the active
//! strategy, and renders the `srcset` / `sizes` attributes for it.

use std::fmt;

use reqwest::Url;
use serde::Serialize;

use crate::capability::{DeviceCapabilities, DeviceTier};
use crate::strategy::LoadingStrategy;

/// Base used only to let `Url` encode the optimizer query string.
const ENCODING_BASE: &str = "http://localhost/_next/image";

/// Output format of an optimized variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Webp,
    Jpeg,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Webp => "webp",
            ImageFormat::Jpeg => "jpeg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Webp => "image/webp",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One encoded rendition of a source image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageVariant {
    pub url: String,
    pub width: u32,
    pub format: ImageFormat,
    pub quality: f64,
}

/// Variants of one image, sorted by width ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct VariantSet {
    variants: Vec<ImageVariant>,
}

impl VariantSet {
    pub fn iter(&self) -> impl Iterator<Item = &ImageVariant> {
        self.variants.iter()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Narrowest variant, in the preferred format when widths tie.
    pub fn smallest(&self) -> Option<&ImageVariant> {
        self.variants.first()
    }

    pub fn largest(&self) -> Option<&ImageVariant> {
        self.variants.last()
    }

    /// `"<url> <w>w"` for every variant, comma separated.
    pub fn srcset(&self) -> String {
        render_srcset(self.variants.iter())
    }

    /// Like [`srcset`](Self::srcset), restricted to one format.
    pub fn srcset_for(&self, format: ImageFormat) -> String {
        render_srcset(self.variants.iter().filter(|v| v.format == format))
    }
}

fn render_srcset<'a>(variants: impl Iterator<Item = &'a ImageVariant>) -> String {
    variants
        .map(|v| format!("{} {}w", v.url, v.width))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the variant grid for `src`.
///
/// Quality is `quality_override` or the strategy's. A caller ladder is
/// capped at the strategy's largest width so a tight strategy cannot be
/// bypassed; without one the strategy ladder is used as is.
pub fn build_variants(
    src: &str,
    caps: &DeviceCapabilities,
    strategy: &LoadingStrategy,
    quality_override: Option<f64>,
    width_ladder: Option<&[u32]>,
) -> VariantSet {
    let quality = quality_override
        .filter(|q| q.is_finite() && *q > 0.0)
        .map(|q| q.min(1.0))
        .unwrap_or(strategy.image_quality);

    let formats: &[ImageFormat] = if caps.features.webp {
        &[ImageFormat::Webp, ImageFormat::Jpeg]
    } else {
        &[ImageFormat::Jpeg]
    };

    let widths: Vec<u32> = match (width_ladder, strategy.max_image_size()) {
        (Some(ladder), Some(cap)) => {
            let mut capped: Vec<u32> = ladder.iter().copied().filter(|w| *w > 0 && *w <= cap).collect();
            if capped.is_empty() {
                capped.push(cap);
            }
            capped
        }
        (Some(ladder), None) => ladder.to_vec(),
        (None, _) => strategy.image_sizes.clone(),
    };

    let mut variants = Vec::with_capacity(formats.len() * widths.len());
    for format in formats {
        for width in &widths {
            variants.push(ImageVariant {
                url: optimized_url(src, *width, quality, *format),
                width: *width,
                format: *format,
                quality,
            });
        }
    }
    // Stable: ties keep format preference order.
    variants.sort_by_key(|v| v.width);

    VariantSet { variants }
}

/// Optimizer URL for a root-relative source; absolute URLs pass through.
pub fn optimized_url(src: &str, width: u32, quality: f64, format: ImageFormat) -> String {
    if !src.starts_with('/') {
        return src.to_string();
    }

    let q = (quality * 100.0).round() as u32;
    let params = [
        ("url", src.to_string()),
        ("w", width.to_string()),
        ("q", q.to_string()),
        ("f", format.as_str().to_string()),
    ];
    match Url::parse_with_params(ENCODING_BASE, &params) {
        Ok(url) => format!("{}?{}", url.path(), url.query().unwrap_or_default()),
        Err(_) => src.to_string(),
    }
}

/// `sizes` attribute for a tier.
pub fn responsive_sizes(tier: DeviceTier) -> &'static str {
    match tier {
        DeviceTier::LowEnd => "(max-width: 640px) 100vw, 50vw",
        DeviceTier::MidRange => "(max-width: 640px) 100vw, (max-width: 1024px) 50vw, 33vw",
        DeviceTier::HighEnd | DeviceTier::Premium => {
            "(max-width: 640px) 100vw, (max-width: 1024px) 50vw, (max-width: 1920px) 33vw, 25vw"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::FeatureSupport;

    fn caps(webp: bool) -> DeviceCapabilities {
        DeviceCapabilities {
            features: FeatureSupport {
                webp,
                service_worker: false,
            },
            ..DeviceCapabilities::server_default()
        }
    }

    #[test]
    fn test_optimized_url_encodes_source() {
        let url = optimized_url("/images/hero banner.jpg", 640, 0.75, ImageFormat::Webp);
        assert!(url.starts_with("/_next/image?url=%2Fimages%2Fhero"));
        assert!(url.ends_with("&w=640&q=75&f=webp"));
    }

    #[test]
    fn test_absolute_urls_pass_through() {
        let src = "https://cdn.example.com/hero.jpg";
        assert_eq!(optimized_url(src, 640, 0.8, ImageFormat::Jpeg), src);
    }

    #[test]
    fn test_webp_doubles_variants() {
        let strategy = LoadingStrategy::baseline();
        let with_webp = build_variants("/a.jpg", &caps(true), &strategy, None, None);
        let without = build_variants("/a.jpg", &caps(false), &strategy, None, None);

        assert_eq!(with_webp.len(), 8);
        assert_eq!(without.len(), 4);
        assert!(without.iter().all(|v| v.format == ImageFormat::Jpeg));
    }

    #[test]
    fn test_variants_sorted_by_width() {
        let strategy = LoadingStrategy::baseline();
        let set = build_variants("/a.jpg", &caps(true), &strategy, None, None);
        let widths: Vec<u32> = set.iter().map(|v| v.width).collect();
        assert_eq!(widths, vec![320, 320, 640, 640, 1024, 1024, 1920, 1920]);
        assert_eq!(set.smallest().map(|v| v.format), Some(ImageFormat::Webp));
        assert_eq!(set.largest().map(|v| v.width), Some(1920));
    }

    #[test]
    fn test_quality_override() {
        let strategy = LoadingStrategy::baseline();
        let set = build_variants("/a.jpg", &caps(false), &strategy, Some(0.4), None);
        assert!(set.iter().all(|v| v.quality == 0.4));
        assert!(set.srcset().contains("q=40"));

        let default = build_variants("/a.jpg", &caps(false), &strategy, None, None);
        assert!(default.iter().all(|v| v.quality == strategy.image_quality));
    }

    #[test]
    fn test_caller_ladder_capped_by_strategy() {
        let strategy = LoadingStrategy {
            image_sizes: vec![320, 640],
            ..LoadingStrategy::baseline()
        };
        let set = build_variants("/a.jpg", &caps(false), &strategy, None, Some(&[480, 960, 1440]));
        let widths: Vec<u32> = set.iter().map(|v| v.width).collect();
        assert_eq!(widths, vec![480]);

        let set = build_variants("/a.jpg", &caps(false), &strategy, None, Some(&[1440]));
        assert_eq!(set.iter().map(|v| v.width).collect::<Vec<_>>(), vec![640]);
    }

    #[test]
    fn test_srcset_format() {
        let strategy = LoadingStrategy {
            image_sizes: vec![320, 640],
            ..LoadingStrategy::baseline()
        };
        let set = build_variants("https://cdn.test/a.jpg", &caps(false), &strategy, None, None);
        assert_eq!(set.srcset(), "https://cdn.test/a.jpg 320w, https://cdn.test/a.jpg 640w");
        assert_eq!(set.srcset_for(ImageFormat::Webp), "");
    }

    #[test]
    fn test_responsive_sizes() {
        assert_eq!(responsive_sizes(DeviceTier::LowEnd), "(max-width: 640px) 100vw, 50vw");
        assert!(responsive_sizes(DeviceTier::MidRange).ends_with("33vw"));
        assert_eq!(
            responsive_sizes(DeviceTier::Premium),
            responsive_sizes(DeviceTier::HighEnd)
        );
    }
}
