//! Loadable units of content.
//!
//! Units are identified by a closed enum, [`ContentUnit`], so an unknown id
//! is a compile error rather than a runtime lookup miss. Truly dynamic ids
//! (user supplied, CMS driven) go through [`UnitId::Dynamic`] and a single
//! optional fallback source in the [`UnitRegistry`].

mod registry;
mod sources;

pub use registry::{UnitFuture, UnitRegistry, UnitSource};
pub use sources::{HttpUnitSource, SimulatedUnitSource, StaticUnitSource};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

/// Every unit the site knows how to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentUnit {
    Header,
    Navigation,
    MainContent,
    Hero,
    Menu,
    MenuInteractive,
    Testimonials,
    Slideshow,
    Animations,
    Modals,
    Footer,
    Cta,
    Pricing,
    Features,
    Faq,
    ClientHome,
}

impl ContentUnit {
    /// Number of variants.
    pub const COUNT: usize = 16;

    /// All variants, in declaration order.
    pub const ALL: [ContentUnit; Self::COUNT] = [
        ContentUnit::Header,
        ContentUnit::Navigation,
        ContentUnit::MainContent,
        ContentUnit::Hero,
        ContentUnit::Menu,
        ContentUnit::MenuInteractive,
        ContentUnit::Testimonials,
        ContentUnit::Slideshow,
        ContentUnit::Animations,
        ContentUnit::Modals,
        ContentUnit::Footer,
        ContentUnit::Cta,
        ContentUnit::Pricing,
        ContentUnit::Features,
        ContentUnit::Faq,
        ContentUnit::ClientHome,
    ];

    /// Stable string id.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentUnit::Header => "header",
            ContentUnit::Navigation => "navigation",
            ContentUnit::MainContent => "main-content",
            ContentUnit::Hero => "hero",
            ContentUnit::Menu => "menu",
            ContentUnit::MenuInteractive => "menu-interactive",
            ContentUnit::Testimonials => "testimonials",
            ContentUnit::Slideshow => "slideshow",
            ContentUnit::Animations => "animations",
            ContentUnit::Modals => "modals",
            ContentUnit::Footer => "footer",
            ContentUnit::Cta => "cta",
            ContentUnit::Pricing => "pricing",
            ContentUnit::Features => "features",
            ContentUnit::Faq => "faq",
            ContentUnit::ClientHome => "client-home",
        }
    }

    /// Placeholder height to reserve while the unit loads.
    pub fn placeholder_height_px(&self) -> u32 {
        match self {
            ContentUnit::Header => 80,
            ContentUnit::Navigation => 60,
            ContentUnit::Hero | ContentUnit::Slideshow | ContentUnit::Features => 400,
            ContentUnit::Menu => 600,
            ContentUnit::Testimonials | ContentUnit::Modals => 300,
            ContentUnit::Footer => 200,
            ContentUnit::Cta => 150,
            ContentUnit::Pricing => 500,
            _ => 200,
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for ContentUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        ContentUnit::ALL
            .into_iter()
            .find(|unit| unit.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| format!("unknown content unit '{}'", needle))
    }
}

/// Identifier accepted by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UnitId {
    /// A unit from the closed set.
    Registered(ContentUnit),
    /// Anything else, served by the registry's dynamic source if present.
    Dynamic(Arc<str>),
}

impl UnitId {
    /// Parse an id, preferring the closed set.
    pub fn parse(id: &str) -> Self {
        match id.parse::<ContentUnit>() {
            Ok(unit) => UnitId::Registered(unit),
            Err(_) => UnitId::Dynamic(Arc::from(id.trim())),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            UnitId::Registered(unit) => unit.as_str(),
            UnitId::Dynamic(id) => id,
        }
    }

    /// The closed-set unit, if this is one.
    pub fn registered(&self) -> Option<ContentUnit> {
        match self {
            UnitId::Registered(unit) => Some(*unit),
            UnitId::Dynamic(_) => None,
        }
    }
}

impl From<ContentUnit> for UnitId {
    fn from(unit: ContentUnit) -> Self {
        UnitId::Registered(unit)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved unit of content.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitPayload {
    pub id: UnitId,
    pub body: Bytes,
}

impl UnitPayload {
    pub fn new(id: impl Into<UnitId>, body: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
        }
    }
}
