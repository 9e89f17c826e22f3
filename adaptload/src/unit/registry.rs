//! Unit source registry.
//!
//! Maps every [`ContentUnit`] to the source that resolves it. The registry
//! is built from a function over the closed set, so it is total by
//! construction: there is no "registered unit without a source" state.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use adaptload::unit::{ContentUnit, StaticUnitSource, UnitRegistry, UnitSource};
//!
//! let pages: Arc<dyn UnitSource> = Arc::new(StaticUnitSource::new());
//! let registry = UnitRegistry::new(|unit| match unit {
//!     ContentUnit::Slideshow => Arc::new(StaticUnitSource::new()) as Arc<dyn UnitSource>,
//!     _ => pages.clone(),
//! });
//! assert!(!registry.has_dynamic_source());
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::{ContentUnit, UnitId, UnitPayload};
use crate::error::LoadError;

/// Boxed future returned by unit sources.
pub type UnitFuture<'a> = Pin<Box<dyn Future<Output = Result<UnitPayload, LoadError>> + Send + 'a>>;

/// Something that can resolve a unit into its payload.
///
/// Uses a boxed future so sources can be stored as trait objects.
pub trait UnitSource: Send + Sync {
    /// Resolve the unit. Timeouts are applied by the caller.
    fn resolve<'a>(&'a self, id: &'a UnitId) -> UnitFuture<'a>;
}

/// Total mapping from unit to source, plus an optional dynamic fallback.
pub struct UnitRegistry {
    sources: [Arc<dyn UnitSource>; ContentUnit::COUNT],
    dynamic: Option<Arc<dyn UnitSource>>,
}

impl std::fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitRegistry")
            .field("units", &ContentUnit::COUNT)
            .field("dynamic", &self.dynamic.is_some())
            .finish()
    }
}

impl UnitRegistry {
    /// Build a registry by asking `source_for` about every unit.
    pub fn new(mut source_for: impl FnMut(ContentUnit) -> Arc<dyn UnitSource>) -> Self {
        Self {
            sources: std::array::from_fn(|i| source_for(ContentUnit::ALL[i])),
            dynamic: None,
        }
    }

    /// Serve every unit from the same source.
    pub fn uniform(source: Arc<dyn UnitSource>) -> Self {
        Self::new(|_| source.clone())
    }

    /// Serve dynamic ids from `source`.
    pub fn with_dynamic(mut self, source: Arc<dyn UnitSource>) -> Self {
        self.dynamic = Some(source);
        self
    }

    pub fn has_dynamic_source(&self) -> bool {
        self.dynamic.is_some()
    }

    /// Source responsible for `id`.
    pub fn source_for(&self, id: &UnitId) -> Result<&Arc<dyn UnitSource>, LoadError> {
        match id {
            UnitId::Registered(unit) => Ok(&self.sources[unit.index()]),
            UnitId::Dynamic(name) => self
                .dynamic
                .as_ref()
                .ok_or_else(|| LoadError::UnregisteredUnit(name.to_string())),
        }
    }

    /// Resolve `id` through its source.
    pub async fn resolve(&self, id: &UnitId) -> Result<UnitPayload, LoadError> {
        let source = self.source_for(id)?;
        source.resolve(id).await
    }
}
