//! adaptload - Device-aware progressive content loading
//!
//! This library decides what to load, in what order and under which
//! timeout/retry budget, based on a sampled picture of the device and its
//! network. It is split into leaf-first layers:
//!
//! ```text
//! CapabilityProvider ──► CapabilitySampler ──► DeviceCapabilities (+ DeviceTier)
//!                                                   │
//!                                                   ▼
//!                              strategy::generate ──► LoadingStrategy
//!                                                   │
//!                                                   ▼
//!                                   plan::build_plan ──► ContentLoadingPlan
//!                                                   │
//!                                                   ▼
//!                                           LoadCoordinator
//!                                            │           │
//!                                            ▼           ▼
//!                                       UnitLoader   AdaptiveImage
//! ```
//!
//! Consumers only ever ask two questions: "should this unit load now?" and
//! "load (or preload) this unit". Everything else is internal policy.

pub mod capability;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod image;
pub mod loader;
pub mod logging;
pub mod plan;
pub mod strategy;
pub mod unit;

pub use capability::{
    CapabilityProvider, CapabilitySampler, DeviceCapabilities, DeviceTier, MemoryPressure,
    NetworkSpeed,
};
pub use coordinator::{LoadCoordinator, LoadPriority, MetricsSnapshot};
pub use error::LoadError;
pub use plan::{build_plan, should_load, ContentLoadingPlan, Partition};
pub use strategy::{generate, LoadingStrategy, StrategyOverrides};
pub use unit::{ContentUnit, UnitId, UnitPayload, UnitRegistry};
