//! Content-loading plan.
//!
//! Partitions units into the five loading classes. The plan is a map from
//! unit to partition, so a unit can never sit in two partitions at once.
//!
//! Precedence when a unit appears in several strategy lists:
//!
//! ```text
//! disabled > immediate > priority > background > deferred
//! ```
//!
//! Concurrency is not part of eligibility: every preload unit that is not
//! critical is a priority unit, and the coordinator's gate queues them.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::capability::DeviceTier;
use crate::strategy::LoadingStrategy;
use crate::unit::ContentUnit;

/// Loading class of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Immediate,
    Priority,
    Background,
    Deferred,
    Disabled,
}

impl Partition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Immediate => "immediate",
            Partition::Priority => "priority",
            Partition::Background => "background",
            Partition::Deferred => "deferred",
            Partition::Disabled => "disabled",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit to partition map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ContentLoadingPlan {
    partitions: BTreeMap<ContentUnit, Partition>,
}

impl ContentLoadingPlan {
    /// Partition of `unit`, or `None` if the strategy never mentions it.
    pub fn partition(&self, unit: ContentUnit) -> Option<Partition> {
        self.partitions.get(&unit).copied()
    }

    /// Units in `partition`, in unit order.
    pub fn units(&self, partition: Partition) -> Vec<ContentUnit> {
        self.partitions
            .iter()
            .filter(|(_, p)| **p == partition)
            .map(|(unit, _)| *unit)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ContentUnit, Partition)> + '_ {
        self.partitions.iter().map(|(u, p)| (*u, *p))
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Assign `unit` unless it already has a higher-precedence partition.
    fn claim(&mut self, unit: ContentUnit, partition: Partition) {
        self.partitions.entry(unit).or_insert(partition);
    }
}

/// Build the plan for `strategy`.
pub fn build_plan(strategy: &LoadingStrategy) -> ContentLoadingPlan {
    let mut plan = ContentLoadingPlan::default();

    for unit in &strategy.disabled_components {
        plan.claim(*unit, Partition::Disabled);
    }
    for unit in &strategy.critical_components {
        plan.claim(*unit, Partition::Immediate);
    }

    for unit in &strategy.preload_components {
        plan.claim(*unit, Partition::Priority);
    }
    // Background is the full preload set; every member already has a
    // higher-precedence partition by now.
    for unit in &strategy.preload_components {
        plan.claim(*unit, Partition::Background);
    }

    for unit in &strategy.deferred_components {
        plan.claim(*unit, Partition::Deferred);
    }

    plan
}

/// Whether `unit` should load eagerly on a `tier` device.
///
/// Low-end devices load only immediate units; others also load priority
/// units. Disabled and unplanned units never load eagerly.
pub fn should_load(unit: ContentUnit, tier: DeviceTier, plan: &ContentLoadingPlan) -> bool {
    match plan.partition(unit) {
        Some(Partition::Immediate) => true,
        Some(Partition::Priority) => tier != DeviceTier::LowEnd,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use ContentUnit::*;

    fn strategy_with(
        critical: Vec<ContentUnit>,
        preload: Vec<ContentUnit>,
        deferred: Vec<ContentUnit>,
        concurrency: u32,
    ) -> LoadingStrategy {
        LoadingStrategy {
            critical_components: critical,
            preload_components: preload,
            deferred_components: deferred,
            max_concurrent_requests: concurrency,
            ..LoadingStrategy::baseline()
        }
    }

    #[test]
    fn test_every_preload_unit_is_priority() {
        let s = strategy_with(
            vec![Header],
            vec![Menu, Hero, Testimonials, Slideshow],
            vec![],
            2,
        );
        let plan = build_plan(&s);

        assert_eq!(plan.partition(Header), Some(Partition::Immediate));
        for unit in [Menu, Hero, Testimonials, Slideshow] {
            assert_eq!(plan.partition(unit), Some(Partition::Priority));
            assert!(should_load(unit, DeviceTier::Premium, &plan));
        }
        assert!(plan.units(Partition::Background).is_empty());
    }

    #[test]
    fn test_premium_on_3g_keeps_all_preloads_eligible() {
        use crate::capability::{AdaptiveFlags, DeviceCapabilities, MemoryPressure, NetworkSpeed};
        use crate::strategy::{generate, StrategyOverrides};

        let caps = DeviceCapabilities {
            tier: DeviceTier::Premium,
            network: NetworkSpeed::ThreeG,
            flags: AdaptiveFlags::derive(DeviceTier::Premium, NetworkSpeed::ThreeG, MemoryPressure::Low),
            ..DeviceCapabilities::server_default()
        };
        let strategy = generate(&caps, &StrategyOverrides::default());
        assert_eq!(strategy.max_concurrent_requests, 2);
        let plan = build_plan(&strategy);

        for unit in &strategy.preload_components {
            if strategy.critical_components.contains(unit) {
                continue;
            }
            assert_eq!(plan.partition(*unit), Some(Partition::Priority), "{}", unit);
            assert!(should_load(*unit, DeviceTier::Premium, &plan), "{} not eligible", unit);
        }
        assert!(should_load(Animations, DeviceTier::Premium, &plan));
    }

    #[test]
    fn test_critical_beats_preload_and_deferred() {
        let s = strategy_with(vec![Menu], vec![Menu, Hero], vec![Menu, Hero, Modals], 1);
        let plan = build_plan(&s);

        assert_eq!(plan.partition(Menu), Some(Partition::Immediate));
        assert_eq!(plan.partition(Hero), Some(Partition::Priority));
        assert_eq!(plan.partition(Modals), Some(Partition::Deferred));
    }

    #[test]
    fn test_disabled_overrides_everything() {
        let mut s = strategy_with(vec![Header, Hero], vec![Hero], vec![Hero], 4);
        s.disabled_components.insert(Hero);
        let plan = build_plan(&s);

        assert_eq!(plan.partition(Hero), Some(Partition::Disabled));
        assert!(!should_load(Hero, DeviceTier::Premium, &plan));
    }

    #[test]
    fn test_should_load_by_tier() {
        let s = strategy_with(vec![Header], vec![Menu], vec![Modals], 4);
        let plan = build_plan(&s);

        assert!(should_load(Header, DeviceTier::LowEnd, &plan));
        assert!(!should_load(Menu, DeviceTier::LowEnd, &plan));
        assert!(should_load(Menu, DeviceTier::MidRange, &plan));
        assert!(!should_load(Modals, DeviceTier::Premium, &plan));
        assert!(!should_load(Faq, DeviceTier::Premium, &plan));
    }

    #[test]
    fn test_units_listing() {
        let s = strategy_with(vec![Header, Navigation], vec![], vec![Modals], 1);
        let plan = build_plan(&s);
        assert_eq!(plan.units(Partition::Immediate), vec![Header, Navigation]);
        assert_eq!(plan.units(Partition::Deferred), vec![Modals]);
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_serializes_as_map() {
        let s = strategy_with(vec![MainContent], vec![], vec![], 1);
        let json = serde_json::to_value(build_plan(&s)).unwrap();
        assert_eq!(json["main-content"], "immediate");
    }

    // =========================================================================
    // Property-based tests
    // =========================================================================

    fn unit_list() -> impl Strategy<Value = Vec<ContentUnit>> {
        proptest::collection::vec(proptest::sample::select(ContentUnit::ALL.to_vec()), 0..8)
    }

    proptest! {
        /// Every mentioned unit lands in exactly one partition, following precedence.
        #[test]
        fn prop_plan_respects_precedence(
            critical in unit_list(),
            preload in unit_list(),
            deferred in unit_list(),
            disabled in unit_list(),
            concurrency in 1u32..6,
        ) {
            let mut s = strategy_with(critical.clone(), preload.clone(), deferred.clone(), concurrency);
            s.disabled_components = disabled.iter().copied().collect();
            let plan = build_plan(&s);

            for unit in ContentUnit::ALL {
                let expected = if disabled.contains(&unit) {
                    Some(Partition::Disabled)
                } else if critical.contains(&unit) {
                    Some(Partition::Immediate)
                } else if preload.contains(&unit) {
                    Some(Partition::Priority)
                } else if deferred.contains(&unit) {
                    Some(Partition::Deferred)
                } else {
                    None
                };
                prop_assert_eq!(plan.partition(unit), expected);
            }

            prop_assert!(plan.units(Partition::Background).is_empty());
        }
    }
}
