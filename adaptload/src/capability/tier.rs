//! Device tier classification.
//!
//! Reduces a capability snapshot to one of four discrete tiers using a
//! weighted score:
//!
//! ```text
//! hardware = memory_gb + cores / 2
//! network  = downlink_mbps / 5
//! memory   = 3 (low) | 2 (medium) | 1 (high) | 0 (critical)
//! total    = hardware + network + memory
//!
//! total >= 8  -> Premium
//! total >= 6  -> HighEnd
//! total >= 4  -> MidRange
//! otherwise   -> LowEnd
//! ```
//!
//! The mapping is a pure function of the three partial scores; a higher
//! total never produces a lower tier.

use serde::Serialize;

use super::MemoryPressure;

/// Total score at or above which a device is premium.
pub const PREMIUM_THRESHOLD: f64 = 8.0;

/// Total score at or above which a device is high-end.
pub const HIGH_END_THRESHOLD: f64 = 6.0;

/// Total score at or above which a device is mid-range.
pub const MID_RANGE_THRESHOLD: f64 = 4.0;

/// Discrete device capacity classification.
///
/// Variants are declared in ascending order so the derived `Ord` matches
/// capacity: `LowEnd < MidRange < HighEnd < Premium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceTier {
    /// Constrained hardware, poor network or heavy memory pressure.
    LowEnd,
    /// Typical mid-market device.
    MidRange,
    /// Capable device on a good connection.
    HighEnd,
    /// Top-end device with headroom on every axis.
    Premium,
}

impl DeviceTier {
    /// Classify a total score.
    pub fn from_total(total: f64) -> Self {
        if total >= PREMIUM_THRESHOLD {
            DeviceTier::Premium
        } else if total >= HIGH_END_THRESHOLD {
            DeviceTier::HighEnd
        } else if total >= MID_RANGE_THRESHOLD {
            DeviceTier::MidRange
        } else {
            DeviceTier::LowEnd
        }
    }

    /// Concurrent loads this tier can sustain.
    pub fn max_concurrent_loads(&self) -> u32 {
        match self {
            DeviceTier::Premium => 6,
            DeviceTier::HighEnd => 4,
            DeviceTier::MidRange => 2,
            DeviceTier::LowEnd => 1,
        }
    }

    /// Recommended image quality (0.1 - 1.0).
    pub fn recommended_image_quality(&self) -> f64 {
        match self {
            DeviceTier::Premium => 0.95,
            DeviceTier::HighEnd => 0.85,
            DeviceTier::MidRange => 0.75,
            DeviceTier::LowEnd => 0.6,
        }
    }

    /// Stable identifier, as used in config files and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceTier::LowEnd => "low-end",
            DeviceTier::MidRange => "mid-range",
            DeviceTier::HighEnd => "high-end",
            DeviceTier::Premium => "premium",
        }
    }
}

impl std::fmt::Display for DeviceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partial and total scores behind a tier decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierScores {
    /// `memory_gb + cores / 2`.
    pub hardware: f64,
    /// `downlink_mbps / 5`.
    pub network: f64,
    /// 3, 2, 1 or 0 depending on memory pressure.
    pub memory: f64,
}

impl TierScores {
    /// Compute partial scores from raw inputs.
    pub fn new(memory_gb: f64, cores: u32, downlink_mbps: f64, pressure: MemoryPressure) -> Self {
        Self {
            hardware: memory_gb + f64::from(cores) / 2.0,
            network: downlink_mbps / 5.0,
            memory: pressure.score(),
        }
    }

    /// Sum of the partial scores.
    pub fn total(&self) -> f64 {
        self.hardware + self.network + self.memory
    }
}

/// Outcome of classifying a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierAssessment {
    pub tier: DeviceTier,
    pub scores: TierScores,
    /// `clamp(round(total), 1, 10)`.
    pub load_capacity: u8,
    pub max_concurrent_loads: u32,
    pub recommended_image_quality: f64,
}

/// Classify partial scores into a tier plus derived recommendations.
pub fn classify(scores: TierScores) -> TierAssessment {
    let total = scores.total();
    let tier = DeviceTier::from_total(total);
    // NaN casts to 0, hence the extra floor.
    let load_capacity = (total.round().clamp(1.0, 10.0) as u8).max(1);

    TierAssessment {
        tier,
        scores,
        load_capacity,
        max_concurrent_loads: tier.max_concurrent_loads(),
        recommended_image_quality: tier.recommended_image_quality(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pressure_strategy() -> impl Strategy<Value = MemoryPressure> {
        prop_oneof![
            Just(MemoryPressure::Low),
            Just(MemoryPressure::Medium),
            Just(MemoryPressure::High),
            Just(MemoryPressure::Critical),
        ]
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        assert_eq!(DeviceTier::from_total(8.0), DeviceTier::Premium);
        assert_eq!(DeviceTier::from_total(7.999), DeviceTier::HighEnd);
        assert_eq!(DeviceTier::from_total(6.0), DeviceTier::HighEnd);
        assert_eq!(DeviceTier::from_total(4.0), DeviceTier::MidRange);
        assert_eq!(DeviceTier::from_total(3.99), DeviceTier::LowEnd);
        assert_eq!(DeviceTier::from_total(0.0), DeviceTier::LowEnd);
    }

    #[test]
    fn test_classify_typical_desktop() {
        // 8GB, 8 cores, 10 Mbps, low pressure: 12 + 2 + 3 = 17
        let assessment = classify(TierScores::new(8.0, 8, 10.0, MemoryPressure::Low));
        assert_eq!(assessment.tier, DeviceTier::Premium);
        assert_eq!(assessment.load_capacity, 10);
        assert_eq!(assessment.max_concurrent_loads, 6);
        assert_eq!(assessment.recommended_image_quality, 0.95);
    }

    #[test]
    fn test_classify_budget_phone() {
        // 1GB, 2 cores, 0.25 Mbps, high pressure: 2 + 0.05 + 1 = 3.05
        let assessment = classify(TierScores::new(1.0, 2, 0.25, MemoryPressure::High));
        assert_eq!(assessment.tier, DeviceTier::LowEnd);
        assert_eq!(assessment.load_capacity, 3);
        assert_eq!(assessment.max_concurrent_loads, 1);
        assert_eq!(assessment.recommended_image_quality, 0.6);
    }

    #[test]
    fn test_classify_mid_range() {
        // 2GB, 2 cores, 1.5 Mbps, medium: 3 + 0.3 + 2 = 5.3
        let assessment = classify(TierScores::new(2.0, 2, 1.5, MemoryPressure::Medium));
        assert_eq!(assessment.tier, DeviceTier::MidRange);
        assert_eq!(assessment.load_capacity, 5);
        assert_eq!(assessment.max_concurrent_loads, 2);
        assert_eq!(assessment.recommended_image_quality, 0.75);
    }

    #[test]
    fn test_load_capacity_floor() {
        let assessment = classify(TierScores::new(0.0, 0, 0.0, MemoryPressure::Critical));
        assert_eq!(assessment.load_capacity, 1);
    }

    #[test]
    fn test_tier_ordering() {
        assert!(DeviceTier::LowEnd < DeviceTier::MidRange);
        assert!(DeviceTier::MidRange < DeviceTier::HighEnd);
        assert!(DeviceTier::HighEnd < DeviceTier::Premium);
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(DeviceTier::LowEnd.to_string(), "low-end");
        assert_eq!(DeviceTier::Premium.to_string(), "premium");
    }

    // =========================================================================
    // Property-based tests
    // =========================================================================

    proptest! {
        /// Same inputs always classify the same way
        #[test]
        fn prop_classification_is_deterministic(
            memory in 0.0f64..64.0,
            cores in 0u32..128,
            downlink in 0.0f64..1000.0,
            pressure in pressure_strategy(),
        ) {
            let a = classify(TierScores::new(memory, cores, downlink, pressure));
            let b = classify(TierScores::new(memory, cores, downlink, pressure));
            prop_assert_eq!(a, b);
        }

        /// A higher total never yields a lower tier
        #[test]
        fn prop_tier_is_monotonic(
            m1 in 0.0f64..32.0, c1 in 0u32..64, d1 in 0.0f64..200.0, p1 in pressure_strategy(),
            m2 in 0.0f64..32.0, c2 in 0u32..64, d2 in 0.0f64..200.0, p2 in pressure_strategy(),
        ) {
            let a = classify(TierScores::new(m1, c1, d1, p1));
            let b = classify(TierScores::new(m2, c2, d2, p2));
            if a.scores.total() <= b.scores.total() {
                prop_assert!(a.tier <= b.tier,
                    "total {} -> {:?} but total {} -> {:?}",
                    a.scores.total(), a.tier, b.scores.total(), b.tier);
                prop_assert!(a.load_capacity <= b.load_capacity);
            }
        }

        /// Raising any single input never lowers the tier
        #[test]
        fn prop_each_input_is_monotonic(
            memory in 0.0f64..32.0,
            cores in 0u32..64,
            downlink in 0.0f64..200.0,
            extra in 0.0f64..16.0,
        ) {
            let base = classify(TierScores::new(memory, cores, downlink, MemoryPressure::Medium)).tier;
            let more_memory = classify(TierScores::new(memory + extra, cores, downlink, MemoryPressure::Medium)).tier;
            let more_cores = classify(TierScores::new(memory, cores + 2, downlink, MemoryPressure::Medium)).tier;
            let more_network = classify(TierScores::new(memory, cores, downlink + extra, MemoryPressure::Medium)).tier;
            let less_pressure = classify(TierScores::new(memory, cores, downlink, MemoryPressure::Low)).tier;

            prop_assert!(more_memory >= base);
            prop_assert!(more_cores >= base);
            prop_assert!(more_network >= base);
            prop_assert!(less_pressure >= base);
        }

        /// Load capacity always lies in 1..=10
        #[test]
        fn prop_load_capacity_in_range(
            memory in 0.0f64..1024.0,
            cores in 0u32..1024,
            downlink in 0.0f64..10_000.0,
            pressure in pressure_strategy(),
        ) {
            let a = classify(TierScores::new(memory, cores, downlink, pressure));
            prop_assert!((1..=10).contains(&a.load_capacity));
        }
    }
}
