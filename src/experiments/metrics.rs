//! Live per-experiment counters.
//!
//! Every recorded impression, click or conversion increments one arm's
//! counter and immediately recomputes that arm's rates, so a snapshot never
//! carries stale rates. Counters only grow.
//!
//! Callers are expected to record an impression before the click or
//! conversion it leads to. Conversions that outrun impressions are kept as
//! observed (and logged) rather than rejected.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::config::Arm;
use super::stats;

/// Confidence level results are read at.
pub const CONFIDENCE_LEVEL: f64 = 0.95;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Impression,
    Click,
    Conversion,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Control,
    Variant,
    Inconclusive,
}

/// Counters and derived rates for one arm.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VariantResults {
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
    pub click_through_rate: f64,
}

impl VariantResults {
    pub fn new(impressions: u64, clicks: u64, conversions: u64) -> Self {
        let mut results = Self {
            impressions,
            clicks,
            conversions,
            ..Default::default()
        };
        results.recompute_rates();
        results
    }

    fn apply(&mut self, kind: EventKind) {
        match kind {
            EventKind::Impression => self.impressions += 1,
            EventKind::Click => self.clicks += 1,
            EventKind::Conversion => self.conversions += 1,
        }
        self.recompute_rates();
    }

    fn recompute_rates(&mut self) {
        let impressions = self.impressions as f64;
        self.conversion_rate = safe_div(self.conversions as f64, impressions);
        self.click_through_rate = safe_div(self.clicks as f64, impressions);
    }
}

/// Both arms plus the statistical read of their difference.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestResults {
    pub control: VariantResults,
    pub variant: VariantResults,
    pub statistical_significance: f64,
    pub confidence_level: f64,
    pub winner: Winner,
    /// Relative change of variant over control, in percent.
    pub lift: f64,
}

impl TestResults {
    pub fn from_arms(control: VariantResults, variant: VariantResults) -> Self {
        let sig = stats::calculate_significance(&control, &variant);
        Self {
            control,
            variant,
            statistical_significance: sig.significance,
            confidence_level: CONFIDENCE_LEVEL,
            winner: sig.winner,
            lift: sig.lift,
        }
    }

    pub fn arm(&self, arm: Arm) -> &VariantResults {
        match arm {
            Arm::Control => &self.control,
            Arm::Variant => &self.variant,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct ArmCounters {
    control: VariantResults,
    variant: VariantResults,
}

impl ArmCounters {
    fn arm_mut(&mut self, arm: Arm) -> &mut VariantResults {
        match arm {
            Arm::Control => &mut self.control,
            Arm::Variant => &mut self.variant,
        }
    }
}

/// In-memory counters keyed by experiment id.
///
/// Increments for one experiment are applied under that entry's lock, so
/// concurrent recorders never lose updates.
#[derive(Default)]
pub struct MetricsAccumulator {
    counters: DashMap<String, ArmCounters>,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event and returns the updated arm.
    pub fn record(&self, test_id: &str, arm: Arm, kind: EventKind) -> VariantResults {
        let mut entry = self.counters.entry(test_id.to_string()).or_default();
        let results = entry.arm_mut(arm);
        results.apply(kind);
        if results.conversions > results.impressions {
            tracing::warn!(
                test_id,
                arm = %arm,
                conversions = results.conversions,
                impressions = results.impressions,
                "conversions recorded ahead of impressions"
            );
        }
        tracing::debug!(test_id, arm = %arm, event = ?kind, "recorded experiment event");
        results.clone()
    }

    pub fn record_impression(&self, test_id: &str, arm: Arm) -> VariantResults {
        self.record(test_id, arm, EventKind::Impression)
    }

    pub fn record_click(&self, test_id: &str, arm: Arm) -> VariantResults {
        self.record(test_id, arm, EventKind::Click)
    }

    pub fn record_conversion(&self, test_id: &str, arm: Arm) -> VariantResults {
        self.record(test_id, arm, EventKind::Conversion)
    }

    /// Live snapshot, or `None` if nothing was ever recorded for `test_id`.
    pub fn results(&self, test_id: &str) -> Option<TestResults> {
        let (control, variant) = self.arms(test_id)?;
        Some(TestResults::from_arms(control, variant))
    }

    /// Raw `(control, variant)` counters without the statistical read.
    pub fn arms(&self, test_id: &str) -> Option<(VariantResults, VariantResults)> {
        self.counters
            .get(test_id)
            .map(|entry| (entry.control.clone(), entry.variant.clone()))
    }

    /// Every tracked experiment's `(id, control, variant)` counters.
    pub fn all_arms(&self) -> Vec<(String, VariantResults, VariantResults)> {
        self.counters
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().control.clone(),
                    entry.value().variant.clone(),
                )
            })
            .collect()
    }
}

fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}
