use serde::Serialize;

use super::config::Experiment;
use super::metrics::{TestResults, Winner};
use super::stats::SIGNIFICANCE_THRESHOLD;

/// Below this many impressions in either arm, results are flagged as fragile.
pub const RELIABLE_IMPRESSIONS_PER_ARM: u64 = 1000;

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestInsights {
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub next_steps: Vec<String>,
}

/// Turns an experiment and its results into guidance text.
///
/// Read-only. Missing inputs produce empty lists.
pub fn generate_insights(
    experiment: Option<&Experiment>,
    results: Option<&TestResults>,
) -> TestInsights {
    let (Some(experiment), Some(results)) = (experiment, results) else {
        return TestInsights::default();
    };

    let mut out = TestInsights::default();

    if results.statistical_significance > SIGNIFICANCE_THRESHOLD {
        out.insights.push(format!(
            "Test shows {:.1}% confidence in results",
            results.statistical_significance * 100.0
        ));
        match results.winner {
            Winner::Variant => {
                out.insights.push(format!(
                    "Variant performs {:.1}% better than control",
                    results.lift
                ));
                out.recommendations
                    .push("Implement the variant version for better performance".to_string());
            }
            Winner::Control => {
                out.insights.push(format!(
                    "Control performs {:.1}% better than variant",
                    results.lift.abs()
                ));
                out.recommendations
                    .push("Keep the control version as it performs better".to_string());
            }
            Winner::Inconclusive => {}
        }
    } else {
        out.insights
            .push("Results are not yet statistically significant".to_string());
        out.recommendations
            .push("Continue running the test to gather more data".to_string());
    }

    if results.control.impressions < RELIABLE_IMPRESSIONS_PER_ARM
        || results.variant.impressions < RELIABLE_IMPRESSIONS_PER_ARM
    {
        out.insights
            .push("Sample size is relatively small - results may not be reliable".to_string());
        out.recommendations
            .push("Consider running the test longer or increasing traffic".to_string());
    }

    if experiment.is_running() {
        out.next_steps
            .push("Monitor test performance daily".to_string());
        out.next_steps
            .push("Check for statistical significance regularly".to_string());
    }

    out
}
