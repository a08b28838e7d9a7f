use super::metrics::{VariantResults, Winner};

/// Arms below this many impressions are never tested.
pub const MIN_IMPRESSIONS_PER_ARM: u64 = 100;
/// Significance must exceed this to declare a winner.
pub const SIGNIFICANCE_THRESHOLD: f64 = 0.95;

// ── Result Structs ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SignificanceResult {
    pub z_score: f64,
    pub p_value: f64,
    /// `1 - p_value`, in `[0, 1]`.
    pub significance: f64,
    pub winner: Winner,
    /// Relative change of variant over control, in percent.
    pub lift: f64,
}

impl SignificanceResult {
    fn insufficient() -> Self {
        Self {
            z_score: 0.0,
            p_value: 1.0,
            significance: 0.0,
            winner: Winner::Inconclusive,
            lift: 0.0,
        }
    }
}

// ── Normal CDF (A&S 7.1.26) ─────────────────────────────────────────

/// Error function, Abramowitz & Stegun 7.1.26 (|error| < 1.5e-7).
pub fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}

/// Standard normal CDF, P(Z <= z).
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

// ── Two-Proportion Z-Test ───────────────────────────────────────────

/// Pooled two-proportion z-test on conversion rates.
///
/// Returns an inconclusive zero result when either arm has fewer than
/// [`MIN_IMPRESSIONS_PER_ARM`] impressions. Lift is 0 when the control
/// conversion rate is 0.
pub fn calculate_significance(
    control: &VariantResults,
    variant: &VariantResults,
) -> SignificanceResult {
    if control.impressions < MIN_IMPRESSIONS_PER_ARM
        || variant.impressions < MIN_IMPRESSIONS_PER_ARM
    {
        return SignificanceResult::insufficient();
    }

    let lift = if control.conversion_rate == 0.0 {
        0.0
    } else {
        (variant.conversion_rate - control.conversion_rate) / control.conversion_rate * 100.0
    };

    let n_c = control.impressions as f64;
    let n_v = variant.impressions as f64;
    let pooled = (control.conversions + variant.conversions) as f64 / (n_c + n_v);
    let se = (pooled * (1.0 - pooled) * (1.0 / n_c + 1.0 / n_v)).sqrt();

    // se is 0 when neither (or every) impression converted, NaN when
    // conversions outnumber impressions.
    if se.is_nan() || se <= 0.0 || se.is_infinite() {
        return SignificanceResult {
            lift,
            ..SignificanceResult::insufficient()
        };
    }

    let z = (control.conversion_rate - variant.conversion_rate).abs() / se;
    let p_value = (2.0 * (1.0 - normal_cdf(z))).clamp(0.0, 1.0);
    let significance = 1.0 - p_value;

    let winner = if significance > SIGNIFICANCE_THRESHOLD {
        if variant.conversion_rate > control.conversion_rate {
            Winner::Variant
        } else {
            Winner::Control
        }
    } else {
        Winner::Inconclusive
    };

    SignificanceResult {
        z_score: z,
        p_value,
        significance,
        winner,
        lift,
    }
}

// ── SRM Detection ───────────────────────────────────────────────────

/// Chi-squared test for sample ratio mismatch.
/// Returns true if chi2 > 6.635 (p=0.01 threshold).
pub fn check_sample_ratio_mismatch(
    control_n: u64,
    variant_n: u64,
    expected_variant_fraction: f64,
) -> bool {
    let total = control_n + variant_n;
    if total == 0 {
        return false;
    }
    let expected_control = total as f64 * (1.0 - expected_variant_fraction);
    let expected_variant = total as f64 * expected_variant_fraction;

    if expected_control <= 0.0 || expected_variant <= 0.0 {
        return false;
    }

    let chi2 = (control_n as f64 - expected_control).powi(2) / expected_control
        + (variant_n as f64 - expected_variant).powi(2) / expected_variant;

    chi2 > 6.635
}

// ── Sample Size Estimator ───────────────────────────────────────────

/// Two-proportion power analysis.
///
/// Returns the impressions each arm needs to detect `relative_mde` over
/// `baseline_rate` at the given alpha (two-sided) and power, inflated for
/// uneven splits. `None` when no finite answer exists.
pub fn required_sample_size(
    baseline_rate: f64,
    relative_mde: f64,
    alpha: f64,
    power: f64,
    variant_fraction: f64,
) -> Option<u64> {
    if !(baseline_rate > 0.0 && baseline_rate < 1.0) {
        return None;
    }
    if !(variant_fraction > 0.0 && variant_fraction < 1.0) {
        return None;
    }
    let p1 = baseline_rate;
    let p2 = (baseline_rate * (1.0 + relative_mde)).min(0.9999);
    let delta = (p2 - p1).abs();
    if delta == 0.0 {
        return None;
    }

    let z_alpha = z_from_p(1.0 - alpha / 2.0);
    let z_power = z_from_p(power);
    let p_bar = (p1 + p2) / 2.0;

    let numerator = z_alpha * (2.0 * p_bar * (1.0 - p_bar)).sqrt()
        + z_power * (p1 * (1.0 - p1) + p2 * (1.0 - p2)).sqrt();
    let per_arm = (numerator.powi(2) / delta.powi(2)).ceil();

    // The smaller arm needs more total traffic when the split is uneven.
    let split_factor = 1.0 / (variant_fraction * (1.0 - variant_fraction) * 4.0);
    Some((per_arm * split_factor).ceil() as u64)
}

/// Inverse normal CDF approximation (A&S 26.2.23).
/// Returns z such that P(Z < z) = p.
fn z_from_p(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let (p_adj, sign) = if p < 0.5 { (p, -1.0) } else { (1.0 - p, 1.0) };
    let t = (-2.0 * p_adj.ln()).sqrt();

    let c0 = 2.515517;
    let c1 = 0.802853;
    let c2 = 0.010328;
    let d1 = 1.432788;
    let d2 = 0.189269;
    let d3 = 0.001308;

    let z = t - (c0 + c1 * t + c2 * t * t) / (1.0 + d1 * t + d2 * t * t + d3 * t * t * t);

    sign * z
}
