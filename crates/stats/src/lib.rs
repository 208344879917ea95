//! # Argus Statistical Toolkit
//!
//! Pure numeric building blocks shared by every analytic module: returns
//! and volatility, correlation, closed-form linear regression, and the
//! sigma-band discretization used for regime classification.
//!
//! ## Design rules
//!
//! - **No I/O, no state.** Every function is a plain `f64` transformation,
//!   so the analytic modules stay trivially testable.
//! - **Degenerate inputs return defined fallbacks, not errors.** A series
//!   that is too short or has zero variance yields 0 (or an empty vector)
//!   rather than NaN; callers treat that as "no information" and move on.

/// Arithmetic mean. Empty input yields 0.
pub fn mean(series: &[f64]) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    series.iter().sum::<f64>() / series.len() as f64
}

/// Unbiased sample variance (n-1 denominator). Fewer than 2 points yields 0.
pub fn sample_variance(series: &[f64]) -> f64 {
    if series.len() < 2 {
        return 0.0;
    }
    let m = mean(series);
    series.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (series.len() - 1) as f64
}

/// Sample standard deviation.
pub fn std_dev(series: &[f64]) -> f64 {
    sample_variance(series).sqrt()
}

/// Log-returns of a strictly positive price/ratio series.
///
/// Pairs with a non-positive value are skipped: a zero or negative print is
/// a data artifact, and `ln` of it would poison every downstream moment.
pub fn log_returns(series: &[f64]) -> Vec<f64> {
    series
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect()
}

/// Annualized volatility from a per-period return variance.
///
/// `periods_per_year` is the sampling frequency (e.g. 8760 for hourly data).
pub fn annualized_volatility(variance: f64, periods_per_year: f64) -> f64 {
    if variance <= 0.0 || periods_per_year <= 0.0 {
        return 0.0;
    }
    (variance * periods_per_year).sqrt()
}

/// First differences of a series: `x[i+1] - x[i]`.
pub fn first_differences(series: &[f64]) -> Vec<f64> {
    series.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Pearson correlation between two equal-length series.
///
/// Returns 0 when either series has fewer than 2 points, the lengths
/// differ, or either side has zero variance (the constant-series guard).
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.len() < 2 {
        return 0.0;
    }
    let mean_a = mean(a);
    let mean_b = mean(b);

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    if var_a == 0.0 || var_b == 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

/// Slope and intercept of the least-squares line through `(x, y)` pairs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
}

/// Closed-form simple linear regression via running sums:
/// `slope = (nΣxy − ΣxΣy) / (nΣx² − (Σx)²)`.
///
/// A degenerate denominator (all x equal, or < 2 points) yields a flat line
/// through the mean of `y`.
pub fn linear_regression(x: &[f64], y: &[f64]) -> Regression {
    let n = x.len().min(y.len());
    if n < 2 {
        return Regression {
            slope: 0.0,
            intercept: mean(y),
        };
    }

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;
    for i in 0..n {
        sum_x += x[i];
        sum_y += y[i];
        sum_xy += x[i] * y[i];
        sum_xx += x[i] * x[i];
    }

    let denom = n as f64 * sum_xx - sum_x * sum_x;
    if denom == 0.0 {
        return Regression {
            slope: 0.0,
            intercept: sum_y / n as f64,
        };
    }

    let slope = (n as f64 * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n as f64;
    Regression { slope, intercept }
}

/// Discretizes a value into a 3-state bucket around `center` with band
/// half-width `sigma`: 0 below `center − sigma`, 2 above `center + sigma`,
/// 1 inside the band. A non-positive sigma collapses everything to 1.
pub fn discretize_sigma(value: f64, center: f64, sigma: f64) -> usize {
    if sigma <= 0.0 {
        return 1;
    }
    if value < center - sigma {
        0
    } else if value > center + sigma {
        2
    } else {
        1
    }
}
