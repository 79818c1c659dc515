//! Pure calculations over return series: weight normalization, portfolio
//! blending, value compounding and Pearson correlation.
use crate::core::bar::{PortfolioReturnSeries, WeightUnit};
use crate::core::error::PipelineError;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Raw weights summing above this are taken to be percentages.
pub const PERCENT_SUM_THRESHOLD: f64 = 1.5;

/// Normalizes a weight vector.
///
/// An explicit `Percent` unit always divides by the sum and `Fraction` leaves the
/// weights untouched. Without a declared unit, weights summing to more than
/// [`PERCENT_SUM_THRESHOLD`] are inferred to be percentages.
pub fn normalize_weights(weights: &[f64], unit: Option<WeightUnit>) -> Vec<f64> {
    let sum: f64 = weights.iter().sum();
    let as_percent = match unit {
        Some(WeightUnit::Percent) => true,
        Some(WeightUnit::Fraction) => false,
        None => sum > PERCENT_SUM_THRESHOLD,
    };
    if as_percent && sum != 0.0 {
        weights.iter().map(|w| w / sum).collect()
    } else {
        weights.to_vec()
    }
}

/// Blends per-ticker return series into one weighted series.
///
/// Dates are the union across all inputs, but a date is kept only when every
/// input has a return for it. A single missing return drops the whole date.
pub fn blend_returns(inputs: &[(&[(NaiveDate, f64)], f64)]) -> Vec<(NaiveDate, f64)> {
    if inputs.is_empty() {
        return Vec::new();
    }

    let lookups: Vec<HashMap<NaiveDate, f64>> = inputs
        .iter()
        .map(|(returns, _)| returns.iter().copied().collect())
        .collect();
    let all_dates: BTreeSet<NaiveDate> = inputs
        .iter()
        .flat_map(|(returns, _)| returns.iter().map(|(d, _)| *d))
        .collect();

    all_dates
        .into_iter()
        .filter_map(|date| {
            let mut total = 0.0;
            for (lookup, (_, weight)) in lookups.iter().zip(inputs) {
                total += lookup.get(&date)? * weight;
            }
            Some((date, total))
        })
        .collect()
}

/// Compounds `returns` from `base`. The output is one longer than the input.
pub fn compound_values(returns: &[f64], base: f64) -> Vec<f64> {
    let mut values = Vec::with_capacity(returns.len() + 1);
    values.push(base);
    let mut current = base;
    for r in returns {
        current *= 1.0 + r;
        values.push(current);
    }
    values
}

/// Builds a [`PortfolioReturnSeries`] from dated returns, which are sorted and
/// de-duplicated (last wins) first.
pub fn to_return_series(rows: Vec<(NaiveDate, f64)>, base: f64) -> PortfolioReturnSeries {
    let ordered: BTreeMap<NaiveDate, f64> = rows.into_iter().collect();
    let dates: Vec<NaiveDate> = ordered.keys().copied().collect();
    let returns: Vec<f64> = ordered.values().copied().collect();
    let values = compound_values(&returns, base);
    PortfolioReturnSeries {
        dates,
        returns,
        values,
    }
}

/// Returns of `a` and `b` on the dates both have, in date order.
pub fn align_returns(a: &[(NaiveDate, f64)], b: &[(NaiveDate, f64)]) -> (Vec<f64>, Vec<f64>) {
    let lookup: HashMap<NaiveDate, f64> = b.iter().copied().collect();
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let mut ordered = a.to_vec();
    ordered.sort_by_key(|(d, _)| *d);
    for (date, x) in ordered {
        if let Some(y) = lookup.get(&date) {
            xs.push(x);
            ys.push(*y);
        }
    }
    (xs, ys)
}

/// Pearson correlation over the first `min(len(x), len(y))` points.
///
/// Fewer than two points yields `Ok(0.0)`. Zero variance on either side is a
/// [`PipelineError::ComputeDegenerate`].
pub fn pearson(x: &[f64], y: &[f64]) -> Result<f64, PipelineError> {
    let n = x.len().min(y.len());
    if n < 2 {
        return Ok(0.0);
    }
    let (x, y) = (&x[..n], &y[..n]);
    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    let (mut sq_x, mut sq_y) = (0.0, 0.0);
    for (xi, yi) in x.iter().zip(y) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
        sq_x += xi * xi;
        sq_y += yi * yi;
    }

    // Rounding in the mean leaves a constant series with a residual variance
    // on the order of epsilon relative to its magnitude.
    let flat = |var: f64, sq: f64| var <= f64::EPSILON * sq;
    let denominator = (var_x * var_y).sqrt();
    if flat(var_x, sq_x) || flat(var_y, sq_y) || !denominator.is_finite() {
        return Err(PipelineError::ComputeDegenerate(format!(
            "zero variance over {n} points"
        )));
    }
    Ok((cov / denominator).clamp(-1.0, 1.0))
}
