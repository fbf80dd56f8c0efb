//! Order statistics used to reduce an angle bucket to a single speed.

/// Fewer values than this are never outlier-filtered.
const MIN_OUTLIER_SAMPLES: usize = 4;
const IQR_FENCE: f64 = 1.5;

fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut ordered = values.to_vec();
    ordered.sort_by(f64::total_cmp);
    ordered
}

/// Linear interpolation between order statistics (the R-7 rule).
///
/// `pct` is clamped to `[0, 100]`. Returns `None` for an empty slice.
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    let ordered = sorted_copy(values);
    percentile_sorted(&ordered, pct)
}

fn percentile_sorted(ordered: &[f64], pct: f64) -> Option<f64> {
    match ordered.len() {
        0 => return None,
        1 => return Some(ordered[0]),
        _ => {}
    }
    let clamped = pct.clamp(0.0, 100.0);
    let rank = (ordered.len() - 1) as f64 * (clamped / 100.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return Some(ordered[lower]);
    }
    let fraction = rank - lower as f64;
    Some(ordered[lower] + (ordered[upper] - ordered[lower]) * fraction)
}

/// Drop values outside the Tukey fences `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]`.
///
/// With a zero spread only values inside `[Q1, Q3]` survive. Input order is kept.
pub fn remove_outliers(values: &[f64]) -> Vec<f64> {
    if values.len() < MIN_OUTLIER_SAMPLES {
        return values.to_vec();
    }
    let ordered = sorted_copy(values);
    let (q1, q3) = match (percentile_sorted(&ordered, 25.0), percentile_sorted(&ordered, 75.0)) {
        (Some(q1), Some(q3)) => (q1, q3),
        _ => return values.to_vec(),
    };
    let iqr = q3 - q1;
    let (lower, upper) = if iqr <= 0.0 {
        (q1, q3)
    } else {
        (q1 - IQR_FENCE * iqr, q3 + IQR_FENCE * iqr)
    };
    values
        .iter()
        .copied()
        .filter(|v| lower <= *v && *v <= upper)
        .collect()
}

/// Outlier-filter a bucket and reduce it to its percentile speed.
///
/// `None` when fewer than `min_samples` values survive filtering.
pub fn aggregate_bucket(values: &[f64], pct: f64, min_samples: usize) -> Option<f64> {
    let filtered = remove_outliers(values);
    if filtered.is_empty() || filtered.len() < min_samples {
        return None;
    }
    percentile(&filtered, pct)
}
