// Clamped (open-uniform) B-spline fitting for polar curves.
// Control radii are solved by linear least squares over the Cox-de Boor basis and
// the fitted spline can be resampled at any resolution.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CurvePoint, PolarError};

const MIN_ANGLE_SPAN: f64 = 1e-6;
/// Smallest accepted ratio of smallest to largest singular value of the basis.
const RCOND_MIN: f64 = 1e-10;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SplineParams {
    pub degree: usize,
    pub control_count: usize,
    pub resolution: usize,
}

impl Default for SplineParams {
    fn default() -> Self {
        Self {
            degree: 3,
            control_count: 5,
            resolution: 200,
        }
    }
}

impl SplineParams {
    pub fn validate(&self) -> Result<(), PolarError> {
        if self.control_count <= self.degree {
            return Err(PolarError::InvalidParameter(format!(
                "spline needs more than {} control points for degree {}",
                self.degree, self.degree
            )));
        }
        if self.resolution < 2 {
            return Err(PolarError::InvalidParameter(
                "spline resolution must be at least 2".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FittedSpline {
    pub control_points: Vec<f64>,
    pub degree: usize,
    pub knots: Vec<f64>,
    /// Angle range `(min, max)` mapped onto the parameter interval `[0, 1]`.
    pub domain: (f64, f64),
}

impl FittedSpline {
    fn parameter(&self, angle: f64) -> f64 {
        let (min, max) = self.domain;
        ((angle - min) / (max - min)).clamp(0.0, 1.0)
    }

    /// Speed at `angle`, clamped to the spline domain and to non-negative values.
    pub fn evaluate(&self, angle: f64) -> f64 {
        self.evaluate_parameter(self.parameter(angle))
    }

    fn evaluate_parameter(&self, t: f64) -> f64 {
        let basis = basis_functions(&self.knots, self.degree, t);
        let value: f64 = basis
            .iter()
            .zip(self.control_points.iter())
            .map(|(b, c)| b * c)
            .sum();
        value.max(0.0)
    }

    /// Evaluate on `count` uniformly spaced parameters spanning the domain.
    pub fn resample(&self, count: usize) -> Vec<CurvePoint> {
        let (min, max) = self.domain;
        linspace(0.0, 1.0, count)
            .into_iter()
            .map(|t| CurvePoint::new(min + t * (max - min), self.evaluate_parameter(t)))
            .collect()
    }
}

/// Knot vector of length `control_count + degree + 1` clamped at 0 and 1.
pub fn open_uniform_knots(control_count: usize, degree: usize) -> Vec<f64> {
    let interior = control_count.saturating_sub(degree) + 1;
    let mut knots = Vec::with_capacity(control_count + degree + 1);
    knots.extend(std::iter::repeat(0.0).take(degree));
    knots.extend(linspace(0.0, 1.0, interior));
    knots.extend(std::iter::repeat(1.0).take(degree));
    knots
}

fn span_indicator(knots: &[f64], i: usize, t: f64) -> f64 {
    let (lo, hi) = (knots[i], knots[i + 1]);
    let end = knots[knots.len() - 1];
    // the closing parameter belongs to the last non-empty span
    let inside = if t >= end {
        lo < hi && hi >= end
    } else {
        lo <= t && t < hi
    };
    if inside {
        1.0
    } else {
        0.0
    }
}

/// All basis functions of `degree` at `t`, built bottom-up over a triangular table.
pub fn basis_functions(knots: &[f64], degree: usize, t: f64) -> Vec<f64> {
    let spans = knots.len() - 1;
    let mut level: Vec<f64> = (0..spans).map(|i| span_indicator(knots, i, t)).collect();
    for p in 1..=degree {
        let count = spans - p;
        let mut next = vec![0.0; count];
        for (i, slot) in next.iter_mut().enumerate() {
            let left_span = knots[i + p] - knots[i];
            if left_span > 0.0 {
                *slot += (t - knots[i]) / left_span * level[i];
            }
            let right_span = knots[i + p + 1] - knots[i + 1];
            if right_span > 0.0 {
                *slot += (knots[i + p + 1] - t) / right_span * level[i + 1];
            }
        }
        level = next;
    }
    level
}

/// Average speeds sharing an angle; the result is sorted by angle.
fn dedup_angles(points: &[CurvePoint]) -> Vec<CurvePoint> {
    let mut acc: BTreeMap<OrderedFloat<f64>, (f64, usize)> = BTreeMap::new();
    for point in points {
        if !point.angle.is_finite() || !point.speed.is_finite() {
            continue;
        }
        let entry = acc.entry(OrderedFloat(point.angle)).or_insert((0.0, 0));
        entry.0 += point.speed;
        entry.1 += 1;
    }
    acc.into_iter()
        .map(|(angle, (sum, count))| CurvePoint::new(angle.into_inner(), sum / count as f64))
        .collect()
}

/// Least-squares fit of an open-uniform B-spline to `points`.
///
/// `None` when there are fewer distinct angles than control points, the angle
/// span is degenerate, or the basis matrix is rank deficient.
pub fn fit_spline(points: &[CurvePoint], params: &SplineParams) -> Option<FittedSpline> {
    if params.validate().is_err() {
        return None;
    }
    let unique = dedup_angles(points);
    if unique.len() < params.control_count {
        debug!(
            "spline fit refused: {} distinct angles for {} control points",
            unique.len(),
            params.control_count
        );
        return None;
    }
    let min = unique.first()?.angle;
    let max = unique.last()?.angle;
    let span = max - min;
    if span < MIN_ANGLE_SPAN {
        debug!("spline fit refused: degenerate angle span {}", span);
        return None;
    }

    let knots = open_uniform_knots(params.control_count, params.degree);
    let rows = unique.len();
    let cols = params.control_count;
    let mut design = DMatrix::<f64>::zeros(rows, cols);
    for (row, point) in unique.iter().enumerate() {
        let t = (point.angle - min) / span;
        for (col, value) in basis_functions(&knots, params.degree, t)
            .into_iter()
            .enumerate()
        {
            design[(row, col)] = value;
        }
    }
    let observed = DVector::from_iterator(rows, unique.iter().map(|p| p.speed));

    let svd = design.svd(true, true);
    let largest = svd.singular_values.max();
    let smallest = svd.singular_values.min();
    if !(largest > 0.0) || smallest / largest < RCOND_MIN {
        debug!(
            "spline fit refused: ill-conditioned basis (singular values {:.3e}..{:.3e})",
            smallest, largest
        );
        return None;
    }
    let solution = svd.solve(&observed, f64::EPSILON).ok()?;
    if solution.iter().any(|v| !v.is_finite()) {
        return None;
    }

    Some(FittedSpline {
        control_points: solution.iter().copied().collect(),
        degree: params.degree,
        knots,
        domain: (min, max),
    })
}

/// Fit a spline and resample it densely; `None` when no fit is available.
pub fn resample_curve(points: &[CurvePoint], params: &SplineParams) -> Option<Vec<CurvePoint>> {
    fit_spline(points, params).map(|fit| fit.resample(params.resolution))
}

fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    if count <= 1 {
        return vec![start];
    }
    let step = (end - start) / (count as f64 - 1.0);
    let mut out: Vec<f64> = (0..count).map(|i| start + step * i as f64).collect();
    out[count - 1] = end;
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Cox-de Boor basis `N(i, degree)` evaluated at `t`, by direct recursion.
    fn basis(knots: &[f64], i: usize, degree: usize, t: f64) -> f64 {
        if degree == 0 {
            return span_indicator(knots, i, t);
        }
        let mut value = 0.0;
        let left_span = knots[i + degree] - knots[i];
        if left_span > 0.0 {
            value += (t - knots[i]) / left_span * basis(knots, i, degree - 1, t);
        }
        let right_span = knots[i + degree + 1] - knots[i + 1];
        if right_span > 0.0 {
            value += (knots[i + degree + 1] - t) / right_span * basis(knots, i + 1, degree - 1, t);
        }
        value
    }

    fn sampled(f: impl Fn(f64) -> f64) -> Vec<CurvePoint> {
        (0..=36)
            .map(|k| {
                let angle = k as f64 * 10.0;
                CurvePoint::new(angle, f(angle))
            })
            .collect()
    }

    #[test]
    fn test_knot_vector_layout() {
        let knots = open_uniform_knots(5, 3);
        assert_eq!(knots, vec![0.0, 0.0, 0.0, 0.0, 0.5, 1.0, 1.0, 1.0, 1.0]);
        assert_eq!(open_uniform_knots(7, 2).len(), 10);
    }

    #[test]
    fn test_basis_partition_of_unity() {
        let knots = open_uniform_knots(6, 3);
        for &t in &[0.0, 0.1, 0.33, 0.5, 0.75, 0.999, 1.0] {
            let sum: f64 = basis_functions(&knots, 3, t).iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "t={} sum={}", t, sum);
        }
    }

    #[test]
    fn test_iterative_basis_matches_recursive_definition() {
        let knots = open_uniform_knots(7, 3);
        for &t in &[0.0, 0.2, 0.45, 0.8, 1.0] {
            let table = basis_functions(&knots, 3, t);
            assert_eq!(table.len(), 7);
            for (i, value) in table.iter().enumerate() {
                assert!((value - basis(&knots, i, 3, t)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_clamped_endpoints() {
        let knots = open_uniform_knots(5, 3);
        let start = basis_functions(&knots, 3, 0.0);
        let end = basis_functions(&knots, 3, 1.0);
        assert_eq!(start[0], 1.0);
        assert_eq!(end[4], 1.0);
    }

    #[test]
    fn test_constant_curve_reproduced() {
        let fit = fit_spline(&sampled(|_| 6.0), &SplineParams::default()).unwrap();
        assert_eq!(fit.control_points.len(), 5);
        for c in &fit.control_points {
            assert!((c - 6.0).abs() < 1e-9);
        }
        for point in fit.resample(200) {
            assert!((point.speed - 6.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_linear_curve_reproduced() {
        let fit = fit_spline(&sampled(|a| a / 60.0), &SplineParams::default()).unwrap();
        for &angle in &[0.0, 45.0, 180.0, 275.0, 360.0] {
            assert!((fit.evaluate(angle) - angle / 60.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_resample_covers_domain_and_is_non_negative() {
        let points = sampled(|a| (a.to_radians()).sin() * 4.0);
        let fit = fit_spline(&points, &SplineParams::default()).unwrap();
        let dense = fit.resample(200);
        assert_eq!(dense.len(), 200);
        assert_eq!(dense[0].angle, 0.0);
        assert_eq!(dense[199].angle, 360.0);
        assert!(dense.iter().all(|p| p.speed >= 0.0));
    }

    #[test]
    fn test_refuses_too_few_distinct_angles() {
        let points = vec![
            CurvePoint::new(0.0, 1.0),
            CurvePoint::new(0.0, 3.0),
            CurvePoint::new(90.0, 5.0),
            CurvePoint::new(90.0, 5.0),
            CurvePoint::new(180.0, 4.0),
            CurvePoint::new(360.0, 0.0),
        ];
        assert!(fit_spline(&points, &SplineParams::default()).is_none());
        assert!(resample_curve(&points, &SplineParams::default()).is_none());
    }

    #[test]
    fn test_duplicate_angles_are_averaged() {
        let mut points = sampled(|_| 5.0);
        points.push(CurvePoint::new(90.0, 7.0));
        let unique = dedup_angles(&points);
        assert_eq!(unique.len(), 37);
        assert!((unique[9].speed - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_rank_deficient_basis_gives_no_fit() {
        // knots [0, 0, .25, .5, .75, 1, 1]: every sample misses the hat over [.25, .75]
        let params = SplineParams {
            degree: 1,
            control_count: 5,
            ..SplineParams::default()
        };
        let points = vec![
            CurvePoint::new(0.0, 1.0),
            CurvePoint::new(5.0, 1.0),
            CurvePoint::new(10.0, 1.0),
            CurvePoint::new(15.0, 1.0),
            CurvePoint::new(100.0, 2.0),
        ];
        let knots = open_uniform_knots(5, 1);
        for point in &points {
            assert_eq!(basis_functions(&knots, 1, point.angle / 100.0)[2], 0.0);
        }
        assert!(fit_spline(&points, &params).is_none());
        assert!(resample_curve(&points, &params).is_none());
    }

    #[test]
    fn test_invalid_params_give_no_fit() {
        let params = SplineParams {
            degree: 3,
            control_count: 3,
            resolution: 200,
        };
        assert!(params.validate().is_err());
        assert!(fit_spline(&sampled(|_| 6.0), &params).is_none());
    }
}
