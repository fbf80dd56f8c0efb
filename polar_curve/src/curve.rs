//! Curve assembly (anchoring and smoothing) and point sampling.

use serde::{Deserialize, Serialize};

/// Queries further than this beyond either end of a curve yield no value.
pub const EDGE_TOLERANCE_DEG: f64 = 10.0;
const ANGLE_EPS: f64 = 1e-6;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct CurvePoint {
    pub angle: f64,
    pub speed: f64,
}

impl CurvePoint {
    pub fn new(angle: f64, speed: f64) -> Self {
        Self { angle, speed }
    }
}

/// Angular domain of an assembled curve; both ends are forced to zero speed.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Domain {
    pub min: f64,
    pub max: f64,
}

impl Default for Domain {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 360.0,
        }
    }
}

/// Sort, anchor at the domain bounds and smooth per-bucket points into a curve.
pub fn assemble_curve(points: Vec<CurvePoint>, domain: Domain, window: usize) -> Vec<CurvePoint> {
    let anchored = anchor_domain(points, domain);
    smooth_curve(&anchored, window)
}

/// Order points by angle and pin both domain ends at zero speed.
///
/// An empty input gives the two-point zero curve.
pub fn anchor_domain(points: Vec<CurvePoint>, domain: Domain) -> Vec<CurvePoint> {
    let mut curve: Vec<CurvePoint> = points
        .into_iter()
        .filter(|p| p.angle.is_finite() && p.angle >= domain.min && p.angle <= domain.max)
        .collect();
    curve.sort_by(|a, b| a.angle.total_cmp(&b.angle));
    curve.dedup_by(|next, prev| (next.angle - prev.angle).abs() < ANGLE_EPS);

    let (first, last) = match (curve.first(), curve.last()) {
        (Some(first), Some(last)) => (first.angle, last.angle),
        _ => {
            return vec![
                CurvePoint::new(domain.min, 0.0),
                CurvePoint::new(domain.max, 0.0),
            ]
        }
    };

    if first > domain.min {
        curve.insert(0, CurvePoint::new(domain.min, 0.0));
    } else {
        curve[0] = CurvePoint::new(domain.min, 0.0);
    }
    let end = curve.len() - 1;
    if last < domain.max {
        curve.push(CurvePoint::new(domain.max, 0.0));
    } else {
        curve[end] = CurvePoint::new(domain.max, 0.0);
    }
    curve
}

/// Centred moving average over `±window` neighbours.
///
/// End points are left untouched; curves of three points or fewer are returned as is.
pub fn smooth_curve(points: &[CurvePoint], window: usize) -> Vec<CurvePoint> {
    let n = points.len();
    if n <= 3 || window == 0 {
        return points.to_vec();
    }
    points
        .iter()
        .enumerate()
        .map(|(idx, point)| {
            if idx == 0 || idx == n - 1 {
                return *point;
            }
            let start = idx.saturating_sub(window);
            let end = (idx + window + 1).min(n);
            let slice = &points[start..end];
            let mean = slice.iter().map(|p| p.speed).sum::<f64>() / slice.len() as f64;
            CurvePoint::new(point.angle, mean)
        })
        .collect()
}

/// Speed at `target` by linear interpolation along an angle-sorted curve.
///
/// Beyond either end the nearest end value is returned while the gap is at most
/// [`EDGE_TOLERANCE_DEG`]; further out there is no value.
pub fn interpolate_speed(points: &[CurvePoint], target: f64) -> Option<f64> {
    let first = points.first()?;
    let last = points.last()?;
    let idx = points.partition_point(|p| p.angle < target);

    if let Some(point) = points.get(idx) {
        if (point.angle - target).abs() <= ANGLE_EPS {
            return Some(point.speed);
        }
    }
    if idx == 0 {
        return (first.angle - target <= EDGE_TOLERANCE_DEG).then_some(first.speed);
    }
    if idx == points.len() {
        return (target - last.angle <= EDGE_TOLERANCE_DEG).then_some(last.speed);
    }

    let left = points[idx - 1];
    let right = points[idx];
    if (right.angle - left.angle).abs() <= ANGLE_EPS {
        return Some(left.speed);
    }
    let proportion = (target - left.angle) / (right.angle - left.angle);
    Some(left.speed + proportion * (right.speed - left.speed))
}
