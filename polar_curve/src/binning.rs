use std::collections::BTreeMap;

use crate::Sample;

/// Nearest bucket centre for `angle`, a multiple of `bin_size` wrapped into `[0, 360)`.
pub fn bucket_center(angle: f64, bin_size: u32) -> u32 {
    let size = bin_size.max(1) as f64;
    let shifted = (angle + size / 2.0).rem_euclid(360.0);
    let center = (shifted / size).floor() * size;
    (center as u32) % 360
}

/// Group sample speeds by bucket centre; keys iterate in ascending angle.
pub fn bucket_by_angle(samples: &[Sample], bin_size: u32) -> BTreeMap<u32, Vec<f64>> {
    let mut buckets: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for sample in samples {
        buckets
            .entry(bucket_center(sample.angle, bin_size))
            .or_default()
            .push(sample.speed);
    }
    buckets
}
