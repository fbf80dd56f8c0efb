use serde::{Deserialize, Serialize};

use crate::Params;

/// How the true wind angle of an observation is known.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub enum AngleSource {
    /// Boat course and true wind direction, both as compass bearings.
    Bearing { course: f64, wind_direction: f64 },
    /// True wind angle already relative to the bow, e.g. from a polar table.
    Relative(f64),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub angle: AngleSource,
    /// Speed through water (knots).
    pub speed: f64,
    pub speed_over_ground: Option<f64>,
    pub wind_speed: f64,
}

/// Whether single-tack samples are folded onto the opposite tack.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum MirrorMode {
    /// Emit a mirrored duplicate at `360 - angle` for every sample off the centre line.
    #[default]
    Fold,
    /// Input already covers both tacks; never duplicate.
    PreMirrored,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    /// Degrees in `[0, 360)`.
    pub angle: f64,
    pub speed: f64,
    pub band: usize,
}

/// Absolute true wind angle in `[0, 180]`, 0 meaning head to wind.
pub fn true_wind_angle(course: f64, wind_direction: f64) -> f64 {
    let angle = (wind_direction - course).rem_euclid(360.0);
    if angle > 180.0 {
        360.0 - angle
    } else {
        angle
    }
}

fn observed_angle(source: AngleSource) -> f64 {
    match source {
        AngleSource::Bearing {
            course,
            wind_direction,
        } => true_wind_angle(course, wind_direction),
        AngleSource::Relative(angle) => {
            let wrapped = angle.rem_euclid(360.0);
            if wrapped >= 360.0 {
                0.0
            } else {
                wrapped
            }
        }
    }
}

/// Classify one observation into zero, one or two samples (the sample plus its mirror).
pub fn classify_observation(obs: &Observation, params: &Params) -> Vec<Sample> {
    if !(obs.wind_speed > 0.0) || !obs.speed.is_finite() {
        return Vec::new();
    }
    if let Some(sog) = obs.speed_over_ground {
        if sog > params.motoring_ratio * obs.wind_speed {
            return Vec::new();
        }
    }
    let band = match params.bands.classify(obs.wind_speed) {
        Some(band) => band,
        None => return Vec::new(),
    };

    let angle = observed_angle(obs.angle);
    if !angle.is_finite() {
        return Vec::new();
    }
    let off_wind = angle.min(360.0 - angle);
    if off_wind < params.min_twa {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(2);
    out.push(Sample {
        angle,
        speed: obs.speed,
        band,
    });
    if params.mirror == MirrorMode::Fold && angle > 0.0 && angle < 180.0 {
        let mirrored = (360.0 - angle).rem_euclid(360.0);
        if mirrored <= params.mirror_limit {
            out.push(Sample {
                angle: mirrored,
                speed: obs.speed,
                band,
            });
        }
    }
    out
}

/// Classify all observations, grouped per band in band order.
pub fn classify_all(observations: &[Observation], params: &Params) -> Vec<Vec<Sample>> {
    let mut by_band: Vec<Vec<Sample>> = vec![Vec::new(); params.bands.len()];
    for obs in observations {
        for sample in classify_observation(obs, params) {
            by_band[sample.band].push(sample);
        }
    }
    by_band
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bearing(course: f64, wind_direction: f64, speed: f64, sog: f64, wind: f64) -> Observation {
        Observation {
            angle: AngleSource::Bearing {
                course,
                wind_direction,
            },
            speed,
            speed_over_ground: Some(sog),
            wind_speed: wind,
        }
    }

    #[test]
    fn test_true_wind_angle_is_tack_independent() {
        assert_eq!(true_wind_angle(0.0, 90.0), 90.0);
        assert_eq!(true_wind_angle(0.0, 270.0), 90.0);
        assert_eq!(true_wind_angle(350.0, 10.0), 20.0);
        assert_eq!(true_wind_angle(10.0, 190.0), 180.0);
    }

    #[test]
    fn test_mirrored_duplicate_emitted() {
        let params = Params::default();
        let samples = classify_observation(&bearing(0.0, 60.0, 5.5, 5.0, 10.0), &params);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].angle, 60.0);
        assert_eq!(samples[1].angle, 300.0);
        assert!(samples.iter().all(|s| s.band == 1 && s.speed == 5.5));
    }

    #[test]
    fn test_dead_run_not_mirrored() {
        let params = Params::default();
        let samples = classify_observation(&bearing(0.0, 180.0, 5.0, 5.0, 10.0), &params);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].angle, 180.0);
    }

    #[test]
    fn test_mirror_limit_respected() {
        let params = Params {
            mirror_limit: 300.0,
            ..Params::default()
        };
        // 50 mirrors to 310 which lies beyond the limit
        let samples = classify_observation(&bearing(0.0, 50.0, 5.0, 5.0, 10.0), &params);
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn test_pre_mirrored_input_never_duplicated() {
        let params = Params {
            mirror: MirrorMode::PreMirrored,
            ..Params::default()
        };
        let samples = classify_observation(&bearing(0.0, 60.0, 5.0, 5.0, 10.0), &params);
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn test_filters_drop_unreliable_observations() {
        let params = Params::default();
        // calm
        assert!(classify_observation(&bearing(0.0, 90.0, 5.0, 5.0, 0.0), &params).is_empty());
        // motoring: sog above 0.8 x wind speed
        assert!(classify_observation(&bearing(0.0, 90.0, 6.0, 8.5, 10.0), &params).is_empty());
        // pinching
        assert!(classify_observation(&bearing(0.0, 25.0, 4.0, 4.0, 10.0), &params).is_empty());
        // below the lowest band
        assert!(classify_observation(&bearing(0.0, 90.0, 1.0, 1.0, 2.0), &params).is_empty());
    }

    #[test]
    fn test_non_finite_angles_dropped() {
        let params = Params::default();
        assert!(classify_observation(&bearing(f64::NAN, 90.0, 5.0, 5.0, 10.0), &params).is_empty());
        assert!(
            classify_observation(&bearing(0.0, f64::INFINITY, 5.0, 5.0, 10.0), &params).is_empty()
        );
        let obs = Observation {
            angle: AngleSource::Relative(f64::NAN),
            speed: 5.0,
            speed_over_ground: None,
            wind_speed: 10.0,
        };
        assert!(classify_observation(&obs, &params).is_empty());
    }

    #[test]
    fn test_relative_angle_wraps() {
        let params = Params {
            mirror: MirrorMode::PreMirrored,
            ..Params::default()
        };
        let obs = Observation {
            angle: AngleSource::Relative(-60.0),
            speed: 5.0,
            speed_over_ground: None,
            wind_speed: 10.0,
        };
        let samples = classify_observation(&obs, &params);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].angle, 300.0);
    }

    #[test]
    fn test_classify_all_groups_by_band() {
        let params = Params::default();
        let obs = vec![
            bearing(0.0, 90.0, 4.0, 3.0, 5.0),
            bearing(0.0, 120.0, 6.0, 5.0, 15.0),
            bearing(0.0, 120.0, 6.0, 5.0, 1.0),
        ];
        let grouped = classify_all(&obs, &params);
        assert_eq!(grouped.len(), 4);
        assert_eq!(grouped[0].len(), 2);
        assert_eq!(grouped[1].len(), 0);
        assert_eq!(grouped[2].len(), 2);
        assert_eq!(grouped[3].len(), 0);
    }
}
