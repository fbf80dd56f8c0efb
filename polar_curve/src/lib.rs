//! Core sailing polar computation library implemented in Rust.
//!
//! Raw logbook observations are classified into wind-speed bands, binned by
//! true wind angle, reduced to a percentile speed per bin and assembled into a
//! boundary-anchored, smoothed curve per band. Optionally a clamped B-spline is
//! fitted to each curve for dense resampling.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod bands;
pub mod binning;
pub mod classify;
pub mod curve;
pub mod logbook;
pub mod spline;
pub mod stats;
pub mod table;
pub mod voyage;

pub use bands::{Band, BandSet};
pub use classify::{AngleSource, MirrorMode, Observation, Sample};
pub use curve::{CurvePoint, Domain};
pub use spline::{FittedSpline, SplineParams};
pub use table::{TableRow, TableSample};

#[derive(Error, Debug)]
pub enum PolarError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid band definition: {0}")]
    InvalidBands(String),
    #[error("failed to parse voyages: {0}")]
    VoyageParse(String),
    #[error("failed to parse polar table: {0}")]
    TableParse(String),
    #[error("failed to parse logbook: {0}")]
    LogbookParse(String),
    #[error("failed to write polar table: {0}")]
    TableWrite(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub bin_size: u32,
    pub percentile: f64,
    pub min_samples: usize,
    pub smoothing_window: usize,
    pub domain: Domain,
    pub min_twa: f64,
    pub motoring_ratio: f64,
    pub mirror: MirrorMode,
    pub mirror_limit: f64,
    pub spline: Option<SplineParams>,
    pub bands: BandSet,
    pub report_angles: Vec<u32>,
    pub report_window: (f64, f64),
}

impl Default for Params {
    fn default() -> Self {
        Self {
            bin_size: 10,
            percentile: 80.0,
            min_samples: 3,
            smoothing_window: 2,
            domain: Domain::default(),
            min_twa: 30.0,
            motoring_ratio: 0.8,
            mirror: MirrorMode::Fold,
            mirror_limit: 330.0,
            spline: None,
            bands: BandSet::default(),
            report_angles: table::default_report_angles(),
            report_window: (30.0, 330.0),
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), PolarError> {
        if self.bin_size == 0 {
            return Err(PolarError::InvalidParameter("bin size must be > 0".into()));
        }
        if self.min_samples == 0 {
            return Err(PolarError::InvalidParameter("min samples must be > 0".into()));
        }
        if !self.percentile.is_finite() {
            return Err(PolarError::InvalidParameter("percentile must be finite".into()));
        }
        if !(self.domain.max > self.domain.min) {
            return Err(PolarError::InvalidParameter(format!(
                "domain [{}, {}] is empty",
                self.domain.min, self.domain.max
            )));
        }
        if let Some(spline) = self.spline.as_ref() {
            spline.validate()?;
        }
        Ok(())
    }
}

/// Result of the pipeline for a single wind-speed band.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BandCurve {
    pub band: Band,
    pub samples: Vec<Sample>,
    pub points: Vec<CurvePoint>,
    pub spline: Option<FittedSpline>,
    pub resampled: Option<Vec<CurvePoint>>,
}

impl BandCurve {
    /// Dense spline curve when a fit exists, otherwise the percentile curve.
    pub fn display_points(&self) -> &[CurvePoint] {
        self.resampled.as_deref().unwrap_or(&self.points)
    }

    pub fn has_speed(&self) -> bool {
        self.display_points().iter().any(|p| p.speed > 0.0)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PolarCurves {
    pub bands: Vec<BandCurve>,
}

impl PolarCurves {
    pub fn sample_count(&self) -> usize {
        self.bands.iter().map(|b| b.samples.len()).sum()
    }

    /// Fixed-width table projection of the percentile curves.
    pub fn table(&self, params: &Params) -> Vec<TableRow> {
        self.bands
            .iter()
            .map(|band| {
                table::project_row(
                    band.band.representative_tws(),
                    &band.points,
                    &params.report_angles,
                    params.report_window,
                )
            })
            .collect()
    }
}

/// Compute one polar curve per configured band from raw observations.
pub fn compute_polars(
    observations: &[Observation],
    params: &Params,
) -> Result<PolarCurves, PolarError> {
    params.validate()?;

    let by_band = classify::classify_all(observations, params);
    let bands = params
        .bands
        .iter()
        .zip(by_band)
        .map(|(band, samples)| {
            let points = band_curve(&samples, params);
            let spline = params
                .spline
                .as_ref()
                .and_then(|sp| spline::fit_spline(&points, sp));
            if params.spline.is_some() && spline.is_none() {
                debug!("band {}: no spline fit, keeping percentile curve", band.label);
            }
            let resampled = spline.as_ref().zip(params.spline.as_ref()).map(|(fit, sp)| {
                fit.resample(sp.resolution)
            });
            BandCurve {
                band: band.clone(),
                samples,
                points,
                spline,
                resampled,
            }
        })
        .collect();

    Ok(PolarCurves { bands })
}

/// Bin, filter, aggregate and assemble the curve for one band's samples.
pub fn band_curve(samples: &[Sample], params: &Params) -> Vec<CurvePoint> {
    let buckets = binning::bucket_by_angle(samples, params.bin_size);
    let mut points = Vec::with_capacity(buckets.len());
    for (center, speeds) in &buckets {
        match stats::aggregate_bucket(speeds, params.percentile, params.min_samples) {
            Some(speed) => points.push(CurvePoint::new(*center as f64, speed)),
            None => debug!(
                "bucket {} dropped: fewer than {} samples after filtering",
                center, params.min_samples
            ),
        }
    }
    curve::assemble_curve(points, params.domain, params.smoothing_window)
}
