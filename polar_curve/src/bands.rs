//! Wind-speed bands. Each band owns one independent polar curve.

use serde::{Deserialize, Serialize};

use crate::PolarError;

/// Half-open wind-speed range `[lower, upper)`; `upper = None` is unbounded.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Band {
    pub label: String,
    pub lower: f64,
    #[serde(default)]
    pub upper: Option<f64>,
    #[serde(default)]
    pub tws: Option<f64>,
}

impl Band {
    pub fn new(label: impl Into<String>, lower: f64, upper: Option<f64>) -> Self {
        Self {
            label: label.into(),
            lower,
            upper,
            tws: None,
        }
    }

    pub fn with_tws(mut self, tws: f64) -> Self {
        self.tws = Some(tws);
        self
    }

    pub fn contains(&self, wind_speed: f64) -> bool {
        match self.upper {
            Some(upper) => self.lower <= wind_speed && wind_speed < upper,
            None => wind_speed >= self.lower,
        }
    }

    /// Wind speed printed in the TWS column of the polar table.
    pub fn representative_tws(&self) -> f64 {
        if let Some(tws) = self.tws {
            return tws;
        }
        match self.upper {
            Some(upper) => (self.lower + upper) / 2.0,
            None => self.lower + 2.5,
        }
    }
}

/// Ordered, non-overlapping set of bands.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "Vec<Band>", into = "Vec<Band>")]
pub struct BandSet {
    bands: Vec<Band>,
}

impl BandSet {
    pub fn new(bands: Vec<Band>) -> Result<Self, PolarError> {
        for (idx, band) in bands.iter().enumerate() {
            if !band.lower.is_finite() {
                return Err(PolarError::InvalidBands(format!(
                    "{}: lower bound must be finite",
                    band.label
                )));
            }
            match band.upper {
                Some(upper) if !(upper > band.lower) => {
                    return Err(PolarError::InvalidBands(format!(
                        "{}: upper bound {} must exceed lower bound {}",
                        band.label, upper, band.lower
                    )));
                }
                None if idx + 1 != bands.len() => {
                    return Err(PolarError::InvalidBands(format!(
                        "{}: only the last band may be unbounded",
                        band.label
                    )));
                }
                _ => {}
            }
            if let Some(next) = bands.get(idx + 1) {
                let upper = band.upper.unwrap_or(f64::INFINITY);
                if next.lower < upper {
                    return Err(PolarError::InvalidBands(format!(
                        "{} overlaps {}",
                        band.label, next.label
                    )));
                }
            }
        }
        Ok(Self { bands })
    }

    /// Index of the first band containing `wind_speed`.
    pub fn classify(&self, wind_speed: f64) -> Option<usize> {
        self.bands.iter().position(|b| b.contains(wind_speed))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Band> {
        self.bands.iter()
    }

    pub fn get(&self, idx: usize) -> Option<&Band> {
        self.bands.get(idx)
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }
}

impl Default for BandSet {
    fn default() -> Self {
        Self {
            bands: vec![
                Band::new("2.5-7.5 kn", 2.5, Some(7.5)).with_tws(5.0),
                Band::new("7.5-12.5 kn", 7.5, Some(12.5)).with_tws(10.0),
                Band::new("12.5-17.5 kn", 12.5, Some(17.5)).with_tws(15.0),
                Band::new(">17.5 kn", 17.5, None).with_tws(20.0),
            ],
        }
    }
}

impl TryFrom<Vec<Band>> for BandSet {
    type Error = PolarError;

    fn try_from(bands: Vec<Band>) -> Result<Self, Self::Error> {
        BandSet::new(bands)
    }
}

impl From<BandSet> for Vec<Band> {
    fn from(set: BandSet) -> Self {
        set.bands
    }
}

impl<'a> IntoIterator for &'a BandSet {
    type Item = &'a Band;
    type IntoIter = std::slice::Iter<'a, Band>;

    fn into_iter(self) -> Self::IntoIter {
        self.bands.iter()
    }
}
