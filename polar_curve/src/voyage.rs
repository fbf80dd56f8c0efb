//! Logbook voyages export (`voyages.json`) and observation extraction.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AngleSource, Observation, PolarError};

/// Entries this close to the start or end of a voyage are harbour manoeuvres.
pub const DEFAULT_EXCLUSION_MINUTES: i64 = 60;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoyageLog {
    pub voyages: Vec<Voyage>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Voyage {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub points: Vec<VoyagePoint>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoyagePoint {
    pub entry: LogEntry,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogEntry {
    pub datetime: Option<String>,
    pub course: Option<f64>,
    pub speed: SpeedReading,
    pub wind: WindReading,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedReading {
    pub stw: Option<f64>,
    pub sog: Option<f64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WindReading {
    pub speed: Option<f64>,
    pub direction: Option<f64>,
}

pub fn parse_voyages(input: &[u8]) -> Result<VoyageLog, PolarError> {
    serde_json::from_slice(input).map_err(|e| PolarError::VoyageParse(e.to_string()))
}

/// Parse an ISO 8601 timestamp; offset-less values are taken as UTC.
///
/// Seconds are optional, as are fractional seconds.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Some(ts) = ["%Y-%m-%dT%H:%M%:z", "%Y-%m-%d %H:%M%:z"]
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(value, fmt).ok())
    {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = value.strip_suffix('Z').unwrap_or(value);
    [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
    .map(|naive| naive.and_utc())
}

impl LogEntry {
    fn observation(&self) -> Option<Observation> {
        Some(Observation {
            angle: AngleSource::Bearing {
                course: self.course?,
                wind_direction: self.wind.direction?,
            },
            speed: self.speed.stw?,
            speed_over_ground: Some(self.speed.sog?),
            wind_speed: self.wind.speed?,
        })
    }
}

/// Observations from every voyage, skipping entries within `exclusion` of either end.
pub fn extract_observations(log: &VoyageLog, exclusion: Duration) -> Vec<Observation> {
    let mut out = Vec::new();
    for voyage in &log.voyages {
        let start = voyage.start_time.as_deref().and_then(parse_timestamp);
        let end = voyage.end_time.as_deref().and_then(parse_timestamp);
        let (start, end) = match (start, end) {
            (Some(start), Some(end)) => (start, end),
            _ => continue,
        };
        for point in &voyage.points {
            let entry = &point.entry;
            let at = match entry.datetime.as_deref().and_then(parse_timestamp) {
                Some(at) => at,
                None => continue,
            };
            if at - start < exclusion || end - at < exclusion {
                continue;
            }
            if let Some(obs) = entry.observation() {
                out.push(obs);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = r#"{
      "voyages": [
        {
          "startTime": "2024-06-01T08:00:00Z",
          "endTime": "2024-06-01T14:00:00Z",
          "points": [
            {"entry": {"datetime": "2024-06-01T08:30:00Z", "course": 10, "speed": {"stw": 5.0, "sog": 5.1}, "wind": {"speed": 12, "direction": 100}}},
            {"entry": {"datetime": "2024-06-01T10:00:00Z", "course": 10, "speed": {"stw": 6.2, "sog": 6.0}, "wind": {"speed": 12, "direction": 100}}},
            {"entry": {"datetime": "2024-06-01T11:00:00+00:00", "course": 200, "speed": {"stw": 5.8}, "wind": {"speed": 9, "direction": 300}}},
            {"entry": {"datetime": "2024-06-01T12:00:00", "course": 200, "speed": {"stw": 5.5, "sog": 5.4}, "wind": {"speed": 9, "direction": 300}}},
            {"entry": {"datetime": "not a date", "course": 0, "speed": {"stw": 1, "sog": 1}, "wind": {"speed": 9, "direction": 300}}},
            {"entry": {"datetime": "2024-06-01T13:30:00Z", "course": 10, "speed": {"stw": 4.0, "sog": 4.0}, "wind": {"speed": 12, "direction": 100}}}
          ]
        },
        {"startTime": "2024-06-02T08:00:00Z", "points": []}
      ]
    }"#;

    #[test]
    fn test_parse_and_extract() {
        let log = parse_voyages(LOG.as_bytes()).unwrap();
        assert_eq!(log.voyages.len(), 2);
        let obs = extract_observations(&log, Duration::minutes(DEFAULT_EXCLUSION_MINUTES));
        // first and last entries fall inside the exclusion window, the third has no sog
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].speed, 6.2);
        assert_eq!(
            obs[0].angle,
            AngleSource::Bearing {
                course: 10.0,
                wind_direction: 100.0
            }
        );
        assert_eq!(obs[1].wind_speed, 9.0);
    }

    #[test]
    fn test_zero_exclusion_keeps_edges() {
        let log = parse_voyages(LOG.as_bytes()).unwrap();
        let obs = extract_observations(&log, Duration::zero());
        assert_eq!(obs.len(), 4);
    }

    #[test]
    fn test_timestamp_formats() {
        assert!(parse_timestamp("2024-06-01T10:00:00Z").is_some());
        assert!(parse_timestamp("2024-06-01T10:00:00.250+02:00").is_some());
        assert!(parse_timestamp("2024-06-01T10:00:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_timestamps_without_seconds() {
        let expected = parse_timestamp("2024-06-01T10:00:00Z").unwrap();
        assert_eq!(parse_timestamp("2024-06-01T10:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-06-01T10:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-06-01T12:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-06-01 10:00"), Some(expected));
    }

    #[test]
    fn test_invalid_json_reported() {
        assert!(matches!(
            parse_voyages(b"{\"voyages\": 3}"),
            Err(PolarError::VoyageParse(_))
        ));
    }
}
