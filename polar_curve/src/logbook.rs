//! Merging of consecutive "Course change: X° → Y°" logbook entries.
//!
//! Successive course changes that start from the same heading collapse into one
//! entry carrying the final heading and position, the maxima of `maxSpeed` and
//! `maxWind`, the mean wind speed and the circular mean wind direction.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::{Mapping, Value};

use crate::PolarError;

static COURSE_CHANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Course change:\s*([0-9]+(?:\.[0-9]+)?)\s*[°º]?\s*(?:→|->)\s*([0-9]+(?:\.[0-9]+)?)")
        .expect("course change pattern is valid")
});

/// `(from, to)` headings when the entry's `text` describes a course change.
pub fn parse_course_change(entry: &Value) -> Option<(f64, f64)> {
    let text = entry.get("text")?.as_str()?;
    let caps = COURSE_CHANGE.captures(text)?;
    let from = caps.get(1)?.as_str().parse().ok()?;
    let to = caps.get(2)?.as_str().parse().ok()?;
    Some((from, to))
}

/// Circular mean of bearings in degrees, normalised to `[0, 360)`.
pub fn circular_mean(angles: &[f64]) -> Option<f64> {
    if angles.is_empty() {
        return None;
    }
    let (sin_sum, cos_sum) = angles.iter().fold((0.0, 0.0), |(s, c), a| {
        let rad = a.to_radians();
        (s + rad.sin(), c + rad.cos())
    });
    Some((sin_sum.atan2(cos_sum).to_degrees() + 360.0) % 360.0)
}

fn wind_field(entry: &Value, key: &str) -> Option<f64> {
    entry.get("wind")?.get(key)?.as_f64()
}

fn max_field(group: &[Value], key: &str) -> Option<Value> {
    group
        .iter()
        .filter_map(|e| e.get(key))
        .filter(|v| v.as_f64().is_some())
        .max_by(|a, b| {
            let (a, b) = (a.as_f64().unwrap_or(f64::MIN), b.as_f64().unwrap_or(f64::MIN));
            a.total_cmp(&b)
        })
        .cloned()
}

fn combine_group(group: &[Value], from: f64, to: f64) -> Value {
    let mut combined: Mapping = group[0].as_mapping().cloned().unwrap_or_default();
    combined.insert(
        Value::from("text"),
        Value::from(format!("Course change: {}° → {}°", from, to)),
    );

    let last = &group[group.len() - 1];
    if let Some(position) = last.get("position") {
        combined.insert(Value::from("position"), position.clone());
    }
    for key in ["maxSpeed", "maxWind"] {
        if let Some(max) = max_field(group, key) {
            combined.insert(Value::from(key), max);
        }
    }

    let speeds: Vec<f64> = group.iter().filter_map(|e| wind_field(e, "speed")).collect();
    let directions: Vec<f64> = group
        .iter()
        .filter_map(|e| wind_field(e, "direction"))
        .collect();
    if !speeds.is_empty() || !directions.is_empty() {
        let wind_key = Value::from("wind");
        let mut wind = combined
            .get(&wind_key)
            .and_then(Value::as_mapping)
            .cloned()
            .unwrap_or_default();
        if !speeds.is_empty() {
            let mean = speeds.iter().sum::<f64>() / speeds.len() as f64;
            wind.insert(Value::from("speed"), Value::from(mean));
        }
        if let Some(direction) = circular_mean(&directions) {
            wind.insert(Value::from("direction"), Value::from(direction));
        }
        combined.insert(wind_key, Value::Mapping(wind));
    }
    Value::Mapping(combined)
}

/// Merge runs of course changes sharing the same starting heading.
pub fn merge_entries(entries: Vec<Value>) -> Vec<Value> {
    let mut merged = Vec::with_capacity(entries.len());
    let mut iter = entries.into_iter().peekable();
    while let Some(entry) = iter.next() {
        let (from, mut to) = match parse_course_change(&entry) {
            Some(change) => change,
            None => {
                merged.push(entry);
                continue;
            }
        };
        let mut group = vec![entry];
        while let Some((next_from, next_to)) = iter.peek().and_then(parse_course_change) {
            if next_from != from {
                break;
            }
            to = next_to;
            group.extend(iter.next());
        }
        if group.len() == 1 {
            merged.extend(group);
        } else {
            merged.push(combine_group(&group, from, to));
        }
    }
    merged
}

/// Merge a YAML logbook document whose root is a list of entries.
pub fn merge_logbook(text: &str) -> Result<String, PolarError> {
    let doc: Value =
        serde_yaml::from_str(text).map_err(|e| PolarError::LogbookParse(e.to_string()))?;
    let entries = match doc {
        Value::Sequence(entries) => entries,
        _ => {
            return Err(PolarError::LogbookParse(
                "YAML root must be a list of entries".into(),
            ))
        }
    };
    serde_yaml::to_string(&merge_entries(entries))
        .map_err(|e| PolarError::LogbookParse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(yaml: &str) -> Vec<Value> {
        match serde_yaml::from_str(yaml).unwrap() {
            Value::Sequence(items) => items,
            _ => panic!("expected a list"),
        }
    }

    #[test]
    fn test_parse_course_change_variants() {
        let e = entries(
            r#"
- text: "Course change: 90° → 120°"
- text: "Course change: 90.5 -> 100"
- text: "Course change: 45º→50º"
- text: "Reefed main"
- note: 3
"#,
        );
        assert_eq!(parse_course_change(&e[0]), Some((90.0, 120.0)));
        assert_eq!(parse_course_change(&e[1]), Some((90.5, 100.0)));
        assert_eq!(parse_course_change(&e[2]), Some((45.0, 50.0)));
        assert_eq!(parse_course_change(&e[3]), None);
        assert_eq!(parse_course_change(&e[4]), None);
    }

    #[test]
    fn test_circular_mean_wraps_north() {
        let mean = circular_mean(&[350.0, 10.0]).unwrap();
        assert!(mean < 1e-9 || (360.0 - mean) < 1e-9);
        let east = circular_mean(&[80.0, 100.0]).unwrap();
        assert!((east - 90.0).abs() < 1e-9);
        assert_eq!(circular_mean(&[]), None);
    }

    #[test]
    fn test_merges_runs_with_same_origin() {
        let e = entries(
            r#"
- text: "Course change: 90° → 100°"
  position: {lat: 1.0, lon: 2.0}
  maxSpeed: 6.1
  wind: {speed: 10, direction: 350}
- text: "Course change: 90° → 110°"
  position: {lat: 1.5, lon: 2.5}
  maxSpeed: 7.4
  maxWind: 18
  wind: {speed: 14, direction: 10}
- text: "Course change: 110° → 120°"
- text: "Anchored"
"#,
        );
        let merged = merge_entries(e);
        assert_eq!(merged.len(), 3);
        let combined = &merged[0];
        assert_eq!(
            combined.get("text").and_then(Value::as_str),
            Some("Course change: 90° → 110°")
        );
        assert_eq!(
            combined["position"]["lat"].as_f64(),
            Some(1.5)
        );
        assert_eq!(combined["maxSpeed"].as_f64(), Some(7.4));
        assert_eq!(combined["maxWind"].as_f64(), Some(18.0));
        assert_eq!(combined["wind"]["speed"].as_f64(), Some(12.0));
        let direction = combined["wind"]["direction"].as_f64().unwrap();
        assert!(direction < 1e-9 || (360.0 - direction) < 1e-9);
        assert_eq!(
            merged[1].get("text").and_then(Value::as_str),
            Some("Course change: 110° → 120°")
        );
    }

    #[test]
    fn test_merge_logbook_requires_list() {
        assert!(matches!(
            merge_logbook("a: 1\n"),
            Err(PolarError::LogbookParse(_))
        ));
        let out = merge_logbook("- text: \"Course change: 10° → 20°\"\n- text: \"Course change: 10° → 30°\"\n")
            .unwrap();
        assert!(out.contains("Course change: 10° → 30°"));
        assert!(!out.contains("→ 20°"));
    }
}
