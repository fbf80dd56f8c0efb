//! Tab-separated polar table: `TWS, TWA35, STW35, ..., TWA175, STW175`.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::curve::{interpolate_speed, CurvePoint};
use crate::PolarError;

/// Report angles 35, 45, ..., 175.
pub fn default_report_angles() -> Vec<u32> {
    (35..=175).step_by(10).collect()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TableRow {
    pub tws: f64,
    /// `(report angle, speed)`; `None` where the curve has no value.
    pub cells: Vec<(u32, Option<f64>)>,
}

/// One `{twa, stw, tws}` triple read back from a polar table.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct TableSample {
    pub twa: f64,
    pub stw: f64,
    pub tws: f64,
}

/// Sample a curve at the report angles, ignoring points outside `window`.
pub fn project_row(
    tws: f64,
    points: &[CurvePoint],
    report_angles: &[u32],
    window: (f64, f64),
) -> TableRow {
    let mut visible: Vec<CurvePoint> = points
        .iter()
        .copied()
        .filter(|p| window.0 <= p.angle && p.angle <= window.1)
        .collect();
    visible.sort_by(|a, b| a.angle.total_cmp(&b.angle));
    let cells = report_angles
        .iter()
        .map(|&angle| (angle, interpolate_speed(&visible, angle as f64)))
        .collect();
    TableRow { tws, cells }
}

pub fn table_header(report_angles: &[u32]) -> Vec<String> {
    let mut header = Vec::with_capacity(1 + report_angles.len() * 2);
    header.push("TWS".to_string());
    for angle in report_angles {
        header.push(format!("TWA{}", angle));
        header.push(format!("STW{}", angle));
    }
    header
}

fn format_row(row: &TableRow) -> Vec<String> {
    let mut fields = Vec::with_capacity(1 + row.cells.len() * 2);
    fields.push(format!("{:.1}", row.tws));
    for (angle, stw) in &row.cells {
        fields.push(angle.to_string());
        fields.push(stw.map(|v| format!("{:.2}", v)).unwrap_or_default());
    }
    fields
}

/// Write the table; with no rows only the `TWS` header is emitted.
pub fn write_table<W: Write>(
    rows: &[TableRow],
    report_angles: &[u32],
    out: W,
) -> Result<(), PolarError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_writer(out);
    let header = if rows.is_empty() {
        vec!["TWS".to_string()]
    } else {
        table_header(report_angles)
    };
    writer
        .write_record(&header)
        .map_err(|e| PolarError::TableWrite(e.to_string()))?;
    for row in rows {
        writer
            .write_record(format_row(row))
            .map_err(|e| PolarError::TableWrite(e.to_string()))?;
    }
    writer
        .flush()
        .map_err(|e| PolarError::TableWrite(e.to_string()))?;
    Ok(())
}

fn parse_number(field: &str, line: u64, what: &str) -> Result<Option<f64>, PolarError> {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|_| PolarError::TableParse(format!("line {}: invalid {} '{}'", line, what, trimmed)))
}

/// Read a polar table back into triples; empty speed cells are skipped.
pub fn read_table<R: Read>(input: R) -> Result<Vec<TableSample>, PolarError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .has_headers(true)
        .from_reader(input);

    let header = reader
        .headers()
        .map_err(|e| PolarError::TableParse(e.to_string()))?
        .clone();
    if header.get(0).map(str::trim) != Some("TWS") {
        return Err(PolarError::TableParse("first column must be TWS".into()));
    }

    let mut samples = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| PolarError::TableParse(e.to_string()))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let tws = match parse_number(record.get(0).unwrap_or(""), line, "TWS")? {
            Some(tws) => tws,
            None => continue,
        };
        let mut idx = 1;
        while idx + 1 < record.len() {
            let twa = parse_number(&record[idx], line, "TWA")?;
            let stw = parse_number(&record[idx + 1], line, "STW")?;
            if let (Some(twa), Some(stw)) = (twa, stw) {
                samples.push(TableSample { twa, stw, tws });
            }
            idx += 2;
        }
    }
    Ok(samples)
}

/// Group triples into one angle-sorted point list per TWS, ascending by TWS.
pub fn group_by_tws(samples: &[TableSample]) -> Vec<(f64, Vec<CurvePoint>)> {
    let mut grouped: BTreeMap<OrderedFloat<f64>, Vec<CurvePoint>> = BTreeMap::new();
    for sample in samples {
        grouped
            .entry(OrderedFloat(sample.tws))
            .or_default()
            .push(CurvePoint::new(sample.twa, sample.stw));
    }
    grouped
        .into_iter()
        .map(|(tws, mut points)| {
            points.sort_by(|a, b| a.angle.total_cmp(&b.angle));
            (tws.into_inner(), points)
        })
        .collect()
}
