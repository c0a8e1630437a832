//! CSV collaborator: reads experiment rows into [`RawRecord`]s and writes a
//! dataset back out in the same column layout.
//!
//! Parsing is lenient. A cell that cannot be interpreted becomes a missing
//! value so that the record store can reject the row with a proper
//! validation error instead of the whole file failing.

use crate::data::record::RawRecord;
use crate::data::store::Dataset;
use serde::Deserialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DataIoError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Header layout accepted on input. Aliases cover the common export of the
/// marketing A/B dataset.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(default, alias = "user id")]
    user_id: Option<String>,
    #[serde(default, alias = "test group")]
    test: Option<String>,
    #[serde(default)]
    converted: Option<String>,
    #[serde(default, alias = "total ads")]
    tot_impr: Option<String>,
    #[serde(default, alias = "most ads day")]
    mode_impr_day: Option<String>,
    #[serde(default, alias = "most ads hour")]
    mode_impr_hour: Option<String>,
}

impl From<CsvRow> for RawRecord {
    fn from(row: CsvRow) -> Self {
        RawRecord {
            user_id: row.user_id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            test: row.test.as_deref().and_then(parse_group_flag),
            converted: row.converted.as_deref().and_then(parse_binary),
            tot_impr: row.tot_impr.as_deref().and_then(parse_integer),
            mode_impr_day: row.mode_impr_day.as_deref().and_then(parse_day),
            mode_impr_hour: row.mode_impr_hour.as_deref().and_then(parse_integer),
        }
    }
}

fn parse_integer(cell: &str) -> Option<i64> {
    let cell = cell.trim();
    cell.parse::<i64>().ok().or_else(|| {
        // Exports sometimes write integers as floats ("12.0")
        let value = cell.parse::<f64>().ok()?;
        (value.fract() == 0.0 && value.is_finite()).then_some(value as i64)
    })
}

fn parse_binary(cell: &str) -> Option<i64> {
    match cell.trim().to_ascii_lowercase().as_str() {
        "true" => Some(1),
        "false" => Some(0),
        other => parse_integer(other),
    }
}

fn parse_group_flag(cell: &str) -> Option<i64> {
    match cell.trim().to_ascii_lowercase().as_str() {
        "ad" | "treatment" => Some(1),
        "psa" | "control" => Some(0),
        other => parse_binary(other),
    }
}

fn parse_day(cell: &str) -> Option<i64> {
    const DAYS: [&str; 7] = [
        "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
    ];
    let lower = cell.trim().to_ascii_lowercase();
    DAYS.iter()
        .position(|d| *d == lower)
        .map(|i| i as i64 + 1)
        .or_else(|| parse_integer(&lower))
}

/// Read all rows from CSV text with a header line
pub fn read_records<R: Read>(reader: R) -> Result<Vec<RawRecord>, DataIoError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    for result in csv_reader.deserialize::<CsvRow>() {
        rows.push(result?.into());
    }

    debug!("Read {} CSV rows", rows.len());
    Ok(rows)
}

/// Read rows from a CSV file
pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Vec<RawRecord>, DataIoError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| DataIoError::Open {
        path: path.display().to_string(),
        source,
    })?;
    read_records(file)
}

/// Write a dataset in the input column layout
pub fn write_records<W: Write>(writer: W, dataset: &Dataset) -> Result<(), DataIoError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for record in dataset {
        csv_writer.serialize(record.to_raw())?;
    }
    csv_writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Write a dataset to a CSV file, replacing any existing file
pub fn write_csv<P: AsRef<Path>>(path: P, dataset: &Dataset) -> Result<(), DataIoError> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|source| DataIoError::Open {
        path: path.display().to_string(),
        source,
    })?;
    write_records(file, dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::store::load;

    #[test]
    fn test_read_canonical_columns() {
        let csv = "user_id,test,converted,tot_impr,mode_impr_day,mode_impr_hour\n\
                   1,1,0,130,1,20\n\
                   2,0,1,93,2,22\n";
        let rows = read_records(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], RawRecord::complete("1", 1, 0, 130, 1, 20));
        assert_eq!(rows[1], RawRecord::complete("2", 0, 1, 93, 2, 22));
    }

    #[test]
    fn test_read_marketing_export_columns() {
        let csv = ",user id,test group,converted,total ads,most ads day,most ads hour\n\
                   0,1069124,ad,False,130,Monday,20\n\
                   1,1119715,psa,True,93,Tuesday,22\n";
        let rows = read_records(csv.as_bytes()).unwrap();
        assert_eq!(rows[0], RawRecord::complete("1069124", 1, 0, 130, 1, 20));
        assert_eq!(rows[1], RawRecord::complete("1119715", 0, 1, 93, 2, 22));
    }

    #[test]
    fn test_unparsable_cells_become_missing() {
        let csv = "user_id,test,converted,tot_impr,mode_impr_day,mode_impr_hour\n\
                   1,1,maybe,,1,20\n";
        let rows = read_records(csv.as_bytes()).unwrap();
        assert_eq!(rows[0].converted, None);
        assert_eq!(rows[0].tot_impr, None);

        let outcome = load(rows);
        assert!(outcome.dataset.is_empty());
        assert_eq!(outcome.rejected.len(), 1);
    }

    #[test]
    fn test_write_uses_input_layout() {
        let rows = vec![RawRecord::complete("7", 0, 1, 12, 5, 9)];
        let dataset = load(rows).dataset;

        let mut buffer = Vec::new();
        write_records(&mut buffer, &dataset).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.starts_with("user_id,test,converted,tot_impr,mode_impr_day,mode_impr_hour"));
        assert!(text.contains("7,0,1,12,5,9"));
    }

    #[test]
    fn test_float_formatted_integers() {
        assert_eq!(parse_integer("12.0"), Some(12));
        assert_eq!(parse_integer("12.5"), None);
        assert_eq!(parse_day("sunday"), Some(7));
    }
}
