//! Reading and writing the intermediate beta file.
//!
//! The file is a two-column CSV: a `feature` column and a column named after the
//! request, holding that request's coefficients rounded to a fixed number of decimals.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

use super::regression::BetaVector;

pub const FEATURE_HEADER: &str = "feature";
pub const DEFAULT_DECIMALS: u32 = 5;

#[derive(Error, Debug)]
pub enum BetaFileError {
    #[error("I/O error on the beta file: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error in the beta file: {0}")]
    Csv(#[from] csv::Error),
    #[error("The beta file header must be '{FEATURE_HEADER},<request id>', found '{0}'.")]
    InvalidHeader(String),
    #[error("Line {line} of the beta file is malformed: {message}")]
    MalformedRecord { line: u64, message: String },
}

/// Rounds half away from zero to `decimals` places. Negative zero collapses to zero.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    let rounded = (value * scale).round() / scale;
    if rounded == 0.0 { 0.0 } else { rounded }
}

/// Writes `beta` rounded to `decimals` places and returns the rounded vector, which
/// is exactly what [`read_beta_file`] will reproduce.
pub fn write_beta_file(
    path: &Path,
    request_id: &str,
    beta: &BetaVector,
    decimals: u32,
) -> Result<BetaVector, BetaFileError> {
    let rounded = beta.map_values(|v| round_to(v, decimals));
    let mut writer = csv::Writer::from_writer(BufWriter::new(File::create(path)?));
    writer.write_record([FEATURE_HEADER, request_id])?;

    let mut buffer = ryu::Buffer::new();
    for (feature, value) in rounded.iter() {
        writer.write_record([feature, buffer.format(value)])?;
    }
    writer
        .into_inner()
        .map_err(|e| io::Error::other(e.to_string()))?
        .flush()?;
    log::debug!(
        "Wrote {} coefficients to '{}'",
        rounded.len(),
        path.display()
    );
    Ok(rounded)
}

/// Reads a beta file. Returns the request id named in the header with the vector.
pub fn read_beta_file(path: &Path) -> Result<(String, BetaVector), BetaFileError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(File::open(path)?);

    let headers = reader.headers()?.clone();
    if headers.len() != 2 || &headers[0] != FEATURE_HEADER {
        return Err(BetaFileError::InvalidHeader(
            headers.iter().collect::<Vec<_>>().join(","),
        ));
    }
    let request_id = headers[1].to_string();

    let mut features = Vec::new();
    let mut values = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        let value: f64 = record[1]
            .trim()
            .parse()
            .map_err(|e| BetaFileError::MalformedRecord {
                line,
                message: format!("coefficient '{}': {e}", &record[1]),
            })?;
        features.push(record[0].to_string());
        values.push(value);
    }
    Ok((request_id, BetaVector::new(features, values)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rounded_coefficients_round_trip_exactly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("req-1.beta.csv");
        let beta = BetaVector::new(
            vec!["age".to_string(), "bmi".to_string(), "sbp".to_string()],
            vec![0.99999999999, 1.0000000002, -0.123456789],
        );

        let written = write_beta_file(&path, "req-1", &beta, DEFAULT_DECIMALS).unwrap();
        assert_eq!(written.values(), &[1.0, 1.0, -0.12346]);

        let (request_id, read) = read_beta_file(&path).unwrap();
        assert_eq!(request_id, "req-1");
        assert_eq!(read, written);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("feature,req-1\n"));
        assert!(text.contains("sbp,-0.12346\n"));
    }

    #[test]
    fn tiny_negative_coefficients_become_zero() {
        assert_eq!(round_to(-0.000001, 5), 0.0);
        assert!(round_to(-0.000001, 5).is_sign_positive());
        assert_eq!(round_to(2.5e-5, 4), 0.0);
        assert_eq!(round_to(0.5, 0), 1.0);
    }

    #[test]
    fn wrong_header_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "name,value\nage,1\n").unwrap();
        assert!(matches!(
            read_beta_file(&path).unwrap_err(),
            BetaFileError::InvalidHeader(h) if h == "name,value"
        ));
    }

    #[test]
    fn unparsable_coefficient_names_the_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "feature,r\nage,1\nbmi,abc\n").unwrap();
        match read_beta_file(&path).unwrap_err() {
            BetaFileError::MalformedRecord { line, .. } => assert_eq!(line, 3),
            other => panic!("Expected MalformedRecord, got {other:?}"),
        }
    }
}
