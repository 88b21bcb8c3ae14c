//! Streaming reader for per-phenotype GWAS summary statistic files.

use csv::{ByteRecord, ReaderBuilder};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::shared::files::{delimiter_for, open_text};
use crate::types::{PropagationError, StatColumns, VariantStat};

/// Reads `ID`, `BETA`, `SE` and `OBS_CT` (or the configured equivalents) row by row.
/// Other columns are ignored.
pub struct GwasStatsReader {
    path: PathBuf,
    reader: csv::Reader<Box<dyn Read + Send>>,
    record: ByteRecord,
    columns: [usize; 4],
    names: StatColumns,
    variants_read: u64,
}

impl GwasStatsReader {
    pub fn open(path: &Path, names: &StatColumns) -> Result<Self, PropagationError> {
        let csv_error = |source| PropagationError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter_for(path))
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(open_text(path)?);

        let headers = reader.byte_headers().map_err(csv_error)?.clone();
        let position = |column: &str| {
            headers
                .iter()
                .position(|h| h == column.as_bytes())
                .ok_or_else(|| PropagationError::MissingColumn {
                    path: path.to_path_buf(),
                    column: column.to_string(),
                })
        };
        let columns = [
            position(&names.id)?,
            position(&names.beta)?,
            position(&names.se)?,
            position(&names.sample_size)?,
        ];

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            record: ByteRecord::new(),
            columns,
            names: names.clone(),
            variants_read: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn variants_read(&self) -> u64 {
        self.variants_read
    }

    /// Reads the next variant, storing its identifier in `id`. Returns `None` at the
    /// end of the file.
    pub fn read_variant(&mut self, id: &mut String) -> Result<Option<VariantStat>, PropagationError> {
        let more = self
            .reader
            .read_byte_record(&mut self.record)
            .map_err(|source| PropagationError::Csv {
                path: self.path.clone(),
                source,
            })?;
        if !more {
            return Ok(None);
        }

        let [id_col, beta_col, se_col, n_col] = self.columns;
        id.clear();
        id.push_str(&String::from_utf8_lossy(self.field(id_col)));
        let stat = VariantStat {
            effect: self.parse_float(beta_col, &self.names.beta)?,
            se: self.parse_float(se_col, &self.names.se)?,
            sample_size: self.parse_count(n_col)?,
        };
        self.variants_read += 1;
        Ok(Some(stat))
    }

    fn field(&self, index: usize) -> &[u8] {
        self.record.get(index).unwrap_or_default()
    }

    fn malformed(&self, index: usize, column: &str) -> PropagationError {
        PropagationError::MalformedRecord {
            path: self.path.clone(),
            line: self.record.position().map_or(0, |p| p.line()),
            column: column.to_string(),
            value: String::from_utf8_lossy(self.field(index)).into_owned(),
        }
    }

    fn parse_float(&self, index: usize, column: &str) -> Result<f64, PropagationError> {
        lexical_core::parse::<f64>(self.field(index)).map_err(|_| self.malformed(index, column))
    }

    /// Sample sizes are counts; integral floats such as `1000.0` are accepted.
    fn parse_count(&self, index: usize) -> Result<u64, PropagationError> {
        let raw = self.field(index);
        if let Ok(count) = lexical_core::parse::<u64>(raw) {
            return Ok(count);
        }
        match lexical_core::parse::<f64>(raw) {
            Ok(value) if value >= 0.0 && value.fract() == 0.0 && value < u64::MAX as f64 => {
                Ok(value as u64)
            }
            _ => Err(self.malformed(index, &self.names.sample_size)),
        }
    }
}
