//! Writer for derived summary statistics.
//!
//! Output goes to a temporary file beside the destination and is renamed into place
//! only by [`StatsWriter::finish`]; a writer dropped early leaves nothing behind.

use flate2::Compression as GzLevel;
use flate2::write::GzEncoder;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::types::{StatColumns, VariantStat};

const WRITE_BUFFER_SIZE: usize = 1 << 20;

enum Sink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.write_all(buf),
            Self::Gzip(w) => w.write_all(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
        }
    }
}

impl Sink {
    fn finish(self) -> io::Result<File> {
        let buffered = match self {
            Self::Plain(w) => w,
            Self::Gzip(w) => w.finish()?,
        };
        buffered.into_inner().map_err(io::Error::other)
    }
}

/// Tab-separated `ID BETA SE OBS_CT` rows, optionally gzip-compressed.
pub struct StatsWriter {
    path: PathBuf,
    temp: NamedTempFile,
    sink: Sink,
    line: String,
    float: ryu::Buffer,
    rows: u64,
}

impl StatsWriter {
    pub fn create(path: &Path, compress: bool, columns: &StatColumns) -> io::Result<Self> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let temp = NamedTempFile::new_in(dir)?;
        let buffered = BufWriter::with_capacity(WRITE_BUFFER_SIZE, temp.as_file().try_clone()?);
        let sink = if compress {
            Sink::Gzip(GzEncoder::new(buffered, GzLevel::default()))
        } else {
            Sink::Plain(buffered)
        };

        let mut writer = Self {
            path: path.to_path_buf(),
            temp,
            sink,
            line: String::with_capacity(128),
            float: ryu::Buffer::new(),
            rows: 0,
        };
        writeln!(
            writer.sink,
            "{}\t{}\t{}\t{}",
            columns.id, columns.beta, columns.se, columns.sample_size
        )?;
        Ok(writer)
    }

    pub fn write(&mut self, variant_id: &str, stat: &VariantStat) -> io::Result<()> {
        self.line.clear();
        self.line.push_str(variant_id);
        self.line.push('\t');
        self.line.push_str(self.float.format(stat.effect));
        self.line.push('\t');
        self.line.push_str(self.float.format(stat.se));
        // Writing to a String cannot fail.
        let _ = writeln!(self.line, "\t{}", stat.sample_size);
        self.sink.write_all(self.line.as_bytes())?;
        self.rows += 1;
        Ok(())
    }

    /// Flushes all data and moves the file to its destination.
    pub fn finish(self) -> io::Result<u64> {
        let file = self.sink.finish()?;
        file.sync_all()?;
        self.temp
            .persist(&self.path)
            .map_err(|e| io::Error::new(e.error.kind(), e.error.to_string()))?;
        log::info!("Wrote {} variants to '{}'", self.rows, self.path.display());
        Ok(self.rows)
    }
}
