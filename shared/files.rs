use log::debug;
use natord::compare;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;

const READ_BUFFER_SIZE: usize = 1 << 20;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Compression {
    Plain,
    Gzip,
}

impl Compression {
    pub fn of_path(path: &Path) -> Self {
        if path.extension() == Some(OsStr::new("gz")) {
            Self::Gzip
        } else {
            Self::Plain
        }
    }
}

/// Opens a text file for sequential reading, transparently decompressing `.gz` input.
/// Multi-member gzip streams (e.g. concatenated `bgzip` blocks) are read in full.
pub fn open_text(path: &Path) -> io::Result<Box<dyn Read + Send>> {
    let file = File::open(path).map_err(|e| {
        io::Error::new(e.kind(), format!("Opening {}: {e}", path.display()))
    })?;
    let reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
    Ok(match Compression::of_path(path) {
        Compression::Gzip => Box::new(MultiGzDecoder::new(reader)),
        Compression::Plain => Box::new(reader),
    })
}

/// The file name with any `.gz` suffix removed.
fn uncompressed_name(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    Some(name.strip_suffix(".gz").unwrap_or(name))
}

/// Comma for `.csv` files, tab for everything else.
pub fn delimiter_for(path: &Path) -> u8 {
    match uncompressed_name(path) {
        Some(name) if name.to_ascii_lowercase().ends_with(".csv") => b',',
        _ => b'\t',
    }
}

/// The feature a per-feature statistics file belongs to: its file name up to the
/// first `.`, so `bmi.glm.linear.gz` describes `bmi`.
pub fn feature_name_from_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stem = name.split('.').next()?;
    (!stem.is_empty()).then(|| stem.to_string())
}

/// Lists the regular, non-hidden files of `dir` in natural order (`f2` before `f10`).
pub fn list_data_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(OsStr::to_str)
            .is_none_or(|n| n.starts_with('.'));
        if hidden || !entry.file_type()?.is_file() {
            debug!("Skipping {}", path.display());
            continue;
        }
        files.push(path);
    }
    files.sort_by(|a, b| compare(&a.to_string_lossy(), &b.to_string_lossy()));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression as GzLevel;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn reads_plain_and_gzip_text() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("a.tsv");
        fs::write(&plain, "ID\tBETA\nrs1\t0.5\n").unwrap();

        let gz = dir.path().join("b.tsv.gz");
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), GzLevel::default());
        encoder.write_all(b"ID\tBETA\nrs1\t0.5\n").unwrap();
        encoder.finish().unwrap();

        for path in [&plain, &gz] {
            let mut text = String::new();
            open_text(path).unwrap().read_to_string(&mut text).unwrap();
            assert_eq!(text, "ID\tBETA\nrs1\t0.5\n");
        }
    }

    #[test]
    fn delimiter_and_feature_names() {
        assert_eq!(delimiter_for(Path::new("x/beta.csv")), b',');
        assert_eq!(delimiter_for(Path::new("x/beta.CSV.gz")), b',');
        assert_eq!(delimiter_for(Path::new("x/bmi.tsv.gz")), b'\t');
        assert_eq!(
            feature_name_from_path(Path::new("gwas/bmi.glm.linear.gz")).as_deref(),
            Some("bmi")
        );
        assert_eq!(feature_name_from_path(Path::new("gwas/.hidden")), None);
    }

    #[test]
    fn lists_files_in_natural_order() {
        let dir = tempdir().unwrap();
        for name in ["f10.tsv", "f2.tsv", "f1.tsv", ".DS_Store"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("nested")).unwrap();
        let names: Vec<String> = list_data_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["f1.tsv", "f2.tsv", "f10.tsv"]);
    }
}
