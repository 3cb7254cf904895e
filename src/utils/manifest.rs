// src/utils/manifest.rs: sample table loading and validation

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;
use thiserror::Error;

use crate::config::defs::FASTQ_EXTS;
use crate::utils::file::resolve_path;
use crate::utils::targets::Mate;

pub const SAMPLE_COLUMN: &str = "sample";
pub const R1_COLUMN: &str = "r1_path";
pub const R2_COLUMN: &str = "r2_path";

lazy_static! {
    // Sample ids become directory names, so they may not start with '.'
    static ref SAMPLE_ID_RE: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap();
}


#[derive(Debug, Error)]
pub enum ManifestValidationError {
    #[error("Cannot read sample manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed sample manifest: {0}")]
    Csv(#[from] csv::Error),

    #[error("Sample manifest is missing required column '{0}'")]
    MissingColumn(String),

    #[error("Sample manifest line {line}: {reason}")]
    InvalidRow { line: u64, reason: String },

    #[error("Sample manifest {0} lists no samples")]
    Empty(PathBuf),
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub id: String,
    pub r1: Vec<PathBuf>,
    pub r2: Vec<PathBuf>,
}

impl Sample {
    /// Source files for one mate, in manifest row order.
    pub fn reads(&self, mate: Mate) -> &[PathBuf] {
        match mate {
            Mate::R1 => &self.r1,
            Mate::R2 => &self.r2,
        }
    }
}


#[derive(Debug, Clone)]
pub struct SampleManifest {
    path: PathBuf,
    samples: BTreeMap<String, Sample>,
}

impl SampleManifest {
    /// Reads and validates a sample table. Relative read paths are resolved
    /// against the manifest's own directory.
    ///
    /// # Arguments
    ///
    /// * `path` - CSV with `sample`, `r1_path` and `r2_path` columns.
    ///
    /// # Returns
    /// SampleManifest with one entry per distinct sample id.
    pub fn from_path(path: &Path) -> Result<Self, ManifestValidationError> {
        let abs = std::path::absolute(path).map_err(|e| ManifestValidationError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let file = File::open(&abs).map_err(|e| ManifestValidationError::Io {
            path: abs.clone(),
            source: e,
        })?;
        let base_dir = abs.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("/"));
        let manifest = Self::from_reader(file, &abs, &base_dir)?;
        info!("Loaded {} sample(s) from {}", manifest.len(), abs.display());
        Ok(manifest)
    }

    pub fn from_reader<R: Read>(
        reader: R,
        source: &Path,
        base_dir: &Path,
    ) -> Result<Self, ManifestValidationError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| ManifestValidationError::MissingColumn(name.to_string()))
        };
        let sample_idx = column(SAMPLE_COLUMN)?;
        let r1_idx = column(R1_COLUMN)?;
        let r2_idx = column(R2_COLUMN)?;

        let mut samples: BTreeMap<String, Sample> = BTreeMap::new();
        for (row, record) in csv_reader.records().enumerate() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or(row as u64 + 2);
            if record.iter().all(|field| field.is_empty()) {
                continue;
            }

            let id = record.get(sample_idx).unwrap_or_default();
            if id.is_empty() {
                return Err(ManifestValidationError::InvalidRow { line, reason: "empty sample id".to_string() });
            }
            if !SAMPLE_ID_RE.is_match(id) {
                return Err(ManifestValidationError::InvalidRow {
                    line,
                    reason: format!(
                        "sample id '{}' must start with a letter or digit and contain only letters, digits, '.', '_' and '-'",
                        id
                    ),
                });
            }

            let r1 = validate_read_path(record.get(r1_idx).unwrap_or_default(), R1_COLUMN, line)?;
            let r2 = validate_read_path(record.get(r2_idx).unwrap_or_default(), R2_COLUMN, line)?;
            let gzipped = has_gz_suffix(r1);
            if has_gz_suffix(r2) != gzipped {
                return Err(ManifestValidationError::InvalidRow {
                    line,
                    reason: format!("{} and {} mix gzipped and plain FASTQ", R1_COLUMN, R2_COLUMN),
                });
            }

            let entry = samples.entry(id.to_string()).or_insert_with(|| Sample {
                id: id.to_string(),
                r1: Vec::new(),
                r2: Vec::new(),
            });
            if let Some(first) = entry.r1.first() {
                // Rows are concatenated byte for byte, so they must share one compression
                if has_gz_suffix(&first.to_string_lossy()) != gzipped {
                    return Err(ManifestValidationError::InvalidRow {
                        line,
                        reason: format!("sample '{}' mixes gzipped and plain FASTQ across rows", id),
                    });
                }
                debug!("Sample {} appears again on line {}; merging read files", id, line);
            }
            entry.r1.push(resolve_path(Path::new(r1), base_dir));
            entry.r2.push(resolve_path(Path::new(r2), base_dir));
        }

        if samples.is_empty() {
            return Err(ManifestValidationError::Empty(source.to_path_buf()));
        }

        Ok(SampleManifest { path: source.to_path_buf(), samples })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sorted, distinct sample ids.
    pub fn sample_ids(&self) -> Vec<&str> {
        self.samples.keys().map(String::as_str).collect()
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.values()
    }

    pub fn get(&self, id: &str) -> Option<&Sample> {
        self.samples.get(id)
    }

    pub fn reads(&self, id: &str, mate: Mate) -> Option<&[PathBuf]> {
        self.samples.get(id).map(|s| s.reads(mate))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}


fn has_gz_suffix(value: &str) -> bool {
    value.to_ascii_lowercase().ends_with(".gz")
}


fn validate_read_path<'a>(value: &'a str, column: &str, line: u64) -> Result<&'a str, ManifestValidationError> {
    if value.is_empty() {
        return Err(ManifestValidationError::InvalidRow {
            line,
            reason: format!("empty {}", column),
        });
    }
    let lower = value.to_ascii_lowercase();
    if !FASTQ_EXTS.iter().any(|ext| lower.ends_with(&format!(".{}", ext))) {
        return Err(ManifestValidationError::InvalidRow {
            line,
            reason: format!("{} '{}' is not a FASTQ file (.fastq, .fq, optionally .gz)", column, value),
        });
    }
    Ok(value)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn load(csv: &str) -> Result<SampleManifest, ManifestValidationError> {
        SampleManifest::from_reader(csv.as_bytes(), Path::new("/data/run/sample_table.csv"), Path::new("/data/run"))
    }

    #[test]
    fn test_split_sample_rows_are_merged_in_order() {
        let manifest = load(
            "sample,r1_path,r2_path\n\
             s2,raw/s2_L001_R1.fastq.gz,raw/s2_L001_R2.fastq.gz\n\
             s1,raw/s1_L001_R1.fastq.gz,raw/s1_L001_R2.fastq.gz\n\
             s2,raw/s2_L002_R1.fastq.gz,raw/s2_L002_R2.fastq.gz\n",
        )
        .unwrap();

        assert_eq!(manifest.sample_ids(), vec!["s1", "s2"]);
        assert_eq!(manifest.path(), Path::new("/data/run/sample_table.csv"));
        let s2 = manifest.get("s2").unwrap();
        assert_eq!(
            s2.r1,
            vec![
                PathBuf::from("/data/run/raw/s2_L001_R1.fastq.gz"),
                PathBuf::from("/data/run/raw/s2_L002_R1.fastq.gz"),
            ]
        );
        assert_eq!(
            manifest.reads("s2", Mate::R2).unwrap(),
            &[
                PathBuf::from("/data/run/raw/s2_L001_R2.fastq.gz"),
                PathBuf::from("/data/run/raw/s2_L002_R2.fastq.gz"),
            ]
        );
    }

    #[test]
    fn test_absolute_paths_are_kept_and_extra_columns_ignored() {
        let manifest = load("run,sample,r1_path,r2_path\nA,s1,/reads/s1_R1.fq,../s1_R2.fq\n").unwrap();
        assert_eq!(manifest.reads("s1", Mate::R1).unwrap(), &[PathBuf::from("/reads/s1_R1.fq")]);
        assert_eq!(manifest.reads("s1", Mate::R2).unwrap(), &[PathBuf::from("/data/s1_R2.fq")]);
    }

    #[test]
    fn test_missing_column() {
        let err = load("sample,r1_path\ns1,a_R1.fastq.gz\n").unwrap_err();
        assert!(matches!(err, ManifestValidationError::MissingColumn(c) if c == R2_COLUMN));
    }

    #[test]
    fn test_invalid_rows() {
        let err = load("sample,r1_path,r2_path\nbad/id,a_R1.fq,a_R2.fq\n").unwrap_err();
        assert!(matches!(err, ManifestValidationError::InvalidRow { line: 2, .. }));

        let err = load("sample,r1_path,r2_path\ns1,a_R1.fq,\n").unwrap_err();
        assert!(matches!(err, ManifestValidationError::InvalidRow { .. }));

        let err = load("sample,r1_path,r2_path\ns1,a_R1.bam,a_R2.fq\n").unwrap_err();
        assert!(matches!(err, ManifestValidationError::InvalidRow { .. }));
    }

    #[test]
    fn test_dot_ids_are_rejected() {
        for id in [".", "..", ".hidden"] {
            let csv = format!("sample,r1_path,r2_path\n{},a_R1.fq,a_R2.fq\n", id);
            let err = load(&csv).unwrap_err();
            assert!(matches!(err, ManifestValidationError::InvalidRow { line: 2, .. }), "{}", id);
        }
        assert!(load("sample,r1_path,r2_path\ns1.v2,a_R1.fq,a_R2.fq\n").is_ok());
    }

    #[test]
    fn test_mixed_compression_within_a_sample() {
        let err = load("sample,r1_path,r2_path\ns1,a_R1.fastq.gz,a_R2.fastq\n").unwrap_err();
        assert!(matches!(err, ManifestValidationError::InvalidRow { line: 2, .. }));

        let err = load(
            "sample,r1_path,r2_path\n\
             s1,L001_R1.fastq.gz,L001_R2.fastq.gz\n\
             s2,b_R1.fq,b_R2.fq\n\
             s1,L002_R1.fastq,L002_R2.fastq\n",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestValidationError::InvalidRow { line: 4, .. }));

        let manifest = load("sample,r1_path,r2_path\ns1,a_R1.FQ.GZ,a_R2.fq.gz\ns1,b_R1.fastq.gz,b_R2.fastq.gz\n").unwrap();
        assert_eq!(manifest.reads("s1", Mate::R1).unwrap().len(), 2);
    }

    #[test]
    fn test_ragged_row_is_a_csv_error() {
        let err = load("sample,r1_path,r2_path\ns1,a_R1.fq\n").unwrap_err();
        assert!(matches!(err, ManifestValidationError::Csv(_)));
    }

    #[test]
    fn test_empty_manifest() {
        let err = load("sample,r1_path,r2_path\n").unwrap_err();
        assert!(matches!(err, ManifestValidationError::Empty(_)));
    }
}
