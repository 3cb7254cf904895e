// src/config/pipeline.rs: TOML pipeline configuration and its schema checks

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;

use crate::config::defs::PipelineError;
use crate::utils::file::resolve_path;


fn default_min_len() -> u32 { 20 }
fn default_min_qual() -> u32 { 20 }
fn default_mpileup_depth() -> u32 { 100_000 }
fn default_ivar_min_coverage_depth() -> u32 { 10 }
fn default_ivar_consensus_freq_threshold() -> f64 { 0.75 }
fn default_ivar_variant_freq_threshold() -> f64 { 0.25 }
fn default_ivar_min_variant_quality() -> u32 { 20 }


/// Per-stage thread requests. A stage never gets more than the run's core budget.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ThreadConfig {
    pub alignment: usize,
    pub trimming: usize,
    pub kraken2: usize,
    pub quast: usize,
    pub breseq: usize,
    pub fastqc: usize,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        ThreadConfig {
            alignment: 4,
            trimming: 2,
            kraken2: 4,
            quast: 1,
            breseq: 4,
            fastqc: 2,
        }
    }
}

impl ThreadConfig {
    /// Per-stage requests clamped to `1..=max_cores`, so the value passed to a tool
    /// matches the cores the executor actually reserves for it.
    pub fn capped(&self, max_cores: usize) -> ThreadConfig {
        let cap = |n: usize| n.min(max_cores.max(1)).max(1);
        ThreadConfig {
            alignment: cap(self.alignment),
            trimming: cap(self.trimming),
            kraken2: cap(self.kraken2),
            quast: cap(self.quast),
            breseq: cap(self.breseq),
            fastqc: cap(self.fastqc),
        }
    }
}


#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Sample manifest (CSV).
    pub samples: PathBuf,
    pub result_dir: PathBuf,

    /// bwa index prefix of the human reference.
    pub human_reference_index: PathBuf,
    pub viral_reference_genome: PathBuf,
    /// GFF3 feature coordinates of the viral reference.
    pub viral_reference_feature_coords: PathBuf,
    pub primer_scheme_bed: PathBuf,
    pub kraken2_db: PathBuf,
    /// GenBank reference used by breseq.
    pub breseq_reference: PathBuf,

    #[serde(default = "default_min_len")]
    pub min_len: u32,
    #[serde(default = "default_min_qual")]
    pub min_qual: u32,
    #[serde(default = "default_mpileup_depth")]
    pub mpileup_depth: u32,
    #[serde(default = "default_ivar_min_coverage_depth")]
    pub ivar_min_coverage_depth: u32,
    #[serde(default = "default_ivar_consensus_freq_threshold")]
    pub ivar_consensus_freq_threshold: f64,
    #[serde(default = "default_ivar_variant_freq_threshold")]
    pub ivar_variant_freq_threshold: f64,
    #[serde(default = "default_ivar_min_variant_quality")]
    pub ivar_min_variant_quality: u32,
    #[serde(default)]
    pub kraken2_confidence: f64,
    #[serde(default)]
    pub run_breseq: bool,

    #[serde(default)]
    pub threads: ThreadConfig,
}

impl PipelineConfig {
    /// Loads, resolves and validates a configuration file.
    /// Relative paths are taken relative to the file's own directory.
    ///
    /// # Arguments
    ///
    /// * `path` - TOML configuration file.
    ///
    /// # Returns
    /// Validated PipelineConfig, or PipelineError::InvalidConfig.
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            PipelineError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let abs = std::path::absolute(path).map_err(|e| PipelineError::IOError(e.to_string()))?;
        let base_dir = abs.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("/"));
        debug!("Loading pipeline configuration from {}", abs.display());
        Self::from_toml_str(&contents, &base_dir)
    }

    pub fn from_toml_str(contents: &str, base_dir: &Path) -> Result<Self, PipelineError> {
        let mut config: PipelineConfig = toml::from_str(contents)
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        config.resolve_paths(base_dir);
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        for path in [
            &mut self.samples,
            &mut self.result_dir,
            &mut self.human_reference_index,
            &mut self.viral_reference_genome,
            &mut self.viral_reference_feature_coords,
            &mut self.primer_scheme_bed,
            &mut self.kraken2_db,
            &mut self.breseq_reference,
        ] {
            if !path.as_os_str().is_empty() {
                *path = resolve_path(path, base_dir);
            }
        }
    }

    /// Schema checks serde cannot express.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let required = [
            ("samples", &self.samples),
            ("result_dir", &self.result_dir),
            ("human_reference_index", &self.human_reference_index),
            ("viral_reference_genome", &self.viral_reference_genome),
            ("viral_reference_feature_coords", &self.viral_reference_feature_coords),
            ("primer_scheme_bed", &self.primer_scheme_bed),
            ("kraken2_db", &self.kraken2_db),
            ("breseq_reference", &self.breseq_reference),
        ];
        for (name, path) in required {
            if path.as_os_str().is_empty() {
                return Err(PipelineError::InvalidConfig(format!("{} must not be empty", name)));
            }
        }

        let fractions = [
            ("ivar_consensus_freq_threshold", self.ivar_consensus_freq_threshold),
            ("ivar_variant_freq_threshold", self.ivar_variant_freq_threshold),
            ("kraken2_confidence", self.kraken2_confidence),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{} must be between 0 and 1, got {}",
                    name, value
                )));
            }
        }

        if self.min_len == 0 {
            return Err(PipelineError::InvalidConfig("min_len must be at least 1".to_string()));
        }
        if self.ivar_min_coverage_depth == 0 {
            return Err(PipelineError::InvalidConfig(
                "ivar_min_coverage_depth must be at least 1".to_string(),
            ));
        }
        // Phred scores top out at 93 in Sanger encoding
        for (name, value) in [("min_qual", self.min_qual), ("ivar_min_variant_quality", self.ivar_min_variant_quality)] {
            if value > 93 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{} must be a Phred score between 0 and 93, got {}",
                    name, value
                )));
            }
        }

        let threads = &self.threads;
        for (name, value) in [
            ("threads.alignment", threads.alignment),
            ("threads.trimming", threads.trimming),
            ("threads.kraken2", threads.kraken2),
            ("threads.quast", threads.quast),
            ("threads.breseq", threads.breseq),
            ("threads.fastqc", threads.fastqc),
        ] {
            if value == 0 {
                return Err(PipelineError::InvalidConfig(format!("{} must be at least 1", name)));
            }
        }

        Ok(())
    }
}
