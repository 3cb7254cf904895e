use std::collections::HashMap;
use std::path::PathBuf;

use lazy_static::lazy_static;
use thiserror::Error;

use crate::config::pipeline::PipelineConfig;
use crate::utils::manifest::{ManifestValidationError, SampleManifest};

// External software
pub const BWA_TAG: &str = "bwa";
pub const SAMTOOLS_TAG: &str = "samtools";
pub const TRIM_GALORE_TAG: &str = "trim_galore";
pub const IVAR_TAG: &str = "ivar";
pub const BEDTOOLS_TAG: &str = "bedtools";
pub const KRAKEN2_TAG: &str = "kraken2";
pub const QUAST_TAG: &str = "quast.py";
pub const BRESEQ_TAG: &str = "breseq";
pub const FASTQC_TAG: &str = "fastqc";
pub const CAT_TAG: &str = "cat";


lazy_static! {
    /// Oldest (major, minor) release each tool is known to work with.
    pub static ref TOOL_VERSIONS: HashMap<&'static str, (u32, u32)> = {
        let mut m = HashMap::new();
        m.insert(BWA_TAG, (0, 7));
        m.insert(SAMTOOLS_TAG, (1, 10));
        m.insert(TRIM_GALORE_TAG, (0, 6));
        m.insert(IVAR_TAG, (1, 3));
        m.insert(BEDTOOLS_TAG, (2, 29));
        m.insert(KRAKEN2_TAG, (2, 1));
        m.insert(QUAST_TAG, (5, 0));
        m.insert(BRESEQ_TAG, (0, 35));
        m.insert(FASTQC_TAG, (0, 11));

        m
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamtoolsSubcommand {
    View,
    Fastq,
    Sort,
    Index,
    Mpileup,
    Flagstat,
}

impl SamtoolsSubcommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            SamtoolsSubcommand::View => "view",
            SamtoolsSubcommand::Fastq => "fastq",
            SamtoolsSubcommand::Sort => "sort",
            SamtoolsSubcommand::Index => "index",
            SamtoolsSubcommand::Mpileup => "mpileup",
            SamtoolsSubcommand::Flagstat => "flagstat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IvarSubcommand {
    Trim,
    Consensus,
    Variants,
}

impl IvarSubcommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            IvarSubcommand::Trim => "trim",
            IvarSubcommand::Consensus => "consensus",
            IvarSubcommand::Variants => "variants",
        }
    }
}

// Per-sample layout, relative to the result directory
pub const COMBINED_READS: &str = "{sample}/combined_raw_fastq/{sample}_R{mate}.fastq.gz";
pub const HOST_REMOVED_BAM: &str = "{sample}/host_removal/{sample}_host_removed.bam";
pub const HOST_REMOVED_READS: &str = "{sample}/host_removal/{sample}_R{mate}.fastq.gz";
pub const ADAPTER_TRIMMED_DIR: &str = "{sample}/adapter_trimmed";
pub const ADAPTER_TRIMMED_READS: &str = "{sample}/adapter_trimmed/{sample}_val_{mate}.fq.gz";
pub const VIRAL_BAM: &str = "{sample}/core/{sample}_viral_reference.bam";
pub const PRIMER_TRIMMED_PREFIX: &str = "{sample}/core/{sample}_viral_reference.mapping.primertrimmed";
pub const PRIMER_TRIMMED_BAM: &str = "{sample}/core/{sample}_viral_reference.mapping.primertrimmed.bam";
pub const SORTED_BAM: &str = "{sample}/core/{sample}_viral_reference.mapping.primertrimmed.sorted.bam";
pub const SORTED_BAM_INDEX: &str = "{sample}/core/{sample}_viral_reference.mapping.primertrimmed.sorted.bam.bai";
pub const CONSENSUS_PREFIX: &str = "{sample}/core/{sample}.consensus";
pub const CONSENSUS_FASTA: &str = "{sample}/core/{sample}.consensus.fa";
pub const VARIANTS_PREFIX: &str = "{sample}/core/{sample}_ivar_variants";
pub const VARIANTS_TSV: &str = "{sample}/core/{sample}_ivar_variants.tsv";
pub const FLAGSTAT_TXT: &str = "{sample}/core/{sample}_flagstat.txt";
pub const COVERAGE_DEPTH: &str = "{sample}/coverage/{sample}_depth.txt";
pub const KRAKEN2_OUT: &str = "{sample}/kraken2/kraken2.out";
pub const KRAKEN2_REPORT: &str = "{sample}/kraken2/kraken2.report";
pub const QUAST_DIR: &str = "{sample}/quast";
pub const QUAST_REPORT: &str = "{sample}/quast/report.tsv";
pub const BRESEQ_DIR: &str = "{sample}/breseq";
pub const BRESEQ_INDEX: &str = "{sample}/breseq/output/index.html";
pub const RAW_FASTQC_DIR: &str = "{sample}/fastqc/raw";
pub const RAW_FASTQC_REPORT: &str = "{sample}/fastqc/raw/{sample}_R{mate}_fastqc.html";
pub const TRIMMED_FASTQC_DIR: &str = "{sample}/fastqc/trimmed";
pub const TRIMMED_FASTQC_REPORT: &str = "{sample}/fastqc/trimmed/{sample}_val_{mate}_fastqc.html";
pub const BENCHMARK_DIR: &str = "{sample}/benchmarks";
pub const LOG_DIR: &str = "{sample}/logs";

// Shared, not per-sample
pub const VIRAL_INDEX_PREFIX: &str = "viral_reference/viral_reference";
/// Files `bwa index` writes next to its prefix.
pub const BWA_INDEX_EXTS: &[&str] = &["amb", "ann", "bwt", "pac", "sa"];
/// Files every Kraken2 database directory holds.
pub const KRAKEN2_DB_FILES: &[&str] = &["hash.k2d", "opts.k2d", "taxo.k2d"];
pub const SHARED_LOG_DIR: &str = "logs";
pub const SHARED_BENCHMARK_DIR: &str = "benchmarks";

pub const SUMMARY_CSV: &str = "summary.csv";

// Static Parameters

/// Written into every report cell whose source output is missing or unreadable.
pub const MISSING_PLACEHOLDER: &str = "NA";
pub const SARS_COV_2_TAXID: &str = "2697049";
/// MN908947.3
pub const SARS_COV_2_GENOME_LENGTH: usize = 29_903;
pub const COVERAGE_DEPTH_THRESHOLD: u64 = 10;

pub const FASTQ_EXTS: &[&str] = &["fastq", "fq", "fastq.gz", "fq.gz"];


#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Manifest(#[from] ManifestValidationError),

    #[error("Invalid path template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("Output {path} is declared by both {first} and {second}")]
    AmbiguousProducer { path: PathBuf, first: String, second: String },

    #[error("Stage {0} is declared more than once")]
    DuplicateStage(String),

    #[error("Goal {0} is declared more than once")]
    DuplicateGoal(String),

    #[error("Dependency cycle between stages: {}", .0.join(", "))]
    CycleDetected(Vec<String>),

    #[error("Unknown goal: {0}")]
    UnknownGoal(String),

    #[error("Missing input {path} required by {stage}")]
    MissingInput { path: PathBuf, stage: String },

    #[error("Required tool not found on PATH: {0}")]
    ToolNotFound(String),

    #[error("Tool {tool} failed: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("{} stage(s) failed: {}", .failed.len(), .failed.join(", "))]
    StagesFailed { failed: Vec<String> },

    #[error("I/O error: {0}")]
    IOError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}


/// Immutable context handed to graph construction and execution.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub result_dir: PathBuf,
    pub config: PipelineConfig,
    pub manifest: SampleManifest,
    pub max_cores: usize,
}
