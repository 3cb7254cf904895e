// src/pipelines/postprocess.rs: per-sample summary of a finished (or partial) run

use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use fxhash::FxHashSet;
use log::{info, warn};

use crate::config::defs::*;
use crate::utils::file::{ensure_parent_dirs, open_text_reader};
use crate::utils::manifest::SampleManifest;
use crate::utils::targets::{Mate, PathTemplate};


pub const SUMMARY_HEADER: &[&str] = &[
    "sample",
    "raw_reads",
    "host_removed_reads",
    "trimmed_reads",
    "mapped_reads",
    "consensus_length",
    "consensus_n_count",
    "genome_completeness",
    "mean_depth",
    "pct_positions_10x",
    "variant_count",
    "pct_sars_cov_2_reads",
    "quast_genome_fraction",
    "missing_outputs",
];


/// One summary row. `None` is written as the missing placeholder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleReport {
    pub sample: String,
    pub raw_reads: Option<u64>,
    pub host_removed_reads: Option<u64>,
    pub trimmed_reads: Option<u64>,
    pub mapped_reads: Option<u64>,
    pub consensus_length: Option<usize>,
    pub consensus_n_count: Option<usize>,
    pub genome_completeness: Option<f64>,
    pub mean_depth: Option<f64>,
    pub pct_positions_10x: Option<f64>,
    pub variant_count: Option<u64>,
    pub pct_sars_cov_2_reads: Option<f64>,
    pub quast_genome_fraction: Option<f64>,
    /// Output kinds that were absent or unreadable, in column order.
    pub missing_outputs: Vec<String>,
}

impl SampleReport {
    pub fn to_record(&self) -> Vec<String> {
        fn cell<T: ToString>(value: &Option<T>) -> String {
            value.as_ref().map(T::to_string).unwrap_or_else(|| MISSING_PLACEHOLDER.to_string())
        }
        fn float(value: &Option<f64>) -> String {
            value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| MISSING_PLACEHOLDER.to_string())
        }

        vec![
            self.sample.clone(),
            cell(&self.raw_reads),
            cell(&self.host_removed_reads),
            cell(&self.trimmed_reads),
            cell(&self.mapped_reads),
            cell(&self.consensus_length),
            cell(&self.consensus_n_count),
            float(&self.genome_completeness),
            float(&self.mean_depth),
            float(&self.pct_positions_10x),
            cell(&self.variant_count),
            float(&self.pct_sars_cov_2_reads),
            float(&self.quast_genome_fraction),
            self.missing_outputs.join(";"),
        ]
    }
}


/// Records in a (possibly gzipped) FASTQ file.
pub fn count_fastq_reads(path: &Path) -> Result<u64> {
    let reader = open_text_reader(path)?;
    let mut lines = 0u64;
    for line in reader.lines() {
        line?;
        lines += 1;
    }
    if lines % 4 != 0 {
        return Err(anyhow!("{} has {} lines, not a multiple of 4", path.display(), lines));
    }
    Ok(lines / 4)
}


/// Length and ambiguous-base count of a single-record consensus FASTA.
pub fn parse_consensus(path: &Path) -> Result<(usize, usize)> {
    let reader = open_text_reader(path)?;
    let mut length = 0usize;
    let mut n_count = 0usize;
    let mut seen_header = false;
    for line in reader.lines() {
        let line = line?;
        if line.starts_with('>') {
            seen_header = true;
            continue;
        }
        for base in line.trim().bytes() {
            length += 1;
            if base == b'N' || base == b'n' {
                n_count += 1;
            }
        }
    }
    if !seen_header {
        return Err(anyhow!("{} has no FASTA header", path.display()));
    }
    Ok((length, n_count))
}


/// Percentage of the reference genome resolved to a called base.
pub fn genome_completeness(length: usize, n_count: usize) -> f64 {
    let called = length.saturating_sub(n_count);
    100.0 * called as f64 / SARS_COV_2_GENOME_LENGTH as f64
}


/// Mean depth and percentage of positions at or above `threshold`, from
/// `bedtools genomecov -d` output (chrom, position, depth).
pub fn parse_depth(path: &Path, threshold: u64) -> Result<(f64, f64)> {
    let reader = open_text_reader(path)?;
    let mut positions = 0u64;
    let mut total = 0u64;
    let mut covered = 0u64;
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let depth: u64 = line
            .split('\t')
            .nth(2)
            .ok_or_else(|| anyhow!("{} line {}: expected 3 columns", path.display(), i + 1))?
            .trim()
            .parse()
            .with_context(|| format!("{} line {}: bad depth", path.display(), i + 1))?;
        positions += 1;
        total += depth;
        if depth >= threshold {
            covered += 1;
        }
    }
    if positions == 0 {
        return Err(anyhow!("{} is empty", path.display()));
    }
    Ok((total as f64 / positions as f64, 100.0 * covered as f64 / positions as f64))
}


/// Distinct passing variants in an ivar variants table.
///
/// ivar writes one row per overlapping GFF feature, so a mutation inside two
/// features appears twice. Rows are keyed by REGION, POS, REF and ALT.
pub fn count_variants(path: &Path) -> Result<u64> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(open_text_reader(path)?);
    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| anyhow!("{} has no {} column", path.display(), name))
    };
    let pass_idx = column("PASS")?;
    let key_idx = [column("REGION")?, column("POS")?, column("REF")?, column("ALT")?];

    let mut seen: FxHashSet<Vec<String>> = FxHashSet::default();
    for record in reader.records() {
        let record = record?;
        if record.get(pass_idx).is_some_and(|v| v.eq_ignore_ascii_case("true")) {
            seen.insert(key_idx.iter().map(|&i| record.get(i).unwrap_or_default().to_string()).collect());
        }
    }
    Ok(seen.len() as u64)
}


/// Percentage of reads in the clade rooted at `taxid`, from a kraken2 report.
/// A taxon absent from the report had no reads assigned.
pub fn parse_kraken_report(path: &Path, taxid: &str) -> Result<f64> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(open_text_reader(path)?);

    for record in reader.records() {
        let record = record?;
        if record.get(4) == Some(taxid) {
            let pct = record.get(0).unwrap_or_default();
            return pct
                .parse::<f64>()
                .with_context(|| format!("{}: bad percentage '{}' for taxid {}", path.display(), pct, taxid));
        }
    }
    Ok(0.0)
}


/// "Genome fraction (%)" from a QUAST report.tsv. Missing when nothing aligned.
pub fn parse_quast_report(path: &Path) -> Result<f64> {
    let reader = open_text_reader(path)?;
    for line in reader.lines() {
        let line = line?;
        let mut fields = line.split('\t');
        if fields.next() == Some("Genome fraction (%)") {
            let value = fields.next().unwrap_or_default().trim();
            return value.parse::<f64>().with_context(|| format!("{}: bad genome fraction '{}'", path.display(), value));
        }
    }
    Err(anyhow!("{} has no genome fraction row", path.display()))
}


/// Mapped read count (QC-passed) from `samtools flagstat` text output.
pub fn parse_flagstat(path: &Path) -> Result<u64> {
    let reader = open_text_reader(path)?;
    for line in reader.lines() {
        let line = line?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() >= 4 && tokens[1] == "+" && tokens[3] == "mapped" {
            return tokens[0].parse::<u64>().with_context(|| format!("{}: bad mapped count", path.display()));
        }
    }
    Err(anyhow!("{} has no mapped line", path.display()))
}


fn render(result_dir: &Path, pattern: &str, sample: &str, mate: Option<Mate>) -> Result<PathBuf, PipelineError> {
    Ok(result_dir.join(PathTemplate::new(pattern)?.render(Some(sample), mate)?))
}


/// Reads one metric, recording the output kind as missing when it cannot be read.
fn collect<T>(sample: &str, kind: &str, missing: &mut Vec<String>, read: impl FnOnce() -> Result<T>) -> Option<T> {
    match read() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{}: {} unavailable: {}", sample, kind, e);
            if !missing.iter().any(|m| m == kind) {
                missing.push(kind.to_string());
            }
            None
        }
    }
}


fn pair_count(result_dir: &Path, pattern: &str, sample: &str) -> Result<u64> {
    let mut total = 0;
    for mate in Mate::BOTH {
        total += count_fastq_reads(&render(result_dir, pattern, sample, Some(mate))?)?;
    }
    Ok(total)
}


/// Gathers every metric available for one sample.
pub fn summarize_sample(result_dir: &Path, sample: &str) -> SampleReport {
    let mut missing = Vec::new();
    let mut report = SampleReport { sample: sample.to_string(), ..Default::default() };

    report.raw_reads = collect(sample, "combined_raw_reads", &mut missing, || {
        pair_count(result_dir, COMBINED_READS, sample)
    });
    report.host_removed_reads = collect(sample, "host_removed_reads", &mut missing, || {
        pair_count(result_dir, HOST_REMOVED_READS, sample)
    });
    report.trimmed_reads = collect(sample, "adapter_trimmed_reads", &mut missing, || {
        pair_count(result_dir, ADAPTER_TRIMMED_READS, sample)
    });
    report.mapped_reads = collect(sample, "flagstat", &mut missing, || {
        parse_flagstat(&render(result_dir, FLAGSTAT_TXT, sample, None)?)
    });

    if let Some((length, n_count)) = collect(sample, "consensus", &mut missing, || {
        parse_consensus(&render(result_dir, CONSENSUS_FASTA, sample, None)?)
    }) {
        report.consensus_length = Some(length);
        report.consensus_n_count = Some(n_count);
        report.genome_completeness = Some(genome_completeness(length, n_count));
    }

    if let Some((mean, pct)) = collect(sample, "coverage", &mut missing, || {
        parse_depth(&render(result_dir, COVERAGE_DEPTH, sample, None)?, COVERAGE_DEPTH_THRESHOLD)
    }) {
        report.mean_depth = Some(mean);
        report.pct_positions_10x = Some(pct);
    }

    report.variant_count = collect(sample, "variants", &mut missing, || {
        count_variants(&render(result_dir, VARIANTS_TSV, sample, None)?)
    });
    report.pct_sars_cov_2_reads = collect(sample, "kraken2", &mut missing, || {
        parse_kraken_report(&render(result_dir, KRAKEN2_REPORT, sample, None)?, SARS_COV_2_TAXID)
    });
    report.quast_genome_fraction = collect(sample, "quast", &mut missing, || {
        parse_quast_report(&render(result_dir, QUAST_REPORT, sample, None)?)
    });

    report.missing_outputs = missing;
    report
}


/// Writes the summary table for every sample in the manifest.
///
/// # Arguments
///
/// * `manifest_path` - Sample table used for the run.
/// * `result_dir` - Root of the per-sample output directories.
/// * `out_path` - Destination; `<result_dir>/summary.csv` when None.
///
/// # Returns
/// Path of the written report. Missing sample outputs never fail the call.
pub fn run(manifest_path: &Path, result_dir: &Path, out_path: Option<&Path>) -> Result<PathBuf, PipelineError> {
    println!("\n-------------\n Postprocess\n-------------\n");

    let manifest = SampleManifest::from_path(manifest_path)?;
    let out_path = out_path.map(Path::to_path_buf).unwrap_or_else(|| result_dir.join(SUMMARY_CSV));

    let reports: Vec<SampleReport> = manifest
        .sample_ids()
        .into_iter()
        .map(|sample| summarize_sample(result_dir, sample))
        .collect();

    ensure_parent_dirs([&out_path]).map_err(|e| PipelineError::IOError(e.to_string()))?;
    write_summary(&out_path, &reports)?;

    let incomplete = reports.iter().filter(|r| !r.missing_outputs.is_empty()).count();
    if incomplete > 0 {
        warn!("{} of {} sample(s) have missing outputs", incomplete, reports.len());
    }
    info!("Wrote summary for {} sample(s) to {}", reports.len(), out_path.display());
    Ok(out_path)
}


pub fn write_summary(path: &Path, reports: &[SampleReport]) -> Result<(), PipelineError> {
    let to_io = |e: csv::Error| PipelineError::IOError(format!("{}: {}", path.display(), e));
    let mut writer = csv::Writer::from_path(path).map_err(to_io)?;
    writer.write_record(SUMMARY_HEADER).map_err(to_io)?;
    for report in reports {
        writer.write_record(report.to_record()).map_err(to_io)?;
    }
    writer.flush().map_err(|e| PipelineError::IOError(format!("{}: {}", path.display(), e)))?;
    Ok(())
}
